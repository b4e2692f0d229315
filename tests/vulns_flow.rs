//! Integration tests for the vulnerability sweep using wiremock.
//!
//! Covers exploit-field normalization, the derived CVE URL and owning
//! device id, ordering across devices, and per-device failure isolation
//! (one failing device must not abort the sweep).

use mde_posture::client::MdeClient;
use mde_posture::machines::{collect_machines, Machine};
use mde_posture::vulns::collect_vulnerabilities;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_client(server: &MockServer) -> MdeClient {
    MdeClient::with_static_token("mock-token", &format!("{}/", server.uri()))
}

/// Builds retained machines by running the collector against a one-shot
/// catalog mock, so the test inputs flow through the real ingestion path.
async fn machines_from_catalog(
    server: &MockServer,
    client: &MdeClient,
    ids: &[&str],
) -> Vec<Machine> {
    let value: Vec<_> = ids
        .iter()
        .map(|id| serde_json::json!({"id": id, "healthStatus": "Active", "machineTags": []}))
        .collect();
    Mock::given(method("GET"))
        .and(path("api/machines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": value})))
        .mount(server)
        .await;
    collect_machines(client).await.unwrap()
}

#[tokio::test]
async fn vulnerabilities_are_normalized_and_attributed() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let machines = machines_from_catalog(&server, &client, &["dev-a"]).await;

    Mock::given(method("GET"))
        .and(path("api/machines/dev-a/vulnerabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {
                    "id": "CVE-2021-44228",
                    "name": "Log4Shell",
                    "severity": "Critical",
                    "cvssV3": 10.0,
                    "exploitTypes": ["RemoteCodeExecution", "PrivilegeEscalation"],
                    "exploitUris": []
                },
                {
                    "id": "CVE-2024-0001",
                    "severity": "Low",
                    "exploitTypes": [],
                    "exploitUris": ["https://example.test/poc"]
                }
            ]
        })))
        .mount(&server)
        .await;

    let report = collect_vulnerabilities(&client, &machines).await;

    assert!(report.failures.is_empty());
    assert_eq!(report.records.len(), 2);

    let first = &report.records[0];
    assert_eq!(first.id, "CVE-2021-44228");
    assert_eq!(first.exploit_types, "RemoteCodeExecution");
    assert_eq!(first.exploit_uris, "None");
    assert_eq!(
        first.cve_information,
        "https://cve.mitre.org/cgi-bin/cvename.cgi?name=CVE-2021-44228"
    );
    assert_eq!(first.machine_id, "dev-a");

    let second = &report.records[1];
    assert_eq!(second.exploit_types, "None");
    assert_eq!(second.exploit_uris, "https://example.test/poc");
}

#[tokio::test]
async fn records_preserve_device_order() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let machines = machines_from_catalog(&server, &client, &["dev-1", "dev-2"]).await;

    for (dev, cve) in [("dev-1", "CVE-1"), ("dev-2", "CVE-2")] {
        Mock::given(method("GET"))
            .and(path(format!("api/machines/{dev}/vulnerabilities")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"id": cve, "exploitTypes": [], "exploitUris": []}]
            })))
            .mount(&server)
            .await;
    }

    let report = collect_vulnerabilities(&client, &machines).await;
    let owners: Vec<&str> = report.records.iter().map(|v| v.machine_id.as_str()).collect();
    assert_eq!(owners, vec!["dev-1", "dev-2"]);
}

#[tokio::test]
async fn failing_device_is_isolated_not_fatal() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let machines = machines_from_catalog(&server, &client, &["dev-ok", "dev-bad", "dev-ok2"]).await;

    for dev in ["dev-ok", "dev-ok2"] {
        Mock::given(method("GET"))
            .and(path(format!("api/machines/{dev}/vulnerabilities")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"id": format!("CVE-{dev}"), "exploitTypes": [], "exploitUris": []}]
            })))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("api/machines/dev-bad/vulnerabilities"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let report = collect_vulnerabilities(&client, &machines).await;

    assert_eq!(report.records.len(), 2, "healthy devices still publish");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].machine_id, "dev-bad");
    assert!(
        report.failures[0].error.to_string().contains("500"),
        "failure should carry the upstream status"
    );
}

#[tokio::test]
async fn no_devices_yields_empty_report() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    let report = collect_vulnerabilities(&client, &[]).await;
    assert!(report.records.is_empty());
    assert!(report.failures.is_empty());
}
