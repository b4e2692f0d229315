//! Per-device vulnerability collection and normalization.
//!
//! For every retained device, `/api/machines/{id}/vulnerabilities` is
//! fetched and each record is normalized:
//!
//! - `exploitTypes` / `exploitUris` arrive as variable-shaped arrays and are
//!   collapsed to the first element's string form, or the literal `"None"`
//!   when empty.
//! - A CVE reference URL is derived from the vulnerability id (the API does
//!   not return one).
//! - The owning device id is written into `vuln_MachineId` so the datasets
//!   can be joined downstream.
//! - Every other field the API returns is republished unchanged through a
//!   flattened passthrough map; only the exploit arrays and the derived
//!   fields are rewritten.
//!
//! Fetches run with bounded concurrency and per-device failure isolation:
//! a device whose lookup fails is recorded in the report instead of
//! aborting the run, and the successful records are still published. Order
//! is preserved (device order, response order within a device).

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::client::{MdeClient, ODataList};
use crate::error::PostureError;
use crate::machines::Machine;

/// How many vulnerability lookups may be in flight at once. The MDE API
/// throttles aggressively past single digits.
const FETCH_CONCURRENCY: usize = 4;

/// Placeholder written when an exploit array is empty.
const NO_EXPLOIT_DATA: &str = "None";

/// A vulnerability record as returned by the MDE API, before normalization.
///
/// The exploit arrays are kept as raw JSON values because their element
/// shape varies across tenants and API revisions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVulnerability {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    cvss_v3: Option<f64>,
    #[serde(default)]
    exposed_machines: Option<i64>,
    #[serde(default)]
    published_on: Option<String>,
    #[serde(default)]
    updated_on: Option<String>,
    #[serde(default)]
    public_exploit: Option<bool>,
    #[serde(default)]
    exploit_verified: Option<bool>,
    #[serde(default)]
    exploit_in_kit: Option<bool>,
    #[serde(default)]
    exploit_types: Vec<Value>,
    #[serde(default)]
    exploit_uris: Vec<Value>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

/// A normalized vulnerability record as published in
/// `processed_machine_vulns`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    /// Vulnerability identifier (usually a CVE id).
    pub id: String,
    /// Short title.
    pub name: Option<String>,
    /// Long-form description.
    pub description: Option<String>,
    /// Severity label assigned by MDE.
    pub severity: Option<String>,
    /// CVSS v3 base score.
    pub cvss_v3: Option<f64>,
    /// Number of machines in the tenant exposed to this vulnerability.
    pub exposed_machines: Option<i64>,
    /// Publication timestamp.
    pub published_on: Option<String>,
    /// Last-update timestamp.
    pub updated_on: Option<String>,
    /// Whether a public exploit is known.
    pub public_exploit: Option<bool>,
    /// Whether a known exploit has been verified.
    pub exploit_verified: Option<bool>,
    /// Whether the exploit ships in an exploit kit.
    pub exploit_in_kit: Option<bool>,
    /// First exploit type, or `"None"`.
    pub exploit_types: String,
    /// First exploit URI, or `"None"`.
    pub exploit_uris: String,
    /// Derived CVE reference URL.
    pub cve_information: String,
    /// Owning device id — foreign key into `processed_machines`, not
    /// enforced.
    #[serde(rename = "vuln_MachineId")]
    pub machine_id: String,
    /// Fields outside the modeled set, republished unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RawVulnerability {
    fn normalize(self, machine_id: &str) -> Vulnerability {
        let cve_information = format!(
            "https://cve.mitre.org/cgi-bin/cvename.cgi?name={}",
            self.id
        );
        Vulnerability {
            exploit_types: collapse_exploit_field(&self.exploit_types),
            exploit_uris: collapse_exploit_field(&self.exploit_uris),
            cve_information,
            machine_id: machine_id.to_string(),
            id: self.id,
            name: self.name,
            description: self.description,
            severity: self.severity,
            cvss_v3: self.cvss_v3,
            exposed_machines: self.exposed_machines,
            published_on: self.published_on,
            updated_on: self.updated_on,
            public_exploit: self.public_exploit,
            exploit_verified: self.exploit_verified,
            exploit_in_kit: self.exploit_in_kit,
            extra: self.extra,
        }
    }
}

/// Collapses a variable-shaped exploit array to its first element's string
/// form, or `"None"` when empty. Non-string elements keep their JSON
/// rendering.
fn collapse_exploit_field(values: &[Value]) -> String {
    match values.first() {
        None => NO_EXPLOIT_DATA.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A device whose vulnerability lookup failed.
#[derive(Debug)]
pub struct DeviceFailure {
    /// The MDE device id whose lookup failed.
    pub machine_id: String,
    /// The error that terminated the lookup.
    pub error: PostureError,
}

/// Outcome of the vulnerability sweep: the flat cross-device record list
/// plus the devices that could not be queried.
#[derive(Debug, Default)]
pub struct VulnReport {
    /// Normalized records across all successfully queried devices.
    pub records: Vec<Vulnerability>,
    /// Devices whose lookup failed, in device order.
    pub failures: Vec<DeviceFailure>,
}

/// Fetches and normalizes vulnerabilities for every device.
///
/// Lookups run [`FETCH_CONCURRENCY`] at a time. Failures are isolated per
/// device: the affected device lands in `failures`, every other device's
/// records are kept. Zero devices upstream yields an empty report.
pub async fn collect_vulnerabilities(client: &MdeClient, machines: &[Machine]) -> VulnReport {
    let outcomes: Vec<_> = futures::stream::iter(
        machines.iter().map(|machine| fetch_device_vulns(client, machine)),
    )
    .buffered(FETCH_CONCURRENCY)
    .collect()
    .await;

    let mut report = VulnReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(mut records) => report.records.append(&mut records),
            Err(failure) => {
                warn!(
                    machine_id = %failure.machine_id,
                    error = %failure.error,
                    "vulnerability lookup failed for device"
                );
                report.failures.push(failure);
            }
        }
    }

    info!(
        devices = machines.len(),
        records = report.records.len(),
        failed_devices = report.failures.len(),
        "collected machine vulnerabilities"
    );
    report
}

async fn fetch_device_vulns(
    client: &MdeClient,
    machine: &Machine,
) -> std::result::Result<Vec<Vulnerability>, DeviceFailure> {
    let path = format!("api/machines/{}/vulnerabilities", machine.id);
    match client.get::<ODataList<RawVulnerability>>(&path).await {
        Ok(list) => Ok(list
            .value
            .into_iter()
            .map(|raw| raw.normalize(&machine.id))
            .collect()),
        Err(error) => Err(DeviceFailure {
            machine_id: machine.id.clone(),
            error,
        }),
    }
}
