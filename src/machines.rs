//! Device inventory collection and EC2 correlation for the MDE API.
//!
//! [`collect_machines`] retrieves the full device catalog in one call
//! (`/api/machines` is not paginated), drops devices whose health status is
//! `Inactive`, and correlates each remaining device to an EC2 instance by
//! scanning its free-text tags for an instance-id-shaped token.
//!
//! Correlation is best-effort and ambiguous by design: the first tag
//! matching the pattern wins, and a device with no matching tag (or no tags
//! at all) is marked with the `NON_AWS` sentinel. The pattern is a lexical
//! shape, not a lookup — devices tagged with the instance id at onboarding
//! time correlate, everything else does not.
//!
//! The per-NIC `ipAddresses` collection the API returns is never modeled,
//! which both trims the published dataset and keeps addresses out of it.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::info;

use crate::client::{MdeClient, ODataList};
use crate::error::Result;

/// Sentinel `instanceId` for devices with no instance-id-shaped tag.
pub const NON_AWS: &str = "NON_AWS";

/// Lexical shape of an EC2 instance id inside a free-text tag:
/// letters, hyphen, alphanumerics, case-insensitive, on a word boundary.
static EC2_ID_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b[a-z]+-[a-z0-9]+").expect("EC2 id pattern must compile")
});

/// A device as returned by `/api/machines`, plus the derived `instanceId`.
///
/// Field names are camelCase to match the MDE API contract and the
/// published dataset layout. Optional fields are those the API may omit
/// depending on device state or tenant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Unique MDE identifier for this device.
    pub id: String,

    /// Fully qualified DNS name of the device.
    #[serde(default)]
    pub computer_dns_name: Option<String>,

    /// ISO 8601 timestamp of when MDE first observed this device.
    #[serde(default)]
    pub first_seen: Option<String>,

    /// ISO 8601 timestamp of the last full device report received.
    #[serde(default)]
    pub last_seen: Option<String>,

    /// Operating system platform (e.g. `"Windows11"`, `"Linux"`).
    #[serde(default)]
    pub os_platform: Option<String>,

    /// Operating system version string.
    #[serde(default)]
    pub version: Option<String>,

    /// Operating system build number.
    #[serde(default)]
    pub os_build: Option<i64>,

    /// Operating system architecture: `"32-bit"` or `"64-bit"`.
    #[serde(default)]
    pub os_architecture: Option<String>,

    /// Last known local IP address on the device's NIC.
    #[serde(default)]
    pub last_ip_address: Option<String>,

    /// Last known external (internet-facing) IP address.
    #[serde(default)]
    pub last_external_ip_address: Option<String>,

    /// Device health status: `Active`, `Inactive`, `ImpairedCommunication`,
    /// `NoSensorData`, or `Unknown`. Devices reporting `Inactive` are
    /// dropped at ingestion.
    #[serde(default)]
    pub health_status: Option<String>,

    /// Onboarding status: `onboarded`, `CanBeOnboarded`, `Unsupported`,
    /// or `InsufficientInfo`.
    #[serde(default)]
    pub onboarding_status: Option<String>,

    /// Risk score as evaluated by MDE.
    #[serde(default)]
    pub risk_score: Option<String>,

    /// Exposure level: `None`, `Low`, `Medium`, or `High`.
    #[serde(default)]
    pub exposure_level: Option<String>,

    /// Device value classification: `Normal`, `Low`, or `High`.
    #[serde(default)]
    pub device_value: Option<String>,

    /// Microsoft Entra device ID, present when the device is Entra-joined.
    #[serde(default)]
    pub aad_device_id: Option<String>,

    /// RBAC device group name.
    #[serde(default)]
    pub rbac_group_name: Option<String>,

    /// RBAC device group numeric ID.
    #[serde(default)]
    pub rbac_group_id: Option<i64>,

    /// Free-text tags assigned to this device. Correlation scans these in
    /// the order the API returns them.
    #[serde(default)]
    pub machine_tags: Vec<String>,

    /// Derived: the first tag matching the EC2-id shape, or [`NON_AWS`].
    /// Never read from the API response.
    #[serde(default, skip_deserializing)]
    pub instance_id: String,
}

impl Machine {
    /// Scans `machineTags` in order and returns the first tag containing an
    /// instance-id-shaped token, or [`NON_AWS`].
    ///
    /// The whole tag is used as the correlation value, not just the matched
    /// substring — instances are expected to be tagged with the bare id.
    fn correlate(&self) -> String {
        self.machine_tags
            .iter()
            .find(|tag| EC2_ID_PATTERN.is_match(tag))
            .cloned()
            .unwrap_or_else(|| NON_AWS.to_string())
    }
}

/// Retrieves the device catalog, drops `Inactive` devices, and attaches the
/// derived `instanceId` to each survivor. Response order is preserved.
///
/// # Errors
///
/// Any HTTP or deserialization failure is fatal — there is no per-device
/// isolation here, since a partial catalog would publish a silently
/// incomplete dataset.
pub async fn collect_machines(client: &MdeClient) -> Result<Vec<Machine>> {
    let response: ODataList<Machine> = client.get("api/machines").await?;
    let total = response.value.len();

    let machines: Vec<Machine> = response
        .value
        .into_iter()
        .filter(|m| m.health_status.as_deref() != Some("Inactive"))
        .map(|mut m| {
            m.instance_id = m.correlate();
            m
        })
        .collect();

    info!(
        total,
        retained = machines.len(),
        "collected MDE device inventory"
    );
    Ok(machines)
}
