//! Region enumeration for the compute inventory.
//!
//! The inventory must be complete across every region the account can
//! operate in, so any enumeration failure is fatal — a partial region list
//! would silently drop instances from the published dataset.

use aws_sdk_ec2::types::Region;
use tracing::info;

use crate::error::Result;

/// Opt-in status value that excludes a region from the run.
const NOT_OPTED_IN: &str = "not-opted-in";

/// Returns the region codes the account may operate in, in the order the
/// EC2 API enumerates them.
///
/// Regions marked `not-opted-in` are dropped; `opted-in`,
/// `opt-in-not-required`, and regions with no reported status are retained.
pub async fn opted_in_regions(client: &aws_sdk_ec2::Client) -> Result<Vec<String>> {
    let response = client
        .describe_regions()
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;

    let regions = retained_region_codes(response.regions());
    info!(count = regions.len(), "enumerated opted-in AWS regions");
    Ok(regions)
}

/// Pure filtering step, split out so it can be tested against
/// builder-constructed `Region` values without a live endpoint.
fn retained_region_codes(regions: &[Region]) -> Vec<String> {
    regions
        .iter()
        .filter(|r| r.opt_in_status() != Some(NOT_OPTED_IN))
        .filter_map(|r| r.region_name().map(str::to_string))
        .collect()
}
