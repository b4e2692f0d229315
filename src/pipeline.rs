//! End-to-end orchestration of the posture pipeline.
//!
//! Every AWS client handle is constructed once in [`AwsHandles::connect`]
//! and passed down explicitly; nothing here is a process-wide singleton.
//! The run is strictly ordered: regions → EC2 inventory, credentials →
//! token → devices → vulnerabilities, then publish all three datasets and
//! reconcile QuickSight last. A fatal error at any stage propagates
//! unmodified; operators re-run the whole pipeline, which is safe because
//! every write is an idempotent overwrite at a fixed key.

use aws_config::{BehaviorVersion, Region};
use std::path::PathBuf;
use tracing::info;

use crate::auth::TokenProvider;
use crate::client::MdeClient;
use crate::error::{PostureError, Result};
use crate::publish::ArtifactPublisher;
use crate::quicksight::{DataSourceReconciler, IDENTITY_REGION};
use crate::secrets::CredentialParams;
use crate::{ec2, machines, regions, secrets, vulns};

/// Dataset name for the device inventory.
pub const DATASET_MACHINES: &str = "processed_machines";
/// Dataset name for the flattened vulnerability list.
pub const DATASET_VULNS: &str = "processed_machine_vulns";
/// Dataset name for the compute inventory.
pub const DATASET_EC2: &str = "processed_ec2_instances";

/// Run configuration resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// SSM parameter names for the MDE application credentials.
    pub credential_params: CredentialParams,
    /// Destination bucket for published artifacts.
    pub bucket: String,
    /// Local directory where datasets are staged before upload.
    pub scratch_dir: PathBuf,
}

/// All AWS client handles used by a single run.
///
/// Constructed at pipeline start, dropped at pipeline end. The per-region
/// EC2 clients used by the inventory collector are the one exception —
/// they are created inside the region loop because their region is only
/// known after enumeration.
pub struct AwsHandles {
    /// Home-region EC2 client (region enumeration).
    pub ec2: aws_sdk_ec2::Client,
    /// Secrets retrieval.
    pub ssm: aws_sdk_ssm::Client,
    /// Artifact uploads and existence polls.
    pub s3: aws_sdk_s3::Client,
    /// Account-id resolution.
    pub sts: aws_sdk_sts::Client,
    /// Data source operations, home region.
    pub quicksight: aws_sdk_quicksight::Client,
    /// Group/user operations, pinned to us-east-1.
    pub quicksight_identity: aws_sdk_quicksight::Client,
    /// The resolved home region, used in manifest URLs.
    pub region: String,
}

impl AwsHandles {
    /// Loads the default AWS configuration once and derives every handle
    /// from it, plus the us-east-1 identity client. `region_override`, when
    /// set, takes precedence over the ambient region chain.
    pub async fn connect(region_override: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region_override {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;
        let region = config
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| IDENTITY_REGION.to_string());

        let identity_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(IDENTITY_REGION))
            .load()
            .await;

        AwsHandles {
            ec2: aws_sdk_ec2::Client::new(&config),
            ssm: aws_sdk_ssm::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
            quicksight: aws_sdk_quicksight::Client::new(&config),
            quicksight_identity: aws_sdk_quicksight::Client::new(&identity_config),
            region,
        }
    }
}

/// Counters reported at the end of a successful run.
#[derive(Debug)]
pub struct RunSummary {
    /// Regions enumerated.
    pub regions: usize,
    /// Compute instances collected.
    pub instances: usize,
    /// Devices retained after the inactive filter.
    pub machines: usize,
    /// Vulnerability records collected.
    pub vulnerabilities: usize,
    /// Devices whose vulnerability lookup failed (published without them).
    pub failed_devices: usize,
}

/// Executes one full pipeline run.
pub async fn run(handles: &AwsHandles, config: &PipelineConfig) -> Result<RunSummary> {
    let account_id = account_id(&handles.sts).await?;
    info!(account_id = %account_id, region = %handles.region, "pipeline starting");

    // Compute inventory across every opted-in region.
    let region_codes = regions::opted_in_regions(&handles.ec2).await?;
    let instances = ec2::collect_instances(&region_codes).await?;

    // Endpoint-security inventory: credentials, token, devices, vulns.
    let creds = secrets::fetch_credentials(&handles.ssm, &config.credential_params).await?;
    let provider = TokenProvider::new(&creds.tenant_id, &creds.client_id, &creds.client_secret);
    let mde = MdeClient::new(provider);
    let machine_list = machines::collect_machines(&mde).await?;
    let vuln_report = vulns::collect_vulnerabilities(&mde, &machine_list).await;

    // Publish all three datasets before touching QuickSight, so the
    // reconciler only ever binds confirmed manifests.
    let publisher = ArtifactPublisher::new(
        handles.s3.clone(),
        &config.bucket,
        &handles.region,
        &config.scratch_dir,
    );
    let published = vec![
        publisher.publish(DATASET_MACHINES, &machine_list).await?,
        publisher.publish(DATASET_VULNS, &vuln_report.records).await?,
        publisher.publish(DATASET_EC2, &instances).await?,
    ];

    let reconciler = DataSourceReconciler::new(
        handles.quicksight.clone(),
        handles.quicksight_identity.clone(),
        &account_id,
        &config.bucket,
    );
    reconciler.reconcile(&published).await?;

    Ok(RunSummary {
        regions: region_codes.len(),
        instances: instances.len(),
        machines: machine_list.len(),
        vulnerabilities: vuln_report.records.len(),
        failed_devices: vuln_report.failures.len(),
    })
}

/// Resolves the AWS account id for QuickSight calls and the group ARN.
async fn account_id(sts: &aws_sdk_sts::Client) -> Result<String> {
    let identity = sts
        .get_caller_identity()
        .send()
        .await
        .map_err(aws_sdk_sts::Error::from)?;
    identity
        .account()
        .map(str::to_string)
        .ok_or(PostureError::MissingAccountId)
}
