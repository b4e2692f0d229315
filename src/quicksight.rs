//! QuickSight reconciliation: access group and per-dataset data sources.
//!
//! Everything here is an idempotent upsert driven by typed conflict
//! detection rather than broad error matching:
//!
//! - Group: CreateGroup, and on a `ResourceExistsException` fall back to
//!   DescribeGroup. Any other creation error is fatal.
//! - Membership: every user holding an elevated role (ADMIN or AUTHOR) is
//!   added to the group. This step is best-effort — enumeration or
//!   membership failures are logged and the run continues, since
//!   membership is not required for dataset correctness.
//! - Data sources: one S3 data source per dataset, bound to its manifest
//!   key with a fixed permission grant to the group; a
//!   `ResourceExistsException` branches to UpdateDataSource with the same
//!   manifest pointer.
//!
//! Identity operations (groups, users, memberships) must run against the
//! account's identity region, us-east-1; data sources live in the
//! pipeline's home region. Hence the two clients.

use aws_sdk_quicksight::types::{
    DataSourceParameters, DataSourceType, ManifestFileLocation, ResourcePermission, S3Parameters,
    UserRole,
};
use tracing::{info, warn};

use crate::error::Result;
use crate::publish::PublishedDataset;

/// The access group holding permissions on every published data source.
pub const GROUP_NAME: &str = "MDE_Viewers";

/// QuickSight identity namespace. Group and user operations only work in
/// the default namespace.
const NAMESPACE: &str = "default";

/// Identity region for group/user operations.
pub const IDENTITY_REGION: &str = "us-east-1";

/// Page size for the user enumeration.
const LIST_USERS_MAX: i32 = 100;

/// Actions granted to the group on each data source.
const DATA_SOURCE_ACTIONS: [&str; 6] = [
    "quicksight:DescribeDataSource",
    "quicksight:DescribeDataSourcePermissions",
    "quicksight:PassDataSource",
    "quicksight:UpdateDataSource",
    "quicksight:DeleteDataSource",
    "quicksight:UpdateDataSourcePermissions",
];

/// Maps a dataset name to its QuickSight data source id/name. Unknown
/// datasets keep their own name.
fn data_source_name(dataset: &str) -> &str {
    match dataset {
        "processed_machines" => "MDE_Machines",
        "processed_machine_vulns" => "MDE_Vulnerabilities",
        "processed_ec2_instances" => "EC2_Instances",
        other => other,
    }
}

/// Only these roles count as elevated for group membership. The source
/// system this replaces added every user regardless of role due to a
/// truthy-string comparison; the intended contract is implemented here.
fn is_elevated(role: &UserRole) -> bool {
    matches!(role, UserRole::Admin | UserRole::Author)
}

/// The group principal ARN used in data source permission grants.
fn group_principal_arn(account_id: &str) -> String {
    format!("arn:aws:quicksight:{IDENTITY_REGION}:{account_id}:group/{NAMESPACE}/{GROUP_NAME}")
}

/// Idempotently reconciles the QuickSight side of the pipeline.
pub struct DataSourceReconciler {
    /// Data source operations, pipeline home region.
    quicksight: aws_sdk_quicksight::Client,
    /// Group/user operations, pinned to [`IDENTITY_REGION`].
    identity: aws_sdk_quicksight::Client,
    account_id: String,
    bucket: String,
}

impl DataSourceReconciler {
    /// Creates a reconciler for the given account and reporting bucket.
    pub fn new(
        quicksight: aws_sdk_quicksight::Client,
        identity: aws_sdk_quicksight::Client,
        account_id: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        DataSourceReconciler {
            quicksight,
            identity,
            account_id: account_id.into(),
            bucket: bucket.into(),
        }
    }

    /// Runs the full reconciliation: group, membership, data sources.
    pub async fn reconcile(&self, datasets: &[PublishedDataset]) -> Result<()> {
        self.ensure_group().await?;

        // Best-effort: membership problems must not fail the run.
        if let Err(err) = self.add_elevated_members().await {
            warn!(error = %err, "could not reconcile group membership, continuing");
        }

        for dataset in datasets {
            self.upsert_data_source(dataset).await?;
        }
        Ok(())
    }

    /// Get-or-create for the access group.
    async fn ensure_group(&self) -> Result<()> {
        let create = self
            .identity
            .create_group()
            .group_name(GROUP_NAME)
            .description("All current Admins and Authors within QuickSight")
            .aws_account_id(&self.account_id)
            .namespace(NAMESPACE)
            .send()
            .await;

        match create {
            Ok(_) => {
                info!(group = GROUP_NAME, "access group created");
                Ok(())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_resource_exists_exception() {
                    self.identity
                        .describe_group()
                        .group_name(GROUP_NAME)
                        .aws_account_id(&self.account_id)
                        .namespace(NAMESPACE)
                        .send()
                        .await
                        .map_err(aws_sdk_quicksight::Error::from)?;
                    info!(group = GROUP_NAME, "access group already exists");
                    Ok(())
                } else {
                    Err(aws_sdk_quicksight::Error::from(service_err).into())
                }
            }
        }
    }

    /// Adds every ADMIN/AUTHOR user to the group. A failed membership call
    /// for one user is logged and does not stop the sweep.
    async fn add_elevated_members(&self) -> Result<()> {
        let users = self
            .identity
            .list_users()
            .aws_account_id(&self.account_id)
            .namespace(NAMESPACE)
            .max_results(LIST_USERS_MAX)
            .send()
            .await
            .map_err(aws_sdk_quicksight::Error::from)?;

        for user in users.user_list() {
            let Some(user_name) = user.user_name() else {
                continue;
            };
            if !user.role().is_some_and(is_elevated) {
                continue;
            }
            let added = self
                .identity
                .create_group_membership()
                .member_name(user_name)
                .group_name(GROUP_NAME)
                .aws_account_id(&self.account_id)
                .namespace(NAMESPACE)
                .send()
                .await;
            match added {
                Ok(_) => info!(user = %user_name, group = GROUP_NAME, "user added to group"),
                Err(err) => warn!(
                    user = %user_name,
                    error = %aws_sdk_quicksight::Error::from(err),
                    "could not add user to group"
                ),
            }
        }
        Ok(())
    }

    /// Create-or-update for one dataset's data source.
    async fn upsert_data_source(&self, dataset: &PublishedDataset) -> Result<()> {
        let name = data_source_name(&dataset.name);
        let parameters = self.manifest_parameters(&dataset.manifest_key)?;

        let permissions = ResourcePermission::builder()
            .principal(group_principal_arn(&self.account_id))
            .set_actions(Some(
                DATA_SOURCE_ACTIONS.iter().map(|a| a.to_string()).collect(),
            ))
            .build()?;

        let create = self
            .quicksight
            .create_data_source()
            .aws_account_id(&self.account_id)
            .data_source_id(name)
            .name(name)
            .r#type(DataSourceType::S3)
            .permissions(permissions)
            .data_source_parameters(parameters.clone())
            .send()
            .await;

        match create {
            Ok(_) => {
                info!(data_source = name, "data source created");
                Ok(())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_resource_exists_exception() {
                    self.quicksight
                        .update_data_source()
                        .aws_account_id(&self.account_id)
                        .data_source_id(name)
                        .name(name)
                        .data_source_parameters(parameters)
                        .send()
                        .await
                        .map_err(aws_sdk_quicksight::Error::from)?;
                    info!(data_source = name, "data source updated");
                    Ok(())
                } else {
                    Err(aws_sdk_quicksight::Error::from(service_err).into())
                }
            }
        }
    }

    /// Builds the S3 manifest-location parameters for a data source.
    fn manifest_parameters(&self, manifest_key: &str) -> Result<DataSourceParameters> {
        let location = ManifestFileLocation::builder()
            .bucket(&self.bucket)
            .key(manifest_key)
            .build()?;
        Ok(DataSourceParameters::S3Parameters(
            S3Parameters::builder()
                .manifest_file_location(location)
                .build()?,
        ))
    }
}
