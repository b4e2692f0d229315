//! CLI entry point for mde-posture.
//!
//! Resolves configuration from flags or the environment, initializes
//! logging, constructs the AWS client handles once, and executes a single
//! pipeline run.
//!
//! Exit codes:
//! - 0: success (possibly with per-device vulnerability failures, which
//!   are reported but do not fail the run)
//! - 1: runtime error (auth, API, consistency poll, ...)
//! - 2: argument validation error (clap handles this automatically)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use mde_posture::pipeline::{self, AwsHandles, PipelineConfig};
use mde_posture::secrets::CredentialParams;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// SSM parameter holding the Azure AD tenant id.
    #[arg(long, env = "AZURE_APP_TENANT_ID_PARAM")]
    tenant_id_param: String,

    /// SSM parameter holding the Azure AD application (client) id.
    #[arg(long, env = "AZURE_APP_CLIENT_ID_PARAM")]
    client_id_param: String,

    /// SSM parameter holding the Azure AD client secret.
    #[arg(long, env = "AZURE_APP_SECRET_ID_PARAM")]
    secret_param: String,

    /// Destination S3 bucket for published datasets and manifests.
    #[arg(long, env = "QUICKSIGHT_S3_BUCKET_NAME")]
    bucket: String,

    /// Directory where datasets are staged before upload.
    #[arg(long, default_value = "/tmp")]
    scratch_dir: PathBuf,

    /// Home AWS region override. Defaults to the ambient SDK region chain.
    #[arg(long)]
    region: Option<String>,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing();

    let config = PipelineConfig {
        credential_params: CredentialParams {
            tenant_id_param: args.tenant_id_param,
            client_id_param: args.client_id_param,
            secret_param: args.secret_param,
        },
        bucket: args.bucket,
        scratch_dir: args.scratch_dir,
    };

    let handles = AwsHandles::connect(args.region.as_deref()).await;

    match pipeline::run(&handles, &config).await {
        Ok(summary) => {
            info!(
                regions = summary.regions,
                instances = summary.instances,
                machines = summary.machines,
                vulnerabilities = summary.vulnerabilities,
                "pipeline run complete"
            );
            if summary.failed_devices > 0 {
                warn!(
                    failed_devices = summary.failed_devices,
                    "some devices were published without vulnerability data"
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "pipeline run failed");
            ExitCode::FAILURE
        }
    }
}
