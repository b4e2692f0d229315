//! Typed error hierarchy for the mde-posture pipeline.
//!
//! `PostureError` is the single error type threaded through every stage.
//! Variants map to real system boundaries rather than implementation
//! details: `Auth` covers the Azure AD token endpoint, `Api` covers the MDE
//! REST API, the per-service AWS variants cover the SDK calls, and
//! `ConsistencyTimeout` covers the post-upload existence poll.
//!
//! The pipeline has no partial-success model at the stage level — any
//! variant reaching `main` terminates the run. The one exception is the
//! per-device vulnerability fetch, where errors are collected into a report
//! (see `vulns::VulnReport`) instead of propagating.

use reqwest::StatusCode;

/// Unified error type for all pipeline operations.
///
/// The `#[source]` / `#[from]` attributes enable `Error::source()` chaining
/// so logs can traverse the full cause chain. AWS service errors are boxed —
/// the unified SDK error enums are large and would otherwise dominate the
/// size of every `Result` in the crate.
#[derive(Debug, thiserror::Error)]
pub enum PostureError {
    /// Authentication failure at the Azure AD token endpoint.
    ///
    /// Covers non-2xx responses (the `message` preserves Azure AD's AADSTS
    /// error body), transport failures reaching the endpoint, and a missing
    /// token after an otherwise successful exchange.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description including HTTP status and AADSTS body when available.
        message: String,
        /// The underlying transport or parse error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The MDE API returned a non-success HTTP status code.
    ///
    /// The full response body is preserved — MDE error responses carry
    /// diagnostic codes that `error_for_status()` would discard.
    #[error("MDE API error {status}: {body}")]
    Api {
        /// The HTTP status code returned by the MDE API.
        status: StatusCode,
        /// The raw response body text, possibly empty.
        body: String,
    },

    /// A network-level failure (DNS, TCP, TLS, request timeout) with no
    /// HTTP status code available.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON deserialization or serialization failed.
    #[error("failed to parse or serialize JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// An EC2 API call failed (DescribeRegions, DescribeInstances).
    #[error("EC2 API error: {0}")]
    Ec2(Box<aws_sdk_ec2::Error>),

    /// An S3 API call failed (PutObject, or a non-404 HeadObject error
    /// during the consistency poll).
    #[error("S3 API error: {0}")]
    S3(Box<aws_sdk_s3::Error>),

    /// An SSM GetParameter call failed.
    #[error("SSM API error: {0}")]
    Ssm(Box<aws_sdk_ssm::Error>),

    /// The STS caller-identity lookup failed.
    #[error("STS API error: {0}")]
    Sts(Box<aws_sdk_sts::Error>),

    /// A QuickSight API call failed with something other than the expected
    /// `ResourceExistsException` on the create paths.
    #[error("QuickSight API error: {0}")]
    QuickSight(Box<aws_sdk_quicksight::Error>),

    /// An AWS request type could not be built (missing required field in a
    /// builder, e.g. QuickSight permission or manifest-location shapes).
    #[error("failed to build AWS request: {0}")]
    Build(#[from] aws_smithy_types::error::operation::BuildError),

    /// An EC2 instance record lacked a field the inventory treats as a
    /// trusted invariant of the DescribeInstances response.
    ///
    /// This is the single normalization boundary for compute records:
    /// rather than scattered per-key fallbacks, `Ec2Instance::from_sdk`
    /// validates once at ingestion and fails the run here.
    #[error("instance {instance_id} missing required field {field}")]
    MissingField {
        /// The instance being normalized, or `"<unknown>"` when the
        /// identifier itself is absent.
        instance_id: String,
        /// The DescribeInstances field that was absent.
        field: &'static str,
    },

    /// The STS caller-identity response carried no account id. Group ARNs
    /// and every QuickSight call need it, so the run cannot proceed.
    #[error("STS caller identity returned no account id")]
    MissingAccountId,

    /// An SSM parameter existed but carried no value.
    #[error("SSM parameter {name} has no value")]
    MissingSecret {
        /// The parameter name that was requested.
        name: String,
    },

    /// The post-upload existence poll exhausted its attempt budget without
    /// observing the object. Downstream steps assume read-visibility, so
    /// this is fatal for the run.
    #[error("object s3://{bucket}/{key} not visible after {attempts} attempts")]
    ConsistencyTimeout {
        /// Destination bucket.
        bucket: String,
        /// Object key that never became visible.
        key: String,
        /// Number of HEAD attempts made.
        attempts: u32,
    },

    /// Local scratch-file I/O failed while staging a dataset for upload.
    #[error("scratch file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PostureError>;

impl From<aws_sdk_ec2::Error> for PostureError {
    fn from(err: aws_sdk_ec2::Error) -> Self {
        PostureError::Ec2(Box::new(err))
    }
}

impl From<aws_sdk_s3::Error> for PostureError {
    fn from(err: aws_sdk_s3::Error) -> Self {
        PostureError::S3(Box::new(err))
    }
}

impl From<aws_sdk_ssm::Error> for PostureError {
    fn from(err: aws_sdk_ssm::Error) -> Self {
        PostureError::Ssm(Box::new(err))
    }
}

impl From<aws_sdk_sts::Error> for PostureError {
    fn from(err: aws_sdk_sts::Error) -> Self {
        PostureError::Sts(Box::new(err))
    }
}

impl From<aws_sdk_quicksight::Error> for PostureError {
    fn from(err: aws_sdk_quicksight::Error) -> Self {
        PostureError::QuickSight(Box::new(err))
    }
}
