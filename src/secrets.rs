//! Retrieval of the MDE application credentials from SSM Parameter Store.
//!
//! The pipeline configuration names three SecureString parameters; their
//! decrypted values form the OAuth2 client-credentials triple. Retrieval
//! failures are fatal — nothing downstream of the MDE collectors can run
//! without a token.

use crate::error::{PostureError, Result};

/// The three parameter names identifying where the Azure AD application
/// credentials are stored.
#[derive(Debug, Clone)]
pub struct CredentialParams {
    /// SSM parameter holding the Azure AD tenant id.
    pub tenant_id_param: String,
    /// SSM parameter holding the application (client) id.
    pub client_id_param: String,
    /// SSM parameter holding the client secret.
    pub secret_param: String,
}

/// Decrypted Azure AD application credentials.
pub struct MdeCredentials {
    /// Azure AD tenant id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

/// Fetches and decrypts the three credential parameters.
pub async fn fetch_credentials(
    ssm: &aws_sdk_ssm::Client,
    params: &CredentialParams,
) -> Result<MdeCredentials> {
    Ok(MdeCredentials {
        tenant_id: get_parameter(ssm, &params.tenant_id_param).await?,
        client_id: get_parameter(ssm, &params.client_id_param).await?,
        client_secret: get_parameter(ssm, &params.secret_param).await?,
    })
}

/// Fetches a single parameter with decryption.
///
/// A parameter that resolves but carries no value is reported as
/// `MissingSecret` rather than surfacing later as a malformed token request.
async fn get_parameter(ssm: &aws_sdk_ssm::Client, name: &str) -> Result<String> {
    let response = ssm
        .get_parameter()
        .name(name)
        .with_decryption(true)
        .send()
        .await
        .map_err(aws_sdk_ssm::Error::from)?;

    response
        .parameter()
        .and_then(|p| p.value())
        .map(str::to_string)
        .ok_or_else(|| PostureError::MissingSecret {
            name: name.to_string(),
        })
}
