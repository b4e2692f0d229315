//! OAuth2 client-credentials authentication for the Microsoft identity platform.
//!
//! `TokenProvider` exchanges the tenant/client/secret triple for a bearer
//! token at Azure AD's `/oauth2/v2.0/token` endpoint. The provider does not
//! cache: every `acquire()` call performs a fresh exchange, and a single
//! failed exchange is fatal to the run (tokens are assumed short-lived
//! relative to run length). Callers that want to reuse a token across
//! requests hold it themselves — see `client::MdeClient`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PostureError, Result};

/// Azure AD v2.0 token endpoint. `{tenant_id}` is replaced at runtime.
const TOKEN_URL: &str = "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token";

/// Scope granting access to the Defender for Endpoint API.
pub const MDE_SCOPE: &str = "https://api.securitycenter.microsoft.com/.default";

/// Token requests are small; 30 seconds covers a slow handshake without
/// letting a wedged endpoint stall the run indefinitely.
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Form body sent to the token endpoint.
/// Serialized as `application/x-www-form-urlencoded` by reqwest's `.form()`.
#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

/// Subset of the Azure AD token response that the pipeline needs. Extra
/// fields (`ext_expires_in` etc.) are ignored by serde.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Performs OAuth2 client-credentials exchanges against Azure AD.
pub struct TokenProvider {
    client: reqwest::Client,
    token_url: String,
    scope: String,
    client_id: String,
    client_secret: String,
}

impl TokenProvider {
    /// Creates a provider for the given tenant and application credentials,
    /// scoped to the MDE API.
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        TokenProvider {
            client: reqwest::Client::builder()
                .timeout(TOKEN_TIMEOUT)
                .build()
                .expect("failed to build HTTP client for token endpoint"),
            token_url: TOKEN_URL.replace("{tenant_id}", tenant_id),
            scope: MDE_SCOPE.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// Constructor that points at a custom token endpoint, used by tests to
    /// target a local mock server instead of Azure AD.
    pub fn with_token_url(token_url: &str, client_id: &str, client_secret: &str) -> Self {
        TokenProvider {
            client: reqwest::Client::new(),
            token_url: token_url.to_string(),
            scope: MDE_SCOPE.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// Performs a fresh client-credentials exchange and returns the bearer
    /// token.
    ///
    /// The response body is read as text before the status check so that on
    /// failure the raw AADSTS diagnostic message is preserved in the error —
    /// `error_for_status()` would discard it.
    ///
    /// # Errors
    ///
    /// `PostureError::Auth` for a non-2xx response or an unparseable token
    /// body; `PostureError::Network` for transport failures.
    pub async fn acquire(&self) -> Result<String> {
        let body = TokenRequest {
            client_id: &self.client_id,
            scope: &self.scope,
            client_secret: &self.client_secret,
            grant_type: "client_credentials",
        };

        let response = self.client.post(&self.token_url).form(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(PostureError::Auth {
                message: format!("token request failed ({status}): {text}"),
                source: None,
            });
        }

        let resp: TokenResponse =
            serde_json::from_str(&text).map_err(|e| PostureError::Auth {
                message: "failed to parse token response".to_string(),
                source: Some(Box::new(e)),
            })?;

        Ok(resp.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_url_interpolation() {
        let tp = TokenProvider::new("abc-123", "client", "secret");
        assert_eq!(
            tp.token_url,
            "https://login.microsoftonline.com/abc-123/oauth2/v2.0/token"
        );
    }

    #[test]
    fn token_request_serializes_as_form() {
        let req = TokenRequest {
            client_id: "cid",
            scope: MDE_SCOPE,
            client_secret: "secret~value",
            grant_type: "client_credentials",
        };
        let encoded = serde_urlencoded::to_string(&req).unwrap();
        assert!(encoded.contains("client_id=cid"));
        assert!(encoded.contains("grant_type=client_credentials"));
        // Scope URL should be percent-encoded in form data.
        assert!(encoded.contains("scope=https"));
    }

    #[test]
    fn token_response_deserializes_from_azure_format() {
        let json = r#"{
            "token_type": "Bearer",
            "expires_in": 3599,
            "ext_expires_in": 3599,
            "access_token": "eyJ0eXAi.test.token"
        }"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token, "eyJ0eXAi.test.token");
    }

    #[tokio::test]
    async fn acquire_surfaces_aadsts_body_on_failure() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(401)
                    .set_body_string("AADSTS7000215: Invalid client secret provided."),
            )
            .mount(&server)
            .await;

        let tp = TokenProvider::with_token_url(&server.uri(), "cid", "bad-secret");
        let err = tp.acquire().await.unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("AADSTS7000215"),
            "error should preserve the AADSTS body, got: {msg}"
        );
    }

    #[tokio::test]
    async fn acquire_returns_token_on_success() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({
                    "token_type": "Bearer",
                    "expires_in": 3599,
                    "access_token": "tok-abc"
                }),
            ))
            .mount(&server)
            .await;

        let tp = TokenProvider::with_token_url(&server.uri(), "cid", "secret");
        let token = tp.acquire().await.unwrap();
        assert_eq!(token, "tok-abc");
    }
}
