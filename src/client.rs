//! Authenticated HTTP client for the Microsoft Defender for Endpoint API.
//!
//! `MdeClient` wraps a `reqwest::Client` and a `TokenProvider`. The pipeline
//! only reads from MDE, so the surface is a single JSON `get`.
//!
//! Token lifecycle:
//! - Lazy acquisition: the first request performs the client-credentials
//!   exchange and keeps the resulting token for the remainder of the run.
//! - One-shot 401 retry: if the API returns `401 Unauthorized` (token
//!   revoked or expired server-side mid-run), the client discards the held
//!   token, acquires a fresh one, and retries the request exactly once.
//!   A second 401 is a hard failure — no retry loop.
//! - Any other non-success status is never retried; the response body is
//!   preserved in the error.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::auth::TokenProvider;
use crate::error::{PostureError, Result};

/// Base URL of the Defender for Endpoint REST API.
const BASE_URL: &str = "https://api.securitycenter.microsoft.com/";

/// Connect timeout covering TCP + TLS handshake only.
const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall request timeout. The largest responses here are full device
/// catalogs (single-page, no pagination on `/api/machines`), so one minute
/// is ample.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Collection wrapper returned by MDE list endpoints: `{ "value": [...] }`
/// with an optional `@odata.context` field we ignore.
#[derive(Debug, serde::Deserialize)]
pub struct ODataList<T> {
    /// The array of result items.
    pub value: Vec<T>,
}

/// Authenticated HTTP client for the MDE REST API.
///
/// `token` is behind a `Mutex` because a 401 retry replaces it while API
/// methods only hold `&self`. The lock is held across the token exchange,
/// so concurrent refresh attempts coalesce into a single exchange, but it
/// is never held across an API request. `base_url` is a `String` so tests
/// can point the client at a wiremock server.
pub struct MdeClient {
    client: Client,
    base_url: String,
    auth: TokenProvider,
    token: Mutex<Option<String>>,
}

impl MdeClient {
    /// Creates a client against the production MDE API.
    pub fn new(auth: TokenProvider) -> Self {
        Self::with_base_url(auth, BASE_URL)
    }

    /// Creates a client against a custom base URL (tests).
    pub fn with_base_url(auth: TokenProvider, base_url: &str) -> Self {
        MdeClient {
            client: Client::builder()
                .connect_timeout(API_CONNECT_TIMEOUT)
                .timeout(API_REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client for MDE API"),
            base_url: base_url.to_string(),
            auth,
            token: Mutex::new(None),
        }
    }

    /// Creates a client with a pre-set bearer token, bypassing Azure AD.
    /// Used by tests to avoid a token exchange before the first request.
    pub fn with_static_token(token: &str, base_url: &str) -> Self {
        let mut client = Self::with_base_url(
            TokenProvider::with_token_url("http://invalid.localhost/token", "", ""),
            base_url,
        );
        client.token = Mutex::new(Some(token.to_string()));
        client
    }

    /// Returns the held bearer token, performing the initial exchange if no
    /// token has been acquired yet.
    async fn bearer_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_none() {
            *token = Some(self.auth.acquire().await?);
        }
        token.clone().ok_or_else(|| PostureError::Auth {
            message: "token missing after acquisition".to_string(),
            source: None,
        })
    }

    /// Discards the held token and acquires a fresh one. Called on 401,
    /// when the server rejected a token we still considered valid.
    async fn force_refresh(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let fresh = self.auth.acquire().await?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// Sends an authenticated GET request and deserializes the JSON
    /// response, applying the one-shot 401 retry described at module level.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let token = self.bearer_token().await?;
        let resp = self.client.get(&url).bearer_auth(&token).send().await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            let fresh = self.force_refresh().await?;
            self.client.get(&url).bearer_auth(&fresh).send().await?
        } else {
            resp
        };

        let status = resp.status();
        // Read the body before the status check so MDE's diagnostic error
        // payload survives into the error.
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(PostureError::Api { status, body });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
