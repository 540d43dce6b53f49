//! Trakt OAuth device-flow endpoints
//!
//! Thin client over `/oauth/device/code`, `/oauth/device/token` and
//! `/oauth/token`. It performs no persistence and holds no state; the
//! [`TokenManager`](crate::TokenManager) decides when to call it.

use crate::error::{AuthError, Result};
use crate::types::{DeviceCode, TokenGrant};
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const TRAKT_API_BASE: &str = "https://api.trakt.tv";
const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Trakt application credentials
#[derive(Clone)]
pub struct TraktOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
}

impl TraktOAuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: TRAKT_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Result of one `/oauth/device/token` poll
#[derive(Debug)]
pub enum PollOutcome {
    Authorized(TokenGrant),
    /// 400: user has not acted yet
    Pending,
    /// 429: polling too fast
    SlowDown,
    /// 404 / 409 / 410: code is unknown, already used or expired
    Expired,
    /// 418: user rejected the code
    Denied,
}

pub struct TraktOAuthClient {
    config: TraktOAuthConfig,
    http_client: Arc<dyn HttpClient>,
}

impl TraktOAuthClient {
    pub fn new(config: TraktOAuthConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Request a new device code for the user to approve
    #[instrument(skip(self))]
    pub async fn request_device_code(&self) -> Result<DeviceCode> {
        let request = HttpRequest::post(self.url("/oauth/device/code"))
            .json(&json!({ "client_id": self.config.client_id }))?;

        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::default())
            .await?;

        if !response.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AuthError::DeviceCodeRequestFailed(format!(
                "status {}: {}",
                response.status, body
            )));
        }

        let code: DeviceCode = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        debug!(user_code = %code.user_code, expires_in = code.expires_in, "Device code issued");
        Ok(code)
    }

    /// Poll once for the outcome of a device code
    ///
    /// Exactly one HTTP attempt; the caller owns the polling cadence.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<PollOutcome> {
        let request = HttpRequest::post(self.url("/oauth/device/token")).json(&json!({
            "code": device_code,
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret,
        }))?;

        let response = self.http_client.execute(request).await?;

        match response.status {
            200 => {
                let grant: TokenGrant = response
                    .json()
                    .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
                Ok(PollOutcome::Authorized(grant))
            }
            400 => Ok(PollOutcome::Pending),
            429 => Ok(PollOutcome::SlowDown),
            404 | 409 | 410 => Ok(PollOutcome::Expired),
            418 => Ok(PollOutcome::Denied),
            status => Err(AuthError::InvalidResponse(format!(
                "unexpected device token status {}",
                status
            ))),
        }
    }

    /// Exchange a refresh token for a new token grant
    ///
    /// Server errors are retried with backoff; any 4xx fails immediately
    /// since a rejected refresh token will not become valid by retrying.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let request = HttpRequest::post(self.url("/oauth/token")).json(&json!({
            "refresh_token": refresh_token,
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret,
            "redirect_uri": OOB_REDIRECT_URI,
            "grant_type": "refresh_token",
        }))?;

        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::default())
            .await
            .map_err(|e| AuthError::TokenRefreshFailed(e.to_string()))?;

        if !response.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            warn!(status = response.status, "Token refresh rejected");
            return Err(AuthError::TokenRefreshFailed(format!(
                "Token endpoint returned {}: {}",
                response.status, body
            )));
        }

        response
            .json()
            .map_err(|e| AuthError::InvalidResponse(format!("token response: {}", e)))
    }
}
