//! HTTP plumbing shared by the provider clients
//!
//! Every request waits for the provider's pacer, then goes through
//! [`HttpClient::execute_with_retry`]. Statuses still failing after the
//! retries are mapped onto [`MetadataError`].

use crate::error::{MetadataError, Result};
use crate::pacing::RequestPacer;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Error bodies kept in [`MetadataError::Http`], in characters
const ERROR_BODY_CHARS: usize = 200;

pub(crate) struct ApiClient {
    provider: &'static str,
    http_client: Arc<dyn HttpClient>,
    pacer: RequestPacer,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    pub(crate) fn new(
        provider: &'static str,
        http_client: Arc<dyn HttpClient>,
        pacer: RequestPacer,
    ) -> Self {
        Self {
            provider,
            http_client,
            pacer,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub(crate) fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry_policy = policy;
    }

    pub(crate) fn set_pacer(&mut self, pacer: RequestPacer) {
        self.pacer = pacer;
    }

    /// Send without interpreting the status
    pub(crate) async fn send_raw(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.pacer.wait_turn().await;
        debug!(provider = self.provider, url = %request.url, "Provider request");
        Ok(self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?)
    }

    /// Send and fail on any non-success status
    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.send_raw(request).await?;
        self.check(response)
    }

    pub(crate) fn check(&self, response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }
        if response.status == 429 {
            return Err(MetadataError::RateLimited {
                provider: self.provider.to_string(),
            });
        }

        let message = response
            .text()
            .unwrap_or_default()
            .chars()
            .take(ERROR_BODY_CHARS)
            .collect();
        Err(MetadataError::Http {
            provider: self.provider.to_string(),
            status: response.status,
            message,
        })
    }

    pub(crate) async fn json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let response = self.send(request).await?;
        self.decode(&response)
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, response: &HttpResponse) -> Result<T> {
        response.json().map_err(|e| MetadataError::Parse {
            provider: self.provider.to_string(),
            message: e.to_string(),
        })
    }
}
