//! # Token Manager
//!
//! Owns the Trakt credential lifecycle:
//!
//! - hands out a valid access token, refreshing it first when it expires
//!   within the skew window;
//! - serializes refreshes so concurrent callers never race (the second
//!   caller waits and then reads the already refreshed record);
//! - marks the credential `expired` when a refresh fails, after which every
//!   caller fails fast with [`AuthError::AuthExpired`];
//! - runs the device-flow authorization as a cancellable background task.
//!
//! ## Usage
//!
//! ```ignore
//! let manager = Arc::new(TokenManager::new(oauth_client, credential_store, clock));
//!
//! // Provider side: None means "no credential, call anonymously"
//! let token = manager.access_token().await?;
//!
//! // User side
//! let auth = manager
//!     .start_device_auth(|status| tracing::info!(%status, "Trakt device flow finished"))
//!     .await?;
//! println!("Visit {} and enter {}", auth.verification_url, auth.user_code);
//! ```

use crate::error::{AuthError, Result};
use crate::oauth::{PollOutcome, TraktOAuthClient};
use crate::token_store::CredentialStore;
use crate::types::{DeviceFlowStatus, OAuthCredential};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Refresh when the token expires within this window
pub const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(300);

/// Upper bound for one refresh exchange
const REFRESH_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra delay added on every `slow_down` answer
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Assumed lifetime of tokens imported from configuration
const IMPORTED_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Handle on a running device authorization
#[derive(Debug)]
pub struct DeviceAuthorization {
    pub user_code: String,
    pub verification_url: String,
    pub expires_at: DateTime<Utc>,
    cancel: CancellationToken,
    handle: JoinHandle<DeviceFlowStatus>,
}

impl DeviceAuthorization {
    /// Stop polling. The completion callback is not invoked.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the polling task to finish
    ///
    /// Returns the terminal status, or `Pending` if the flow was cancelled.
    pub async fn wait(self) -> Result<DeviceFlowStatus> {
        self.handle.await.map_err(|_| AuthError::Cancelled)
    }
}

pub struct TokenManager {
    client: Arc<TraktOAuthClient>,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    /// Single-writer lock around load/refresh/save of the credential
    write_lock: Mutex<()>,
    skew: Duration,
}

impl TokenManager {
    pub fn new(client: TraktOAuthClient, store: CredentialStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: Arc::new(client),
            store,
            clock,
            event_bus: None,
            write_lock: Mutex::new(()),
            skew: TOKEN_REFRESH_SKEW,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Auth(event));
        }
    }

    fn skew(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.skew).unwrap_or_else(|_| chrono::Duration::seconds(300))
    }

    /// Current device-flow status, `None` when nothing is stored
    pub async fn status(&self) -> Result<Option<DeviceFlowStatus>> {
        Ok(self.store.load().await?.map(|c| c.status))
    }

    /// Return an access token valid for at least the skew window
    ///
    /// * `Ok(None)`: no credential stored, Trakt is used anonymously
    /// * `Err(AuthExpired)`: credential expired or denied
    /// * `Err(NotAuthorized)`: device flow still pending
    ///
    /// An expiring token is refreshed exactly once. If that refresh fails
    /// the credential is persisted as `expired` and no further refresh is
    /// attempted until the user re-authorizes.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<Option<String>> {
        let _guard = self.write_lock.lock().await;

        let credential = match self.store.load().await? {
            Some(credential) => credential,
            None => return Ok(None),
        };

        match credential.status {
            DeviceFlowStatus::Authorized => {}
            DeviceFlowStatus::Pending => return Err(AuthError::NotAuthorized),
            DeviceFlowStatus::Expired | DeviceFlowStatus::Denied => {
                return Err(AuthError::AuthExpired(format!(
                    "credential is {}, run the device authorization again",
                    credential.status
                )))
            }
        }

        let now = self.clock.now();
        if !credential.needs_refresh(now, self.skew()) {
            debug!("Access token is valid");
            return Ok(Some(credential.access_token));
        }

        info!(expires_at = %credential.expires_at, "Access token expiring, refreshing");
        let outcome = match credential.refresh_token.as_deref() {
            Some(refresh_token) => timeout(REFRESH_TIMEOUT, self.client.refresh(refresh_token))
                .await
                .unwrap_or_else(|_| {
                    Err(AuthError::OperationTimeout {
                        operation: "token refresh".to_string(),
                    })
                }),
            None => Err(AuthError::TokenRefreshFailed(
                "no refresh token stored".to_string(),
            )),
        };

        match outcome {
            Ok(grant) => {
                let refreshed = grant.into_credential(now, credential.refresh_token.clone());
                self.store.save(&refreshed).await?;
                info!(expires_at = %refreshed.expires_at, "Access token refreshed");
                self.emit(AuthEvent::TokenRefreshed {
                    expires_at: refreshed.expires_at.timestamp(),
                });
                Ok(Some(refreshed.access_token))
            }
            Err(e) => {
                error!(error = %e, "Token refresh failed, invalidating Trakt credential");
                let expired = credential.with_status(DeviceFlowStatus::Expired, now);
                if let Err(save_err) = self.store.save(&expired).await {
                    warn!(error = %save_err, "Could not persist expired credential");
                }
                self.emit(AuthEvent::Expired {
                    reason: e.to_string(),
                });
                Err(AuthError::AuthExpired(e.to_string()))
            }
        }
    }

    /// Store tokens supplied out of band (e.g. environment) when no
    /// credential exists yet. Returns whether anything was stored.
    pub async fn import_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<String>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.store.load().await?.is_some() {
            return Ok(false);
        }

        let now = self.clock.now();
        let lifetime = chrono::Duration::from_std(IMPORTED_TOKEN_LIFETIME)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let credential =
            OAuthCredential::authorized(access_token, refresh_token, now + lifetime, now);
        self.store.save(&credential).await?;
        info!("Imported Trakt tokens from configuration");
        Ok(true)
    }

    /// Forget the stored credential
    pub async fn sign_out(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.delete().await
    }

    /// Start the device-flow authorization
    ///
    /// Requests a device code and spawns a task that polls for the user's
    /// decision every `interval` seconds until the code expires. The
    /// callback runs once with the terminal status (`authorized`, `denied`
    /// or `expired`); it is skipped when the flow is cancelled.
    #[instrument(skip(self, on_complete))]
    pub async fn start_device_auth<F>(self: &Arc<Self>, on_complete: F) -> Result<DeviceAuthorization>
    where
        F: FnOnce(DeviceFlowStatus) + Send + 'static,
    {
        let code = self.client.request_device_code().await?;
        let lifetime = Duration::from_secs(code.expires_in);
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime));
        let (Some(expires_at), Some(deadline)) = (expires_at, Instant::now().checked_add(lifetime))
        else {
            return Err(AuthError::InvalidResponse(format!(
                "device code expires_in {} is out of range",
                code.expires_in
            )));
        };

        self.record_status(DeviceFlowStatus::Pending).await?;
        self.emit(AuthEvent::DeviceCodeIssued {
            user_code: code.user_code.clone(),
            verification_url: code.verification_url.clone(),
            expires_at: expires_at.timestamp(),
        });
        info!(
            user_code = %code.user_code,
            verification_url = %code.verification_url,
            "Waiting for Trakt device authorization"
        );

        let cancel = CancellationToken::new();
        let manager = Arc::clone(self);
        let task_cancel = cancel.clone();
        let device_code = code.device_code.clone();
        let interval = Duration::from_secs(code.interval.max(1));

        let handle = tokio::spawn(async move {
            let status = manager
                .poll_until_decided(&device_code, interval, deadline, &task_cancel)
                .await;
            match status {
                Some(status) => {
                    on_complete(status);
                    status
                }
                None => DeviceFlowStatus::Pending,
            }
        });

        Ok(DeviceAuthorization {
            user_code: code.user_code,
            verification_url: code.verification_url,
            expires_at,
            cancel,
            handle,
        })
    }

    /// Poll loop; `None` means cancelled.
    async fn poll_until_decided(
        &self,
        device_code: &str,
        mut interval: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Option<DeviceFlowStatus> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Device authorization cancelled");
                    return None;
                }
                _ = sleep(interval.min(deadline - now)) => {}
            }

            match self.client.poll_device_token(device_code).await {
                Ok(PollOutcome::Authorized(grant)) => {
                    let credential = grant.into_credential(self.clock.now(), None);
                    let _guard = self.write_lock.lock().await;
                    if let Err(e) = self.store.save(&credential).await {
                        error!(error = %e, "Could not store Trakt credential");
                        return Some(DeviceFlowStatus::Expired);
                    }
                    info!("Trakt device authorized");
                    self.emit(AuthEvent::Authorized);
                    return Some(DeviceFlowStatus::Authorized);
                }
                Ok(PollOutcome::Pending) => debug!("Authorization pending"),
                Ok(PollOutcome::SlowDown) => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval_secs = interval.as_secs(), "Slowing down device polling");
                }
                Ok(PollOutcome::Denied) => {
                    warn!("Trakt device authorization denied");
                    self.finish_unauthorized(DeviceFlowStatus::Denied).await;
                    return Some(DeviceFlowStatus::Denied);
                }
                Ok(PollOutcome::Expired) => break,
                Err(e) => warn!(error = %e, "Device token poll failed, will retry"),
            }
        }

        warn!("Device code expired before authorization");
        self.finish_unauthorized(DeviceFlowStatus::Expired).await;
        Some(DeviceFlowStatus::Expired)
    }

    async fn finish_unauthorized(&self, status: DeviceFlowStatus) {
        if let Err(e) = self.record_status(status).await {
            warn!(error = %e, "Could not persist device flow status");
        }
        match status {
            DeviceFlowStatus::Denied => self.emit(AuthEvent::Denied),
            _ => self.emit(AuthEvent::Expired {
                reason: "device code expired".to_string(),
            }),
        }
    }

    /// Record a non-authorized status without clobbering a working credential
    async fn record_status(&self, status: DeviceFlowStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let record = match self.store.load().await? {
            Some(current) if current.is_usable() => return Ok(()),
            Some(current) => current.with_status(status, now),
            None => OAuthCredential::pending(now).with_status(status, now),
        };
        self.store.save(&record).await
    }
}
