use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device-flow status of the Trakt credential.
///
/// `Pending` moves to `Authorized` once the user approves the device code,
/// or to `Expired` / `Denied`. An `Authorized` credential becomes `Expired`
/// when a refresh fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFlowStatus {
    Pending,
    Authorized,
    Expired,
    Denied,
}

impl DeviceFlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFlowStatus::Pending => "pending",
            DeviceFlowStatus::Authorized => "authorized",
            DeviceFlowStatus::Expired => "expired",
            DeviceFlowStatus::Denied => "denied",
        }
    }

    /// A device flow in this state will not change without user action.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeviceFlowStatus::Pending)
    }
}

impl fmt::Display for DeviceFlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeviceFlowStatus::Pending),
            "authorized" => Ok(DeviceFlowStatus::Authorized),
            "expired" => Ok(DeviceFlowStatus::Expired),
            "denied" => Ok(DeviceFlowStatus::Denied),
            other => Err(format!("Unknown device flow status: {}", other)),
        }
    }
}

/// Persisted Trakt credential.
///
/// Only the token manager mutates it. Token values never appear in `Debug`
/// output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub status: DeviceFlowStatus,
    pub updated_at: DateTime<Utc>,
}

impl OAuthCredential {
    pub fn authorized(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            status: DeviceFlowStatus::Authorized,
            updated_at: now,
        }
    }

    /// Placeholder record for a device flow that has not completed yet
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: None,
            expires_at: now,
            status: DeviceFlowStatus::Pending,
            updated_at: now,
        }
    }

    /// `expires_at <= now + skew`
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at <= now + skew
    }

    /// Copy of this credential moved to a terminal non-authorized state
    pub fn with_status(&self, status: DeviceFlowStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status == DeviceFlowStatus::Authorized
    }
}

impl fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("status", &self.status)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Device code issued by `POST /oauth/device/code`
#[derive(Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    /// Seconds until the code is void
    pub expires_in: u64,
    /// Minimum seconds between polls
    pub interval: u64,
}

impl fmt::Debug for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCode")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_url", &self.verification_url)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Upper bound on a granted token's lifetime; longer grants are clamped
const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// Token grant returned by the device-token and refresh endpoints
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    /// Issue time as a Unix timestamp, when Trakt reports it
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl TokenGrant {
    /// Convert into a stored credential. `fallback_refresh` keeps the previous
    /// refresh token when the grant does not rotate it.
    pub fn into_credential(
        self,
        now: DateTime<Utc>,
        fallback_refresh: Option<String>,
    ) -> OAuthCredential {
        let issued = self
            .created_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or(now);
        let lifetime = Duration::seconds(self.expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS));
        let expires_at = issued
            .checked_add_signed(lifetime)
            .unwrap_or(now + lifetime);
        OAuthCredential::authorized(
            self.access_token,
            self.refresh_token.or(fallback_refresh),
            expires_at,
            now,
        )
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
