use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The stored credential was invalidated; the device flow must be redone.
    #[error("Trakt authorization expired: {0}")]
    AuthExpired(String),

    /// A device authorization was started but not yet approved.
    #[error("Trakt authorization is still pending")]
    NotAuthorized,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Device code request failed: {0}")]
    DeviceCodeRequestFailed(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Invalid response from Trakt: {0}")]
    InvalidResponse(String),

    #[error("Operation timed out: {operation}")]
    OperationTimeout { operation: String },

    #[error("Device authorization was cancelled")]
    Cancelled,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl AuthError {
    /// Whether the error means Trakt-dependent work must stop until the user
    /// re-authorizes.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, AuthError::AuthExpired(_) | AuthError::NotAuthorized)
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
