use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider '{provider}' does not support mode '{mode}'")]
    UnsupportedMode { provider: String, mode: String },

    #[error("Invalid parameters for {provider}: {message}")]
    InvalidParams { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: String },

    #[error("Failed to parse {provider} response: {message}")]
    Parse { provider: String, message: String },

    #[error("Trakt authorization expired: {0}")]
    AuthExpired(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Bridge error: {0}")]
    Bridge(BridgeError),
}

impl MetadataError {
    /// Errors caused by the rule itself; retrying cannot help
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MetadataError::UnsupportedMode { .. } | MetadataError::InvalidParams { .. }
        )
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, MetadataError::AuthExpired(_))
    }
}

impl From<BridgeError> for MetadataError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Network(msg) | BridgeError::Timeout(msg) => MetadataError::Network(msg),
            other => MetadataError::Bridge(other),
        }
    }
}

impl From<AuthError> for MetadataError {
    fn from(error: AuthError) -> Self {
        if error.requires_reauthorization() {
            MetadataError::AuthExpired(error.to_string())
        } else {
            MetadataError::Auth(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
