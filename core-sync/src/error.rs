use core_library::LibraryError;
use core_metadata::MetadataError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad rule or builder; fatal to the rule, never to the batch
    #[error("Invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },

    #[error("Library '{0}' not found on the media server")]
    LibraryNotFound(String),

    #[error("No builder of '{rule}' succeeded: {}", errors.join("; "))]
    AllBuildersFailed { rule: String, errors: Vec<String> },

    #[error("Media server error: {0}")]
    Library(#[from] LibraryError),

    #[error("Provider error: {0}")]
    Provider(#[from] MetadataError),

    #[error("Collection write failed: {0}")]
    Write(String),

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("Collection '{0}' already has a run in flight")]
    InProgress(String),

    #[error("Rule loading failed: {0}")]
    RuleSource(String),

    #[error("Invalid schedule '{schedule}': {message}")]
    InvalidSchedule { schedule: String, message: String },

    #[error("Scheduler cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn invalid_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::InvalidRule {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Errors that will repeat until the rule files change
    pub fn is_config_error(&self) -> bool {
        match self {
            SyncError::InvalidRule { .. } | SyncError::InvalidSchedule { .. } => true,
            SyncError::Provider(e) => e.is_config_error(),
            SyncError::Library(e) => e.is_config_error(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
