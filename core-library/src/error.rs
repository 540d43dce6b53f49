use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {message}")]
    Yaml { path: String, message: String },

    #[error("Jellyfin returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Earlier write batches landed before one failed
    #[error("{written} items written to collection {collection_id} before: {source}")]
    PartialWrite {
        collection_id: String,
        written: usize,
        #[source]
        source: Box<LibraryError>,
    },

    #[error("Unexpected Jellyfin response: {0}")]
    Parse(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },
}

impl LibraryError {
    pub fn invalid_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        LibraryError::InvalidRule {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Wrap a write failure, keeping the count of items that landed first
    pub fn partial_write(collection_id: &str, written: usize, error: LibraryError) -> Self {
        if written == 0 {
            return error;
        }
        match error {
            LibraryError::PartialWrite {
                written: more,
                source,
                ..
            } => LibraryError::PartialWrite {
                collection_id: collection_id.to_string(),
                written: written + more,
                source,
            },
            other => LibraryError::PartialWrite {
                collection_id: collection_id.to_string(),
                written,
                source: Box::new(other),
            },
        }
    }

    /// Items a failed write still applied
    pub fn written(&self) -> usize {
        match self {
            LibraryError::PartialWrite { written, .. } => *written,
            _ => 0,
        }
    }

    /// Bad rule definitions are fatal to the rule, never retried
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            LibraryError::InvalidRule { .. } | LibraryError::Yaml { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
