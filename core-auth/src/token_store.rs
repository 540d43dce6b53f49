//! Durable credential storage
//!
//! The Trakt credential is serialized to JSON and written as one opaque
//! record through the host [`SecureStore`]. Each save replaces the whole
//! record, so readers never see half of a refresh.

use crate::error::{AuthError, Result};
use crate::types::OAuthCredential;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key of the Trakt credential record
pub const TRAKT_CREDENTIAL_KEY: &str = "trakt.credential";

/// Secure storage for the Trakt credential
#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
    key: String,
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self::with_key(secure_store, TRAKT_CREDENTIAL_KEY)
    }

    pub fn with_key(secure_store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        Self {
            secure_store,
            key: key.into(),
        }
    }

    /// Persist the credential, replacing any previous record
    pub async fn save(&self, credential: &OAuthCredential) -> Result<()> {
        let bytes = serde_json::to_vec(credential)
            .map_err(|e| AuthError::SecureStorageUnavailable(format!("serialize: {}", e)))?;

        self.secure_store
            .set_secret(&self.key, &bytes)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        debug!(status = %credential.status, "Stored Trakt credential");
        Ok(())
    }

    /// Load the credential
    ///
    /// A record that cannot be decoded is deleted and reported as absent, so
    /// a corrupted file degrades to "not authorized" instead of failing
    /// every run.
    pub async fn load(&self) -> Result<Option<OAuthCredential>> {
        let bytes = match self
            .secure_store
            .get_secret(&self.key)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?
        {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match serde_json::from_slice::<OAuthCredential>(&bytes) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(error = %e, "Stored Trakt credential is corrupted, discarding it");
                self.delete().await?;
                Ok(None)
            }
        }
    }

    pub async fn delete(&self) -> Result<()> {
        self.secure_store
            .delete_secret(&self.key)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }
}
