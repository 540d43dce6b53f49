//! Secure Storage Abstraction
//!
//! Durable storage for credentials. The engine treats each value as an
//! opaque record that is replaced atomically on every write.

use async_trait::async_trait;

use crate::error::Result;

/// Secure credential storage trait
///
/// Implementations must make `set_secret` atomic: a reader observes either
/// the previous value or the new one, never a torn write.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_token(store: &dyn SecureStore, token: &str) -> Result<()> {
///     store.set_secret("trakt.credential", token.as_bytes()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret. Deleting a missing key is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }

    /// List all secret keys (without values)
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Remove every stored secret
    async fn clear_all(&self) -> Result<()> {
        for key in self.list_keys().await? {
            self.delete_secret(&key).await?;
        }
        Ok(())
    }
}
