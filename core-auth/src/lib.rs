//! # Authentication Module
//!
//! Trakt OAuth device-flow authorization and token lifecycle.
//!
//! ## Overview
//!
//! - [`TraktOAuthClient`] talks to the Trakt OAuth endpoints
//! - [`CredentialStore`] persists the credential through a `SecureStore`
//! - [`TokenManager`] hands valid tokens to the Trakt provider, refreshes
//!   them under a single-writer lock and drives the device flow
//!
//! The credential moves `pending → authorized → (expired | denied)`. Only
//! the token manager writes it.

pub mod error;
pub mod manager;
pub mod oauth;
pub mod token_store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{AuthError, Result};
pub use manager::{DeviceAuthorization, TokenManager, TOKEN_REFRESH_SKEW};
pub use oauth::{PollOutcome, TraktOAuthClient, TraktOAuthConfig};
pub use token_store::{CredentialStore, TRAKT_CREDENTIAL_KEY};
pub use types::{DeviceCode, DeviceFlowStatus, OAuthCredential, TokenGrant};
