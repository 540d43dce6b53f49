//! # Desktop Bridge Implementations
//!
//! Native implementations of the bridge traits for server and desktop hosts:
//!
//! - [`ReqwestHttpClient`] implements `HttpClient` with `reqwest` (rustls)
//! - [`FileSecureStore`] implements `SecureStore` as atomically replaced
//!   files in a private directory
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileSecureStore, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let store = Arc::new(FileSecureStore::new("/config/credentials"));
//! ```

mod http;
mod secure_store;

pub use http::ReqwestHttpClient;
pub use secure_store::FileSecureStore;
