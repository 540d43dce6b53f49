//! # Host Bridge Traits
//!
//! Capability contracts the reconciliation core depends on but does not
//! implement itself.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP with bounded retry/backoff
//! - [`SecureStore`](storage::SecureStore) - Durable, atomic credential records
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! Native implementations live in `bridge-desktop`. Tests substitute their
//! own mocks.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Transports
//! should report connection drops as `Network` and deadline expiry as
//! `Timeout` so callers can tell transient failures apart.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so one instance can be shared
//! across concurrently running collection reconciliations.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::SecureStore;
pub use time::{Clock, SystemClock};
