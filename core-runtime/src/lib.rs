//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the collection engine:
//! - Logging and tracing bootstrap
//! - Engine configuration (builder and environment loader)
//! - Event bus for auth and run lifecycle notifications
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its configuration types
//! and event vocabulary. Nothing here performs I/O beyond reading
//! environment variables and installing the global tracing subscriber.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{
    ArrConfig, EngineConfig, EngineConfigBuilder, JellyfinConfig, SchedulerConfig, TmdbConfig,
    TraktConfig,
};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, RunEvent};
