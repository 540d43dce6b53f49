//! Workspace facade crate.
//!
//! Re-exports the engine entry points from `core-service` so a host binary
//! can depend on `jfc-workspace` alone and enable the documented features.

pub use core_service::*;
