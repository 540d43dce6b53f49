//! # Provider Module
//!
//! Clients for the services collection rules draw their lists from.
//!
//! ## Overview
//!
//! This module handles:
//! - The [`ItemProvider`] capability contract and the [`ProviderRegistry`]
//!   the evaluator dispatches through
//! - TMDb and Trakt list providers
//! - Radarr and Sonarr, which list their libraries and accept acquisition
//!   requests for missing items
//! - Per-provider request pacing on top of the HTTP retry policy

mod api;
pub mod error;
pub mod pacing;
pub mod providers;

#[cfg(test)]
mod test_support;

pub use error::{MetadataError, Result};
pub use pacing::RequestPacer;
pub use providers::radarr::RadarrClient;
pub use providers::sonarr::SonarrClient;
pub use providers::tmdb::{TmdbClient, TMDB_MAX_RESULTS};
pub use providers::trakt::{TraktClient, TraktTokenSource};
pub use providers::{
    AcquisitionOutcome, ExternalIdSource, ItemProvider, ProviderQuery, ProviderRegistry,
    DEFAULT_QUERY_LIMIT,
};
