//! # Library Module
//!
//! Everything the engine knows about the media server side and about the
//! collection rules that target it.
//!
//! ## Overview
//!
//! This module manages:
//! - Domain models: external item references, Jellyfin items, collection state
//! - The [`MediaServer`] contract and its Jellyfin HTTP implementation
//! - [`LibraryIndex`] for id and title lookups within one run
//! - Collection rules and the Kometa-style YAML [`RuleSource`]

pub mod error;
pub mod index;
pub mod jellyfin;
pub mod models;
pub mod normalize;
pub mod rules;

pub use error::{LibraryError, Result};
pub use index::LibraryIndex;
pub use jellyfin::{JellyfinClient, MediaServer, ServerInfo, WRITE_BATCH_SIZE};
pub use models::{
    CollectionState, ExternalIds, ExternalItemRef, ItemId, ItemMetadata, LibraryInfo, LibraryItem,
    MediaType, RefKey,
};
pub use normalize::normalize_title;
pub use rules::{
    AcquisitionOverrides, BuilderSpec, CollectionRule, ItemFilters, RuleSource, Schedule,
    SchedulePreset, StaticRuleSource, SyncMode, YamlRuleSource,
};
