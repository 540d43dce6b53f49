//! # Run Reports
//!
//! Every run produces one [`CollectionReport`] per collection and a
//! [`RunReport`] wrapping them with totals. Dry runs produce the same
//! reports with `applied = false`.
//!
//! Reports are handed to every registered [`NotificationSink`] once the run
//! is over; sinks decide how (and whether) to deliver them.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_library::SyncMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::RuleSource(format!("invalid run id '{}': {}", s, e)))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Succeeded,
    /// Finished, but at least one builder failed
    Warning,
    Failed,
    /// Not run because the previous run of the collection was in flight
    Skipped,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Succeeded => "succeeded",
            CollectionStatus::Warning => "warning",
            CollectionStatus::Failed => "failed",
            CollectionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(CollectionStatus::Succeeded),
            "warning" => Ok(CollectionStatus::Warning),
            "failed" => Ok(CollectionStatus::Failed),
            "skipped" => Ok(CollectionStatus::Skipped),
            other => Err(format!("unknown collection status '{}'", other)),
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub library: String,
    pub collection: String,
    pub status: CollectionStatus,
    pub sync_mode: SyncMode,
    /// `false` for dry runs and for runs that stopped before writing
    pub applied: bool,
    /// References returned by all builders, before dedup
    pub fetched: usize,
    /// References after dedup, filters and limit
    pub candidates: usize,
    pub resolved: usize,
    pub missing_titles: Vec<String>,
    pub to_add: usize,
    pub to_remove: usize,
    pub added: usize,
    pub removed: usize,
    pub write_failures: usize,
    pub acquisitions_queued: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl CollectionReport {
    pub fn new(library: impl Into<String>, collection: impl Into<String>, sync_mode: SyncMode) -> Self {
        Self {
            library: library.into(),
            collection: collection.into(),
            status: CollectionStatus::Succeeded,
            sync_mode,
            applied: false,
            fetched: 0,
            candidates: 0,
            resolved: 0,
            missing_titles: Vec::new(),
            to_add: 0,
            to_remove: 0,
            added: 0,
            removed: 0,
            write_failures: 0,
            acquisitions_queued: 0,
            warnings: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = CollectionStatus::Failed;
        self.error = Some(error.into());
        self
    }

    pub fn skipped(mut self) -> Self {
        self.status = CollectionStatus::Skipped;
        self
    }

    pub fn missing(&self) -> usize {
        self.missing_titles.len()
    }

    /// `library/collection`
    pub fn key(&self) -> String {
        format!("{}/{}", self.library, self.collection)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// What started the run: `manual`, `startup` or `schedule:<schedule>`
    pub trigger: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collections: Vec<CollectionReport>,
}

impl RunReport {
    pub fn total_added(&self) -> usize {
        self.collections.iter().map(|c| c.added).sum()
    }

    pub fn total_removed(&self) -> usize {
        self.collections.iter().map(|c| c.removed).sum()
    }

    pub fn total_missing(&self) -> usize {
        self.collections.iter().map(CollectionReport::missing).sum()
    }

    pub fn count(&self, status: CollectionStatus) -> usize {
        self.collections.iter().filter(|c| c.status == status).count()
    }

    pub fn failed(&self) -> usize {
        self.count(CollectionStatus::Failed)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// One-line summary for logs and notifications
    pub fn summary(&self) -> String {
        let marker = if self.dry_run { " (dry run, not applied)" } else { "" };
        format!(
            "{} collections: {} succeeded, {} warnings, {} failed, {} skipped; +{} / -{} items, {} missing{}",
            self.collections.len(),
            self.count(CollectionStatus::Succeeded),
            self.count(CollectionStatus::Warning),
            self.failed(),
            self.count(CollectionStatus::Skipped),
            self.total_added(),
            self.total_removed(),
            self.total_missing(),
            marker
        )
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Receives the report of every finished run
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, report: &RunReport) -> anyhow::Result<()>;
}

/// Writes the run summary and per-collection lines to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, report: &RunReport) -> anyhow::Result<()> {
        info!(run_id = %report.run_id, trigger = %report.trigger, "{}", report.summary());
        for collection in &report.collections {
            match collection.status {
                CollectionStatus::Failed => warn!(
                    collection = %collection.key(),
                    error = collection.error.as_deref().unwrap_or_default(),
                    "Collection failed"
                ),
                _ => info!(
                    collection = %collection.key(),
                    status = %collection.status,
                    added = collection.added,
                    removed = collection.removed,
                    missing = collection.missing(),
                    "Collection reconciled"
                ),
            }
        }
        Ok(())
    }
}
