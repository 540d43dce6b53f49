//! # Collection Sync
//!
//! Reconciles Jellyfin collections against the lists rules describe.
//!
//! ## Pipeline
//!
//! - **Evaluator** (`evaluator`): runs a rule's builders, merges, dedups,
//!   filters and limits the references they return
//! - **Resolver** (`resolver`): maps references to library items and hands
//!   missing ones to Radarr/Sonarr
//! - **Reconciler** (`reconciler`): computes and applies the add/remove plan
//! - **Coordinator** (`coordinator`): runs collections with timeouts,
//!   overlap protection and bounded concurrency
//! - **Scheduler** (`scheduler`): fires runs from rule schedules
//! - **Reports** (`report`): per-collection and per-run results

pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use coordinator::{CoordinatorConfig, RunCoordinator, RunMode};
pub use error::{Result, SyncError};
pub use evaluator::{dedup, Evaluation, RuleEvaluator};
pub use reconciler::{apply_plan, reconcile, ApplyOutcome, MutationPlan};
pub use report::{
    CollectionReport, CollectionStatus, LogNotificationSink, NotificationSink, RunId, RunReport,
};
pub use resolver::{AcquisitionSummary, ItemResolver, Resolution, ResolvedItem};
pub use scheduler::{effective_schedule, triggers_for, Scheduler, SchedulerHandle, Trigger};
