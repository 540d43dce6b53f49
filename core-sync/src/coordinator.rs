//! # Run Coordinator
//!
//! Runs collection rules against the media server.
//!
//! ## Workflow
//!
//! For one collection:
//! 1. Take the collection's in-flight permit; a collection already running
//!    is reported `skipped` instead of queued
//! 2. Under the run timeout: find the library, evaluate the builders, build
//!    the library index, resolve, fetch the collection, reconcile
//! 3. Dry run: report the plan, write nothing
//! 4. Live run: apply the plan, then hand missing items to Radarr/Sonarr on
//!    a detached task
//!
//! The timeout only covers step 2, so a run that times out has not written
//! anything. A batch runs several collections concurrently, bounded by
//! `max_concurrent_runs`, and ends with a [`RunReport`] handed to every
//! [`NotificationSink`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = RunCoordinator::new(server, evaluator, resolver, CoordinatorConfig::default())
//!     .with_event_bus(bus.clone())
//!     .with_sink(Arc::new(LogNotificationSink));
//!
//! let report = coordinator.run_batch(&rules, RunMode::DryRun, "manual").await;
//! println!("{}", report.summary());
//! ```

use crate::evaluator::{Evaluation, RuleEvaluator};
use crate::reconciler::{apply_plan, reconcile, MutationPlan};
use crate::report::{CollectionReport, CollectionStatus, NotificationSink, RunId, RunReport};
use crate::resolver::{desired_members, missing_refs, AcquisitionSummary, ItemResolver, ResolvedItem};
use crate::{Result, SyncError};
use bridge_traits::time::{Clock, SystemClock};
use core_library::{
    AcquisitionOverrides, CollectionRule, CollectionState, LibraryIndex, LibraryInfo, MediaServer,
    MediaType,
};
use core_runtime::config::SchedulerConfig;
use core_runtime::events::{CoreEvent, EventBus, RunEvent};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Whether a run writes to the media server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    DryRun,
}

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Upper bound for planning one collection
    pub run_timeout: Duration,
    /// Collections reconciled concurrently within one batch
    pub max_concurrent_runs: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for CoordinatorConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            run_timeout: config.run_timeout,
            max_concurrent_runs: config.max_concurrent_runs.max(1),
        }
    }
}

/// Everything computed before the first write
struct PlannedRun {
    media_type: MediaType,
    evaluation: Evaluation,
    resolved: Vec<ResolvedItem>,
    current: CollectionState,
    plan: MutationPlan,
}

/// Releases the collection's in-flight slot when dropped
struct InFlightPermit {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct RunCoordinator {
    server: Arc<dyn MediaServer>,
    evaluator: RuleEvaluator,
    resolver: ItemResolver,
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    acquisitions: Mutex<Vec<JoinHandle<AcquisitionSummary>>>,
}

impl RunCoordinator {
    pub fn new(
        server: Arc<dyn MediaServer>,
        evaluator: RuleEvaluator,
        resolver: ItemResolver,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            server,
            evaluator,
            resolver,
            config,
            clock: Arc::new(SystemClock),
            event_bus: None,
            sinks: Vec::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            acquisitions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn evaluator(&self) -> &RuleEvaluator {
        &self.evaluator
    }

    pub fn server(&self) -> &Arc<dyn MediaServer> {
        &self.server
    }

    fn emit(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Run(event));
        }
    }

    fn try_acquire(&self, key: String) -> Option<InFlightPermit> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(InFlightPermit {
            key,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Whether a run of the collection `library/name` is in progress
    pub fn is_running(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    async fn find_library(&self, name: &str) -> Result<LibraryInfo> {
        let libraries = self.server.list_libraries().await?;
        let exact = libraries.iter().position(|l| l.name == name);
        let loose = || libraries.iter().position(|l| l.name.eq_ignore_ascii_case(name));
        exact
            .or_else(loose)
            .map(|i| libraries[i].clone())
            .ok_or_else(|| SyncError::LibraryNotFound(name.to_string()))
    }

    async fn plan_collection(&self, rule: &CollectionRule) -> Result<PlannedRun> {
        let library = self.find_library(&rule.library).await?;
        let media_type = library.media_type.ok_or_else(|| {
            SyncError::invalid_rule(
                rule.key(),
                format!("library '{}' holds neither movies nor series", library.name),
            )
        })?;

        let evaluation = self.evaluator.evaluate(rule, media_type).await?;

        let index = LibraryIndex::build(self.server.library_items(&library).await?);
        let resolved = self.resolver.resolve(&evaluation.items, &index);
        let desired = desired_members(&resolved);

        let current = self
            .server
            .get_collection_members(&library, &rule.name)
            .await?;
        let plan = reconcile(&desired, &current, rule.sync_mode);
        debug!(
            rule = %rule.key(),
            desired = desired.len(),
            current = current.members.len(),
            to_add = plan.to_add.len(),
            to_remove = plan.to_remove.len(),
            "Plan computed"
        );

        Ok(PlannedRun {
            media_type,
            evaluation,
            resolved,
            current,
            plan,
        })
    }

    fn track_acquisition(&self, handle: JoinHandle<AcquisitionSummary>) {
        let mut acquisitions = self
            .acquisitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        acquisitions.retain(|h| !h.is_finished());
        acquisitions.push(handle);
    }

    /// Wait for every acquisition batch queued so far
    pub async fn wait_for_acquisitions(&self) -> AcquisitionSummary {
        let handles: Vec<_> = self
            .acquisitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut total = AcquisitionSummary::default();
        for handle in handles {
            match handle.await {
                Ok(summary) => {
                    total.added += summary.added;
                    total.already_present += summary.already_present;
                    total.excluded += summary.excluded;
                    total.not_found += summary.not_found;
                    total.failed += summary.failed;
                }
                Err(e) => warn!(error = %e, "Acquisition task aborted"),
            }
        }
        total
    }

    /// Reconcile one collection
    #[instrument(skip(self, rule), fields(collection = %rule.key(), dry_run = mode.is_dry_run()))]
    pub async fn run_collection(&self, rule: &CollectionRule, mode: RunMode) -> CollectionReport {
        let started = Instant::now();
        let report = CollectionReport::new(&rule.library, &rule.name, rule.sync_mode);

        let Some(_permit) = self.try_acquire(rule.key()) else {
            warn!("Previous run still in flight, skipping");
            self.emit(RunEvent::Skipped {
                collection: rule.key(),
            });
            return report.skipped();
        };

        let mut report = match timeout(self.config.run_timeout, self.plan_collection(rule)).await {
            Ok(Ok(planned)) => self.finish(rule, mode, planned, report).await,
            Ok(Err(e)) => {
                error!(error = %e, "Collection run failed");
                report.failed(e.to_string())
            }
            Err(_) => {
                let e = SyncError::Timeout(self.config.run_timeout.as_secs());
                error!(error = %e, "Collection run timed out");
                report.failed(e.to_string())
            }
        };

        report.duration = started.elapsed();
        report
    }

    async fn finish(
        &self,
        rule: &CollectionRule,
        mode: RunMode,
        planned: PlannedRun,
        mut report: CollectionReport,
    ) -> CollectionReport {
        let missing = missing_refs(&planned.resolved);
        report.fetched = planned.evaluation.fetched;
        report.candidates = planned.evaluation.items.len();
        report.resolved = planned.resolved.len() - missing.len();
        report.missing_titles = missing.iter().map(|m| m.label()).collect();
        report.to_add = planned.plan.to_add.len();
        report.to_remove = planned.plan.to_remove.len();
        report.warnings = planned.evaluation.warnings;
        if !report.warnings.is_empty() {
            report.status = CollectionStatus::Warning;
        }

        if mode.is_dry_run() {
            info!(
                to_add = report.to_add,
                to_remove = report.to_remove,
                missing = missing.len(),
                "Dry run, plan not applied"
            );
            return report;
        }

        let outcome = apply_plan(
            self.server.as_ref(),
            &rule.name,
            &planned.current,
            &planned.plan,
        )
        .await;
        report.applied = true;
        report.added = outcome.added;
        report.removed = outcome.removed;
        report.write_failures = outcome.failures.len();
        if !outcome.is_complete() {
            report = report.failed(SyncError::Write(outcome.failures.join("; ")).to_string());
        }

        if rule.acquire_missing && !missing.is_empty() {
            let overrides = match planned.media_type {
                MediaType::Movie => rule.radarr.clone(),
                MediaType::Series => rule.sonarr.clone(),
            };
            report.acquisitions_queued = self.queue_acquisitions(planned.media_type, missing, overrides);
        }

        info!(
            status = %report.status,
            added = report.added,
            removed = report.removed,
            missing = report.missing(),
            "Collection reconciled"
        );
        report
    }

    fn queue_acquisitions(
        &self,
        media_type: MediaType,
        missing: Vec<core_library::ExternalItemRef>,
        overrides: AcquisitionOverrides,
    ) -> usize {
        let count = missing.len();
        match self.resolver.request_missing(media_type, missing, overrides) {
            Some(handle) => {
                self.track_acquisition(handle);
                count
            }
            None => 0,
        }
    }

    /// Reconcile a set of collections and report on all of them
    pub async fn run_batch(&self, rules: &[CollectionRule], mode: RunMode, trigger: &str) -> RunReport {
        let run_id = RunId::new();
        let started_at = self.clock.now();
        info!(%run_id, trigger, collections = rules.len(), dry_run = mode.is_dry_run(), "Run started");
        self.emit(RunEvent::Started {
            run_id: run_id.to_string(),
            collections: rules.len(),
            dry_run: mode.is_dry_run(),
        });

        let runs: Vec<_> = rules
            .iter()
            .map(|rule| async move {
                let report = self.run_collection(rule, mode).await;
                self.emit(RunEvent::CollectionFinished {
                    run_id: run_id.to_string(),
                    collection: report.key(),
                    status: report.status.to_string(),
                });
                report
            }
            .boxed())
            .collect();
        let collections: Vec<CollectionReport> = stream::iter(runs)
            .buffered(self.config.max_concurrent_runs.max(1))
            .collect()
            .await;

        let report = RunReport {
            run_id,
            trigger: trigger.to_string(),
            dry_run: mode.is_dry_run(),
            started_at,
            finished_at: self.clock.now(),
            collections,
        };

        self.emit(RunEvent::Completed {
            run_id: run_id.to_string(),
            added: report.total_added(),
            removed: report.total_removed(),
            failed: report.failed(),
        });
        for sink in &self.sinks {
            if let Err(e) = sink.notify(&report).await {
                warn!(error = %e, "Notification sink failed");
            }
        }
        report
    }
}
