//! # Scheduler
//!
//! Fires scheduled collection runs. Rules sharing a schedule (same cron
//! expression after normalization) share one trigger and run as one batch.
//! Rules without a schedule use the configured default; `never` rules only
//! run on explicit invocation.
//!
//! The trigger set is computed from the rules loaded at start. Rules are
//! reloaded on every fire, so edits to a rule's builders or membership in an
//! existing schedule take effect without a restart.

use crate::coordinator::{RunCoordinator, RunMode};
use crate::{Result, SyncError};
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_library::{CollectionRule, RuleSource, Schedule};
use core_runtime::config::SchedulerConfig;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// One cron schedule and the rules it fires
#[derive(Debug, Clone)]
pub struct Trigger {
    /// Normalized six-field cron expression
    pub key: String,
    pub schedule: Schedule,
    cron: cron::Schedule,
}

impl Trigger {
    /// `None` for `never`
    pub fn new(schedule: &Schedule) -> Result<Option<Self>> {
        let Some(key) = schedule.cron_expression() else {
            return Ok(None);
        };
        let cron = cron::Schedule::from_str(&key).map_err(|e| SyncError::InvalidSchedule {
            schedule: schedule.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(Self {
            key,
            schedule: schedule.clone(),
            cron,
        }))
    }

    /// First fire time strictly after `now`
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.after(&now).next()
    }

    fn label(&self) -> String {
        format!("schedule:{}", self.schedule)
    }
}

/// The schedule a rule actually runs on
pub fn effective_schedule<'a>(rule: &'a CollectionRule, default: &'a Schedule) -> &'a Schedule {
    rule.schedule.as_ref().unwrap_or(default)
}

/// One trigger per distinct cron expression, in expression order
pub fn triggers_for(rules: &[CollectionRule], default: &Schedule) -> Result<Vec<Trigger>> {
    let mut triggers = BTreeMap::new();
    for rule in rules {
        if let Some(trigger) = Trigger::new(effective_schedule(rule, default))? {
            triggers.entry(trigger.key.clone()).or_insert(trigger);
        }
    }
    Ok(triggers.into_values().collect())
}

#[derive(Clone)]
pub struct Scheduler {
    coordinator: Arc<RunCoordinator>,
    source: Arc<dyn RuleSource>,
    default_schedule: Schedule,
    run_on_start: bool,
    clock: Arc<dyn Clock>,
    mode: RunMode,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<RunCoordinator>,
        source: Arc<dyn RuleSource>,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        let default_schedule =
            config
                .default_cron
                .parse::<Schedule>()
                .map_err(|message| SyncError::InvalidSchedule {
                    schedule: config.default_cron.clone(),
                    message,
                })?;

        Ok(Self {
            coordinator,
            source,
            default_schedule,
            run_on_start: config.run_on_start,
            clock: Arc::new(SystemClock),
            mode: RunMode::Live,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    async fn load_rules(&self) -> Result<Vec<CollectionRule>> {
        self.source
            .load_rules()
            .await
            .map_err(|e| SyncError::RuleSource(e.to_string()))
    }

    /// Load rules, compute triggers and spawn one task per trigger
    pub async fn start(&self) -> Result<SchedulerHandle> {
        let rules = self.load_rules().await?;
        let triggers = triggers_for(&rules, &self.default_schedule)?;
        let cancel = CancellationToken::new();
        let batches = TaskTracker::new();

        info!(
            rules = rules.len(),
            triggers = triggers.len(),
            "Scheduler started"
        );

        let mut tasks = Vec::with_capacity(triggers.len() + 1);
        for trigger in &triggers {
            let scheduler = self.clone();
            let trigger = trigger.clone();
            let cancel = cancel.clone();
            let batches = batches.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.trigger_loop(trigger, cancel, batches).await
            }));
        }

        if self.run_on_start {
            let scheduled: Vec<CollectionRule> = rules
                .into_iter()
                .filter(|r| !effective_schedule(r, &self.default_schedule).is_never())
                .collect();
            let coordinator = self.coordinator.clone();
            let mode = self.mode;
            tasks.push(tokio::spawn(async move {
                coordinator.run_batch(&scheduled, mode, "startup").await;
            }));
        }

        Ok(SchedulerHandle {
            cancel,
            tasks,
            batches,
            triggers,
        })
    }

    /// Fires run on their own task so a batch outliving the interval never
    /// hides the next fire; the coordinator skips collections still in flight.
    async fn trigger_loop(&self, trigger: Trigger, cancel: CancellationToken, batches: TaskTracker) {
        loop {
            let now = self.clock.now();
            let Some(next) = trigger.next_fire_after(now) else {
                warn!(schedule = %trigger.schedule, "Schedule has no future fire time");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(schedule = %trigger.schedule, next = %next, "Waiting for next fire");

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let scheduler = self.clone();
            let fired = trigger.clone();
            batches.spawn(async move { scheduler.fire(&fired).await });
        }
    }

    async fn fire(&self, trigger: &Trigger) {
        let rules = match self.load_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                error!(schedule = %trigger.schedule, error = %e, "Rule reload failed, skipping fire");
                return;
            }
        };

        let due: Vec<CollectionRule> = rules
            .into_iter()
            .filter(|r| {
                effective_schedule(r, &self.default_schedule)
                    .cron_expression()
                    .as_deref()
                    == Some(trigger.key.as_str())
            })
            .collect();

        if due.is_empty() {
            debug!(schedule = %trigger.schedule, "No rules left on this schedule");
            return;
        }
        self.coordinator
            .run_batch(&due, self.mode, &trigger.label())
            .await;
    }
}

/// Running scheduler; dropping it leaves the tasks running
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    batches: TaskTracker,
    triggers: Vec<Trigger>,
}

impl SchedulerHandle {
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Stop firing. Batches already running are awaited.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        self.batches.close();
        self.batches.wait().await;
        info!("Scheduler stopped");
    }
}
