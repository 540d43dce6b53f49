//! # Collection Service
//!
//! The engine entry points a host (CLI, daemon, tests) calls:
//!
//! | Entry point               | Effect                                          |
//! |---------------------------|-------------------------------------------------|
//! | [`run_once`]              | Reconcile every rule once                       |
//! | [`start_scheduler`]       | Fire rules on their schedules until shut down   |
//! | [`validate_rules`]        | Check rules offline, no network call            |
//! | [`check_provider_health`] | Probe Jellyfin and every configured provider    |
//! | [`start_device_auth`]     | Begin the Trakt device authorization            |
//!
//! [`run_once`]: CollectionService::run_once
//! [`start_scheduler`]: CollectionService::start_scheduler
//! [`validate_rules`]: CollectionService::validate_rules
//! [`check_provider_health`]: CollectionService::check_provider_health
//! [`start_device_auth`]: CollectionService::start_device_auth

use crate::diagnostics::{duplicate_names, ProviderHealth, RuleIssue, ValidationReport};
use crate::error::{CoreError, Result};
use crate::CoreDependencies;
use core_auth::{
    CredentialStore, DeviceAuthorization, DeviceFlowStatus, TokenManager, TraktOAuthClient,
    TraktOAuthConfig,
};
use core_library::{CollectionRule, JellyfinClient, MediaServer, RuleSource, Schedule, YamlRuleSource};
use core_metadata::{
    ExternalIdSource, ProviderRegistry, RadarrClient, SonarrClient, TmdbClient, TraktClient,
    TMDB_MAX_RESULTS,
};
use core_runtime::config::EngineConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{
    CoordinatorConfig, ItemResolver, LogNotificationSink, RuleEvaluator, RunCoordinator, RunMode,
    RunReport, Scheduler, SchedulerHandle, Trigger,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct CollectionService {
    config: Arc<EngineConfig>,
    server: Arc<dyn MediaServer>,
    providers: ProviderRegistry,
    coordinator: Arc<RunCoordinator>,
    rule_source: Arc<dyn RuleSource>,
    tokens: Option<Arc<TokenManager>>,
    deps: Arc<CoreDependencies>,
    event_bus: EventBus,
}

impl CollectionService {
    /// Wire the engine from configuration and injected collaborators.
    ///
    /// Collaborators left unset in `deps` are built from `config`: the
    /// Jellyfin HTTP client, one client per configured provider and the
    /// YAML rule source.
    pub fn new(config: EngineConfig, deps: CoreDependencies) -> Self {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let http = deps.http_client.clone();

        let server: Arc<dyn MediaServer> = match &deps.media_server {
            Some(server) => server.clone(),
            None => Arc::new(JellyfinClient::from_config(&config.jellyfin, http.clone())),
        };

        let tokens = config.trakt.as_ref().map(|trakt| {
            let client = TraktOAuthClient::new(
                TraktOAuthConfig::new(trakt.client_id.clone(), trakt.client_secret.clone()),
                http.clone(),
            );
            let store = CredentialStore::new(deps.secure_store.clone());
            Arc::new(
                TokenManager::new(client, store, deps.clock.clone())
                    .with_event_bus(event_bus.clone()),
            )
        });

        let mut providers = ProviderRegistry::new();
        let mut id_source: Option<Arc<dyn ExternalIdSource>> = None;
        if let Some(tmdb) = &config.tmdb {
            let client = Arc::new(TmdbClient::new(http.clone(), tmdb));
            let source: Arc<dyn ExternalIdSource> = client.clone();
            id_source = Some(source);
            providers.register(client);
        }
        if let Some(trakt) = &config.trakt {
            let mut client = TraktClient::new(http.clone(), trakt);
            if let Some(tokens) = &tokens {
                client = client.with_token_source(tokens.clone());
            }
            providers.register(Arc::new(client));
        }
        if let Some(radarr) = &config.radarr {
            providers.register(Arc::new(RadarrClient::new(http.clone(), radarr)));
        }
        if let Some(sonarr) = &config.sonarr {
            providers.register(Arc::new(SonarrClient::new(http.clone(), sonarr)));
        }
        for provider in &deps.providers {
            providers.register(provider.clone());
        }

        let mut resolver = ItemResolver::new(providers.clone());
        if let Some(source) = id_source {
            resolver = resolver.with_id_source(source);
        }

        let coordinator = Arc::new(
            RunCoordinator::new(
                server.clone(),
                RuleEvaluator::new(providers.clone()),
                resolver,
                CoordinatorConfig::from(&config.scheduler),
            )
            .with_clock(deps.clock.clone())
            .with_event_bus(event_bus.clone())
            .with_sink(Arc::new(LogNotificationSink)),
        );

        let rule_source: Arc<dyn RuleSource> = match &deps.rule_source {
            Some(source) => source.clone(),
            None => Arc::new(YamlRuleSource::new(config.rules_paths.clone())),
        };

        info!(
            providers = ?providers.ids(),
            dry_run = config.dry_run,
            "Collection service initialized"
        );

        Self {
            config: Arc::new(config),
            server,
            providers,
            coordinator,
            rule_source,
            tokens,
            deps: Arc::new(deps),
            event_bus,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dependencies(&self) -> Arc<CoreDependencies> {
        Arc::clone(&self.deps)
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn coordinator(&self) -> &Arc<RunCoordinator> {
        &self.coordinator
    }

    /// Seed the credential store with Trakt tokens from configuration when
    /// it holds nothing yet
    pub async fn import_configured_tokens(&self) -> Result<bool> {
        let (Some(tokens), Some(trakt)) = (&self.tokens, &self.config.trakt) else {
            return Ok(false);
        };
        match &trakt.access_token {
            Some(access_token) => Ok(tokens
                .import_tokens(access_token, trakt.refresh_token.clone())
                .await?),
            None => Ok(false),
        }
    }

    async fn load_rules(&self) -> Result<Vec<CollectionRule>> {
        Ok(self.rule_source.load_rules().await?)
    }

    fn mode(&self, dry_run: bool) -> RunMode {
        RunMode::from_dry_run(dry_run || self.config.dry_run)
    }

    /// Reconcile every rule once, regardless of schedule
    ///
    /// `dry_run` computes and reports plans without writing; a service
    /// configured for dry runs never writes either way.
    pub async fn run_once(&self, dry_run: bool) -> Result<RunReport> {
        let rules = self.load_rules().await?;
        Ok(self
            .coordinator
            .run_batch(&rules, self.mode(dry_run), "manual")
            .await)
    }

    pub async fn start_scheduler(&self) -> Result<SchedulerHandle> {
        let scheduler = Scheduler::new(
            self.coordinator.clone(),
            self.rule_source.clone(),
            &self.config.scheduler,
        )?
        .with_clock(self.deps.clock.clone())
        .with_mode(self.mode(false));
        Ok(scheduler.start().await?)
    }

    /// Load and check every rule without touching the network
    pub async fn validate_rules(&self) -> Result<ValidationReport> {
        let rules = self.load_rules().await?;
        let mut report = ValidationReport {
            rules: rules.len(),
            ..Default::default()
        };

        let default_schedule = match self.config.scheduler.default_cron.parse::<Schedule>() {
            Ok(schedule) => Some(schedule),
            Err(message) => {
                report.errors.push(RuleIssue::new("scheduler", message));
                None
            }
        };

        let evaluator = self.coordinator.evaluator();
        for rule in &rules {
            if let Err(e) = evaluator.validate(rule) {
                report.errors.push(RuleIssue::new(rule.key(), e.to_string()));
            }
            if let Some(schedule) = rule.schedule.as_ref().or(default_schedule.as_ref()) {
                if let Err(e) = Trigger::new(schedule) {
                    report.errors.push(RuleIssue::new(rule.key(), e.to_string()));
                }
            }
            for builder in rule.builders.iter().filter(|b| b.provider == "tmdb") {
                if builder.limit().is_some_and(|limit| limit > TMDB_MAX_RESULTS) {
                    report.warnings.push(RuleIssue::new(
                        rule.key(),
                        format!(
                            "{} limit exceeds the {} results TMDb can return",
                            builder.key(),
                            TMDB_MAX_RESULTS
                        ),
                    ));
                }
            }
            if rule.limit == Some(0) {
                report
                    .warnings
                    .push(RuleIssue::new(rule.key(), "limit 0 keeps the collection empty"));
            }
        }
        report.warnings.extend(duplicate_names(&rules));

        info!(
            rules = report.rules,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Rules validated"
        );
        Ok(report)
    }

    /// Probe Jellyfin and every registered provider concurrently
    pub async fn check_provider_health(&self) -> Vec<ProviderHealth> {
        let jellyfin = async {
            match self.server.health_check().await {
                Ok(info) => ProviderHealth::healthy(
                    "jellyfin",
                    Some(format!("{} {}", info.server_name, info.version)),
                ),
                Err(e) => ProviderHealth::unhealthy("jellyfin", e),
            }
        };
        let providers = join_all(self.providers.iter().map(|provider| async move {
            match provider.health_check().await {
                Ok(()) => ProviderHealth::healthy(provider.id(), None),
                Err(e) => ProviderHealth::unhealthy(provider.id(), e),
            }
        }));

        let (jellyfin, providers) = futures::join!(jellyfin, providers);
        let mut health = Vec::with_capacity(providers.len() + 1);
        health.push(jellyfin);
        health.extend(providers);

        for entry in health.iter().filter(|h| !h.healthy) {
            warn!(provider = %entry.name, detail = ?entry.detail, "Health check failed");
        }
        health
    }

    /// Start the Trakt device authorization; `on_complete` receives the
    /// terminal status
    pub async fn start_device_auth<F>(&self, on_complete: F) -> Result<DeviceAuthorization>
    where
        F: FnOnce(DeviceFlowStatus) + Send + 'static,
    {
        let tokens = self.tokens.as_ref().ok_or_else(|| CoreError::CapabilityMissing {
            capability: "trakt".to_string(),
            message: "TRAKT_CLIENT_ID and TRAKT_CLIENT_SECRET are not configured".to_string(),
        })?;
        Ok(tokens.start_device_auth(on_complete).await?)
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }
}
