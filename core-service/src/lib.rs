//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, secure
//! storage, clock) into the collection engine. Server and desktop hosts
//! enable the `desktop-shims` feature (which depends on `bridge-desktop`)
//! and call [`CollectionService::from_config`]; tests and embedders build a
//! [`CoreDependencies`] themselves and may replace the media server, the
//! rule source or add providers.

pub mod diagnostics;
pub mod error;
pub mod service;

pub use diagnostics::{ProviderHealth, RuleIssue, ValidationReport};
pub use error::{CoreError, Result};
pub use service::CollectionService;

pub use core_runtime::config::EngineConfig;
pub use core_sync::{CollectionReport, CollectionStatus, RunReport, SchedulerHandle};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    storage::SecureStore,
    time::{Clock, SystemClock},
};
use core_library::{MediaServer, RuleSource};
use core_metadata::ItemProvider;

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub clock: Arc<dyn Clock>,
    /// Replaces the Jellyfin HTTP client
    pub media_server: Option<Arc<dyn MediaServer>>,
    /// Replaces the YAML rule files
    pub rule_source: Option<Arc<dyn RuleSource>>,
    /// Registered after the configured providers, replacing any with the
    /// same id
    pub providers: Vec<Arc<dyn ItemProvider>>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(http_client: Arc<dyn HttpClient>, secure_store: Arc<dyn SecureStore>) -> Self {
        Self {
            http_client,
            secure_store,
            clock: Arc::new(SystemClock),
            media_server: None,
            rule_source: None,
            providers: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_media_server(mut self, server: Arc<dyn MediaServer>) -> Self {
        self.media_server = Some(server);
        self
    }

    pub fn with_rule_source(mut self, source: Arc<dyn RuleSource>) -> Self {
        self.rule_source = Some(source);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ItemProvider>) -> Self {
        self.providers.push(provider);
        self
    }
}

#[cfg(feature = "desktop-shims")]
impl CollectionService {
    /// Build the service with the native bridges: `reqwest` for HTTP and a
    /// file-backed credential store under `credentials_dir`.
    ///
    /// ```no_run
    /// # async fn example() -> core_service::Result<()> {
    /// use core_service::{CollectionService, EngineConfig};
    ///
    /// let service = CollectionService::from_config(EngineConfig::from_env()?).await?;
    /// let report = service.run_once(true).await?;
    /// println!("{}", report.summary());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        let http = bridge_desktop::ReqwestHttpClient::new()
            .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
        let store = bridge_desktop::FileSecureStore::new(config.credentials_dir.clone());

        let service = Self::new(config, CoreDependencies::new(Arc::new(http), Arc::new(store)));
        service.import_configured_tokens().await?;
        Ok(service)
    }
}
