//! # Engine Configuration
//!
//! Connection settings for Jellyfin and every provider, scheduler tuning and
//! file locations, built either programmatically through
//! [`EngineConfigBuilder`] or from the process environment with
//! [`EngineConfig::from_env`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ArrConfig, EngineConfig, TmdbConfig};
//!
//! let config = EngineConfig::builder()
//!     .jellyfin("http://jellyfin:8096", "jf-api-key")
//!     .tmdb(TmdbConfig::new("tmdb-key"))
//!     .radarr(ArrConfig::radarr("http://radarr:7878", "radarr-key"))
//!     .rules_path("/config/config.yml")
//!     .build()?;
//! ```
//!
//! ## Validation
//!
//! `build()` fails fast with [`Error::Config`] on missing Jellyfin
//! credentials, unparsable URLs and zero-valued limits, so a misconfigured
//! process stops before its first run instead of failing every collection.
//! A provider that is not configured is simply not registered; rules that
//! use it fail validation.

use crate::error::{Error, Result};
use crate::logging::{LogFormat, LogLevel, LoggingConfig};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_JELLYFIN_URL: &str = "http://localhost:8096";
pub const DEFAULT_RADARR_URL: &str = "http://localhost:7878";
pub const DEFAULT_SONARR_URL: &str = "http://localhost:8989";
pub const DEFAULT_CRON: &str = "0 3 * * *";
pub const DEFAULT_QUALITY_PROFILE: &str = "HD-1080p";
pub const DEFAULT_ARR_TAG: &str = "jfc";
pub const DEFAULT_CREDENTIALS_DIR: &str = "/config";

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "[REDACTED]"
    }
}

/// Jellyfin server connection
#[derive(Clone)]
pub struct JellyfinConfig {
    pub url: String,
    pub api_key: String,
}

impl fmt::Debug for JellyfinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JellyfinConfig")
            .field("url", &self.url)
            .field("api_key", &redacted(&self.api_key))
            .finish()
    }
}

/// TMDb API access
#[derive(Clone)]
pub struct TmdbConfig {
    pub api_key: String,
    pub language: String,
    pub region: String,
}

impl TmdbConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            language: "fr".to_string(),
            region: "FR".to_string(),
        }
    }
}

impl fmt::Debug for TmdbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmdbConfig")
            .field("api_key", &redacted(&self.api_key))
            .field("language", &self.language)
            .field("region", &self.region)
            .finish()
    }
}

/// Trakt application credentials plus optional pre-issued tokens
#[derive(Clone)]
pub struct TraktConfig {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl TraktConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            access_token: None,
            refresh_token: None,
        }
    }
}

impl fmt::Debug for TraktConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraktConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("access_token", &self.access_token.as_deref().map(redacted))
            .field("refresh_token", &self.refresh_token.as_deref().map(redacted))
            .finish()
    }
}

/// Radarr or Sonarr instance used for acquisition requests
#[derive(Clone)]
pub struct ArrConfig {
    pub url: String,
    pub api_key: String,
    pub root_folder: String,
    pub quality_profile: String,
    pub tag: String,
    pub search_on_add: bool,
}

impl ArrConfig {
    fn new(url: impl Into<String>, api_key: impl Into<String>, root_folder: &str) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            root_folder: root_folder.to_string(),
            quality_profile: DEFAULT_QUALITY_PROFILE.to_string(),
            tag: DEFAULT_ARR_TAG.to_string(),
            search_on_add: true,
        }
    }

    /// Radarr defaults: `/movies` root folder
    pub fn radarr(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(url, api_key, "/movies")
    }

    /// Sonarr defaults: `/tv` root folder
    pub fn sonarr(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(url, api_key, "/tv")
    }
}

impl fmt::Debug for ArrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrConfig")
            .field("url", &self.url)
            .field("api_key", &redacted(&self.api_key))
            .field("root_folder", &self.root_folder)
            .field("quality_profile", &self.quality_profile)
            .field("tag", &self.tag)
            .field("search_on_add", &self.search_on_add)
            .finish()
    }
}

/// Scheduler and run tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Cron expression used by rules that declare no schedule
    pub default_cron: String,
    /// Run every scheduled collection once when the scheduler starts
    pub run_on_start: bool,
    /// Upper bound for planning one collection run
    pub run_timeout: Duration,
    /// Collections reconciled concurrently within one batch
    pub max_concurrent_runs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_cron: DEFAULT_CRON.to_string(),
            run_on_start: false,
            run_timeout: Duration::from_secs(600),
            max_concurrent_runs: 4,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub jellyfin: JellyfinConfig,
    pub tmdb: Option<TmdbConfig>,
    pub trakt: Option<TraktConfig>,
    pub radarr: Option<ArrConfig>,
    pub sonarr: Option<ArrConfig>,
    pub scheduler: SchedulerConfig,
    /// Kometa-style YAML files holding the collection rules
    pub rules_paths: Vec<PathBuf>,
    /// Directory for the durable credential store
    pub credentials_dir: PathBuf,
    /// Compute and report plans without writing to Jellyfin or *arr services
    pub dry_run: bool,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut builder = EngineConfig::builder().jellyfin(
            var("JELLYFIN_URL").unwrap_or_else(|| DEFAULT_JELLYFIN_URL.to_string()),
            var("JELLYFIN_API_KEY").unwrap_or_default(),
        );

        if let Some(api_key) = var("TMDB_API_KEY") {
            let mut tmdb = TmdbConfig::new(api_key);
            if let Some(language) = var("TMDB_LANGUAGE") {
                tmdb.language = language;
            }
            if let Some(region) = var("TMDB_REGION") {
                tmdb.region = region;
            }
            builder = builder.tmdb(tmdb);
        }

        if let (Some(id), Some(secret)) = (var("TRAKT_CLIENT_ID"), var("TRAKT_CLIENT_SECRET")) {
            let mut trakt = TraktConfig::new(id, secret);
            trakt.access_token = var("TRAKT_ACCESS_TOKEN");
            trakt.refresh_token = var("TRAKT_REFRESH_TOKEN");
            builder = builder.trakt(trakt);
        }

        if let Some(api_key) = var("RADARR_API_KEY") {
            let url = var("RADARR_URL").unwrap_or_else(|| DEFAULT_RADARR_URL.to_string());
            let radarr = arr_from_lookup(ArrConfig::radarr(url, api_key), "RADARR", &var)?;
            builder = builder.radarr(radarr);
        }

        if let Some(api_key) = var("SONARR_API_KEY") {
            let url = var("SONARR_URL").unwrap_or_else(|| DEFAULT_SONARR_URL.to_string());
            let sonarr = arr_from_lookup(ArrConfig::sonarr(url, api_key), "SONARR", &var)?;
            builder = builder.sonarr(sonarr);
        }

        let mut scheduler = SchedulerConfig::default();
        if let Some(cron) = var("SCHEDULER_CRON") {
            scheduler.default_cron = cron;
        }
        if let Some(flag) = var("SCHEDULER_RUN_ON_START") {
            scheduler.run_on_start = parse_bool("SCHEDULER_RUN_ON_START", &flag)?;
        }
        if let Some(secs) = var("RUN_TIMEOUT_SECS") {
            scheduler.run_timeout = Duration::from_secs(parse_number("RUN_TIMEOUT_SECS", &secs)?);
        }
        if let Some(n) = var("MAX_CONCURRENT_RUNS") {
            scheduler.max_concurrent_runs = parse_number("MAX_CONCURRENT_RUNS", &n)? as usize;
        }
        builder = builder.scheduler(scheduler);

        if let Some(paths) = var("RULES_PATHS") {
            builder = builder.rules_paths(
                paths
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect(),
            );
        }

        if let Some(dir) = var("CREDENTIALS_DIR") {
            builder = builder.credentials_dir(dir);
        }

        if let Some(flag) = var("DRY_RUN") {
            builder = builder.dry_run(parse_bool("DRY_RUN", &flag)?);
        }

        let mut logging = LoggingConfig::default();
        if let Some(level) = var("LOG_LEVEL") {
            logging = logging.with_level(level.parse::<LogLevel>()?);
        }
        if let Some(format) = var("LOG_FORMAT") {
            logging = logging.with_format(format.parse::<LogFormat>()?);
        }

        builder.logging(logging).build()
    }
}

fn arr_from_lookup<F>(mut config: ArrConfig, prefix: &str, var: &F) -> Result<ArrConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = var(&format!("{}_ROOT_FOLDER", prefix)) {
        config.root_folder = root;
    }
    if let Some(profile) = var(&format!("{}_QUALITY_PROFILE", prefix)) {
        config.quality_profile = profile;
    }
    if let Some(tag) = var(&format!("{}_TAG", prefix)) {
        config.tag = tag;
    }
    let search_key = format!("{}_SEARCH_ON_ADD", prefix);
    if let Some(flag) = var(&search_key) {
        config.search_on_add = parse_bool(&search_key, &flag)?;
    }
    Ok(config)
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{} must be a boolean, got '{}'",
            name, value
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", name, value)))
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("{} is not a valid URL ('{}'): {}", field, value, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }
    Ok(())
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    jellyfin: Option<JellyfinConfig>,
    tmdb: Option<TmdbConfig>,
    trakt: Option<TraktConfig>,
    radarr: Option<ArrConfig>,
    sonarr: Option<ArrConfig>,
    scheduler: Option<SchedulerConfig>,
    rules_paths: Vec<PathBuf>,
    credentials_dir: Option<PathBuf>,
    dry_run: bool,
    logging: Option<LoggingConfig>,
}

impl EngineConfigBuilder {
    pub fn jellyfin(mut self, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.jellyfin = Some(JellyfinConfig {
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        });
        self
    }

    pub fn tmdb(mut self, tmdb: TmdbConfig) -> Self {
        self.tmdb = Some(tmdb);
        self
    }

    pub fn trakt(mut self, trakt: TraktConfig) -> Self {
        self.trakt = Some(trakt);
        self
    }

    pub fn radarr(mut self, radarr: ArrConfig) -> Self {
        self.radarr = Some(radarr);
        self
    }

    pub fn sonarr(mut self, sonarr: ArrConfig) -> Self {
        self.sonarr = Some(sonarr);
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn rules_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_paths.push(path.into());
        self
    }

    pub fn rules_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.rules_paths = paths;
        self
    }

    pub fn credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = Some(dir.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Validate and build the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when Jellyfin is missing or has no API key,
    /// any URL is malformed, credentials are blank, or the scheduler has a
    /// zero timeout / concurrency.
    pub fn build(self) -> Result<EngineConfig> {
        let jellyfin = self.jellyfin.ok_or_else(|| {
            Error::Config("Jellyfin connection is required (JELLYFIN_URL)".to_string())
        })?;
        validate_url("JELLYFIN_URL", &jellyfin.url)?;
        if jellyfin.api_key.trim().is_empty() {
            return Err(Error::Config(
                "Jellyfin API key is required (JELLYFIN_API_KEY)".to_string(),
            ));
        }

        if let Some(tmdb) = &self.tmdb {
            if tmdb.api_key.trim().is_empty() {
                return Err(Error::Config("TMDb API key must not be empty".to_string()));
            }
        }

        if let Some(trakt) = &self.trakt {
            if trakt.client_id.trim().is_empty() || trakt.client_secret.trim().is_empty() {
                return Err(Error::Config(
                    "Trakt client id and secret are both required".to_string(),
                ));
            }
        }

        let mut radarr = self.radarr;
        let mut sonarr = self.sonarr;
        for (name, arr) in [("RADARR_URL", radarr.as_mut()), ("SONARR_URL", sonarr.as_mut())] {
            if let Some(arr) = arr {
                arr.url = arr.url.trim_end_matches('/').to_string();
                validate_url(name, &arr.url)?;
                if arr.api_key.trim().is_empty() {
                    return Err(Error::Config(format!("{} requires an API key", name)));
                }
            }
        }

        let scheduler = self.scheduler.unwrap_or_default();
        if scheduler.run_timeout.is_zero() {
            return Err(Error::Config("Run timeout must be greater than zero".to_string()));
        }
        if scheduler.max_concurrent_runs == 0 {
            return Err(Error::Config(
                "At least one concurrent run must be allowed".to_string(),
            ));
        }
        if scheduler.default_cron.trim().is_empty() {
            return Err(Error::Config("Default cron expression is empty".to_string()));
        }

        Ok(EngineConfig {
            jellyfin,
            tmdb: self.tmdb,
            trakt: self.trakt,
            radarr,
            sonarr,
            scheduler,
            rules_paths: self.rules_paths,
            credentials_dir: self
                .credentials_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_DIR)),
            dry_run: self.dry_run,
            logging: self.logging.unwrap_or_default(),
        })
    }
}
