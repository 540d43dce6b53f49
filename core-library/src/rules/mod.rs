//! Collection rules
//!
//! A [`CollectionRule`] names a target collection and the builders that
//! produce its desired members. Rules are immutable for the length of a run
//! and reloaded from their [`RuleSource`] at the start of every scheduled
//! execution.

mod schedule;
mod yaml;

pub use schedule::{normalize_cron, Schedule, SchedulePreset, PRESET_HOUR};
pub use yaml::{parse_collections, YamlRuleSource};

use crate::error::Result;
use crate::models::ExternalItemRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// The collection mirrors the desired set exactly
    #[default]
    Sync,
    /// Members are only ever added
    Append,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Sync => "sync",
            SyncMode::Append => "append",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(SyncMode::Sync),
            "append" => Ok(SyncMode::Append),
            other => Err(format!("unknown sync_mode '{}'", other)),
        }
    }
}

/// One builder of a rule: which provider, which mode, which parameters
///
/// `tmdb_trending_weekly: 20` becomes provider `tmdb`, mode
/// `trending_weekly`, params `{"limit": 20}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderSpec {
    pub provider: String,
    pub mode: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl BuilderSpec {
    pub fn new(provider: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            mode: mode.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Parse a rule key such as `trakt_chart` and its value
    pub fn parse(key: &str, value: Value) -> std::result::Result<Self, String> {
        let (provider, mode) = key
            .split_once('_')
            .filter(|(provider, mode)| !provider.is_empty() && !mode.is_empty())
            .ok_or_else(|| format!("'{}' is not a <provider>_<mode> builder", key))?;

        let params = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            Value::Number(n) => Map::from_iter([("limit".to_string(), Value::Number(n))]),
            Value::String(s) => Map::from_iter([("value".to_string(), Value::String(s))]),
            Value::Bool(b) => Map::from_iter([("value".to_string(), Value::Bool(b))]),
            Value::Array(values) => {
                Map::from_iter([("values".to_string(), Value::Array(values))])
            }
        };

        Ok(Self {
            provider: provider.to_ascii_lowercase(),
            mode: mode.to_ascii_lowercase(),
            params,
        })
    }

    /// The original rule key
    pub fn key(&self) -> String {
        format!("{}_{}", self.provider, self.mode)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// String parameter; numbers are rendered as strings
    pub fn param_str(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Unsigned parameter; numeric strings are accepted
    pub fn param_u64(&self, name: &str) -> Option<u64> {
        match self.params.get(name)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Requested item count, if any
    pub fn limit(&self) -> Option<usize> {
        self.param_u64("limit").map(|n| n as usize)
    }
}

/// Post-merge filters of a rule
///
/// A filter only excludes a reference when the reference carries the
/// metadata the filter looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFilters {
    pub year_gte: Option<i32>,
    pub year_lte: Option<i32>,
    pub vote_average_gte: Option<f64>,
    pub vote_count_gte: Option<u64>,
    #[serde(default)]
    pub original_language_not: Vec<String>,
    #[serde(default)]
    pub with_genres: Vec<u32>,
    #[serde(default)]
    pub without_genres: Vec<u32>,
}

impl ItemFilters {
    pub fn is_empty(&self) -> bool {
        *self == ItemFilters::default()
    }

    pub fn matches(&self, reference: &ExternalItemRef) -> bool {
        let meta = &reference.metadata;

        if let Some(year) = reference.year {
            if self.year_gte.is_some_and(|min| year < min) {
                return false;
            }
            if self.year_lte.is_some_and(|max| year > max) {
                return false;
            }
        }

        if let (Some(min), Some(vote)) = (self.vote_average_gte, meta.vote_average) {
            if vote < min {
                return false;
            }
        }

        if let (Some(min), Some(count)) = (self.vote_count_gte, meta.vote_count) {
            if count < min {
                return false;
            }
        }

        if let Some(language) = &meta.original_language {
            if self
                .original_language_not
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(language))
            {
                return false;
            }
        }

        if !meta.genre_ids.is_empty() {
            if self
                .without_genres
                .iter()
                .any(|genre| meta.genre_ids.contains(genre))
            {
                return false;
            }
            if !self.with_genres.is_empty()
                && !self
                    .with_genres
                    .iter()
                    .any(|genre| meta.genre_ids.contains(genre))
            {
                return false;
            }
        }

        true
    }
}

/// Per-library or per-rule overrides of the Radarr / Sonarr defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionOverrides {
    pub root_folder: Option<String>,
    pub quality_profile: Option<String>,
    pub tag: Option<String>,
}

impl AcquisitionOverrides {
    /// Fill unset fields from `fallback`
    pub fn or(self, fallback: &AcquisitionOverrides) -> Self {
        Self {
            root_folder: self.root_folder.or_else(|| fallback.root_folder.clone()),
            quality_profile: self
                .quality_profile
                .or_else(|| fallback.quality_profile.clone()),
            tag: self.tag.or_else(|| fallback.tag.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRule {
    pub library: String,
    pub name: String,
    pub builders: Vec<BuilderSpec>,
    #[serde(default)]
    pub sync_mode: SyncMode,
    pub schedule: Option<Schedule>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: ItemFilters,
    pub acquire_missing: bool,
    pub summary: Option<String>,
    #[serde(default)]
    pub radarr: AcquisitionOverrides,
    #[serde(default)]
    pub sonarr: AcquisitionOverrides,
}

impl CollectionRule {
    pub fn new(library: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            name: name.into(),
            builders: Vec::new(),
            sync_mode: SyncMode::Sync,
            schedule: None,
            limit: None,
            filters: ItemFilters::default(),
            acquire_missing: true,
            summary: None,
            radarr: AcquisitionOverrides::default(),
            sonarr: AcquisitionOverrides::default(),
        }
    }

    pub fn with_builder(mut self, builder: BuilderSpec) -> Self {
        self.builders.push(builder);
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filters(mut self, filters: ItemFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_acquire_missing(mut self, acquire_missing: bool) -> Self {
        self.acquire_missing = acquire_missing;
        self
    }

    /// `library/collection`, unique across a rule set and used as the
    /// in-flight key
    pub fn key(&self) -> String {
        format!("{}/{}", self.library, self.name)
    }
}

/// Supplies parsed rules
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn load_rules(&self) -> Result<Vec<CollectionRule>>;

    fn describe(&self) -> String {
        "rules".to_string()
    }
}

/// Rules built in code
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    rules: Vec<CollectionRule>,
}

impl StaticRuleSource {
    pub fn new(rules: Vec<CollectionRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    async fn load_rules(&self) -> Result<Vec<CollectionRule>> {
        Ok(self.rules.clone())
    }

    fn describe(&self) -> String {
        format!("{} static rules", self.rules.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemMetadata, MediaType};
    use serde_json::json;

    #[test]
    fn test_builder_from_scalar() {
        let spec = BuilderSpec::parse("tmdb_trending_weekly", json!(20)).unwrap();
        assert_eq!(spec.provider, "tmdb");
        assert_eq!(spec.mode, "trending_weekly");
        assert_eq!(spec.limit(), Some(20));
        assert_eq!(spec.key(), "tmdb_trending_weekly");
    }

    #[test]
    fn test_builder_from_mapping() {
        let spec = BuilderSpec::parse(
            "trakt_chart",
            json!({"chart": "watched", "time_period": "weekly", "limit": "15"}),
        )
        .unwrap();
        assert_eq!(spec.provider, "trakt");
        assert_eq!(spec.param_str("chart").as_deref(), Some("watched"));
        assert_eq!(spec.limit(), Some(15));
    }

    #[test]
    fn test_builder_key_without_mode_is_rejected() {
        assert!(BuilderSpec::parse("tmdb", json!(10)).is_err());
        assert!(BuilderSpec::parse("_trending", json!(10)).is_err());
    }

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("Append".parse::<SyncMode>().unwrap(), SyncMode::Append);
        assert!("mirror".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::default(), SyncMode::Sync);
    }

    fn movie(year: i32, language: &str, genres: Vec<u32>, vote: f64) -> ExternalItemRef {
        ExternalItemRef::new(MediaType::Movie, "x")
            .with_year(year)
            .with_metadata(ItemMetadata {
                vote_average: Some(vote),
                vote_count: Some(100),
                original_language: Some(language.to_string()),
                genre_ids: genres,
            })
    }

    #[test]
    fn test_filters() {
        let filters = ItemFilters {
            year_gte: Some(2015),
            vote_average_gte: Some(6.0),
            original_language_not: vec!["ja".to_string()],
            without_genres: vec![16],
            ..Default::default()
        };

        assert!(filters.matches(&movie(2020, "en", vec![28], 7.0)));
        assert!(!filters.matches(&movie(2010, "en", vec![28], 7.0)));
        assert!(!filters.matches(&movie(2020, "JA", vec![28], 7.0)));
        assert!(!filters.matches(&movie(2020, "en", vec![16, 28], 7.0)));
        assert!(!filters.matches(&movie(2020, "en", vec![28], 5.5)));
    }

    #[test]
    fn test_filters_skip_missing_metadata() {
        let filters = ItemFilters {
            year_gte: Some(2015),
            with_genres: vec![28],
            ..Default::default()
        };
        let bare = ExternalItemRef::new(MediaType::Movie, "Unknown");
        assert!(filters.matches(&bare));
    }

    #[test]
    fn test_rule_defaults() {
        let rule = CollectionRule::new("Films", "Trending Movies");
        assert_eq!(rule.sync_mode, SyncMode::Sync);
        assert!(rule.acquire_missing);
        assert_eq!(rule.key(), "Films/Trending Movies");
    }
}
