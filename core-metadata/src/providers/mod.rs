//! External list providers
//!
//! A provider turns one builder of a collection rule (`tmdb_trending_weekly`,
//! `trakt_list`, `radarr_taglist`, ...) into an ordered list of
//! [`ExternalItemRef`]s. Radarr and Sonarr additionally accept acquisition
//! requests for items the library does not hold yet.

mod arr;
pub mod radarr;
pub mod sonarr;
pub mod tmdb;
pub mod trakt;

use crate::error::{MetadataError, Result};
use async_trait::async_trait;
use core_library::{AcquisitionOverrides, BuilderSpec, ExternalIds, ExternalItemRef, MediaType};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Default number of items a builder returns when the rule gives no limit
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// One provider call derived from a builder
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderQuery {
    pub mode: String,
    pub media_type: MediaType,
    pub params: Map<String, Value>,
    pub limit: Option<usize>,
}

impl ProviderQuery {
    pub fn new(mode: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            mode: mode.into(),
            media_type,
            params: Map::new(),
            limit: None,
        }
    }

    pub fn from_builder(builder: &BuilderSpec, media_type: MediaType) -> Self {
        Self {
            mode: builder.mode.clone(),
            media_type,
            params: builder.params.clone(),
            limit: builder.limit(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn limit_or_default(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(1)
    }

    /// String form of a parameter; lists are joined with commas
    pub fn param_str(&self, name: &str) -> Option<String> {
        value_to_string(self.params.get(name)?)
    }

    /// The builder's scalar argument (`trakt_list: user/list`)
    pub fn value(&self) -> Option<String> {
        self.param_str("value")
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_string).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(","))
            }
        }
        _ => None,
    }
}

/// Result of asking Radarr/Sonarr to fetch a missing item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    Added,
    AlreadyPresent,
    /// On the service's import exclusion list
    Excluded,
    /// The service could not resolve the item
    NotFound,
}

impl fmt::Display for AcquisitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AcquisitionOutcome::Added => "added",
            AcquisitionOutcome::AlreadyPresent => "already present",
            AcquisitionOutcome::Excluded => "excluded",
            AcquisitionOutcome::NotFound => "not found",
        };
        f.write_str(label)
    }
}

#[async_trait]
pub trait ItemProvider: Send + Sync {
    /// Builder prefix this provider answers to (`tmdb`, `trakt`, ...)
    fn id(&self) -> &'static str;

    fn supports(&self, mode: &str) -> bool;

    /// Ordered, possibly truncated list of references
    async fn query(&self, query: &ProviderQuery) -> Result<Vec<ExternalItemRef>>;

    async fn health_check(&self) -> Result<()>;

    /// Media type this provider can acquire, if it acquires at all
    fn acquisition_media_type(&self) -> Option<MediaType> {
        None
    }

    async fn request_acquisition(
        &self,
        _item: &ExternalItemRef,
        _overrides: &AcquisitionOverrides,
    ) -> Result<AcquisitionOutcome> {
        Err(MetadataError::UnsupportedMode {
            provider: self.id().to_string(),
            mode: "acquisition".to_string(),
        })
    }
}

/// Lookup of cross-provider ids for a TMDb item
#[async_trait]
pub trait ExternalIdSource: Send + Sync {
    async fn external_ids(&self, media_type: MediaType, tmdb_id: u64) -> Result<ExternalIds>;
}

/// Providers keyed by builder prefix
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Arc<dyn ItemProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; a later registration with the same id wins
    pub fn register(&mut self, provider: Arc<dyn ItemProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ItemProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ItemProvider>> {
        self.providers.get(id)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ItemProvider>> {
        self.providers.values()
    }

    /// The provider that acquires items of `media_type`
    pub fn acquirer_for(&self, media_type: MediaType) -> Option<&Arc<dyn ItemProvider>> {
        self.providers
            .values()
            .find(|p| p.acquisition_media_type() == Some(media_type))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

pub(crate) fn unsupported(provider: &str, mode: &str) -> MetadataError {
    MetadataError::UnsupportedMode {
        provider: provider.to_string(),
        mode: mode.to_string(),
    }
}

pub(crate) fn invalid_params(provider: &str, message: impl Into<String>) -> MetadataError {
    MetadataError::InvalidParams {
        provider: provider.to_string(),
        message: message.into(),
    }
}

/// Year from an ISO date such as `2024-03-01`
pub(crate) fn year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_from_builder() {
        let builder = BuilderSpec::new("tmdb", "discover")
            .with_param("limit", 50)
            .with_param("with_genres", json!([18, 35]));
        let query = ProviderQuery::from_builder(&builder, MediaType::Movie);

        assert_eq!(query.mode, "discover");
        assert_eq!(query.limit, Some(50));
        assert_eq!(query.param_str("with_genres").as_deref(), Some("18,35"));
    }

    #[test]
    fn test_default_limit() {
        let query = ProviderQuery::new("popular", MediaType::Series);
        assert_eq!(query.limit_or_default(), DEFAULT_QUERY_LIMIT);
        assert_eq!(query.with_limit(0).limit_or_default(), 1);
    }

    struct Named(&'static str, Option<MediaType>);

    #[async_trait]
    impl ItemProvider for Named {
        fn id(&self) -> &'static str {
            self.0
        }

        fn supports(&self, _mode: &str) -> bool {
            true
        }

        async fn query(&self, _query: &ProviderQuery) -> Result<Vec<ExternalItemRef>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        fn acquisition_media_type(&self) -> Option<MediaType> {
            self.1
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(Named("tmdb", None)))
            .with(Arc::new(Named("sonarr", Some(MediaType::Series))));

        assert_eq!(registry.ids(), vec!["sonarr", "tmdb"]);
        assert!(registry.get("trakt").is_none());
        assert_eq!(
            registry.acquirer_for(MediaType::Series).map(|p| p.id()),
            Some("sonarr")
        );
        assert!(registry.acquirer_for(MediaType::Movie).is_none());

        let err = registry
            .get("tmdb")
            .unwrap()
            .request_acquisition(
                &ExternalItemRef::new(MediaType::Movie, "Heat"),
                &AcquisitionOverrides::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_year_from_date() {
        assert_eq!(year_from_date(Some("1999-03-31")), Some(1999));
        assert_eq!(year_from_date(Some("")), None);
        assert_eq!(year_from_date(None), None);
    }
}
