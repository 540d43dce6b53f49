//! TMDb API Client
//!
//! Lists movies and series from The Movie Database.
//!
//! ## API Endpoints
//!
//! - **Trending**: `GET /trending/{movie|tv}/{week|day}`
//! - **Charts**: `GET /{movie|tv}/popular`, `GET /{movie|tv}/top_rated`
//! - **Discover**: `GET /discover/{movie|tv}?sort_by=...`
//! - **External ids**: `GET /{movie|tv}/{id}/external_ids`
//!
//! Every request carries `api_key` and `language` query parameters. Result
//! pages hold 20 entries; pages are fetched until the requested limit is
//! reached or TMDb runs out of pages.
//!
//! ## Rate Limiting
//!
//! TMDb allows roughly 40 requests per 10 seconds; requests are paced to
//! one every 250ms.

use super::{
    invalid_params, unsupported, year_from_date, ExternalIdSource, ItemProvider, ProviderQuery,
};
use crate::api::ApiClient;
use crate::error::Result;
use crate::pacing::RequestPacer;
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use core_library::{ExternalIds, ExternalItemRef, ItemMetadata, MediaType};
use core_runtime::config::TmdbConfig;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// TMDb API base URL
pub const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";

const PROVIDER: &str = "tmdb";

const SUPPORTED_MODES: &[&str] = &[
    "trending_weekly",
    "trending_daily",
    "popular",
    "top_rated",
    "discover",
];

/// Discover parameters forwarded verbatim to TMDb
const DISCOVER_PARAMS: &[&str] = &[
    "with_genres",
    "without_genres",
    "vote_average.gte",
    "vote_average.lte",
    "vote_count.gte",
    "vote_count.lte",
    "with_original_language",
    "primary_release_date.gte",
    "primary_release_date.lte",
    "first_air_date.gte",
    "first_air_date.lte",
    "with_watch_providers",
    "watch_region",
    "with_release_type",
    "with_status",
    "region",
];

/// Hard stop on pagination, TMDb refuses pages above 500
const MAX_PAGES: u32 = 500;

/// Results per TMDb list page
const PAGE_SIZE: usize = 20;

/// Most results one TMDb list can yield
pub const TMDB_MAX_RESULTS: usize = PAGE_SIZE * MAX_PAGES as usize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TmdbClient {
    api: ApiClient,
    base_url: String,
    api_key: String,
    language: String,
    region: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<TmdbItem>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct TmdbItem {
    id: u64,
    title: Option<String>,
    name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
    original_language: Option<String>,
    #[serde(default)]
    genre_ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct TmdbExternalIds {
    imdb_id: Option<String>,
    tvdb_id: Option<u64>,
}

impl TmdbItem {
    fn into_ref(self, media_type: MediaType) -> ExternalItemRef {
        let title = self.title.or(self.name).unwrap_or_default();
        let date = self.release_date.or(self.first_air_date);
        let mut item = ExternalItemRef::new(media_type, title)
            .with_tmdb(self.id)
            .with_metadata(ItemMetadata {
                vote_average: self.vote_average,
                vote_count: self.vote_count,
                original_language: self.original_language,
                genre_ids: self.genre_ids,
            });
        if let Some(year) = year_from_date(date.as_deref()) {
            item = item.with_year(year);
        }
        item
    }
}

impl TmdbClient {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &TmdbConfig) -> Self {
        Self {
            api: ApiClient::new(
                PROVIDER,
                http_client,
                RequestPacer::per_window(40, Duration::from_secs(10)),
            ),
            base_url: TMDB_API_BASE.to_string(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            region: config.region.clone(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.api.set_retry_policy(policy);
        self
    }

    pub fn with_pacer(mut self, pacer: RequestPacer) -> Self {
        self.api.set_pacer(pacer);
        self
    }

    fn request(&self, path: &str, params: &[(String, String)]) -> Result<HttpRequest> {
        let mut pairs = vec![
            ("api_key".to_string(), self.api_key.clone()),
            ("language".to_string(), self.language.clone()),
        ];
        pairs.extend(params.iter().cloned());
        Ok(HttpRequest::get(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .query(pairs)?)
    }

    /// Walk result pages until `limit` items are collected
    async fn fetch_paged(
        &self,
        path: &str,
        params: Vec<(String, String)>,
        media_type: MediaType,
        limit: usize,
    ) -> Result<Vec<ExternalItemRef>> {
        let mut items = Vec::with_capacity(limit.min(PAGE_SIZE));
        let mut page = 1u32;

        loop {
            let mut page_params = params.clone();
            page_params.push(("page".to_string(), page.to_string()));
            let response: Page = self.api.json(self.request(path, &page_params)?).await?;

            let exhausted = response.results.is_empty();
            items.extend(
                response
                    .results
                    .into_iter()
                    .map(|item| item.into_ref(media_type)),
            );

            if items.len() >= limit
                || exhausted
                || page >= response.total_pages
                || page >= MAX_PAGES
            {
                break;
            }
            page += 1;
        }

        items.truncate(limit);
        debug!(path, count = items.len(), "TMDb list fetched");
        Ok(items)
    }

    fn discover_params(&self, query: &ProviderQuery) -> Vec<(String, String)> {
        let mut params = vec![(
            "sort_by".to_string(),
            query
                .param_str("sort_by")
                .unwrap_or_else(|| "popularity.desc".to_string()),
        )];
        for key in DISCOVER_PARAMS {
            if let Some(value) = query.param_str(key) {
                params.push((key.to_string(), value));
            }
        }
        let has_watch_providers = params.iter().any(|(k, _)| k == "with_watch_providers");
        let has_watch_region = params.iter().any(|(k, _)| k == "watch_region");
        if has_watch_providers && !has_watch_region && !self.region.is_empty() {
            params.push(("watch_region".to_string(), self.region.clone()));
        }
        params
    }
}

#[async_trait]
impl ItemProvider for TmdbClient {
    fn id(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, mode: &str) -> bool {
        SUPPORTED_MODES.contains(&mode)
    }

    #[instrument(skip(self, query), fields(mode = %query.mode, media_type = %query.media_type))]
    async fn query(&self, query: &ProviderQuery) -> Result<Vec<ExternalItemRef>> {
        let segment = query.media_type.tmdb_segment();
        let limit = query.limit_or_default();

        let (path, params) = match query.mode.as_str() {
            "trending_weekly" => (format!("/trending/{}/week", segment), Vec::new()),
            "trending_daily" => (format!("/trending/{}/day", segment), Vec::new()),
            "popular" => (format!("/{}/popular", segment), Vec::new()),
            "top_rated" => (format!("/{}/top_rated", segment), Vec::new()),
            "discover" => {
                if let Some(value) = query.value() {
                    return Err(invalid_params(
                        PROVIDER,
                        format!("discover expects a mapping of filters, got '{}'", value),
                    ));
                }
                (format!("/discover/{}", segment), self.discover_params(query))
            }
            other => return Err(unsupported(PROVIDER, other)),
        };

        let items = self.fetch_paged(&path, params, query.media_type, limit).await?;
        info!("[TMDb] {}: fetched {} items", query.mode, items.len());
        Ok(items)
    }

    async fn health_check(&self) -> Result<()> {
        self.api.send(self.request("/configuration", &[])?).await?;
        Ok(())
    }
}

#[async_trait]
impl ExternalIdSource for TmdbClient {
    async fn external_ids(&self, media_type: MediaType, tmdb_id: u64) -> Result<ExternalIds> {
        let path = format!("/{}/{}/external_ids", media_type.tmdb_segment(), tmdb_id);
        let ids: TmdbExternalIds = self.api.json(self.request(&path, &[])?).await?;
        Ok(ExternalIds {
            tmdb: Some(tmdb_id),
            imdb: ids.imdb_id.filter(|id| !id.is_empty()),
            tvdb: ids.tvdb_id,
        })
    }
}
