//! Trakt API Client
//!
//! Charts and user lists from Trakt (`https://api.trakt.tv`, API version 2).
//!
//! ## API Endpoints
//!
//! - **Charts**: `GET /{movies|shows}/{trending|popular}`,
//!   `GET /{movies|shows}/watched/{period}`
//! - **Lists**: `GET /users/{user}/lists/{list}/items/{movies|shows}`
//!
//! Requests carry the `trakt-api-key` and `trakt-api-version` headers. When a
//! [`TraktTokenSource`] is attached and holds a credential, its bearer token
//! is sent too, which private lists require. An expired authorization fails
//! the builder immediately with [`MetadataError::AuthExpired`]; Trakt is not
//! called in that case.
//!
//! ## Rate Limiting
//!
//! One request per second.

use super::{invalid_params, unsupported, ItemProvider, ProviderQuery};
use crate::api::ApiClient;
use crate::error::{MetadataError, Result};
use crate::pacing::RequestPacer;
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use core_auth::{AuthError, TokenManager};
use core_library::{ExternalItemRef, ItemMetadata, MediaType};
use core_runtime::config::TraktConfig;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Trakt API base URL
pub const TRAKT_API_BASE: &str = "https://api.trakt.tv";

const PROVIDER: &str = "trakt";

const SUPPORTED_MODES: &[&str] = &["trending", "popular", "watched", "chart", "list"];

const WATCHED_PERIODS: &[&str] = &["daily", "weekly", "monthly", "yearly", "all"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of the Trakt bearer token
#[async_trait]
pub trait TraktTokenSource: Send + Sync {
    /// `Ok(None)` when no credential exists
    async fn access_token(&self) -> core_auth::Result<Option<String>>;
}

#[async_trait]
impl TraktTokenSource for TokenManager {
    async fn access_token(&self) -> core_auth::Result<Option<String>> {
        TokenManager::access_token(self).await
    }
}

pub struct TraktClient {
    api: ApiClient,
    base_url: String,
    client_id: String,
    tokens: Option<Arc<dyn TraktTokenSource>>,
}

#[derive(Debug, Default, Deserialize)]
struct TraktIds {
    tmdb: Option<u64>,
    imdb: Option<String>,
    tvdb: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TraktItem {
    title: Option<String>,
    year: Option<i32>,
    #[serde(default)]
    ids: TraktIds,
    rating: Option<f64>,
    votes: Option<u64>,
    language: Option<String>,
}

impl TraktItem {
    fn into_ref(self, media_type: MediaType) -> ExternalItemRef {
        let mut item = ExternalItemRef::new(media_type, self.title.unwrap_or_default())
            .with_metadata(ItemMetadata {
                vote_average: self.rating,
                vote_count: self.votes,
                original_language: self.language,
                genre_ids: Vec::new(),
            });
        if let Some(year) = self.year {
            item = item.with_year(year);
        }
        if let Some(tmdb) = self.ids.tmdb {
            item = item.with_tmdb(tmdb);
        }
        if let Some(imdb) = self.ids.imdb.filter(|id| !id.is_empty()) {
            item = item.with_imdb(imdb);
        }
        if let Some(tvdb) = self.ids.tvdb {
            item = item.with_tvdb(tvdb);
        }
        item
    }
}

/// Chart endpoints wrap entries (`{"watchers": 12, "movie": {...}}`), lists
/// tag them (`{"type": "show", "show": {...}}`), popular returns them bare.
fn unwrap_entry(entry: Value, media_type: MediaType) -> Option<TraktItem> {
    let key = match media_type {
        MediaType::Movie => "movie",
        MediaType::Series => "show",
    };
    let inner = match entry {
        Value::Object(mut map) if map.contains_key(key) => map.remove(key)?,
        Value::Object(map) if map.contains_key("ids") => Value::Object(map),
        _ => return None,
    };
    serde_json::from_value(inner).ok()
}

fn plural(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Movie => "movies",
        MediaType::Series => "shows",
    }
}

impl TraktClient {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &TraktConfig) -> Self {
        Self {
            api: ApiClient::new(
                PROVIDER,
                http_client,
                RequestPacer::with_min_delay(Duration::from_secs(1)),
            ),
            base_url: TRAKT_API_BASE.to_string(),
            client_id: config.client_id.clone(),
            tokens: None,
        }
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TraktTokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
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

    async fn bearer(&self) -> Result<Option<String>> {
        let Some(tokens) = &self.tokens else {
            return Ok(None);
        };
        match tokens.access_token().await {
            Ok(token) => Ok(token),
            Err(AuthError::NotAuthorized) => {
                debug!("Trakt authorization pending, calling anonymously");
                Ok(None)
            }
            Err(e) => {
                if e.requires_reauthorization() {
                    warn!("Trakt authorization expired, re-run the device flow");
                }
                Err(MetadataError::from(e))
            }
        }
    }

    async fn request(&self, path: &str, params: &[(&str, String)]) -> Result<HttpRequest> {
        let mut request = HttpRequest::get(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .header("trakt-api-key", self.client_id.clone())
            .header("trakt-api-version", "2")
            .timeout(REQUEST_TIMEOUT);
        if let Some(token) = self.bearer().await? {
            request = request.bearer_token(token);
        }
        Ok(request.query(params.iter().map(|(k, v)| (*k, v.as_str())))?)
    }

    async fn fetch(
        &self,
        path: &str,
        params: &[(&str, String)],
        media_type: MediaType,
        limit: Option<usize>,
    ) -> Result<Vec<ExternalItemRef>> {
        let entries: Vec<Value> = self.api.json(self.request(path, params).await?).await?;
        let mut items: Vec<ExternalItemRef> = entries
            .into_iter()
            .filter_map(|entry| unwrap_entry(entry, media_type))
            .map(|item| item.into_ref(media_type))
            .collect();
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    fn chart_path(&self, chart: &str, query: &ProviderQuery) -> Result<String> {
        let kind = plural(query.media_type);
        match chart {
            "trending" | "popular" => Ok(format!("/{}/{}", kind, chart)),
            "watched" => {
                let period = query
                    .param_str("time_period")
                    .or_else(|| query.param_str("period"))
                    .unwrap_or_else(|| "weekly".to_string());
                if !WATCHED_PERIODS.contains(&period.as_str()) {
                    return Err(invalid_params(
                        PROVIDER,
                        format!("unknown time_period '{}'", period),
                    ));
                }
                Ok(format!("/{}/watched/{}", kind, period))
            }
            other => Err(invalid_params(PROVIDER, format!("unknown chart '{}'", other))),
        }
    }

    /// `user/list`, a trakt.tv list URL, or `user` + `list` parameters
    fn list_path(&self, query: &ProviderQuery) -> Result<String> {
        let (user, list) = match (query.param_str("user"), query.param_str("list")) {
            (Some(user), Some(list)) => (user, list),
            _ => {
                let value = query
                    .value()
                    .ok_or_else(|| invalid_params(PROVIDER, "list requires 'user' and 'list'"))?;
                let trimmed = value
                    .trim()
                    .trim_start_matches("https://trakt.tv/users/")
                    .trim_end_matches('/');
                let parts: Vec<&str> = trimmed
                    .split('/')
                    .filter(|p| !p.is_empty() && *p != "lists")
                    .collect();
                match parts.as_slice() {
                    [user, list] => (user.to_string(), list.to_string()),
                    _ => {
                        return Err(invalid_params(
                            PROVIDER,
                            format!("cannot read a user/list pair from '{}'", value),
                        ))
                    }
                }
            }
        };
        Ok(format!(
            "/users/{}/lists/{}/items/{}",
            user,
            list,
            plural(query.media_type)
        ))
    }
}

#[async_trait]
impl ItemProvider for TraktClient {
    fn id(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, mode: &str) -> bool {
        SUPPORTED_MODES.contains(&mode)
    }

    #[instrument(skip(self, query), fields(mode = %query.mode, media_type = %query.media_type))]
    async fn query(&self, query: &ProviderQuery) -> Result<Vec<ExternalItemRef>> {
        let limit = query.limit_or_default();
        let path = match query.mode.as_str() {
            "trending" | "popular" | "watched" => self.chart_path(&query.mode, query)?,
            "chart" => {
                let chart = query
                    .param_str("chart")
                    .or_else(|| query.value())
                    .unwrap_or_else(|| "trending".to_string());
                self.chart_path(&chart, query)?
            }
            "list" => self.list_path(query)?,
            other => return Err(unsupported(PROVIDER, other)),
        };

        // Lists come back whole unless the rule caps them
        let mut params = vec![("extended", "full".to_string())];
        let limit = if query.mode == "list" {
            query.limit
        } else {
            params.push(("limit", limit.to_string()));
            Some(limit)
        };

        let items = self.fetch(&path, &params, query.media_type, limit).await?;
        info!("[Trakt] {}: fetched {} items", query.mode, items.len());
        Ok(items)
    }

    async fn health_check(&self) -> Result<()> {
        let request = self
            .request("/movies/trending", &[("limit", "1".to_string())])
            .await?;
        self.api.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{query_param, FakeHttp};
    use bridge_traits::http::HttpMethod;
    use mockall::mock;
    use serde_json::json;

    mock! {
        Tokens {}

        #[async_trait]
        impl TraktTokenSource for Tokens {
            async fn access_token(&self) -> core_auth::Result<Option<String>>;
        }
    }

    fn client(http: Arc<FakeHttp>) -> TraktClient {
        TraktClient::new(http, &TraktConfig::new("trakt-id", "trakt-secret"))
            .with_base_url("http://trakt.test")
            .with_retry_policy(RetryPolicy::none())
            .with_pacer(RequestPacer::unlimited())
    }

    fn movie(title: &str, year: i32, tmdb: u64, imdb: &str) -> Value {
        json!({
            "title": title,
            "year": year,
            "ids": {"trakt": 1, "slug": "x", "imdb": imdb, "tmdb": tmdb},
            "rating": 8.1,
            "votes": 5000,
            "language": "en"
        })
    }

    #[tokio::test]
    async fn test_trending_movies_unwraps_entries() {
        let http = Arc::new(FakeHttp::default());
        http.get(
            "/movies/trending",
            json!([
                {"watchers": 40, "movie": movie("Dune: Part Two", 2024, 693134, "tt15239678")},
                {"watchers": 12, "movie": movie("Oppenheimer", 2023, 872585, "tt15398776")}
            ]),
        );
        let trakt = client(http.clone());

        let items = trakt
            .query(&ProviderQuery::new("trending", MediaType::Movie).with_limit(10))
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Dune: Part Two");
        assert_eq!(items[0].ids.tmdb, Some(693134));
        assert_eq!(items[1].ids.imdb.as_deref(), Some("tt15398776"));

        let request = &http.requests()[0];
        assert_eq!(request.headers.get("trakt-api-key").map(String::as_str), Some("trakt-id"));
        assert_eq!(request.headers.get("trakt-api-version").map(String::as_str), Some("2"));
        assert!(!request.headers.contains_key("Authorization"));
        assert_eq!(query_param(&request.url, "limit").as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_popular_shows_are_bare() {
        let http = Arc::new(FakeHttp::default());
        http.get(
            "/shows/popular",
            json!([{"title": "The Wire", "year": 2002, "ids": {"tmdb": 1438, "tvdb": 79126}}]),
        );
        let trakt = client(http);

        let items = trakt
            .query(&ProviderQuery::new("popular", MediaType::Series))
            .await
            .unwrap();
        assert_eq!(items[0].ids.tvdb, Some(79126));
        assert_eq!(items[0].media_type, MediaType::Series);
    }

    #[tokio::test]
    async fn test_watched_chart_with_period() {
        let http = Arc::new(FakeHttp::default());
        http.get("/movies/watched/monthly", json!([]));
        let trakt = client(http.clone());

        let query = ProviderQuery::new("chart", MediaType::Movie)
            .with_param("chart", "watched")
            .with_param("time_period", "monthly");
        assert!(trakt.query(&query).await.unwrap().is_empty());
        assert_eq!(http.requests_to(HttpMethod::Get, "/movies/watched/monthly").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_period_is_rejected() {
        let trakt = client(Arc::new(FakeHttp::default()));
        let query = ProviderQuery::new("watched", MediaType::Movie)
            .with_param("time_period", "fortnightly");
        let err = trakt.query(&query).await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_list_accepts_user_slash_list() {
        let http = Arc::new(FakeHttp::default());
        http.get(
            "/users/giladg/lists/latest-releases/items/movies",
            json!([{"type": "movie", "movie": movie("Alien: Romulus", 2024, 945961, "tt18412256")}]),
        );
        let trakt = client(http);

        let query =
            ProviderQuery::new("list", MediaType::Movie).with_param("value", "giladg/latest-releases");
        let items = trakt.query(&query).await.unwrap();
        assert_eq!(items[0].ids.tmdb, Some(945961));
    }

    #[tokio::test]
    async fn test_error_body_is_cut_on_a_char_boundary() {
        let http = Arc::new(FakeHttp::default());
        // The JSON quote takes byte 0, so 'é' straddles bytes 199 and 200
        let body = format!("{}é…", "x".repeat(198));
        http.route(HttpMethod::Get, "/movies/popular", 503, json!(body));
        let trakt = client(http);

        let err = trakt
            .query(&ProviderQuery::new("popular", MediaType::Movie))
            .await
            .unwrap_err();
        match err {
            MetadataError::Http { status, message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message.chars().count(), 200);
                assert!(message.ends_with('é'));
            }
            other => panic!("expected an HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_without_limit_returns_every_entry() {
        let http = Arc::new(FakeHttp::default());
        let entries: Vec<Value> = (0..50u64)
            .map(|i| json!({"type": "movie", "movie": movie(&format!("Film {}", i), 2020, 1000 + i, "")}))
            .collect();
        http.get("/users/giladg/lists/archive/items/movies", json!(entries));
        let trakt = client(http.clone());

        let query =
            ProviderQuery::new("list", MediaType::Movie).with_param("value", "giladg/archive");
        let items = trakt.query(&query).await.unwrap();
        assert_eq!(items.len(), 50);
        assert_eq!(query_param(&http.requests()[0].url, "limit"), None);

        let capped = trakt.query(&query.clone().with_limit(5)).await.unwrap();
        assert_eq!(capped.len(), 5);
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent_when_available() {
        let http = Arc::new(FakeHttp::default());
        http.get("/movies/popular", json!([]));
        let mut tokens = MockTokens::new();
        tokens
            .expect_access_token()
            .returning(|| Ok(Some("access-1".to_string())));
        let trakt = client(http.clone()).with_token_source(Arc::new(tokens));

        trakt
            .query(&ProviderQuery::new("popular", MediaType::Movie))
            .await
            .unwrap();
        assert_eq!(
            http.requests()[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer access-1")
        );
    }

    #[tokio::test]
    async fn test_pending_authorization_calls_anonymously() {
        let http = Arc::new(FakeHttp::default());
        http.get("/movies/popular", json!([]));
        let mut tokens = MockTokens::new();
        tokens
            .expect_access_token()
            .returning(|| Err(AuthError::NotAuthorized));
        let trakt = client(http.clone()).with_token_source(Arc::new(tokens));

        trakt
            .query(&ProviderQuery::new("popular", MediaType::Movie))
            .await
            .unwrap();
        assert!(!http.requests()[0].headers.contains_key("Authorization"));
    }

    #[tokio::test]
    async fn test_expired_authorization_fails_fast() {
        let http = Arc::new(FakeHttp::default());
        let mut tokens = MockTokens::new();
        tokens
            .expect_access_token()
            .times(1)
            .returning(|| Err(AuthError::AuthExpired("refresh rejected".to_string())));
        let trakt = client(http.clone()).with_token_source(Arc::new(tokens));

        let err = trakt
            .query(&ProviderQuery::new("trending", MediaType::Movie))
            .await
            .unwrap_err();
        assert!(err.is_auth_expired());
        assert!(http.requests().is_empty());
    }
}
