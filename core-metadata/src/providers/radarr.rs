//! Radarr API Client
//!
//! Lists monitored movies (`radarr_all`, `radarr_taglist`) and adds missing
//! movies for download.
//!
//! ## Acquisition flow
//!
//! 1. skip movies on the import-list exclusions (`/exclusions`)
//! 2. skip movies Radarr already tracks (`/movie?tmdbId=`)
//! 3. look the movie up (`/movie/lookup/tmdb?tmdbId=`)
//! 4. resolve quality profile, root folder and tag, then `POST /movie`

use super::arr::ArrClient;
use super::{invalid_params, unsupported, AcquisitionOutcome, ItemProvider, ProviderQuery};
use crate::error::Result;
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, RetryPolicy};
use core_library::{AcquisitionOverrides, ExternalItemRef, MediaType};
use core_runtime::config::ArrConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const PROVIDER: &str = "radarr";

const SUPPORTED_MODES: &[&str] = &["all", "taglist"];

pub struct RadarrClient {
    arr: ArrClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RadarrMovie {
    title: String,
    year: Option<i32>,
    tmdb_id: Option<u64>,
    imdb_id: Option<String>,
    #[serde(default)]
    monitored: bool,
    #[serde(default)]
    tags: Vec<i64>,
}

impl RadarrMovie {
    fn into_ref(self) -> ExternalItemRef {
        let mut item = ExternalItemRef::new(MediaType::Movie, self.title);
        if let Some(year) = self.year.filter(|y| *y > 0) {
            item = item.with_year(year);
        }
        if let Some(tmdb) = self.tmdb_id.filter(|id| *id > 0) {
            item = item.with_tmdb(tmdb);
        }
        if let Some(imdb) = self.imdb_id.filter(|id| !id.is_empty()) {
            item = item.with_imdb(imdb);
        }
        item
    }
}

fn exclusion_tmdb_id(entry: &Value) -> Option<u64> {
    entry.get("tmdbId").and_then(Value::as_u64)
}

impl RadarrClient {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &ArrConfig) -> Self {
        Self {
            arr: ArrClient::new(PROVIDER, http_client, config),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.arr.set_retry_policy(policy);
        self
    }

    async fn monitored_movies(&self) -> Result<Vec<RadarrMovie>> {
        let movies: Vec<RadarrMovie> = self.arr.get("/movie").await?;
        Ok(movies.into_iter().filter(|m| m.monitored).collect())
    }
}

#[async_trait]
impl ItemProvider for RadarrClient {
    fn id(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, mode: &str) -> bool {
        SUPPORTED_MODES.contains(&mode)
    }

    #[instrument(skip(self, query), fields(mode = %query.mode))]
    async fn query(&self, query: &ProviderQuery) -> Result<Vec<ExternalItemRef>> {
        if query.media_type != MediaType::Movie {
            return Err(invalid_params(PROVIDER, "Radarr only lists movies"));
        }

        let movies = match query.mode.as_str() {
            "all" => self.monitored_movies().await?,
            "taglist" => {
                let label = query
                    .param_str("tag")
                    .or_else(|| query.value())
                    .ok_or_else(|| invalid_params(PROVIDER, "taglist requires a tag"))?;
                let Some(tag_id) = self.arr.find_tag(&label).await? else {
                    warn!("Radarr tag '{}' does not exist", label);
                    return Ok(Vec::new());
                };
                self.monitored_movies()
                    .await?
                    .into_iter()
                    .filter(|m| m.tags.contains(&tag_id))
                    .collect()
            }
            other => return Err(unsupported(PROVIDER, other)),
        };

        let mut items: Vec<ExternalItemRef> = movies.into_iter().map(RadarrMovie::into_ref).collect();
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        info!("[Radarr] {}: fetched {} items", query.mode, items.len());
        Ok(items)
    }

    async fn health_check(&self) -> Result<()> {
        self.arr.system_status().await
    }

    fn acquisition_media_type(&self) -> Option<MediaType> {
        Some(MediaType::Movie)
    }

    #[instrument(skip(self, item, overrides), fields(item = %item.label()))]
    async fn request_acquisition(
        &self,
        item: &ExternalItemRef,
        overrides: &AcquisitionOverrides,
    ) -> Result<AcquisitionOutcome> {
        let Some(tmdb_id) = item.ids.tmdb else {
            debug!("No TMDb id, Radarr cannot add this movie");
            return Ok(AcquisitionOutcome::NotFound);
        };

        let excluded = self.arr.excluded_ids("/exclusions", exclusion_tmdb_id).await?;
        if excluded.contains(&tmdb_id) {
            debug!("Movie {} is in exclusion list, skipping", tmdb_id);
            return Ok(AcquisitionOutcome::Excluded);
        }

        let existing: Vec<Value> = self
            .arr
            .get_query("/movie", &[("tmdbId", tmdb_id.to_string())])
            .await?;
        if !existing.is_empty() {
            debug!("Movie {} already exists in Radarr", tmdb_id);
            return Ok(AcquisitionOutcome::AlreadyPresent);
        }

        let lookup: Option<Value> = self
            .arr
            .get_optional("/movie/lookup/tmdb", &[("tmdbId", tmdb_id.to_string())])
            .await?;
        let Some(Value::Object(mut movie)) = lookup else {
            warn!("Movie {} not found by Radarr lookup", tmdb_id);
            return Ok(AcquisitionOutcome::NotFound);
        };

        let target = self.arr.add_target(overrides).await?;
        movie.insert("rootFolderPath".into(), json!(target.root_folder));
        movie.insert("qualityProfileId".into(), json!(target.quality_profile_id));
        movie.insert("monitored".into(), json!(true));
        movie.insert("minimumAvailability".into(), json!("announced"));
        movie.insert("tags".into(), json!(target.tag_ids));
        movie.insert(
            "addOptions".into(),
            json!({ "searchForMovie": self.arr.search_on_add() }),
        );

        self.arr.post("/movie", &Value::Object(movie)).await?;
        info!("Added movie to Radarr: {}", item.label());
        Ok(AcquisitionOutcome::Added)
    }
}
