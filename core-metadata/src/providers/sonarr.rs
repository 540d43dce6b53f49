//! Sonarr API Client
//!
//! Series counterpart of the Radarr client. Sonarr keys series by TVDB id,
//! so acquisition needs the reference's `tvdb` id; callers fill it in from
//! TMDb when a list only carried a TMDb id.

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

const PROVIDER: &str = "sonarr";

const SUPPORTED_MODES: &[&str] = &["all", "taglist"];

pub struct SonarrClient {
    arr: ArrClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SonarrSeries {
    title: String,
    year: Option<i32>,
    tvdb_id: Option<u64>,
    tmdb_id: Option<u64>,
    imdb_id: Option<String>,
    #[serde(default)]
    monitored: bool,
    #[serde(default)]
    tags: Vec<i64>,
}

impl SonarrSeries {
    fn into_ref(self) -> ExternalItemRef {
        let mut item = ExternalItemRef::new(MediaType::Series, self.title);
        if let Some(year) = self.year.filter(|y| *y > 0) {
            item = item.with_year(year);
        }
        if let Some(tvdb) = self.tvdb_id.filter(|id| *id > 0) {
            item = item.with_tvdb(tvdb);
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

fn exclusion_tvdb_id(entry: &Value) -> Option<u64> {
    entry.get("tvdbId").and_then(Value::as_u64)
}

impl SonarrClient {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &ArrConfig) -> Self {
        Self {
            arr: ArrClient::new(PROVIDER, http_client, config),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.arr.set_retry_policy(policy);
        self
    }

    async fn monitored_series(&self) -> Result<Vec<SonarrSeries>> {
        let series: Vec<SonarrSeries> = self.arr.get("/series").await?;
        Ok(series.into_iter().filter(|s| s.monitored).collect())
    }
}

#[async_trait]
impl ItemProvider for SonarrClient {
    fn id(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, mode: &str) -> bool {
        SUPPORTED_MODES.contains(&mode)
    }

    #[instrument(skip(self, query), fields(mode = %query.mode))]
    async fn query(&self, query: &ProviderQuery) -> Result<Vec<ExternalItemRef>> {
        if query.media_type != MediaType::Series {
            return Err(invalid_params(PROVIDER, "Sonarr only lists series"));
        }

        let series = match query.mode.as_str() {
            "all" => self.monitored_series().await?,
            "taglist" => {
                let label = query
                    .param_str("tag")
                    .or_else(|| query.value())
                    .ok_or_else(|| invalid_params(PROVIDER, "taglist requires a tag"))?;
                let Some(tag_id) = self.arr.find_tag(&label).await? else {
                    warn!("Sonarr tag '{}' does not exist", label);
                    return Ok(Vec::new());
                };
                self.monitored_series()
                    .await?
                    .into_iter()
                    .filter(|s| s.tags.contains(&tag_id))
                    .collect()
            }
            other => return Err(unsupported(PROVIDER, other)),
        };

        let mut items: Vec<ExternalItemRef> =
            series.into_iter().map(SonarrSeries::into_ref).collect();
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        info!("[Sonarr] {}: fetched {} items", query.mode, items.len());
        Ok(items)
    }

    async fn health_check(&self) -> Result<()> {
        self.arr.system_status().await
    }

    fn acquisition_media_type(&self) -> Option<MediaType> {
        Some(MediaType::Series)
    }

    #[instrument(skip(self, item, overrides), fields(item = %item.label()))]
    async fn request_acquisition(
        &self,
        item: &ExternalItemRef,
        overrides: &AcquisitionOverrides,
    ) -> Result<AcquisitionOutcome> {
        let Some(tvdb_id) = item.ids.tvdb else {
            debug!("No TVDB id, Sonarr cannot add this series");
            return Ok(AcquisitionOutcome::NotFound);
        };

        let excluded = self
            .arr
            .excluded_ids("/importlistexclusion", exclusion_tvdb_id)
            .await?;
        if excluded.contains(&tvdb_id) {
            debug!("Series {} is in exclusion list, skipping", tvdb_id);
            return Ok(AcquisitionOutcome::Excluded);
        }

        let existing: Vec<Value> = self
            .arr
            .get_query("/series", &[("tvdbId", tvdb_id.to_string())])
            .await?;
        if !existing.is_empty() {
            debug!("Series {} already exists in Sonarr", tvdb_id);
            return Ok(AcquisitionOutcome::AlreadyPresent);
        }

        let lookup: Option<Vec<Value>> = self
            .arr
            .get_optional("/series/lookup", &[("term", format!("tvdb:{}", tvdb_id))])
            .await?;
        let Some(Value::Object(mut series)) = lookup.and_then(|r| r.into_iter().next()) else {
            warn!("Series {} not found by Sonarr lookup", tvdb_id);
            return Ok(AcquisitionOutcome::NotFound);
        };

        let target = self.arr.add_target(overrides).await?;
        series.insert("rootFolderPath".into(), json!(target.root_folder));
        series.insert("qualityProfileId".into(), json!(target.quality_profile_id));
        series.insert("monitored".into(), json!(true));
        series.insert("seasonFolder".into(), json!(true));
        series.insert("tags".into(), json!(target.tag_ids));
        series.insert(
            "addOptions".into(),
            json!({
                "searchForMissingEpisodes": self.arr.search_on_add(),
                "monitor": "all"
            }),
        );

        self.arr.post("/series", &Value::Object(series)).await?;
        info!("Added series to Sonarr: {}", item.label());
        Ok(AcquisitionOutcome::Added)
    }
}
