//! Plumbing shared by the Radarr and Sonarr clients (`/api/v3`, `X-Api-Key`)
//!
//! Quality profiles and tags are resolved by name and cached for the life of
//! the client. The import-list exclusions are cached for
//! [`EXCLUSIONS_TTL`] so a batch of acquisitions reads them once.

use crate::api::ApiClient;
use crate::error::{MetadataError, Result};
use crate::pacing::RequestPacer;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use core_library::AcquisitionOverrides;
use core_runtime::config::ArrConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

pub(crate) const EXCLUSIONS_TTL: Duration = Duration::from_secs(600);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub(crate) struct QualityProfile {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RootFolder {
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct Tag {
    #[serde(default)]
    pub id: i64,
    pub label: String,
}

/// Settings an acquisition ends up using after overrides are applied
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AddTarget {
    pub root_folder: String,
    pub quality_profile_id: i64,
    pub tag_ids: Vec<i64>,
}

pub(crate) struct ArrClient {
    provider: &'static str,
    api: ApiClient,
    base_url: String,
    api_key: String,
    defaults: AcquisitionOverrides,
    search_on_add: bool,
    profiles: Mutex<HashMap<String, i64>>,
    tags: Mutex<HashMap<String, i64>>,
    exclusions: Mutex<Option<(Instant, HashSet<u64>)>>,
}

impl ArrClient {
    pub(crate) fn new(
        provider: &'static str,
        http_client: Arc<dyn HttpClient>,
        config: &ArrConfig,
    ) -> Self {
        Self {
            provider,
            api: ApiClient::new(provider, http_client, RequestPacer::unlimited()),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            defaults: AcquisitionOverrides {
                root_folder: Some(config.root_folder.clone()),
                quality_profile: Some(config.quality_profile.clone()),
                tag: Some(config.tag.clone()).filter(|t| !t.is_empty()),
            },
            search_on_add: config.search_on_add,
            profiles: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            exclusions: Mutex::new(None),
        }
    }

    pub(crate) fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.api.set_retry_policy(policy);
    }

    pub(crate) fn search_on_add(&self) -> bool {
        self.search_on_add
    }

    pub(crate) fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}/api/v3{}", self.base_url, path))
            .header("X-Api-Key", self.api_key.clone())
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.api.json(self.request(HttpMethod::Get, path)).await
    }

    pub(crate) async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let request = self
            .request(HttpMethod::Get, path)
            .query(params.iter().map(|(k, v)| (*k, v.as_str())))?;
        self.api.json(request).await
    }

    /// GET where 404 means "unknown"
    pub(crate) async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        let request = self
            .request(HttpMethod::Get, path)
            .query(params.iter().map(|(k, v)| (*k, v.as_str())))?;
        let response = self.api.send_raw(request).await?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = self.api.check(response)?;
        self.api.decode(&response).map(Some)
    }

    pub(crate) async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpResponse> {
        let request = self.request(HttpMethod::Post, path).json(body)?;
        self.api.send(request).await
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, response: &HttpResponse) -> Result<T> {
        self.api.decode(response)
    }

    pub(crate) async fn system_status(&self) -> Result<()> {
        self.api
            .send(self.request(HttpMethod::Get, "/system/status"))
            .await?;
        Ok(())
    }

    /// Ids on the exclusion list, cached for [`EXCLUSIONS_TTL`]
    pub(crate) async fn excluded_ids(
        &self,
        path: &str,
        id_of: fn(&serde_json::Value) -> Option<u64>,
    ) -> Result<HashSet<u64>> {
        let mut cache = self.exclusions.lock().await;
        if let Some((loaded_at, ids)) = cache.as_ref() {
            if loaded_at.elapsed() < EXCLUSIONS_TTL {
                return Ok(ids.clone());
            }
        }

        let entries: Vec<serde_json::Value> = self.get(path).await?;
        let ids: HashSet<u64> = entries.iter().filter_map(id_of).collect();
        debug!(provider = self.provider, count = ids.len(), "Loaded exclusion list");
        *cache = Some((Instant::now(), ids.clone()));
        Ok(ids)
    }

    async fn quality_profile_id(&self, name: &str) -> Result<i64> {
        let key = name.to_lowercase();
        let mut cache = self.profiles.lock().await;
        if let Some(id) = cache.get(&key) {
            return Ok(*id);
        }

        let profiles: Vec<QualityProfile> = self.get("/qualityprofile").await?;
        for profile in &profiles {
            cache.insert(profile.name.to_lowercase(), profile.id);
        }
        cache.get(&key).copied().ok_or_else(|| MetadataError::InvalidParams {
            provider: self.provider.to_string(),
            message: format!("quality profile '{}' not found", name),
        })
    }

    /// Exact root folder, else the folder containing `path`, else the first
    async fn root_folder(&self, path: &str) -> Result<String> {
        let folders: Vec<RootFolder> = self.get("/rootfolder").await?;
        folders
            .iter()
            .find(|f| f.path == path)
            .or_else(|| folders.iter().find(|f| path.starts_with(&f.path)))
            .or_else(|| folders.first())
            .map(|f| f.path.clone())
            .ok_or_else(|| MetadataError::InvalidParams {
                provider: self.provider.to_string(),
                message: "no root folder configured".to_string(),
            })
    }

    /// Id of the tag labelled `label`, if it exists
    pub(crate) async fn find_tag(&self, label: &str) -> Result<Option<i64>> {
        let key = label.to_lowercase();
        let mut cache = self.tags.lock().await;
        if let Some(id) = cache.get(&key) {
            return Ok(Some(*id));
        }
        let tags: Vec<Tag> = self.get("/tag").await?;
        for tag in &tags {
            cache.insert(tag.label.to_lowercase(), tag.id);
        }
        Ok(cache.get(&key).copied())
    }

    async fn get_or_create_tag(&self, label: &str) -> Result<i64> {
        if let Some(id) = self.find_tag(label).await? {
            return Ok(id);
        }

        let response = self
            .post(
                "/tag",
                &Tag {
                    id: 0,
                    label: label.to_string(),
                },
            )
            .await?;
        let created: Tag = self.decode(&response)?;
        info!(provider = self.provider, "Created tag '{}' with ID {}", label, created.id);
        self.tags
            .lock()
            .await
            .insert(label.to_lowercase(), created.id);
        Ok(created.id)
    }

    /// Resolve the folder, profile and tag an add should use
    pub(crate) async fn add_target(&self, overrides: &AcquisitionOverrides) -> Result<AddTarget> {
        let settings = overrides.clone().or(&self.defaults);
        let profile_name = settings.quality_profile.unwrap_or_default();
        let quality_profile_id = self.quality_profile_id(&profile_name).await?;
        let root_folder = self
            .root_folder(&settings.root_folder.unwrap_or_default())
            .await?;
        let tag_ids = match settings.tag.filter(|t| !t.is_empty()) {
            Some(tag) => vec![self.get_or_create_tag(&tag).await?],
            None => Vec::new(),
        };
        Ok(AddTarget {
            root_folder,
            quality_profile_id,
            tag_ids,
        })
    }
}
