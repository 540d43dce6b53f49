//! # Jellyfin Client
//!
//! Read and write access to the Jellyfin catalogue: libraries, their
//! movies/series with provider ids, and BoxSet collections.
//!
//! ## API Endpoints
//!
//! - **Libraries**: `GET /Library/VirtualFolders`
//! - **Items**: `GET /Items?ParentId={library}&Recursive=true&Fields=ProviderIds,ProductionYear`
//! - **Collections**: `GET /Items?IncludeItemTypes=BoxSet`, `POST /Collections`,
//!   `POST|DELETE /Collections/{id}/Items?Ids=...`
//! - **Health**: `GET /System/Info`
//!
//! Requests authenticate with the `X-Emby-Token` header.

use crate::error::{LibraryError, Result};
use crate::index::LibraryIndex;
use crate::models::{
    CollectionState, ExternalIds, ExternalItemRef, ItemId, LibraryInfo, LibraryItem, MediaType,
};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use core_runtime::config::JellyfinConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Ids per add/remove request
pub const WRITE_BATCH_SIZE: usize = 100;

const PAGE_SIZE: usize = 500;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ERROR_BODY_CHARS: usize = 200;

/// Basic server identity returned by the health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_name: String,
    pub version: String,
}

/// Media server operations the engine depends on
#[async_trait]
pub trait MediaServer: Send + Sync {
    async fn list_libraries(&self) -> Result<Vec<LibraryInfo>>;

    /// Every movie or series of a library with its provider ids
    async fn library_items(&self, library: &LibraryInfo) -> Result<Vec<LibraryItem>>;

    /// Look up one reference. Bulk resolution should build a
    /// [`LibraryIndex`] once instead.
    async fn find_item_by_external_id(
        &self,
        library: &LibraryInfo,
        reference: &ExternalItemRef,
    ) -> Result<Option<ItemId>> {
        let index = LibraryIndex::build(self.library_items(library).await?);
        Ok(index.lookup(reference).cloned())
    }

    /// Current members of the collection named exactly `name`
    async fn get_collection_members(
        &self,
        library: &LibraryInfo,
        name: &str,
    ) -> Result<CollectionState>;

    /// Create a collection holding `items`, returning its id
    async fn create_collection(&self, name: &str, items: &[ItemId]) -> Result<String>;

    async fn add_items_to_collection(&self, collection_id: &str, items: &[ItemId]) -> Result<()>;

    async fn remove_items_from_collection(
        &self,
        collection_id: &str,
        items: &[ItemId],
    ) -> Result<()>;

    async fn health_check(&self) -> Result<ServerInfo>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VirtualFolder {
    name: String,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    collection_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<BaseItem>,
    #[serde(default)]
    total_record_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BaseItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    production_year: Option<i32>,
    #[serde(default, rename = "Type")]
    item_type: Option<String>,
    #[serde(default)]
    provider_ids: HashMap<String, String>,
}

impl BaseItem {
    fn external_ids(&self) -> ExternalIds {
        let lookup = |name: &str| {
            self.provider_ids
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        ExternalIds {
            tmdb: lookup("Tmdb").and_then(|v| v.parse().ok()),
            imdb: lookup("Imdb"),
            tvdb: lookup("Tvdb").and_then(|v| v.parse().ok()),
        }
        .normalized()
    }

    fn media_type(&self) -> Option<MediaType> {
        match self.item_type.as_deref()? {
            "Movie" => Some(MediaType::Movie),
            "Series" => Some(MediaType::Series),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedCollection {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemInfo {
    #[serde(default)]
    server_name: String,
    #[serde(default)]
    version: String,
}

/// HTTP implementation of [`MediaServer`]
pub struct JellyfinClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    api_key: String,
    retry_policy: RetryPolicy,
}

impl JellyfinClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &JellyfinConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self::new(http_client, config.url.clone(), config.api_key.clone())
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}{}", self.base_url, path))
            .header("X-Emby-Token", self.api_key.clone())
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?;

        if !response.is_success() {
            let message = response
                .text()
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_CHARS)
                .collect();
            return Err(LibraryError::Http {
                status: response.status,
                message,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let request = self.request(HttpMethod::Get, path).query(query.iter().cloned())?;
        let response = self.send(request).await?;
        response
            .json()
            .map_err(|e| LibraryError::Parse(format!("{}: {}", path, e)))
    }

    /// Page through `/Items` with the given filters
    async fn all_items(&self, filters: &[(&str, String)]) -> Result<Vec<BaseItem>> {
        let mut items = Vec::new();

        loop {
            let mut query = filters.to_vec();
            query.push(("StartIndex", items.len().to_string()));
            query.push(("Limit", PAGE_SIZE.to_string()));

            let page: ItemsResponse = self.get_json("/Items", &query).await?;
            let received = page.items.len();
            items.extend(page.items);

            let total = page.total_record_count.unwrap_or(items.len());
            if received == 0 || items.len() >= total {
                break;
            }
        }
        Ok(items)
    }

    async fn find_boxset(&self, name: &str) -> Result<Option<BaseItem>> {
        let candidates = self
            .all_items(&[
                ("IncludeItemTypes", "BoxSet".to_string()),
                ("Recursive", "true".to_string()),
                ("SearchTerm", name.to_string()),
            ])
            .await?;
        Ok(candidates.into_iter().find(|item| item.name == name))
    }

    /// A failure after the first batch reports how many items landed
    async fn write_batches(&self, method: HttpMethod, collection_id: &str, items: &[ItemId]) -> Result<()> {
        let path = format!("/Collections/{}/Items", collection_id);
        let mut written = 0;
        for batch in items.chunks(WRITE_BATCH_SIZE) {
            if let Err(e) = self.write_batch(method, &path, batch).await {
                return Err(LibraryError::partial_write(collection_id, written, e));
            }
            written += batch.len();
        }
        Ok(())
    }

    async fn write_batch(&self, method: HttpMethod, path: &str, batch: &[ItemId]) -> Result<()> {
        let request = self
            .request(method, path)
            .query([("Ids", join_ids(batch))])?;
        self.send(request).await?;
        Ok(())
    }
}

fn join_ids(items: &[ItemId]) -> String {
    items
        .iter()
        .map(ItemId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl MediaServer for JellyfinClient {
    #[instrument(skip(self))]
    async fn list_libraries(&self) -> Result<Vec<LibraryInfo>> {
        let folders: Vec<VirtualFolder> = self.get_json("/Library/VirtualFolders", &[]).await?;

        let libraries: Vec<LibraryInfo> = folders
            .into_iter()
            .filter_map(|folder| {
                let id = folder.item_id?;
                Some(LibraryInfo {
                    id,
                    media_type: folder
                        .collection_type
                        .as_deref()
                        .and_then(MediaType::from_collection_type),
                    name: folder.name,
                })
            })
            .collect();

        debug!(count = libraries.len(), "Listed Jellyfin libraries");
        Ok(libraries)
    }

    #[instrument(skip(self, library), fields(library = %library.name))]
    async fn library_items(&self, library: &LibraryInfo) -> Result<Vec<LibraryItem>> {
        let Some(media_type) = library.media_type else {
            warn!("Library holds neither movies nor shows");
            return Ok(Vec::new());
        };
        let item_type = match media_type {
            MediaType::Movie => "Movie",
            MediaType::Series => "Series",
        };

        let items = self
            .all_items(&[
                ("ParentId", library.id.clone()),
                ("Recursive", "true".to_string()),
                ("IncludeItemTypes", item_type.to_string()),
                ("Fields", "ProviderIds,ProductionYear".to_string()),
            ])
            .await?;

        let items: Vec<LibraryItem> = items
            .into_iter()
            .map(|item| LibraryItem {
                ids: item.external_ids(),
                media_type: item.media_type().unwrap_or(media_type),
                id: ItemId::new(item.id),
                title: item.name,
                year: item.production_year,
            })
            .collect();

        debug!(count = items.len(), "Fetched library items");
        Ok(items)
    }

    #[instrument(skip(self, library), fields(library = %library.name))]
    async fn get_collection_members(
        &self,
        library: &LibraryInfo,
        name: &str,
    ) -> Result<CollectionState> {
        let Some(boxset) = self.find_boxset(name).await? else {
            debug!(collection = %name, "Collection does not exist yet");
            return Ok(CollectionState::missing());
        };

        let children = self
            .all_items(&[("ParentId", boxset.id.clone())])
            .await?;
        let members: BTreeSet<ItemId> = children
            .into_iter()
            .map(|item| ItemId::new(item.id))
            .collect();

        debug!(collection = %name, members = members.len(), "Fetched collection members");
        Ok(CollectionState::existing(boxset.id, members))
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn create_collection(&self, name: &str, items: &[ItemId]) -> Result<String> {
        let (first, rest) = items.split_at(items.len().min(WRITE_BATCH_SIZE));

        let mut query = vec![("Name", name.to_string())];
        if !first.is_empty() {
            query.push(("Ids", join_ids(first)));
        }
        let request = self.request(HttpMethod::Post, "/Collections").query(query)?;
        let created: CreatedCollection = self
            .send(request)
            .await?
            .json()
            .map_err(|e| LibraryError::Parse(format!("/Collections: {}", e)))?;

        if !rest.is_empty() {
            if let Err(e) = self.add_items_to_collection(&created.id, rest).await {
                return Err(LibraryError::partial_write(&created.id, first.len(), e));
            }
        }

        info!(collection = %name, id = %created.id, "Created Jellyfin collection");
        Ok(created.id)
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn add_items_to_collection(&self, collection_id: &str, items: &[ItemId]) -> Result<()> {
        self.write_batches(HttpMethod::Post, collection_id, items).await
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn remove_items_from_collection(
        &self,
        collection_id: &str,
        items: &[ItemId],
    ) -> Result<()> {
        self.write_batches(HttpMethod::Delete, collection_id, items).await
    }

    async fn health_check(&self) -> Result<ServerInfo> {
        let info: SystemInfo = self.get_json("/System/Info", &[]).await?;
        Ok(ServerInfo {
            server_name: info.server_name,
            version: info.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers by path prefix and records every request
    #[derive(Default)]
    struct FakeHttp {
        routes: Mutex<Vec<(HttpMethod, String, Vec<HttpResponse>)>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeHttp {
        fn route(&self, method: HttpMethod, path: &str, status: u16, body: serde_json::Value) {
            let mut routes = self.routes.lock().unwrap();
            let response = HttpResponse::new(status, body.to_string());
            match routes
                .iter_mut()
                .find(|(m, p, _)| *m == method && p == path)
            {
                Some((_, _, queue)) => queue.push(response),
                None => routes.push((method, path.to_string(), vec![response])),
            }
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttp {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let path = request
                .url
                .trim_start_matches("http://jf.test")
                .split('?')
                .next()
                .unwrap_or_default()
                .to_string();

            let mut routes = self.routes.lock().unwrap();
            let Some((_, _, queue)) = routes
                .iter_mut()
                .find(|(m, p, _)| *m == request.method && *p == path)
            else {
                return Ok(HttpResponse::new(404, ""));
            };
            if queue.len() > 1 {
                Ok(queue.remove(0))
            } else {
                Ok(queue[0].clone())
            }
        }
    }

    fn client(http: Arc<FakeHttp>) -> JellyfinClient {
        JellyfinClient::new(http, "http://jf.test/", "secret")
            .with_retry_policy(RetryPolicy::none())
    }

    fn films() -> LibraryInfo {
        LibraryInfo {
            id: "lib-films".to_string(),
            name: "Films".to_string(),
            media_type: Some(MediaType::Movie),
        }
    }

    #[tokio::test]
    async fn test_list_libraries_maps_collection_type() {
        let http = Arc::new(FakeHttp::default());
        http.route(
            HttpMethod::Get,
            "/Library/VirtualFolders",
            200,
            json!([
                {"Name": "Films", "ItemId": "lib-films", "CollectionType": "movies"},
                {"Name": "Séries", "ItemId": "lib-series", "CollectionType": "tvshows"},
                {"Name": "Music", "ItemId": "lib-music", "CollectionType": "music"}
            ]),
        );

        let libraries = client(http.clone()).list_libraries().await.unwrap();
        assert_eq!(libraries.len(), 3);
        assert_eq!(libraries[1].media_type, Some(MediaType::Series));
        assert_eq!(libraries[2].media_type, None);

        let request = &http.requests()[0];
        assert_eq!(request.headers.get("X-Emby-Token").map(String::as_str), Some("secret"));
    }

    #[tokio::test]
    async fn test_library_items_parse_provider_ids() {
        let http = Arc::new(FakeHttp::default());
        http.route(
            HttpMethod::Get,
            "/Items",
            200,
            json!({
                "Items": [
                    {"Id": "jf-1", "Name": "The Matrix", "ProductionYear": 1999, "Type": "Movie",
                     "ProviderIds": {"Tmdb": "603", "Imdb": "tt0133093"}},
                    {"Id": "jf-2", "Name": "Home Video", "Type": "Movie", "ProviderIds": {}}
                ],
                "TotalRecordCount": 2
            }),
        );

        let items = client(http).library_items(&films()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].ids.tmdb, Some(603));
        assert_eq!(items[0].ids.imdb.as_deref(), Some("tt0133093"));
        assert_eq!(items[0].year, Some(1999));
        assert!(items[1].ids.is_empty());
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty_state() {
        let http = Arc::new(FakeHttp::default());
        http.route(
            HttpMethod::Get,
            "/Items",
            200,
            json!({"Items": [{"Id": "bs-1", "Name": "Trending Movies 2"}], "TotalRecordCount": 1}),
        );

        let state = client(http)
            .get_collection_members(&films(), "Trending Movies")
            .await
            .unwrap();
        assert!(!state.exists());
        assert!(state.members.is_empty());
    }

    #[tokio::test]
    async fn test_existing_collection_members() {
        let http = Arc::new(FakeHttp::default());
        http.route(
            HttpMethod::Get,
            "/Items",
            200,
            json!({"Items": [{"Id": "bs-1", "Name": "Trending Movies"}], "TotalRecordCount": 1}),
        );
        http.route(
            HttpMethod::Get,
            "/Items",
            200,
            json!({"Items": [{"Id": "A"}, {"Id": "B"}], "TotalRecordCount": 2}),
        );

        let state = client(http)
            .get_collection_members(&films(), "Trending Movies")
            .await
            .unwrap();
        assert_eq!(state.collection_id.as_deref(), Some("bs-1"));
        assert_eq!(
            state.members,
            BTreeSet::from([ItemId::from("A"), ItemId::from("B")])
        );
    }

    #[tokio::test]
    async fn test_writes_are_batched() {
        let http = Arc::new(FakeHttp::default());
        http.route(HttpMethod::Post, "/Collections/bs-1/Items", 204, json!(null));

        let items: Vec<ItemId> = (0..250).map(|i| ItemId::new(format!("id-{}", i))).collect();
        client(http.clone())
            .add_items_to_collection("bs-1", &items)
            .await
            .unwrap();

        let requests = http.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.method == HttpMethod::Post));
    }

    #[tokio::test]
    async fn test_failed_batch_reports_items_already_written() {
        let http = Arc::new(FakeHttp::default());
        http.route(HttpMethod::Post, "/Collections/bs-1/Items", 204, json!(null));
        http.route(HttpMethod::Post, "/Collections/bs-1/Items", 204, json!(null));
        http.route(HttpMethod::Post, "/Collections/bs-1/Items", 500, json!({"error": "boom"}));

        let items: Vec<ItemId> = (0..250).map(|i| ItemId::new(format!("id-{}", i))).collect();
        let err = client(http)
            .add_items_to_collection("bs-1", &items)
            .await
            .unwrap_err();

        assert_eq!(err.written(), 200);
        assert!(matches!(
            &err,
            LibraryError::PartialWrite { collection_id, .. } if collection_id == "bs-1"
        ));
    }

    #[tokio::test]
    async fn test_created_collection_survives_a_failed_follow_up_batch() {
        let http = Arc::new(FakeHttp::default());
        http.route(HttpMethod::Post, "/Collections", 200, json!({"Id": "bs-new"}));
        http.route(HttpMethod::Post, "/Collections/bs-new/Items", 204, json!(null));
        http.route(HttpMethod::Post, "/Collections/bs-new/Items", 500, json!({"error": "boom"}));

        let items: Vec<ItemId> = (0..250).map(|i| ItemId::new(format!("id-{}", i))).collect();
        let err = client(http)
            .create_collection("Trending Movies", &items)
            .await
            .unwrap_err();

        assert_eq!(err.written(), 200);
        assert!(matches!(
            &err,
            LibraryError::PartialWrite { collection_id, .. } if collection_id == "bs-new"
        ));
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_status() {
        let http = Arc::new(FakeHttp::default());
        http.route(HttpMethod::Delete, "/Collections/bs-1/Items", 500, json!({"error": "boom"}));

        let err = client(http)
            .remove_items_from_collection("bs-1", &[ItemId::from("A")])
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_error_body_is_cut_on_a_char_boundary() {
        let http = Arc::new(FakeHttp::default());
        let body = format!("{}ü and more", "x".repeat(198));
        http.route(HttpMethod::Get, "/Library/VirtualFolders", 500, json!(body));

        let err = client(http).list_libraries().await.unwrap_err();
        match err {
            LibraryError::Http { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message.chars().count(), 200);
                assert!(message.ends_with('ü'));
            }
            other => panic!("expected an HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_collection_returns_id() {
        let http = Arc::new(FakeHttp::default());
        http.route(HttpMethod::Post, "/Collections", 200, json!({"Id": "bs-new"}));

        let id = client(http.clone())
            .create_collection("Trending Movies", &[ItemId::from("A"), ItemId::from("D")])
            .await
            .unwrap();
        assert_eq!(id, "bs-new");
        assert!(http.requests()[0].url.contains("Ids=A%2CD"));
    }
}
