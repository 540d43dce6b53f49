use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::SecureStore;
use core_library::{
    BuilderSpec, CollectionRule, CollectionState, ExternalIds, ExternalItemRef, ItemId,
    LibraryInfo, LibraryItem, MediaServer, MediaType, ServerInfo, StaticRuleSource,
};
use core_metadata::{ItemProvider, MetadataError, ProviderQuery};
use core_runtime::config::{EngineConfig, TraktConfig};
use core_runtime::events::{CoreEvent, RunEvent};
use core_service::{CollectionService, CollectionStatus, CoreDependencies, CoreError};
use mockall::mock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

mock! {
    Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

#[derive(Default)]
struct MemoryStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.secrets.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.secrets.lock().unwrap().keys().cloned().collect())
    }
}

/// One movie library, collections kept in memory
#[derive(Default)]
struct MemoryServer {
    collections: Mutex<HashMap<String, BTreeSet<ItemId>>>,
    writes: AtomicUsize,
}

impl MemoryServer {
    fn members(&self, name: &str) -> Option<BTreeSet<ItemId>> {
        self.collections.lock().unwrap().get(name).cloned()
    }
}

fn movie(id: &str, title: &str, tmdb: u64) -> LibraryItem {
    LibraryItem {
        id: ItemId::new(id),
        title: title.to_string(),
        year: Some(2024),
        media_type: MediaType::Movie,
        ids: ExternalIds {
            tmdb: Some(tmdb),
            ..Default::default()
        },
    }
}

#[async_trait]
impl MediaServer for MemoryServer {
    async fn list_libraries(&self) -> core_library::Result<Vec<LibraryInfo>> {
        Ok(vec![LibraryInfo {
            id: "lib-films".to_string(),
            name: "Films".to_string(),
            media_type: Some(MediaType::Movie),
        }])
    }

    async fn library_items(&self, _library: &LibraryInfo) -> core_library::Result<Vec<LibraryItem>> {
        Ok(vec![movie("A", "Dune: Part Two", 693134), movie("B", "Civil War", 929590)])
    }

    async fn get_collection_members(
        &self,
        _library: &LibraryInfo,
        name: &str,
    ) -> core_library::Result<CollectionState> {
        Ok(match self.members(name) {
            Some(members) => CollectionState::existing(name, members),
            None => CollectionState::missing(),
        })
    }

    async fn create_collection(&self, name: &str, items: &[ItemId]) -> core_library::Result<String> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), items.iter().cloned().collect());
        Ok(name.to_string())
    }

    async fn add_items_to_collection(
        &self,
        collection_id: &str,
        items: &[ItemId],
    ) -> core_library::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(members) = self.collections.lock().unwrap().get_mut(collection_id) {
            members.extend(items.iter().cloned());
        }
        Ok(())
    }

    async fn remove_items_from_collection(
        &self,
        collection_id: &str,
        items: &[ItemId],
    ) -> core_library::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(members) = self.collections.lock().unwrap().get_mut(collection_id) {
            for item in items {
                members.remove(item);
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> core_library::Result<ServerInfo> {
        Ok(ServerInfo {
            server_name: "memory".to_string(),
            version: "10.9.11".to_string(),
        })
    }
}

/// Stands in for TMDb: `trending_weekly` only, unreachable on health checks
struct Trending;

#[async_trait]
impl ItemProvider for Trending {
    fn id(&self) -> &'static str {
        "tmdb"
    }

    fn supports(&self, mode: &str) -> bool {
        mode == "trending_weekly"
    }

    async fn query(&self, query: &ProviderQuery) -> core_metadata::Result<Vec<ExternalItemRef>> {
        Ok(vec![
            ExternalItemRef::new(query.media_type, "Dune: Part Two").with_tmdb(693134),
            ExternalItemRef::new(query.media_type, "Furiosa").with_tmdb(786892),
        ])
    }

    async fn health_check(&self) -> core_metadata::Result<()> {
        Err(MetadataError::Network("connection refused".to_string()))
    }
}

fn config() -> EngineConfig {
    EngineConfig::builder()
        .jellyfin("http://jellyfin.test:8096", "jf-key")
        .build()
        .unwrap()
}

fn service(config: EngineConfig, rules: Vec<CollectionRule>) -> (CollectionService, Arc<MemoryServer>) {
    let server = Arc::new(MemoryServer::default());
    let deps = CoreDependencies::new(Arc::new(MockHttp::new()), Arc::new(MemoryStore::default()))
        .with_media_server(server.clone())
        .with_rule_source(Arc::new(StaticRuleSource::new(rules)))
        .with_provider(Arc::new(Trending));
    (CollectionService::new(config, deps), server)
}

fn trending() -> CollectionRule {
    CollectionRule::new("Films", "Trending").with_builder(BuilderSpec::new("tmdb", "trending_weekly"))
}

#[tokio::test]
async fn test_run_once_creates_collection_from_library_matches() {
    let (service, server) = service(config(), vec![trending()]);

    let report = service.run_once(false).await.unwrap();

    assert_eq!(report.collections.len(), 1);
    assert_eq!(report.collections[0].status, CollectionStatus::Succeeded);
    assert_eq!(report.total_added(), 1);
    assert_eq!(report.total_missing(), 1);
    assert_eq!(
        server.members("Trending"),
        Some([ItemId::new("A")].into_iter().collect())
    );
}

#[tokio::test]
async fn test_dry_run_never_writes() {
    let (service, server) = service(config(), vec![trending()]);

    let report = service.run_once(true).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.collections[0].to_add, 1);
    assert!(!report.collections[0].applied);
    assert_eq!(server.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_configured_dry_run_overrides_live_request() {
    let config = EngineConfig::builder()
        .jellyfin("http://jellyfin.test:8096", "jf-key")
        .dry_run(true)
        .build()
        .unwrap();
    let (service, server) = service(config, vec![trending()]);

    let report = service.run_once(false).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(server.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validate_rules_reports_errors_and_warnings() {
    let rules = vec![
        trending(),
        CollectionRule::new("Séries", "Trending")
            .with_builder(BuilderSpec::new("trakt", "trending")),
        CollectionRule::new("Films", "Empty"),
    ];
    let (service, _) = service(config(), rules);

    let report = service.validate_rules().await.unwrap();

    assert_eq!(report.rules, 3);
    assert!(!report.is_valid());
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().any(|e| e.rule == "Séries/Trending"));
    assert!(report.errors.iter().any(|e| e.rule == "Films/Empty"));
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].rule, "Trending");
}

#[tokio::test]
async fn test_validate_rules_warns_on_unreachable_tmdb_limit() {
    let rule = CollectionRule::new("Films", "Everything").with_builder(
        BuilderSpec::new("tmdb", "trending_weekly").with_param("limit", 1_000_000u64),
    );
    let (service, _) = service(config(), vec![rule]);

    let report = service.validate_rules().await.unwrap();

    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].rule, "Films/Everything");
    assert!(report.warnings[0].message.contains("tmdb_trending_weekly"));
}

#[tokio::test]
async fn test_health_covers_jellyfin_and_providers() {
    let (service, _) = service(config(), Vec::new());

    let health = service.check_provider_health().await;

    assert_eq!(health.len(), 2);
    assert_eq!(health[0].name, "jellyfin");
    assert!(health[0].healthy);
    assert_eq!(health[0].detail.as_deref(), Some("memory 10.9.11"));
    assert_eq!(health[1].name, "tmdb");
    assert!(!health[1].healthy);
}

#[tokio::test]
async fn test_device_auth_requires_trakt_credentials() {
    let (service, _) = service(config(), Vec::new());

    let err = service.start_device_auth(|_| {}).await.unwrap_err();
    assert!(matches!(err, CoreError::CapabilityMissing { .. }));
}

#[tokio::test]
async fn test_configured_trakt_tokens_seed_an_empty_store_once() {
    let mut trakt = TraktConfig::new("client-id", "client-secret");
    trakt.access_token = Some("access".to_string());
    trakt.refresh_token = Some("refresh".to_string());
    let config = EngineConfig::builder()
        .jellyfin("http://jellyfin.test:8096", "jf-key")
        .trakt(trakt)
        .build()
        .unwrap();
    let (service, _) = service(config, Vec::new());

    assert!(service.import_configured_tokens().await.unwrap());
    assert!(!service.import_configured_tokens().await.unwrap());
    assert!(service.providers().get("trakt").is_some());
}

#[tokio::test]
async fn test_run_events_reach_subscribers() {
    let (service, _) = service(config(), vec![trending()]);
    let mut events = service.subscribe_events();

    service.run_once(true).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(
        seen.first(),
        Some(CoreEvent::Run(RunEvent::Started { collections: 1, dry_run: true, .. }))
    ));
    assert!(matches!(
        seen.last(),
        Some(CoreEvent::Run(RunEvent::Completed { failed: 0, .. }))
    ));
}
