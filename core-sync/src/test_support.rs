use async_trait::async_trait;
use core_library::{
    AcquisitionOverrides, CollectionState, ExternalIds, ExternalItemRef, ItemId, LibraryError,
    LibraryInfo, LibraryItem, MediaServer, MediaType, ServerInfo,
};
use core_metadata::{AcquisitionOutcome, ItemProvider, MetadataError, ProviderQuery};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ErrorFactory = Box<dyn Fn() -> MetadataError + Send + Sync>;

/// Provider answering each mode with a canned list or error
pub struct StaticProvider {
    id: &'static str,
    items: HashMap<String, Vec<ExternalItemRef>>,
    errors: HashMap<String, ErrorFactory>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    acquires: Option<MediaType>,
    acquired: Arc<Mutex<Vec<ExternalItemRef>>>,
}

impl StaticProvider {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            items: HashMap::new(),
            errors: HashMap::new(),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            acquires: None,
            acquired: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_items(mut self, mode: &str, items: Vec<ExternalItemRef>) -> Self {
        self.items.insert(mode.to_string(), items);
        self
    }

    pub fn with_error<F>(mut self, mode: &str, error: F) -> Self
    where
        F: Fn() -> MetadataError + Send + Sync + 'static,
    {
        self.errors.insert(mode.to_string(), Box::new(error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn acquiring(mut self, media_type: MediaType) -> Self {
        self.acquires = Some(media_type);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn acquired(&self) -> Arc<Mutex<Vec<ExternalItemRef>>> {
        self.acquired.clone()
    }
}

#[async_trait]
impl ItemProvider for StaticProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    fn supports(&self, mode: &str) -> bool {
        self.items.contains_key(mode) || self.errors.contains_key(mode)
    }

    async fn query(&self, query: &ProviderQuery) -> core_metadata::Result<Vec<ExternalItemRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.errors.get(&query.mode) {
            return Err(error());
        }
        let mut items = self.items.get(&query.mode).cloned().unwrap_or_default();
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn health_check(&self) -> core_metadata::Result<()> {
        if self.errors.contains_key("health") {
            return Err(MetadataError::Network("unreachable".to_string()));
        }
        Ok(())
    }

    fn acquisition_media_type(&self) -> Option<MediaType> {
        self.acquires
    }

    async fn request_acquisition(
        &self,
        item: &ExternalItemRef,
        _overrides: &AcquisitionOverrides,
    ) -> core_metadata::Result<AcquisitionOutcome> {
        self.acquired.lock().unwrap().push(item.clone());
        Ok(AcquisitionOutcome::Added)
    }
}

/// In-memory media server
#[derive(Default)]
pub struct FakeServer {
    libraries: Vec<LibraryInfo>,
    items: HashMap<String, Vec<LibraryItem>>,
    collections: Mutex<HashMap<String, (String, BTreeSet<ItemId>)>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    item_budget: Mutex<Option<usize>>,
    next_id: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(mut self, name: &str, media_type: MediaType, items: Vec<LibraryItem>) -> Self {
        let id = format!("lib-{}", name.to_lowercase());
        self.libraries.push(LibraryInfo {
            id: id.clone(),
            name: name.to_string(),
            media_type: Some(media_type),
        });
        self.items.insert(id, items);
        self
    }

    pub fn with_collection(self, name: &str, members: &[&str]) -> Self {
        let members = members.iter().map(|m| ItemId::new(*m)).collect();
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), (format!("col-{}", name), members));
        self
    }

    pub fn members(&self, name: &str) -> Option<BTreeSet<ItemId>> {
        self.collections
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, members)| members.clone())
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Land at most `limit` more items across add and remove calls
    pub fn accept_items(&self, limit: usize) {
        *self.item_budget.lock().unwrap() = Some(limit);
    }

    /// Items of a write that land, and the error for the rest
    fn admit(&self, collection_id: &str, requested: usize) -> (usize, Option<LibraryError>) {
        let mut budget = self.item_budget.lock().unwrap();
        let Some(remaining) = budget.as_mut() else {
            return (requested, None);
        };
        let landed = requested.min(*remaining);
        *remaining -= landed;
        if landed == requested {
            return (landed, None);
        }
        let rejected = LibraryError::Http {
            status: 500,
            message: "write rejected".to_string(),
        };
        (landed, Some(LibraryError::partial_write(collection_id, landed, rejected)))
    }

    fn write(&self) -> core_library::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LibraryError::Http {
                status: 500,
                message: "write rejected".to_string(),
            });
        }
        Ok(())
    }
}

pub fn library_item(id: &str, title: &str, tmdb: u64) -> LibraryItem {
    LibraryItem {
        id: ItemId::new(id),
        title: title.to_string(),
        year: Some(2020),
        media_type: MediaType::Movie,
        ids: ExternalIds {
            tmdb: Some(tmdb),
            ..Default::default()
        },
    }
}

pub fn movie_ref(title: &str, tmdb: u64) -> ExternalItemRef {
    ExternalItemRef::new(MediaType::Movie, title).with_tmdb(tmdb)
}

pub fn ids(values: &[&str]) -> BTreeSet<ItemId> {
    values.iter().map(|v| ItemId::new(*v)).collect()
}

#[async_trait]
impl MediaServer for FakeServer {
    async fn list_libraries(&self) -> core_library::Result<Vec<LibraryInfo>> {
        Ok(self.libraries.clone())
    }

    async fn library_items(&self, library: &LibraryInfo) -> core_library::Result<Vec<LibraryItem>> {
        Ok(self.items.get(&library.id).cloned().unwrap_or_default())
    }

    async fn get_collection_members(
        &self,
        _library: &LibraryInfo,
        name: &str,
    ) -> core_library::Result<CollectionState> {
        Ok(match self.collections.lock().unwrap().get(name) {
            Some((id, members)) => CollectionState::existing(id.clone(), members.clone()),
            None => CollectionState::missing(),
        })
    }

    async fn create_collection(&self, name: &str, items: &[ItemId]) -> core_library::Result<String> {
        self.write()?;
        let id = format!("new-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.collections.lock().unwrap().insert(
            name.to_string(),
            (id.clone(), items.iter().cloned().collect()),
        );
        Ok(id)
    }

    async fn add_items_to_collection(
        &self,
        collection_id: &str,
        items: &[ItemId],
    ) -> core_library::Result<()> {
        self.write()?;
        let (landed, rejected) = self.admit(collection_id, items.len());
        let mut collections = self.collections.lock().unwrap();
        if let Some((_, members)) = collections.values_mut().find(|(id, _)| id == collection_id) {
            members.extend(items[..landed].iter().cloned());
        }
        rejected.map_or(Ok(()), Err)
    }

    async fn remove_items_from_collection(
        &self,
        collection_id: &str,
        items: &[ItemId],
    ) -> core_library::Result<()> {
        self.write()?;
        let (landed, rejected) = self.admit(collection_id, items.len());
        let mut collections = self.collections.lock().unwrap();
        if let Some((_, members)) = collections.values_mut().find(|(id, _)| id == collection_id) {
            for item in &items[..landed] {
                members.remove(item);
            }
        }
        rejected.map_or(Ok(()), Err)
    }

    async fn health_check(&self) -> core_library::Result<ServerInfo> {
        Ok(ServerInfo {
            server_name: "fake".to_string(),
            version: "10.9.0".to_string(),
        })
    }
}
