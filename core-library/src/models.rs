//! Domain models shared by the reconciliation pipeline
//!
//! External references come from providers, library items come from
//! Jellyfin. Nothing here is persisted: every run rebuilds these values.

use crate::normalize::normalize_title;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

// =============================================================================
// Media type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
        }
    }

    /// Path segment used by TMDb (`movie` / `tv`)
    pub fn tmdb_segment(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "tv",
        }
    }

    /// Map a Jellyfin library `CollectionType`
    pub fn from_collection_type(collection_type: &str) -> Option<Self> {
        match collection_type.to_ascii_lowercase().as_str() {
            "movies" => Some(MediaType::Movie),
            "tvshows" => Some(MediaType::Series),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" | "movies" => Ok(MediaType::Movie),
            "series" | "show" | "shows" | "tv" => Ok(MediaType::Series),
            other => Err(format!("Unknown media type: {}", other)),
        }
    }
}

// =============================================================================
// External identifiers
// =============================================================================

/// Identifiers an item carries in external catalogues
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIds {
    pub tmdb: Option<u64>,
    pub imdb: Option<String>,
    pub tvdb: Option<u64>,
}

impl ExternalIds {
    /// Trim and lower-case IMDb ids, drop zero and blank ids
    pub fn normalized(&self) -> Self {
        Self {
            tmdb: self.tmdb.filter(|id| *id != 0),
            imdb: self
                .imdb
                .as_deref()
                .map(|id| id.trim().to_ascii_lowercase())
                .filter(|id| !id.is_empty()),
            tvdb: self.tvdb.filter(|id| *id != 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        let ids = self.normalized();
        ids.tmdb.is_none() && ids.imdb.is_none() && ids.tvdb.is_none()
    }
}

/// Provider metadata used by rule filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub vote_average: Option<f64>,
    pub vote_count: Option<u64>,
    pub original_language: Option<String>,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
}

/// Normalised identity of an external reference, e.g. `tmdb:movie:603`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefKey(String);

impl RefKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An item named by a provider
///
/// Two references are equal when their identity keys are equal, whatever
/// provider produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalItemRef {
    pub media_type: MediaType,
    pub title: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub ids: ExternalIds,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl ExternalItemRef {
    pub fn new(media_type: MediaType, title: impl Into<String>) -> Self {
        Self {
            media_type,
            title: title.into(),
            year: None,
            ids: ExternalIds::default(),
            metadata: ItemMetadata::default(),
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_tmdb(mut self, id: u64) -> Self {
        self.ids.tmdb = Some(id);
        self
    }

    pub fn with_imdb(mut self, id: impl Into<String>) -> Self {
        self.ids.imdb = Some(id.into());
        self
    }

    pub fn with_tvdb(mut self, id: u64) -> Self {
        self.ids.tvdb = Some(id);
        self
    }

    pub fn with_metadata(mut self, metadata: ItemMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn has_ids(&self) -> bool {
        !self.ids.is_empty()
    }

    /// Every normalised id this reference carries, or its title and year
    /// when it carries none
    pub fn identity_keys(&self) -> Vec<RefKey> {
        let ids = self.ids.normalized();
        let mut keys = Vec::with_capacity(3);

        if let Some(tmdb) = ids.tmdb {
            keys.push(RefKey(format!("tmdb:{}:{}", self.media_type, tmdb)));
        }
        if let Some(imdb) = ids.imdb {
            keys.push(RefKey(format!("imdb:{}", imdb)));
        }
        if let Some(tvdb) = ids.tvdb {
            keys.push(RefKey(format!("tvdb:{}:{}", self.media_type, tvdb)));
        }

        if keys.is_empty() {
            keys.push(RefKey(format!(
                "title:{}:{}:{}",
                self.media_type,
                normalize_title(&self.title),
                self.year.map(|y| y.to_string()).unwrap_or_default()
            )));
        }
        keys
    }

    /// Human readable label for logs and reports
    pub fn label(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        }
    }
}

impl PartialEq for ExternalItemRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity_keys() == other.identity_keys()
    }
}

impl Eq for ExternalItemRef {}

impl Hash for ExternalItemRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_keys().hash(state);
    }
}

// =============================================================================
// Jellyfin side
// =============================================================================

/// Jellyfin item id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A Jellyfin library (virtual folder)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub id: String,
    pub name: String,
    /// `None` for libraries holding neither movies nor shows
    pub media_type: Option<MediaType>,
}

/// A movie or series in a Jellyfin library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: ItemId,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub ids: ExternalIds,
}

/// Current membership of a collection, fetched fresh every run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    /// Jellyfin BoxSet id, `None` when the collection does not exist yet
    pub collection_id: Option<String>,
    pub members: BTreeSet<ItemId>,
}

impl CollectionState {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn existing(collection_id: impl Into<String>, members: BTreeSet<ItemId>) -> Self {
        Self {
            collection_id: Some(collection_id.into()),
            members,
        }
    }

    pub fn exists(&self) -> bool {
        self.collection_id.is_some()
    }
}
