//! # Item Resolver
//!
//! Maps external references onto Jellyfin items using the per-run
//! [`LibraryIndex`]. References the library does not hold are reported as
//! [`Resolution::NotInLibrary`] and can be handed to Radarr/Sonarr, which
//! happens on a detached task so a slow acquisition service never delays the
//! collection write. The items will resolve on a later run once downloaded.

use core_library::{AcquisitionOverrides, ExternalItemRef, ItemId, LibraryIndex, MediaType};
use core_metadata::{AcquisitionOutcome, ExternalIdSource, ProviderRegistry};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ItemId),
    NotInLibrary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub reference: ExternalItemRef,
    pub resolution: Resolution,
}

impl ResolvedItem {
    pub fn item_id(&self) -> Option<&ItemId> {
        match &self.resolution {
            Resolution::Found(id) => Some(id),
            Resolution::NotInLibrary => None,
        }
    }
}

/// Desired membership derived from a resolution pass
pub fn desired_members(resolved: &[ResolvedItem]) -> BTreeSet<ItemId> {
    resolved.iter().filter_map(|r| r.item_id().cloned()).collect()
}

pub fn missing_refs(resolved: &[ResolvedItem]) -> Vec<ExternalItemRef> {
    resolved
        .iter()
        .filter(|r| r.resolution == Resolution::NotInLibrary)
        .map(|r| r.reference.clone())
        .collect()
}

/// Tally of one acquisition batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub added: usize,
    pub already_present: usize,
    pub excluded: usize,
    pub not_found: usize,
    pub failed: usize,
}

impl AcquisitionSummary {
    fn record(&mut self, outcome: AcquisitionOutcome) {
        match outcome {
            AcquisitionOutcome::Added => self.added += 1,
            AcquisitionOutcome::AlreadyPresent => self.already_present += 1,
            AcquisitionOutcome::Excluded => self.excluded += 1,
            AcquisitionOutcome::NotFound => self.not_found += 1,
        }
    }
}

#[derive(Clone)]
pub struct ItemResolver {
    providers: ProviderRegistry,
    id_source: Option<Arc<dyn ExternalIdSource>>,
}

impl ItemResolver {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self {
            providers,
            id_source: None,
        }
    }

    /// Used to look up TVDB ids Sonarr needs when a list only had TMDb ids
    pub fn with_id_source(mut self, id_source: Arc<dyn ExternalIdSource>) -> Self {
        self.id_source = Some(id_source);
        self
    }

    pub fn resolve(&self, refs: &[ExternalItemRef], index: &LibraryIndex) -> Vec<ResolvedItem> {
        let resolved: Vec<ResolvedItem> = refs
            .iter()
            .map(|reference| ResolvedItem {
                reference: reference.clone(),
                resolution: match index.lookup(reference) {
                    Some(id) => Resolution::Found(id.clone()),
                    None => Resolution::NotInLibrary,
                },
            })
            .collect();

        let found = resolved.iter().filter(|r| r.item_id().is_some()).count();
        debug!(total = refs.len(), found, "References resolved");
        resolved
    }

    /// Whether some provider can acquire items of `media_type`
    pub fn can_acquire(&self, media_type: MediaType) -> bool {
        self.providers.acquirer_for(media_type).is_some()
    }

    /// Hand missing references to the acquisition service of their media
    /// type. Returns `None` when there is nothing to do or no service.
    pub fn request_missing(
        &self,
        media_type: MediaType,
        missing: Vec<ExternalItemRef>,
        overrides: AcquisitionOverrides,
    ) -> Option<JoinHandle<AcquisitionSummary>> {
        if missing.is_empty() {
            return None;
        }
        let acquirer = self.providers.acquirer_for(media_type)?.clone();
        let id_source = self.id_source.clone();

        Some(tokio::spawn(async move {
            let mut summary = AcquisitionSummary::default();
            for mut item in missing {
                if media_type == MediaType::Series && item.ids.tvdb.is_none() {
                    if let (Some(source), Some(tmdb)) = (&id_source, item.ids.tmdb) {
                        match source.external_ids(MediaType::Series, tmdb).await {
                            Ok(ids) => {
                                if let Some(tvdb) = ids.tvdb {
                                    item = item.with_tvdb(tvdb);
                                }
                            }
                            Err(e) => warn!(item = %item.label(), error = %e, "TVDB lookup failed"),
                        }
                    }
                }

                match acquirer.request_acquisition(&item, &overrides).await {
                    Ok(outcome) => {
                        debug!(item = %item.label(), %outcome, "Acquisition requested");
                        summary.record(outcome);
                    }
                    Err(e) => {
                        warn!(item = %item.label(), error = %e, "Acquisition request failed");
                        summary.failed += 1;
                    }
                }
            }
            info!(
                provider = acquirer.id(),
                added = summary.added,
                failed = summary.failed,
                "Acquisition batch finished"
            );
            summary
        }))
    }
}
