//! # Reconciler
//!
//! [`reconcile`] is a pure function of the desired set, the current
//! collection state and the sync mode. Live and dry runs both call it; only
//! [`apply_plan`] differs between them, so a dry run reports exactly the
//! plan a live run would execute.
//!
//! Applying is not transactional. A write that fails midway leaves the
//! collection partially updated and the next run converges it.

use core_library::{CollectionState, ItemId, LibraryError, MediaServer, SyncMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPlan {
    pub to_add: BTreeSet<ItemId>,
    pub to_remove: BTreeSet<ItemId>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `sync`: add `desired - current`, remove `current - desired`.
/// `append`: add `desired - current`, remove nothing.
pub fn reconcile(
    desired: &BTreeSet<ItemId>,
    current: &CollectionState,
    mode: SyncMode,
) -> MutationPlan {
    let to_add = desired.difference(&current.members).cloned().collect();
    let to_remove = match mode {
        SyncMode::Sync => current.members.difference(desired).cloned().collect(),
        SyncMode::Append => BTreeSet::new(),
    };
    MutationPlan { to_add, to_remove }
}

/// What actually landed on the server, counting items of partially
/// applied writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub collection_id: Option<String>,
    pub created: bool,
    pub added: usize,
    pub removed: usize,
    pub failures: Vec<String>,
}

impl ApplyOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Execute a plan: create the collection when it is missing and has
/// something to hold, then add, then remove
pub async fn apply_plan(
    server: &dyn MediaServer,
    name: &str,
    current: &CollectionState,
    plan: &MutationPlan,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome {
        collection_id: current.collection_id.clone(),
        ..Default::default()
    };
    let to_add: Vec<ItemId> = plan.to_add.iter().cloned().collect();

    match current.collection_id.as_deref() {
        None if to_add.is_empty() => return outcome,
        None => match server.create_collection(name, &to_add).await {
            Ok(id) => {
                info!(collection = name, id = %id, items = to_add.len(), "Created collection");
                outcome.collection_id = Some(id);
                outcome.created = true;
                outcome.added = to_add.len();
            }
            Err(e) => {
                warn!(collection = name, error = %e, "Collection creation failed");
                if let LibraryError::PartialWrite { collection_id, written, .. } = &e {
                    outcome.collection_id = Some(collection_id.clone());
                    outcome.created = true;
                    outcome.added = *written;
                }
                outcome.failures.push(format!("create: {}", e));
                return outcome;
            }
        },
        Some(id) if !to_add.is_empty() => {
            match server.add_items_to_collection(id, &to_add).await {
                Ok(()) => outcome.added = to_add.len(),
                Err(e) => {
                    outcome.added = e.written();
                    warn!(collection = name, error = %e, "Adding items failed");
                    outcome.failures.push(format!("add: {}", e));
                }
            }
        }
        Some(_) => {}
    }

    if let Some(id) = outcome.collection_id.clone() {
        let to_remove: Vec<ItemId> = plan.to_remove.iter().cloned().collect();
        if !to_remove.is_empty() {
            match server.remove_items_from_collection(&id, &to_remove).await {
                Ok(()) => outcome.removed = to_remove.len(),
                Err(e) => {
                    outcome.removed = e.written();
                    warn!(collection = name, error = %e, "Removing items failed");
                    outcome.failures.push(format!("remove: {}", e));
                }
            }
        }
    }

    outcome
}
