//! In-memory mirror of the asset collection.
//!
//! The catalog owns the canonical local view: change-feed deltas and
//! explicit re-fetches come in through `apply_*`, every read goes through
//! the accessors. Consistency anomalies (duplicate insert, update for an
//! unknown id, delete of an absent id) are logged and absorbed, never
//! raised: the feed de-duplicates poorly and optimistic local edits race
//! the authoritative events by design.
use tracing::{debug, info};
use uuid::Uuid;

use crate::feed::FeedEvent;
use crate::model::AssetRecord;

/// Derived aggregates, recomputed after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CatalogTotals {
    /// Number of countable-kind records.
    pub count: usize,
    /// Sum of the value field, missing values counting as zero.
    pub value: f64,
}

#[derive(Debug, Default)]
pub struct AssetCatalog {
    /// Always sorted by creation time, newest first.
    assets: Vec<AssetRecord>,
    selected: Option<Uuid>,
    totals: CatalogTotals,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mirror with an initial load.
    pub fn load(&mut self, assets: Vec<AssetRecord>) {
        self.assets = assets;
        self.resort();
        self.recompute();
    }

    pub fn assets(&self) -> &[AssetRecord] {
        &self.assets
    }

    pub fn get(&self, id: Uuid) -> Option<&AssetRecord> {
        self.assets.iter().find(|a| a.id == id)
    }

    pub fn totals(&self) -> CatalogTotals {
        self.totals
    }

    pub fn select(&mut self, id: Option<Uuid>) {
        self.selected = id;
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    /// Reduce one asset-table feed event into the mirror.
    pub fn apply_event(&mut self, event: &FeedEvent) {
        match event {
            FeedEvent::AssetInserted(record) => self.apply_insert(record.clone()),
            FeedEvent::AssetUpdated { new, .. } => self.apply_update(new.clone()),
            FeedEvent::AssetDeleted { id } => self.apply_delete(*id),
            FeedEvent::RelationChanged { .. } => {
                // Relation events are resolved by the router via a re-fetch.
            }
        }
    }

    pub fn apply_insert(&mut self, record: AssetRecord) {
        if self.get(record.id).is_some() {
            debug!(id = %record.id, "duplicate insert ignored");
            return;
        }
        self.assets.push(record);
        self.resort();
        self.recompute();
    }

    pub fn apply_update(&mut self, record: AssetRecord) {
        match self.assets.iter_mut().find(|a| a.id == record.id) {
            Some(slot) => *slot = record,
            None => {
                // Update observed before its insert; treat it as the insert.
                info!(id = %record.id, "update for unknown asset treated as insert");
                self.assets.push(record);
            }
        }
        self.resort();
        self.recompute();
    }

    pub fn apply_delete(&mut self, id: Uuid) {
        let before = self.assets.len();
        self.assets.retain(|a| a.id != id);
        if self.assets.len() == before {
            debug!(%id, "delete for absent asset ignored");
        }
        if self.selected == Some(id) {
            self.selected = None;
        }
        self.recompute();
    }

    /// Apply the result of a full re-fetch. Not-found is an implicit delete.
    pub fn apply_refetched(&mut self, id: Uuid, record: Option<AssetRecord>) {
        match record {
            Some(record) => self.apply_update(record),
            None => {
                info!(%id, "re-fetch returned not found; removing");
                self.apply_delete(id);
            }
        }
    }

    fn resort(&mut self) {
        // Stable sort: records sharing a timestamp keep arrival order.
        self.assets
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    fn recompute(&mut self) {
        self.totals = CatalogTotals {
            count: self
                .assets
                .iter()
                .filter(|a| a.kind.is_countable())
                .count(),
            value: self.assets.iter().filter_map(|a| a.value).sum(),
        };
    }
}
