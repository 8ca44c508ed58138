//! Sequential bulk mutations over selected assets.
//!
//! One mutation applied to N assets, strictly one at a time. Individual
//! failures are collected, never fatal to the rest of the batch; the caller
//! gets an aggregate count to report.
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::IngestService;
use crate::model::{AssetRecord, MediaKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOp {
    AddTag(Uuid),
    RemoveTag(Uuid),
    AssignRoom(Uuid),
    ClearRoom,
}

#[derive(Debug, Clone)]
pub struct BulkFailure {
    pub id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub applied: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    fn record(&mut self, id: Uuid, err: anyhow::Error) {
        warn!(%id, ?err, "bulk operation failed for asset");
        self.failures.push(BulkFailure {
            id,
            message: err.to_string(),
        });
    }
}

pub struct BulkOperationCoordinator {
    api: Arc<dyn IngestService>,
}

impl BulkOperationCoordinator {
    pub fn new(api: Arc<dyn IngestService>) -> Self {
        Self { api }
    }

    /// Apply `op` to each asset in order. Continues through failures.
    #[instrument(skip_all, fields(count = ids.len()))]
    pub async fn apply(&self, op: BulkOp, ids: &[Uuid]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            let res = match op {
                BulkOp::AddTag(tag) => self.api.add_tag(id, tag).await,
                BulkOp::RemoveTag(tag) => self.api.remove_tag(id, tag).await,
                BulkOp::AssignRoom(room) => self.api.assign_room(id, room).await,
                BulkOp::ClearRoom => self.api.clear_room(id).await,
            };
            match res {
                Ok(()) => outcome.applied += 1,
                Err(err) => outcome.record(id, err),
            }
        }
        info!(
            applied = outcome.applied,
            failed = outcome.failure_count(),
            "bulk operation finished"
        );
        outcome
    }

    /// Delete each asset in order. Kinds with a stored media object get an
    /// object-storage delete first; if that fails the metadata delete still
    /// proceeds and the item still counts as deleted.
    #[instrument(skip_all, fields(count = assets.len()))]
    pub async fn delete(&self, assets: &[AssetRecord]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for asset in assets {
            if needs_object_delete(asset) {
                if let Some(handle) = &asset.media_handle {
                    if let Err(err) = self.api.delete_object(handle).await {
                        warn!(id = %asset.id, %handle, ?err, "object delete failed; continuing");
                    }
                }
            }
            match self.api.delete_asset(asset.id).await {
                Ok(()) => outcome.applied += 1,
                Err(err) => outcome.record(asset.id, err),
            }
        }
        info!(
            applied = outcome.applied,
            failed = outcome.failure_count(),
            "bulk delete finished"
        );
        outcome
    }
}

/// Derived items share their source's media; only originals own an object.
fn needs_object_delete(asset: &AssetRecord) -> bool {
    matches!(asset.kind, MediaKind::Photo | MediaKind::SourceVideo)
}
