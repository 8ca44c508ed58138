//! Change-feed event model and dispatch.
//!
//! The push channel delivers row-level `{eventType, old, new}` payloads for
//! the asset table and the two relation tables. Everything downstream of the
//! wire is an explicit reducer over [`FeedEvent`], so tests drive the catalog
//! and tracker with recorded event sequences and no live channel.
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::IngestService;
use crate::catalog::AssetCatalog;
use crate::model::AssetRecord;
use crate::pipeline::PipelineTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationTable {
    AssetTags,
    AssetRooms,
}

/// One parsed change-feed delivery.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    AssetInserted(AssetRecord),
    AssetUpdated {
        old: Option<AssetRecord>,
        new: AssetRecord,
    },
    AssetDeleted {
        id: Uuid,
    },
    /// A tag/room link changed; the parent asset must be re-read in full.
    RelationChanged {
        table: RelationTable,
        asset_id: Uuid,
    },
}

/// Raw push payload before parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    pub table: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub old: Option<Value>,
    #[serde(default)]
    pub new: Option<Value>,
}

/// Parse one wire payload. Returns `Ok(None)` for tables we do not subscribe
/// to; malformed payloads for known tables are an error.
pub fn parse_wire(ev: WireEvent) -> Result<Option<FeedEvent>> {
    match ev.table.as_str() {
        "assets" => parse_asset_event(ev).map(Some),
        "asset_tags" => parse_relation_event(ev, RelationTable::AssetTags).map(Some),
        "asset_rooms" => parse_relation_event(ev, RelationTable::AssetRooms).map(Some),
        other => {
            warn!(table = other, "ignoring event for unsubscribed table");
            Ok(None)
        }
    }
}

fn parse_asset_event(ev: WireEvent) -> Result<FeedEvent> {
    match ev.event_type.as_str() {
        "insert" => {
            let new = ev.new.ok_or_else(|| anyhow!("asset insert without new row"))?;
            Ok(FeedEvent::AssetInserted(
                serde_json::from_value(new).context("invalid asset row in insert")?,
            ))
        }
        "update" => {
            let new = ev.new.ok_or_else(|| anyhow!("asset update without new row"))?;
            let old = ev
                .old
                .map(serde_json::from_value)
                .transpose()
                .unwrap_or(None);
            Ok(FeedEvent::AssetUpdated {
                old,
                new: serde_json::from_value(new).context("invalid asset row in update")?,
            })
        }
        "delete" => {
            let old = ev.old.ok_or_else(|| anyhow!("asset delete without old row"))?;
            let id = old
                .get("id")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| anyhow!("asset delete without id"))?;
            Ok(FeedEvent::AssetDeleted { id })
        }
        other => Err(anyhow!("unknown event type: {other}")),
    }
}

fn parse_relation_event(ev: WireEvent, table: RelationTable) -> Result<FeedEvent> {
    // Deletes only carry the old row; everything else carries new.
    let row = ev
        .new
        .as_ref()
        .or(ev.old.as_ref())
        .ok_or_else(|| anyhow!("relation event without row data"))?;
    let asset_id = row
        .get("asset_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| anyhow!("relation row without asset_id"))?;
    Ok(FeedEvent::RelationChanged { table, asset_id })
}

/// Drains a feed receiver and fans events out to the catalog and the
/// pipeline tracker. Relation-table events trigger a full re-fetch of the
/// parent asset; a not-found re-fetch is applied as an implicit delete.
pub struct FeedRouter {
    api: Arc<dyn IngestService>,
    catalog: Arc<Mutex<AssetCatalog>>,
    tracker: Arc<Mutex<PipelineTracker>>,
}

impl FeedRouter {
    pub fn new(
        api: Arc<dyn IngestService>,
        catalog: Arc<Mutex<AssetCatalog>>,
        tracker: Arc<Mutex<PipelineTracker>>,
    ) -> Self {
        Self {
            api,
            catalog,
            tracker,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, mut rx: mpsc::Receiver<FeedEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
        info!("change feed closed");
    }

    pub async fn dispatch(&self, event: FeedEvent) {
        match event {
            FeedEvent::RelationChanged { table, asset_id } => {
                self.refetch_parent(table, asset_id).await;
            }
            other => {
                self.catalog.lock().await.apply_event(&other);
                self.tracker.lock().await.apply_event(&other);
            }
        }
    }

    async fn refetch_parent(&self, table: RelationTable, asset_id: Uuid) {
        match self.api.fetch_asset(asset_id).await {
            Ok(record) => {
                self.catalog
                    .lock()
                    .await
                    .apply_refetched(asset_id, record);
            }
            Err(err) => {
                // Leave the mirror as-is; a later event or refetch will
                // converge it.
                warn!(?err, %asset_id, ?table, "parent re-fetch failed");
            }
        }
    }
}
