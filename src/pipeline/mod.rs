//! Per-upload processing state machine.
//!
//! One notification per asset currently moving through the server pipeline
//! (transcode, transcript, item extraction). The tracker is advanced only by
//! change-feed events; the bounded fallback poll exists for transcriptions
//! the feed loses track of, and cancels itself on the first terminal
//! transcript state it observes.
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::IngestService;
use crate::feed::FeedEvent;
use crate::model::{AssetRecord, PipelineStatus, TranscodeStatus, TranscriptStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineNotification {
    pub asset_id: Uuid,
    pub status: PipelineStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PipelineTracker {
    notifications: HashMap<Uuid, PipelineNotification>,
}

impl PipelineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset_id: Uuid) -> Option<&PipelineNotification> {
        self.notifications.get(&asset_id)
    }

    pub fn notifications(&self) -> impl Iterator<Item = &PipelineNotification> {
        self.notifications.values()
    }

    /// Register an upload that has just been allocated a remote asset id.
    pub fn begin_upload(&mut self, asset_id: Uuid) {
        self.notifications.insert(
            asset_id,
            PipelineNotification {
                asset_id,
                status: PipelineStatus::Uploading,
                message: "Uploading video".into(),
                started_at: Utc::now(),
            },
        );
    }

    /// All bytes are on the server; the transcode stage owns it now.
    pub fn mark_processing(&mut self, asset_id: Uuid) {
        self.advance(asset_id, PipelineStatus::Processing, "Processing video");
    }

    /// The upload itself failed. Terminal.
    pub fn mark_failed(&mut self, asset_id: Uuid, message: &str) {
        self.advance(asset_id, PipelineStatus::Error, message);
    }

    /// Reduce one feed event into the notification set.
    pub fn apply_event(&mut self, event: &FeedEvent) {
        match event {
            FeedEvent::AssetUpdated { new, .. } => self.apply_record(new),
            FeedEvent::AssetInserted(record) => {
                // A derived item referencing one of our uploads is the
                // authoritative "done" signal, whatever state we were in.
                if let Some(source) = record.source_asset_id {
                    if self.notifications.remove(&source).is_some() {
                        info!(%source, item = %record.id, "derived item arrived; pipeline complete");
                    }
                }
            }
            FeedEvent::AssetDeleted { id } => {
                if self.notifications.remove(id).is_some() {
                    debug!(%id, "tracked asset deleted; notification dropped");
                }
            }
            FeedEvent::RelationChanged { .. } => {}
        }
    }

    /// Fold the server-side status fields of a full record into the tracked
    /// state. Used both by feed updates and by the fallback poll.
    pub fn apply_record(&mut self, record: &AssetRecord) {
        if !self.notifications.contains_key(&record.id) {
            return;
        }
        match derive_status(record) {
            Some((PipelineStatus::Error, message)) => {
                self.advance(record.id, PipelineStatus::Error, &message);
            }
            Some((status, message)) => {
                // Only ever move forward; a stale update must not regress a
                // notification that has already passed that stage.
                let current = self.notifications[&record.id].status;
                if rank(status) > rank(current) {
                    self.advance(record.id, status, &message);
                }
            }
            None => {}
        }
    }

    /// Auto-dismiss `processing` notifications older than `ceiling` so a
    /// lost transcode never wedges the UI.
    pub fn sweep(&mut self, now: DateTime<Utc>, ceiling: Duration) {
        let ceiling = chrono::Duration::from_std(ceiling).unwrap_or(chrono::Duration::minutes(3));
        self.notifications.retain(|id, n| {
            let stale = n.status == PipelineStatus::Processing && now - n.started_at > ceiling;
            if stale {
                warn!(asset_id = %id, "processing notification timed out; dismissing");
            }
            !stale
        });
    }

    fn advance(&mut self, asset_id: Uuid, status: PipelineStatus, message: &str) {
        if let Some(n) = self.notifications.get_mut(&asset_id) {
            debug!(%asset_id, from = ?n.status, to = ?status, "pipeline transition");
            n.status = status;
            n.message = message.to_string();
        }
    }
}

/// Map the server-reported status fields to the furthest client state they
/// justify, with the message to display.
fn derive_status(record: &AssetRecord) -> Option<(PipelineStatus, String)> {
    if record.transcode_status == Some(TranscodeStatus::Error) {
        return Some((PipelineStatus::Error, "Video processing failed".into()));
    }
    match record.transcript_status {
        Some(TranscriptStatus::Error) => {
            let message = record
                .transcript_error
                .clone()
                .unwrap_or_else(|| "Transcription failed".into());
            Some((PipelineStatus::Error, message))
        }
        Some(TranscriptStatus::Completed) => {
            Some((PipelineStatus::Analyzing, "Analyzing items".into()))
        }
        Some(TranscriptStatus::Processing) => {
            Some((PipelineStatus::Transcribing, "Transcribing audio".into()))
        }
        _ => {
            if record.transcode_status == Some(TranscodeStatus::Ready) {
                Some((
                    PipelineStatus::PreparingTranscription,
                    "Preparing transcription".into(),
                ))
            } else {
                None
            }
        }
    }
}

fn rank(status: PipelineStatus) -> u8 {
    match status {
        PipelineStatus::Uploading => 0,
        PipelineStatus::Processing => 1,
        PipelineStatus::PreparingTranscription => 2,
        PipelineStatus::Transcribing => 3,
        PipelineStatus::Analyzing => 4,
        PipelineStatus::Complete => 5,
        PipelineStatus::Error => 6,
    }
}

/// Bounded direct re-fetch for an asset stuck in transcription.
///
/// Acts only when the fetched record differs from the last observed status
/// pair, so a healthy feed sees no redundant churn. Stops on its own once
/// the transcript reaches a terminal state or the notification is gone.
pub struct FallbackPoll {
    handle: JoinHandle<()>,
}

impl FallbackPoll {
    pub fn spawn(
        api: Arc<dyn IngestService>,
        tracker: Arc<Mutex<PipelineTracker>>,
        asset_id: Uuid,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut last_seen: Option<(Option<TranscodeStatus>, Option<TranscriptStatus>)> = None;
            loop {
                tokio::time::sleep(interval).await;

                let stuck = {
                    let tracker = tracker.lock().await;
                    matches!(
                        tracker.get(asset_id).map(|n| n.status),
                        Some(
                            PipelineStatus::PreparingTranscription | PipelineStatus::Transcribing
                        )
                    )
                };
                if !stuck {
                    break;
                }

                let record = match api.fetch_asset(asset_id).await {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        debug!(%asset_id, "polled asset gone; stopping fallback poll");
                        break;
                    }
                    Err(err) => {
                        warn!(?err, %asset_id, "fallback poll fetch failed");
                        continue;
                    }
                };

                let seen = (record.transcode_status, record.transcript_status);
                if last_seen != Some(seen) {
                    last_seen = Some(seen);
                    tracker.lock().await.apply_record(&record);
                }
                if matches!(
                    record.transcript_status,
                    Some(TranscriptStatus::Completed) | Some(TranscriptStatus::Error)
                ) {
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for FallbackPoll {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
