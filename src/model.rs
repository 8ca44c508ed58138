use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of stored media. Raw source videos stop being "countable" once the
/// analysis pipeline has extracted item records from them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Item,
    SourceVideo,
}

impl MediaKind {
    /// Whether an asset of this kind counts toward the user-visible total.
    pub fn is_countable(&self) -> bool {
        matches!(self, MediaKind::Photo | MediaKind::Item)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Item => "item",
            MediaKind::SourceVideo => "source_video",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    /// Encoder callbacks feed the resumable upload while recording continues.
    Streaming,
    /// Chunks accumulate locally and are concatenated on stop.
    Buffered,
}

/// Server-side transcode progress as reported on the change feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Client-visible progress of one upload's server-side processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Uploading,
    Processing,
    PreparingTranscription,
    Transcribing,
    Analyzing,
    Complete,
    Error,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Complete | PipelineStatus::Error)
    }
}

/// Canonical asset row, mirrored locally by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetRecord {
    pub id: Uuid,
    pub kind: MediaKind,
    pub name: String,
    pub description: Option<String>,
    /// Estimated monetary value; absent counts as zero in aggregates.
    pub value: Option<f64>,
    #[serde(default)]
    pub tags: Vec<Uuid>,
    pub room_id: Option<Uuid>,
    /// Opaque handle into object storage, used for token issuance.
    pub media_handle: Option<String>,
    pub transcode_status: Option<TranscodeStatus>,
    pub transcript_status: Option<TranscriptStatus>,
    pub transcript_error: Option<String>,
    /// Set on derived item records; points at the originating source video.
    pub source_asset_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AssetRecord {
    /// Replace the tag set, deduplicating. Tags are a set at the store level;
    /// the local mirror keeps that invariant too.
    pub fn set_tags(&mut self, mut tags: Vec<Uuid>) {
        tags.sort();
        tags.dedup();
        self.tags = tags;
    }

    pub fn add_tag(&mut self, tag: Uuid) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn remove_tag(&mut self, tag: Uuid) {
        self.tags.retain(|t| *t != tag);
    }
}

/// Metadata sent to the allocation endpoint before any bytes move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub kind: MediaKind,
    pub mime_type: String,
    pub room_id: Option<Uuid>,
}

/// Response from the allocation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatedUpload {
    pub upload_url: String,
    pub asset_id: Uuid,
    pub processing_session_id: Option<String>,
}
