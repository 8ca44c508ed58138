//! Shared recording fake for the ingest service.
#![allow(dead_code)]
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use shelfshot::api::IngestService;
use shelfshot::model::{AllocatedUpload, AssetRecord, CaptureMeta};

/// One observed chunk PUT, with its wall-clock window.
#[derive(Debug, Clone)]
pub struct ChunkCall {
    pub start: u64,
    pub len: usize,
    pub total: Option<u64>,
    pub began: Instant,
    pub ended: Instant,
}

#[derive(Default)]
pub struct RecordingIngest {
    pub chunks: Mutex<Vec<ChunkCall>>,
    /// Artificial transmission time, for overlap assertions.
    pub chunk_delay: Option<Duration>,
    /// Every chunk PUT fails when set.
    pub fail_puts: AtomicBool,
    /// Records served by `fetch_asset`, keyed by id.
    pub assets: Mutex<HashMap<Uuid, AssetRecord>>,
    pub fetch_count: AtomicUsize,
    /// Whether allocation responses carry a processing session id.
    pub with_session_id: bool,
    /// Every side-channel frame submission fails when set.
    pub fail_frames: AtomicBool,
    pub frames_submitted: AtomicUsize,
}

/// Minimal device stream for wiring tests: serves frames and counts closes.
#[derive(Default)]
pub struct FakeDeviceStream {
    pub closed: AtomicUsize,
}

#[async_trait]
impl shelfshot::capture::DeviceStream for FakeDeviceStream {
    async fn wait_ready(&self) -> std::result::Result<(), shelfshot::CaptureError> {
        Ok(())
    }

    fn supports_format(&self, _mime: &str) -> bool {
        true
    }

    async fn grab_frame(
        &self,
    ) -> std::result::Result<shelfshot::capture::Frame, shelfshot::CaptureError> {
        Ok(shelfshot::capture::Frame {
            width: 1,
            height: 1,
            rgba: vec![0, 0, 0, 255],
        })
    }

    async fn encode_frame(
        &self,
        frame: &shelfshot::capture::Frame,
    ) -> std::result::Result<Bytes, shelfshot::CaptureError> {
        Ok(Bytes::from(frame.rgba.clone()))
    }

    async fn start_encoder(
        &self,
        _mime: &str,
        _timeslice: Option<Duration>,
    ) -> std::result::Result<tokio::sync::mpsc::Receiver<Bytes>, shelfshot::CaptureError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn stop_encoder(&self) {}

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordingIngest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_calls(&self) -> Vec<ChunkCall> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn put_asset(&self, record: AssetRecord) {
        self.assets.lock().unwrap().insert(record.id, record);
    }

    pub fn remove_asset(&self, id: Uuid) {
        self.assets.lock().unwrap().remove(&id);
    }
}

#[async_trait]
impl IngestService for RecordingIngest {
    async fn allocate_upload(
        &self,
        _meta: &CaptureMeta,
        _correlation_id: Uuid,
    ) -> Result<AllocatedUpload> {
        Ok(AllocatedUpload {
            upload_url: "https://ingest.test/u/session".into(),
            asset_id: Uuid::new_v4(),
            processing_session_id: self.with_session_id.then(|| "ps-1".to_string()),
        })
    }

    async fn put_chunk(
        &self,
        _upload_url: &str,
        start: u64,
        body: Bytes,
        total: Option<u64>,
    ) -> Result<()> {
        let began = Instant::now();
        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        let ended = Instant::now();
        self.chunks.lock().unwrap().push(ChunkCall {
            start,
            len: body.len(),
            total,
            began,
            ended,
        });
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(anyhow!("injected transport failure"));
        }
        Ok(())
    }

    async fn analyze_frame(&self, _session_id: &str, _frame: Bytes) -> Result<()> {
        self.frames_submitted.fetch_add(1, Ordering::SeqCst);
        if self.fail_frames.load(Ordering::SeqCst) {
            return Err(anyhow!("injected side-channel failure"));
        }
        Ok(())
    }

    async fn fetch_asset(&self, id: Uuid) -> Result<Option<AssetRecord>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.assets.lock().unwrap().get(&id).cloned())
    }

    async fn issue_media_token(&self, handle: &str, seek_ms: Option<u64>) -> Result<String> {
        Ok(format!("tok-{handle}-{seek_ms:?}"))
    }

    async fn add_tag(&self, _asset_id: Uuid, _tag_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn remove_tag(&self, _asset_id: Uuid, _tag_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn assign_room(&self, _asset_id: Uuid, _room_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn clear_room(&self, _asset_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn delete_asset(&self, _id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn delete_object(&self, _handle: &str) -> Result<()> {
        Ok(())
    }
}

pub fn upload_cfg(chunk_size: usize) -> shelfshot::config::Upload {
    shelfshot::config::Upload {
        chunk_size,
        retry_attempts: 3,
        retry_backoff_ms: 1,
        data_dir: String::new(),
    }
}

pub fn test_config(chunk_size: usize, data_dir: &str) -> shelfshot::Config {
    shelfshot::Config {
        service: shelfshot::config::Service {
            base_url: "https://ingest.test/".into(),
            api_key: "test-key".into(),
        },
        upload: shelfshot::config::Upload {
            chunk_size,
            retry_attempts: 3,
            retry_backoff_ms: 1,
            data_dir: data_dir.to_string(),
        },
        capture: shelfshot::config::Capture {
            device_ready_timeout_ms: 100,
            timeslice_ms: 5,
            frame_interval_ms: 5,
        },
        pipeline: shelfshot::config::Pipeline {
            poll_interval_ms: 10,
            dismiss_after_secs: 180,
        },
    }
}

pub fn video_meta() -> CaptureMeta {
    CaptureMeta {
        kind: shelfshot::MediaKind::SourceVideo,
        mime_type: "video/webm".into(),
        room_id: None,
    }
}

pub fn asset_record(id: Uuid, kind: shelfshot::MediaKind) -> AssetRecord {
    AssetRecord {
        id,
        kind,
        name: "asset".into(),
        description: None,
        value: None,
        tags: vec![],
        room_id: None,
        media_handle: None,
        transcode_status: None,
        transcript_status: None,
        transcript_error: None,
        source_asset_id: None,
        created_at: chrono::Utc::now(),
    }
}
