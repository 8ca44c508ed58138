//! Camera/microphone acquisition, photo capture, and recording.
//!
//! The platform surface (device enumeration, preview, encoder) sits behind
//! the [`MediaDevice`] / [`DeviceStream`] traits; the session owns lifecycle
//! and policy: one device grant at a time, bounded ready wait, format
//! negotiation, and idempotent teardown on every exit path.
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::CaptureError;
use crate::model::{FacingMode, RecordingMode};

/// Candidate recording formats, probed in preference order. If none is
/// supported the recording never starts.
pub const PREFERRED_FORMATS: [&str; 3] = [
    "video/webm;codecs=vp9,opus",
    "video/webm",
    "video/mp4",
];

/// One raw RGBA frame pulled from the live preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, row-major, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

impl Frame {
    /// Flip each row in place. Applied to photos taken with the user-facing
    /// camera so the saved image matches the mirrored preview.
    pub fn mirror_horizontal(&mut self) {
        let row_len = self.width as usize * 4;
        for row in self.rgba.chunks_exact_mut(row_len) {
            let (mut left, mut right) = (0usize, row_len.saturating_sub(4));
            while left < right {
                for i in 0..4 {
                    row.swap(left + i, right + i);
                }
                left += 4;
                right -= 4;
            }
        }
    }
}

/// A finalized still image ready for upload.
#[derive(Debug, Clone)]
pub struct Photo {
    pub data: Bytes,
    pub mime_type: String,
}

#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Request device access for the given facing mode. Fails with
    /// `PermissionDenied` / `DeviceUnavailable` per platform response.
    async fn open(&self, facing: FacingMode) -> Result<Arc<dyn DeviceStream>, CaptureError>;
}

#[async_trait]
pub trait DeviceStream: Send + Sync {
    /// Resolves once the preview is producing frames.
    async fn wait_ready(&self) -> Result<(), CaptureError>;

    fn supports_format(&self, mime: &str) -> bool;

    async fn grab_frame(&self) -> Result<Frame, CaptureError>;

    /// Encode a frame to an image blob (JPEG on every platform we target).
    async fn encode_frame(&self, frame: &Frame) -> Result<Bytes, CaptureError>;

    /// Start the encoder. With a timeslice the encoder emits a chunk per
    /// interval; without one it emits a single chunk stream on stop.
    async fn start_encoder(
        &self,
        mime: &str,
        timeslice: Option<Duration>,
    ) -> Result<mpsc::Receiver<Bytes>, CaptureError>;

    /// Finalize the encoder; the chunk channel closes after the last chunk.
    async fn stop_encoder(&self);

    /// Release the device grant. Must be idempotent.
    async fn close(&self);
}

enum ActiveRecording {
    Streaming,
    Buffered {
        collector: JoinHandle<BytesMut>,
    },
}

pub enum StartedRecording {
    /// Chunks arrive on this receiver as the encoder produces them; hand it
    /// to the upload engine.
    Streaming(mpsc::Receiver<Bytes>),
    Buffered,
}

pub struct MediaCaptureSession {
    device: Arc<dyn MediaDevice>,
    ready_timeout: Duration,
    timeslice: Duration,
    stream: Option<Arc<dyn DeviceStream>>,
    facing: FacingMode,
    recording: Option<ActiveRecording>,
    mime_type: Option<String>,
}

impl MediaCaptureSession {
    pub fn new(device: Arc<dyn MediaDevice>, cfg: &crate::config::Capture) -> Self {
        Self {
            device,
            ready_timeout: cfg.device_ready_timeout(),
            timeslice: cfg.timeslice(),
            stream: None,
            facing: FacingMode::Environment,
            recording: None,
            mime_type: None,
        }
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// The stream handle, for wiring the frame side channel. `None` before
    /// `initialize` or after teardown.
    pub fn stream(&self) -> Option<Arc<dyn DeviceStream>> {
        self.stream.clone()
    }

    /// Negotiated recording format, set while a recording is active.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Acquire the device for `facing`. Any previously held grant is fully
    /// released first; the platform never sees two simultaneous grants.
    pub async fn initialize(&mut self, facing: FacingMode) -> Result<(), CaptureError> {
        self.teardown().await;
        let stream = self.device.open(facing).await?;
        match tokio::time::timeout(self.ready_timeout, stream.wait_ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                stream.close().await;
                return Err(err);
            }
            Err(_) => {
                stream.close().await;
                return Err(CaptureError::Timeout(self.ready_timeout));
            }
        }
        info!(?facing, "capture device ready");
        self.facing = facing;
        self.stream = Some(stream);
        Ok(())
    }

    /// Tear down and re-acquire with the other facing mode. Disallowed while
    /// a recording is active.
    pub async fn switch_facing(&mut self, facing: FacingMode) -> Result<(), CaptureError> {
        if self.recording.is_some() {
            return Err(CaptureError::RecordingActive);
        }
        self.initialize(facing).await
    }

    /// Grab one preview frame and encode it. User-facing captures are
    /// mirrored so the result matches what the preview showed.
    pub async fn capture_photo(&self) -> Result<Photo, CaptureError> {
        let stream = self.stream.as_ref().ok_or(CaptureError::NotInitialized)?;
        let mut frame = stream.grab_frame().await?;
        if self.facing == FacingMode::User {
            frame.mirror_horizontal();
        }
        let data = stream.encode_frame(&frame).await?;
        Ok(Photo {
            data,
            mime_type: "image/jpeg".into(),
        })
    }

    /// Probe the candidate formats and start the encoder. Fails with
    /// `UnsupportedFormat` before the encoder is touched if nothing matches.
    pub async fn start_recording(
        &mut self,
        mode: RecordingMode,
    ) -> Result<StartedRecording, CaptureError> {
        if self.recording.is_some() {
            return Err(CaptureError::RecordingActive);
        }
        let stream = self
            .stream
            .clone()
            .ok_or(CaptureError::NotInitialized)?;
        let mime = PREFERRED_FORMATS
            .iter()
            .find(|m| stream.supports_format(m))
            .copied()
            .ok_or(CaptureError::UnsupportedFormat)?;

        let timeslice = match mode {
            RecordingMode::Streaming => Some(self.timeslice),
            RecordingMode::Buffered => None,
        };
        let mut rx = stream.start_encoder(mime, timeslice).await?;
        info!(mime, ?mode, "recording started");
        self.mime_type = Some(mime.to_string());

        match mode {
            RecordingMode::Streaming => {
                self.recording = Some(ActiveRecording::Streaming);
                Ok(StartedRecording::Streaming(rx))
            }
            RecordingMode::Buffered => {
                let collector = tokio::spawn(async move {
                    let mut buf = BytesMut::new();
                    while let Some(chunk) = rx.recv().await {
                        buf.extend_from_slice(&chunk);
                    }
                    buf
                });
                self.recording = Some(ActiveRecording::Buffered { collector });
                Ok(StartedRecording::Buffered)
            }
        }
    }

    /// Finalize the encoder. Buffered recordings return the concatenated
    /// blob; streaming recordings return `None` (the closed chunk channel
    /// tells the upload engine to flush and finalize). The encoder is always
    /// stopped, even when the collector fails.
    pub async fn stop_recording(&mut self) -> Result<Option<Bytes>, CaptureError> {
        let recording = self.recording.take().ok_or(CaptureError::NotInitialized)?;
        let stream = self
            .stream
            .clone()
            .ok_or(CaptureError::NotInitialized)?;
        stream.stop_encoder().await;
        self.mime_type = None;

        match recording {
            ActiveRecording::Streaming => Ok(None),
            ActiveRecording::Buffered { collector } => {
                let blob = collector.await.map_err(|err| {
                    warn!(?err, "chunk collector failed");
                    CaptureError::CaptureFailed("chunk collector failed".into())
                })?;
                Ok(Some(blob.freeze()))
            }
        }
    }

    /// Release everything. Safe to call repeatedly and on error paths; the
    /// underlying `close` is idempotent by contract.
    pub async fn teardown(&mut self) {
        if let Some(ActiveRecording::Buffered { collector }) = self.recording.take() {
            collector.abort();
        }
        self.mime_type = None;
        if let Some(stream) = self.stream.take() {
            stream.stop_encoder().await;
            stream.close().await;
        }
    }
}
