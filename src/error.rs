//! Typed error taxonomy for capture and upload. Server-side processing
//! errors are not here: they surface through the pipeline tracker as a
//! terminal notification state, never as a Rust error at the call site.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera/microphone permission denied")]
    PermissionDenied,
    #[error("no matching capture device available")]
    DeviceUnavailable,
    #[error("capture device is busy")]
    DeviceBusy,
    #[error("none of the candidate recording formats is supported")]
    UnsupportedFormat,
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),
    #[error("device did not become ready within {0:?}")]
    Timeout(std::time::Duration),
    #[error("operation not allowed while recording is active")]
    RecordingActive,
    #[error("no active device stream")]
    NotInitialized,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload allocation failed: {0}")]
    Allocation(String),
    #[error("gave up on chunk at offset {offset} after {attempts} attempts")]
    Exhausted { offset: u64, attempts: u32 },
    #[error("upload was cancelled before the final chunk was flushed")]
    Aborted,
}
