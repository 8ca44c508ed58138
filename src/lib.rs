//! shelfshot: capture media on-device, stream it to an ingestion service
//! with chunked resumable uploads, and mirror the resulting asset catalog
//! and per-upload pipeline progress from a push-based change feed.
//!
//! This is an embedded client library; the host UI owns rendering and
//! wiring, the library owns devices, bytes, and state.

pub mod api;
pub mod bulk;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod model;
pub mod pipeline;
pub mod tokens;
pub mod upload;

pub use api::{IngestClient, IngestService};
pub use bulk::{BulkOp, BulkOperationCoordinator, BulkOutcome};
pub use capture::{MediaCaptureSession, StartedRecording};
pub use catalog::{AssetCatalog, CatalogTotals};
pub use config::Config;
pub use error::{CaptureError, UploadError};
pub use feed::{FeedEvent, FeedRouter};
pub use model::{AssetRecord, FacingMode, MediaKind, PipelineStatus, RecordingMode};
pub use pipeline::{FallbackPoll, PipelineTracker};
pub use tokens::ThumbnailTokenCache;
pub use upload::{ChunkedUploadClient, FinishedUpload, StreamingUpload, UploadEngine};
