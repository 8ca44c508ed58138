//! Chunked resumable upload.
//!
//! Bytes from the encoder accumulate in a session buffer; full chunks are
//! PUT to the ingestion endpoint strictly in sequence under a transmit lock,
//! and the remainder is flushed as the final, length-declaring chunk when the
//! stream ends. Chunk production may outrun transmission; the lock, not a
//! queue, is what serializes the wire.
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::IngestService;
use crate::capture::DeviceStream;
use crate::error::UploadError;
use crate::model::{AllocatedUpload, CaptureMeta};

pub mod frame_channel;
pub mod resume;

use frame_channel::FrameSideChannel;

/// Ephemeral state for one in-flight upload.
pub struct UploadSession {
    pub local_id: Uuid,
    remote: AllocatedUpload,
    /// Byte offset already acknowledged by the remote. Never decreases;
    /// advances only after a chunk PUT succeeds.
    next_offset: u64,
    /// Captured but not yet transmitted bytes.
    pending: BytesMut,
}

impl UploadSession {
    pub fn remote(&self) -> &AllocatedUpload {
        &self.remote
    }

    pub fn asset_id(&self) -> Uuid {
        self.remote.asset_id
    }

    pub fn bytes_sent(&self) -> u64 {
        self.next_offset
    }
}

/// Delivers a byte stream to a resumable-upload endpoint.
#[derive(Clone)]
pub struct ChunkedUploadClient {
    api: Arc<dyn IngestService>,
    chunk_size: usize,
    retry_attempts: u32,
    retry_backoff: Duration,
    /// Serializes chunk PUTs: at most one in flight, across all callers
    /// holding a clone of this client.
    transmit_lock: Arc<Mutex<()>>,
}

impl ChunkedUploadClient {
    pub fn new(api: Arc<dyn IngestService>, cfg: &crate::config::Upload) -> Self {
        Self {
            api,
            chunk_size: cfg.chunk_size,
            retry_attempts: cfg.retry_attempts,
            retry_backoff: cfg.retry_backoff(),
            transmit_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Ask the allocation endpoint for an upload target. Nothing else is
    /// touched if this fails.
    pub async fn allocate(
        &self,
        meta: &CaptureMeta,
        local_id: Uuid,
    ) -> Result<UploadSession, UploadError> {
        let remote = self
            .api
            .allocate_upload(meta, local_id)
            .await
            .map_err(|err| UploadError::Allocation(err.to_string()))?;
        Ok(UploadSession {
            local_id,
            remote,
            next_offset: 0,
            pending: BytesMut::new(),
        })
    }

    /// Buffer incoming bytes and transmit full chunks. A chunk-sized residue
    /// is deliberately held back so the final flush always has bytes to
    /// declare the total length with.
    pub async fn push(
        &self,
        session: &mut UploadSession,
        data: &[u8],
    ) -> Result<(), UploadError> {
        session.pending.extend_from_slice(data);
        while session.pending.len() > self.chunk_size {
            let chunk = session.pending.split_to(self.chunk_size).freeze();
            self.send_chunk(session, chunk, None).await?;
        }
        Ok(())
    }

    /// Flush the residue as the final chunk, declaring the exact total so
    /// the remote can finalize the object. The session is complete only
    /// once this returns `Ok`.
    pub async fn finish(&self, session: &mut UploadSession) -> Result<u64, UploadError> {
        let total = session.next_offset + session.pending.len() as u64;
        if total == 0 {
            warn!(local_id = %session.local_id, "finishing upload with zero bytes");
            return Ok(0);
        }
        let last = session.pending.split_off(0).freeze();
        self.send_chunk(session, last, Some(total)).await?;
        info!(
            asset_id = %session.asset_id(),
            total,
            "upload finalized"
        );
        Ok(total)
    }

    /// Transmit one chunk, holding the transmit lock for the whole call
    /// including its retries. Linear backoff, bounded attempts.
    async fn send_chunk(
        &self,
        session: &mut UploadSession,
        chunk: Bytes,
        total: Option<u64>,
    ) -> Result<(), UploadError> {
        let offset = session.next_offset;
        let len = chunk.len() as u64;
        let _guard = self.transmit_lock.lock().await;

        for attempt in 1..=self.retry_attempts {
            match self
                .api
                .put_chunk(&session.remote.upload_url, offset, chunk.clone(), total)
                .await
            {
                Ok(()) => {
                    session.next_offset = offset + len;
                    return Ok(());
                }
                Err(err) => {
                    warn!(?err, offset, attempt, "chunk transmission failed");
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_backoff * attempt).await;
                    }
                }
            }
        }
        Err(UploadError::Exhausted {
            offset,
            attempts: self.retry_attempts,
        })
    }
}

/// Outcome of a completed streaming upload.
#[derive(Debug, Clone)]
pub struct FinishedUpload {
    pub local_id: Uuid,
    pub asset_id: Uuid,
    pub total_bytes: u64,
}

/// Handle to a streaming upload running in the background.
pub struct StreamingUpload {
    pub local_id: Uuid,
    pub asset_id: Uuid,
    task: JoinHandle<Result<FinishedUpload, UploadError>>,
}

impl StreamingUpload {
    /// Wait for the upload to drain, flush its final chunk, and release the
    /// device stream.
    pub async fn finish(self) -> Result<FinishedUpload, UploadError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                warn!(?err, "upload task panicked or was aborted");
                Err(UploadError::Aborted)
            }
        }
    }

    /// Abandon the upload. The remote object is left incomplete; this is a
    /// failed upload, never a successful short one.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Wires capture output to the chunked client: allocation, drain, side
/// channel, finalization, and resource release in the required order.
pub struct UploadEngine {
    client: ChunkedUploadClient,
    api: Arc<dyn IngestService>,
    frame_interval: Duration,
    data_dir: Option<String>,
}

impl UploadEngine {
    pub fn new(api: Arc<dyn IngestService>, cfg: &crate::config::Config) -> Self {
        Self {
            client: ChunkedUploadClient::new(api.clone(), &cfg.upload),
            api,
            frame_interval: cfg.capture.frame_interval(),
            data_dir: (!cfg.upload.data_dir.trim().is_empty())
                .then(|| cfg.upload.data_dir.clone()),
        }
    }

    pub fn client(&self) -> &ChunkedUploadClient {
        &self.client
    }

    /// Upload a single in-memory blob (photo or buffered recording) through
    /// the same chunking loop.
    #[instrument(skip_all, fields(kind = meta.kind.as_str()))]
    pub async fn upload_buffered(
        &self,
        meta: &CaptureMeta,
        blob: Bytes,
    ) -> Result<FinishedUpload, UploadError> {
        let local_id = Uuid::new_v4();
        let mut session = self.client.allocate(meta, local_id).await?;
        self.client.push(&mut session, &blob).await?;
        let total_bytes = self.client.finish(&mut session).await?;
        Ok(FinishedUpload {
            local_id,
            asset_id: session.asset_id(),
            total_bytes,
        })
    }

    /// Start draining a live chunk stream into a freshly allocated upload.
    ///
    /// Allocation happens before anything else; if it fails, no timer or
    /// side channel exists yet and the caller still owns the device stream.
    /// The background task finalizes once the chunk channel closes (the
    /// encoder was stopped), then releases the stream. On any upload failure
    /// the side channel and stream are released before the error surfaces.
    #[instrument(skip_all, fields(kind = meta.kind.as_str()))]
    pub async fn begin_streaming(
        &self,
        meta: &CaptureMeta,
        mut chunks: mpsc::Receiver<Bytes>,
        stream: Option<Arc<dyn DeviceStream>>,
    ) -> Result<StreamingUpload, UploadError> {
        let local_id = Uuid::new_v4();
        let mut session = self.client.allocate(meta, local_id).await?;
        let asset_id = session.asset_id();

        if let Some(dir) = &self.data_dir {
            // Best effort: a reload mid-upload can re-associate via this.
            if let Err(err) = resume::store(dir, local_id).await {
                warn!(?err, "failed to store resume marker");
            }
        }

        let side_channel = match (&stream, &session.remote.processing_session_id) {
            (Some(stream), Some(session_id)) => Some(FrameSideChannel::spawn(
                self.api.clone(),
                stream.clone(),
                session_id.clone(),
                self.frame_interval,
            )),
            _ => None,
        };

        let client = self.client.clone();
        let data_dir = self.data_dir.clone();
        let task = tokio::spawn(async move {
            let result = async {
                while let Some(chunk) = chunks.recv().await {
                    client.push(&mut session, &chunk).await?;
                }
                // Channel closed: encoder stopped. Flush the residue with a
                // known total, then the resources may go.
                client.finish(&mut session).await
            }
            .await;

            // Release order: the side channel and device stream are held
            // until the final PUT has either succeeded or failed for good.
            if let Some(side) = side_channel {
                side.stop();
            }
            if let Some(stream) = stream {
                stream.close().await;
            }
            if let Some(dir) = data_dir {
                resume::clear(&dir).await;
            }

            match result {
                Ok(total_bytes) => Ok(FinishedUpload {
                    local_id,
                    asset_id,
                    total_bytes,
                }),
                Err(err) => {
                    warn!(?err, %asset_id, "streaming upload failed");
                    Err(err)
                }
            }
        });

        Ok(StreamingUpload {
            local_id,
            asset_id,
            task,
        })
    }
}
