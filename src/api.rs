use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::model::{AllocatedUpload, AssetRecord, CaptureMeta};

/// Everything the core talks to over the wire: upload allocation, chunk
/// ingestion, asset reads, relation mutations, and token issuance. Tests
/// substitute recording fakes for this trait.
#[async_trait]
pub trait IngestService: Send + Sync {
    /// Request an upload target before any bytes are sent.
    async fn allocate_upload(
        &self,
        meta: &CaptureMeta,
        correlation_id: Uuid,
    ) -> Result<AllocatedUpload>;

    /// PUT one chunk at `start`. `total` is `Some` only for the final chunk.
    /// 2xx and 308 ("resume incomplete") both count as accepted.
    async fn put_chunk(&self, upload_url: &str, start: u64, body: Bytes, total: Option<u64>)
        -> Result<()>;

    /// Side-channel frame submission for real-time analysis.
    async fn analyze_frame(&self, session_id: &str, frame: Bytes) -> Result<()>;

    /// Full read including joined relation data. `None` means not found.
    async fn fetch_asset(&self, id: Uuid) -> Result<Option<AssetRecord>>;

    /// Short-lived access token for thumbnail/playback use.
    async fn issue_media_token(&self, handle: &str, seek_ms: Option<u64>) -> Result<String>;

    async fn add_tag(&self, asset_id: Uuid, tag_id: Uuid) -> Result<()>;
    async fn remove_tag(&self, asset_id: Uuid, tag_id: Uuid) -> Result<()>;
    async fn assign_room(&self, asset_id: Uuid, room_id: Uuid) -> Result<()>;
    async fn clear_room(&self, asset_id: Uuid) -> Result<()>;

    async fn delete_asset(&self, id: Uuid) -> Result<()>;
    async fn delete_object(&self, handle: &str) -> Result<()>;
}

/// REST implementation of [`IngestService`].
#[derive(Clone)]
pub struct IngestClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for IngestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl IngestClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.service.base_url).context("invalid service.base_url")?;
        Ok(Self::with_base_url(cfg.service.api_key.clone(), base_url))
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("shelfshot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path: {path}"))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Build the chunk PUT without sending it. Exposed so the header
    /// contract is unit-testable without a live endpoint.
    pub fn build_chunk_request(
        &self,
        upload_url: &str,
        start: u64,
        body: Bytes,
        total: Option<u64>,
    ) -> Result<reqwest::Request> {
        let len = body.len() as u64;
        let end = start + len.saturating_sub(1);
        let total_part = total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "*".to_string());
        self.authed(self.http.put(upload_url))
            .header("Content-Length", len)
            .header("Content-Range", format!("bytes {start}-{end}/{total_part}"))
            .body(body)
            .build()
            .context("failed to build chunk request")
    }

    async fn check(res: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, what, "ingest service error: {}", body);
            return Err(anyhow!("{what} failed with {status}: {body}"));
        }
        Ok(res)
    }
}

#[async_trait]
impl IngestService for IngestClient {
    async fn allocate_upload(
        &self,
        meta: &CaptureMeta,
        correlation_id: Uuid,
    ) -> Result<AllocatedUpload> {
        let url = self.endpoint("v1/uploads")?;
        let body = json!({
            "kind": meta.kind.as_str(),
            "mime_type": meta.mime_type,
            "room_id": meta.room_id,
            "correlation_id": correlation_id,
        });
        let res = self
            .authed(self.http.post(url))
            .json(&body)
            .send()
            .await
            .context("failed to reach allocation endpoint")?;
        let res = Self::check(res, "upload allocation").await?;
        let allocated: AllocatedUpload = res
            .json()
            .await
            .context("invalid allocation response JSON")?;
        info!(asset_id = %allocated.asset_id, %correlation_id, "upload session allocated");
        Ok(allocated)
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        start: u64,
        body: Bytes,
        total: Option<u64>,
    ) -> Result<()> {
        let len = body.len();
        let request = self.build_chunk_request(upload_url, start, body, total)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach ingestion endpoint")?;
        // 308 means "partial content accepted, keep going".
        if res.status() == StatusCode::PERMANENT_REDIRECT || res.status().is_success() {
            debug!(start, len, final_chunk = total.is_some(), "chunk accepted");
            return Ok(());
        }
        let status = res.status();
        let body_text = res.text().await.unwrap_or_default();
        Err(anyhow!("chunk rejected with {status}: {body_text}"))
    }

    async fn analyze_frame(&self, session_id: &str, frame: Bytes) -> Result<()> {
        let url = self.endpoint(&format!("v1/sessions/{session_id}/frames"))?;
        let res = self
            .authed(self.http.post(url))
            .header("Content-Type", "image/jpeg")
            .body(frame)
            .send()
            .await
            .context("failed to reach frame analysis endpoint")?;
        Self::check(res, "frame analysis").await?;
        Ok(())
    }

    async fn fetch_asset(&self, id: Uuid) -> Result<Option<AssetRecord>> {
        let url = self.endpoint(&format!("v1/assets/{id}"))?;
        let res = self
            .authed(self.http.get(url))
            .send()
            .await
            .context("failed to fetch asset")?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = Self::check(res, "asset fetch").await?;
        Ok(Some(res.json().await.context("invalid asset JSON")?))
    }

    async fn issue_media_token(&self, handle: &str, seek_ms: Option<u64>) -> Result<String> {
        let mut url = self.endpoint(&format!("v1/media/{handle}/token"))?;
        if let Some(seek) = seek_ms {
            url.query_pairs_mut().append_pair("seek_ms", &seek.to_string());
        }
        let res = self
            .authed(self.http.post(url))
            .send()
            .await
            .context("failed to reach token endpoint")?;
        let res = Self::check(res, "token issuance").await?;
        #[derive(serde::Deserialize)]
        struct TokenResp {
            token: String,
        }
        let payload: TokenResp = res.json().await.context("invalid token JSON")?;
        Ok(payload.token)
    }

    async fn add_tag(&self, asset_id: Uuid, tag_id: Uuid) -> Result<()> {
        let url = self.endpoint(&format!("v1/assets/{asset_id}/tags/{tag_id}"))?;
        let res = self
            .authed(self.http.post(url))
            .send()
            .await
            .context("failed to add tag")?;
        // The endpoint is idempotent: "already associated" comes back as 409.
        if res.status() == StatusCode::CONFLICT {
            debug!(%asset_id, %tag_id, "tag already associated");
            return Ok(());
        }
        Self::check(res, "tag add").await?;
        Ok(())
    }

    async fn remove_tag(&self, asset_id: Uuid, tag_id: Uuid) -> Result<()> {
        let url = self.endpoint(&format!("v1/assets/{asset_id}/tags/{tag_id}"))?;
        let res = self
            .authed(self.http.delete(url))
            .send()
            .await
            .context("failed to remove tag")?;
        if res.status() == StatusCode::NOT_FOUND {
            debug!(%asset_id, %tag_id, "tag link already gone");
            return Ok(());
        }
        Self::check(res, "tag remove").await?;
        Ok(())
    }

    async fn assign_room(&self, asset_id: Uuid, room_id: Uuid) -> Result<()> {
        let url = self.endpoint(&format!("v1/assets/{asset_id}/room"))?;
        let res = self
            .authed(self.http.put(url))
            .json(&json!({ "room_id": room_id }))
            .send()
            .await
            .context("failed to assign room")?;
        if res.status() == StatusCode::CONFLICT {
            debug!(%asset_id, %room_id, "room already assigned");
            return Ok(());
        }
        Self::check(res, "room assign").await?;
        Ok(())
    }

    async fn clear_room(&self, asset_id: Uuid) -> Result<()> {
        let url = self.endpoint(&format!("v1/assets/{asset_id}/room"))?;
        let res = self
            .authed(self.http.delete(url))
            .send()
            .await
            .context("failed to clear room")?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(res, "room clear").await?;
        Ok(())
    }

    async fn delete_asset(&self, id: Uuid) -> Result<()> {
        let url = self.endpoint(&format!("v1/assets/{id}"))?;
        let res = self
            .authed(self.http.delete(url))
            .send()
            .await
            .context("failed to delete asset")?;
        if res.status() == StatusCode::NOT_FOUND {
            debug!(%id, "asset already deleted");
            return Ok(());
        }
        Self::check(res, "asset delete").await?;
        Ok(())
    }

    async fn delete_object(&self, handle: &str) -> Result<()> {
        let url = self.endpoint(&format!("v1/objects/{handle}"))?;
        let res = self
            .authed(self.http.delete(url))
            .send()
            .await
            .context("failed to delete stored object")?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(res, "object delete").await?;
        Ok(())
    }
}
