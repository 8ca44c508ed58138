//! Memoized short-lived media access tokens.
//!
//! Keyed by `(handle, seek time)`: a token scoped to a specific instant is a
//! different credential from one for the whole object, so a handle with no
//! seek and the same handle at seek 0 are distinct entries. There is no
//! expiry bookkeeping; a stale token fails at render time and the caller
//! forces a re-fetch.
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::api::IngestService;

type Key = (String, Option<u64>);

pub struct ThumbnailTokenCache {
    api: Arc<dyn IngestService>,
    entries: HashMap<Key, String>,
}

impl ThumbnailTokenCache {
    pub fn new(api: Arc<dyn IngestService>) -> Self {
        Self {
            api,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, handle: &str, seek_ms: Option<u64>) -> Option<&str> {
        self.entries
            .get(&(handle.to_string(), seek_ms))
            .map(String::as_str)
    }

    /// Always hits the service and overwrites the cached entry. Used on
    /// demand and for explicit retry actions.
    pub async fn fetch(&mut self, handle: &str, seek_ms: Option<u64>) -> Result<String> {
        let token = self.api.issue_media_token(handle, seek_ms).await?;
        debug!(handle, ?seek_ms, "media token issued");
        self.entries
            .insert((handle.to_string(), seek_ms), token.clone());
        Ok(token)
    }

    /// Cached token if present, otherwise fetch and populate.
    pub async fn get_or_fetch(&mut self, handle: &str, seek_ms: Option<u64>) -> Result<String> {
        if let Some(token) = self.get(handle, seek_ms) {
            return Ok(token.to_string());
        }
        self.fetch(handle, seek_ms).await
    }

    pub fn invalidate(&mut self, handle: &str, seek_ms: Option<u64>) {
        self.entries.remove(&(handle.to_string(), seek_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingApi {
        issued: AtomicUsize,
    }

    #[async_trait]
    impl IngestService for CountingApi {
        async fn allocate_upload(
            &self,
            _meta: &crate::model::CaptureMeta,
            _correlation_id: Uuid,
        ) -> Result<crate::model::AllocatedUpload> {
            unreachable!("not used by token tests")
        }
        async fn put_chunk(
            &self,
            _upload_url: &str,
            _start: u64,
            _body: Bytes,
            _total: Option<u64>,
        ) -> Result<()> {
            unreachable!("not used by token tests")
        }
        async fn analyze_frame(&self, _session_id: &str, _frame: Bytes) -> Result<()> {
            unreachable!("not used by token tests")
        }
        async fn fetch_asset(&self, _id: Uuid) -> Result<Option<crate::model::AssetRecord>> {
            unreachable!("not used by token tests")
        }
        async fn issue_media_token(&self, handle: &str, seek_ms: Option<u64>) -> Result<String> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(format!("tok-{handle}-{seek_ms:?}-{n}"))
        }
        async fn add_tag(&self, _asset_id: Uuid, _tag_id: Uuid) -> Result<()> {
            unreachable!("not used by token tests")
        }
        async fn remove_tag(&self, _asset_id: Uuid, _tag_id: Uuid) -> Result<()> {
            unreachable!("not used by token tests")
        }
        async fn assign_room(&self, _asset_id: Uuid, _room_id: Uuid) -> Result<()> {
            unreachable!("not used by token tests")
        }
        async fn clear_room(&self, _asset_id: Uuid) -> Result<()> {
            unreachable!("not used by token tests")
        }
        async fn delete_asset(&self, _id: Uuid) -> Result<()> {
            unreachable!("not used by token tests")
        }
        async fn delete_object(&self, _handle: &str) -> Result<()> {
            unreachable!("not used by token tests")
        }
    }

    #[tokio::test]
    async fn get_or_fetch_populates_lazily() {
        let api = Arc::new(CountingApi::default());
        let mut cache = ThumbnailTokenCache::new(api.clone());

        assert!(cache.get("m-1", None).is_none());
        let first = cache.get_or_fetch("m-1", None).await.unwrap();
        let second = cache.get_or_fetch("m-1", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(api.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn seek_time_is_part_of_the_key() {
        let api = Arc::new(CountingApi::default());
        let mut cache = ThumbnailTokenCache::new(api.clone());

        let plain = cache.get_or_fetch("m-1", None).await.unwrap();
        let at_zero = cache.get_or_fetch("m-1", Some(0)).await.unwrap();
        assert_ne!(plain, at_zero);
        assert_eq!(api.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_always_refreshes() {
        let api = Arc::new(CountingApi::default());
        let mut cache = ThumbnailTokenCache::new(api.clone());

        let first = cache.fetch("m-1", None).await.unwrap();
        let second = cache.fetch("m-1", None).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.get("m-1", None), Some(second.as_str()));
    }

    #[tokio::test]
    async fn invalidate_forces_next_fetch() {
        let api = Arc::new(CountingApi::default());
        let mut cache = ThumbnailTokenCache::new(api.clone());
        cache.get_or_fetch("m-1", Some(1500)).await.unwrap();
        cache.invalidate("m-1", Some(1500));
        assert!(cache.get("m-1", Some(1500)).is_none());
    }
}
