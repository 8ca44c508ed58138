//! Best-effort "resume after reload" marker.
//!
//! The only local state the library persists: a correlation id plus a
//! timestamp, written when a streaming upload starts and cleared when it
//! finishes. A restarting host can use a recent marker to re-associate a
//! just-submitted upload; anything older is discarded.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const MARKER_FILE: &str = "upload-resume.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeMarker {
    pub local_id: Uuid,
    pub created_at: DateTime<Utc>,
}

fn marker_path(dir: &str) -> PathBuf {
    Path::new(dir).join(MARKER_FILE)
}

/// Write a marker for `local_id`, replacing any existing one.
pub async fn store(dir: &str, local_id: Uuid) -> Result<()> {
    let marker = ResumeMarker {
        local_id,
        created_at: Utc::now(),
    };
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create data dir: {dir}"))?;
    let body = serde_json::to_vec(&marker).context("failed to encode resume marker")?;
    tokio::fs::write(marker_path(dir), body)
        .await
        .context("failed to write resume marker")?;
    Ok(())
}

/// Read and consume the marker if it exists and is younger than `max_age`.
/// Stale or unreadable markers are removed and ignored.
pub async fn take_recent(dir: &str, max_age: Duration) -> Option<ResumeMarker> {
    let path = marker_path(dir);
    let body = tokio::fs::read(&path).await.ok()?;
    let _ = tokio::fs::remove_file(&path).await;
    let marker: ResumeMarker = match serde_json::from_slice(&body) {
        Ok(marker) => marker,
        Err(err) => {
            debug!(?err, "discarding unreadable resume marker");
            return None;
        }
    };
    let max_age = chrono::Duration::from_std(max_age).ok()?;
    if Utc::now() - marker.created_at > max_age {
        debug!(local_id = %marker.local_id, "discarding stale resume marker");
        return None;
    }
    Some(marker)
}

/// Remove the marker, ignoring a missing file.
pub async fn clear(dir: &str) {
    let _ = tokio::fs::remove_file(marker_path(dir)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn store_and_take_roundtrip() {
        let td = tempdir().unwrap();
        let dir = td.path().to_str().unwrap();
        let id = Uuid::new_v4();
        store(dir, id).await.unwrap();

        let marker = take_recent(dir, Duration::from_secs(60)).await.unwrap();
        assert_eq!(marker.local_id, id);
        // Consumed on take.
        assert!(take_recent(dir, Duration::from_secs(60)).await.is_none());
    }

    #[tokio::test]
    async fn stale_marker_is_discarded() {
        let td = tempdir().unwrap();
        let dir = td.path().to_str().unwrap();
        let marker = ResumeMarker {
            local_id: Uuid::new_v4(),
            created_at: Utc::now() - chrono::Duration::hours(2),
        };
        tokio::fs::write(
            marker_path(dir),
            serde_json::to_vec(&marker).unwrap(),
        )
        .await
        .unwrap();
        assert!(take_recent(dir, Duration::from_secs(60)).await.is_none());
    }

    #[tokio::test]
    async fn clear_tolerates_missing_marker() {
        let td = tempdir().unwrap();
        clear(td.path().to_str().unwrap()).await;
    }

    #[tokio::test]
    async fn garbage_marker_is_discarded() {
        let td = tempdir().unwrap();
        let dir = td.path().to_str().unwrap();
        tokio::fs::write(marker_path(dir), b"not json").await.unwrap();
        assert!(take_recent(dir, Duration::from_secs(60)).await.is_none());
    }
}
