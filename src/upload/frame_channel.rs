//! Real-time frame side channel.
//!
//! While a streaming upload runs, a still frame is extracted from the live
//! preview on a fixed interval and shipped for analysis. The channel is
//! strictly best-effort: its first failure disables it with a warning and
//! the main chunk sequence never notices.
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::IngestService;
use crate::capture::DeviceStream;

pub struct FrameSideChannel {
    handle: JoinHandle<()>,
}

impl FrameSideChannel {
    pub fn spawn(
        api: Arc<dyn IngestService>,
        stream: Arc<dyn DeviceStream>,
        session_id: String,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so the encoder has
            // produced something to look at.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let frame = match stream.grab_frame().await {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(?err, "frame grab failed; disabling side channel");
                        break;
                    }
                };
                let encoded = match stream.encode_frame(&frame).await {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        warn!(?err, "frame encode failed; disabling side channel");
                        break;
                    }
                };
                if let Err(err) = api.analyze_frame(&session_id, encoded).await {
                    warn!(?err, %session_id, "frame submission failed; disabling side channel");
                    break;
                }
                debug!(%session_id, "frame submitted");
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for FrameSideChannel {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
