//! Background refresh loop
//!
//! Runs [`OverlayCache::refresh`] on a fixed interval in its own task. A
//! failed pass is logged and retried on the next tick; ticks missed while a
//! pass was running are skipped rather than replayed.

use crate::cache::OverlayCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running refresh loop. Dropping it stops the loop.
pub struct RefreshHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop the loop and wait for it to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Overlay refresh task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl OverlayCache {
    /// Start refreshing from discovery every `every`
    pub fn spawn_refresh(self: &Arc<Self>, every: Duration) -> RefreshHandle {
        let cache = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = every.as_millis() as u64, "Overlay refresh loop started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    result = cache.refresh() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Overlay refresh failed, retrying next tick");
                        }
                    }
                }
            }

            debug!("Overlay refresh loop stopped");
        });

        RefreshHandle { cancel, task }
    }
}
