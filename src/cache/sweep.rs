//! Background sweep of expired cache entries
//!
//! Reads already evict stale entries lazily. For caches that see many distinct
//! keys, a periodic sweep bounds memory independently of read traffic.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::TtlCache;

/// Handle for a running sweeper task
///
/// The task stops when `shutdown` is called or when the handle is dropped.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Spawns a task that purges expired entries from `cache` every `interval`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(cache: TtlCache, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the first tick (immediate)
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "swept expired cache entries");
                        }
                    }
                    // Fires on an explicit shutdown and when the handle is dropped
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self { shutdown_tx, task }
    }

    /// Stops the sweeper and waits for the task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.set("gas_fee_eth", &1u32);

        let handle = SweepHandle::spawn(cache.clone(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(31)).await;

        // Inspect without reading, which would evict on its own
        assert!(!cache.contains_key("gas_fee_eth"));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_fresh_entries() {
        let cache = TtlCache::new(Duration::from_secs(120));
        let handle = SweepHandle::spawn(cache.clone(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(20)).await;
        cache.set("gas_fee_btc", &1u32);
        tokio::time::sleep(Duration::from_secs(45)).await;

        assert!(cache.contains_key("gas_fee_btc"));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeping() {
        let cache = TtlCache::new(Duration::from_secs(1));
        let handle = SweepHandle::spawn(cache.clone(), Duration::from_secs(5));
        handle.shutdown().await;

        cache.set("k", &1u32);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(cache.contains_key("k"));
    }
}
