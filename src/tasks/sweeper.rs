//! 内存存储过期清扫 / Memory-store expiry sweep
//!
//! 过期判定本身是惰性的，清扫只负责回收内存
//! Expiry is decided lazily on read; the sweep only reclaims memory

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::debug;

use crate::store::MemoryStore;

pub fn spawn_sweeper_task(
    store: Arc<MemoryStore>,
    sweep_interval_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut sweep_interval = interval(Duration::from_millis(sweep_interval_ms.max(100)));
        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    let purged = store.purge_expired();
                    if purged > 0 {
                        debug!("🧹 purged {} expired ephemeral entries", purged);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    });
}
