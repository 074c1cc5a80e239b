//! Periodic eviction of idle quota windows.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::AccessControl;

/// Spawn a background task that sweeps idle quota windows until `shutdown`
/// fires.
pub fn spawn_sweeper(
    access: Arc<AccessControl>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = access.sweep();
                    if removed > 0 {
                        tracing::debug!("Quota sweep evicted {removed} idle windows");
                    }
                }
            }
        }
    })
}
