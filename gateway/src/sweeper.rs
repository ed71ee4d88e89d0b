use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::shared::SharedState;

pub fn spawn(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(state.config().timing.sweep_interval_ms);
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            sweep_once(&state).await;
        }
    })
}

/// Evicts cache entries not refreshed within the retention window. The
/// command queue is left alone.
pub async fn sweep_once(state: &SharedState) -> usize {
    let retention_ms = state.config().timing.state_retention_ms;
    let threshold_ms = state.now_ms().saturating_sub(retention_ms);
    let (evicted, remaining) = {
        let mut cache = state.cache().lock().await;
        let evicted = cache.evict_older_than(threshold_ms);
        (evicted, cache.len())
    };

    if evicted > 0 {
        info!("evicted {evicted} stale device states, {remaining} remain");
    } else {
        debug!("no stale device states");
    }
    evicted
}
