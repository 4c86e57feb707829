//! Optional eviction of services that stopped reporting in.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::Registry;

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

/// Every `ttl / 2`, evict forwarders idle for longer than `ttl`.
pub(crate) async fn reap_loop(registry: Arc<Registry>, ttl: Duration, stop: CancellationToken) {
    let period = (ttl / 2).max(MIN_SWEEP_PERIOD);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for name in registry.evict_stale(ttl).await {
            tracing::info!(service = %name, ttl_secs = ttl.as_secs(), "evicted stale service");
        }
    }

    tracing::debug!("reaper stopped");
}
