//! Expiry of jobs that wait in the queue too long.
//!
//! Only started when `AIHUB_QUEUE_TTL_SECS` is set. Runs on a fixed
//! interval using `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::broker::JobBroker;

/// Longest gap between sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Sweep often enough that a job never outlives the TTL by much.
fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL)
}

/// Run the queue expiry loop until `cancel` is triggered.
pub async fn run(broker: Arc<JobBroker>, ttl: Duration, cancel: CancellationToken) {
    let every = sweep_interval(ttl);
    tracing::info!(
        ttl_secs = ttl.as_secs(),
        interval_secs = every.as_secs(),
        "Queue expiry job started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Queue expiry job stopping");
                break;
            }
            _ = interval.tick() => {
                let expired = broker.expire_older_than(ttl).await;
                if expired > 0 {
                    tracing::info!(expired, "Queue expiry: removed stale jobs");
                } else {
                    tracing::trace!("Queue expiry: nothing to remove");
                }
            }
        }
    }
}
