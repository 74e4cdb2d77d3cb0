use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

/// Keep-alive period for idle sessions.
const PING_PERIOD: Duration = Duration::from_secs(30);

/// Ping every session each [`PING_PERIOD`] until `cancel` fires.
pub fn start_heartbeat(
    ws_manager: Arc<WsManager>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + PING_PERIOD, PING_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let pinged = ws_manager.ping_all().await;
                    if pinged > 0 {
                        tracing::trace!(sessions = pinged, "Heartbeat sent");
                    }
                }
            }
        }
        tracing::debug!("Heartbeat stopped");
    })
}
