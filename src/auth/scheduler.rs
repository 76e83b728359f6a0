// Periodic proactive refresh

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::manager::AuthManager;

/// Spawn the proactive refresh loop
///
/// Ticks every `period` (first tick one period after start) and refreshes
/// when the token is inside the manager's lead window. Returns once
/// `shutdown` is cancelled.
pub fn spawn_refresh_task(
    manager: Arc<AuthManager>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            period_secs = period.as_secs(),
            "Token refresh task started"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Token refresh task stopped");
                    return;
                }
                _ = ticker.tick() => {
                    manager.refresh_if_expiring().await;
                }
            }
        }
    })
}
