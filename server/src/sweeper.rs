use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::store::Store;

/// Periodic clean-up task that deletes expired entries nobody reads anymore.
///
/// The first sweep runs right away. The task stops once `shutdown` changes
/// or its sender is dropped.
pub fn spawn(store: Store, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    task::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_once(&store).await,
                _ = shutdown.changed() => break,
            }
        }

        debug!("Sweeper stopped");
    })
}

async fn sweep_once(store: &Store) {
    match store.sweep_expired().await {
        Ok(0) => debug!("Sweep found nothing to reclaim"),
        Ok(count) => info!(count, "Reclaimed expired entries"),
        Err(e) => error!("Failed to sweep expired entries: {}", e),
    }
}
