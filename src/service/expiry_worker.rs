//! Background expiry worker
//!
//! Every blob carries a durable deadline, so expiry does not depend on timers
//! surviving in memory. The worker sweeps the expiry index periodically; its
//! first tick fires immediately, which reconciles blobs that expired while
//! the server was down.

use crate::config::ExpiryConfig;
use crate::service::relay_service::RelayService;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Background expiry worker
pub struct ExpiryWorker {
    relay: Arc<RelayService>,
    batch_size: usize,
    sweep_interval: Duration,
}

impl ExpiryWorker {
    pub fn new(relay: Arc<RelayService>, batch_size: usize, sweep_interval: Duration) -> Self {
        Self {
            relay,
            batch_size: batch_size.max(1),
            sweep_interval,
        }
    }

    pub fn from_config(relay: Arc<RelayService>, config: &ExpiryConfig) -> Self {
        Self::new(relay, config.batch_size, Duration::from_secs(config.sweep_interval_secs.max(1)))
    }

    /// Start the expiry worker as a background task (non-blocking)
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        info!("Starting expiry worker with {}s interval", self.sweep_interval.as_secs());

        tokio::spawn(async move {
            let mut interval = time::interval(self.sweep_interval);

            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }

    /// Drain everything currently expired, one batch at a time.
    /// Returns the number of blobs removed.
    pub async fn run_once(&self) -> usize {
        let mut total = 0;
        loop {
            let relay = self.relay.clone();
            let batch_size = self.batch_size;

            // SQLite calls block, keep them off the async workers
            let removed = match tokio::task::spawn_blocking(move || relay.sweep_expired(batch_size)).await {
                Ok(Ok(removed)) => removed,
                Ok(Err(e)) => {
                    error!("Expiry sweep error: {}", e);
                    break;
                }
                Err(e) => {
                    error!("Expiry sweep task join error: {}", e);
                    break;
                }
            };

            total += removed;
            // A short or failing batch means nothing more is due right now
            if removed < self.batch_size {
                break;
            }
        }

        if total > 0 {
            info!("Expiry sweep removed {} blobs", total);
        } else {
            debug!("Expiry sweep: nothing due");
        }
        total
    }
}
