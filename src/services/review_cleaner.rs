//! Deletes approved reviews on an interval.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::storage::Database;
use crate::utils::bootstrap::Shutdown;

pub struct ReviewCleaner {
    db: Database,
    every: Duration,
}

impl ReviewCleaner {
    pub fn new(db: Database, every: Duration) -> Self {
        Self { db, every }
    }

    pub async fn clean(&self) {
        match self.db.reviews().delete_approved().await {
            Ok(0) => {}
            Ok(deleted) => debug!(deleted, "approved reviews removed"),
            Err(e) => error!(error = %e, "failed to remove approved reviews"),
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        info!(every = ?self.every, "starting review cleaner");
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.clean().await,
                _ = shutdown.recv() => break,
            }
        }
        info!("review cleaner stopped");
    }
}
