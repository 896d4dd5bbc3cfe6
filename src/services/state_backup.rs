//! Periodic persistence of the spec engine state.
//!
//! This loop is the only writer of the state file. A final write happens on
//! shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::speculator::SpeculatorRepository;
use crate::utils::bootstrap::Shutdown;

pub struct StateBackup {
    speculators: Arc<SpeculatorRepository>,
    path: PathBuf,
    every: Duration,
}

impl StateBackup {
    pub fn new(speculators: Arc<SpeculatorRepository>, path: PathBuf, every: Duration) -> Self {
        Self {
            speculators,
            path,
            every,
        }
    }

    /// Write the state file once. Failures are logged.
    pub async fn backup(&self) {
        let speculators = self.speculators.clone();
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || speculators.encode_state(&path)).await;
        match result {
            Ok(Ok(())) => debug!(path = %self.path.display(), "spec engine state saved"),
            Ok(Err(e)) => error!(path = %self.path.display(), error = %e, "failed to save spec engine state"),
            Err(e) => error!(error = %e, "state backup task panicked"),
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        info!(path = %self.path.display(), every = ?self.every, "starting state backup");
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.backup().await,
                _ = shutdown.recv() => break,
            }
        }

        self.backup().await;
        info!("state backup stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speculator::{spec_key, SpecTrace};

    fn trace(path: &str) -> SpecTrace {
        SpecTrace {
            host: "petstore".to_string(),
            port: "80".to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            status_code: "200".to_string(),
        }
    }

    #[tokio::test]
    async fn test_writes_state_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let speculators = Arc::new(SpeculatorRepository::new());
        speculators.get(0).learn_telemetry(&trace("/pets/1")).unwrap();

        let (tx, shutdown) = Shutdown::new();
        let backup = StateBackup::new(speculators, path.clone(), Duration::from_secs(3600));
        let handle = tokio::spawn(backup.run(shutdown));
        tx.send(true).unwrap();
        handle.await.unwrap();

        let restored = SpeculatorRepository::decode_state(&path).unwrap();
        let review = restored.get(0).suggested_review(&spec_key("petstore", "80")).unwrap();
        assert_eq!(review.path_items.len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let speculators = Arc::new(SpeculatorRepository::new());
        let (tx, shutdown) = Shutdown::new();
        let handle = tokio::spawn(
            StateBackup::new(speculators, path.clone(), Duration::from_millis(20)).run(shutdown),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(path.exists());
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
