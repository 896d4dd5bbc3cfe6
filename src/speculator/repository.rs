//! One spec engine per trace source, persisted as a single state file.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use super::path_speculator::{PathSpeculator, PathSpeculatorState};
use super::{Result, Speculator};

/// Spec engines keyed by trace source id.
#[derive(Debug, Default)]
pub struct SpeculatorRepository {
    speculators: RwLock<HashMap<i64, Arc<PathSpeculator>>>,
}

impl SpeculatorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine for `trace_source_id`, created on first use.
    pub fn get(&self, trace_source_id: i64) -> Arc<dyn Speculator> {
        if let Some(existing) = self
            .speculators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&trace_source_id)
        {
            return existing.clone();
        }
        let mut speculators = self.speculators.write().unwrap_or_else(|e| e.into_inner());
        speculators
            .entry(trace_source_id)
            .or_insert_with(|| Arc::new(PathSpeculator::new()))
            .clone()
    }

    /// Drop the engine of a deleted trace source.
    pub fn remove(&self, trace_source_id: i64) {
        self.speculators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&trace_source_id);
    }

    fn snapshot(&self) -> BTreeMap<i64, PathSpeculatorState> {
        self.speculators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, engine)| (*id, engine.snapshot()))
            .collect()
    }

    /// Write every engine's state to `path`, replacing the file atomically.
    pub fn encode_state(&self, path: &Path) -> Result<()> {
        let encoded = serde_json::to_vec(&self.snapshot())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn decode_state(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let state: BTreeMap<i64, PathSpeculatorState> = serde_json::from_slice(&raw)?;
        Ok(Self {
            speculators: RwLock::new(
                state
                    .into_iter()
                    .map(|(id, s)| (id, Arc::new(PathSpeculator::from_state(s))))
                    .collect(),
            ),
        })
    }

    /// Restore from `path`, or start empty when the file is missing or unreadable.
    pub fn load_or_new(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "no spec engine state, starting empty");
            return Self::new();
        }
        match Self::decode_state(path) {
            Ok(repo) => {
                info!(path = %path.display(), "spec engine state restored");
                repo
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to decode spec engine state, starting empty");
                Self::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speculator::SpecTrace;

    #[test]
    fn test_get_returns_same_engine() {
        let repo = SpeculatorRepository::new();
        repo.get(3).init_spec("svc", "80").unwrap();
        let trace = SpecTrace {
            host: "svc".to_string(),
            port: "80".to_string(),
            method: "GET".to_string(),
            path: "/a/1".to_string(),
            status_code: "200".to_string(),
        };
        repo.get(3).learn_telemetry(&trace).unwrap();
        assert_eq!(repo.get(3).suggested_review("svc:80").unwrap().path_items.len(), 1);
        assert!(repo.get(4).suggested_review("svc:80").is_err());
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let repo = SpeculatorRepository::new();
        repo.get(0).init_spec("svc", "8080").unwrap();
        repo.encode_state(&path).unwrap();

        let restored = SpeculatorRepository::load_or_new(&path);
        assert!(restored.get(0).suggested_review("svc:8080").is_ok());
    }

    #[test]
    fn test_corrupt_state_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();

        let repo = SpeculatorRepository::load_or_new(&path);
        assert!(repo.snapshot().is_empty());
    }
}
