//! Per-API aggregation of event findings.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::findings::{entries_from_annotation, entries_to_annotation, ApiFindingEntry, Finding};
use super::Result;
use crate::modules::Annotation;
use crate::notifier::ApiFinding;

/// (spec path, method, code).
type EntryKey = (String, String, String);

#[derive(Default)]
pub struct ApiFindingsAggregator {
    apis: HashMap<i64, BTreeMap<EntryKey, ApiFindingEntry>>,
}

impl ApiFindingsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, api_id: i64) -> bool {
        self.apis.contains_key(&api_id)
    }

    /// Seed an API from its stored annotations. Expired or unreadable
    /// entries are dropped.
    pub fn load(&mut self, api_id: i64, annotations: &[Annotation], now: DateTime<Utc>) {
        let entries = self.apis.entry(api_id).or_default();
        for annotation in annotations {
            match entries_from_annotation(annotation) {
                Ok(stored) => {
                    for entry in stored.into_iter().filter(|e| !e.is_expired(now)) {
                        let key = (entry.path.clone(), entry.method.clone(), entry.code.clone());
                        entries.insert(key, entry);
                    }
                }
                Err(e) => warn!(api_id, name = %annotation.name, error = %e, "dropping unreadable api finding"),
            }
        }
    }

    /// Merge `finding` observed on `path`/`method`. True when the API
    /// finding was created or extended.
    pub fn aggregate(
        &mut self,
        api_id: i64,
        path: &str,
        method: &str,
        finding: &Finding,
        now: DateTime<Utc>,
    ) -> bool {
        let method = if path.is_empty() { "" } else { method };
        let key = (path.to_string(), method.to_string(), finding.code().to_string());
        let entries = self.apis.entry(api_id).or_default();

        match entries.get_mut(&key) {
            Some(entry) if !entry.is_expired(now) => entry.aggregate(finding, now),
            _ => {
                let mut entry = ApiFindingEntry::new(path, method, finding, now);
                entry.aggregate(finding, now);
                entries.insert(key, entry);
                true
            }
        }
    }

    /// Current entries of one code, ready to be stored as one annotation.
    pub fn annotation_for(&self, api_id: i64, code: &str, now: DateTime<Utc>) -> Result<Annotation> {
        let entries: Vec<ApiFindingEntry> = self
            .live_entries(api_id, now)
            .filter(|e| e.code == code)
            .cloned()
            .collect();
        entries_to_annotation(code, &entries)
    }

    /// Annotations for `codes`.
    pub fn annotations_for(
        &self,
        api_id: i64,
        codes: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Annotation>> {
        codes
            .iter()
            .map(|code| self.annotation_for(api_id, code, now))
            .collect()
    }

    pub fn findings(&self, api_id: i64, source: &str, sensitive: bool, now: DateTime<Utc>) -> Vec<ApiFinding> {
        self.live_entries(api_id, now)
            .map(|e| e.to_api_finding(source, sensitive))
            .collect()
    }

    pub fn reset(&mut self, api_id: i64) {
        self.apis.remove(&api_id);
    }

    fn live_entries(&self, api_id: i64, now: DateTime<Utc>) -> impl Iterator<Item = &ApiFindingEntry> {
        self.apis
            .get(&api_id)
            .into_iter()
            .flat_map(|entries| entries.values())
            .filter(move |e| !e.is_expired(now))
    }
}
