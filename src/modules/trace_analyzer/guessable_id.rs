//! Guessable path parameter detection.
//!
//! The last distinct values of each (spec path, parameter) are kept in a
//! ring. Once the ring has been filled, a parameter whose values are both
//! similar to each other and highly compressible is reported.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;

use super::findings::{spec_location, Finding, GuessableId, GuessableParameter, GuessableReason};

pub const MAX_PARAM_HISTORY: usize = 10;
/// Share of the history that must agree on a type for it to be retained.
pub const HINT_TYPE_THRESHOLD: f64 = 0.8;
/// Close to 1 means very similar.
pub const DISTANCE_THRESHOLD: f32 = 0.8;
/// High means the values compress well together.
pub const COMPRESSION_THRESHOLD: f32 = 2.0;

const GZIP_HEADER_LEN: usize = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeHint {
    Unknown,
    Uuid,
}

struct ParamHistory {
    history: Vec<String>,
    next: usize,
    enough_data: bool,
    type_hint: TypeHint,
}

impl ParamHistory {
    fn new(max_history: usize) -> Self {
        Self {
            history: vec![String::new(); max_history],
            next: 0,
            enough_data: false,
            type_hint: TypeHint::Unknown,
        }
    }

    fn add(&mut self, value: &str) {
        if self.history.iter().any(|v| v == value) {
            return;
        }
        self.history[self.next] = value.to_string();
        self.next = (self.next + 1) % self.history.len();
        if self.next == 0 {
            self.enough_data = true;
            self.guess_type_hint();
        }
    }

    fn guess_type_hint(&mut self) {
        let uuids = self
            .history
            .iter()
            .filter(|v| uuid::Uuid::parse_str(v).is_ok())
            .count();
        let others = self.history.len() - uuids;
        let (hint, count) = if uuids > others {
            (TypeHint::Uuid, uuids)
        } else {
            (TypeHint::Unknown, others)
        };
        if count as f64 / self.history.len() as f64 > HINT_TYPE_THRESHOLD {
            self.type_hint = hint;
        }
    }

    fn guessable(&self) -> Option<GuessableReason> {
        if self.type_hint == TypeHint::Uuid {
            return None;
        }
        let distance = self.distance();
        let compression_ratio = self.compression_ratio();
        (distance >= DISTANCE_THRESHOLD && compression_ratio >= COMPRESSION_THRESHOLD).then_some(
            GuessableReason {
                distance,
                distance_threshold: DISTANCE_THRESHOLD,
                compression_ratio,
                compression_threshold: COMPRESSION_THRESHOLD,
            },
        )
    }

    /// Mean pairwise similarity over the lower triangle.
    fn distance(&self) -> f32 {
        let n = self.history.len();
        if n < 2 {
            return 0.0;
        }
        let mut sum = 0.0f64;
        for (i, a) in self.history.iter().enumerate() {
            for b in &self.history[..i] {
                sum += similarity(a, b);
            }
        }
        (sum / (n * (n - 1) / 2) as f64) as f32
    }

    fn compression_ratio(&self) -> f32 {
        let joined = self.history.concat();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        if encoder.write_all(joined.as_bytes()).is_err() {
            return 0.0;
        }
        let Ok(compressed) = encoder.finish() else {
            return 0.0;
        };
        let payload = compressed.len().saturating_sub(GZIP_HEADER_LEN);
        if payload == 0 {
            return 0.0;
        }
        joined.len() as f32 / payload as f32
    }
}

/// Optimal string alignment similarity in [0, 1].
fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - strsim::osa_distance(a, b) as f64 / longest as f64
}

pub struct GuessableAnalyzer {
    max_history: usize,
    history: Mutex<HashMap<(String, String), ParamHistory>>,
}

impl Default for GuessableAnalyzer {
    fn default() -> Self {
        Self::new(MAX_PARAM_HISTORY)
    }
}

impl GuessableAnalyzer {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(2),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Learn `value` and tell whether the parameter now looks guessable.
    pub fn is_guessable_param(&self, path: &str, name: &str, value: &str) -> Option<GuessableReason> {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = history
            .entry((path.to_string(), name.to_string()))
            .or_insert_with(|| ParamHistory::new(self.max_history));
        entry.add(value);
        if entry.next == 0 && entry.enough_data {
            entry.guessable()
        } else {
            None
        }
    }

    pub fn analyze(&self, path: &str, method: &str, path_params: &HashMap<String, String>) -> Option<Finding> {
        let sorted: BTreeMap<_, _> = path_params.iter().collect();
        let parameters: Vec<GuessableParameter> = sorted
            .into_iter()
            .filter_map(|(name, value)| {
                self.is_guessable_param(path, name, value)
                    .map(|reason| GuessableParameter {
                        name: name.clone(),
                        value: value.clone(),
                        reason,
                    })
            })
            .collect();
        (!parameters.is_empty()).then(|| {
            Finding::GuessableId(GuessableId {
                spec_location: spec_location(path, method),
                parameters,
            })
        })
    }
}
