//! Non-learnt identifier detection.
//!
//! Identifier-like values a host hands out (response headers, query
//! parameters, response bodies) are remembered per host. A request that
//! presents an identifier-like value the host never handed out is reported
//! as a potential broken object level authorization.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use super::findings::{spec_location, Finding, Nlid, NlidParameter};
use crate::pipeline::telemetry::path_and_query;
use crate::pipeline::Telemetry;

pub const RING_BUFFER_SIZE: usize = 1024;
pub const MIN_ID_VALUE_LENGTH: usize = 8;
/// Anything longer than a UUID is unlikely to be an identifier.
pub const MAX_ID_VALUE_LENGTH: usize = 40;

const ID_KEY_SUFFIXES: [&str; 4] = ["id", "ids", "identifier", "identifiers"];

/// Whether `(key, value)` looks like it carries an identifier.
pub fn maybe_id(key: &str, value: &str) -> bool {
    let key = key.to_lowercase();
    if ID_KEY_SUFFIXES.iter().any(|suffix| key.ends_with(suffix)) {
        return true;
    }
    (MIN_ID_VALUE_LENGTH..=MAX_ID_VALUE_LENGTH).contains(&value.len())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn body_params(params: &mut HashSet<String>, value: &Value, prefix: &str) {
    match value {
        Value::Number(n) => {
            if let Some(n) = n.as_i64() {
                let s = n.to_string();
                if maybe_id(prefix, &s) {
                    params.insert(s);
                }
            }
        }
        Value::String(s) => {
            if maybe_id(prefix, s) {
                params.insert(s.clone());
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                body_params(params, item, &format!("{prefix}[{i}]"));
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                body_params(params, item, &format!("{prefix}.{key}"));
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
}

pub struct NlidAnalyzer {
    history_size: usize,
    /// Per host, the identifier sets of the most recent responses.
    history: Mutex<HashMap<String, VecDeque<HashSet<String>>>>,
}

impl Default for NlidAnalyzer {
    fn default() -> Self {
        Self::new(RING_BUFFER_SIZE)
    }
}

impl NlidAnalyzer {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn analyze(
        &self,
        path: &str,
        method: &str,
        path_params: &HashMap<String, String>,
        telemetry: &Telemetry,
    ) -> Option<Finding> {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let host = telemetry.request.host.clone();

        let parameters = history
            .get(&host)
            .map(|seen| non_learnt(seen, path_params, telemetry))
            .unwrap_or_default();

        let learnt = learn(telemetry);
        let ring = history.entry(host).or_default();
        if ring.len() == self.history_size {
            ring.pop_front();
        }
        ring.push_back(learnt);

        (!parameters.is_empty()).then(|| {
            Finding::Nlid(Nlid {
                spec_location: spec_location(path, method),
                parameters,
            })
        })
    }
}

/// Identifier-like request values absent from every remembered response.
fn non_learnt(
    seen: &VecDeque<HashSet<String>>,
    path_params: &HashMap<String, String>,
    telemetry: &Telemetry,
) -> Vec<NlidParameter> {
    let mut candidates: BTreeMap<&str, Vec<NlidParameter>> = BTreeMap::new();
    let headers = telemetry
        .request
        .common
        .headers
        .iter()
        .map(|h| (h.key.as_str(), h.value.as_str()));
    let path = path_params.iter().map(|(k, v)| (k.as_str(), v.as_str()));
    for (name, value) in headers.chain(path) {
        if maybe_id(name, value) {
            candidates.entry(value).or_default().push(NlidParameter {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    candidates.retain(|value, _| !seen.iter().any(|params| params.contains(*value)));
    candidates
        .into_values()
        .flat_map(|mut params| {
            params.sort_by(|a, b| a.name.cmp(&b.name));
            params
        })
        .collect()
}

/// Identifier-like values the response hands out.
fn learn(telemetry: &Telemetry) -> HashSet<String> {
    let mut params = HashSet::new();

    for h in &telemetry.response.common.headers {
        if maybe_id(&h.key, &h.value) {
            params.insert(h.value.clone());
        }
    }

    let (_, query) = path_and_query(&telemetry.request.path);
    let mut first_values: HashMap<String, String> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        first_values
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    for (key, value) in first_values {
        if maybe_id(&key, &value) {
            params.insert(value);
        }
    }

    let common = &telemetry.response.common;
    if !common.truncated_body && !common.body.is_empty() {
        match serde_json::from_slice::<Value>(&common.body_bytes()) {
            Ok(body) => body_params(&mut params, &body, ""),
            Err(e) => debug!(error = %e, "unable to get parameters from body"),
        }
    }
    params
}
