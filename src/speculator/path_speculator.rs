//! Path-registry spec engine.
//!
//! Tracks, per `host:port`, the observed (path, method, status) triples, the
//! provided spec's paths, and the paths approved from a review. It matches
//! traces against path templates; it does not infer schemas.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::{
    ApiDiff, ApprovedSpec, LoadedSpec, Result, ReviewPathItem, SpecInfo, SpecPathInfo,
    SpecTrace, Speculator, SpeculatorError, SuggestedReview,
};
use crate::storage::{ApprovedPathItem, DiffType, SpecSource};

const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Operation {
    deprecated: bool,
    responses: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SpecPath {
    path_id: String,
    operations: BTreeMap<String, Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SpecPaths {
    paths: BTreeMap<String, SpecPath>,
}

impl SpecPaths {
    /// Best template for `path`: fewest parameters wins.
    fn matching(&self, path: &str) -> Option<(&String, &SpecPath)> {
        self.paths
            .iter()
            .filter(|(template, _)| template_matches(template, path))
            .min_by_key(|(template, _)| param_count(template))
    }

    fn info(&self) -> SpecInfo {
        SpecInfo {
            paths: self
                .paths
                .iter()
                .map(|(path, item)| SpecPathInfo {
                    path: path.clone(),
                    path_id: item.path_id.clone(),
                    methods: item.operations.keys().cloned().collect(),
                })
                .collect(),
        }
    }

    fn document(&self, title: &str) -> Value {
        let mut paths = Map::new();
        for (template, item) in &self.paths {
            paths.insert(template.clone(), path_item_json(&item.operations));
        }
        json!({
            "openapi": "3.0.3",
            "info": { "title": title, "version": "1.0.0" },
            "paths": paths,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ApiSpec {
    host: String,
    port: String,
    /// path → method → status codes
    learned: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
    provided: Option<SpecPaths>,
    approved: Option<SpecPaths>,
}

impl ApiSpec {
    fn for_key(key: &str) -> Self {
        let (host, port) = key.rsplit_once(':').unwrap_or((key, ""));
        Self {
            host: host.to_string(),
            port: port.to_string(),
            ..Self::default()
        }
    }

    fn spec(&self, source: SpecSource) -> Option<&SpecPaths> {
        match source {
            SpecSource::Provided => self.provided.as_ref(),
            SpecSource::Reconstructed => self.approved.as_ref(),
        }
    }
}

/// Serialized form of a [`PathSpeculator`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpeculatorState {
    specs: BTreeMap<String, ApiSpec>,
}

/// In-process spec engine keyed by `host:port`.
#[derive(Debug, Default)]
pub struct PathSpeculator {
    specs: RwLock<HashMap<String, ApiSpec>>,
}

impl PathSpeculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: PathSpeculatorState) -> Self {
        Self {
            specs: RwLock::new(state.specs.into_iter().collect()),
        }
    }

    pub fn snapshot(&self) -> PathSpeculatorState {
        PathSpeculatorState {
            specs: self
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ApiSpec>> {
        self.specs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ApiSpec>> {
        self.specs.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Speculator for PathSpeculator {
    fn learn_telemetry(&self, trace: &SpecTrace) -> Result<()> {
        let key = trace.spec_key();
        let mut specs = self.write();
        let spec = specs
            .entry(key.clone())
            .or_insert_with(|| ApiSpec::for_key(&key));
        spec.learned
            .entry(trace.path.clone())
            .or_default()
            .entry(trace.method.to_ascii_lowercase())
            .or_default()
            .insert(trace.status_code.clone());
        Ok(())
    }

    fn diff_telemetry(&self, trace: &SpecTrace, source: SpecSource) -> Result<ApiDiff> {
        let key = trace.spec_key();
        let specs = self.read();
        let paths = specs
            .get(&key)
            .and_then(|s| s.spec(source))
            .ok_or_else(|| SpeculatorError::SpecNotFound(key.clone()))?;

        let method = trace.method.to_ascii_lowercase();
        let observed = Operation {
            deprecated: false,
            responses: BTreeSet::from([trace.status_code.clone()]),
        };

        let Some((_, item)) = paths.matching(&trace.path) else {
            let new = BTreeMap::from([(method, observed)]);
            return Ok(ApiDiff {
                diff_type: DiffType::ShadowDiff,
                path_id: String::new(),
                old_path_item: None,
                new_path_item: Some(path_item_json(&new).to_string()),
            });
        };

        let old = path_item_json(&item.operations).to_string();
        let (diff_type, new) = match item.operations.get(&method) {
            None => {
                let mut ops = item.operations.clone();
                ops.insert(method, observed);
                (DiffType::ShadowDiff, Some(ops))
            }
            Some(op) if op.deprecated => (DiffType::ZombieDiff, None),
            Some(op)
                if !op.responses.is_empty()
                    && !op.responses.contains(&trace.status_code)
                    && !op.responses.contains("default") =>
            {
                let mut ops = item.operations.clone();
                if let Some(op) = ops.get_mut(&method) {
                    op.responses.insert(trace.status_code.clone());
                }
                (DiffType::GeneralDiff, Some(ops))
            }
            Some(_) => (DiffType::NoDiff, None),
        };

        let new_path_item = match new {
            Some(ops) => path_item_json(&ops).to_string(),
            None => old.clone(),
        };
        Ok(ApiDiff {
            diff_type,
            path_id: item.path_id.clone(),
            old_path_item: Some(old),
            new_path_item: Some(new_path_item),
        })
    }

    fn has_approved_spec(&self, key: &str) -> bool {
        self.read()
            .get(key)
            .is_some_and(|s| s.approved.is_some())
    }

    fn has_provided_spec(&self, key: &str) -> bool {
        self.read()
            .get(key)
            .is_some_and(|s| s.provided.is_some())
    }

    fn get_path_id(&self, key: &str, path: &str, source: SpecSource) -> Result<String> {
        let specs = self.read();
        let paths = specs
            .get(key)
            .and_then(|s| s.spec(source))
            .ok_or_else(|| SpeculatorError::SpecNotFound(key.to_string()))?;
        Ok(paths
            .matching(path)
            .map(|(_, item)| item.path_id.clone())
            .unwrap_or_default())
    }

    fn load_provided_spec(&self, key: &str, raw: &str) -> Result<LoadedSpec> {
        let document = parse_document(raw)?;
        let paths = spec_paths_from_document(&document)?;
        let info = paths.info();
        let json = serde_json::to_string(&document)
            .map_err(|e| SpeculatorError::InvalidSpec(e.to_string()))?;

        let mut specs = self.write();
        specs
            .entry(key.to_string())
            .or_insert_with(|| ApiSpec::for_key(key))
            .provided = Some(paths);
        debug!(key, paths = info.paths.len(), "provided spec loaded");
        Ok(LoadedSpec { json, info })
    }

    fn unset_provided_spec(&self, key: &str) -> Result<()> {
        if let Some(spec) = self.write().get_mut(key) {
            spec.provided = None;
        }
        Ok(())
    }

    fn unset_approved_spec(&self, key: &str) -> Result<()> {
        if let Some(spec) = self.write().get_mut(key) {
            spec.approved = None;
        }
        Ok(())
    }

    fn suggested_review(&self, key: &str) -> Result<SuggestedReview> {
        let specs = self.read();
        let spec = specs
            .get(key)
            .ok_or_else(|| SpeculatorError::SpecNotFound(key.to_string()))?;

        let mut groups: BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();
        for (path, methods) in &spec.learned {
            let (paths, group_methods) = groups.entry(parameterize(path)).or_default();
            paths.insert(path.clone());
            group_methods.extend(methods.keys().cloned());
        }

        Ok(SuggestedReview {
            path_items: groups
                .into_iter()
                .map(|(parameterized_path, (paths, methods))| ReviewPathItem {
                    parameterized_path,
                    paths: paths.into_iter().collect(),
                    methods: methods.into_iter().collect(),
                })
                .collect(),
        })
    }

    fn apply_approved_review(&self, key: &str, review: &SuggestedReview) -> Result<ApprovedSpec> {
        let mut specs = self.write();
        let spec = specs
            .get_mut(key)
            .ok_or_else(|| SpeculatorError::SpecNotFound(key.to_string()))?;

        let mut approved = spec.approved.take().unwrap_or_default();
        let mut path_items = Vec::with_capacity(review.path_items.len());
        for item in &review.path_items {
            if !item.parameterized_path.starts_with('/') {
                spec.approved = Some(approved);
                return Err(SpeculatorError::InvalidSpec(format!(
                    "path '{}' must start with '/'",
                    item.parameterized_path
                )));
            }
            let entry = approved
                .paths
                .entry(item.parameterized_path.clone())
                .or_insert_with(|| SpecPath {
                    path_id: Uuid::new_v4().to_string(),
                    operations: BTreeMap::new(),
                });

            for path in &item.paths {
                for (method, statuses) in spec.learned.remove(path).unwrap_or_default() {
                    entry
                        .operations
                        .entry(method)
                        .or_default()
                        .responses
                        .extend(statuses);
                }
            }
            for method in &item.methods {
                entry
                    .operations
                    .entry(method.to_ascii_lowercase())
                    .or_default();
            }

            path_items.push(ApprovedPathItem {
                path_uuid: entry.path_id.clone(),
                paths: item.paths.clone(),
            });
        }

        let json = approved.document(&spec.host).to_string();
        let info = approved.info();
        spec.approved = Some(approved);
        Ok(ApprovedSpec {
            json,
            info,
            path_items,
        })
    }

    fn init_spec(&self, host: &str, port: &str) -> Result<()> {
        let key = super::spec_key(host, port);
        self.write()
            .entry(key.clone())
            .or_insert_with(|| ApiSpec::for_key(&key));
        Ok(())
    }
}

fn parse_document(raw: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Ok(value),
        Err(_) => serde_yaml::from_str::<Value>(raw)
            .map_err(|e| SpeculatorError::InvalidSpec(format!("not JSON or YAML: {e}"))),
    }
}

fn spec_paths_from_document(document: &Value) -> Result<SpecPaths> {
    let object = document
        .as_object()
        .ok_or_else(|| SpeculatorError::InvalidSpec("document is not an object".to_string()))?;

    let openapi = object.get("openapi").and_then(Value::as_str);
    let swagger = object.get("swagger").and_then(Value::as_str);
    match (openapi, swagger) {
        (Some(v), _) if v.starts_with("3.") => {}
        (_, Some("2.0")) => {}
        _ => {
            return Err(SpeculatorError::InvalidSpec(
                "missing or unsupported 'openapi'/'swagger' version".to_string(),
            ))
        }
    }

    let paths = object
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| SpeculatorError::InvalidSpec("'paths' must be an object".to_string()))?;

    let mut spec = SpecPaths::default();
    for (path, item) in paths {
        if !path.starts_with('/') {
            return Err(SpeculatorError::InvalidSpec(format!(
                "path '{path}' must start with '/'"
            )));
        }
        let item = item.as_object().ok_or_else(|| {
            SpeculatorError::InvalidSpec(format!("path item '{path}' is not an object"))
        })?;

        let mut operations = BTreeMap::new();
        for method in METHODS {
            let Some(op) = item.get(method).and_then(Value::as_object) else {
                continue;
            };
            let responses = op
                .get("responses")
                .and_then(Value::as_object)
                .map(|r| r.keys().cloned().collect())
                .unwrap_or_default();
            operations.insert(
                method.to_string(),
                Operation {
                    deprecated: op
                        .get("deprecated")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    responses,
                },
            );
        }

        spec.paths.insert(
            path.clone(),
            SpecPath {
                path_id: Uuid::new_v4().to_string(),
                operations,
            },
        );
    }
    Ok(spec)
}

fn path_item_json(operations: &BTreeMap<String, Operation>) -> Value {
    let mut item = Map::new();
    for (method, op) in operations {
        let mut responses = Map::new();
        for code in &op.responses {
            responses.insert(code.clone(), json!({ "description": "" }));
        }
        if responses.is_empty() {
            responses.insert("default".to_string(), json!({ "description": "default" }));
        }
        let mut operation = Map::new();
        operation.insert("responses".to_string(), Value::Object(responses));
        if op.deprecated {
            operation.insert("deprecated".to_string(), Value::Bool(true));
        }
        item.insert(method.clone(), Value::Object(operation));
    }
    Value::Object(item)
}

fn segments(path: &str) -> Vec<&str> {
    path.trim_end_matches('/').split('/').collect()
}

fn is_param(segment: &str) -> bool {
    segment.starts_with('{') && segment.ends_with('}')
}

fn param_count(template: &str) -> usize {
    segments(template).into_iter().filter(|s| is_param(s)).count()
}

fn template_matches(template: &str, path: &str) -> bool {
    let template = segments(template);
    let path = segments(path);
    template.len() == path.len()
        && template
            .iter()
            .zip(&path)
            .all(|(t, p)| t == p || (is_param(t) && !p.is_empty()))
}

/// Segments that look like identifiers rather than resource names.
fn looks_like_id(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    segment.chars().all(|c| c.is_ascii_digit())
        || Uuid::parse_str(segment).is_ok()
        || (segment.len() >= 16 && segment.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Replace identifier-like segments with `{param1}`, `{param2}`, ...
fn parameterize(path: &str) -> String {
    let mut n = 0;
    path.split('/')
        .map(|segment| {
            if looks_like_id(segment) {
                n += 1;
                format!("{{param{n}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(method: &str, path: &str, status: &str) -> SpecTrace {
        SpecTrace {
            host: "svc".to_string(),
            port: "8080".to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status_code: status.to_string(),
        }
    }

    const PROVIDED: &str = r#"
openapi: 3.0.0
info:
  title: pets
  version: "1"
paths:
  /pets:
    get:
      responses:
        "200":
          description: ok
  /pets/{petId}:
    get:
      responses:
        "200":
          description: ok
    delete:
      deprecated: true
      responses:
        "204":
          description: gone
"#;

    #[test]
    fn test_parameterize() {
        assert_eq!(parameterize("/pets/12/toys/7"), "/pets/{param1}/toys/{param2}");
        assert_eq!(
            parameterize("/users/4f6b5c1e-9a1d-4d2e-8c5b-1a2b3c4d5e6f"),
            "/users/{param1}"
        );
        assert_eq!(parameterize("/pets/list"), "/pets/list");
    }

    #[test]
    fn test_template_match_prefers_literal() {
        let engine = PathSpeculator::new();
        engine.load_provided_spec("svc:8080", PROVIDED).unwrap();
        let by_template = engine.get_path_id("svc:8080", "/pets/5", SpecSource::Provided).unwrap();
        let literal = engine.get_path_id("svc:8080", "/pets", SpecSource::Provided).unwrap();
        assert!(!by_template.is_empty());
        assert_ne!(by_template, literal);
        assert_eq!(
            engine.get_path_id("svc:8080", "/owners", SpecSource::Provided).unwrap(),
            ""
        );
    }

    #[test]
    fn test_diff_against_provided_spec() {
        let engine = PathSpeculator::new();
        engine.load_provided_spec("svc:8080", PROVIDED).unwrap();

        let diff = |m, p, s| {
            engine
                .diff_telemetry(&trace(m, p, s), SpecSource::Provided)
                .unwrap()
                .diff_type
        };
        assert_eq!(diff("GET", "/pets/1", "200"), DiffType::NoDiff);
        assert_eq!(diff("POST", "/pets/1", "200"), DiffType::ShadowDiff);
        assert_eq!(diff("GET", "/owners", "200"), DiffType::ShadowDiff);
        assert_eq!(diff("DELETE", "/pets/1", "204"), DiffType::ZombieDiff);
        assert_eq!(diff("GET", "/pets", "500"), DiffType::GeneralDiff);
    }

    #[test]
    fn test_diff_without_spec_fails() {
        let engine = PathSpeculator::new();
        assert!(matches!(
            engine.diff_telemetry(&trace("GET", "/", "200"), SpecSource::Reconstructed),
            Err(SpeculatorError::SpecNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_provided_spec() {
        let engine = PathSpeculator::new();
        assert!(engine.load_provided_spec("k:1", "{\"paths\":{}}").is_err());
        assert!(engine.load_provided_spec("k:1", "openapi: 3.0.0\npaths: 3").is_err());
        assert!(!engine.has_provided_spec("k:1"));
    }

    #[test]
    fn test_review_approval_flow() {
        let engine = PathSpeculator::new();
        engine.learn_telemetry(&trace("GET", "/pets/1", "200")).unwrap();
        engine.learn_telemetry(&trace("GET", "/pets/2", "200")).unwrap();
        engine.learn_telemetry(&trace("POST", "/pets", "201")).unwrap();

        let review = engine.suggested_review("svc:8080").unwrap();
        assert_eq!(review.path_items.len(), 2);
        let pets = review
            .path_items
            .iter()
            .find(|i| i.parameterized_path == "/pets/{param1}")
            .unwrap();
        assert_eq!(pets.paths, vec!["/pets/1", "/pets/2"]);

        let approved = engine.apply_approved_review("svc:8080", &review).unwrap();
        assert!(engine.has_approved_spec("svc:8080"));
        assert_eq!(approved.path_items.len(), 2);
        let id = engine
            .get_path_id("svc:8080", "/pets/9", SpecSource::Reconstructed)
            .unwrap();
        assert!(approved
            .path_items
            .iter()
            .any(|i| i.path_uuid == id && i.paths.contains(&"/pets/1".to_string())));
        assert!(approved.json.contains("/pets/{param1}"));
        assert!(engine.suggested_review("svc:8080").unwrap().path_items.is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let engine = PathSpeculator::new();
        engine.load_provided_spec("svc:8080", PROVIDED).unwrap();
        engine.init_spec("other", "80").unwrap();

        let state = engine.snapshot();
        let encoded = serde_json::to_string(&state).unwrap();
        let restored = PathSpeculator::from_state(serde_json::from_str(&encoded).unwrap());
        assert!(restored.has_provided_spec("svc:8080"));
        assert_eq!(restored.snapshot(), state);
    }
}
