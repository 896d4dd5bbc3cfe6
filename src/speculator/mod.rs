//! Spec engine contract and the bundled path-registry engine.
//!
//! The pipeline and REST handlers only talk to [`Speculator`]. The
//! [`SpeculatorRepository`] keeps one engine per trace source and owns the
//! state file.

mod path_speculator;
mod repository;

pub use path_speculator::PathSpeculator;
pub use repository::SpeculatorRepository;

use serde::{Deserialize, Serialize};

use crate::storage::{ApprovedPathItem, DiffType, SpecSource};

/// Result type for spec engine operations.
pub type Result<T> = std::result::Result<T, SpeculatorError>;

/// Errors from the spec engine.
#[derive(Debug, thiserror::Error)]
pub enum SpeculatorError {
    #[error("no spec for {0}")]
    SpecNotFound(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("state file error: {0}")]
    State(String),
}

impl From<std::io::Error> for SpeculatorError {
    fn from(err: std::io::Error) -> Self {
        SpeculatorError::State(err.to_string())
    }
}

impl From<serde_json::Error> for SpeculatorError {
    fn from(err: serde_json::Error) -> Self {
        SpeculatorError::State(err.to_string())
    }
}

/// Key of one API in the engine: `host:port`.
pub fn spec_key(host: &str, port: &str) -> String {
    format!("{host}:{port}")
}

/// The parts of a trace the engine learns from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecTrace {
    pub host: String,
    pub port: String,
    pub method: String,
    /// Path without the query string.
    pub path: String,
    pub status_code: String,
}

impl SpecTrace {
    pub fn spec_key(&self) -> String {
        spec_key(&self.host, &self.port)
    }
}

/// Outcome of comparing a trace with a spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiDiff {
    pub diff_type: DiffType,
    /// Id of the matched spec path; empty when nothing matched.
    pub path_id: String,
    /// Path item as the spec has it, JSON.
    pub old_path_item: Option<String>,
    /// Path item as the trace implies it, JSON.
    pub new_path_item: Option<String>,
}

/// One spec path and the operations it declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecPathInfo {
    pub path: String,
    pub path_id: String,
    pub methods: Vec<String>,
}

/// Summary of a spec, stored beside the spec document in the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecInfo {
    pub paths: Vec<SpecPathInfo>,
}

impl SpecInfo {
    /// Template of the spec path with `path_id`.
    pub fn template_for(&self, path_id: &str) -> Option<&str> {
        self.paths
            .iter()
            .find(|p| p.path_id == path_id)
            .map(|p| p.path.as_str())
    }
}

/// A provided spec after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSpec {
    /// The document, normalized to JSON.
    pub json: String,
    pub info: SpecInfo,
}

/// Proposed parameterization of a group of observed paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPathItem {
    pub parameterized_path: String,
    pub paths: Vec<String>,
    pub methods: Vec<String>,
}

/// Parameterization proposal for one API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedReview {
    pub path_items: Vec<ReviewPathItem>,
}

/// The reconstructed spec produced by approving a review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedSpec {
    pub json: String,
    pub info: SpecInfo,
    /// Path ids to back-fill onto stored events.
    pub path_items: Vec<ApprovedPathItem>,
}

/// Spec engine operations used by the backend.
pub trait Speculator: Send + Sync {
    /// Record a trace for an API that has no approved spec yet.
    fn learn_telemetry(&self, trace: &SpecTrace) -> Result<()>;

    fn diff_telemetry(&self, trace: &SpecTrace, source: SpecSource) -> Result<ApiDiff>;

    fn has_approved_spec(&self, key: &str) -> bool;

    fn has_provided_spec(&self, key: &str) -> bool;

    /// Id of the spec path matching `path`, or "" when none does.
    fn get_path_id(&self, key: &str, path: &str, source: SpecSource) -> Result<String>;

    /// Parse a JSON or YAML OpenAPI document and use it as the provided spec.
    fn load_provided_spec(&self, key: &str, raw: &str) -> Result<LoadedSpec>;

    fn unset_provided_spec(&self, key: &str) -> Result<()>;

    fn unset_approved_spec(&self, key: &str) -> Result<()>;

    fn suggested_review(&self, key: &str) -> Result<SuggestedReview>;

    fn apply_approved_review(&self, key: &str, review: &SuggestedReview) -> Result<ApprovedSpec>;

    /// Start tracking an API before any trace was seen.
    fn init_spec(&self, host: &str, port: &str) -> Result<()>;
}
