//! Trace analyzer module.
//!
//! Runs the per-trace analyzers on every event, stores their findings as
//! event annotations with an alert, and folds them into per-API findings
//! that are stored as API annotations and pushed to the notification
//! backend whenever they change.

pub mod aggregator;
pub mod findings;
pub mod guessable_id;
pub mod nlid;
pub mod sensitive;
pub mod utils;
pub mod weak_basic_auth;
pub mod weak_jwt;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::{split_list, Config};
use crate::notifier::{ApiFinding, Notification};
use crate::speculator::SpecInfo;
use crate::storage::StorageError;

use super::{Accessor, AlertSeverity, Annotation, Event, Module, ModuleError, ModuleInfo, Registry};
use aggregator::ApiFindingsAggregator;
use findings::{Finding, Severity};
use guessable_id::GuessableAnalyzer;
use nlid::NlidAnalyzer;
use sensitive::Sensitive;
use weak_basic_auth::WeakBasicAuth;
use weak_jwt::WeakJwt;

pub const MODULE_NAME: &str = "traceanalyzer";
pub const MODULE_DESCRIPTION: &str =
    "Analyze traces for weak authentication, sensitive data and guessable identifiers";

const ASSETS_DIR: &str = "trace_analyzer";

/// Result type for analyzer setup and findings encoding.
pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("dictionary error: {0}")]
    Dictionary(String),

    #[error("invalid sensitive rules: {0}")]
    InvalidRules(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<AnalyzerError> for ModuleError {
    fn from(err: AnalyzerError) -> Self {
        match err {
            AnalyzerError::Serialization(msg) => ModuleError::Serialization(msg),
            other => ModuleError::Init(other.to_string()),
        }
    }
}

/// Files and switches of the analyzer.
#[derive(Debug, Clone, Default)]
pub struct TraceAnalyzerConfig {
    pub dictionary_files: Vec<PathBuf>,
    pub rules_files: Vec<PathBuf>,
    pub sensitive_keywords_files: Vec<PathBuf>,
    /// Finding codes never reported.
    pub ignore_findings: HashSet<String>,
}

impl TraceAnalyzerConfig {
    /// Explicit file lists win; otherwise every file of the matching assets
    /// directory is used.
    pub fn from_config(config: &Config) -> Self {
        let assets = Path::new(&config.modules_assets).join(ASSETS_DIR);
        let files = |explicit: &str, dir: &str| -> Vec<PathBuf> {
            let listed: Vec<PathBuf> = split_list(explicit, &[':'])
                .into_iter()
                .map(PathBuf::from)
                .collect();
            if listed.is_empty() {
                utils::walk_files(&assets.join(dir))
            } else {
                listed
            }
        };

        Self {
            dictionary_files: files(&config.trace_analyzer_dict_filenames, "dictionaries"),
            rules_files: files(&config.trace_analyzer_rules_filenames, "sensitive_rules"),
            sensitive_keywords_files: files(
                &config.trace_analyzer_sensitive_keywords_filenames,
                "sensitive_keywords",
            ),
            ignore_findings: split_list(&config.trace_analyzer_ignore_findings, &[',', ' '])
                .into_iter()
                .collect(),
        }
    }
}

/// Add the trace analyzer to `registry`.
pub fn register(registry: Registry, config: TraceAnalyzerConfig) -> Registry {
    registry.register(MODULE_NAME, move |accessor| {
        let config = config.clone();
        async move {
            let module = TraceAnalyzer::new(accessor, &config)?;
            Ok(Arc::new(module) as Arc<dyn Module>)
        }
    })
}

struct Inner {
    accessor: Accessor,
    ignore_findings: HashSet<String>,
    weak_basic_auth: WeakBasicAuth,
    weak_jwt: WeakJwt,
    sensitive: Sensitive,
    guessable: GuessableAnalyzer,
    nlid: NlidAnalyzer,
    aggregator: Mutex<ApiFindingsAggregator>,
}

pub struct TraceAnalyzer {
    inner: Arc<Inner>,
}

impl TraceAnalyzer {
    pub fn new(accessor: Accessor, config: &TraceAnalyzerConfig) -> Result<Self> {
        let dictionary = utils::read_dictionary_files(&config.dictionary_files)?;
        let keywords = utils::read_dictionary_files(&config.sensitive_keywords_files)?;
        let sensitive = Sensitive::from_files(&config.rules_files)?;
        info!(
            dictionary_words = dictionary.len(),
            sensitive_keywords = keywords.len(),
            sensitive_rules = sensitive.rule_count(),
            "trace analyzer loaded"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                accessor,
                ignore_findings: config.ignore_findings.clone(),
                weak_basic_auth: WeakBasicAuth::new(&dictionary)?,
                weak_jwt: WeakJwt::new(&dictionary, &keywords)?,
                sensitive,
                guessable: GuessableAnalyzer::default(),
                nlid: NlidAnalyzer::default(),
                aggregator: Mutex::new(ApiFindingsAggregator::new()),
            }),
        })
    }
}

/// Spec path template of the event and the path parameters it binds.
/// Falls back to the raw path when no spec knows the operation.
fn spec_path_and_params(event: &Event) -> (String, HashMap<String, String>) {
    let api_event = &event.api_event;
    if let Some(api) = &event.api_info {
        let candidates = [
            (&api.provided_spec_info, &api_event.provided_path_id),
            (&api.reconstructed_spec_info, &api_event.reconstructed_path_id),
        ];
        for (info, path_id) in candidates {
            if info.is_empty() || path_id.is_empty() {
                continue;
            }
            let Ok(info) = serde_json::from_str::<SpecInfo>(info) else {
                continue;
            };
            if let Some(template) = info.template_for(path_id) {
                let params = utils::path_params(template, &api_event.path);
                return (template.to_string(), params);
            }
        }
    }
    (api_event.path.clone(), HashMap::new())
}

impl Inner {
    fn analyze(&self, event: &Event, spec_path: &str, params: &HashMap<String, String>) -> Vec<Finding> {
        let telemetry = &event.telemetry;
        let method = &event.api_event.method;

        let mut findings = self.weak_basic_auth.analyze(telemetry);
        findings.extend(self.weak_jwt.analyze(telemetry));
        findings.extend(self.sensitive.analyze(telemetry));

        let success = telemetry.response.status_code.trim().starts_with('2');
        if success && event.api_info.is_some() {
            findings.extend(self.guessable.analyze(spec_path, method, params));
            findings.extend(self.nlid.analyze(spec_path, method, params, telemetry));
        }

        findings.retain(|f| !self.ignore_findings.contains(f.code()));
        findings
    }

    /// Load the API's stored findings on first touch.
    async fn ensure_loaded(&self, aggregator: &mut ApiFindingsAggregator, api_id: i64) -> super::Result<()> {
        if !aggregator.is_loaded(api_id) {
            let stored = self.accessor.list_api_annotations(MODULE_NAME, api_id).await?;
            aggregator.load(api_id, &stored, Utc::now());
        }
        Ok(())
    }

    async fn aggregate(
        &self,
        api_id: i64,
        spec_path: &str,
        method: &str,
        findings: &[Finding],
    ) -> super::Result<()> {
        let now = Utc::now();
        let mut aggregator = self.aggregator.lock().await;
        self.ensure_loaded(&mut aggregator, api_id).await?;

        let updated: BTreeSet<String> = findings
            .iter()
            .filter(|f| f.aggregates())
            .filter(|f| aggregator.aggregate(api_id, spec_path, method, f, now))
            .map(|f| f.code().to_string())
            .collect();
        if updated.is_empty() {
            return Ok(());
        }

        let annotations = aggregator.annotations_for(api_id, &updated, now)?;
        let items = aggregator.findings(api_id, MODULE_NAME, false, now);
        drop(aggregator);

        debug!(api_id, updated = ?updated, "api findings changed");
        self.accessor
            .store_api_annotations(MODULE_NAME, api_id, &annotations)
            .await?;
        self.accessor
            .notify(MODULE_NAME, api_id, Notification::ApiFindings { api_id, items })
            .await
    }
}

#[async_trait]
impl Module for TraceAnalyzer {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: MODULE_NAME.to_string(),
            description: MODULE_DESCRIPTION.to_string(),
        }
    }

    async fn event_notify(&self, event: &Event) -> super::Result<()> {
        let inner = &self.inner;
        let (spec_path, params) = spec_path_and_params(event);
        let findings = inner.analyze(event, &spec_path, &params);
        if findings.is_empty() {
            return Ok(());
        }

        let alert = findings
            .iter()
            .map(|f| f.severity())
            .max()
            .unwrap_or(Severity::Info)
            .alert();
        let mut annotations = findings
            .iter()
            .map(Finding::to_annotation)
            .collect::<Result<Vec<_>>>()?;
        annotations.push(alert.annotation());

        let event_id = event.api_event.id;
        debug!(event_id, findings = findings.len(), alert = alert.as_str(), "trace findings");
        inner
            .accessor
            .create_event_annotations(MODULE_NAME, event_id, &annotations)
            .await?;

        if let Some(api_id) = event.api_event.api_info_id {
            inner
                .aggregate(api_id, &spec_path, &event.api_event.method, &findings)
                .await?;
        }
        Ok(())
    }

    fn http_handler(&self) -> Option<Router> {
        Some(router(self.inner.clone()))
    }
}

// ============================================================================
// REST
// ============================================================================

fn router(inner: Arc<Inner>) -> Router {
    Router::new()
        .route("/eventAnnotations/:event_id", get(event_annotations))
        .route("/apiFindings/:api_id", get(api_findings))
        .route("/apiFindings/:api_id/reset", post(reset_api_findings))
        .route("/:api_id/start", post(start_traces))
        .route("/:api_id/stop", post(stop_traces))
        .with_state(inner)
}

fn status_for(err: &ModuleError) -> StatusCode {
    match err {
        ModuleError::Storage(StorageError::NotFound) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct RedactedQuery {
    redacted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SensitiveQuery {
    sensitive: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFinding {
    pub name: String,
    pub short_desc: String,
    pub detailed_desc: String,
    pub severity: Severity,
    pub alert: AlertSeverity,
    pub annotation: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemList<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> From<Vec<T>> for ItemList<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            total: items.len(),
            items,
        }
    }
}

fn event_finding(annotation: &Annotation, redacted: bool) -> Option<EventFinding> {
    let finding = Finding::from_annotation(annotation).ok()?;
    let finding = if redacted { finding.redacted() } else { finding };
    let desc = finding.to_finding();
    let payload = finding.serialize().ok()?;
    Some(EventFinding {
        name: finding.code().to_string(),
        short_desc: desc.short_desc,
        detailed_desc: desc.detailed_desc,
        severity: desc.severity,
        alert: desc.alert,
        annotation: serde_json::from_slice(&payload).unwrap_or(serde_json::Value::Null),
    })
}

async fn event_annotations(
    State(inner): State<Arc<Inner>>,
    UrlPath(event_id): UrlPath<i64>,
    Query(query): Query<RedactedQuery>,
) -> std::result::Result<Json<ItemList<EventFinding>>, StatusCode> {
    let redacted = query.redacted.unwrap_or(true);
    let annotations = inner
        .accessor
        .list_event_annotations(MODULE_NAME, event_id)
        .await
        .map_err(|e| {
            error!(event_id, error = %e, "failed to list event annotations");
            status_for(&e)
        })?;
    let items: Vec<EventFinding> = annotations
        .iter()
        .filter_map(|a| event_finding(a, redacted))
        .collect();
    Ok(Json(items.into()))
}

async fn api_findings(
    State(inner): State<Arc<Inner>>,
    UrlPath(api_id): UrlPath<i64>,
    Query(query): Query<SensitiveQuery>,
) -> std::result::Result<Json<ItemList<ApiFinding>>, StatusCode> {
    let sensitive = query.sensitive.unwrap_or(false);
    let mut aggregator = inner.aggregator.lock().await;
    inner
        .ensure_loaded(&mut aggregator, api_id)
        .await
        .map_err(|e| {
            error!(api_id, error = %e, "failed to load api findings");
            status_for(&e)
        })?;
    let items = aggregator.findings(api_id, MODULE_NAME, sensitive, Utc::now());
    Ok(Json(items.into()))
}

async fn reset_api_findings(
    State(inner): State<Arc<Inner>>,
    UrlPath(api_id): UrlPath<i64>,
) -> StatusCode {
    let mut aggregator = inner.aggregator.lock().await;
    aggregator.reset(api_id);
    match inner
        .accessor
        .delete_all_api_annotations(MODULE_NAME, api_id)
        .await
    {
        Ok(()) => {
            info!(api_id, "api findings reset");
            StatusCode::OK
        }
        Err(e) => {
            error!(api_id, error = %e, "failed to reset api findings");
            status_for(&e)
        }
    }
}

async fn start_traces(State(inner): State<Arc<Inner>>, UrlPath(api_id): UrlPath<i64>) -> StatusCode {
    match inner.accessor.enable_traces(MODULE_NAME, api_id).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(api_id, error = %e, "failed to enable traces");
            sampling_status(e)
        }
    }
}

async fn stop_traces(State(inner): State<Arc<Inner>>, UrlPath(api_id): UrlPath<i64>) -> StatusCode {
    match inner.accessor.disable_traces(MODULE_NAME, api_id).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(api_id, error = %e, "failed to disable traces");
            sampling_status(e)
        }
    }
}

fn sampling_status(err: ModuleError) -> StatusCode {
    match err {
        ModuleError::Sampling(crate::sampling::SamplingError::Storage(StorageError::NotFound)) => {
            StatusCode::NOT_FOUND
        }
        other => status_for(&other),
    }
}
