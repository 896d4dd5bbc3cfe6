//! Per-trace ingestion pipeline.
//!
//! Resolves the API a trace belongs to, consults the spec engine, persists
//! the event and hands it to every module.

pub mod classifier;
pub mod host;
pub mod telemetry;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use classifier::CidrClassifier;
pub use telemetry::Telemetry;

use crate::modules::{Core, Event};
use crate::speculator::{spec_key, ApiDiff, SpecTrace, Speculator, SpeculatorRepository};
use crate::storage::{format_time, ApiEvent, ApiInfo, Database, DiffType, SpecSource, StorageError};
use host::AddressInfo;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Reasons a trace cannot be ingested.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("trace has no host")]
    HostMissing,

    #[error("malformed host: {0}")]
    HostMalformed(String),

    #[error("malformed address: {0}")]
    AddressMalformed(String),

    #[error("malformed status code: {0}")]
    StatusCodeMalformed(String),

    #[error("path id lookup failed: {0}")]
    PathIdFailure(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// The ingestion pipeline and the process-wide state it shares.
pub struct Pipeline {
    db: Database,
    speculators: Arc<SpeculatorRepository>,
    classifier: CidrClassifier,
    core: Arc<Core>,
    /// Serializes inventory first-or-create.
    inventory_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        db: Database,
        speculators: Arc<SpeculatorRepository>,
        classifier: CidrClassifier,
        core: Arc<Core>,
    ) -> Self {
        Self {
            db,
            speculators,
            classifier,
            core,
            inventory_lock: Mutex::new(()),
        }
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Ingest one trace. Returns once the event is stored and every module
    /// has seen it.
    pub async fn handle_trace(&self, telemetry: Telemetry, trace_source_id: i64) -> Result<ApiEvent> {
        let raw_host = if telemetry.request.host.is_empty() {
            telemetry
                .request
                .common
                .header("host")
                .filter(|h| !h.is_empty())
                .ok_or(PipelineError::HostMissing)?
        } else {
            telemetry.request.host.as_str()
        };
        let host = host::hostname(raw_host)?;

        let destination = AddressInfo::parse(&telemetry.destination_address)?;
        let port = destination.port_number()?;
        let source_ip = if telemetry.source_address.is_empty() {
            String::new()
        } else {
            AddressInfo::parse(&telemetry.source_address)?.ip
        };
        let status_code: i64 = telemetry
            .response
            .status_code
            .trim()
            .parse()
            .map_err(|_| PipelineError::StatusCodeMalformed(telemetry.response.status_code.clone()))?;

        let api_type = self.classifier.classify(&destination.ip);
        let is_non_api = host::is_non_api(&telemetry.response.common);
        let (path, query) = telemetry::path_and_query(&telemetry.request.path);

        let mut event = ApiEvent {
            time: format_time(Utc::now()),
            request_time: format_time(request_time(telemetry.request.common.time)),
            method: telemetry.request.method.clone(),
            path: path.to_string(),
            query: query.to_string(),
            status_code,
            source_ip,
            destination_ip: destination.ip.clone(),
            destination_port: port,
            host_spec_name: host.clone(),
            is_non_api,
            event_type: api_type,
            ..ApiEvent::default()
        };

        let api_info = if is_non_api {
            debug!(host = %host, port, "non-API trace, skipping inventory");
            None
        } else {
            let api = {
                let _guard = self.inventory_lock.lock().await;
                let (api, _) = self
                    .db
                    .api_inventory()
                    .first_or_create(&ApiInfo::new(
                        host.clone(),
                        port,
                        trace_source_id,
                        api_type,
                        telemetry.destination_namespace.clone(),
                    ))
                    .await?;
                api
            };
            event.api_info_id = Some(api.id);

            let trace = SpecTrace {
                host: host.clone(),
                port: destination.port.clone(),
                method: telemetry.request.method.clone(),
                path: path.to_string(),
                status_code: telemetry.response.status_code.trim().to_string(),
            };
            let speculator = self.speculators.get(trace_source_id);
            apply_spec(speculator.as_ref(), &trace, &mut event)?;
            Some(api)
        };

        event.id = self.db.api_events().create(&event).await?;
        debug!(event_id = event.id, host = %host, port, status_code, "event stored");

        self.core
            .event_notify(&Event {
                api_event: event.clone(),
                api_info,
                trace_source_id,
                telemetry,
            })
            .await;
        Ok(event)
    }
}

fn request_time(millis: i64) -> DateTime<Utc> {
    if millis <= 0 {
        return Utc::now();
    }
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// Learn or diff the trace and record path ids and diffs on the event.
fn apply_spec(speculator: &dyn Speculator, trace: &SpecTrace, event: &mut ApiEvent) -> Result<()> {
    let key = spec_key(&trace.host, &trace.port);
    let has_provided = speculator.has_provided_spec(&key);
    let has_approved = speculator.has_approved_spec(&key);

    if has_provided {
        match speculator.diff_telemetry(trace, SpecSource::Provided) {
            Ok(diff) => {
                let (old, new) = diff_payloads(&diff);
                event.has_provided_spec_diff = diff.diff_type != DiffType::NoDiff;
                event.old_provided_spec = old;
                event.new_provided_spec = new;
                event.spec_diff_type = event.spec_diff_type.highest(diff.diff_type);
            }
            Err(e) => warn!(key = %key, error = %e, "provided spec diff failed"),
        }
    }

    if has_approved {
        match speculator.diff_telemetry(trace, SpecSource::Reconstructed) {
            Ok(diff) => {
                let (old, new) = diff_payloads(&diff);
                event.has_reconstructed_spec_diff = diff.diff_type != DiffType::NoDiff;
                event.old_reconstructed_spec = old;
                event.new_reconstructed_spec = new;
                event.spec_diff_type = event.spec_diff_type.highest(diff.diff_type);
            }
            Err(e) => warn!(key = %key, error = %e, "reconstructed spec diff failed"),
        }
    } else if let Err(e) = speculator.learn_telemetry(trace) {
        warn!(key = %key, error = %e, "failed to learn trace");
    }
    event.has_spec_diff = event.has_provided_spec_diff || event.has_reconstructed_spec_diff;

    if has_provided {
        event.provided_path_id = speculator
            .get_path_id(&key, &trace.path, SpecSource::Provided)
            .map_err(|e| PipelineError::PathIdFailure(e.to_string()))?;
    }
    if has_approved {
        event.reconstructed_path_id = speculator
            .get_path_id(&key, &trace.path, SpecSource::Reconstructed)
            .map_err(|e| PipelineError::PathIdFailure(e.to_string()))?;
    }
    Ok(())
}

/// Old/new payloads are kept only when the trace differs from the spec.
fn diff_payloads(diff: &ApiDiff) -> (String, String) {
    if diff.diff_type == DiffType::NoDiff {
        return (String::new(), String::new());
    }
    (
        diff.old_path_item.clone().unwrap_or_default(),
        diff.new_path_item.clone().unwrap_or_default(),
    )
}
