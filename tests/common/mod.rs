//! Shared helpers for integration tests.
//!
//! Builds the whole backend in process: in-memory SQLite, the trace
//! analyzer loaded from the bundled assets, a notifier whose queue the test
//! reads directly, and both HTTP routers.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use apiclarity::config::Config;
use apiclarity::modules::trace_analyzer::{self, TraceAnalyzerConfig};
use apiclarity::modules::{Accessor, Core, Registry};
use apiclarity::notifier::{Delivery, Notification, Notifier};
use apiclarity::pipeline::{CidrClassifier, Pipeline};
use apiclarity::rest::ingest::IngestState;
use apiclarity::rest::{self, AppState};
use apiclarity::sampling::{RecordingSamplingManager, SamplingController};
use apiclarity::speculator::SpeculatorRepository;
use apiclarity::storage::{ApiEvent, ApiEventsFilter, Database, Page, SortDir};

pub struct Harness {
    pub db: Database,
    pub speculators: Arc<SpeculatorRepository>,
    pub sampling: SamplingController,
    pub manager: Arc<RecordingSamplingManager>,
    pub app: Router,
    pub ingest: Router,
    pub deliveries: mpsc::Receiver<Delivery>,
}

pub async fn harness() -> Harness {
    harness_with_sampling(false).await
}

pub async fn harness_with_sampling(sampling_enabled: bool) -> Harness {
    let db = Database::in_memory().await.expect("in-memory database");
    let speculators = Arc::new(SpeculatorRepository::new());
    let manager = Arc::new(RecordingSamplingManager::default());
    let sampling = SamplingController::new(db.clone(), manager.clone(), sampling_enabled);
    let (notifier, deliveries) = Notifier::queue(1000);

    let config = Config {
        modules_assets: concat!(env!("CARGO_MANIFEST_DIR"), "/assets").to_string(),
        ..Config::default()
    };
    let registry = trace_analyzer::register(Registry::new(), TraceAnalyzerConfig::from_config(&config));
    let accessor = Accessor::new(
        db.clone(),
        sampling.clone(),
        notifier.clone(),
        speculators.clone(),
    );
    let core = Arc::new(Core::build(registry, accessor).await);

    let classifier = CidrClassifier::new(config.internal_networks().expect("default CIDRs"));
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        speculators.clone(),
        classifier,
        core.clone(),
    ));

    let app = rest::router(AppState {
        db: db.clone(),
        speculators: speculators.clone(),
        core,
        notifier,
    });
    let ingest = rest::ingest::router(IngestState {
        db: db.clone(),
        pipeline,
    });

    Harness {
        db,
        speculators,
        sampling,
        manager,
        app,
        ingest,
        deliveries,
    }
}

/// Builder for agent telemetry payloads.
#[derive(Clone)]
pub struct Trace {
    pub host: String,
    pub destination: String,
    pub method: String,
    pub path: String,
    pub status: String,
    pub content_type: String,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
}

impl Trace {
    pub fn get(host: &str, destination: &str, path: &str) -> Self {
        Self {
            host: host.to_string(),
            destination: destination.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            status: "200".to_string(),
            content_type: "application/json".to_string(),
            request_headers: Vec::new(),
            response_headers: Vec::new(),
        }
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub fn request_header(mut self, key: &str, value: &str) -> Self {
        self.request_headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn response_header(mut self, key: &str, value: &str) -> Self {
        self.response_headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(&self) -> Value {
        let headers = |pairs: &[(String, String)]| -> Vec<Value> {
            pairs
                .iter()
                .map(|(k, v)| json!({"key": k, "value": v}))
                .collect()
        };
        let mut response_headers = vec![json!({"key": "Content-Type", "value": self.content_type})];
        response_headers.extend(headers(&self.response_headers));
        json!({
            "requestID": uuid::Uuid::new_v4().to_string(),
            "scheme": "http",
            "sourceAddress": "10.0.0.9:40000",
            "destinationAddress": self.destination,
            "request": {
                "host": self.host,
                "method": self.method,
                "path": self.path,
                "common": {"headers": headers(&self.request_headers), "body": ""}
            },
            "response": {
                "statusCode": self.status,
                "common": {"headers": response_headers, "body": ""}
            }
        })
    }
}

impl Harness {
    /// POST one trace to the ingestion router.
    pub async fn ingest(&self, trace: &Trace) -> StatusCode {
        self.ingest_as(trace, None).await
    }

    pub async fn ingest_as(&self, trace: &Trace, token: Option<&str>) -> StatusCode {
        let mut request = Request::post("/api/telemetry").header("content-type", "application/json");
        if let Some(token) = token {
            request = request.header("X-Trace-Source-Token", token);
        }
        self.ingest
            .clone()
            .oneshot(request.body(Body::from(trace.json().to_string())).unwrap())
            .await
            .unwrap()
            .status()
    }

    /// Call the REST router and decode the JSON body (`Null` when empty).
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Every stored event, API and non-API, in insertion order.
    pub async fn events(&self) -> Vec<ApiEvent> {
        let filter = ApiEventsFilter {
            show_non_api: true,
            ..ApiEventsFilter::default()
        };
        let (mut events, _) = self
            .db
            .api_events()
            .list(&filter, "time", SortDir::Asc, Page::new(1, 1000))
            .await
            .unwrap();
        events.sort_by_key(|e| e.id);
        events
    }

    pub async fn last_event(&self) -> ApiEvent {
        self.events().await.pop().expect("at least one event")
    }

    /// Finding codes the trace analyzer stored for `event_id`, sorted.
    pub async fn finding_codes(&self, event_id: i64) -> Vec<String> {
        let mut names: Vec<String> = self
            .db
            .event_annotations()
            .list(trace_analyzer::MODULE_NAME, event_id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        names.sort();
        names
    }

    /// Drain the notifier queue.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut delivered = Vec::new();
        while let Ok(delivery) = self.deliveries.try_recv() {
            delivered.push(delivery.notification);
        }
        delivered
    }
}
