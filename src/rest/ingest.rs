//! Telemetry ingestion from capture agents.
//!
//! `POST /api/telemetry` answers 200 only once the event is stored and every
//! module has seen it; any failure in that chain is a 5xx so the agent can
//! retry. The `X-Trace-Source-Token` header selects the trace source.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::pipeline::{Pipeline, Telemetry};
use crate::storage::{Database, EXTERNAL_TRACE_SOURCE_ID};
use crate::utils::bootstrap::Shutdown;

pub const TRACE_SOURCE_TOKEN_HEADER: &str = "x-trace-source-token";

#[derive(Clone)]
pub struct IngestState {
    pub db: Database,
    pub pipeline: Arc<Pipeline>,
}

pub async fn serve(
    state: IngestState,
    port: u16,
    mut shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let actual_port = listener.local_addr()?.port();
    info!(port = actual_port, "trace ingestion listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;
    Ok(())
}

pub fn router(state: IngestState) -> Router {
    Router::new()
        .route("/api/telemetry", post(post_telemetry))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Trace source id for the request; `None` for an unknown token.
async fn trace_source_id(db: &Database, headers: &HeaderMap) -> Result<Option<i64>, StatusCode> {
    let Some(token) = headers.get(TRACE_SOURCE_TOKEN_HEADER) else {
        return Ok(Some(EXTERNAL_TRACE_SOURCE_ID));
    };
    let token = token.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    let source = db.trace_sources().get_by_token(token).await.map_err(|e| {
        error!(error = %e, "failed to look up trace source token");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(source.map(|s| s.id))
}

async fn post_telemetry(
    State(state): State<IngestState>,
    headers: HeaderMap,
    Json(telemetry): Json<Telemetry>,
) -> StatusCode {
    let source = match trace_source_id(&state.db, &headers).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!("telemetry rejected: unknown trace source token");
            return StatusCode::UNAUTHORIZED;
        }
        Err(status) => return status,
    };

    match state.pipeline.handle_trace(telemetry, source).await {
        Ok(event) => {
            debug!(event_id = event.id, trace_source_id = source, "telemetry ingested");
            StatusCode::OK
        }
        Err(e) => {
            error!(trace_source_id = source, error = %e, "failed to handle trace");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use super::*;
    use crate::modules::{Accessor, Core, Registry};
    use crate::notifier::Notifier;
    use crate::pipeline::CidrClassifier;
    use crate::rest::test_support::call;
    use crate::sampling::SamplingController;
    use crate::speculator::SpeculatorRepository;

    async fn ingest_state() -> IngestState {
        let db = Database::in_memory().await.unwrap();
        let speculators = Arc::new(SpeculatorRepository::new());
        let accessor = Accessor::new(
            db.clone(),
            SamplingController::disabled(db.clone()),
            Notifier::disabled(),
            speculators.clone(),
        );
        let core = Arc::new(Core::build(Registry::new(), accessor).await);
        let classifier = CidrClassifier::new(vec!["10.0.0.0/8".parse().unwrap()]);
        IngestState {
            db: db.clone(),
            pipeline: Arc::new(Pipeline::new(db, speculators, classifier, core)),
        }
    }

    fn telemetry(status: &str) -> serde_json::Value {
        json!({
            "request": {"host": "svc.cluster.local", "method": "GET", "path": "/pets",
                        "common": {"headers": []}},
            "response": {"statusCode": status,
                         "common": {"headers": [{"key": "Content-Type", "value": "application/json"}]}},
            "destinationAddress": "10.0.0.5:8080",
            "sourceAddress": "10.0.0.9:5555"
        })
    }

    async fn post_with_token(state: &IngestState, token: Option<&str>, body: serde_json::Value) -> StatusCode {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let mut request = Request::post("/api/telemetry").header("content-type", "application/json");
        if let Some(token) = token {
            request = request.header("X-Trace-Source-Token", token);
        }
        router(state.clone())
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_ingest_default_source() {
        let state = ingest_state().await;
        let (status, _) = call(router(state.clone()), Method::POST, "/api/telemetry", Some(telemetry("200"))).await;
        assert_eq!(status, StatusCode::OK);
        let apis = state.db.api_inventory().all().await.unwrap();
        assert_eq!(apis.len(), 1);
        assert_eq!(apis[0].trace_source_id, EXTERNAL_TRACE_SOURCE_ID);
    }

    #[tokio::test]
    async fn test_ingest_with_token() {
        let state = ingest_state().await;
        let source = state
            .db
            .trace_sources()
            .create("gateway", "KONG_INTERNAL", "")
            .await
            .unwrap();
        let token = source.token.clone().unwrap();

        assert_eq!(post_with_token(&state, Some(&token), telemetry("200")).await, StatusCode::OK);
        let apis = state.db.api_inventory().all().await.unwrap();
        assert_eq!(apis[0].trace_source_id, source.id);

        assert_eq!(
            post_with_token(&state, Some("bogus"), telemetry("200")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_malformed_trace_is_5xx() {
        let state = ingest_state().await;
        assert_eq!(
            post_with_token(&state, None, telemetry("OK")).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let mut no_address = telemetry("200");
        no_address["destinationAddress"] = json!("nowhere");
        assert_eq!(
            post_with_token(&state, None, no_address).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
