//! HTTP surfaces of the backend.
//!
//! - [`ingest`] accepts telemetry from capture agents on `HTTP_TRACES_PORT`.
//! - The REST API on `BACKEND_REST_PORT` serves the inventory, events,
//!   dashboard, control and feature endpoints, with every module's handler
//!   nested under `/api/modules/<name>`.
//! - [`health`] serves liveness and readiness probes.

pub mod control;
pub mod dashboard;
pub mod events;
pub mod health;
pub mod ingest;
pub mod inventory;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::modules::{Core, ModuleError};
use crate::notifier::Notifier;
use crate::sampling::SamplingError;
use crate::speculator::{SpeculatorError, SpeculatorRepository};
use crate::storage::{Database, Page, SortDir, StorageError};
use crate::utils::bootstrap::Shutdown;

/// Shared state of the REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub speculators: Arc<SpeculatorRepository>,
    pub core: Arc<Core>,
    pub notifier: Notifier,
}

/// `{"message": ...}` body of non-data responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub message: String,
}

impl ApiResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Paged listing body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paged<T> {
    pub total: i64,
    pub items: Vec<T>,
}

/// Errors returned by REST handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::UnknownSortKey(_) | StorageError::InvalidSortDirection(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SpeculatorError> for ApiError {
    fn from(err: SpeculatorError) -> Self {
        match err {
            SpeculatorError::InvalidSpec(msg) => ApiError::BadRequest(msg),
            SpeculatorError::SpecNotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SamplingError> for ApiError {
    fn from(err: SamplingError) -> Self {
        match err {
            SamplingError::Storage(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ModuleError> for ApiError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::Storage(e) => e.into(),
            ModuleError::Sampling(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::NotFound => (status, Json(ApiResponse::new("not found"))).into_response(),
            ApiError::Unauthorized => status.into_response(),
            ApiError::BadRequest(msg) => (status, Json(ApiResponse::new(msg.clone()))).into_response(),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (status, Json(ApiResponse::new(msg.clone()))).into_response()
            }
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Decoded query string supporting repeated keys (`method[is]=GET&method[is]=PUT`).
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    values: HashMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn parse(raw: Option<&str>) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            values
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        Self { values }
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn strings(&self, key: &str) -> Vec<String> {
        self.values.get(key).cloned().unwrap_or_default()
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.first(key).map(str::to_string)
    }

    /// First value of `key` parsed as `T`.
    pub fn get<T: FromStr>(&self, key: &str) -> ApiResult<Option<T>> {
        self.first(key)
            .map(|v| {
                v.parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid value for {key}: {v}")))
            })
            .transpose()
    }

    /// Every value of `key` parsed as `T`.
    pub fn all<T: FromStr>(&self, key: &str) -> ApiResult<Vec<T>> {
        self.values
            .get(key)
            .into_iter()
            .flatten()
            .map(|v| {
                v.parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid value for {key}: {v}")))
            })
            .collect()
    }

    pub fn page(&self) -> ApiResult<Page> {
        let default = Page::default();
        Ok(Page::new(
            self.get("page")?.unwrap_or(default.page).max(1),
            self.get("pageSize")?.unwrap_or(default.page_size).max(1),
        ))
    }

    pub fn sort(&self, default_key: &str, default_dir: SortDir) -> ApiResult<(String, SortDir)> {
        let key = self.string("sortKey").unwrap_or_else(|| default_key.to_string());
        let dir = match self.first("sortDir") {
            Some(dir) => SortDir::parse(dir)?,
            None => default_dir,
        };
        Ok((key, dir))
    }
}

/// Start the REST API on the given port.
///
/// When `port` is 0, the OS assigns an ephemeral port. The actual bound
/// port is always logged so it can be discovered.
pub async fn serve(
    state: AppState,
    port: u16,
    mut shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let actual_port = listener.local_addr()?.port();
    info!(port = actual_port, "REST API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let modules = state.core.router();
    Router::new()
        .merge(inventory::routes())
        .merge(events::routes())
        .merge(dashboard::routes())
        .merge(control::routes())
        .with_state(state)
        .merge(modules)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
