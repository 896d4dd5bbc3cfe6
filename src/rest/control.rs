//! Control endpoints: trace sources, discovered APIs and features.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ApiError, ApiResponse, ApiResult, AppState};
use crate::notifier::Notification;
use crate::pipeline::host::AddressInfo;
use crate::storage::{ApiInfo, ApiType, TraceSource, EXTERNAL_TRACE_SOURCE_ID};

/// Feature name of the built-in spec reconstruction.
pub const SPEC_RECONSTRUCTOR: &str = "specreconstructor";
const SPEC_RECONSTRUCTOR_DESCRIPTION: &str = "Reconstruct OpenAPI specs from observed traces";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/control/traceSources",
            post(create_trace_source).get(list_trace_sources),
        )
        .route(
            "/api/control/traceSources/:uid",
            get(get_trace_source).delete(delete_trace_source),
        )
        .route("/api/control/newDiscoveredAPIs", post(new_discovered_apis))
        .route("/api/features", get(features))
}

// ============================================================================
// Trace sources
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct NewTraceSource {
    pub name: String,
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TraceSources {
    pub trace_sources: Vec<TraceSource>,
}

/// Tokens are only shown once, at creation.
fn without_token(mut source: TraceSource) -> TraceSource {
    source.token = None;
    source
}

fn parse_uid(uid: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(uid).map_err(|_| ApiError::BadRequest(format!("invalid trace source uid: {uid}")))
}

async fn create_trace_source(
    State(state): State<AppState>,
    Json(body): Json<NewTraceSource>,
) -> ApiResult<(StatusCode, Json<TraceSource>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("trace source name is required".to_string()));
    }
    let source = state
        .db
        .trace_sources()
        .create(&body.name, &body.source_type, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(source)))
}

async fn list_trace_sources(State(state): State<AppState>) -> ApiResult<Json<TraceSources>> {
    let sources = state.db.trace_sources().list().await?;
    Ok(Json(TraceSources {
        trace_sources: sources.into_iter().map(without_token).collect(),
    }))
}

async fn get_trace_source(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<TraceSource>> {
    let uid = parse_uid(&uid)?;
    Ok(Json(without_token(
        state.db.trace_sources().get_by_uid(uid).await?,
    )))
}

async fn delete_trace_source(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<StatusCode> {
    let uid = parse_uid(&uid)?;
    let source = state.db.trace_sources().get_by_uid(uid).await?;
    if source.id == EXTERNAL_TRACE_SOURCE_ID {
        return Err(ApiError::BadRequest(
            "the default trace source cannot be deleted".to_string(),
        ));
    }
    state.db.trace_sources().delete(uid).await?;
    state.speculators.remove(source.id);
    info!(%uid, "trace source deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Discovered APIs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct NewDiscoveredApis {
    pub hosts: Vec<String>,
}

async fn new_discovered_apis(
    State(state): State<AppState>,
    Json(body): Json<NewDiscoveredApis>,
) -> Json<ApiResponse> {
    create_new_discovered_apis(&state, &body.hosts, EXTERNAL_TRACE_SOURCE_ID).await;
    Json(ApiResponse::new("New APIs will be processed"))
}

/// First-or-create an internal API per `fqdn:port` host. Newly created APIs
/// get an empty spec in the engine and a notification. Malformed hosts are
/// skipped.
pub async fn create_new_discovered_apis(state: &AppState, hosts: &[String], trace_source_id: i64) {
    for host in hosts {
        let address = match AddressInfo::parse(host) {
            Ok(address) => address,
            Err(e) => {
                warn!(host = %host, error = %e, "unable to parse fqdn:port");
                continue;
            }
        };
        let port = match address.port_number() {
            Ok(port) => port,
            Err(e) => {
                warn!(host = %host, error = %e, "invalid port");
                continue;
            }
        };

        let candidate = ApiInfo::new(address.ip.clone(), port, trace_source_id, ApiType::Internal, "");
        let (api, created) = match state.db.api_inventory().first_or_create(&candidate).await {
            Ok(result) => result,
            Err(e) => {
                error!(host = %host, error = %e, "failed to add discovered api");
                continue;
            }
        };
        if !created {
            continue;
        }
        info!(host = %host, trace_source_id, "new API added to inventory");

        if let Err(e) = state
            .speculators
            .get(trace_source_id)
            .init_spec(&api.name, &port.to_string())
        {
            warn!(host = %host, error = %e, "failed to init spec");
        }
        let notification = Notification::NewDiscoveredApi {
            id: api.id,
            name: api.name.clone(),
            port: api.port,
            has_provided_spec: api.has_provided_spec,
            has_reconstructed_spec: api.has_reconstructed_spec,
            destination_namespace: api.destination_namespace.clone(),
            trace_source_id: api.trace_source_id,
        };
        if let Err(e) = state.notifier.notify(api.id, notification).await {
            error!(api_id = api.id, error = %e, "failed to send NewDiscoveredAPI notification");
        }
    }
}

// ============================================================================
// Features
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostsToTraceForTraceSource {
    #[serde(rename = "traceSourceID")]
    pub trace_source_id: i64,
    pub hosts_to_trace: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostsToTraceForComponent {
    pub component: String,
    pub trace_sources_hosts: Vec<HostsToTraceForTraceSource>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub feature_name: String,
    pub feature_description: String,
    pub hosts_to_trace: HostsToTraceForComponent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureList {
    pub features: Vec<Feature>,
}

async fn features(State(state): State<AppState>) -> Json<FeatureList> {
    let sampling = state.core.accessor().sampling();
    let mut infos = vec![(
        SPEC_RECONSTRUCTOR.to_string(),
        SPEC_RECONSTRUCTOR_DESCRIPTION.to_string(),
    )];
    infos.extend(state.core.infos().into_iter().map(|i| (i.name, i.description)));

    let mut features = Vec::with_capacity(infos.len());
    for (name, description) in infos {
        let hosts = match sampling.hosts_to_trace_by_component(&name).await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!(component = %name, error = %e, "failed to retrieve hosts to trace");
                continue;
            }
        };
        features.push(Feature {
            hosts_to_trace: HostsToTraceForComponent {
                component: name.clone(),
                trace_sources_hosts: hosts
                    .into_iter()
                    .map(|(trace_source_id, hosts_to_trace)| HostsToTraceForTraceSource {
                        trace_source_id,
                        hosts_to_trace,
                    })
                    .collect(),
            },
            feature_name: name,
            feature_description: description,
        });
    }
    Json(FeatureList { features })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::Method;
    use serde_json::json;

    use super::*;
    use crate::modules::{Accessor, Core, Registry};
    use crate::notifier::Notifier;
    use crate::rest::router;
    use crate::rest::test_support::{call, state};
    use crate::sampling::{RecordingSamplingManager, SamplingController};
    use crate::speculator::SpeculatorRepository;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_trace_source_crud() {
        let state = state().await;
        let app = router(state.clone());

        let (status, created) = call(
            app.clone(),
            Method::POST,
            "/api/control/traceSources",
            Some(json!({"name": "gateway", "type": "KONG_INTERNAL", "description": "edge"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = created["auth_token"].as_str().unwrap();
        assert!(!token.is_empty());
        let uid = created["uid"].as_str().unwrap().to_string();

        let (status, listed) = call(app.clone(), Method::GET, "/api/control/traceSources", None).await;
        assert_eq!(status, StatusCode::OK);
        let sources = listed["trace_sources"].as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| s.get("auth_token").is_none()));

        let uri = format!("/api/control/traceSources/{uid}");
        let (status, fetched) = call(app.clone(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["name"], "gateway");

        let (status, _) = call(app.clone(), Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(app.clone(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            app.clone(),
            Method::DELETE,
            &format!("/api/control/traceSources/{}", Uuid::nil()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app, Method::GET, "/api/control/traceSources/not-a-uid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_new_discovered_apis() {
        let mut state = state().await;
        let (notifier, mut deliveries) = Notifier::queue(10);
        state.notifier = notifier;
        let app = router(state.clone());

        let hosts = json!({"hosts": ["catalog.shop:8080", "garbage", "catalog.shop:8080"]});
        let (status, body) = call(app.clone(), Method::POST, "/api/control/newDiscoveredAPIs", Some(hosts)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "New APIs will be processed");

        let apis = state.db.api_inventory().all().await.unwrap();
        assert_eq!(apis.len(), 1);
        assert_eq!(apis[0].name, "catalog.shop");
        assert_eq!(apis[0].port, 8080);

        let delivery = deliveries.try_recv().unwrap();
        assert!(matches!(
            delivery.notification,
            Notification::NewDiscoveredApi { port: 8080, .. }
        ));
        assert!(deliveries.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_features_with_sampling_disabled() {
        let state = state().await;
        let (status, body) = call(router(state), Method::GET, "/api/features", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["features"][0]["featureName"], SPEC_RECONSTRUCTOR);
        assert_eq!(
            body["features"][0]["hostsToTrace"]["traceSourcesHosts"],
            json!([{"traceSourceID": 0, "hostsToTrace": ["*"]}])
        );
    }

    #[tokio::test]
    async fn test_features_with_sampling_enabled() {
        let db = Database::in_memory().await.unwrap();
        let speculators = Arc::new(SpeculatorRepository::new());
        let sampling = SamplingController::new(
            db.clone(),
            Arc::new(RecordingSamplingManager::default()),
            true,
        );
        let accessor = Accessor::new(db.clone(), sampling.clone(), Notifier::disabled(), speculators.clone());
        let core = Arc::new(Core::build(Registry::new(), accessor).await);
        let (api, _) = db
            .api_inventory()
            .first_or_create(&ApiInfo::new("catalog", 8080, 0, ApiType::Internal, ""))
            .await
            .unwrap();
        sampling.add_host_to_trace(SPEC_RECONSTRUCTOR, api.id).await.unwrap();

        let state = AppState {
            db,
            speculators,
            core,
            notifier: Notifier::disabled(),
        };
        let (_, body) = call(router(state), Method::GET, "/api/features", None).await;
        assert_eq!(
            body["features"][0]["hostsToTrace"]["traceSourcesHosts"],
            json!([{"traceSourceID": 0, "hostsToTrace": ["catalog:8080"]}])
        );
    }
}
