//! API inventory, spec upload and review endpoints.

use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApiError, ApiResponse, ApiResult, AppState, Paged, QueryParams};
use crate::speculator::{ReviewPathItem, SpecInfo, SuggestedReview};
use crate::storage::{
    ApiInfo, ApiInventoryFilter, ApiType, SortDir, SpecSource, EXTERNAL_TRACE_SOURCE_ID,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/apiInventory", get(list_inventory))
        .route("/api/apiInventory/apiId", get(api_id))
        .route("/api/apiInventory/:api_id/apiInfo", get(api_info))
        .route("/api/apiInventory/:api_id/specs", get(specs))
        .route(
            "/api/apiInventory/:api_id/provided_swagger.json",
            get(provided_spec_json),
        )
        .route(
            "/api/apiInventory/:api_id/reconstructed_swagger.json",
            get(reconstructed_spec_json),
        )
        .route(
            "/api/apiInventory/:api_id/specs/providedSpec",
            put(put_provided_spec).delete(delete_provided_spec),
        )
        .route(
            "/api/apiInventory/:api_id/specs/reconstructedSpec",
            axum::routing::delete(delete_reconstructed_spec),
        )
        .route(
            "/api/apiInventory/:api_id/suggestedReview",
            get(suggested_review),
        )
        .route(
            "/api/apiInventory/:review_id/approvedReview",
            post(approved_review),
        )
}

fn inventory_filter(params: &QueryParams) -> ApiResult<ApiInventoryFilter> {
    let api_type = match params.first("type") {
        Some(t) => Some(
            ApiType::parse(t).ok_or_else(|| ApiError::BadRequest(format!("invalid api type: {t}")))?,
        ),
        None => None,
    };
    Ok(ApiInventoryFilter {
        api_type,
        api_id: params.get("apiId")?,
        name_is: params.strings("name[is]"),
        name_is_not: params.strings("name[isNot]"),
        name_contains: params.strings("name[contains]"),
        name_start: params.string("name[start]"),
        name_end: params.string("name[end]"),
        port_is: params.all("port[is]")?,
        port_is_not: params.all("port[isNot]")?,
        has_provided_spec: params.get("hasProvidedSpecFilter[is]")?,
        has_reconstructed_spec: params.get("hasReconstructedSpecFilter[is]")?,
        trace_source_id: params.get("traceSourceId")?,
    })
}

/// Inventory entry as listed; spec payloads are served separately.
fn summary(mut api: ApiInfo) -> ApiInfo {
    api.provided_spec.clear();
    api.provided_spec_info.clear();
    api.reconstructed_spec.clear();
    api.reconstructed_spec_info.clear();
    api
}

async fn list_inventory(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> ApiResult<Json<Paged<ApiInfo>>> {
    let params = QueryParams::parse(query.as_deref());
    let filter = inventory_filter(&params)?;
    let (sort_key, sort_dir) = params.sort("name", SortDir::Asc)?;
    let (items, total) = state
        .db
        .api_inventory()
        .list(&filter, &sort_key, sort_dir, params.page()?)
        .await?;
    Ok(Json(Paged {
        total,
        items: items.into_iter().map(summary).collect(),
    }))
}

async fn api_id(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Json<i64>> {
    let params = QueryParams::parse(query.as_deref());
    let name = params
        .string("name")
        .ok_or_else(|| ApiError::BadRequest("name is required".to_string()))?;
    let port: i64 = params
        .get("port")?
        .ok_or_else(|| ApiError::BadRequest("port is required".to_string()))?;
    let source = params
        .get("traceSourceId")?
        .unwrap_or(EXTERNAL_TRACE_SOURCE_ID);
    Ok(Json(state.db.api_inventory().api_id(&name, port, source).await?))
}

async fn api_info(State(state): State<AppState>, Path(api_id): Path<i64>) -> ApiResult<Json<ApiInfo>> {
    Ok(Json(summary(state.db.api_inventory().get(api_id).await?)))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provided_spec: Option<SpecView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconstructed_spec: Option<SpecView>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub info: SpecInfo,
}

fn spec_view(has_spec: bool, info: &str, created_at: &Option<String>) -> ApiResult<Option<SpecView>> {
    if !has_spec {
        return Ok(None);
    }
    let info = if info.is_empty() {
        SpecInfo::default()
    } else {
        serde_json::from_str(info).map_err(|e| ApiError::Internal(format!("invalid spec info: {e}")))?
    };
    Ok(Some(SpecView {
        created_at: created_at.clone(),
        info,
    }))
}

async fn specs(State(state): State<AppState>, Path(api_id): Path<i64>) -> ApiResult<Json<SpecsView>> {
    let api = state.db.api_inventory().get(api_id).await?;
    Ok(Json(SpecsView {
        provided_spec: spec_view(
            api.has_provided_spec,
            &api.provided_spec_info,
            &api.provided_spec_created_at,
        )?,
        reconstructed_spec: spec_view(
            api.has_reconstructed_spec,
            &api.reconstructed_spec_info,
            &api.reconstructed_spec_created_at,
        )?,
    }))
}

fn raw_spec_json(spec: &str) -> ApiResult<Json<serde_json::Value>> {
    if spec.is_empty() {
        return Err(ApiError::NotFound);
    }
    serde_json::from_str(spec)
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("stored spec is not json: {e}")))
}

async fn provided_spec_json(
    State(state): State<AppState>,
    Path(api_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    raw_spec_json(&state.db.api_inventory().get(api_id).await?.provided_spec)
}

async fn reconstructed_spec_json(
    State(state): State<AppState>,
    Path(api_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    raw_spec_json(&state.db.api_inventory().get(api_id).await?.reconstructed_spec)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSpec {
    pub raw_spec: String,
}

async fn put_provided_spec(
    State(state): State<AppState>,
    Path(api_id): Path<i64>,
    Json(body): Json<RawSpec>,
) -> ApiResult<(StatusCode, Json<RawSpec>)> {
    let api = state.db.api_inventory().get(api_id).await?;
    let speculator = state.speculators.get(api.trace_source_id);
    let loaded = speculator.load_provided_spec(&api.spec_key(), &body.raw_spec)?;
    let info = serde_json::to_string(&loaded.info)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .db
        .api_inventory()
        .put_spec(api_id, SpecSource::Provided, &loaded.json, &info)
        .await?;
    info!(api_id, paths = loaded.info.paths.len(), "provided spec stored");
    Ok((StatusCode::CREATED, Json(body)))
}

async fn delete_provided_spec(
    State(state): State<AppState>,
    Path(api_id): Path<i64>,
) -> ApiResult<Json<ApiResponse>> {
    let api = state.db.api_inventory().get(api_id).await?;
    if let Err(e) = state
        .speculators
        .get(api.trace_source_id)
        .unset_provided_spec(&api.spec_key())
    {
        warn!(api_id, error = %e, "spec engine had no provided spec");
    }
    state.db.api_inventory().delete_provided_spec(api_id).await?;
    info!(api_id, "provided spec deleted");
    Ok(Json(ApiResponse::new("Success")))
}

async fn delete_reconstructed_spec(
    State(state): State<AppState>,
    Path(api_id): Path<i64>,
) -> ApiResult<Json<ApiResponse>> {
    let api = state.db.api_inventory().get(api_id).await?;
    if let Err(e) = state
        .speculators
        .get(api.trace_source_id)
        .unset_approved_spec(&api.spec_key())
    {
        warn!(api_id, error = %e, "spec engine had no approved spec");
    }
    state
        .db
        .api_inventory()
        .delete_reconstructed_spec(api_id)
        .await?;
    info!(api_id, "reconstructed spec deleted");
    Ok(Json(ApiResponse::new("Success")))
}

/// Review row payload: the API it belongs to and the proposal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredReview {
    api_id: i64,
    path_items: Vec<ReviewPathItem>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedReviewView {
    pub id: i64,
    pub review_path_items: Vec<ReviewPathItem>,
}

async fn suggested_review(
    State(state): State<AppState>,
    Path(api_id): Path<i64>,
) -> ApiResult<Json<SuggestedReviewView>> {
    let api = state.db.api_inventory().get(api_id).await?;
    let review = state
        .speculators
        .get(api.trace_source_id)
        .suggested_review(&api.spec_key())?;
    let stored = serde_json::to_string(&StoredReview {
        api_id,
        path_items: review.path_items.clone(),
    })
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    let id = state.db.reviews().create(&api.spec_key(), &stored).await?;
    Ok(Json(SuggestedReviewView {
        id,
        review_path_items: review.path_items,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedReviewBody {
    pub review_path_items: Vec<ReviewPathItem>,
}

async fn approved_review(
    State(state): State<AppState>,
    Path(review_id): Path<i64>,
    Json(body): Json<ApprovedReviewBody>,
) -> ApiResult<Json<ApiResponse>> {
    let review = state.db.reviews().get(review_id).await?;
    let stored: StoredReview = serde_json::from_str(&review.path_to_path_item_str)
        .map_err(|e| ApiError::Internal(format!("unreadable review {review_id}: {e}")))?;
    let api = state.db.api_inventory().get(stored.api_id).await?;

    let approved = state
        .speculators
        .get(api.trace_source_id)
        .apply_approved_review(
            &review.spec_key,
            &SuggestedReview {
                path_items: body.review_path_items,
            },
        )
        .map_err(|e| ApiError::Internal(format!("failed to apply the approved review: {e}")))?;

    if let Err(e) = state.db.reviews().mark_approved(review_id).await {
        warn!(review_id, error = %e, "failed to mark review approved");
    }

    let info = serde_json::to_string(&approved.info).map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .db
        .api_inventory()
        .put_spec(api.id, SpecSource::Reconstructed, &approved.json, &info)
        .await?;
    state
        .db
        .api_events()
        .set_reconstructed_path_ids(&approved.path_items, &api.name, api.port)
        .await?;
    info!(review_id, api_id = api.id, paths = approved.path_items.len(), "review approved");
    Ok(Json(ApiResponse::new("Success")))
}
