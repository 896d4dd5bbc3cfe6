//! Dashboard series.

use axum::extract::{RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, AppState, QueryParams};
use crate::storage::{ApiType, ApiUsageKind, ApiUsagePoint, DiffType, HostGroup, USAGE_BUCKETS};

const LATEST_DIFFS: u64 = 5;
const MOST_USED: u64 = 5;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard/apiUsage", get(api_usage))
        .route("/api/dashboard/apiUsage/latestDiffs", get(latest_diffs))
        .route("/api/dashboard/apiUsage/mostUsed", get(most_used))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsages {
    pub apis_with_diffs: Vec<ApiUsagePoint>,
    pub existing_apis: Vec<ApiUsagePoint>,
    pub new_apis: Vec<ApiUsagePoint>,
}

fn time_param(params: &QueryParams, key: &str) -> ApiResult<Option<DateTime<Utc>>> {
    params
        .first(key)
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ApiError::BadRequest(format!("invalid {key}: {e}")))
        })
        .transpose()
}

/// Event counts over `[startTime, endTime]` (default: the last hour).
async fn api_usage(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Json<ApiUsages>> {
    let params = QueryParams::parse(query.as_deref());
    let end = time_param(&params, "endTime")?.unwrap_or_else(Utc::now);
    let start = time_param(&params, "startTime")?.unwrap_or(end - Duration::hours(1));
    if start > end {
        return Err(ApiError::BadRequest("startTime is after endTime".to_string()));
    }

    let events = state.db.api_events();
    Ok(Json(ApiUsages {
        apis_with_diffs: events
            .api_usage(ApiUsageKind::ApiWithDiffs, start, end, USAGE_BUCKETS)
            .await?,
        existing_apis: events
            .api_usage(ApiUsageKind::ExistingApi, start, end, USAGE_BUCKETS)
            .await?,
        new_apis: events
            .api_usage(ApiUsageKind::NewApi, start, end, USAGE_BUCKETS)
            .await?,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestDiff {
    pub api_event_id: i64,
    pub api_host_name: String,
    pub api_type: ApiType,
    pub diff_type: DiffType,
    pub time: String,
    pub old_spec: String,
    pub new_spec: String,
}

async fn latest_diffs(State(state): State<AppState>) -> ApiResult<Json<Vec<LatestDiff>>> {
    let events = state.db.api_events().latest_diffs(LATEST_DIFFS).await?;
    let diffs = events
        .into_iter()
        .map(|e| {
            // Provided diffs take precedence when both specs disagree.
            let (old_spec, new_spec) = if e.has_provided_spec_diff {
                (e.old_provided_spec, e.new_provided_spec)
            } else {
                (e.old_reconstructed_spec, e.new_reconstructed_spec)
            };
            LatestDiff {
                api_event_id: e.id,
                api_host_name: e.host_spec_name,
                api_type: e.event_type,
                diff_type: e.spec_diff_type,
                time: e.time,
                old_spec,
                new_spec,
            }
        })
        .collect();
    Ok(Json(diffs))
}

async fn most_used(State(state): State<AppState>) -> ApiResult<Json<Vec<HostGroup>>> {
    Ok(Json(state.db.api_events().most_used(MOST_USED).await?))
}
