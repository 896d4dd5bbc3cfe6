//! API event listing and spec diffs.

use axum::extract::{Path, RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};

use super::{ApiResult, AppState, Paged, QueryParams};
use crate::storage::{ApiEvent, ApiEventsFilter, SortDir, SpecDiff};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/apiEvents", get(list_events))
        .route("/api/apiEvents/:event_id", get(get_event))
        .route(
            "/api/apiEvents/:event_id/reconstructedSpecDiff",
            get(reconstructed_spec_diff),
        )
        .route(
            "/api/apiEvents/:event_id/providedSpecDiff",
            get(provided_spec_diff),
        )
}

fn events_filter(params: &QueryParams) -> ApiResult<ApiEventsFilter> {
    Ok(ApiEventsFilter {
        method_is: params.strings("method[is]"),
        provided_path_id_is: params.strings("providedPathIDIs"),
        reconstructed_path_id_is: params.strings("reconstructedPathIDIs"),
        path_is: params.strings("path[is]"),
        path_is_not: params.strings("path[isNot]"),
        path_contains: params.strings("path[contains]"),
        path_start: params.string("path[start]"),
        path_end: params.string("path[end]"),
        status_code_is: params.all("statusCode[is]")?,
        status_code_is_not: params.all("statusCode[isNot]")?,
        status_code_gte: params.get("statusCode[gte]")?,
        status_code_lte: params.get("statusCode[lte]")?,
        source_ip_is: params.strings("sourceIP[is]"),
        source_ip_is_not: params.strings("sourceIP[isNot]"),
        destination_ip_is: params.strings("destinationIP[is]"),
        destination_ip_is_not: params.strings("destinationIP[isNot]"),
        destination_port_is: params.all("destinationPort[is]")?,
        destination_port_is_not: params.all("destinationPort[isNot]")?,
        has_spec_diff: params.get("hasSpecDiff[is]")?,
        spec_diff_type_is: params.strings("specDiffType[is]"),
        spec_is: params.strings("spec[is]"),
        spec_is_not: params.strings("spec[isNot]"),
        spec_contains: params.strings("spec[contains]"),
        spec_start: params.string("spec[start]"),
        spec_end: params.string("spec[end]"),
        api_info_id: params.get("apiInfoId[is]")?,
        start_time: params.string("startTime"),
        end_time: params.string("endTime"),
        request_start_time: params.string("requestStartTime"),
        request_end_time: params.string("requestEndTime"),
        show_non_api: params.get("showNonApi")?.unwrap_or(false),
        alert_is: params.strings("alert[is]"),
        alert_module_is: params.strings("alertModule[is]"),
    })
}

async fn list_events(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> ApiResult<Json<Paged<ApiEvent>>> {
    let params = QueryParams::parse(query.as_deref());
    let filter = events_filter(&params)?;
    let (sort_key, sort_dir) = params.sort("time", SortDir::Desc)?;
    let (items, total) = state
        .db
        .api_events()
        .list(&filter, &sort_key, sort_dir, params.page()?)
        .await?;
    Ok(Json(Paged { total, items }))
}

async fn get_event(State(state): State<AppState>, Path(event_id): Path<i64>) -> ApiResult<Json<ApiEvent>> {
    Ok(Json(state.db.api_events().get(event_id).await?))
}

async fn reconstructed_spec_diff(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> ApiResult<Json<SpecDiff>> {
    Ok(Json(
        state.db.api_events().reconstructed_spec_diff(event_id).await?,
    ))
}

async fn provided_spec_diff(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> ApiResult<Json<SpecDiff>> {
    Ok(Json(state.db.api_events().provided_spec_diff(event_id).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::*;
    use crate::rest::router;
    use crate::rest::test_support::{call, state};
    use crate::storage::{format_time, DiffType};

    async fn seed(state: &AppState) -> Vec<i64> {
        let now = chrono::Utc::now();
        let mut ids = Vec::new();
        for (i, (method, path, status, non_api)) in [
            ("GET", "/pets", 200, false),
            ("POST", "/pets", 201, false),
            ("GET", "/index.html", 200, true),
            ("DELETE", "/pets/1", 404, false),
        ]
        .into_iter()
        .enumerate()
        {
            let event = ApiEvent {
                time: format_time(now + chrono::Duration::seconds(i as i64)),
                method: method.to_string(),
                path: path.to_string(),
                status_code: status,
                host_spec_name: "petstore".to_string(),
                destination_port: 80,
                is_non_api: non_api,
                has_spec_diff: method == "DELETE",
                has_provided_spec_diff: method == "DELETE",
                spec_diff_type: if method == "DELETE" {
                    DiffType::ShadowDiff
                } else {
                    DiffType::NoDiff
                },
                new_provided_spec: if method == "DELETE" {
                    r#"{"delete":{}}"#.to_string()
                } else {
                    String::new()
                },
                ..ApiEvent::default()
            };
            ids.push(state.db.api_events().create(&event).await.unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_list_filters_and_sorting() {
        let state = state().await;
        seed(&state).await;
        let app = router(state);

        let (status, body) = call(app.clone(), Method::GET, "/api/apiEvents", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["items"][0]["method"], "DELETE");

        let (_, body) = call(app.clone(), Method::GET, "/api/apiEvents?showNonApi=true", None).await;
        assert_eq!(body["total"], 4);

        let (_, body) = call(
            app.clone(),
            Method::GET,
            "/api/apiEvents?method%5Bis%5D=GET&method%5Bis%5D=POST&sortKey=method&sortDir=ASC",
            None,
        )
        .await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["items"][0]["method"], "GET");

        let (_, body) = call(app.clone(), Method::GET, "/api/apiEvents?statusCode%5Bgte%5D=300", None).await;
        assert_eq!(body["total"], 1);

        let (_, body) = call(app.clone(), Method::GET, "/api/apiEvents?page=2&pageSize=2", None).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let (status, _) = call(app, Method::GET, "/api/apiEvents?sortKey=nope", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_and_diff() {
        let state = state().await;
        let ids = seed(&state).await;
        let app = router(state);

        let (status, body) = call(app.clone(), Method::GET, &format!("/api/apiEvents/{}", ids[3]), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["specDiffType"], "SHADOW_DIFF");

        let (status, body) = call(
            app.clone(),
            Method::GET,
            &format!("/api/apiEvents/{}/providedSpecDiff", ids[3]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newSpec"], r#"{"delete":{}}"#);

        let (status, _) = call(app, Method::GET, "/api/apiEvents/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
