//! Provided specs, reconstructed-spec reviews and the diffs they produce.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use apiclarity::notifier::Notification;
use apiclarity::storage::DiffType;
use common::{harness, Trace};

const INVENTORY_SPEC: &str = r#"{
  "openapi": "3.0.0",
  "info": {"title": "inventory", "version": "1"},
  "paths": {
    "/items": {"get": {"responses": {"200": {"description": "ok"}}}},
    "/items/{itemId}": {
      "get": {
        "parameters": [{"name": "itemId", "in": "path", "required": true, "schema": {"type": "string"}}],
        "responses": {"200": {"description": "ok"}}
      }
    }
  }
}"#;

#[tokio::test]
async fn test_provided_spec_diffs() {
    let h = harness().await;
    let base = Trace::get("inventory.svc", "10.0.3.1:8000", "/items");
    assert_eq!(h.ingest(&base).await, StatusCode::OK);
    let api = h.db.api_inventory().all().await.unwrap().remove(0);

    let (status, _) = h
        .call(
            Method::PUT,
            &format!("/api/apiInventory/{}/specs/providedSpec", api.id),
            Some(json!({"rawSpec": INVENTORY_SPEC})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Documented operation.
    assert_eq!(
        h.ingest(&Trace::get("inventory.svc", "10.0.3.1:8000", "/items/42")).await,
        StatusCode::OK
    );
    let documented = h.last_event().await;
    assert_eq!(documented.spec_diff_type, DiffType::NoDiff);
    assert!(!documented.provided_path_id.is_empty());

    // Undocumented operation.
    let mut shadow = Trace::get("inventory.svc", "10.0.3.1:8000", "/items");
    shadow.method = "DELETE".to_string();
    assert_eq!(h.ingest(&shadow).await, StatusCode::OK);
    let event = h.last_event().await;
    assert!(event.has_spec_diff);
    assert!(event.has_provided_spec_diff);
    assert_eq!(event.spec_diff_type, DiffType::ShadowDiff);

    let (status, diff) = h
        .call(
            Method::GET,
            &format!("/api/apiEvents/{}/providedSpecDiff", event.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(diff["diffType"], "SHADOW_DIFF");
    assert!(diff["newSpec"].as_str().unwrap().contains("delete"));

    let (_, body) = h
        .call(Method::GET, "/api/apiEvents?hasSpecDiff%5Bis%5D=true", None)
        .await;
    assert_eq!(body["total"], 1);

    let (_, latest) = h
        .call(Method::GET, "/api/dashboard/apiUsage/latestDiffs", None)
        .await;
    assert_eq!(latest[0]["apiEventId"], event.id);

    // Undeclared response status.
    let mut failing = Trace::get("inventory.svc", "10.0.3.1:8000", "/items/42");
    failing.status = "503".to_string();
    assert_eq!(h.ingest(&failing).await, StatusCode::OK);
    let event = h.last_event().await;
    assert_eq!(event.spec_diff_type, DiffType::GeneralDiff);
    assert!(!event.provided_path_id.is_empty());

    // Removing the spec stops provided diffs.
    let (status, _) = h
        .call(
            Method::DELETE,
            &format!("/api/apiInventory/{}/specs/providedSpec", api.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.ingest(&shadow).await, StatusCode::OK);
    let event = h.last_event().await;
    assert!(!event.has_provided_spec_diff);
    assert!(event.provided_path_id.is_empty());
}

#[tokio::test]
async fn test_invalid_spec_upload_is_rejected() {
    let h = harness().await;
    assert_eq!(
        h.ingest(&Trace::get("inventory.svc", "10.0.3.1:8000", "/items")).await,
        StatusCode::OK
    );
    let api = h.db.api_inventory().all().await.unwrap().remove(0);
    let (status, body) = h
        .call(
            Method::PUT,
            &format!("/api/apiInventory/{}/specs/providedSpec", api.id),
            Some(json!({"rawSpec": "paths: [this is not openapi"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    assert!(!h.db.api_inventory().get(api.id).await.unwrap().has_provided_spec);
}

#[tokio::test]
async fn test_approved_review_backfills_only_covered_events() {
    let h = harness().await;
    for path in ["/users/1", "/users/2", "/groups/7"] {
        assert_eq!(
            h.ingest(&Trace::get("accounts.svc", "10.0.4.2:8080", path)).await,
            StatusCode::OK
        );
    }
    // Same path on another API must not be touched.
    assert_eq!(
        h.ingest(&Trace::get("billing.svc", "10.0.4.3:8080", "/users/1")).await,
        StatusCode::OK
    );

    let api_id = {
        let (status, id) = h
            .call(
                Method::GET,
                "/api/apiInventory/apiId?name=accounts.svc&port=8080",
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        id.as_i64().unwrap()
    };

    let (status, review) = h
        .call(
            Method::GET,
            &format!("/api/apiInventory/{api_id}/suggestedReview"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let users: Vec<Value> = review["reviewPathItems"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|item| item["parameterizedPath"].as_str().unwrap().starts_with("/users"))
        .cloned()
        .collect();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["paths"], json!(["/users/1", "/users/2"]));

    let (status, _) = h
        .call(
            Method::POST,
            &format!("/api/apiInventory/{}/approvedReview", review["id"]),
            Some(json!({"reviewPathItems": users})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let events = h.events().await;
    let users_ids: Vec<&str> = events
        .iter()
        .filter(|e| e.host_spec_name == "accounts.svc" && e.path.starts_with("/users"))
        .map(|e| e.reconstructed_path_id.as_str())
        .collect();
    assert_eq!(users_ids.len(), 2);
    assert!(!users_ids[0].is_empty());
    assert_eq!(users_ids[0], users_ids[1]);
    assert!(events
        .iter()
        .filter(|e| e.host_spec_name == "billing.svc" || e.path == "/groups/7")
        .all(|e| e.reconstructed_path_id.is_empty()));

    let api = h.db.api_inventory().get(api_id).await.unwrap();
    assert!(api.has_reconstructed_spec);
    let (status, swagger) = h
        .call(
            Method::GET,
            &format!("/api/apiInventory/{api_id}/reconstructed_swagger.json"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(swagger["paths"].as_object().unwrap().len() >= 1);

    // New traces on the approved path resolve to the same id.
    assert_eq!(
        h.ingest(&Trace::get("accounts.svc", "10.0.4.2:8080", "/users/3")).await,
        StatusCode::OK
    );
    assert_eq!(h.last_event().await.reconstructed_path_id, users_ids[0]);

    let (status, _) = h
        .call(
            Method::DELETE,
            &format!("/api/apiInventory/{api_id}/specs/reconstructedSpec"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.db.api_inventory().get(api_id).await.unwrap().has_reconstructed_spec);
}

#[tokio::test]
async fn test_new_discovered_apis() {
    let mut h = harness().await;
    let (status, _) = h
        .call(
            Method::POST,
            "/api/control/newDiscoveredAPIs",
            Some(json!({"hosts": ["ledger.finance.svc:7000", "garbage", "ledger.finance.svc:7000"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let apis = h.db.api_inventory().all().await.unwrap();
    assert_eq!(apis.len(), 1);
    assert_eq!(apis[0].name, "ledger.finance.svc");
    assert_eq!(apis[0].port, 7000);

    let notifications = h.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert!(matches!(
        &notifications[0],
        Notification::NewDiscoveredApi { name, port: 7000, .. } if name == "ledger.finance.svc"
    ));

    // A later trace lands on the same row.
    assert_eq!(
        h.ingest(&Trace::get("ledger.finance.svc", "10.0.9.9:7000", "/entries")).await,
        StatusCode::OK
    );
    assert_eq!(h.db.api_inventory().all().await.unwrap().len(), 1);
}
