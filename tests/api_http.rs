// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /actions (success envelope, error envelope + status mapping)
// - malformed JSON body

use std::sync::Arc;

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use forecast_miss_analyzer::{api, Collaborators, NotifierMux, PipelineCore};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

/// Build the same Router the binary uses (minus /metrics).
fn test_router() -> Router {
    let core = PipelineCore::new(
        Collaborators::in_memory(),
        Default::default(),
        NotifierMux::disabled(),
    );
    api::router(Arc::new(core))
}

async fn post_action(app: Router, body: Json) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("POST")
        .uri("/actions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build POST /actions");
    let resp = app.oneshot(req).await.expect("oneshot /actions");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "ok");
}

#[tokio::test]
async fn api_actions_success_envelope() {
    let (status, v) = post_action(
        test_router(),
        json!({
            "action": "runAll",
            "params": {"date": "2025-03-10"},
            "context": {"orgSlug": "acme"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["success"], true);
    assert_eq!(v["data"]["date"], "2025-03-10");
    assert_eq!(v["data"]["errors"], json!([]));
    assert!(v["data"].get("createBaselines").is_some());
    assert!(v.get("error").is_none());
}

#[tokio::test]
async fn api_actions_paginated_listing_carries_metadata() {
    let (status, v) =
        post_action(test_router(), json!({"action": "listMissedOpportunities"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["data"], json!([]));
    assert_eq!(
        v["metadata"],
        json!({"totalCount": 0, "page": 1, "pageSize": 20, "hasMore": false})
    );
}

#[tokio::test]
async fn api_actions_error_statuses() {
    let (status, v) = post_action(test_router(), json!({"action": "fly"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["success"], false);
    assert_eq!(v["error"]["code"], "UNSUPPORTED_ACTION");

    let (status, v) = post_action(
        test_router(),
        json!({"action": "getLearning", "params": {"id": "lq_999999"}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(v["error"]["code"], "NOT_FOUND");
    assert_eq!(v["error"]["details"]["id"], "lq_999999");
}

#[tokio::test]
async fn api_actions_rejects_malformed_json() {
    let req = Request::builder()
        .method("POST")
        .uri("/actions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("build request");
    let resp = test_router().oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    let v: Json = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(v["error"]["code"], "INVALID_REQUEST");
    assert_eq!(v["success"], false);
    // same shape as any other failed action: no null details
    assert!(v["error"].get("details").is_none(), "{v}");
}
