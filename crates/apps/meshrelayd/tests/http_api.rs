//! HTTP surface: envelope discipline and config mutation endpoints.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::test_context;
use tower::util::ServiceExt;

use meshrelay_daemon::http::build_router;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn stats_returns_success_envelope() {
    let (ctx, _radio) = test_context();
    let app = build_router(ctx.clone());
    let response = app
        .oneshot(Request::get("/api/stats").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(data["local_hash"], format!("0x{:02x}", ctx.local_hash));
    assert!(data["config"]["radio"]["spreading_factor"].is_number());
    assert!(data["rx_count"].is_number());
}

#[tokio::test]
async fn missing_packet_is_an_error_envelope_not_a_failure() {
    let (ctx, _radio) = test_context();
    let app = build_router(ctx);
    let response = app
        .oneshot(
            Request::get("/api/packet_by_hash?packet_hash=deadbeef")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Packet not found");
}

#[tokio::test]
async fn set_mode_flips_the_live_flag() {
    let (ctx, _radio) = test_context();
    let app = build_router(ctx.clone());

    let response = app
        .oneshot(
            Request::post("/api/set_mode")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"mode": "monitor"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["mode"], "monitor");
    assert!(ctx.flags.monitor_mode());
    assert_eq!(ctx.config.lock().expect("config").repeater.mode, "monitor");
}

#[tokio::test]
async fn invalid_mode_is_rejected() {
    let (ctx, _radio) = test_context();
    let app = build_router(ctx);
    let response = app
        .oneshot(
            Request::post("/api/set_mode")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"mode": "listen"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn duty_cycle_toggle_reaches_the_gate() {
    let (ctx, _radio) = test_context();
    let app = build_router(ctx.clone());
    let response = app
        .oneshot(
            Request::post("/api/set_duty_cycle")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"enabled": false}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(!ctx.flags.duty_cycle_enforced());
}

#[tokio::test]
async fn transport_key_lifecycle_over_http() {
    let (ctx, _radio) = test_context();

    let create = build_router(ctx.clone())
        .oneshot(
            Request::post("/api/transport_keys")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"name": "club", "flood_policy": "allow", "transport_key": "c2VjcmV0"}"#,
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(create).await;
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_i64().expect("id");

    let fetch = build_router(ctx.clone())
        .oneshot(
            Request::get(format!("/api/transport_key/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(fetch).await;
    assert_eq!(body["data"]["name"], "club");
    assert_eq!(body["data"]["flood_policy"], "allow");

    let delete = build_router(ctx.clone())
        .oneshot(
            Request::delete(format!("/api/transport_key/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(delete).await;
    assert_eq!(body["success"], true);
    assert!(ctx.store.transport_key(id).expect("query").is_none());
}

#[tokio::test]
async fn logs_endpoint_reports_placeholder_when_empty() {
    let (ctx, _radio) = test_context();
    let app = build_router(ctx);
    let response = app
        .oneshot(Request::get("/api/logs").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let logs = body["data"]["logs"].as_array().expect("logs array");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["message"], "No logs available");
}
