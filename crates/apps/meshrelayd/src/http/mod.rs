//! HTTP control surface: JSON API under `/api`, dashboard assets under
//! `/assets`, SSE stream for the CAD calibration sweep.

pub mod api;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::context::DaemonContext;

pub fn assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

pub fn build_router(ctx: Arc<DaemonContext>) -> Router {
    let cors_enabled = ctx.config.lock().expect("config lock").web.cors_enabled;

    let api = Router::new()
        .route("/stats", get(api::stats))
        .route("/logs", get(api::logs))
        .route("/packet_stats", get(api::packet_stats))
        .route("/recent_packets", get(api::recent_packets))
        .route("/filtered_packets", get(api::filtered_packets))
        .route("/packet_by_hash", get(api::packet_by_hash))
        .route("/packet_type_stats", get(api::packet_type_stats))
        .route("/route_stats", get(api::route_stats))
        .route("/rrd_data", get(api::rrd_data))
        .route("/packet_type_graph_data", get(api::packet_type_graph_data))
        .route("/metrics_graph_data", get(api::metrics_graph_data))
        .route("/noise_floor_history", get(api::noise_floor_history))
        .route("/noise_floor_stats", get(api::noise_floor_stats))
        .route("/adverts_by_contact_type", get(api::adverts_by_contact_type))
        .route("/send_advert", post(api::send_advert))
        .route("/set_mode", post(api::set_mode))
        .route("/set_duty_cycle", post(api::set_duty_cycle))
        .route("/global_flood_policy", post(api::global_flood_policy))
        .route("/transport_keys", get(api::list_transport_keys).post(api::create_transport_key))
        .route(
            "/transport_key/:id",
            get(api::get_transport_key)
                .put(api::update_transport_key)
                .delete(api::delete_transport_key),
        )
        .route("/cad_calibration_start", post(api::cad_calibration_start))
        .route("/cad_calibration_stop", post(api::cad_calibration_stop))
        .route("/save_cad_settings", post(api::save_cad_settings))
        .route("/cad_calibration_stream", get(api::cad_calibration_stream))
        .with_state(ctx);

    let mut app = Router::new()
        .nest("/api", api)
        .nest_service("/assets", ServeDir::new(assets_dir()))
        .fallback(get(index));

    if cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve the single-page dashboard for every non-API route so client-side
/// routing works.
async fn index() -> Result<Html<String>, (StatusCode, &'static str)> {
    match std::fs::read_to_string(assets_dir().join("index.html")) {
        Ok(contents) => Ok(Html(contents)),
        Err(_) => Err((
            StatusCode::NOT_FOUND,
            "Application not found. Please build the frontend first.",
        )),
    }
}

pub async fn serve(ctx: Arc<DaemonContext>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(ctx.clone());
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    log::info!("HTTP server listening on {host}:{port}");
    let cancel = ctx.cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
