//! `/api` endpoint handlers. Every response is a `{success, data|error}`
//! envelope; handlers never fail the connection.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use meshrelay_proto::now_epoch_secs;
use meshrelay_storage::records::{PacketFilter, TransportKeyUpdate};
use meshrelay_storage::rrd::{Consolidation, FetchResult, COUNTER_SOURCES};
use meshrelay_storage::FloodPolicy;

use crate::context::DaemonContext;

type Ctx = State<Arc<DaemonContext>>;

fn ok(data: impl serde::Serialize) -> Json<Value> {
    Json(json!({"success": true, "data": data}))
}

fn ok_with(data: impl serde::Serialize, extra: Value) -> Json<Value> {
    let mut body = json!({"success": true, "data": data});
    if let (Some(body_map), Some(extra_map)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in extra_map {
            body_map.insert(key.clone(), value.clone());
        }
    }
    Json(body)
}

fn err(message: impl std::fmt::Display) -> Json<Value> {
    Json(json!({"success": false, "error": message.to_string()}))
}

#[derive(Debug, Deserialize)]
pub struct HoursParams {
    #[serde(default = "default_hours")]
    hours: u32,
}

fn default_hours() -> u32 {
    24
}

pub async fn stats(State(ctx): Ctx) -> Json<Value> {
    ok(ctx.stats_payload().await)
}

pub async fn logs(State(ctx): Ctx) -> Json<Value> {
    let logs: Vec<crate::logbuf::LogEntry> =
        ctx.log_buffer.lock().expect("log buffer").iter().cloned().collect();
    if logs.is_empty() {
        return ok(json!({"logs": [{
            "message": "No logs available",
            "timestamp": chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "level": "INFO",
        }]}));
    }
    ok(json!({ "logs": logs }))
}

pub async fn packet_stats(State(ctx): Ctx, Query(params): Query<HoursParams>) -> Json<Value> {
    match ctx.store.packet_stats(params.hours) {
        Ok(stats) => ok(stats),
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn recent_packets(State(ctx): Ctx, Query(params): Query<LimitParams>) -> Json<Value> {
    match ctx.store.recent_packets(params.limit) {
        Ok(packets) => {
            let count = packets.len();
            ok_with(packets, json!({"count": count}))
        }
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct FilterParams {
    #[serde(rename = "type")]
    packet_type: Option<u8>,
    route: Option<u8>,
    start_timestamp: Option<f64>,
    end_timestamp: Option<f64>,
    limit: Option<u32>,
}

pub async fn filtered_packets(State(ctx): Ctx, Query(params): Query<FilterParams>) -> Json<Value> {
    let filter = PacketFilter {
        packet_type: params.packet_type,
        route: params.route,
        start_timestamp: params.start_timestamp,
        end_timestamp: params.end_timestamp,
        limit: params.limit,
    };
    match ctx.store.filtered_packets(&filter) {
        Ok(packets) => {
            let count = packets.len();
            ok_with(
                packets,
                json!({"count": count, "filters": {
                    "type": filter.packet_type,
                    "route": filter.route,
                    "start_timestamp": filter.start_timestamp,
                    "end_timestamp": filter.end_timestamp,
                    "limit": filter.limit,
                }}),
            )
        }
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct HashParams {
    packet_hash: Option<String>,
}

pub async fn packet_by_hash(State(ctx): Ctx, Query(params): Query<HashParams>) -> Json<Value> {
    let Some(packet_hash) = params.packet_hash else {
        return err("packet_hash parameter required");
    };
    match ctx.store.packet_by_hash(&packet_hash) {
        Ok(Some(packet)) => ok(packet),
        Ok(None) => err("Packet not found"),
        Err(error) => err(error),
    }
}

pub async fn packet_type_stats(State(ctx): Ctx, Query(params): Query<HoursParams>) -> Json<Value> {
    match ctx.store.packet_type_stats(params.hours) {
        Ok(stats) => ok(stats),
        Err(error) => err(error),
    }
}

pub async fn route_stats(State(ctx): Ctx, Query(params): Query<HoursParams>) -> Json<Value> {
    match ctx.store.route_stats(params.hours) {
        Ok(stats) => ok(stats),
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    start_time: Option<u64>,
    end_time: Option<u64>,
    #[serde(default = "default_resolution")]
    resolution: String,
}

fn default_resolution() -> String {
    "average".to_string()
}

/// Split a fetch into the original wire shape: `packet_types` holds the
/// `type_*` sources, `metrics` the rest.
fn series_payload(fetched: &FetchResult) -> Value {
    let mut packet_types = serde_json::Map::new();
    let mut metrics = serde_json::Map::new();
    for (index, name) in fetched.data_sources.iter().enumerate() {
        let column: Vec<Value> = fetched
            .rows
            .iter()
            .map(|row| row[index].map_or(Value::Null, |value| json!(value)))
            .collect();
        if name.starts_with("type_") {
            packet_types.insert(name.clone(), Value::Array(column));
        } else {
            metrics.insert(name.clone(), Value::Array(column));
        }
    }
    json!({
        "start_time": fetched.start_time,
        "end_time": fetched.end_time,
        "step": fetched.step,
        "data_sources": fetched.data_sources,
        "timestamps": fetched.timestamps,
        "packet_types": packet_types,
        "metrics": metrics,
    })
}

pub async fn rrd_data(State(ctx): Ctx, Query(params): Query<SeriesParams>) -> Json<Value> {
    let Some(kind) = Consolidation::parse(&params.resolution) else {
        return err(format!("Invalid resolution: {}", params.resolution));
    };
    let end = params.end_time.unwrap_or_else(|| now_epoch_secs() as u64);
    let start = params.start_time.unwrap_or_else(|| end.saturating_sub(24 * 3600));
    match ctx.collector.fetch_series(start, end, kind) {
        Some(fetched) => ok(series_payload(&fetched)),
        None => err("No time-series data available"),
    }
}

pub async fn packet_type_graph_data(
    State(ctx): Ctx,
    Query(params): Query<HoursParams>,
) -> Json<Value> {
    let stats = match ctx.store.packet_type_stats(params.hours) {
        Ok(stats) => stats,
        Err(error) => return err(error),
    };
    let end_time = now_epoch_secs() as u64;
    let start_time = end_time - u64::from(params.hours) * 3600;

    let mut series: Vec<Value> = stats
        .packet_type_totals
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(name, count)| {
            json!({
                "name": name,
                "type": name.to_lowercase().replace(' ', "_").replace(['(', ')'], ""),
                "data": [[end_time * 1000, count]],
            })
        })
        .collect();
    series.sort_by_key(|entry| {
        std::cmp::Reverse(entry["data"][0][1].as_u64().unwrap_or_default())
    });

    ok(json!({
        "start_time": start_time,
        "end_time": end_time,
        "step": 3600,
        "timestamps": [start_time, end_time],
        "series": series,
        "data_source": "sqlite",
        "chart_type": "bar",
    }))
}

#[derive(Debug, Deserialize)]
pub struct MetricsGraphParams {
    #[serde(default = "default_hours")]
    hours: u32,
    #[serde(default = "default_resolution")]
    resolution: String,
    #[serde(default = "default_metrics")]
    metrics: String,
}

fn default_metrics() -> String {
    "all".to_string()
}

fn metric_display_name(key: &str) -> &str {
    match key {
        "rx_count" => "Received Packets",
        "tx_count" => "Transmitted Packets",
        "drop_count" => "Dropped Packets",
        "avg_rssi" => "Average RSSI (dBm)",
        "avg_snr" => "Average SNR (dB)",
        "avg_length" => "Average Packet Length",
        "avg_score" => "Average Score",
        "neighbor_count" => "Neighbor Count",
        other => other,
    }
}

pub async fn metrics_graph_data(
    State(ctx): Ctx,
    Query(params): Query<MetricsGraphParams>,
) -> Json<Value> {
    let Some(kind) = Consolidation::parse(&params.resolution) else {
        return err(format!("Invalid resolution: {}", params.resolution));
    };
    let end_time = now_epoch_secs() as u64;
    let start_time = end_time - u64::from(params.hours) * 3600;
    let Some(fetched) = ctx.collector.fetch_series(start_time, end_time, kind) else {
        return err("No time-series data available");
    };

    let requested: Vec<String> = if params.metrics == "all" {
        fetched
            .data_sources
            .iter()
            .filter(|name| !name.starts_with("type_"))
            .cloned()
            .collect()
    } else {
        params.metrics.split(',').map(|name| name.trim().to_string()).collect()
    };

    let timestamps_ms: Vec<u64> = fetched.timestamps.iter().map(|ts| ts * 1000).collect();
    let mut series = Vec::new();
    for metric in &requested {
        let Some(index) = fetched.data_sources.iter().position(|name| name == metric) else {
            continue;
        };
        let column: Vec<Option<f64>> = fetched.rows.iter().map(|row| row[index]).collect();
        let data: Vec<Value> = if COUNTER_SOURCES.contains(&metric.as_str()) {
            // cumulative counter: chart the per-bucket delta
            let mut previous: Option<f64> = None;
            column
                .iter()
                .zip(&timestamps_ms)
                .map(|(value, ts)| {
                    let rate = match (previous, value) {
                        (Some(prev), Some(current)) => (current - prev).max(0.0),
                        _ => 0.0,
                    };
                    if value.is_some() {
                        previous = *value;
                    }
                    json!([ts, rate])
                })
                .collect()
        } else {
            column
                .iter()
                .zip(&timestamps_ms)
                .map(|(value, ts)| json!([ts, value.unwrap_or(0.0)]))
                .collect()
        };
        series.push(json!({
            "name": metric_display_name(metric),
            "type": metric,
            "data": data,
        }));
    }

    ok(json!({
        "start_time": fetched.start_time,
        "end_time": fetched.end_time,
        "step": fetched.step,
        "timestamps": fetched.timestamps,
        "series": series,
    }))
}

pub async fn noise_floor_history(State(ctx): Ctx, Query(params): Query<HoursParams>) -> Json<Value> {
    match ctx.store.noise_floor_history(params.hours) {
        Ok(history) => {
            let count = history.len();
            ok(json!({"history": history, "hours": params.hours, "count": count}))
        }
        Err(error) => err(error),
    }
}

pub async fn noise_floor_stats(State(ctx): Ctx, Query(params): Query<HoursParams>) -> Json<Value> {
    match ctx.store.noise_floor_stats(params.hours) {
        Ok(stats) => ok(json!({"stats": stats, "hours": params.hours})),
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct AdvertsParams {
    contact_type: Option<String>,
    limit: Option<u32>,
    hours: Option<u32>,
}

pub async fn adverts_by_contact_type(
    State(ctx): Ctx,
    Query(params): Query<AdvertsParams>,
) -> Json<Value> {
    let Some(contact_type) = params.contact_type else {
        return err("contact_type parameter is required");
    };
    match ctx
        .store
        .adverts_by_contact_type(&contact_type, params.limit, params.hours)
    {
        Ok(adverts) => {
            let count = adverts.len();
            ok_with(
                adverts,
                json!({"count": count, "contact_type": contact_type, "filters": {
                    "contact_type": contact_type,
                    "limit": params.limit,
                    "hours": params.hours,
                }}),
            )
        }
        Err(error) => err(error),
    }
}

pub async fn send_advert(State(ctx): Ctx) -> Json<Value> {
    if ctx.send_advert().await {
        ok("Advert sent successfully")
    } else {
        err("Failed to send advert")
    }
}

pub async fn set_mode(State(ctx): Ctx, Json(body): Json<Value>) -> Json<Value> {
    let mode = body.get("mode").and_then(Value::as_str).unwrap_or("forward");
    if mode != "forward" && mode != "monitor" {
        return err("Invalid mode. Must be 'forward' or 'monitor'");
    }
    ctx.flags.set_monitor_mode(mode == "monitor");
    ctx.config.lock().expect("config lock").repeater.mode = mode.to_string();
    log::info!("Mode changed to: {mode}");
    Json(json!({"success": true, "mode": mode}))
}

pub async fn set_duty_cycle(State(ctx): Ctx, Json(body): Json<Value>) -> Json<Value> {
    let enabled = body.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    ctx.flags.set_duty_cycle_enforced(enabled);
    ctx.config
        .lock()
        .expect("config lock")
        .duty_cycle
        .enforcement_enabled = enabled;
    log::info!(
        "Duty cycle enforcement {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Json(json!({"success": true, "enabled": enabled}))
}

pub async fn global_flood_policy(State(ctx): Ctx, Json(body): Json<Value>) -> Json<Value> {
    let Some(allow) = body.get("global_flood_allow").and_then(Value::as_bool) else {
        return err("Missing required field: global_flood_allow");
    };
    ctx.flags.set_global_flood_allow(allow);
    ctx.config.lock().expect("config lock").mesh.global_flood_allow = allow;
    if let Err(error) = ctx.save_config() {
        log::error!("Failed to save global flood policy to file: {error}");
        return err(format!("Failed to save configuration to file: {error}"));
    }
    let policy = if allow { "allow" } else { "deny" };
    log::info!("Updated global flood policy: {policy}");
    ok_with(
        json!({"global_flood_allow": allow}),
        json!({"message": format!("Global flood policy updated to {policy} (live and saved)")}),
    )
}

pub async fn list_transport_keys(State(ctx): Ctx) -> Json<Value> {
    match ctx.store.transport_keys() {
        Ok(keys) => {
            let count = keys.len();
            ok_with(keys, json!({"count": count}))
        }
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyBody {
    name: Option<String>,
    flood_policy: Option<String>,
    transport_key: Option<String>,
    parent_id: Option<i64>,
    last_used: Option<String>,
}

fn parse_last_used(value: Option<&str>) -> Option<f64> {
    let value = value?;
    match chrono::DateTime::parse_from_rfc3339(&value.replace('Z', "+00:00")) {
        Ok(parsed) => Some(parsed.timestamp() as f64),
        Err(_) => Some(now_epoch_secs()),
    }
}

pub async fn create_transport_key(State(ctx): Ctx, Json(body): Json<CreateKeyBody>) -> Json<Value> {
    let (Some(name), Some(policy)) = (body.name, body.flood_policy) else {
        return err("Missing required fields: name, flood_policy");
    };
    let Some(flood_policy) = FloodPolicy::parse(&policy) else {
        return err("flood_policy must be 'allow' or 'deny'");
    };
    let transport_key = body.transport_key.unwrap_or_else(|| {
        let mut material = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut material[..]);
        BASE64.encode(material)
    });
    let last_used = parse_last_used(body.last_used.as_deref()).or_else(|| Some(now_epoch_secs()));
    match ctx.store.create_transport_key(
        &name,
        flood_policy,
        &transport_key,
        body.parent_id,
        last_used,
    ) {
        Ok(id) => ok_with(
            json!({"id": id}),
            json!({"message": "Transport key created successfully"}),
        ),
        Err(error) => err(error),
    }
}

pub async fn get_transport_key(State(ctx): Ctx, Path(id): Path<i64>) -> Json<Value> {
    match ctx.store.transport_key(id) {
        Ok(Some(key)) => ok(key),
        Ok(None) => err("Transport key not found"),
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyBody {
    name: Option<String>,
    flood_policy: Option<String>,
    transport_key: Option<String>,
    parent_id: Option<i64>,
    last_used: Option<String>,
}

pub async fn update_transport_key(
    State(ctx): Ctx,
    Path(id): Path<i64>,
    Json(body): Json<UpdateKeyBody>,
) -> Json<Value> {
    let flood_policy = match body.flood_policy.as_deref() {
        Some(policy) => match FloodPolicy::parse(policy) {
            Some(policy) => Some(policy),
            None => return err("flood_policy must be 'allow' or 'deny'"),
        },
        None => None,
    };
    let update = TransportKeyUpdate {
        name: body.name,
        flood_policy,
        transport_key: body.transport_key,
        parent_id: body.parent_id,
        last_used: parse_last_used(body.last_used.as_deref()),
    };
    match ctx.store.update_transport_key(id, &update) {
        Ok(true) => ok_with(
            json!({"id": id}),
            json!({"message": "Transport key updated successfully"}),
        ),
        Ok(false) => err("Failed to update transport key or key not found"),
        Err(error) => err(error),
    }
}

pub async fn delete_transport_key(State(ctx): Ctx, Path(id): Path<i64>) -> Json<Value> {
    match ctx.store.delete_transport_key(id) {
        Ok(true) => ok_with(
            json!({"id": id}),
            json!({"message": "Transport key deleted successfully"}),
        ),
        Ok(false) => err("Failed to delete transport key or key not found"),
        Err(error) => err(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct CadStartBody {
    #[serde(default = "default_cad_samples")]
    samples: u32,
    #[serde(default = "default_cad_delay")]
    delay: u64,
}

fn default_cad_samples() -> u32 {
    8
}

fn default_cad_delay() -> u64 {
    100
}

pub async fn cad_calibration_start(
    State(ctx): Ctx,
    body: Option<Json<CadStartBody>>,
) -> Json<Value> {
    let Json(body) = body.unwrap_or(Json(CadStartBody {
        samples: default_cad_samples(),
        delay: default_cad_delay(),
    }));
    let spreading_factor = ctx
        .config
        .lock()
        .expect("config lock")
        .radio
        .spreading_factor;
    if ctx
        .cad
        .start(ctx.radio.clone(), spreading_factor, body.samples, body.delay)
    {
        ok("Calibration started")
    } else {
        err("Calibration already running")
    }
}

pub async fn cad_calibration_stop(State(ctx): Ctx) -> Json<Value> {
    ctx.cad.stop();
    ok("Calibration stopped")
}

#[derive(Debug, Deserialize)]
pub struct CadSettingsBody {
    peak: Option<u8>,
    min_val: Option<u8>,
    #[serde(default)]
    detection_rate: f64,
}

pub async fn save_cad_settings(State(ctx): Ctx, Json(body): Json<CadSettingsBody>) -> Json<Value> {
    let (Some(peak), Some(min_val)) = (body.peak, body.min_val) else {
        return err("Missing peak or min_val parameters");
    };
    ctx.radio.set_cad_thresholds(peak, min_val);
    {
        let mut config = ctx.config.lock().expect("config lock");
        config.radio.cad.peak_threshold = peak;
        config.radio.cad.min_threshold = min_val;
    }
    if let Err(error) = ctx.save_config() {
        return err(error);
    }
    log::info!(
        "Saved CAD settings: peak={peak}, min={min_val}, rate={:.1}%",
        body.detection_rate
    );
    Json(json!({
        "success": true,
        "message": format!("CAD settings saved: peak={peak}, min={min_val}"),
        "settings": {"peak": peak, "min_val": min_val, "detection_rate": body.detection_rate},
    }))
}

pub async fn cad_calibration_stream(
    State(ctx): Ctx,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut initial = vec![json!({
        "type": "connected",
        "message": "Connected to CAD calibration stream",
    })];
    if ctx.cad.is_running() {
        let spreading_factor = ctx
            .config
            .lock()
            .expect("config lock")
            .radio
            .spreading_factor;
        let (peak_range, min_range) = crate::cad::test_ranges(spreading_factor);
        let total_tests = peak_range.len() * min_range.len();
        initial.push(json!({
            "type": "status",
            "message": format!("Calibration in progress: SF{spreading_factor}, {total_tests} tests"),
            "test_ranges": {
                "peak_min": peak_range.start,
                "peak_max": peak_range.end - 1,
                "min_min": min_range.start,
                "min_max": min_range.end - 1,
                "spreading_factor": spreading_factor,
                "total_tests": total_tests,
            },
        }));
    }

    let backlog = tokio_stream::iter(initial.into_iter().map(|message| {
        Ok(Event::default().data(message.to_string()))
    }));
    let live = BroadcastStream::new(ctx.cad.subscribe()).filter_map(|message| {
        message
            .ok()
            .map(|value| Ok(Event::default().data(value.to_string())))
    });

    Sse::new(backlog.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_millis(500))
            .text(json!({"type": "keepalive"}).to_string()),
    )
}
