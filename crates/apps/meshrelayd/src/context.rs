//! Shared daemon state wired together at bootstrap.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use meshrelay_engine::{Radio, RepeaterEngine, RuntimeFlags};
use meshrelay_proto::advert::{build_advert, ADVERT_FLAG_IS_REPEATER};
use meshrelay_proto::{now_epoch_secs, Identity, Packet};
use meshrelay_storage::upstream::NodeCounters;
use meshrelay_storage::{Store, TelemetryCollector};

use crate::cad::CadCalibration;
use crate::config::Config;
use crate::logbuf::LogBuffer;

/// Queue statistics the router maintains and the dashboard reports.
#[derive(Debug, Default)]
pub struct RouterStats {
    pub enqueued: AtomicU64,
    pub processed: AtomicU64,
    pub errors: AtomicU64,
    pub queue_len: AtomicI64,
    pub max_queue_len: AtomicI64,
}

pub struct RouterHandle {
    tx: mpsc::UnboundedSender<Packet>,
    pub stats: Arc<RouterStats>,
}

impl RouterHandle {
    pub fn new(tx: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            tx,
            stats: Arc::new(RouterStats::default()),
        }
    }

    /// Entry point for every received frame.
    pub fn enqueue(&self, packet: Packet) {
        if self.tx.send(packet).is_err() {
            log::warn!("router queue closed; dropping received frame");
            return;
        }
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        let depth = self.stats.queue_len.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.max_queue_len.fetch_max(depth, Ordering::Relaxed);
    }
}

pub struct DaemonContext {
    pub config: Mutex<Config>,
    pub config_path: PathBuf,
    pub flags: Arc<RuntimeFlags>,
    pub identity: Identity,
    pub local_hash: u8,
    pub radio: Arc<dyn Radio>,
    pub engine: Mutex<RepeaterEngine>,
    pub store: Arc<Store>,
    pub collector: Arc<TelemetryCollector>,
    pub counters: Arc<NodeCounters>,
    pub router: RouterHandle,
    pub log_buffer: LogBuffer,
    pub cad: CadCalibration,
    pub started: Instant,
    pub cancel: CancellationToken,
}

impl DaemonContext {
    /// Construct and broadcast this node's signed flood advert, then mark
    /// its hash seen so the node does not re-forward its own frame.
    pub async fn send_advert(&self) -> bool {
        let (node_name, latitude, longitude) = {
            let config = self.config.lock().expect("config lock");
            (
                config.repeater.node_name.clone(),
                config.repeater.latitude,
                config.repeater.longitude,
            )
        };
        let packet = build_advert(
            &self.identity,
            &node_name,
            latitude,
            longitude,
            now_epoch_secs() as u32,
            ADVERT_FLAG_IS_REPEATER,
        );
        let frame = packet.to_bytes();
        match self.radio.send(&frame, false).await {
            Ok(()) => {
                self.engine
                    .lock()
                    .expect("engine lock")
                    .mark_seen(packet.hash_hex());
                log::info!(
                    "Sent flood advert '{node_name}' at ({latitude:.6}, {longitude:.6})"
                );
                true
            }
            Err(err) => {
                self.counters.incr_errors();
                log::error!("Failed to send advert: {err}");
                false
            }
        }
    }

    /// Persist the current config back to its file.
    pub fn save_config(&self) -> Result<(), crate::config::ConfigError> {
        let config = self.config.lock().expect("config lock");
        config.save(&self.config_path)
    }

    /// The `/api/stats` payload: engine counters and ring, live config and
    /// radio state, queue statistics.
    pub async fn stats_payload(&self) -> serde_json::Value {
        let engine_stats = self.engine.lock().expect("engine lock").stats();
        let noise_floor = self.radio.noise_floor().await;
        let params = self.radio.params();
        let config = self.config.lock().expect("config lock").clone();
        let max_duty_cycle_percent = (config.duty_cycle.max_airtime_per_minute / 60_000.0) * 100.0;

        let mut payload = serde_json::to_value(&engine_stats).unwrap_or_else(|_| json!({}));
        if let Some(map) = payload.as_object_mut() {
            map.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
            map.insert("public_key".to_string(), json!(self.identity.public_key_hex()));
            map.insert("noise_floor_dbm".to_string(), json!(noise_floor));
            map.insert(
                "queue".to_string(),
                json!({
                    "enqueued": self.router.stats.enqueued.load(Ordering::Relaxed),
                    "processed": self.router.stats.processed.load(Ordering::Relaxed),
                    "errors": self.router.stats.errors.load(Ordering::Relaxed),
                    "current_queue_size": self.router.stats.queue_len.load(Ordering::Relaxed).max(0),
                    "max_queue_size": self.router.stats.max_queue_len.load(Ordering::Relaxed).max(0),
                }),
            );
            map.insert(
                "config".to_string(),
                json!({
                    "node_name": config.repeater.node_name,
                    "repeater": {
                        "mode": if self.flags.monitor_mode() { "monitor" } else { "forward" },
                        "use_score_for_tx": config.repeater.use_score_for_tx,
                        "score_threshold": config.repeater.score_threshold,
                        "send_advert_interval_hours": config.repeater.send_advert_interval_hours,
                        "latitude": config.repeater.latitude,
                        "longitude": config.repeater.longitude,
                    },
                    "radio": {
                        "frequency": params.frequency_hz,
                        "tx_power": params.tx_power_dbm,
                        "bandwidth": params.bandwidth_hz,
                        "spreading_factor": params.spreading_factor,
                        "coding_rate": params.coding_rate,
                        "preamble_length": params.preamble_length,
                    },
                    "duty_cycle": {
                        "max_airtime_percent": max_duty_cycle_percent,
                        "enforcement_enabled": self.flags.duty_cycle_enforced(),
                    },
                    "delays": {
                        "tx_delay_factor": config.delays.tx_delay_factor,
                        "direct_tx_delay_factor": config.delays.direct_tx_delay_factor,
                    },
                    "mesh": {
                        "global_flood_allow": self.flags.global_flood_allow(),
                    },
                }),
            );
            match self.store.neighbors() {
                Ok(neighbors) => {
                    let view: serde_json::Map<String, serde_json::Value> = neighbors
                        .iter()
                        .map(|row| {
                            (
                                row.pubkey.clone(),
                                serde_json::to_value(row).unwrap_or_else(|_| json!({})),
                            )
                        })
                        .collect();
                    map.insert("neighbors".to_string(), json!(view));
                }
                Err(err) => log::warn!("failed to load neighbor view: {err}"),
            }
        }
        payload
    }
}
