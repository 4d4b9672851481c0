//! Telemetry aggregator.
//!
//! One entry point per record kind; each fans out to the relational store,
//! the time-series store and the publishers. A sink failure is logged and
//! never reverses the forwarding decision that produced the record.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::mqtt::MqttPublisher;
use crate::records::{AdvertObservation, PacketRecord};
use crate::rrd::{packet_sample, Consolidation, FetchResult, TimeSeriesStore};
use crate::sqlite::Store;
use crate::upstream::UpstreamHandle;

pub struct TelemetryCollector {
    store: Arc<Store>,
    series: Mutex<TimeSeriesStore>,
    series_path: PathBuf,
    mqtt: Option<MqttPublisher>,
    upstream: Option<UpstreamHandle>,
}

impl TelemetryCollector {
    pub fn new(
        store: Arc<Store>,
        series: TimeSeriesStore,
        series_path: PathBuf,
        mqtt: Option<MqttPublisher>,
        upstream: Option<UpstreamHandle>,
    ) -> Self {
        Self {
            store,
            series: Mutex::new(series),
            series_path,
            mqtt,
            upstream,
        }
    }

    pub fn record_packet(&self, record: &PacketRecord) {
        log::debug!(
            "recording packet: type={} transmitted={}",
            record.packet_type,
            record.transmitted
        );
        if let Err(err) = self.store.store_packet(record) {
            log::error!("failed to store packet record: {err}");
        }

        match self.store.cumulative_counts() {
            Ok(cumulative) => {
                let values = packet_sample(
                    &cumulative,
                    f64::from(record.rssi),
                    record.snr,
                    f64::from(record.length),
                    record.score,
                );
                self.series
                    .lock()
                    .expect("time series lock")
                    .update(record.timestamp as u64, &values);
            }
            Err(err) => log::warn!("failed to get cumulative counts: {err}"),
        }

        if let Some(mqtt) = &self.mqtt {
            match serde_json::to_value(record) {
                Ok(value) => mqtt.publish("packet", &value),
                Err(err) => log::warn!("failed to serialize packet record: {err}"),
            }
        }
        if let Some(upstream) = &self.upstream {
            upstream.publish_packet(record.clone());
        }
    }

    /// Upsert an advert observation. Returns true when it created a new
    /// neighbor row.
    pub fn record_advert(&self, observation: &AdvertObservation) -> bool {
        let is_new = match self.store.upsert_advert(observation) {
            Ok(is_new) => is_new,
            Err(err) => {
                log::error!("failed to store advert record: {err}");
                false
            }
        };
        if let Some(mqtt) = &self.mqtt {
            match serde_json::to_value(observation) {
                Ok(mut value) => {
                    if let Some(map) = value.as_object_mut() {
                        map.insert("is_new_neighbor".to_string(), serde_json::json!(is_new));
                    }
                    mqtt.publish("advert", &value);
                }
                Err(err) => log::warn!("failed to serialize advert record: {err}"),
            }
        }
        is_new
    }

    pub fn record_noise_floor(&self, timestamp: f64, noise_floor_dbm: f64) {
        if let Err(err) = self.store.store_noise_floor(timestamp, noise_floor_dbm) {
            log::error!("failed to store noise floor sample: {err}");
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.publish(
                "noise_floor",
                &serde_json::json!({
                    "timestamp": timestamp,
                    "noise_floor_dbm": noise_floor_dbm,
                }),
            );
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn fetch_series(&self, start: u64, end: u64, kind: Consolidation) -> Option<FetchResult> {
        self.series.lock().expect("time series lock").fetch(start, end, kind)
    }

    /// Snapshot the time-series state to disk; called from the timer task
    /// and once more at shutdown.
    pub fn flush_series(&self) {
        let series = self.series.lock().expect("time series lock");
        if let Err(err) = series.save(&self.series_path) {
            log::warn!("failed to snapshot time series: {err}");
        }
    }
}
