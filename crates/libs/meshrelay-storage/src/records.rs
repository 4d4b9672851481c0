//! Row types shared by the store, the collector and the dashboard API.

use serde::{Deserialize, Serialize};

/// Per-key forwarding policy consulted when the global flood policy is deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloodPolicy {
    Allow,
    Deny,
}

impl FloodPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FloodPolicy::Allow => "allow",
            FloodPolicy::Deny => "deny",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(FloodPolicy::Allow),
            "deny" => Some(FloodPolicy::Deny),
            _ => None,
        }
    }
}

/// One immutable row per received frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub packet_type: u8,
    pub route: u8,
    pub length: u32,
    pub rssi: i32,
    pub snr: f64,
    pub score: f64,
    pub transmitted: bool,
    pub is_duplicate: bool,
    pub drop_reason: Option<String>,
    pub src_hash: Option<String>,
    pub dst_hash: Option<String>,
    pub path_hash: Option<String>,
    pub header: Option<String>,
    pub transport_codes: Option<String>,
    pub payload: Option<String>,
    pub payload_length: u32,
    pub tx_delay_ms: f64,
    pub packet_hash: String,
    pub original_path: Option<Vec<String>>,
    pub forwarded_path: Option<Vec<String>>,
    pub raw_packet: Option<String>,
}

/// A single advert observation headed for the upsert.
#[derive(Debug, Clone, Serialize)]
pub struct AdvertObservation {
    pub timestamp: f64,
    pub pubkey: String,
    pub node_name: Option<String>,
    pub is_repeater: bool,
    pub route_type: u8,
    pub contact_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rssi: i32,
    pub snr: f64,
}

/// A stored advert row; with the pubkey unique this doubles as the
/// neighbor view.
#[derive(Debug, Clone, Serialize)]
pub struct AdvertRow {
    pub id: i64,
    pub timestamp: f64,
    pub pubkey: String,
    pub node_name: Option<String>,
    pub is_repeater: bool,
    pub route_type: Option<u8>,
    pub contact_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub advert_count: i64,
    pub is_new_neighbor: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoiseSample {
    pub timestamp: f64,
    pub noise_floor_dbm: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportKey {
    pub id: i64,
    pub name: String,
    pub flood_policy: FloodPolicy,
    pub transport_key: String,
    pub parent_id: Option<i64>,
    pub last_used: Option<f64>,
    pub created_at: f64,
    pub updated_at: f64,
}

/// Optional-field update for a transport key; `None` leaves a column alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportKeyUpdate {
    pub name: Option<String>,
    pub flood_policy: Option<FloodPolicy>,
    pub transport_key: Option<String>,
    pub parent_id: Option<i64>,
    pub last_used: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub value: u8,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: u64,
}

/// Windowed aggregate over the packets table.
#[derive(Debug, Clone, Serialize)]
pub struct PacketStats {
    pub total_packets: u64,
    pub transmitted_packets: u64,
    pub dropped_packets: u64,
    pub avg_rssi: f64,
    pub avg_snr: f64,
    pub avg_score: f64,
    pub avg_payload_length: f64,
    pub avg_tx_delay: f64,
    pub packet_types: Vec<TypeCount>,
    pub drop_reasons: Vec<ReasonCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketTypeStats {
    pub hours: u32,
    pub packet_type_totals: std::collections::BTreeMap<String, u64>,
    pub total_packets: u64,
    pub period: String,
    pub data_source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStats {
    pub hours: u32,
    pub route_totals: std::collections::BTreeMap<String, u64>,
    pub total_packets: u64,
    pub period: String,
    pub data_source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoiseFloorStats {
    pub measurement_count: u64,
    pub avg_noise_floor: f64,
    pub min_noise_floor: f64,
    pub max_noise_floor: f64,
    pub hours: u32,
}

/// Cumulative totals used to feed the time-series counters.
#[derive(Debug, Clone, Default)]
pub struct CumulativeCounts {
    pub rx_total: u64,
    pub tx_total: u64,
    pub drop_total: u64,
    /// type_0..type_15 then type_other.
    pub type_counts: [u64; 17],
}

/// Filter for the packet listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct PacketFilter {
    pub packet_type: Option<u8>,
    pub route: Option<u8>,
    pub start_timestamp: Option<f64>,
    pub end_timestamp: Option<f64>,
    pub limit: Option<u32>,
}
