//! Repeater engine: classify, dedupe, rewrite, gate, schedule.
//!
//! For each received frame the engine makes one forwarding decision, builds
//! one immutable packet record, and keeps a small ring of recent records for
//! the dashboard. The sequence duplicate-check → mark-seen → path-mutate →
//! airtime-gate → schedule-send runs without suspension, so concurrent
//! frames never observe a half-applied decision.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use meshrelay_proto::{
    now_epoch_secs, Packet, MAX_PATH_SIZE, PAYLOAD_TYPE_ADVERT, PAYLOAD_TYPE_PATH,
    PAYLOAD_TYPE_REQ, PAYLOAD_TYPE_RESPONSE, PAYLOAD_TYPE_TXT_MSG, ROUTE_TYPE_DIRECT,
    ROUTE_TYPE_FLOOD, ROUTE_TYPE_TRANSPORT_DIRECT, ROUTE_TYPE_TRANSPORT_FLOOD,
};
use meshrelay_storage::records::PacketRecord;
use meshrelay_storage::upstream::NodeCounters;
use meshrelay_storage::{FloodPolicy, Store, TelemetryCollector};
use tokio_util::sync::CancellationToken;

use crate::airtime::{estimate_airtime_ms, AirtimeAccountant, AirtimeStats};
use crate::dedupe::DuplicateCache;
use crate::keys::TransportKeyCache;
use crate::score::packet_score;
use crate::{Radio, RuntimeFlags};

const MAX_RECENT_PACKETS: usize = 50;
const MAX_TX_DELAY_SECS: f64 = 5.0;
const SCORE_DELAY_FLOOR_SECS: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cache_ttl: Duration,
    pub tx_delay_factor: f64,
    pub direct_tx_delay_factor: f64,
    pub use_score_for_tx: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            tx_delay_factor: 1.0,
            direct_tx_delay_factor: 0.5,
            use_score_for_tx: false,
        }
    }
}

/// A dashboard ring entry: the record plus any duplicates attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct RecentEntry {
    #[serde(flatten)]
    pub record: PacketRecord,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<PacketRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub local_hash: String,
    pub duplicate_cache_size: usize,
    pub cache_ttl: u64,
    pub rx_count: u64,
    pub forwarded_count: u64,
    pub dropped_count: u64,
    pub rx_per_hour: u64,
    pub forwarded_per_hour: u64,
    pub recent_packets: Vec<RecentEntry>,
    pub uptime_seconds: f64,
    #[serde(flatten)]
    pub airtime: AirtimeStats,
}

pub struct RepeaterEngine {
    local_hash: u8,
    settings: EngineSettings,
    flags: Arc<RuntimeFlags>,
    radio: Arc<dyn Radio>,
    airtime: Arc<Mutex<AirtimeAccountant>>,
    cache: DuplicateCache,
    keys: TransportKeyCache,
    collector: Arc<TelemetryCollector>,
    counters: Arc<NodeCounters>,
    cancel: CancellationToken,
    recent: VecDeque<RecentEntry>,
    rx_count: u64,
    forwarded_count: u64,
    dropped_count: u64,
    started: Instant,
}

impl RepeaterEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_hash: u8,
        settings: EngineSettings,
        flags: Arc<RuntimeFlags>,
        radio: Arc<dyn Radio>,
        airtime: Arc<Mutex<AirtimeAccountant>>,
        store: Arc<Store>,
        collector: Arc<TelemetryCollector>,
        counters: Arc<NodeCounters>,
        cancel: CancellationToken,
    ) -> Self {
        let cache = DuplicateCache::new(settings.cache_ttl);
        Self {
            local_hash,
            settings,
            flags,
            radio,
            airtime,
            cache,
            keys: TransportKeyCache::new(store),
            collector,
            counters,
            cancel,
            recent: VecDeque::new(),
            rx_count: 0,
            forwarded_count: 0,
            dropped_count: 0,
            started: Instant::now(),
        }
    }

    pub fn local_hash(&self) -> u8 {
        self.local_hash
    }

    /// Full RX-path handling for one received frame.
    pub fn handle(&mut self, mut packet: Packet) {
        self.rx_count += 1;
        self.counters.incr_rx();

        let hash_hex = packet.hash_hex();
        let rssi = packet.rssi;
        let snr = packet.snr;
        let original_path = packet.path.clone();
        let raw_frame = packet.to_bytes();

        log::debug!(
            "RX packet: header=0x{:02x}, payload_len={}, path_len={}, rssi={}, snr={}",
            packet.header,
            packet.payload.len(),
            packet.path.len(),
            rssi,
            snr
        );

        let mut transmitted = false;
        let mut tx_delay_ms = 0.0;
        let mut drop_reason: Option<&'static str> = None;
        let mut forwarded_path: Option<Vec<u8>> = None;

        if self.flags.monitor_mode() {
            drop_reason = Some("Monitor mode");
        } else if packet.is_do_not_retransmit() {
            drop_reason = Some("Handled locally");
        } else {
            match self.process(&mut packet, snr) {
                Ok(delay_s) => {
                    let frame = packet.to_bytes();
                    let params = self.radio.params();
                    let airtime_ms = estimate_airtime_ms(
                        frame.len(),
                        params.spreading_factor,
                        params.bandwidth_hz,
                    );
                    let (can_tx, wait) = self
                        .airtime
                        .lock()
                        .expect("airtime lock")
                        .can_transmit(airtime_ms);
                    if can_tx {
                        transmitted = true;
                        tx_delay_ms = delay_s * 1000.0;
                        forwarded_path = Some(packet.path.clone());
                        self.forwarded_count += 1;
                        self.schedule_retransmit(frame, delay_s, airtime_ms);
                    } else {
                        drop_reason = Some("Duty cycle limit");
                        log::warn!(
                            "Duty-cycle limit exceeded. Airtime={airtime_ms:.1}ms, wait={wait:.1}s before retry"
                        );
                    }
                }
                Err(reason) => {
                    drop_reason = Some(reason);
                    log::debug!("Packet not forwarded: {reason}");
                }
            }
        }

        if !transmitted {
            self.dropped_count += 1;
        }

        let is_duplicate = self.cache.contains(&hash_hex) && !transmitted;
        if is_duplicate && drop_reason.is_none() {
            drop_reason = Some("Duplicate");
        }

        let record = self.build_record(
            &packet,
            &original_path,
            forwarded_path.as_deref(),
            &raw_frame,
            transmitted,
            is_duplicate,
            tx_delay_ms,
            drop_reason,
            &hash_hex,
            rssi,
            snr,
        );
        self.collector.record_packet(&record);
        self.push_recent(record, is_duplicate);
    }

    /// Route-type branch: returns the transmit delay when the frame should
    /// be forwarded, or the drop reason.
    fn process(&mut self, packet: &mut Packet, snr: f64) -> Result<f64, &'static str> {
        match packet.route_type() {
            ROUTE_TYPE_FLOOD | ROUTE_TYPE_TRANSPORT_FLOOD => {
                self.flood_forward(packet)?;
                Ok(self.tx_delay(packet, snr, true))
            }
            ROUTE_TYPE_DIRECT | ROUTE_TYPE_TRANSPORT_DIRECT => {
                self.direct_forward(packet)?;
                Ok(self.tx_delay(packet, snr, false))
            }
            _ => Err("Unknown route"),
        }
    }

    fn flood_forward(&mut self, packet: &mut Packet) -> Result<(), &'static str> {
        if packet.payload.is_empty() {
            return Err("Empty payload");
        }
        if packet.path.len() >= MAX_PATH_SIZE {
            return Err("Path at max size");
        }
        if !self.flags.global_flood_allow() {
            match self.transport_key_policy(packet) {
                Some(FloodPolicy::Allow) => {}
                _ => return Err("Flood denied by policy"),
            }
        }
        let hash = packet.hash_hex();
        if self.cache.is_duplicate(&hash) {
            log::debug!("Duplicate suppressed: {}", &hash[..16]);
            return Err("Duplicate");
        }
        packet.path.push(self.local_hash);
        self.cache.mark_seen(hash);
        log::debug!("Flood: forwarding with path len {}", packet.path.len());
        Ok(())
    }

    fn direct_forward(&mut self, packet: &mut Packet) -> Result<(), &'static str> {
        let Some(&next_hop) = packet.path.first() else {
            return Err("Direct: no path");
        };
        if next_hop != self.local_hash {
            log::debug!(
                "Direct: not our hop (next={next_hop:02X}, local={:02X})",
                self.local_hash
            );
            return Err("Direct: not for us");
        }
        packet.path.remove(0);
        log::debug!("Direct: forwarding, path len {}", packet.path.len());
        Ok(())
    }

    fn transport_key_policy(&mut self, packet: &Packet) -> Option<FloodPolicy> {
        let codes = packet.transport_codes?;
        self.keys.check(codes[0])
    }

    /// Collision-avoidance transmit delay, capped at 5 seconds.
    fn tx_delay(&self, packet: &Packet, snr: f64, flood: bool) -> f64 {
        let params = self.radio.params();
        let mut delay_s = if flood {
            let airtime_ms = estimate_airtime_ms(
                packet.payload.len(),
                params.spreading_factor,
                params.bandwidth_hz,
            );
            let base_delay_ms = (airtime_ms * 52.0 / 50.0) / 2.0;
            let random_mult = rand::thread_rng().gen_range(0.0..5.0);
            base_delay_ms * random_mult * self.settings.tx_delay_factor / 1000.0
        } else {
            self.settings.direct_tx_delay_factor
        };

        if delay_s >= SCORE_DELAY_FLOOR_SECS && self.settings.use_score_for_tx {
            let score = packet_score(snr, packet.payload.len(), params.spreading_factor);
            let multiplier = (1.0 - score).max(0.2);
            delay_s *= multiplier;
            log::debug!(
                "Congestion detected (delay >= 50ms), score={score:.2}, delay multiplier={multiplier:.2}"
            );
        }
        delay_s.min(MAX_TX_DELAY_SECS)
    }

    fn schedule_retransmit(&self, frame: Vec<u8>, delay_s: f64, airtime_ms: f64) {
        let radio = self.radio.clone();
        let airtime = self.airtime.clone();
        let counters = self.counters.clone();
        let cancel = self.cancel.clone();
        let frame_len = frame.len();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs_f64(delay_s)) => {}
            }
            match radio.send(&frame, false).await {
                Ok(()) => {
                    airtime.lock().expect("airtime lock").record_tx(airtime_ms);
                    counters.incr_tx();
                    log::info!("Retransmitted packet ({frame_len} bytes, {airtime_ms:.1}ms airtime)");
                }
                Err(err) => {
                    counters.incr_errors();
                    log::error!("Retransmit failed: {err}");
                }
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        packet: &Packet,
        original_path: &[u8],
        forwarded_path: Option<&[u8]>,
        raw_frame: &[u8],
        transmitted: bool,
        is_duplicate: bool,
        tx_delay_ms: f64,
        drop_reason: Option<&'static str>,
        hash_hex: &str,
        rssi: i32,
        snr: f64,
    ) -> PacketRecord {
        let payload_type = packet.payload_type();
        let params = self.radio.params();

        let display_path = if original_path.is_empty() {
            &packet.path
        } else {
            original_path
        };
        let path_hash = (!display_path.is_empty()).then(|| format_path_preview(display_path));

        let (src_hash, dst_hash) = match payload_type {
            PAYLOAD_TYPE_REQ | PAYLOAD_TYPE_RESPONSE | PAYLOAD_TYPE_TXT_MSG | PAYLOAD_TYPE_PATH
                if packet.payload.len() >= 2 =>
            {
                (
                    Some(format!("{:02X}", packet.payload[1])),
                    Some(format!("{:02X}", packet.payload[0])),
                )
            }
            PAYLOAD_TYPE_ADVERT if !packet.payload.is_empty() => {
                (Some(format!("{:02X}", packet.payload[0])), None)
            }
            _ => (None, None),
        };

        PacketRecord {
            timestamp: if packet.timestamp > 0.0 {
                packet.timestamp
            } else {
                now_epoch_secs()
            },
            packet_type: payload_type,
            route: packet.route_type(),
            length: packet.payload.len() as u32,
            rssi,
            snr,
            score: packet_score(snr, packet.payload.len(), params.spreading_factor),
            transmitted,
            is_duplicate,
            drop_reason: drop_reason.map(str::to_string),
            src_hash,
            dst_hash,
            path_hash,
            header: Some(format!("0x{:02X}", packet.header)),
            transport_codes: packet
                .transport_codes
                .map(|codes| format!("{:04x}{:04x}", codes[0], codes[1])),
            payload: Some(hex::encode(&packet.payload)),
            payload_length: packet.payload.len() as u32,
            tx_delay_ms,
            packet_hash: hash_hex[..16].to_string(),
            original_path: (!original_path.is_empty()).then(|| format_path(original_path)),
            forwarded_path: forwarded_path.map(format_path),
            raw_packet: Some(hex::encode(raw_frame)),
        }
    }

    /// Duplicates attach to the entry they duplicate; everything else joins
    /// the ring, oldest falling off past 50 entries.
    fn push_recent(&mut self, record: PacketRecord, is_duplicate: bool) {
        if is_duplicate {
            for entry in self.recent.iter_mut().rev() {
                if entry.record.packet_hash == record.packet_hash {
                    entry.duplicates.push(record);
                    return;
                }
            }
        }
        self.recent.push_back(RecentEntry {
            record,
            duplicates: Vec::new(),
        });
        while self.recent.len() > MAX_RECENT_PACKETS {
            self.recent.pop_front();
        }
    }

    /// Trace helper entry: record shown on the dashboard without flowing
    /// through the forwarding decision.
    pub fn log_trace_record(&mut self, record: PacketRecord) {
        self.push_recent(record, false);
    }

    /// Flip a recent trace record to transmitted after the helper reflected
    /// the frame.
    pub fn mark_trace_forwarded(&mut self, packet_hash: &str) {
        for entry in self.recent.iter_mut().rev() {
            if entry.record.packet_hash == packet_hash {
                entry.record.transmitted = true;
                entry.record.drop_reason = Some("trace_forwarded".to_string());
                return;
            }
        }
    }

    pub fn is_duplicate(&self, hash: &str) -> bool {
        self.cache.is_duplicate(hash)
    }

    pub fn mark_seen(&mut self, hash: String) {
        self.cache.mark_seen(hash);
    }

    pub fn cleanup_cache(&mut self) {
        self.cache.cleanup();
    }

    pub fn stats(&self) -> EngineStats {
        let now = now_epoch_secs();
        let recent: Vec<RecentEntry> = self.recent.iter().cloned().collect();
        let last_hour: Vec<&RecentEntry> = recent
            .iter()
            .filter(|entry| now - entry.record.timestamp < 3600.0)
            .collect();
        let airtime = self.airtime.lock().expect("airtime lock").stats();
        EngineStats {
            local_hash: format!("0x{:02x}", self.local_hash),
            duplicate_cache_size: self.cache.len(),
            cache_ttl: self.settings.cache_ttl.as_secs(),
            rx_count: self.rx_count,
            forwarded_count: self.forwarded_count,
            dropped_count: self.dropped_count,
            rx_per_hour: last_hour.len() as u64,
            forwarded_per_hour: last_hour
                .iter()
                .filter(|entry| entry.record.transmitted)
                .count() as u64,
            recent_packets: recent,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            airtime,
        }
    }
}

fn format_path(path: &[u8]) -> Vec<String> {
    path.iter().map(|byte| format!("{byte:02X}")).collect()
}

/// First eight path bytes as `[AA, BB, …]`, elided past eight.
fn format_path_preview(path: &[u8]) -> String {
    let mut parts: Vec<String> = path.iter().take(8).map(|byte| format!("{byte:02X}")).collect();
    if path.len() > 8 {
        parts.push("...".to_string());
    }
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRadio;
    use meshrelay_proto::packet::make_header;
    use meshrelay_proto::PAYLOAD_TYPE_GRP_TXT;

    struct Harness {
        engine: RepeaterEngine,
        radio: Arc<MockRadio>,
        store: Arc<Store>,
        flags: Arc<RuntimeFlags>,
        airtime: Arc<Mutex<AirtimeAccountant>>,
    }

    fn harness() -> Harness {
        harness_with(EngineSettings::default(), 1000.0)
    }

    fn harness_with(settings: EngineSettings, max_airtime_ms: f64) -> Harness {
        let flags = Arc::new(RuntimeFlags::default());
        let radio = Arc::new(MockRadio::default());
        let store = Arc::new(Store::in_memory().expect("store"));
        let collector = Arc::new(TelemetryCollector::new(
            store.clone(),
            meshrelay_storage::rrd::TimeSeriesStore::new(),
            std::env::temp_dir().join("meshrelay-engine-test.rrd"),
            None,
            None,
        ));
        let airtime = Arc::new(Mutex::new(AirtimeAccountant::new(
            max_airtime_ms,
            flags.clone(),
        )));
        let engine = RepeaterEngine::new(
            0x42,
            settings,
            flags.clone(),
            radio.clone(),
            airtime.clone(),
            store.clone(),
            collector,
            Arc::new(NodeCounters::default()),
            CancellationToken::new(),
        );
        Harness {
            engine,
            radio,
            store,
            flags,
            airtime,
        }
    }

    fn flood_packet(payload: &[u8], path: &[u8]) -> Packet {
        let header = make_header(ROUTE_TYPE_FLOOD, PAYLOAD_TYPE_GRP_TXT, 0);
        let mut packet = Packet::new(header, path.to_vec(), payload.to_vec());
        packet.rssi = -95;
        packet.snr = 7.0;
        packet
    }

    fn direct_packet(payload: &[u8], path: &[u8]) -> Packet {
        let header = make_header(ROUTE_TYPE_DIRECT, PAYLOAD_TYPE_GRP_TXT, 0);
        Packet::new(header, path.to_vec(), payload.to_vec())
    }

    async fn drain(radio: &MockRadio) -> Vec<Vec<u8>> {
        // scheduled retransmits run as spawned tasks; give them a turn
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let sent = radio.sent();
            if !sent.is_empty() {
                return sent;
            }
        }
        radio.sent()
    }

    #[tokio::test]
    async fn flood_forward_appends_local_hash_and_marks_seen() {
        let mut h = harness();
        let packet = flood_packet(&[0x11, 0x22, 0x33], &[0x10, 0x20]);
        let hash = packet.hash_hex();
        h.engine.handle(packet);

        assert!(h.engine.is_duplicate(&hash));
        let sent = drain(&h.radio).await;
        assert_eq!(sent.len(), 1);
        let forwarded = Packet::from_bytes(&sent[0]).expect("frame");
        assert_eq!(forwarded.path, vec![0x10, 0x20, 0x42]);
        assert_eq!(forwarded.payload, vec![0x11, 0x22, 0x33]);

        let stats = h.engine.stats();
        assert_eq!(stats.forwarded_count, 1);
        let entry = &stats.recent_packets[0];
        assert!(entry.record.transmitted);
        assert!(entry.record.tx_delay_ms <= 5000.0);
        assert_eq!(
            entry.record.forwarded_path,
            Some(vec!["10".into(), "20".into(), "42".into()])
        );
    }

    #[tokio::test]
    async fn duplicate_is_suppressed_and_attached_to_original() {
        let mut h = harness();
        let packet = flood_packet(&[1, 2, 3], &[0x10]);
        h.engine.handle(packet.clone());
        h.engine.handle(packet);

        let stats = h.engine.stats();
        assert_eq!(stats.recent_packets.len(), 1);
        let entry = &stats.recent_packets[0];
        assert_eq!(entry.duplicates.len(), 1);
        let duplicate = &entry.duplicates[0];
        assert!(!duplicate.transmitted);
        assert!(duplicate.is_duplicate);
        assert_eq!(duplicate.drop_reason.as_deref(), Some("Duplicate"));

        // only the first copy reaches the radio
        let sent = drain(&h.radio).await;
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn direct_not_for_us_is_dropped() {
        let mut h = harness();
        h.engine.handle(direct_packet(&[1], &[0x99, 0x55]));

        let stats = h.engine.stats();
        assert_eq!(stats.forwarded_count, 0);
        assert_eq!(
            stats.recent_packets[0].record.drop_reason.as_deref(),
            Some("Direct: not for us")
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.radio.sent().is_empty());
    }

    #[tokio::test]
    async fn direct_for_us_pops_first_hop() {
        let mut h = harness();
        h.engine.handle(direct_packet(&[1], &[0x42, 0x55, 0x66]));

        let sent = drain(&h.radio).await;
        assert_eq!(sent.len(), 1);
        let forwarded = Packet::from_bytes(&sent[0]).expect("frame");
        assert_eq!(forwarded.path, vec![0x55, 0x66]);
    }

    #[tokio::test]
    async fn direct_with_empty_path_is_dropped() {
        let mut h = harness();
        h.engine.handle(direct_packet(&[1], &[]));
        assert_eq!(
            h.engine.stats().recent_packets[0].record.drop_reason.as_deref(),
            Some("Direct: no path")
        );
    }

    #[tokio::test]
    async fn empty_payload_flood_is_dropped() {
        let mut h = harness();
        h.engine.handle(flood_packet(&[], &[0x10]));
        assert_eq!(
            h.engine.stats().recent_packets[0].record.drop_reason.as_deref(),
            Some("Empty payload")
        );
    }

    #[tokio::test]
    async fn full_path_flood_is_dropped() {
        let mut h = harness();
        let path = vec![0u8; MAX_PATH_SIZE];
        h.engine.handle(flood_packet(&[1], &path));
        let stats = h.engine.stats();
        assert_eq!(
            stats.recent_packets[0].record.drop_reason.as_deref(),
            Some("Path at max size")
        );
    }

    #[tokio::test]
    async fn monitor_mode_never_forwards() {
        let mut h = harness();
        h.flags.set_monitor_mode(true);
        h.engine.handle(flood_packet(&[1, 2], &[0x10]));

        let stats = h.engine.stats();
        assert_eq!(stats.forwarded_count, 0);
        assert_eq!(
            stats.recent_packets[0].record.drop_reason.as_deref(),
            Some("Monitor mode")
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.radio.sent().is_empty());
    }

    #[tokio::test]
    async fn do_not_retransmit_flag_is_honoured() {
        let mut h = harness();
        let mut packet = flood_packet(&[1, 2], &[0x10]);
        packet.mark_do_not_retransmit();
        h.engine.handle(packet);

        assert_eq!(h.engine.stats().forwarded_count, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.radio.sent().is_empty());
    }

    #[tokio::test]
    async fn duty_cycle_denial_drops_with_reason() {
        let mut h = harness_with(EngineSettings::default(), 1000.0);
        {
            let mut airtime = h.airtime.lock().expect("airtime lock");
            airtime.record_tx(350.0);
            airtime.record_tx(300.0);
            airtime.record_tx(300.0);
        }
        h.engine.handle(flood_packet(&[0u8; 64], &[0x10]));

        let stats = h.engine.stats();
        assert_eq!(stats.forwarded_count, 0);
        assert_eq!(
            stats.recent_packets[0].record.drop_reason.as_deref(),
            Some("Duty cycle limit")
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.radio.sent().is_empty());
    }

    #[tokio::test]
    async fn global_flood_deny_without_key_drops() {
        let mut h = harness();
        h.flags.set_global_flood_allow(false);
        h.engine.handle(flood_packet(&[1, 2], &[0x10]));
        assert_eq!(
            h.engine.stats().recent_packets[0].record.drop_reason.as_deref(),
            Some("Flood denied by policy")
        );
    }

    #[tokio::test]
    async fn transport_key_allow_overrides_global_deny() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;

        let mut h = harness();
        h.flags.set_global_flood_allow(false);

        let material = b"club-key";
        h.store
            .create_transport_key(
                "club",
                FloodPolicy::Allow,
                &BASE64.encode(material),
                None,
                None,
            )
            .expect("create key");
        let code = crate::keys::expected_code(material);

        let header = make_header(ROUTE_TYPE_TRANSPORT_FLOOD, PAYLOAD_TYPE_GRP_TXT, 0);
        let mut packet = Packet::new(header, vec![0x10], vec![1, 2, 3]);
        packet.transport_codes = Some([code, 0]);
        h.engine.handle(packet);

        let sent = drain(&h.radio).await;
        assert_eq!(sent.len(), 1, "allow-policy key should admit the flood");
    }

    #[tokio::test]
    async fn transport_key_deny_policy_still_drops() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;

        let mut h = harness();
        h.flags.set_global_flood_allow(false);

        let material = b"blocked";
        h.store
            .create_transport_key(
                "blocked",
                FloodPolicy::Deny,
                &BASE64.encode(material),
                None,
                None,
            )
            .expect("create key");
        let code = crate::keys::expected_code(material);

        let header = make_header(ROUTE_TYPE_TRANSPORT_FLOOD, PAYLOAD_TYPE_GRP_TXT, 0);
        let mut packet = Packet::new(header, vec![0x10], vec![1, 2, 3]);
        packet.transport_codes = Some([code, 0]);
        h.engine.handle(packet);

        assert_eq!(
            h.engine.stats().recent_packets[0].record.drop_reason.as_deref(),
            Some("Flood denied by policy")
        );
    }

    #[tokio::test]
    async fn records_land_in_the_store() {
        let mut h = harness();
        h.engine.handle(flood_packet(&[9, 9], &[0x10]));
        let rows = h.store.recent_packets(10).expect("rows");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].transmitted);
        assert_eq!(rows[0].route, ROUTE_TYPE_FLOOD);
    }

    #[tokio::test]
    async fn recent_ring_is_bounded() {
        let mut h = harness();
        for i in 0..60u8 {
            h.engine.handle(flood_packet(&[i, i], &[0x10]));
        }
        assert_eq!(h.engine.stats().recent_packets.len(), MAX_RECENT_PACKETS);
    }

    #[test]
    fn path_preview_elides_past_eight() {
        assert_eq!(format_path_preview(&[0x10, 0x20]), "[10, 20]");
        let long: Vec<u8> = (0..10).collect();
        assert!(format_path_preview(&long).ends_with("...]"));
    }
}
