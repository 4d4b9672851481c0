//! Trace handling: record the SNR trail and reflect the frame when this
//! node is the next hop in the trace route.

use meshrelay_proto::trace::{parse_trace, path_byte_to_snr, snr_to_path_byte};
use meshrelay_proto::{now_epoch_secs, Packet, MAX_PATH_SIZE, ROUTE_TYPE_DIRECT};
use meshrelay_storage::records::PacketRecord;

use crate::context::DaemonContext;

pub async fn process_trace(ctx: &DaemonContext, packet: &Packet) {
    if packet.route_type() != ROUTE_TYPE_DIRECT || packet.path.len() >= MAX_PATH_SIZE {
        return;
    }

    let parsed = match parse_trace(&packet.payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("Invalid trace packet: {err}");
            return;
        }
    };

    let hash_hex = packet.hash_hex();
    let hash16 = hash_hex[..16].to_string();

    // Path bytes accumulated so far are per-hop SNR readings.
    let snr_trail: Vec<String> = packet
        .path
        .iter()
        .map(|byte| format!("{byte}({:.1}dB)", path_byte_to_snr(*byte)))
        .collect();
    let hop_hashes: Vec<String> = parsed
        .trace_route
        .iter()
        .map(|hash| format!("0x{hash:02x}"))
        .collect();
    log::info!(
        "Trace tag=0x{:08X} flags=0x{:02X} SNRs: [{}], Hashes: [{}]",
        parsed.tag,
        parsed.flags,
        snr_trail.join(", "),
        hop_hashes.join(", ")
    );

    {
        let mut engine = ctx.engine.lock().expect("engine lock");
        engine.log_trace_record(trace_record(ctx, packet, &parsed.trace_route, &hash16));
    }

    let hop_index = packet.path.len();
    let should_forward = {
        let engine = ctx.engine.lock().expect("engine lock");
        parsed.trace_route.get(hop_index) == Some(&ctx.local_hash) && !engine.is_duplicate(&hash_hex)
    };
    if !should_forward {
        log_no_forward(ctx, &parsed.trace_route, hop_index);
        return;
    }

    // Append our SNR reading and reflect the mutated frame immediately.
    let mut forwarded = packet.clone();
    forwarded.path.push(snr_to_path_byte(packet.snr));
    {
        let mut engine = ctx.engine.lock().expect("engine lock");
        engine.mark_seen(hash_hex);
        engine.mark_trace_forwarded(&hash16);
    }
    log::info!(
        "Forwarding trace, stored SNR {:.1}dB at position {hop_index}",
        packet.snr
    );
    match ctx.radio.send(&forwarded.to_bytes(), false).await {
        Ok(()) => ctx.counters.incr_tx(),
        Err(err) => {
            ctx.counters.incr_errors();
            log::error!("Trace forward failed: {err}");
        }
    }
}

fn trace_record(
    ctx: &DaemonContext,
    packet: &Packet,
    trace_route: &[u8],
    hash16: &str,
) -> PacketRecord {
    let params = ctx.radio.params();
    let mut preview: Vec<String> = trace_route
        .iter()
        .take(8)
        .map(|hash| format!("{hash:02X}"))
        .collect();
    if trace_route.len() > 8 {
        preview.push("...".to_string());
    }
    PacketRecord {
        timestamp: now_epoch_secs(),
        packet_type: packet.payload_type(),
        route: packet.route_type(),
        length: packet.payload.len() as u32,
        rssi: packet.rssi,
        snr: packet.snr,
        score: meshrelay_engine::score::packet_score(
            packet.snr,
            packet.payload.len(),
            params.spreading_factor,
        ),
        transmitted: false,
        is_duplicate: false,
        drop_reason: Some("trace_received".to_string()),
        src_hash: None,
        dst_hash: None,
        path_hash: Some(format!("[{}]", preview.join(", "))),
        header: Some(format!("0x{:02X}", packet.header)),
        transport_codes: None,
        payload: Some(hex::encode(&packet.payload)),
        payload_length: packet.payload.len() as u32,
        tx_delay_ms: 0.0,
        packet_hash: hash16.to_string(),
        original_path: Some(trace_route.iter().map(|hash| format!("{hash:02X}")).collect()),
        forwarded_path: None,
        raw_packet: Some(hex::encode(packet.to_bytes())),
    }
}

fn log_no_forward(ctx: &DaemonContext, trace_route: &[u8], hop_index: usize) {
    match trace_route.get(hop_index) {
        None => log::info!("Trace completed (reached end of path)"),
        Some(next_hop) if *next_hop != ctx.local_hash => {
            log::info!("Not our turn (next hop: 0x{next_hop:02x})");
        }
        Some(_) => log::info!("Duplicate trace, ignoring"),
    }
}
