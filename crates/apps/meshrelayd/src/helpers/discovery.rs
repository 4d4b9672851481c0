//! Discovery handling: signed reply when the request filter covers
//! repeater nodes.

use meshrelay_proto::discovery::{build_discovery_response, parse_discovery_request};
use meshrelay_proto::{Packet, NODE_TYPE_REPEATER};

use crate::context::DaemonContext;

pub async fn process_discovery(ctx: &DaemonContext, packet: &Packet) {
    let allow_discovery = ctx
        .config
        .lock()
        .expect("config lock")
        .repeater
        .allow_discovery;
    if !allow_discovery {
        return;
    }

    let request = match parse_discovery_request(&packet.payload) {
        Ok(request) => request,
        Err(err) => {
            log::warn!("Invalid discovery packet: {err}");
            return;
        }
    };

    log::info!(
        "Discovery request: tag=0x{:08X}, filter=0x{:02X}, SNR={:+.1}dB, RSSI={}dBm",
        request.tag,
        request.filter,
        packet.snr,
        packet.rssi
    );

    let filter_mask = 1u8 << NODE_TYPE_REPEATER;
    if request.filter & filter_mask == 0 {
        log::debug!("Discovery filter doesn't match, ignoring");
        return;
    }

    let response = build_discovery_response(
        &ctx.identity,
        request.tag,
        NODE_TYPE_REPEATER,
        packet.snr,
        request.prefix_only,
    );
    match ctx.radio.send(&response.to_bytes(), false).await {
        Ok(()) => {
            ctx.counters.incr_tx();
            log::info!("Discovery response sent for tag 0x{:08X}", request.tag);
        }
        Err(err) => {
            ctx.counters.incr_errors();
            log::warn!("Failed to send discovery response for tag 0x{:08X}: {err}", request.tag);
        }
    }
}
