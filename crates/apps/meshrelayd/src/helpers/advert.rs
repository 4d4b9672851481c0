//! Advert handling: neighbor tracking.

use meshrelay_proto::advert::parse_advert;
use meshrelay_proto::{now_epoch_secs, Packet};
use meshrelay_storage::AdvertObservation;

use crate::context::DaemonContext;

/// Parse an advert and upsert the neighbor row. Parse rejects are logged
/// and never stop the engine from making its own forwarding decision.
pub fn process_advert(ctx: &DaemonContext, packet: &Packet) {
    let parsed = match parse_advert(&packet.payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("Invalid advert packet: {err}");
            return;
        }
    };

    if parsed.pubkey == ctx.identity.public_key() {
        log::debug!("Ignoring own advert in neighbor tracking");
        return;
    }

    let pubkey_hex = hex::encode(parsed.pubkey);
    let node_name = parsed.node_name.clone();
    let observation = AdvertObservation {
        timestamp: now_epoch_secs(),
        pubkey: pubkey_hex.clone(),
        node_name: node_name.clone(),
        is_repeater: parsed.is_repeater(),
        route_type: packet.route_type(),
        contact_type: parsed.contact_type().to_string(),
        latitude: parsed.latitude,
        longitude: parsed.longitude,
        rssi: packet.rssi,
        snr: packet.snr,
    };

    if ctx.collector.record_advert(&observation) {
        log::info!(
            "Discovered new neighbor: {} ({}...)",
            node_name.as_deref().unwrap_or("Unknown"),
            &pubkey_hex[..16]
        );
    }
}
