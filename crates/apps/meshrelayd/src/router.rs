//! Packet router: single worker draining the RX queue in arrival order.
//!
//! Each frame first visits the payload-type helper for its side-effects
//! (neighbor upsert, trace reflection, discovery reply), then goes to the
//! engine for the forwarding decision and statistics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use meshrelay_proto::{Packet, PAYLOAD_TYPE_ADVERT, PAYLOAD_TYPE_CONTROL, PAYLOAD_TYPE_TRACE};

use crate::context::DaemonContext;
use crate::helpers;

pub fn spawn_router(ctx: Arc<DaemonContext>, mut rx: mpsc::UnboundedReceiver<Packet>) {
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        log::info!("Packet router started");
        loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Some(packet) => packet,
                    None => break,
                },
            };
            let depth = ctx.router.stats.queue_len.fetch_sub(1, Ordering::Relaxed) - 1;
            ctx.counters.set_queue_len(depth.max(0) as u64);

            route_packet(&ctx, packet).await;
            ctx.router.stats.processed.fetch_add(1, Ordering::Relaxed);
        }
        log::info!("Packet router stopped");
    });
}

async fn route_packet(ctx: &DaemonContext, mut packet: Packet) {
    match packet.payload_type() {
        PAYLOAD_TYPE_TRACE => helpers::trace::process_trace(ctx, &packet).await,
        PAYLOAD_TYPE_CONTROL => {
            helpers::discovery::process_discovery(ctx, &packet).await;
            packet.mark_do_not_retransmit();
        }
        PAYLOAD_TYPE_ADVERT => {
            helpers::advert::process_advert(ctx, &packet);
        }
        _ => {}
    }

    ctx.engine.lock().expect("engine lock").handle(packet);
}
