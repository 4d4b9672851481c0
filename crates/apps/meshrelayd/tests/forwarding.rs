//! End-to-end RX path: router → helpers → engine → radio.

mod common;

use common::{test_context, wait_for_sends, TEST_SEED};

use meshrelay_proto::advert::{build_advert, ADVERT_FLAG_IS_REPEATER};
use meshrelay_proto::discovery::{encode_discovery_request, DiscoveryRequest};
use meshrelay_proto::packet::make_header;
use meshrelay_proto::trace::{encode_trace, TracePayload};
use meshrelay_proto::{
    Identity, Packet, PAYLOAD_TYPE_CONTROL, PAYLOAD_TYPE_GRP_TXT, PAYLOAD_TYPE_TRACE,
    ROUTE_TYPE_DIRECT, ROUTE_TYPE_FLOOD,
};

#[tokio::test]
async fn flood_frame_is_repeated_with_our_hash() {
    let (ctx, radio) = test_context();
    let header = make_header(ROUTE_TYPE_FLOOD, PAYLOAD_TYPE_GRP_TXT, 0);
    let mut packet = Packet::new(header, vec![0x10, 0x20], vec![0x11, 0x22, 0x33]);
    packet.rssi = -97;
    packet.snr = 5.5;
    ctx.router.enqueue(packet);

    let sent = wait_for_sends(&radio, 1).await;
    assert_eq!(sent.len(), 1);
    let forwarded = Packet::from_bytes(&sent[0]).expect("frame");
    assert_eq!(forwarded.path, vec![0x10, 0x20, ctx.local_hash]);
    assert_eq!(forwarded.payload, vec![0x11, 0x22, 0x33]);

    // the decision landed in the store too
    let rows = ctx.store.recent_packets(10).expect("rows");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].transmitted);
}

#[tokio::test]
async fn second_copy_is_suppressed() {
    let (ctx, radio) = test_context();
    let header = make_header(ROUTE_TYPE_FLOOD, PAYLOAD_TYPE_GRP_TXT, 0);
    let packet = Packet::new(header, vec![0x10], vec![1, 2, 3]);
    ctx.router.enqueue(packet.clone());
    ctx.router.enqueue(packet);

    let sent = wait_for_sends(&radio, 1).await;
    assert_eq!(sent.len(), 1, "duplicate must not be scheduled");

    let rows = ctx.store.recent_packets(10).expect("rows");
    assert_eq!(rows.len(), 2);
    let duplicate = rows
        .iter()
        .find(|row| !row.transmitted)
        .expect("duplicate row");
    assert!(duplicate.is_duplicate);
    assert_eq!(duplicate.drop_reason.as_deref(), Some("Duplicate"));
}

#[tokio::test]
async fn discovery_request_gets_a_signed_reply_and_no_repeat() {
    let (ctx, radio) = test_context();
    let header = make_header(ROUTE_TYPE_FLOOD, PAYLOAD_TYPE_CONTROL, 0);
    let payload = encode_discovery_request(&DiscoveryRequest {
        tag: 0xA1B2C3D4,
        filter: 0x04,
        prefix_only: false,
    });
    let mut packet = Packet::new(header, vec![], payload);
    packet.snr = 3.0;
    ctx.router.enqueue(packet);

    let sent = wait_for_sends(&radio, 1).await;
    assert_eq!(sent.len(), 1, "reply only; the request itself is not repeated");
    let reply = Packet::from_bytes(&sent[0]).expect("frame");
    assert_eq!(reply.payload_type(), PAYLOAD_TYPE_CONTROL);
    assert_eq!(reply.payload[0], meshrelay_proto::discovery::CONTROL_DISCOVER_RESP);

    let rows = ctx.store.recent_packets(10).expect("rows");
    assert_eq!(rows[0].drop_reason.as_deref(), Some("Handled locally"));
}

#[tokio::test]
async fn discovery_filter_mismatch_is_ignored() {
    let (ctx, radio) = test_context();
    let header = make_header(ROUTE_TYPE_FLOOD, PAYLOAD_TYPE_CONTROL, 0);
    let payload = encode_discovery_request(&DiscoveryRequest {
        tag: 1,
        filter: 0x02, // chat nodes only
        prefix_only: false,
    });
    ctx.router.enqueue(Packet::new(header, vec![], payload));

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(radio.sent().is_empty());
}

#[tokio::test]
async fn trace_for_us_is_reflected_with_snr_byte() {
    let (ctx, radio) = test_context();
    let trace = TracePayload {
        tag: 0x0000BEEF,
        auth_code: 7,
        flags: 0,
        trace_route: vec![ctx.local_hash, 0x55],
    };
    let header = make_header(ROUTE_TYPE_DIRECT, PAYLOAD_TYPE_TRACE, 0);
    let mut packet = Packet::new(header, vec![], encode_trace(&trace));
    packet.snr = 9.0;
    ctx.router.enqueue(packet);

    let sent = wait_for_sends(&radio, 1).await;
    assert!(!sent.is_empty(), "trace should be reflected");
    let reflected = Packet::from_bytes(&sent[0]).expect("frame");
    assert_eq!(reflected.path, vec![36], "9.0 dB stored as quarter-dB byte");
    assert_eq!(reflected.payload, encode_trace(&trace));
}

#[tokio::test]
async fn trace_for_someone_else_is_not_reflected() {
    let (ctx, radio) = test_context();
    let other_hop = ctx.local_hash.wrapping_add(1);
    let trace = TracePayload {
        tag: 2,
        auth_code: 0,
        flags: 0,
        trace_route: vec![other_hop],
    };
    let header = make_header(ROUTE_TYPE_DIRECT, PAYLOAD_TYPE_TRACE, 0);
    ctx.router.enqueue(Packet::new(header, vec![], encode_trace(&trace)));

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(radio.sent().is_empty());
}

#[tokio::test]
async fn advert_creates_a_neighbor_row_once() {
    let (ctx, radio) = test_context();
    let neighbor = Identity::from_seed(&[42u8; 32]).expect("identity");
    let advert = build_advert(&neighbor, "ridge-2", 47.1, 15.4, 1_700_000_000, ADVERT_FLAG_IS_REPEATER);

    let mut first = advert.clone();
    first.rssi = -88;
    first.snr = 6.0;
    ctx.router.enqueue(first);
    wait_for_sends(&radio, 1).await;

    let neighbors = ctx.store.neighbors().expect("neighbors");
    assert_eq!(neighbors.len(), 1);
    let row = &neighbors[0];
    assert_eq!(row.pubkey, hex::encode(neighbor.public_key()));
    assert_eq!(row.node_name.as_deref(), Some("ridge-2"));
    assert!(row.is_repeater);
    assert_eq!(row.advert_count, 1);
    assert!(row.is_new_neighbor);
}

#[tokio::test]
async fn own_advert_is_not_tracked_as_neighbor() {
    let (ctx, radio) = test_context();
    let own = Identity::from_seed(&TEST_SEED).expect("identity");
    let advert = build_advert(&own, "self", 0.0, 0.0, 1_700_000_000, ADVERT_FLAG_IS_REPEATER);
    ctx.router.enqueue(advert);
    wait_for_sends(&radio, 1).await;

    assert!(ctx.store.neighbors().expect("neighbors").is_empty());
}
