//! MeshCore-compatible wire model.
//!
//! Everything a repeater needs to understand about frames on the air:
//! header bit layout, path handling, the stable packet fingerprint, and
//! codecs for the payloads the node inspects (advert, trace, discovery).

pub mod advert;
pub mod discovery;
pub mod identity;
pub mod packet;
pub mod trace;

pub use identity::Identity;
pub use packet::Packet;

/// Maximum number of path bytes a frame may carry.
pub const MAX_PATH_SIZE: usize = 64;

/// Route type bits (header bits 0-1).
pub const ROUTE_TYPE_TRANSPORT_FLOOD: u8 = 0;
pub const ROUTE_TYPE_FLOOD: u8 = 1;
pub const ROUTE_TYPE_DIRECT: u8 = 2;
pub const ROUTE_TYPE_TRANSPORT_DIRECT: u8 = 3;

pub const PH_ROUTE_MASK: u8 = 0x03;
pub const PH_TYPE_SHIFT: u8 = 2;
pub const PH_TYPE_MASK: u8 = 0x0F;
pub const PH_VER_SHIFT: u8 = 6;

/// Payload type values (header bits 2-5).
pub const PAYLOAD_TYPE_REQ: u8 = 0x00;
pub const PAYLOAD_TYPE_RESPONSE: u8 = 0x01;
pub const PAYLOAD_TYPE_TXT_MSG: u8 = 0x02;
pub const PAYLOAD_TYPE_ACK: u8 = 0x03;
pub const PAYLOAD_TYPE_ADVERT: u8 = 0x04;
pub const PAYLOAD_TYPE_GRP_TXT: u8 = 0x05;
pub const PAYLOAD_TYPE_GRP_DATA: u8 = 0x06;
pub const PAYLOAD_TYPE_ANON_REQ: u8 = 0x07;
pub const PAYLOAD_TYPE_PATH: u8 = 0x08;
pub const PAYLOAD_TYPE_TRACE: u8 = 0x09;
pub const PAYLOAD_TYPE_MULTIPART: u8 = 0x0A;
pub const PAYLOAD_TYPE_CONTROL: u8 = 0x0B;
pub const PAYLOAD_TYPE_RAW_CUSTOM: u8 = 0x0F;

/// Node type identifiers used by discovery filters.
pub const NODE_TYPE_CHAT: u8 = 1;
pub const NODE_TYPE_REPEATER: u8 = 2;
pub const NODE_TYPE_ROOM_SERVER: u8 = 3;

/// Errors from wire codec operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("path length {0} exceeds maximum {MAX_PATH_SIZE}")]
    PathTooLong(usize),

    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),

    #[error("invalid signature")]
    BadSignature,

    #[error("invalid key material")]
    BadKey,
}

/// Human-readable payload type name, as shown by the dashboard.
pub fn payload_type_name(payload_type: u8) -> &'static str {
    match payload_type {
        0 => "Request (REQ)",
        1 => "Response (RESPONSE)",
        2 => "Plain Text Message (TXT_MSG)",
        3 => "Acknowledgment (ACK)",
        4 => "Node Advertisement (ADVERT)",
        5 => "Group Text Message (GRP_TXT)",
        6 => "Group Datagram (GRP_DATA)",
        7 => "Anonymous Request (ANON_REQ)",
        8 => "Returned Path (PATH)",
        9 => "Trace (TRACE)",
        10 => "Multi-part Packet",
        11 => "Reserved Type 11",
        12 => "Reserved Type 12",
        13 => "Reserved Type 13",
        14 => "Reserved Type 14",
        15 => "Custom Packet (RAW_CUSTOM)",
        _ => "Other Types (>15)",
    }
}

/// Human-readable route type name.
pub fn route_type_name(route_type: u8) -> &'static str {
    match route_type {
        ROUTE_TYPE_TRANSPORT_FLOOD => "Transport Flood",
        ROUTE_TYPE_FLOOD => "Flood",
        ROUTE_TYPE_DIRECT => "Direct",
        ROUTE_TYPE_TRANSPORT_DIRECT => "Transport Direct",
        _ => "Other Routes (>3)",
    }
}

/// Current wall clock as fractional epoch seconds.
pub fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
