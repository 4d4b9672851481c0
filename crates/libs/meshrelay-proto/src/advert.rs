//! Advert payload codec.
//!
//! Layout: `pubkey(32) | timestamp(u32 LE) | signature(64) | appdata`, where
//! appdata is `flags | [lat(i32) lon(i32)] | [feature1(u16)] | [feature2(u16)]
//! | name…` with each optional section gated by a flag bit. The signature
//! covers `pubkey | timestamp | appdata`. Coordinates are microdegrees.

use crate::identity::{verify_signature, Identity};
use crate::packet::{make_header, Packet};
use crate::{ProtoError, PAYLOAD_TYPE_ADVERT, ROUTE_TYPE_FLOOD};

pub const ADVERT_FLAG_IS_CHAT_NODE: u8 = 0x01;
pub const ADVERT_FLAG_IS_REPEATER: u8 = 0x02;
pub const ADVERT_FLAG_IS_ROOM_SERVER: u8 = 0x04;
pub const ADVERT_FLAG_HAS_LOCATION: u8 = 0x10;
pub const ADVERT_FLAG_HAS_FEATURE1: u8 = 0x20;
pub const ADVERT_FLAG_HAS_FEATURE2: u8 = 0x40;
pub const ADVERT_FLAG_HAS_NAME: u8 = 0x80;

const PUBKEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;
const MIN_ADVERT_LEN: usize = PUBKEY_LEN + 4 + SIGNATURE_LEN + 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAdvert {
    pub pubkey: [u8; 32],
    pub timestamp: u32,
    pub flags: u8,
    pub node_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub feature1: u16,
    pub feature2: u16,
}

impl ParsedAdvert {
    pub fn is_repeater(&self) -> bool {
        self.flags & ADVERT_FLAG_IS_REPEATER != 0
    }

    pub fn contact_type(&self) -> &'static str {
        if self.flags & ADVERT_FLAG_IS_REPEATER != 0 {
            "REPEATER"
        } else if self.flags & ADVERT_FLAG_IS_ROOM_SERVER != 0 {
            "ROOM_SERVER"
        } else if self.flags & ADVERT_FLAG_IS_CHAT_NODE != 0 {
            "CHAT"
        } else {
            "UNKNOWN"
        }
    }
}

/// Parse and verify an advert payload. Forged or malformed payloads are
/// rejected; the caller decides whether the frame is still forwarded.
pub fn parse_advert(payload: &[u8]) -> Result<ParsedAdvert, ProtoError> {
    if payload.len() < MIN_ADVERT_LEN {
        return Err(ProtoError::MalformedPayload("advert"));
    }

    let pubkey: [u8; 32] = payload[..PUBKEY_LEN]
        .try_into()
        .map_err(|_| ProtoError::MalformedPayload("advert"))?;
    let timestamp = u32::from_le_bytes([payload[32], payload[33], payload[34], payload[35]]);
    let signature: [u8; 64] = payload[36..36 + SIGNATURE_LEN]
        .try_into()
        .map_err(|_| ProtoError::MalformedPayload("advert"))?;
    let appdata = &payload[36 + SIGNATURE_LEN..];

    let mut signed = Vec::with_capacity(PUBKEY_LEN + 4 + appdata.len());
    signed.extend_from_slice(&pubkey);
    signed.extend_from_slice(&payload[32..36]);
    signed.extend_from_slice(appdata);
    verify_signature(&pubkey, &signed, &signature)?;

    let flags = appdata[0];
    let mut offset = 1;

    let (latitude, longitude) = if flags & ADVERT_FLAG_HAS_LOCATION != 0 {
        if appdata.len() < offset + 8 {
            return Err(ProtoError::MalformedPayload("advert"));
        }
        let lat = i32::from_le_bytes(
            appdata[offset..offset + 4]
                .try_into()
                .map_err(|_| ProtoError::MalformedPayload("advert"))?,
        );
        let lon = i32::from_le_bytes(
            appdata[offset + 4..offset + 8]
                .try_into()
                .map_err(|_| ProtoError::MalformedPayload("advert"))?,
        );
        offset += 8;
        (Some(lat as f64 / 1e6), Some(lon as f64 / 1e6))
    } else {
        (None, None)
    };

    let mut feature1 = 0u16;
    if flags & ADVERT_FLAG_HAS_FEATURE1 != 0 {
        if appdata.len() < offset + 2 {
            return Err(ProtoError::MalformedPayload("advert"));
        }
        feature1 = u16::from_le_bytes([appdata[offset], appdata[offset + 1]]);
        offset += 2;
    }
    let mut feature2 = 0u16;
    if flags & ADVERT_FLAG_HAS_FEATURE2 != 0 {
        if appdata.len() < offset + 2 {
            return Err(ProtoError::MalformedPayload("advert"));
        }
        feature2 = u16::from_le_bytes([appdata[offset], appdata[offset + 1]]);
        offset += 2;
    }

    let node_name = if flags & ADVERT_FLAG_HAS_NAME != 0 {
        let raw = &appdata[offset..];
        if raw.is_empty() {
            return Err(ProtoError::MalformedPayload("advert"));
        }
        Some(String::from_utf8_lossy(raw).into_owned())
    } else {
        None
    };

    Ok(ParsedAdvert {
        pubkey,
        timestamp,
        flags,
        node_name,
        latitude,
        longitude,
        feature1,
        feature2,
    })
}

/// Build a signed flood advert for this node.
pub fn build_advert(
    identity: &Identity,
    name: &str,
    latitude: f64,
    longitude: f64,
    timestamp: u32,
    flags: u8,
) -> Packet {
    let mut appdata = vec![flags | ADVERT_FLAG_HAS_NAME | ADVERT_FLAG_HAS_LOCATION];
    appdata.extend_from_slice(&((latitude * 1e6) as i32).to_le_bytes());
    appdata.extend_from_slice(&((longitude * 1e6) as i32).to_le_bytes());
    appdata.extend_from_slice(name.as_bytes());

    let pubkey = identity.public_key();
    let mut signed = Vec::with_capacity(36 + appdata.len());
    signed.extend_from_slice(&pubkey);
    signed.extend_from_slice(&timestamp.to_le_bytes());
    signed.extend_from_slice(&appdata);
    let signature = identity.sign(&signed);

    let mut payload = Vec::with_capacity(36 + 64 + appdata.len());
    payload.extend_from_slice(&pubkey);
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(&signature);
    payload.extend_from_slice(&appdata);

    let header = make_header(ROUTE_TYPE_FLOOD, PAYLOAD_TYPE_ADVERT, 0);
    Packet::new(header, Vec::new(), payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse() {
        let identity = Identity::from_seed(&[3u8; 32]).expect("seed");
        let packet = build_advert(
            &identity,
            "hilltop",
            51.5074,
            -0.1278,
            1_700_000_000,
            ADVERT_FLAG_IS_REPEATER,
        );
        let parsed = parse_advert(&packet.payload).expect("parse");
        assert_eq!(parsed.pubkey, identity.public_key());
        assert_eq!(parsed.node_name.as_deref(), Some("hilltop"));
        assert!(parsed.is_repeater());
        assert_eq!(parsed.contact_type(), "REPEATER");
        let lat = parsed.latitude.expect("lat");
        assert!((lat - 51.5074).abs() < 1e-5);
    }

    #[test]
    fn rejects_tampered_name() {
        let identity = Identity::from_seed(&[3u8; 32]).expect("seed");
        let mut packet = build_advert(&identity, "hilltop", 0.0, 0.0, 1, ADVERT_FLAG_IS_REPEATER);
        let last = packet.payload.len() - 1;
        packet.payload[last] ^= 0xFF;
        assert!(matches!(
            parse_advert(&packet.payload),
            Err(ProtoError::BadSignature)
        ));
    }

    #[test]
    fn rejects_short_payload() {
        assert!(matches!(
            parse_advert(&[0u8; 10]),
            Err(ProtoError::MalformedPayload("advert"))
        ));
    }
}
