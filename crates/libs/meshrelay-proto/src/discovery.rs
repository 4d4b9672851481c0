//! Discovery request/response codec.
//!
//! Requests are anonymous control frames carrying a correlation tag and a
//! node-type filter bitmap. Responses are signed by the responder and carry
//! its public key (or an 8-byte prefix) plus the SNR it heard the request at.

use crate::identity::Identity;
use crate::packet::{make_header, Packet};
use crate::trace::snr_to_path_byte;
use crate::{ProtoError, PAYLOAD_TYPE_CONTROL, ROUTE_TYPE_FLOOD};

pub const CONTROL_DISCOVER_REQ: u8 = 0x01;
pub const CONTROL_DISCOVER_RESP: u8 = 0x02;

const DISCOVERY_FLAG_PREFIX_ONLY: u8 = 0x01;
const PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub tag: u32,
    pub filter: u8,
    pub prefix_only: bool,
}

pub fn parse_discovery_request(payload: &[u8]) -> Result<DiscoveryRequest, ProtoError> {
    if payload.len() < 7 || payload[0] != CONTROL_DISCOVER_REQ {
        return Err(ProtoError::MalformedPayload("discovery"));
    }
    let tag = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok(DiscoveryRequest {
        tag,
        filter: payload[5],
        prefix_only: payload[6] & DISCOVERY_FLAG_PREFIX_ONLY != 0,
    })
}

pub fn encode_discovery_request(request: &DiscoveryRequest) -> Vec<u8> {
    let mut buf = vec![CONTROL_DISCOVER_REQ];
    buf.extend_from_slice(&request.tag.to_le_bytes());
    buf.push(request.filter);
    buf.push(if request.prefix_only {
        DISCOVERY_FLAG_PREFIX_ONLY
    } else {
        0
    });
    buf
}

/// Build the signed response to a discovery request. The signature covers
/// `tag | node_type | key material` so a responder cannot be impersonated.
pub fn build_discovery_response(
    identity: &Identity,
    tag: u32,
    node_type: u8,
    inbound_snr: f64,
    prefix_only: bool,
) -> Packet {
    let pubkey = identity.public_key();
    let key_bytes: &[u8] = if prefix_only {
        &pubkey[..PREFIX_LEN]
    } else {
        &pubkey
    };

    let mut signed = Vec::with_capacity(5 + key_bytes.len());
    signed.extend_from_slice(&tag.to_le_bytes());
    signed.push(node_type);
    signed.extend_from_slice(key_bytes);
    let signature = identity.sign(&signed);

    let mut payload = vec![CONTROL_DISCOVER_RESP];
    payload.extend_from_slice(&tag.to_le_bytes());
    payload.push(node_type);
    payload.push(snr_to_path_byte(inbound_snr));
    payload.push(key_bytes.len() as u8);
    payload.extend_from_slice(key_bytes);
    payload.extend_from_slice(&signature);

    let header = make_header(ROUTE_TYPE_FLOOD, PAYLOAD_TYPE_CONTROL, 0);
    Packet::new(header, Vec::new(), payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::verify_signature;
    use crate::trace::path_byte_to_snr;

    #[test]
    fn request_roundtrip() {
        let request = DiscoveryRequest {
            tag: 0xCAFEF00D,
            filter: 0x04,
            prefix_only: true,
        };
        let parsed = parse_discovery_request(&encode_discovery_request(&request)).expect("parse");
        assert_eq!(parsed, request);
    }

    #[test]
    fn rejects_wrong_marker() {
        let mut bytes = encode_discovery_request(&DiscoveryRequest {
            tag: 1,
            filter: 0x04,
            prefix_only: false,
        });
        bytes[0] = CONTROL_DISCOVER_RESP;
        assert!(parse_discovery_request(&bytes).is_err());
    }

    #[test]
    fn response_carries_verifiable_signature() {
        let identity = Identity::from_seed(&[9u8; 32]).expect("seed");
        let packet = build_discovery_response(&identity, 77, 2, 6.25, false);
        let payload = &packet.payload;
        assert_eq!(payload[0], CONTROL_DISCOVER_RESP);
        assert_eq!(path_byte_to_snr(payload[6]), 6.25);

        let key_len = payload[7] as usize;
        assert_eq!(key_len, 32);
        let key_bytes = &payload[8..8 + key_len];
        let signature: [u8; 64] = payload[8 + key_len..].try_into().expect("signature");

        let mut signed = Vec::new();
        signed.extend_from_slice(&payload[1..5]);
        signed.push(payload[5]);
        signed.extend_from_slice(key_bytes);
        verify_signature(&identity.public_key(), &signed, &signature).expect("verify");
    }
}
