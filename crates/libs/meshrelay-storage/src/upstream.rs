//! Upstream broker publisher.
//!
//! Connects to one of the named LetsMesh brokers over secure WebSocket,
//! authenticating with a compact three-part Ed25519 token. A heartbeat task
//! publishes the node status every `status_interval` seconds, regenerating
//! the token once 80% of its lifetime has elapsed, and forwards per-packet
//! records under `meshcore/<iata>/<pubkey>/packets`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::TimeZone;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rumqttc::{AsyncClient, Event, MqttOptions, QoS, Transport};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::records::PacketRecord;

/// Token lifetime in seconds; regenerated at 80% of this.
pub const TOKEN_LIFETIME_SECS: u64 = 600;
const TOKEN_REFRESH_FRACTION: f64 = 0.8;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Broker {
    pub name: &'static str,
    pub host: &'static str,
    pub port: u16,
    pub audience: &'static str,
}

pub const LETSMESH_BROKERS: [Broker; 2] = [
    Broker {
        name: "Europe (LetsMesh v1)",
        host: "mqtt-eu-v1.letsmesh.net",
        port: 443,
        audience: "mqtt-eu-v1.letsmesh.net",
    },
    Broker {
        name: "US West (LetsMesh v1)",
        host: "mqtt-us-v1.letsmesh.net",
        port: 443,
        audience: "mqtt-us-v1.letsmesh.net",
    },
];

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("identity seed must be 32 bytes")]
    BadSeed,

    #[error("derived public key does not match the configured key")]
    KeyMismatch,

    #[error("token is not three dot-separated parts")]
    BadShape,

    #[error("token part is not valid base64url/json: {0}")]
    BadPart(String),

    #[error("token signature does not verify")]
    BadSignature,
}

fn b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate the three-part upstream auth token.
///
/// `header_b64 . payload_b64 . hex(signature)` where the signature is
/// Ed25519 over the first two parts. The seed's derived public key must
/// match `expected_pubkey_hex` when one is configured. `owner`/`email` are
/// only embedded when the transport verifies TLS certificates.
pub fn generate_token(
    seed: &[u8],
    expected_pubkey_hex: Option<&str>,
    audience: &str,
    iat: u64,
    owner: Option<&str>,
    email: Option<&str>,
    tls_verified: bool,
) -> Result<String, TokenError> {
    let seed: [u8; 32] = seed.try_into().map_err(|_| TokenError::BadSeed)?;
    let signing_key = SigningKey::from_bytes(&seed);
    let pubkey_hex = hex::encode(signing_key.verifying_key().to_bytes()).to_uppercase();
    if let Some(expected) = expected_pubkey_hex {
        if !expected.eq_ignore_ascii_case(&pubkey_hex) {
            return Err(TokenError::KeyMismatch);
        }
    }

    let header = json!({"alg": "Ed25519", "typ": "JWT"});
    let mut payload = json!({
        "publicKey": pubkey_hex,
        "aud": audience,
        "iat": iat,
        "exp": iat + TOKEN_LIFETIME_SECS,
    });
    if tls_verified {
        if let Some(owner) = owner {
            payload["owner"] = json!(owner);
        }
        if let Some(email) = email {
            payload["email"] = json!(email);
        }
    }

    let header_b64 = b64url(header.to_string().as_bytes());
    let payload_b64 = b64url(payload.to_string().as_bytes());
    let message = format!("{header_b64}.{payload_b64}");
    let signature = signing_key.sign(message.as_bytes());
    Ok(format!("{message}.{}", hex::encode(signature.to_bytes())))
}

/// Decode a token and verify its signature against the embedded public key.
/// Returns the decoded header and payload objects.
pub fn verify_token(token: &str) -> Result<(serde_json::Value, serde_json::Value), TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_hex] = parts.as_slice() else {
        return Err(TokenError::BadShape);
    };

    let decode = |part: &str| -> Result<serde_json::Value, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(part)
            .map_err(|err| TokenError::BadPart(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| TokenError::BadPart(err.to_string()))
    };
    let header = decode(header_b64)?;
    let payload = decode(payload_b64)?;

    let pubkey_hex = payload
        .get("publicKey")
        .and_then(|value| value.as_str())
        .ok_or(TokenError::BadShape)?;
    let pubkey_bytes: [u8; 32] = hex::decode(pubkey_hex)
        .map_err(|err| TokenError::BadPart(err.to_string()))?
        .try_into()
        .map_err(|_| TokenError::BadShape)?;
    let verifying_key =
        VerifyingKey::from_bytes(&pubkey_bytes).map_err(|_| TokenError::BadSignature)?;

    let signature_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|err| TokenError::BadPart(err.to_string()))?
        .try_into()
        .map_err(|_| TokenError::BadShape)?;
    let message = format!("{header_b64}.{payload_b64}");
    verifying_key
        .verify(message.as_bytes(), &Signature::from_bytes(&signature_bytes))
        .map_err(|_| TokenError::BadSignature)?;
    Ok((header, payload))
}

/// Live counters the heartbeat snapshots into each status message.
#[derive(Debug, Default)]
pub struct NodeCounters {
    pub packets_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub errors: AtomicU64,
    pub queue_len: AtomicU64,
}

impl NodeCounters {
    pub fn incr_rx(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_tx(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_len(&self, len: u64) {
        self.queue_len.store(len, Ordering::Relaxed);
    }
}

/// Radio configuration summary for the status message: `MHz,kHz,SF,CR`.
#[derive(Debug, Clone, Copy)]
pub struct RadioDescriptor {
    pub frequency_hz: u64,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
}

impl RadioDescriptor {
    pub fn radio_string(&self) -> String {
        format!(
            "{},{},{},{}",
            self.frequency_hz as f64 / 1_000_000.0,
            self.bandwidth_hz / 1000,
            self.spreading_factor,
            self.coding_rate
        )
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub iata_code: String,
    pub broker_index: usize,
    pub status_interval_secs: u64,
    pub owner: Option<String>,
    pub email: Option<String>,
    pub disallowed_packet_types: Vec<u8>,
    pub node_name: String,
    pub model: String,
    pub firmware_version: String,
    pub seed: [u8; 32],
    pub pubkey_hex: String,
}

#[derive(Debug)]
pub enum UpstreamEvent {
    Packet(PacketRecord),
}

pub struct UpstreamHandle {
    tx: mpsc::UnboundedSender<UpstreamEvent>,
}

impl UpstreamHandle {
    pub fn publish_packet(&self, record: PacketRecord) {
        let _ = self.tx.send(UpstreamEvent::Packet(record));
    }
}

enum SessionEnd {
    Shutdown,
    Reauth,
    Lost,
}

/// Spawn the upstream publisher task. The returned handle feeds it packet
/// records; the task owns connection lifecycle, token refresh and heartbeat.
pub fn spawn_upstream(
    settings: UpstreamSettings,
    counters: Arc<NodeCounters>,
    radio: RadioDescriptor,
    started: std::time::Instant,
    cancel: CancellationToken,
) -> UpstreamHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let broker = LETSMESH_BROKERS
            .get(settings.broker_index)
            .unwrap_or(&LETSMESH_BROKERS[0])
            .clone();
        log::info!("upstream publisher targeting {} ({})", broker.name, broker.host);

        loop {
            match run_session(&settings, &broker, &counters, &radio, started, &mut rx, &cancel)
                .await
            {
                SessionEnd::Shutdown => break,
                SessionEnd::Reauth => {
                    log::info!("upstream token refresh, reconnecting");
                }
                SessionEnd::Lost => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    log::warn!(
                        "upstream connection lost, retrying in {}s",
                        RECONNECT_BACKOFF.as_secs()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                    }
                }
            }
        }
    });
    UpstreamHandle { tx }
}

async fn run_session(
    settings: &UpstreamSettings,
    broker: &Broker,
    counters: &NodeCounters,
    radio: &RadioDescriptor,
    started: std::time::Instant,
    rx: &mut mpsc::UnboundedReceiver<UpstreamEvent>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let issued_at = meshrelay_proto::now_epoch_secs() as u64;
    let token = match generate_token(
        &settings.seed,
        Some(&settings.pubkey_hex),
        broker.audience,
        issued_at,
        settings.owner.as_deref(),
        settings.email.as_deref(),
        true,
    ) {
        Ok(token) => token,
        Err(err) => {
            log::error!("upstream token generation failed: {err}");
            return SessionEnd::Lost;
        }
    };
    let username = format!("v1_{}", settings.pubkey_hex.to_uppercase());

    let url = format!("wss://{}:{}/mqtt", broker.host, broker.port);
    let mut options = MqttOptions::new(username.clone(), url, broker.port);
    options.set_transport(Transport::wss_with_default_config());
    options.set_credentials(username, token);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut event_loop) = AsyncClient::new(options, 64);
    let topic_base = format!(
        "meshcore/{}/{}",
        settings.iata_code,
        settings.pubkey_hex.to_lowercase()
    );
    log::info!("upstream connecting to {}", broker.host);

    let mut heartbeat = tokio::time::interval(Duration::from_secs(settings.status_interval_secs));
    let refresh_after = (TOKEN_LIFETIME_SECS as f64 * TOKEN_REFRESH_FRACTION) as u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                publish_status(&client, &topic_base, settings, counters, radio, started, "offline");
                // give the event loop a moment to flush the offline status
                let _ = tokio::time::timeout(Duration::from_secs(2), async {
                    while let Ok(event) = event_loop.poll().await {
                        if matches!(event, Event::Outgoing(rumqttc::Outgoing::Publish(_))) {
                            break;
                        }
                    }
                })
                .await;
                let _ = client.try_disconnect();
                return SessionEnd::Shutdown;
            }
            _ = heartbeat.tick() => {
                let now = meshrelay_proto::now_epoch_secs() as u64;
                if now.saturating_sub(issued_at) >= refresh_after {
                    let _ = client.try_disconnect();
                    return SessionEnd::Reauth;
                }
                publish_status(&client, &topic_base, settings, counters, radio, started, "online");
            }
            Some(event) = rx.recv() => match event {
                UpstreamEvent::Packet(record) => {
                    if settings.disallowed_packet_types.contains(&record.packet_type) {
                        continue;
                    }
                    publish_packet(&client, &topic_base, settings, &record);
                }
            },
            polled = event_loop.poll() => match polled {
                Ok(Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    log::info!("upstream connected to {}", broker.host);
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("upstream broker error: {err}");
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

fn publish_status(
    client: &AsyncClient,
    topic_base: &str,
    settings: &UpstreamSettings,
    counters: &NodeCounters,
    radio: &RadioDescriptor,
    started: std::time::Instant,
    status: &str,
) {
    let message = json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "origin": settings.node_name,
        "origin_id": settings.pubkey_hex.to_lowercase(),
        "model": settings.model,
        "firmware_version": settings.firmware_version,
        "radio": radio.radio_string(),
        "client_version": settings.firmware_version,
        "stats": {
            "uptime_secs": started.elapsed().as_secs(),
            "packets_sent": counters.packets_sent.load(Ordering::Relaxed),
            "packets_received": counters.packets_received.load(Ordering::Relaxed),
            "errors": counters.errors.load(Ordering::Relaxed),
            "queue_len": counters.queue_len.load(Ordering::Relaxed),
        },
    });
    let topic = format!("{topic_base}/status");
    if let Err(err) = client.try_publish(&topic, QoS::AtMostOnce, false, message.to_string()) {
        log::warn!("upstream status publish failed: {err}");
    }
}

/// Reformat a packet record into the upstream per-packet schema.
pub fn packet_message(settings: &UpstreamSettings, record: &PacketRecord) -> serde_json::Value {
    let local = chrono::Local
        .timestamp_opt(record.timestamp as i64, 0)
        .single()
        .unwrap_or_else(chrono::Local::now);
    let raw = record.raw_packet.clone().unwrap_or_default();
    let route = match record.route {
        1 => "F".to_string(),
        2 => "D".to_string(),
        other => other.to_string(),
    };
    json!({
        "origin": settings.node_name,
        "origin_id": settings.pubkey_hex.to_lowercase(),
        "timestamp": local.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "type": "PACKET",
        "direction": "rx",
        "time": local.format("%H:%M:%S").to_string(),
        "date": local.format("%-d/%-m/%Y").to_string(),
        "len": (raw.len() / 2).to_string(),
        "packet_type": record.packet_type.to_string(),
        "route": route,
        "payload_len": record.payload_length.to_string(),
        "raw": raw,
        "SNR": record.snr.to_string(),
        "RSSI": record.rssi.to_string(),
        "score": (record.score * 1000.0) as i64,
        "duration": "0",
        "hash": record.packet_hash,
    })
}

fn publish_packet(
    client: &AsyncClient,
    topic_base: &str,
    settings: &UpstreamSettings,
    record: &PacketRecord,
) {
    if record.raw_packet.as_deref().unwrap_or_default().is_empty() {
        log::debug!("skipping upstream publish: packet record has no raw frame");
        return;
    }
    let topic = format!("{topic_base}/packets");
    let message = packet_message(settings, record);
    if let Err(err) = client.try_publish(&topic, QoS::AtMostOnce, false, message.to_string()) {
        log::warn!("upstream packet publish failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED_HEX: &str = "2d28a076b2d2a1f1a80a3e14ab651a1e843868a2c7f3db0ff6fa2b4ad3026fc9";

    fn seed() -> [u8; 32] {
        hex::decode(SEED_HEX).expect("seed hex").try_into().expect("32 bytes")
    }

    #[test]
    fn token_roundtrip_and_claims() {
        let seed = seed();
        let signing_key = SigningKey::from_bytes(&seed);
        let pubkey_upper = hex::encode(signing_key.verifying_key().to_bytes()).to_uppercase();

        let token = generate_token(
            &seed,
            Some(&pubkey_upper),
            "mqtt-eu-v1.letsmesh.net",
            1_700_000_000,
            Some("Operator"),
            Some("op@example.net"),
            true,
        )
        .expect("token");

        let (header, payload) = verify_token(&token).expect("verify");
        assert_eq!(header["alg"], "Ed25519");
        assert_eq!(header["typ"], "JWT");
        assert_eq!(payload["publicKey"], pubkey_upper);
        assert_eq!(payload["aud"], "mqtt-eu-v1.letsmesh.net");
        let iat = payload["iat"].as_u64().expect("iat");
        let exp = payload["exp"].as_u64().expect("exp");
        assert_eq!(exp - iat, 600);
        assert_eq!(payload["owner"], "Operator");
    }

    #[test]
    fn token_omits_identity_without_tls() {
        let token = generate_token(
            &seed(),
            None,
            "mqtt-us-v1.letsmesh.net",
            1_700_000_000,
            Some("Operator"),
            Some("op@example.net"),
            false,
        )
        .expect("token");
        let (_, payload) = verify_token(&token).expect("verify");
        assert!(payload.get("owner").is_none());
        assert!(payload.get("email").is_none());
    }

    #[test]
    fn token_rejects_mismatched_pubkey() {
        let err = generate_token(
            &seed(),
            Some("00112233445566778899AABBCCDDEEFF00112233445566778899AABBCCDDEEFF"),
            "aud",
            0,
            None,
            None,
            true,
        )
        .expect_err("mismatch");
        assert!(matches!(err, TokenError::KeyMismatch));
    }

    #[test]
    fn tampered_token_fails_verification() {
        let token = generate_token(&seed(), None, "aud", 1, None, None, false).expect("token");
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let payload = json!({"publicKey": hex::encode(SigningKey::from_bytes(&seed()).verifying_key().to_bytes()).to_uppercase(), "aud": "other", "iat": 1, "exp": 601});
        parts[1] = b64url(payload.to_string().as_bytes());
        let forged = parts.join(".");
        assert!(matches!(verify_token(&forged), Err(TokenError::BadSignature)));
    }

    #[test]
    fn radio_string_format() {
        let descriptor = RadioDescriptor {
            frequency_hz: 869_525_000,
            bandwidth_hz: 250_000,
            spreading_factor: 11,
            coding_rate: 5,
        };
        assert_eq!(descriptor.radio_string(), "869.525,250,11,5");
    }

    #[test]
    fn packet_message_schema() {
        let settings = UpstreamSettings {
            iata_code: "vie".to_string(),
            broker_index: 0,
            status_interval_secs: 60,
            owner: None,
            email: None,
            disallowed_packet_types: vec![],
            node_name: "hilltop".to_string(),
            model: "MeshRelay".to_string(),
            firmware_version: "0.1.0".to_string(),
            seed: seed(),
            pubkey_hex: "AB".repeat(32),
        };
        let record = PacketRecord {
            timestamp: 1_700_000_000.0,
            packet_type: 4,
            route: 1,
            length: 3,
            rssi: -92,
            snr: 7.25,
            score: 0.512,
            transmitted: true,
            is_duplicate: false,
            drop_reason: None,
            src_hash: None,
            dst_hash: None,
            path_hash: None,
            header: Some("0x11".to_string()),
            transport_codes: None,
            payload: Some("112233".to_string()),
            payload_length: 3,
            tx_delay_ms: 10.0,
            packet_hash: "cafe".to_string(),
            original_path: None,
            forwarded_path: None,
            raw_packet: Some("11021020112233".to_string()),
        };
        let message = packet_message(&settings, &record);
        assert_eq!(message["type"], "PACKET");
        assert_eq!(message["direction"], "rx");
        assert_eq!(message["route"], "F");
        assert_eq!(message["score"], 512);
        assert_eq!(message["len"], "7");
        assert_eq!(message["hash"], "cafe");
    }
}
