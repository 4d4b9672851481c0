//! Transport-key lookup for the flood-deny policy.
//!
//! Keys live in the relational store; the engine caches the decoded set for
//! up to 60 seconds. A frame's first transport code is matched against the
//! expected code derived from each stored key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use meshrelay_storage::{FloodPolicy, Store};

pub const KEY_CACHE_TTL: Duration = Duration::from_secs(60);

/// Expected transport code for a key: first two bytes of SHA-256 over the
/// raw key material, little endian.
pub fn expected_code(key_material: &[u8]) -> u16 {
    let digest = Sha256::digest(key_material);
    u16::from_le_bytes([digest[0], digest[1]])
}

#[derive(Debug, Clone)]
struct CachedKey {
    id: i64,
    code: u16,
    policy: FloodPolicy,
}

pub struct TransportKeyCache {
    store: Arc<Store>,
    keys: Vec<CachedKey>,
    fetched_at: Option<Instant>,
}

impl TransportKeyCache {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            keys: Vec::new(),
            fetched_at: None,
        }
    }

    fn refresh_if_stale(&mut self) {
        let fresh = self
            .fetched_at
            .is_some_and(|at| at.elapsed() < KEY_CACHE_TTL);
        if fresh {
            return;
        }
        match self.store.transport_keys() {
            Ok(rows) => {
                self.keys = rows
                    .into_iter()
                    .filter_map(|key| match BASE64.decode(&key.transport_key) {
                        Ok(material) => Some(CachedKey {
                            id: key.id,
                            code: expected_code(&material),
                            policy: key.flood_policy,
                        }),
                        Err(err) => {
                            log::warn!("transport key '{}' is not valid base64: {err}", key.name);
                            None
                        }
                    })
                    .collect();
                self.fetched_at = Some(Instant::now());
            }
            Err(err) => log::error!("failed to load transport keys: {err}"),
        }
    }

    /// Match a frame's first transport code. On a hit, stamps the key's
    /// `last_used` and returns its policy; no match means deny.
    pub fn check(&mut self, code: u16) -> Option<FloodPolicy> {
        self.refresh_if_stale();
        let hit = self.keys.iter().find(|key| key.code == code)?;
        if let Err(err) = self
            .store
            .touch_transport_key(hit.id, meshrelay_proto::now_epoch_secs())
        {
            log::warn!("failed to update transport key last_used: {err}");
        }
        Some(hit.policy)
    }
}
