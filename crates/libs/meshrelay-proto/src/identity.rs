//! Node signing identity.
//!
//! A 32-byte Ed25519 seed is the whole identity; the first public key byte
//! doubles as the node's one-byte path hash on the mesh.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::ProtoError;

pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    pub fn from_seed(seed: &[u8]) -> Result<Self, ProtoError> {
        let seed: [u8; 32] = seed.try_into().map_err(|_| ProtoError::BadKey)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// One-byte hash this node appends to flood paths.
    pub fn local_hash(&self) -> u8 {
        self.public_key()[0]
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verify an Ed25519 signature against a raw 32-byte public key.
pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), ProtoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| ProtoError::BadKey)?;
    key.verify(message, &Signature::from_bytes(signature))
        .map_err(|_| ProtoError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let identity = Identity::from_seed(&[7u8; 32]).expect("seed");
        let signature = identity.sign(b"frame");
        verify_signature(&identity.public_key(), b"frame", &signature).expect("verify");
    }

    #[test]
    fn tampered_message_fails() {
        let identity = Identity::from_seed(&[7u8; 32]).expect("seed");
        let signature = identity.sign(b"frame");
        assert!(verify_signature(&identity.public_key(), b"other", &signature).is_err());
    }

    #[test]
    fn rejects_short_seed() {
        assert!(Identity::from_seed(&[1u8; 16]).is_err());
    }
}
