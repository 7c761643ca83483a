//! Long-term signing key material.
//!
//! Each agent holds one long-lived signing keypair, either Ed25519 or ECDSA
//! over secp256k1. Signing and KEM keys are independent: the KEM half lives
//! in [`crate::hpke`] and never doubles as an identity key.
//!
//! secp256k1 signatures are made over the Keccak-256 digest of the message
//! and serialised as raw 64-byte `r || s`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use k256::ecdsa;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

// ── Public keys ──────────────────────────────────────────────────────────────

/// A peer's long-term verifying key, as handed out by a resolver.
///
/// Ed25519 keys are the raw 32-byte form; secp256k1 keys are SEC1
/// compressed (33 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicSigningKey {
    Ed25519([u8; 32]),
    Secp256k1([u8; 33]),
}

impl PublicSigningKey {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Ed25519(b) => b,
            Self::Secp256k1(b) => b,
        }
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.as_bytes())
    }

    /// Parse from raw bytes, dispatching on length (32 → Ed25519,
    /// 33 → compressed SEC1 secp256k1).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        match bytes.len() {
            32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(bytes);
                // Reject bytes that are not a valid curve point up front.
                VerifyingKey::from_bytes(&arr)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Ok(Self::Ed25519(arr))
            }
            33 => {
                ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let mut arr = [0u8; 33];
                arr.copy_from_slice(bytes);
                Ok(Self::Secp256k1(arr))
            }
            n => Err(CryptoError::InvalidKey(format!(
                "public key must be 32 or 33 bytes, got {n}"
            ))),
        }
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&URL_SAFE_NO_PAD.decode(s)?)
    }

    /// Constant-time comparison against pinned key bytes (TOFU check).
    pub fn matches(&self, pinned: &[u8]) -> bool {
        let mine = self.as_bytes();
        mine.len() == pinned.len() && bool::from(mine.ct_eq(pinned))
    }

    /// Human-readable fingerprint: SHA-256 of the key bytes, truncated to
    /// 20 bytes, hex in groups of 4.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.as_bytes());
        let hex = hex::encode(&hash[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ── Signing keypairs ─────────────────────────────────────────────────────────

/// Long-term identity signing key. Both dalek and k256 signing keys scrub
/// their scalar on drop.
pub enum SigningKeyPair {
    Ed25519(SigningKey),
    Secp256k1(ecdsa::SigningKey),
}

impl SigningKeyPair {
    pub fn generate_ed25519() -> Self {
        Self::Ed25519(SigningKey::generate(&mut OsRng))
    }

    pub fn generate_secp256k1() -> Self {
        Self::Secp256k1(ecdsa::SigningKey::random(&mut OsRng))
    }

    pub fn public(&self) -> PublicSigningKey {
        match self {
            Self::Ed25519(key) => PublicSigningKey::Ed25519(key.verifying_key().to_bytes()),
            Self::Secp256k1(key) => {
                let point = key.verifying_key().to_encoded_point(true);
                let mut arr = [0u8; 33];
                arr.copy_from_slice(point.as_bytes());
                PublicSigningKey::Secp256k1(arr)
            }
        }
    }

    /// Sign arbitrary bytes.
    ///
    /// Ed25519: 64-byte signature over the message itself.
    /// secp256k1: 64-byte `r || s` over Keccak-256 of the message.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::Ed25519(key) => Ok(key.sign(msg).to_bytes().to_vec()),
            Self::Secp256k1(key) => {
                let digest = Keccak256::digest(msg);
                let sig: ecdsa::Signature = key
                    .sign_prehash(&digest)
                    .map_err(|e| CryptoError::Signing(e.to_string()))?;
                Ok(sig.to_bytes().to_vec())
            }
        }
    }
}
