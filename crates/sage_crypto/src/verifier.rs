//! Signature verification strategies.
//!
//! Verification is always performed over the exact wire bytes the peer
//! signed; callers must never re-marshal a payload before handing it here.
//!
//! The composite verifier dispatches on the public-key variant:
//!   - Ed25519: strict verification of a 64-byte signature.
//!   - ECDSA secp256k1: Keccak-256 prehash, accepting raw 64-byte `r || s`,
//!     65-byte `r || s || v` (recovery byte stripped), or ASN.1 DER.

use ed25519_dalek::{Signature as EdSignature, VerifyingKey as EdVerifyingKey};
use k256::ecdsa;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use sha3::{Digest, Keccak256};

use crate::error::CryptoError;
use crate::keys::PublicSigningKey;

/// Capability set every verification strategy implements.
pub trait SignatureVerifier: Send + Sync {
    /// Whether this strategy can handle the given key variant.
    fn supports(&self, public_key: &PublicSigningKey) -> bool;

    /// Verify `signature` over `payload` with `public_key`.
    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        public_key: &PublicSigningKey,
    ) -> Result<(), CryptoError>;
}

// ── Ed25519 ──────────────────────────────────────────────────────────────────

pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn supports(&self, public_key: &PublicSigningKey) -> bool {
        matches!(public_key, PublicSigningKey::Ed25519(_))
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        public_key: &PublicSigningKey,
    ) -> Result<(), CryptoError> {
        let PublicSigningKey::Ed25519(key_bytes) = public_key else {
            return Err(CryptoError::UnsupportedKeyType);
        };
        let vk = EdVerifyingKey::from_bytes(key_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = EdSignature::from_slice(signature)
            .map_err(|_| CryptoError::SignatureVerification)?;
        vk.verify_strict(payload, &sig)
            .map_err(|_| CryptoError::SignatureVerification)
    }
}

// ── ECDSA secp256k1 ──────────────────────────────────────────────────────────

pub struct EcdsaK256Verifier;

impl EcdsaK256Verifier {
    /// Parse every signature encoding we accept. Order is irrelevant; the
    /// signature succeeds if any candidate verifies.
    fn candidates(signature: &[u8]) -> Vec<ecdsa::Signature> {
        let mut out = Vec::new();
        if signature.len() == 64 {
            if let Ok(sig) = ecdsa::Signature::from_slice(signature) {
                out.push(sig);
            }
        }
        if signature.len() == 65 {
            if let Ok(sig) = ecdsa::Signature::from_slice(&signature[..64]) {
                out.push(sig);
            }
        }
        if let Ok(sig) = ecdsa::Signature::from_der(signature) {
            out.push(sig);
        }
        out
    }
}

impl SignatureVerifier for EcdsaK256Verifier {
    fn supports(&self, public_key: &PublicSigningKey) -> bool {
        matches!(public_key, PublicSigningKey::Secp256k1(_))
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        public_key: &PublicSigningKey,
    ) -> Result<(), CryptoError> {
        let PublicSigningKey::Secp256k1(key_bytes) = public_key else {
            return Err(CryptoError::UnsupportedKeyType);
        };
        let vk = ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let digest = Keccak256::digest(payload);

        for sig in Self::candidates(signature) {
            if vk.verify_prehash(&digest, &sig).is_ok() {
                return Ok(());
            }
        }
        Err(CryptoError::SignatureVerification)
    }
}

// ── Composite ────────────────────────────────────────────────────────────────

/// Iterates registered strategies and delegates to the first that supports
/// the key. No strategy matching means the key type is unsupported.
pub struct CompositeVerifier {
    verifiers: Vec<Box<dyn SignatureVerifier>>,
}

impl CompositeVerifier {
    pub fn new(verifiers: Vec<Box<dyn SignatureVerifier>>) -> Self {
        Self { verifiers }
    }
}

impl Default for CompositeVerifier {
    fn default() -> Self {
        Self::new(vec![Box::new(Ed25519Verifier), Box::new(EcdsaK256Verifier)])
    }
}

impl SignatureVerifier for CompositeVerifier {
    fn supports(&self, public_key: &PublicSigningKey) -> bool {
        self.verifiers.iter().any(|v| v.supports(public_key))
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        public_key: &PublicSigningKey,
    ) -> Result<(), CryptoError> {
        for verifier in &self.verifiers {
            if verifier.supports(public_key) {
                return verifier.verify(payload, signature, public_key);
            }
        }
        Err(CryptoError::UnsupportedKeyType)
    }
}
