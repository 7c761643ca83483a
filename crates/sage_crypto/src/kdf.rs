//! Key derivation.
//!
//! `hkdf_expand` — plain HKDF-SHA256 expansion, used wherever salt and info
//!   are supplied verbatim.
//!
//! `expand_label` — HKDF-Expand from an existing 32-byte secret with an
//!   ASCII label carried as a 2-byte big-endian length prefix plus the label
//!   bytes. Every derived value in the handshake (ack key, session id,
//!   traffic keys, channel binding) goes through this.
//!
//! `combine` — the HPKE+E2E secret combiner:
//!   HKDF-Expand(HKDF-Extract(salt = export_ctx, ikm = exporter || ssE2E),
//!               info = "SAGE-HPKE+E2E-Combiner", 32).

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Expand info label of the secret combiner.
const COMBINER_INFO: &[u8] = b"SAGE-HPKE+E2E-Combiner";

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF substitutes a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// HKDF-Expand from a 32-byte pseudorandom key with a length-prefixed label.
pub fn expand_label(prk: &[u8; 32], label: &str, output: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut info = Vec::with_capacity(2 + label.len());
    info.extend_from_slice(&(label.len() as u16).to_be_bytes());
    info.extend_from_slice(label.as_bytes());
    hk.expand(&info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Combine the HPKE exporter secret with the ephemeral DH output into the
/// 32-byte session secret. The export context acts as the extract salt so a
/// transcript change yields an unrelated secret.
pub fn combine(
    exporter: &[u8; 32],
    ss_e2e: &[u8; 32],
    export_ctx: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut ikm = Zeroizing::new([0u8; 64]);
    ikm[..32].copy_from_slice(exporter);
    ikm[32..].copy_from_slice(ss_e2e);

    let hk = Hkdf::<Sha256>::new(Some(export_ctx), ikm.as_slice());
    let mut combined = Zeroizing::new([0u8; 32]);
    hk.expand(COMBINER_INFO, combined.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(combined)
}

/// Derive the key-confirmation HMAC key from the combined secret.
pub fn ack_key(combined: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut key = Zeroizing::new([0u8; 32]);
    expand_label(combined, "SAGE-ack-key-v1", key.as_mut_slice())?;
    Ok(key)
}

/// HMAC-SHA256 of `msg` under `key`.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time equality over byte slices. Length mismatch is an immediate
/// false; tags, pins, and transcript hashes all have fixed public lengths.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
