//! Canonical transcript strings and the key-confirmation tag.
//!
//! Both sides MUST produce byte-identical `info` and `export_ctx` for a
//! handshake to succeed; everything here is pure and deterministic. The
//! suite and combiner identifiers appear in every transcript so a secret
//! derived under one construction can never be confused with another.

use sha2::{Digest, Sha256};

use sage_crypto::{kdf, CryptoError};

/// Cryptographic suite: HPKE Base mode, X25519 KEM, HKDF-SHA256.
pub const SUITE_ID: &str = "hpke-base+x25519+hkdf-sha256";
/// Secret combiner: ephemeral X25519 mixed in via HKDF.
pub const COMBINER_ID: &str = "e2e-x25519-hkdf-v1";
/// Label under which the session manager derives session identifiers.
pub const SESSION_ID_LABEL: &str = "sage/hpke v1";

const INFO_PREFIX: &str = "sage/hpke-info|v1";
const EXPORT_PREFIX: &str = "sage/hpke-export|v1";
const ACK_MSG_PREFIX: &[u8] = b"SAGE-ack-msg|v1|";

/// HPKE `info` string binding suite, combiner, context, and both DIDs.
pub fn build_info(ctx_id: &str, init_did: &str, resp_did: &str) -> Vec<u8> {
    format!(
        "{INFO_PREFIX}|suite={SUITE_ID}|combiner={COMBINER_ID}|ctx={ctx_id}|init={init_did}|resp={resp_did}"
    )
    .into_bytes()
}

/// HPKE exporter context binding suite, combiner, and context.
pub fn build_export_ctx(ctx_id: &str) -> Vec<u8> {
    format!("{EXPORT_PREFIX}|suite={SUITE_ID}|combiner={COMBINER_ID}|ctx={ctx_id}").into_bytes()
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// 2-byte big-endian length prefix followed by the bytes. Callers bound
/// field lengths well below `u16::MAX` during envelope validation.
fn lp(s: &[u8]) -> Vec<u8> {
    debug_assert!(s.len() <= u16::MAX as usize);
    let mut out = Vec::with_capacity(2 + s.len());
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s);
    out
}

/// The ordered binding list both sides feed into the ack tag. The order is
/// part of the protocol; reordering any element is a different transcript.
pub struct AckBinding<'a> {
    pub info: &'a [u8],
    pub export_ctx: &'a [u8],
    pub enc: &'a [u8; 32],
    pub eph_c: &'a [u8; 32],
    pub eph_s: &'a [u8; 32],
    pub init_did: &'a str,
    pub resp_did: &'a str,
}

impl AckBinding<'_> {
    /// SHA-256 over the binding inputs, each preceded by a single zero byte.
    fn transcript_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for part in [
            self.info,
            self.export_ctx,
            self.enc.as_slice(),
            self.eph_c.as_slice(),
            self.eph_s.as_slice(),
            self.init_did.as_bytes(),
            self.resp_did.as_bytes(),
        ] {
            hasher.update([0u8]);
            hasher.update(part);
        }
        hasher.finalize().into()
    }
}

fn ack_message(ctx_id: &str, nonce: &str, kid: &str, binding: &AckBinding<'_>) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(ACK_MSG_PREFIX);
    msg.extend_from_slice(&lp(ctx_id.as_bytes()));
    msg.extend_from_slice(&lp(nonce.as_bytes()));
    msg.extend_from_slice(&lp(kid.as_bytes()));
    msg.extend_from_slice(&binding.transcript_hash());
    msg
}

/// HMAC-SHA256 key-confirmation tag under the ack key derived from the
/// combined secret.
pub fn compute_ack_tag(
    combined: &[u8; 32],
    ctx_id: &str,
    nonce: &str,
    kid: &str,
    binding: &AckBinding<'_>,
) -> Result<[u8; 32], CryptoError> {
    let key = kdf::ack_key(combined)?;
    kdf::hmac_sha256(key.as_slice(), &ack_message(ctx_id, nonce, kid, binding))
}

/// Constant-time tag comparison. Never log either side of this.
pub fn verify_ack_tag(expected: &[u8; 32], received: &[u8]) -> bool {
    kdf::ct_eq(expected, received)
}
