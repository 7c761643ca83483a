//! On-wire types for the single round trip.
//!
//! The initiator signs the exact serialized bytes of [`InitPayload`]; the
//! responder signs the exact serialized bytes of [`ResponseEnvelope`] with
//! the signature field cleared. Field order is the struct declaration
//! order, so both sides reproduce identical bytes without relying on map
//! iteration.
//!
//! All binary fields travel as base64url without padding (RFC 4648);
//! timestamps are RFC3339 with nanoseconds, UTC.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HandshakeError;

/// Protocol version tag carried in every response envelope.
pub const PROTOCOL_VERSION: &str = "v1";
/// The one task this protocol understands.
pub const TASK_HPKE_COMPLETE: &str = "hpke/complete@v1";
/// Role string stamped on initiator requests.
pub const ROLE_USER: &str = "user";
/// Metadata key under which a DoS cookie travels.
pub const COOKIE_METADATA_KEY: &str = "cookie";

/// Upper bound on identifier-ish wire fields (DIDs, context ids, nonces,
/// kids). Anything longer is rejected before it reaches the transcript.
pub(crate) const MAX_FIELD_LEN: usize = 1024;

// ── Encoding helpers ─────────────────────────────────────────────────────────

pub fn b64e(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64d(s: &str) -> Result<Vec<u8>, HandshakeError> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| HandshakeError::InvalidInput(format!("base64: {e}")))
}

/// Decode a base64url field that must be exactly 32 bytes.
pub fn b64d_exact32(s: &str) -> Result<[u8; 32], HandshakeError> {
    let bytes = b64d(s)?;
    bytes
        .try_into()
        .map_err(|_| HandshakeError::InvalidInput("expected 32-byte field".into()))
}

pub fn rfc3339_nanos(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, HandshakeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| HandshakeError::InvalidInput(format!("timestamp: {e}")))
}

mod b64_bytes {
    use super::{Engine, URL_SAFE_NO_PAD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        URL_SAFE_NO_PAD.decode(s).map_err(serde::de::Error::custom)
    }
}

// ── Initiator request ────────────────────────────────────────────────────────

/// JSON payload the initiator signs. Key names and order are fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    #[serde(rename = "initDid")]
    pub init_did: String,
    #[serde(rename = "respDid")]
    pub resp_did: String,
    /// base64url of the HPKE `info` transcript bytes.
    pub info: String,
    /// base64url of the exporter-context transcript bytes.
    #[serde(rename = "exportCtx")]
    pub export_ctx: String,
    /// UUID v4, unique per (context, handshake).
    pub nonce: String,
    /// RFC3339 with nanoseconds, UTC.
    pub ts: String,
    /// base64url of the 32-byte KEM encapsulation.
    pub enc: String,
    /// base64url of the initiator's 32-byte ephemeral X25519 public key.
    #[serde(rename = "ephC")]
    pub eph_c: String,
}

/// Transport-agnostic secure-message envelope carrying the signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub id: String,
    pub context_id: String,
    pub task_id: String,
    pub did: String,
    /// Exact serialized [`InitPayload`] bytes; the signature covers these.
    #[serde(with = "b64_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "b64_bytes")]
    pub signature: Vec<u8>,
    pub role: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

// ── Responder response ───────────────────────────────────────────────────────

/// Response envelope with fixed key order for deterministic signing.
/// The signed form is this object with `sigB64` absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: String,
    pub task: String,
    pub ctx: String,
    pub kid: String,
    #[serde(rename = "ephS")]
    pub eph_s: String,
    #[serde(rename = "ackTagB64")]
    pub ack_tag_b64: String,
    pub ts: String,
    pub did: String,
    #[serde(rename = "infoHash")]
    pub info_hash: String,
    #[serde(rename = "exportCtxHash")]
    pub export_ctx_hash: String,
    pub enc: String,
    #[serde(rename = "ephC")]
    pub eph_c: String,
    #[serde(rename = "sigB64", default, skip_serializing_if = "String::is_empty")]
    pub sig_b64: String,
}

impl ResponseEnvelope {
    /// The canonical bytes the responder signature covers: the envelope
    /// serialized with the signature field cleared.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, HandshakeError> {
        let mut unsigned = self.clone();
        unsigned.sig_b64 = String::new();
        serde_json::to_vec(&unsigned)
            .map_err(|e| HandshakeError::InvalidInput(format!("envelope serialise: {e}")))
    }
}

pub(crate) fn check_field_len(name: &str, value: &str) -> Result<(), HandshakeError> {
    if value.is_empty() || value.len() > MAX_FIELD_LEN {
        return Err(HandshakeError::InvalidInput(format!(
            "field {name} length out of bounds"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_payload_keys_are_fixed() {
        let payload = InitPayload {
            init_did: "did:sage:test:alice".into(),
            resp_did: "did:sage:test:bob".into(),
            info: b64e(b"info"),
            export_ctx: b64e(b"ctx"),
            nonce: "n".into(),
            ts: "2026-01-01T00:00:00.000000000Z".into(),
            enc: b64e(&[0u8; 32]),
            eph_c: b64e(&[1u8; 32]),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let expected_order = [
            "initDid", "respDid", "info", "exportCtx", "nonce", "ts", "enc", "ephC",
        ];
        let mut last = 0;
        for key in expected_order {
            let pos = json.find(&format!("\"{key}\"")).unwrap();
            assert!(pos > last || last == 0, "key {key} out of order");
            last = pos;
        }
    }

    #[test]
    fn envelope_signing_bytes_omit_signature() {
        let envelope = ResponseEnvelope {
            v: PROTOCOL_VERSION.into(),
            task: TASK_HPKE_COMPLETE.into(),
            ctx: "ctx".into(),
            kid: "kid-1".into(),
            eph_s: b64e(&[2u8; 32]),
            ack_tag_b64: b64e(&[3u8; 32]),
            ts: "2026-01-01T00:00:00.000000000Z".into(),
            did: "did:sage:test:bob".into(),
            info_hash: b64e(&[4u8; 32]),
            export_ctx_hash: b64e(&[5u8; 32]),
            enc: b64e(&[6u8; 32]),
            eph_c: b64e(&[7u8; 32]),
            sig_b64: b64e(&[8u8; 64]),
        };
        let bytes = envelope.signing_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("sigB64"));

        // Reconstructing from parsed fields gives the same canonical bytes.
        let parsed: ResponseEnvelope =
            serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).unwrap();
        assert_eq!(envelope.signing_bytes().unwrap(), parsed.signing_bytes().unwrap());
    }

    #[test]
    fn request_payload_travels_as_base64() {
        let request = HandshakeRequest {
            id: "00000000-0000-4000-8000-000000000000".into(),
            context_id: "ctx".into(),
            task_id: TASK_HPKE_COMPLETE.into(),
            did: "did:sage:test:alice".into(),
            payload: b"{\"x\":1}".to_vec(),
            signature: vec![9u8; 64],
            role: ROLE_USER.into(),
            metadata: HashMap::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("metadata"));
        let parsed: HandshakeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.payload, request.payload);
        assert_eq!(parsed.signature, request.signature);
    }

    #[test]
    fn strict_32_byte_decode() {
        assert!(b64d_exact32(&b64e(&[0u8; 32])).is_ok());
        assert!(b64d_exact32(&b64e(&[0u8; 31])).is_err());
        assert!(b64d_exact32(&b64e(&[0u8; 33])).is_err());
        assert!(b64d_exact32("!!!").is_err());
    }

    #[test]
    fn rfc3339_roundtrip_keeps_nanos() {
        let now = Utc::now();
        let text = rfc3339_nanos(now);
        assert!(text.ends_with('Z'));
        let parsed = parse_rfc3339(&text).unwrap();
        assert_eq!(parsed, now);
    }
}
