//! sage_handshake — DID-bound mutually authenticated HPKE+E2E handshake
//!
//! A single request/response establishes an authenticated, forward-secret,
//! bidirectional AEAD channel between an initiator and a responder. The
//! initiator encapsulates to the responder's long-lived KEM key (HPKE Base
//! mode) and mixes in an extra ephemeral X25519 exchange; both sides
//! confirm the combined secret with an HMAC ack tag and the responder binds
//! its identity with a detached signature over a canonical envelope.
//!
//! # Module layout
//! - `transcript` — canonical `info`/`export_ctx` strings and the ack tag
//! - `wire`       — request payload and response envelope types
//! - `initiator`  — client state machine (resolve → send → verify → bind)
//! - `responder`  — server state machine (validate → derive → sign)
//! - `replay`     — TTL-bounded nonce acceptance
//! - `cookie`     — DoS cookie hooks + stock HMAC policy
//! - `session`    — session-id derivation, traffic keys, manager seam
//! - `resolver`   — DID resolution seam
//! - `transport`  — single round-trip seam
//! - `config`     — skew window, nonce TTL, suite whitelist, TOFU pins
//! - `error`      — handshake error taxonomy

pub mod config;
pub mod cookie;
pub mod error;
pub mod initiator;
pub mod replay;
pub mod resolver;
pub mod responder;
pub mod session;
pub mod transcript;
pub mod transport;
pub mod wire;

pub use config::HandshakeConfig;
pub use error::HandshakeError;
pub use initiator::{Established, Initiator, PendingHandshake};
pub use responder::Responder;
