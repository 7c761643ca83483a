//! Handshake error taxonomy.
//!
//! Every variant is fatal to the handshake it occurred in; `Transport` is
//! the only kind a caller may sensibly retry. Messages carry no
//! secret-dependent detail: signature, pin, and key-confirmation failures
//! are deliberately opaque.

use thiserror::Error;

use crate::resolver::ResolverError;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported protocol version or task: {0}")]
    ProtocolVersion(String),

    #[error("timestamp outside the accepted skew window")]
    TimestampOutOfWindow,

    #[error("replayed handshake nonce")]
    ReplayDetected,

    #[error("info/exportCtx mismatch: {0}")]
    TranscriptMismatch(String),

    #[error("signature verification failed")]
    Signature,

    #[error("KEM failure: {0}")]
    Kem(String),

    #[error("key confirmation failed")]
    KeyConfirmation,

    #[error("cookie required or invalid")]
    CookieRejected,

    #[error("session binding failed: {0}")]
    Session(String),
}
