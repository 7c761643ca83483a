//! sage_crypto — cryptographic primitives for the SAGE handshake
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Comparisons over tags, pins, and hashes are constant-time.
//!
//! # Module layout
//! - `keys`     — long-term signing keypairs (Ed25519 / ECDSA secp256k1)
//! - `verifier` — pluggable signature verification strategies
//! - `hpke`     — HPKE Base-mode exporter derivation (X25519 + HKDF-SHA256)
//! - `ecdh`     — ephemeral X25519 exchange with all-zero rejection
//! - `kdf`      — HKDF wrappers, secret combiner, HMAC helpers
//! - `aead`     — ChaCha20-Poly1305 channel ciphers
//! - `error`    — unified error type

pub mod aead;
pub mod ecdh;
pub mod error;
pub mod hpke;
pub mod kdf;
pub mod keys;
pub mod verifier;

pub use error::CryptoError;
