use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("unsupported public key type")]
    UnsupportedKeyType,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("KEM operation failed: {0}")]
    Kem(String),

    #[error("invalid ECDH (all-zero)")]
    ZeroSharedSecret,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AeadDecrypt,

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
