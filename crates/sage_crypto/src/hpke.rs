//! HPKE Base-mode wrappers (DHKEM X25519, HKDF-SHA256).
//!
//! The handshake never uses HPKE seal/open; both sides only derive a 32-byte
//! exporter secret bound to `info` and an exporter context. The sender side
//! yields the 32-byte encapsulation to put on the wire, the recipient
//! reproduces the exporter from it with the long-lived KEM private key.

use hpke::aead::ChaCha20Poly1305;
use hpke::kdf::HkdfSha256;
use hpke::kem::X25519HkdfSha256;
use hpke::{setup_receiver, setup_sender, Deserializable, Kem, OpModeR, OpModeS, Serializable};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

type HpkeKem = X25519HkdfSha256;

/// X25519 encapsulations and public keys are 32 bytes.
pub const ENC_LEN: usize = 32;
/// Exporter secrets requested by the handshake are 32 bytes.
pub const EXPORTER_LEN: usize = 32;

// ── KEM keys ─────────────────────────────────────────────────────────────────

/// A peer's long-lived KEM public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KemPublicKey([u8; ENC_LEN]);

impl KemPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; ENC_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("KEM public key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ENC_LEN] {
        &self.0
    }
}

/// Long-lived KEM keypair held by a responder. The private half scrubs
/// itself on drop inside the hpke crate.
pub struct KemKeyPair {
    secret: <HpkeKem as Kem>::PrivateKey,
    public: KemPublicKey,
}

impl KemKeyPair {
    pub fn generate() -> Self {
        let (secret, public) = HpkeKem::gen_keypair(&mut OsRng);
        let mut arr = [0u8; ENC_LEN];
        arr.copy_from_slice(&public.to_bytes());
        Self {
            secret,
            public: KemPublicKey(arr),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = <HpkeKem as Kem>::PrivateKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = HpkeKem::sk_to_pk(&secret);
        let mut arr = [0u8; ENC_LEN];
        arr.copy_from_slice(&public.to_bytes());
        Ok(Self {
            secret,
            public: KemPublicKey(arr),
        })
    }

    pub fn public(&self) -> &KemPublicKey {
        &self.public
    }
}

// ── Exporter derivation ──────────────────────────────────────────────────────

/// Sender side: encapsulate to `peer` under `info` and export
/// [`EXPORTER_LEN`] bytes bound to `export_ctx`.
pub fn sender_derive(
    peer: &KemPublicKey,
    info: &[u8],
    export_ctx: &[u8],
) -> Result<([u8; ENC_LEN], Zeroizing<[u8; EXPORTER_LEN]>), CryptoError> {
    let pk = <HpkeKem as Kem>::PublicKey::from_bytes(peer.as_bytes())
        .map_err(|e| CryptoError::Kem(e.to_string()))?;
    let (encapped, ctx) = setup_sender::<ChaCha20Poly1305, HkdfSha256, HpkeKem, _>(
        &OpModeS::Base,
        &pk,
        info,
        &mut OsRng,
    )
    .map_err(|e| CryptoError::Kem(e.to_string()))?;

    let mut exporter = Zeroizing::new([0u8; EXPORTER_LEN]);
    ctx.export(export_ctx, exporter.as_mut_slice())
        .map_err(|e| CryptoError::Kem(e.to_string()))?;

    let mut enc = [0u8; ENC_LEN];
    enc.copy_from_slice(&encapped.to_bytes());
    Ok((enc, exporter))
}

/// Recipient side: reproduce the exporter from the wire encapsulation with
/// the long-lived KEM private key.
pub fn recipient_derive(
    keypair: &KemKeyPair,
    enc: &[u8; ENC_LEN],
    info: &[u8],
    export_ctx: &[u8],
) -> Result<Zeroizing<[u8; EXPORTER_LEN]>, CryptoError> {
    let encapped = <HpkeKem as Kem>::EncappedKey::from_bytes(enc)
        .map_err(|e| CryptoError::Kem(e.to_string()))?;
    let ctx = setup_receiver::<ChaCha20Poly1305, HkdfSha256, HpkeKem>(
        &OpModeR::Base,
        &keypair.secret,
        &encapped,
        info,
    )
    .map_err(|e| CryptoError::Kem(e.to_string()))?;

    let mut exporter = Zeroizing::new([0u8; EXPORTER_LEN]);
    ctx.export(export_ctx, exporter.as_mut_slice())
        .map_err(|e| CryptoError::Kem(e.to_string()))?;
    Ok(exporter)
}
