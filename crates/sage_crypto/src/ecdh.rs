//! Ephemeral X25519 exchange mixed into the key schedule on top of HPKE.
//!
//! Each handshake generates a fresh keypair per side; the private half is
//! consumed by the DH computation so it cannot outlive the handshake.
//! All-zero outputs (low-order peer points) are rejected per RFC 7748 §6.1.

use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// One side's ephemeral DH keypair. The secret scrubs on drop.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: [u8; 32],
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public
    }

    /// Compute the shared secret with the peer's ephemeral public key,
    /// consuming the private half.
    pub fn diffie_hellman(self, peer: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));
        let out = Zeroizing::new(*shared.as_bytes());
        if bool::from(out.ct_eq(&[0u8; 32])) {
            return Err(CryptoError::ZeroSharedSecret);
        }
        Ok(out)
    }
}
