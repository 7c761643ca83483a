//! Authenticated encryption for the established channel.
//!
//! ChaCha20-Poly1305 (IETF, 96-bit nonce). Each direction of a session has
//! its own 32-byte key and 12-byte IV; the record nonce is the IV XORed with
//! a 64-bit big-endian sequence number in the trailing bytes, so ciphertexts
//! never repeat a nonce within a direction.
//!
//! Ciphertext wire format: [ ciphertext + tag ] — the nonce is implicit in
//! the record sequence.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;

/// Key material for one direction of the channel. Scrubbed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DirectionKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl DirectionKey {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }
}

/// Stateful cipher for one direction. Sequence numbers advance on every
/// successful seal/open; both ends MUST process records in order.
pub struct ChannelCipher {
    cipher: ChaCha20Poly1305,
    iv: [u8; IV_LEN],
    seq: u64,
}

impl ChannelCipher {
    pub fn new(direction: &DirectionKey) -> Result<Self, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&direction.key)
            .map_err(|_| CryptoError::InvalidKey("AEAD key must be 32 bytes".into()))?;
        Ok(Self {
            cipher,
            iv: direction.iv,
            seq: 0,
        })
    }

    fn nonce(&self) -> Nonce {
        let mut bytes = self.iv;
        let seq = self.seq.to_be_bytes();
        for (b, s) in bytes[IV_LEN - 8..].iter_mut().zip(seq.iter()) {
            *b ^= s;
        }
        Nonce::from(bytes)
    }

    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.seq == u64::MAX {
            return Err(CryptoError::AeadEncrypt);
        }
        let ciphertext = self
            .cipher
            .encrypt(&self.nonce(), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::AeadEncrypt)?;
        self.seq += 1;
        Ok(ciphertext)
    }

    pub fn open(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if self.seq == u64::MAX {
            return Err(CryptoError::AeadDecrypt);
        }
        let plaintext = self
            .cipher
            .decrypt(&self.nonce(), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::AeadDecrypt)?;
        self.seq += 1;
        Ok(Zeroizing::new(plaintext))
    }
}
