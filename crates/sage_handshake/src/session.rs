//! Session binding: deterministic session ids, traffic-key split, and the
//! session manager seam.
//!
//! Both sides of a successful handshake derive the same `combined` secret
//! and therefore the same session id and traffic keys. Direction is decided
//! by role: the initiator writes with the c2s keys and reads with s2c; the
//! responder does the opposite.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use sage_crypto::aead::{ChannelCipher, DirectionKey, IV_LEN, KEY_LEN};
use sage_crypto::{kdf, CryptoError};

/// Session identifiers are 16 bytes, hex-encoded. The length is fixed so
/// ids stay stable across peers.
pub const SESSION_ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session creation failed: {0}")]
    Creation(String),

    #[error("key id is already bound to another session")]
    KidAlreadyBound,

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

/// Optional responder hook issuing deterministic key ids instead of the
/// default `"kid-" + UUID`.
pub trait KeyIdBinder: Send + Sync {
    fn issue_key_id(&self, session_id: &str) -> String;
}

// ── Key schedule ─────────────────────────────────────────────────────────────

/// Everything derived from the combined secret: both direction keys and the
/// channel-binding value exposed to higher layers.
pub struct SessionKeys {
    pub c2s: DirectionKey,
    pub s2c: DirectionKey,
    pub channel_binding: [u8; 32],
}

impl SessionKeys {
    pub fn derive(combined: &[u8; 32]) -> Result<Self, CryptoError> {
        let mut c2s_key = Zeroizing::new([0u8; KEY_LEN]);
        let mut c2s_iv = Zeroizing::new([0u8; IV_LEN]);
        let mut s2c_key = Zeroizing::new([0u8; KEY_LEN]);
        let mut s2c_iv = Zeroizing::new([0u8; IV_LEN]);
        let mut cb = [0u8; 32];

        kdf::expand_label(combined, "SAGE-c2s:key", c2s_key.as_mut_slice())?;
        kdf::expand_label(combined, "SAGE-c2s:iv", c2s_iv.as_mut_slice())?;
        kdf::expand_label(combined, "SAGE-s2c:key", s2c_key.as_mut_slice())?;
        kdf::expand_label(combined, "SAGE-s2c:iv", s2c_iv.as_mut_slice())?;
        kdf::expand_label(combined, "SAGE-cb-v1", &mut cb)?;

        Ok(Self {
            c2s: DirectionKey::new(*c2s_key, *c2s_iv),
            s2c: DirectionKey::new(*s2c_key, *s2c_iv),
            channel_binding: cb,
        })
    }
}

/// Deterministic session id from the combined secret under `label`.
pub fn derive_session_id(combined: &[u8; 32], label: &str) -> Result<String, CryptoError> {
    let mut id = [0u8; SESSION_ID_LEN];
    kdf::expand_label(combined, label, &mut id)?;
    let text = hex::encode(id);
    id.zeroize();
    Ok(text)
}

// ── Established session ──────────────────────────────────────────────────────

/// An established bidirectional channel. Owned by the session manager;
/// the handshake only constructs it.
pub struct Session {
    pub session_id: String,
    pub role: Role,
    pub peer_did: String,
    write: ChannelCipher,
    read: ChannelCipher,
    channel_binding: [u8; 32],
}

impl Session {
    pub fn new(
        session_id: String,
        role: Role,
        peer_did: String,
        keys: SessionKeys,
    ) -> Result<Self, CryptoError> {
        let SessionKeys {
            c2s,
            s2c,
            channel_binding,
        } = keys;
        let (write, read) = match role {
            Role::Initiator => (ChannelCipher::new(&c2s)?, ChannelCipher::new(&s2c)?),
            Role::Responder => (ChannelCipher::new(&s2c)?, ChannelCipher::new(&c2s)?),
        };
        Ok(Self {
            session_id,
            role,
            peer_did,
            write,
            read,
            channel_binding,
        })
    }

    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.write.seal(aad, plaintext)
    }

    pub fn open(
        &mut self,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.read.open(aad, ciphertext)
    }

    /// 32-byte channel-binding value for higher protocol layers.
    pub fn channel_binding(&self) -> &[u8; 32] {
        &self.channel_binding
    }
}

// ── Session manager seam ─────────────────────────────────────────────────────

pub type SessionHandle = Arc<Mutex<Session>>;

/// External collaborator owning session lifecycles. The handshake calls
/// `create_or_bind` exactly once per side and then binds the key id.
pub trait SessionManager: Send + Sync {
    /// Create (or return the existing) session for this combined secret and
    /// role. Idempotent per `(combined, role)`.
    fn create_or_bind(
        &self,
        combined: &[u8; 32],
        label: &str,
        role: Role,
        peer_did: &str,
    ) -> Result<(String, SessionHandle), SessionError>;

    /// Single-assignment binding from a key id to a session id. Rebinding
    /// the same pair is a no-op; binding an existing kid elsewhere fails.
    fn bind_key_id(&self, kid: &str, session_id: &str) -> Result<(), SessionError>;

    fn get_by_key_id(&self, kid: &str) -> Option<SessionHandle>;
}

/// In-memory manager, one per agent.
#[derive(Default)]
pub struct InMemorySessionManager {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    kids: Mutex<HashMap<String, String>>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(session_id).cloned()
    }
}

impl SessionManager for InMemorySessionManager {
    fn create_or_bind(
        &self,
        combined: &[u8; 32],
        label: &str,
        role: Role,
        peer_did: &str,
    ) -> Result<(String, SessionHandle), SessionError> {
        let session_id =
            derive_session_id(combined, label).map_err(|e| SessionError::Creation(e.to_string()))?;

        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&session_id) {
            if existing.lock().role != role {
                return Err(SessionError::Creation(
                    "session exists under a different role".into(),
                ));
            }
            return Ok((session_id, Arc::clone(existing)));
        }

        let keys =
            SessionKeys::derive(combined).map_err(|e| SessionError::Creation(e.to_string()))?;
        let session = Session::new(session_id.clone(), role, peer_did.to_string(), keys)
            .map_err(|e| SessionError::Creation(e.to_string()))?;
        let handle: SessionHandle = Arc::new(Mutex::new(session));
        sessions.insert(session_id.clone(), Arc::clone(&handle));
        Ok((session_id, handle))
    }

    fn bind_key_id(&self, kid: &str, session_id: &str) -> Result<(), SessionError> {
        if !self.sessions.lock().contains_key(session_id) {
            return Err(SessionError::UnknownSession(session_id.to_string()));
        }
        let mut kids = self.kids.lock();
        match kids.get(kid) {
            Some(bound) if bound == session_id => Ok(()),
            Some(_) => Err(SessionError::KidAlreadyBound),
            None => {
                kids.insert(kid.to_string(), session_id.to_string());
                Ok(())
            }
        }
    }

    fn get_by_key_id(&self, kid: &str) -> Option<SessionHandle> {
        let session_id = self.kids.lock().get(kid).cloned()?;
        self.get(&session_id)
    }
}
