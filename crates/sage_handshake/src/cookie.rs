//! DoS cookie hooks.
//!
//! When a [`CookieVerifier`] is configured on the responder, it is
//! consulted before any KEM private-key operation; a missing or invalid
//! cookie rejects the handshake early. Initiators attach cookies through a
//! [`CookieSource`] into the request metadata.
//!
//! The HMAC token policy below is the stock implementation; heavier
//! policies (proof-of-work and the like) plug into the same traits.

use sage_crypto::kdf;

/// Responder-side hook. Returning `false` rejects the handshake before any
/// expensive cryptography runs.
pub trait CookieVerifier: Send + Sync {
    fn verify(&self, cookie: &str, ctx_id: &str, init_did: &str, resp_did: &str) -> bool;
}

/// Initiator-side hook producing the cookie to attach, if any.
pub trait CookieSource: Send + Sync {
    fn cookie_for(&self, ctx_id: &str, init_did: &str, resp_did: &str) -> Option<String>;
}

/// Stateless HMAC token over `(ctx_id, init_did, resp_did)` under a shared
/// secret. One value implements both ends so tests and deployments can hand
/// the same policy to both sides.
pub struct HmacCookiePolicy {
    secret: [u8; 32],
}

impl HmacCookiePolicy {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    fn token(&self, ctx_id: &str, init_did: &str, resp_did: &str) -> Option<[u8; 32]> {
        let msg = format!("SAGE-cookie-v1|{ctx_id}|{init_did}|{resp_did}");
        kdf::hmac_sha256(&self.secret, msg.as_bytes()).ok()
    }
}

impl CookieSource for HmacCookiePolicy {
    fn cookie_for(&self, ctx_id: &str, init_did: &str, resp_did: &str) -> Option<String> {
        self.token(ctx_id, init_did, resp_did)
            .map(|tag| crate::wire::b64e(&tag))
    }
}

impl CookieVerifier for HmacCookiePolicy {
    fn verify(&self, cookie: &str, ctx_id: &str, init_did: &str, resp_did: &str) -> bool {
        let (Some(expected), Ok(received)) = (
            self.token(ctx_id, init_did, resp_did),
            crate::wire::b64d(cookie),
        ) else {
            return false;
        };
        kdf::ct_eq(&expected, &received)
    }
}
