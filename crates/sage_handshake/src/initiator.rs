//! Initiator state machine.
//!
//! One handshake walks Start → Resolved → Sent → Verified → Bound; any
//! error is the Failed sink. [`Initiator::prepare`] covers everything up to
//! the wire send and returns the request plus a [`PendingHandshake`]
//! holding the in-flight secrets; [`Initiator::complete`] consumes the
//! pending state and the responder's bytes and either binds a session or
//! fails. Dropping a `PendingHandshake` (explicitly, or by cancelling the
//! driving future) scrubs the exporter and the ephemeral secret.
//!
//! Verification order on the response is fixed and matters:
//!   1. version/task (downgrade), 2. ack tag over the initiator's own
//!   transcript, 3. echo and hash checks, 4. responder signature + TOFU
//!   pin, 5. suite whitelist, 6. session binding.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use zeroize::Zeroizing;

use sage_crypto::ecdh::EphemeralKeyPair;
use sage_crypto::hpke;
use sage_crypto::kdf;
use sage_crypto::keys::SigningKeyPair;
use sage_crypto::verifier::{CompositeVerifier, SignatureVerifier};

use crate::config::HandshakeConfig;
use crate::cookie::CookieSource;
use crate::error::HandshakeError;
use crate::resolver::Resolver;
use crate::session::{Role, SessionManager};
use crate::transcript::{
    build_export_ctx, build_info, compute_ack_tag, sha256, verify_ack_tag, AckBinding,
    SESSION_ID_LABEL,
};
use crate::transport::Transport;
use crate::wire::{
    b64d, b64d_exact32, b64e, check_field_len, rfc3339_nanos, HandshakeRequest, InitPayload,
    ResponseEnvelope, COOKIE_METADATA_KEY, PROTOCOL_VERSION, ROLE_USER, TASK_HPKE_COMPLETE,
};

/// Outcome of a bound handshake.
#[derive(Debug, Clone)]
pub struct Established {
    pub kid: String,
    pub session_id: String,
}

/// In-flight state between send and response. Owns every secret of the
/// handshake; all of them scrub on drop.
pub struct PendingHandshake {
    ctx_id: String,
    peer_did: String,
    nonce: String,
    info: Vec<u8>,
    export_ctx: Vec<u8>,
    enc: [u8; 32],
    eph_c_pub: [u8; 32],
    exporter: Zeroizing<[u8; 32]>,
    ephemeral: Option<EphemeralKeyPair>,
}

impl std::fmt::Debug for PendingHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingHandshake")
            .field("ctx_id", &self.ctx_id)
            .field("peer_did", &self.peer_did)
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

pub struct Initiator {
    did: String,
    signing: SigningKeyPair,
    resolver: Arc<dyn Resolver>,
    sessions: Arc<dyn SessionManager>,
    verifier: CompositeVerifier,
    config: HandshakeConfig,
    cookie_source: Option<Arc<dyn CookieSource>>,
}

impl Initiator {
    pub fn new(
        did: impl Into<String>,
        signing: SigningKeyPair,
        resolver: Arc<dyn Resolver>,
        sessions: Arc<dyn SessionManager>,
        config: HandshakeConfig,
    ) -> Result<Self, HandshakeError> {
        config.validate()?;
        Ok(Self {
            did: did.into(),
            signing,
            resolver,
            sessions,
            verifier: CompositeVerifier::default(),
            config,
            cookie_source: None,
        })
    }

    pub fn with_cookie_source(mut self, source: Arc<dyn CookieSource>) -> Self {
        self.cookie_source = Some(source);
        self
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    /// Run the full handshake over `transport`. Returns the key id issued
    /// by the responder.
    pub async fn initiate(
        &self,
        transport: &dyn Transport,
        peer_did: &str,
        ctx_id: &str,
    ) -> Result<Established, HandshakeError> {
        let (request, pending) = self.prepare(peer_did, ctx_id).await?;
        let response = transport.round_trip(&request).await?;
        if response.is_empty() {
            return Err(HandshakeError::Transport("empty response".into()));
        }
        self.complete(pending, &response).await
    }

    /// Start → Resolved → Sent: resolve the peer's KEM key, derive the
    /// HPKE exporter, generate the ephemeral, and build the signed request.
    pub async fn prepare(
        &self,
        peer_did: &str,
        ctx_id: &str,
    ) -> Result<(HandshakeRequest, PendingHandshake), HandshakeError> {
        check_field_len("ctx", ctx_id)?;
        check_field_len("peer did", peer_did)?;

        let kem_pub = self.resolver.resolve_kem_key(peer_did).await?;

        let info = build_info(ctx_id, &self.did, peer_did);
        let export_ctx = build_export_ctx(ctx_id);
        let (enc, exporter) = hpke::sender_derive(&kem_pub, &info, &export_ctx)
            .map_err(|e| HandshakeError::Kem(e.to_string()))?;

        let ephemeral = EphemeralKeyPair::generate();
        let eph_c_pub = ephemeral.public_bytes();
        let nonce = Uuid::new_v4().to_string();

        let payload = InitPayload {
            init_did: self.did.clone(),
            resp_did: peer_did.to_string(),
            info: b64e(&info),
            export_ctx: b64e(&export_ctx),
            nonce: nonce.clone(),
            ts: rfc3339_nanos(Utc::now()),
            enc: b64e(&enc),
            eph_c: b64e(&eph_c_pub),
        };
        let payload_bytes = serde_json::to_vec(&payload)
            .map_err(|e| HandshakeError::InvalidInput(format!("payload serialise: {e}")))?;
        let signature = self
            .signing
            .sign(&payload_bytes)
            .map_err(|_| HandshakeError::Signature)?;

        let mut request = HandshakeRequest {
            id: Uuid::new_v4().to_string(),
            context_id: ctx_id.to_string(),
            task_id: TASK_HPKE_COMPLETE.to_string(),
            did: self.did.clone(),
            payload: payload_bytes,
            signature,
            role: ROLE_USER.to_string(),
            metadata: Default::default(),
        };
        if let Some(source) = &self.cookie_source {
            if let Some(cookie) = source.cookie_for(ctx_id, &self.did, peer_did) {
                request
                    .metadata
                    .insert(COOKIE_METADATA_KEY.to_string(), cookie);
            }
        }

        tracing::debug!(ctx = %ctx_id, peer = %peer_did, "handshake request prepared");

        let pending = PendingHandshake {
            ctx_id: ctx_id.to_string(),
            peer_did: peer_did.to_string(),
            nonce,
            info,
            export_ctx,
            enc,
            eph_c_pub,
            exporter,
            ephemeral: Some(ephemeral),
        };
        Ok((request, pending))
    }

    /// Sent → Verified → Bound: verify the responder's envelope against the
    /// pending transcript and bind the session.
    pub async fn complete(
        &self,
        mut pending: PendingHandshake,
        response: &[u8],
    ) -> Result<Established, HandshakeError> {
        let envelope: ResponseEnvelope = serde_json::from_slice(response)
            .map_err(|e| HandshakeError::InvalidInput(format!("envelope parse: {e}")))?;

        // Downgrade checks come before any cryptography.
        if envelope.v != PROTOCOL_VERSION {
            return Err(HandshakeError::ProtocolVersion(format!("v={}", envelope.v)));
        }
        if envelope.task != TASK_HPKE_COMPLETE {
            return Err(HandshakeError::ProtocolVersion(format!(
                "task={}",
                envelope.task
            )));
        }
        if envelope.ctx != pending.ctx_id {
            return Err(HandshakeError::TranscriptMismatch("ctx".into()));
        }
        if envelope.did != pending.peer_did {
            return Err(HandshakeError::InvalidInput("responder did mismatch".into()));
        }
        check_field_len("kid", &envelope.kid)?;

        let eph_s = b64d_exact32(&envelope.eph_s)?;
        let ack_tag = b64d_exact32(&envelope.ack_tag_b64)?;
        let info_hash = b64d_exact32(&envelope.info_hash)?;
        let export_ctx_hash = b64d_exact32(&envelope.export_ctx_hash)?;

        // E2E shared secret; consuming the ephemeral scrubs its private half.
        let ephemeral = pending
            .ephemeral
            .take()
            .ok_or_else(|| HandshakeError::InvalidInput("pending state already used".into()))?;
        let ss_e2e = ephemeral
            .diffie_hellman(&eph_s)
            .map_err(|e| HandshakeError::Kem(e.to_string()))?;

        let combined = kdf::combine(&pending.exporter, &ss_e2e, &pending.export_ctx)
            .map_err(|e| HandshakeError::Kem(e.to_string()))?;
        drop(ss_e2e);

        // Key confirmation FIRST, over the transcript this side built, not
        // the responder's echoes.
        let binding = AckBinding {
            info: &pending.info,
            export_ctx: &pending.export_ctx,
            enc: &pending.enc,
            eph_c: &pending.eph_c_pub,
            eph_s: &eph_s,
            init_did: &self.did,
            resp_did: &pending.peer_did,
        };
        let expected_tag = compute_ack_tag(
            &combined,
            &pending.ctx_id,
            &pending.nonce,
            &envelope.kid,
            &binding,
        )
        .map_err(|e| HandshakeError::Kem(e.to_string()))?;
        if !verify_ack_tag(&expected_tag, &ack_tag) {
            return Err(HandshakeError::KeyConfirmation);
        }

        // Echo integrity: enc and ephC verbatim, transcript hashes match.
        let enc_echo = b64d_exact32(&envelope.enc)?;
        let eph_c_echo = b64d_exact32(&envelope.eph_c)?;
        if !kdf::ct_eq(&enc_echo, &pending.enc) || !kdf::ct_eq(&eph_c_echo, &pending.eph_c_pub) {
            return Err(HandshakeError::TranscriptMismatch("enc/ephC echo".into()));
        }
        if !kdf::ct_eq(&sha256(&pending.info), &info_hash)
            || !kdf::ct_eq(&sha256(&pending.export_ctx), &export_ctx_hash)
        {
            return Err(HandshakeError::TranscriptMismatch(
                "info/exportCtx hash".into(),
            ));
        }

        // Responder identity: canonical envelope signature plus TOFU pin.
        let signing_bytes = envelope.signing_bytes()?;
        let signing_key = self.resolver.resolve_public_key(&envelope.did).await?;
        if let Some(pin) = self.config.tofu_pins.get(&envelope.did) {
            if !signing_key.matches(pin) {
                return Err(HandshakeError::Signature);
            }
        }
        let signature = b64d(&envelope.sig_b64)?;
        self.verifier
            .verify(&signing_bytes, &signature, &signing_key)
            .map_err(|_| HandshakeError::Signature)?;

        if !self.config.suite_allowed() {
            return Err(HandshakeError::ProtocolVersion("suite not allowed".into()));
        }

        let (session_id, _handle) = self
            .sessions
            .create_or_bind(&combined, SESSION_ID_LABEL, Role::Initiator, &pending.peer_did)
            .map_err(|e| HandshakeError::Session(e.to_string()))?;
        self.sessions
            .bind_key_id(&envelope.kid, &session_id)
            .map_err(|e| HandshakeError::Session(e.to_string()))?;

        tracing::debug!(ctx = %pending.ctx_id, kid = %envelope.kid, "handshake bound");
        Ok(Established {
            kid: envelope.kid,
            session_id,
        })
    }
}
