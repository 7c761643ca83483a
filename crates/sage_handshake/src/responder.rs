//! Responder state machine.
//!
//! One request walks Start → Validated → Derived → SessionBound → Signed;
//! any error is the Rejected sink. The responder itself is stateless across
//! handshakes except for the replay store, so a single instance serves
//! concurrent initiators through `&self`.
//!
//! The cookie hook (when configured) runs before the first KEM private-key
//! operation; signature and envelope validation come before that per the
//! wire contract, replay marking is atomic.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use sage_crypto::ecdh::EphemeralKeyPair;
use sage_crypto::hpke::{self, KemKeyPair};
use sage_crypto::kdf;
use sage_crypto::keys::SigningKeyPair;
use sage_crypto::verifier::{CompositeVerifier, SignatureVerifier};

use crate::config::HandshakeConfig;
use crate::cookie::CookieVerifier;
use crate::error::HandshakeError;
use crate::replay::NonceCache;
use crate::resolver::Resolver;
use crate::session::{KeyIdBinder, Role, SessionManager};
use crate::transcript::{
    build_export_ctx, build_info, compute_ack_tag, sha256, AckBinding, SESSION_ID_LABEL,
};
use crate::wire::{
    b64d, b64d_exact32, b64e, check_field_len, parse_rfc3339, rfc3339_nanos, HandshakeRequest,
    InitPayload, ResponseEnvelope, COOKIE_METADATA_KEY, PROTOCOL_VERSION, TASK_HPKE_COMPLETE,
};

pub struct Responder {
    did: String,
    signing: SigningKeyPair,
    kem: KemKeyPair,
    resolver: Arc<dyn Resolver>,
    sessions: Arc<dyn SessionManager>,
    verifier: CompositeVerifier,
    config: HandshakeConfig,
    replay: NonceCache,
    cookie_verifier: Option<Arc<dyn CookieVerifier>>,
    key_id_binder: Option<Arc<dyn KeyIdBinder>>,
}

impl Responder {
    pub fn new(
        did: impl Into<String>,
        signing: SigningKeyPair,
        kem: KemKeyPair,
        resolver: Arc<dyn Resolver>,
        sessions: Arc<dyn SessionManager>,
        config: HandshakeConfig,
    ) -> Result<Self, HandshakeError> {
        config.validate()?;
        let replay = NonceCache::new(config.nonce_ttl);
        Ok(Self {
            did: did.into(),
            signing,
            kem,
            resolver,
            sessions,
            verifier: CompositeVerifier::default(),
            config,
            replay,
            cookie_verifier: None,
            key_id_binder: None,
        })
    }

    pub fn with_cookie_verifier(mut self, verifier: Arc<dyn CookieVerifier>) -> Self {
        self.cookie_verifier = Some(verifier);
        self
    }

    pub fn with_key_id_binder(mut self, binder: Arc<dyn KeyIdBinder>) -> Self {
        self.key_id_binder = Some(binder);
        self
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    /// Handle one handshake request, returning the serialized signed
    /// response envelope.
    pub async fn respond(&self, request: &HandshakeRequest) -> Result<Vec<u8>, HandshakeError> {
        // Basic shape before touching any cryptography.
        if request.payload.is_empty() {
            return Err(HandshakeError::InvalidInput("empty payload".into()));
        }
        if request.task_id != TASK_HPKE_COMPLETE {
            return Err(HandshakeError::ProtocolVersion(format!(
                "task={}",
                request.task_id
            )));
        }
        if !self.config.suite_allowed() {
            return Err(HandshakeError::ProtocolVersion("suite not allowed".into()));
        }
        check_field_len("ctx", &request.context_id)?;
        check_field_len("did", &request.did)?;

        // Initiator signature over the exact payload bytes.
        let initiator_key = self.resolver.resolve_public_key(&request.did).await?;
        self.verifier
            .verify(&request.payload, &request.signature, &initiator_key)
            .map_err(|_| HandshakeError::Signature)?;

        // Strict payload parse.
        let payload: InitPayload = serde_json::from_slice(&request.payload)
            .map_err(|e| HandshakeError::InvalidInput(format!("payload parse: {e}")))?;
        check_field_len("initDid", &payload.init_did)?;
        check_field_len("respDid", &payload.resp_did)?;
        check_field_len("nonce", &payload.nonce)?;
        let enc = b64d_exact32(&payload.enc)?;
        let eph_c = b64d_exact32(&payload.eph_c)?;
        let info_wire = b64d(&payload.info)?;
        let export_ctx_wire = b64d(&payload.export_ctx)?;

        // DoS cookie, before any KEM private-key work.
        if let Some(cookie_verifier) = &self.cookie_verifier {
            let valid = request
                .metadata
                .get(COOKIE_METADATA_KEY)
                .map(|cookie| {
                    cookie_verifier.verify(
                        cookie,
                        &request.context_id,
                        &payload.init_did,
                        &payload.resp_did,
                    )
                })
                .unwrap_or(false);
            if !valid {
                tracing::warn!(ctx = %request.context_id, "handshake rejected: cookie");
                return Err(HandshakeError::CookieRejected);
            }
        }

        // Envelope constraints.
        if request.did != payload.init_did {
            return Err(HandshakeError::InvalidInput(
                "envelope did does not match payload initDid".into(),
            ));
        }
        if payload.resp_did != self.did {
            return Err(HandshakeError::InvalidInput(
                "payload respDid does not address this responder".into(),
            ));
        }
        let ts = parse_rfc3339(&payload.ts)?;
        let skew = Utc::now().signed_duration_since(ts);
        if skew > self.config.max_skew || -skew > self.config.max_skew {
            return Err(HandshakeError::TimestampOutOfWindow);
        }
        if !self.replay.check_and_mark(&request.context_id, &payload.nonce) {
            tracing::warn!(ctx = %request.context_id, "handshake rejected: replay");
            return Err(HandshakeError::ReplayDetected);
        }

        // Both sides must agree on the transcript byte-for-byte.
        let info = build_info(&request.context_id, &payload.init_did, &payload.resp_did);
        let export_ctx = build_export_ctx(&request.context_id);
        if info != info_wire || export_ctx != export_ctx_wire {
            return Err(HandshakeError::TranscriptMismatch(
                "info/exportCtx mismatch".into(),
            ));
        }

        // Reproduce the HPKE exporter with the long-lived KEM key.
        let exporter = hpke::recipient_derive(&self.kem, &enc, &info, &export_ctx)
            .map_err(|e| HandshakeError::Kem(e.to_string()))?;

        // Ephemeral DH; the private half is consumed by the computation.
        let ephemeral = EphemeralKeyPair::generate();
        let eph_s_pub = ephemeral.public_bytes();
        let ss_e2e = ephemeral
            .diffie_hellman(&eph_c)
            .map_err(|e| HandshakeError::Kem(e.to_string()))?;

        let combined = kdf::combine(&exporter, &ss_e2e, &export_ctx)
            .map_err(|e| HandshakeError::Kem(e.to_string()))?;
        drop(exporter);
        drop(ss_e2e);

        // Session plus key id.
        let (session_id, _handle) = self
            .sessions
            .create_or_bind(&combined, SESSION_ID_LABEL, Role::Responder, &payload.init_did)
            .map_err(|e| HandshakeError::Session(e.to_string()))?;
        let kid = match &self.key_id_binder {
            Some(binder) => binder.issue_key_id(&session_id),
            None => format!("kid-{}", Uuid::new_v4()),
        };
        self.sessions
            .bind_key_id(&kid, &session_id)
            .map_err(|e| HandshakeError::Session(e.to_string()))?;

        // Key confirmation tag over the full binding list.
        let binding = AckBinding {
            info: &info,
            export_ctx: &export_ctx,
            enc: &enc,
            eph_c: &eph_c,
            eph_s: &eph_s_pub,
            init_did: &payload.init_did,
            resp_did: &payload.resp_did,
        };
        let ack_tag = compute_ack_tag(
            &combined,
            &request.context_id,
            &payload.nonce,
            &kid,
            &binding,
        )
        .map_err(|e| HandshakeError::Kem(e.to_string()))?;
        drop(combined);

        // Canonical envelope, signed without the signature field.
        let mut envelope = ResponseEnvelope {
            v: PROTOCOL_VERSION.to_string(),
            task: TASK_HPKE_COMPLETE.to_string(),
            ctx: request.context_id.clone(),
            kid: kid.clone(),
            eph_s: b64e(&eph_s_pub),
            ack_tag_b64: b64e(&ack_tag),
            ts: rfc3339_nanos(Utc::now()),
            did: self.did.clone(),
            info_hash: b64e(&sha256(&info)),
            export_ctx_hash: b64e(&sha256(&export_ctx)),
            enc: payload.enc.clone(),
            eph_c: payload.eph_c.clone(),
            sig_b64: String::new(),
        };
        let signing_bytes = envelope.signing_bytes()?;
        let signature = self
            .signing
            .sign(&signing_bytes)
            .map_err(|_| HandshakeError::Signature)?;
        envelope.sig_b64 = b64e(&signature);

        tracing::debug!(ctx = %request.context_id, kid = %kid, "handshake accepted");
        serde_json::to_vec(&envelope)
            .map_err(|e| HandshakeError::InvalidInput(format!("envelope serialise: {e}")))
    }
}
