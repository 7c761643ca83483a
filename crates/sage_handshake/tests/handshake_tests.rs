//! End-to-end handshake scenarios: honest round trips, tampering, replay,
//! downgrade, cookies, and pinning. The transport is in-process; the
//! tampering transport rewrites the response envelope between the two
//! state machines.

use std::sync::Arc;

use async_trait::async_trait;

use sage_crypto::hpke::KemKeyPair;
use sage_crypto::keys::SigningKeyPair;
use sage_handshake::config::HandshakeConfig;
use sage_handshake::cookie::HmacCookiePolicy;
use sage_handshake::error::HandshakeError;
use sage_handshake::initiator::Initiator;
use sage_handshake::resolver::{AgentMetadata, Resolver, ResolverError, StaticResolver};
use sage_handshake::responder::Responder;
use sage_handshake::session::{InMemorySessionManager, KeyIdBinder, SessionManager};
use sage_handshake::transport::Transport;
use sage_handshake::wire::{b64d, b64e, HandshakeRequest, ResponseEnvelope};

const ALICE: &str = "did:sage:test:alice";
const BOB: &str = "did:sage:test:bob";

struct TestBed {
    initiator: Initiator,
    responder: Arc<Responder>,
    alice_sessions: Arc<InMemorySessionManager>,
    bob_sessions: Arc<InMemorySessionManager>,
}

struct TestBedOptions {
    /// Signing key the resolver advertises for Bob; `None` means the one
    /// Bob actually signs with.
    advertised_bob_signing: Option<SigningKeyPair>,
    /// KEM key the resolver advertises for Bob; `None` means Bob's real one.
    advertised_bob_kem: Option<KemKeyPair>,
    initiator_config: HandshakeConfig,
    responder_config: HandshakeConfig,
    /// Pin the initiator to Bob's genuine signing key.
    pin_real_bob_key: bool,
    initiator_cookie_secret: Option<[u8; 32]>,
    responder_cookie_secret: Option<[u8; 32]>,
    key_id_binder: Option<Arc<dyn KeyIdBinder>>,
    secp256k1: bool,
}

impl Default for TestBedOptions {
    fn default() -> Self {
        Self {
            advertised_bob_signing: None,
            advertised_bob_kem: None,
            initiator_config: HandshakeConfig::default(),
            responder_config: HandshakeConfig::default(),
            pin_real_bob_key: false,
            initiator_cookie_secret: None,
            responder_cookie_secret: None,
            key_id_binder: None,
            secp256k1: false,
        }
    }
}

fn generate_signing(secp256k1: bool) -> SigningKeyPair {
    if secp256k1 {
        SigningKeyPair::generate_secp256k1()
    } else {
        SigningKeyPair::generate_ed25519()
    }
}

fn build(options: TestBedOptions) -> TestBed {
    let alice_signing = generate_signing(options.secp256k1);
    let bob_signing = generate_signing(options.secp256k1);
    let bob_kem = KemKeyPair::generate();

    let advertised_signing = options
        .advertised_bob_signing
        .as_ref()
        .unwrap_or(&bob_signing)
        .public();
    let advertised_kem = options
        .advertised_bob_kem
        .as_ref()
        .unwrap_or(&bob_kem)
        .public()
        .clone();

    let mut initiator_config = options.initiator_config;
    if options.pin_real_bob_key {
        initiator_config
            .tofu_pins
            .insert(BOB.to_string(), bob_signing.public().as_bytes().to_vec());
    }

    let mut resolver = StaticResolver::new();
    resolver.register(AgentMetadata {
        did: ALICE.to_string(),
        is_active: true,
        signing_pub: alice_signing.public(),
        kem_pub: KemKeyPair::generate().public().clone(),
    });
    resolver.register(AgentMetadata {
        did: BOB.to_string(),
        is_active: true,
        signing_pub: advertised_signing,
        kem_pub: advertised_kem,
    });
    let resolver: Arc<StaticResolver> = Arc::new(resolver);

    let alice_sessions = Arc::new(InMemorySessionManager::new());
    let bob_sessions = Arc::new(InMemorySessionManager::new());

    let mut initiator = Initiator::new(
        ALICE,
        alice_signing,
        Arc::clone(&resolver) as Arc<dyn Resolver>,
        Arc::clone(&alice_sessions) as Arc<dyn SessionManager>,
        initiator_config,
    )
    .unwrap();
    if let Some(secret) = options.initiator_cookie_secret {
        initiator = initiator.with_cookie_source(Arc::new(HmacCookiePolicy::new(secret)));
    }

    let mut responder = Responder::new(
        BOB,
        bob_signing,
        bob_kem,
        Arc::clone(&resolver) as Arc<dyn Resolver>,
        Arc::clone(&bob_sessions) as Arc<dyn SessionManager>,
        options.responder_config,
    )
    .unwrap();
    if let Some(secret) = options.responder_cookie_secret {
        responder = responder.with_cookie_verifier(Arc::new(HmacCookiePolicy::new(secret)));
    }
    if let Some(binder) = options.key_id_binder {
        responder = responder.with_key_id_binder(binder);
    }

    TestBed {
        initiator,
        responder: Arc::new(responder),
        alice_sessions,
        bob_sessions,
    }
}

// ── Transports ───────────────────────────────────────────────────────────────

struct DirectTransport {
    responder: Arc<Responder>,
}

#[async_trait]
impl Transport for DirectTransport {
    async fn round_trip(&self, request: &HandshakeRequest) -> Result<Vec<u8>, HandshakeError> {
        self.responder.respond(request).await
    }
}

type TamperFn = dyn Fn(ResponseEnvelope) -> ResponseEnvelope + Send + Sync;

struct TamperTransport {
    responder: Arc<Responder>,
    tamper: Box<TamperFn>,
}

#[async_trait]
impl Transport for TamperTransport {
    async fn round_trip(&self, request: &HandshakeRequest) -> Result<Vec<u8>, HandshakeError> {
        let bytes = self.responder.respond(request).await?;
        let envelope: ResponseEnvelope = serde_json::from_slice(&bytes).unwrap();
        let tampered = (self.tamper)(envelope);
        Ok(serde_json::to_vec(&tampered).unwrap())
    }
}

fn direct(bed: &TestBed) -> DirectTransport {
    DirectTransport {
        responder: Arc::clone(&bed.responder),
    }
}

fn tampering(bed: &TestBed, tamper: Box<TamperFn>) -> TamperTransport {
    TamperTransport {
        responder: Arc::clone(&bed.responder),
        tamper,
    }
}

// ── Happy paths ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_establishes_matching_channels() {
    let bed = build(TestBedOptions::default());
    let transport = direct(&bed);

    let established = bed
        .initiator
        .initiate(&transport, BOB, "ctx-0001")
        .await
        .unwrap();
    assert!(established.kid.starts_with("kid-"));

    let alice_session = bed.alice_sessions.get_by_key_id(&established.kid).unwrap();
    let bob_session = bed.bob_sessions.get_by_key_id(&established.kid).unwrap();
    assert_eq!(
        alice_session.lock().session_id,
        bob_session.lock().session_id
    );
    assert_eq!(
        alice_session.lock().channel_binding(),
        bob_session.lock().channel_binding()
    );

    // Initiator → responder.
    let plaintext = br#"{"op":"ping","ts":1}"#;
    let ct = alice_session.lock().seal(b"", plaintext).unwrap();
    assert!(!ct.is_empty());
    assert_ne!(&ct[..], &plaintext[..]);
    assert_eq!(&*bob_session.lock().open(b"", &ct).unwrap(), plaintext);

    // Responder → initiator.
    let ct = bob_session.lock().seal(b"", b"pong").unwrap();
    assert_eq!(&*alice_session.lock().open(b"", &ct).unwrap(), b"pong");
}

#[tokio::test]
async fn happy_path_with_secp256k1_identities() {
    let bed = build(TestBedOptions {
        secp256k1: true,
        ..Default::default()
    });
    let transport = direct(&bed);
    let established = bed
        .initiator
        .initiate(&transport, BOB, "ctx-k256")
        .await
        .unwrap();
    assert!(bed.bob_sessions.get_by_key_id(&established.kid).is_some());
}

#[tokio::test]
async fn split_prepare_complete_drives_the_same_handshake() {
    let bed = build(TestBedOptions::default());
    let (request, pending) = bed.initiator.prepare(BOB, "ctx-split").await.unwrap();
    let response = bed.responder.respond(&request).await.unwrap();
    let established = bed.initiator.complete(pending, &response).await.unwrap();
    assert!(bed.alice_sessions.get_by_key_id(&established.kid).is_some());
}

// ── Key confirmation and identity binding ────────────────────────────────────

#[tokio::test]
async fn wrong_peer_kem_fails_key_confirmation() {
    // The resolver hands Alice an attacker's KEM key for Bob. The responder
    // derives a different exporter, so the ack tag cannot match; signature
    // verification is never reached.
    let bed = build(TestBedOptions {
        advertised_bob_kem: Some(KemKeyPair::generate()),
        ..Default::default()
    });
    let err = bed
        .initiator
        .initiate(&direct(&bed), BOB, "ctx-s2")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::KeyConfirmation), "{err}");
}

#[tokio::test]
async fn wrong_signing_key_fails_signature() {
    // KEM key is genuine, so key confirmation passes; the advertised
    // signing key is someone else's, so the envelope signature fails.
    let bed = build(TestBedOptions {
        advertised_bob_signing: Some(SigningKeyPair::generate_ed25519()),
        ..Default::default()
    });
    let err = bed
        .initiator
        .initiate(&direct(&bed), BOB, "ctx-s3")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Signature), "{err}");
}

#[tokio::test]
async fn tampered_ephs_fails_key_confirmation() {
    let bed = build(TestBedOptions::default());
    let transport = tampering(
        &bed,
        Box::new(|mut envelope| {
            let mut eph_s = b64d(&envelope.eph_s).unwrap();
            eph_s[7] ^= 0x01;
            envelope.eph_s = b64e(&eph_s);
            envelope
        }),
    );
    let err = bed
        .initiator
        .initiate(&transport, BOB, "ctx-s4")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::KeyConfirmation), "{err}");
}

#[tokio::test]
async fn tampered_ack_tag_fails_key_confirmation() {
    let bed = build(TestBedOptions::default());
    let transport = tampering(
        &bed,
        Box::new(|mut envelope| {
            let mut tag = b64d(&envelope.ack_tag_b64).unwrap();
            tag[0] ^= 0x80;
            envelope.ack_tag_b64 = b64e(&tag);
            envelope
        }),
    );
    let err = bed
        .initiator
        .initiate(&transport, BOB, "ctx-ack")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::KeyConfirmation), "{err}");
}

#[tokio::test]
async fn all_zero_ephs_is_a_kem_error() {
    let bed = build(TestBedOptions::default());
    let transport = tampering(
        &bed,
        Box::new(|mut envelope| {
            envelope.eph_s = b64e(&[0u8; 32]);
            envelope
        }),
    );
    let err = bed
        .initiator
        .initiate(&transport, BOB, "ctx-zero")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Kem(_)), "{err}");
}

#[tokio::test]
async fn tofu_pin_mismatch_fails_before_session_creation() {
    let stranger = SigningKeyPair::generate_ed25519();
    let mut config = HandshakeConfig::default();
    config
        .tofu_pins
        .insert(BOB.to_string(), stranger.public().as_bytes().to_vec());
    let bed = build(TestBedOptions {
        initiator_config: config,
        ..Default::default()
    });
    let err = bed
        .initiator
        .initiate(&direct(&bed), BOB, "ctx-pin")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Signature), "{err}");
}

#[tokio::test]
async fn matching_tofu_pin_succeeds() {
    let bed = build(TestBedOptions {
        pin_real_bob_key: true,
        ..Default::default()
    });
    bed.initiator
        .initiate(&direct(&bed), BOB, "ctx-pin-ok")
        .await
        .unwrap();
}

// ── Downgrade and echo integrity ─────────────────────────────────────────────

#[tokio::test]
async fn downgraded_version_is_rejected() {
    let bed = build(TestBedOptions::default());
    let transport = tampering(
        &bed,
        Box::new(|mut envelope| {
            envelope.v = "v0".into();
            envelope
        }),
    );
    let err = bed
        .initiator
        .initiate(&transport, BOB, "ctx-s5")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::ProtocolVersion(_)), "{err}");
}

#[tokio::test]
async fn downgraded_task_is_rejected() {
    let bed = build(TestBedOptions::default());
    let transport = tampering(
        &bed,
        Box::new(|mut envelope| {
            envelope.task = "hpke/complete@v0".into();
            envelope
        }),
    );
    let err = bed
        .initiator
        .initiate(&transport, BOB, "ctx-task")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::ProtocolVersion(_)), "{err}");
}

#[tokio::test]
async fn tampered_enc_echo_is_a_transcript_mismatch() {
    let bed = build(TestBedOptions::default());
    let transport = tampering(
        &bed,
        Box::new(|mut envelope| {
            let mut enc = b64d(&envelope.enc).unwrap();
            enc[0] ^= 0x01;
            envelope.enc = b64e(&enc);
            envelope
        }),
    );
    let err = bed
        .initiator
        .initiate(&transport, BOB, "ctx-echo")
        .await
        .unwrap_err();
    // The echo check runs before signature verification, so the failure is
    // a transcript mismatch rather than a signature error.
    assert!(matches!(err, HandshakeError::TranscriptMismatch(_)), "{err}");
}

#[tokio::test]
async fn tampered_info_hash_is_rejected() {
    let bed = build(TestBedOptions::default());
    let transport = tampering(
        &bed,
        Box::new(|mut envelope| {
            let mut hash = b64d(&envelope.info_hash).unwrap();
            hash[31] ^= 0x10;
            envelope.info_hash = b64e(&hash);
            envelope
        }),
    );
    let err = bed
        .initiator
        .initiate(&transport, BOB, "ctx-hash")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::TranscriptMismatch(_)), "{err}");
}

// ── Replay ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn replayed_init_message_is_rejected() {
    let bed = build(TestBedOptions::default());
    let (request, pending) = bed.initiator.prepare(BOB, "ctx-s6").await.unwrap();

    let response = bed.responder.respond(&request).await.unwrap();
    bed.initiator.complete(pending, &response).await.unwrap();

    let err = bed.responder.respond(&request).await.unwrap_err();
    assert!(matches!(err, HandshakeError::ReplayDetected), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replays_accept_exactly_one() {
    let bed = build(TestBedOptions::default());
    let (request, _pending) = bed.initiator.prepare(BOB, "ctx-race").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let responder = Arc::clone(&bed.responder);
        let request = request.clone();
        handles.push(tokio::spawn(
            async move { responder.respond(&request).await },
        ));
    }

    let mut accepted = 0;
    let mut replayed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(HandshakeError::ReplayDetected) => replayed += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(replayed, 7);
}

// ── Cookies ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn matching_cookie_secret_succeeds() {
    let bed = build(TestBedOptions {
        initiator_cookie_secret: Some([7u8; 32]),
        responder_cookie_secret: Some([7u8; 32]),
        ..Default::default()
    });
    bed.initiator
        .initiate(&direct(&bed), BOB, "ctx-s7-ok")
        .await
        .unwrap();
}

#[tokio::test]
async fn wrong_cookie_secret_is_rejected_early() {
    let bed = build(TestBedOptions {
        initiator_cookie_secret: Some([8u8; 32]),
        responder_cookie_secret: Some([7u8; 32]),
        ..Default::default()
    });
    let err = bed
        .initiator
        .initiate(&direct(&bed), BOB, "ctx-s7-bad")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::CookieRejected), "{err}");
}

#[tokio::test]
async fn missing_cookie_is_rejected_when_policy_configured() {
    let bed = build(TestBedOptions {
        responder_cookie_secret: Some([7u8; 32]),
        ..Default::default()
    });
    let err = bed
        .initiator
        .initiate(&direct(&bed), BOB, "ctx-s7-none")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::CookieRejected), "{err}");
}

// ── Session isolation and whitelists ─────────────────────────────────────────

#[tokio::test]
async fn distinct_contexts_produce_isolated_sessions() {
    let bed = build(TestBedOptions::default());
    let transport = direct(&bed);

    let first = bed
        .initiator
        .initiate(&transport, BOB, "ctx-0001")
        .await
        .unwrap();
    let second = bed
        .initiator
        .initiate(&transport, BOB, "ctx-0002")
        .await
        .unwrap();

    assert_ne!(first.kid, second.kid);
    assert_ne!(first.session_id, second.session_id);

    let s1 = bed.alice_sessions.get_by_key_id(&first.kid).unwrap();
    let s2 = bed.alice_sessions.get_by_key_id(&second.kid).unwrap();
    let ct1 = s1.lock().seal(b"", b"identical plaintext").unwrap();
    let ct2 = s2.lock().seal(b"", b"identical plaintext").unwrap();
    assert_ne!(ct1, ct2);
}

#[tokio::test]
async fn initiator_suite_whitelist_rejects_unlisted_suite() {
    let bed = build(TestBedOptions {
        initiator_config: HandshakeConfig {
            allowed_suites: vec!["hpke-base+p256+hkdf-sha256".into()],
            ..Default::default()
        },
        ..Default::default()
    });
    let err = bed
        .initiator
        .initiate(&direct(&bed), BOB, "ctx-suite")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::ProtocolVersion(_)), "{err}");
}

#[tokio::test]
async fn responder_suite_whitelist_refuses_to_serve() {
    let bed = build(TestBedOptions {
        responder_config: HandshakeConfig {
            allowed_suites: Vec::new(),
            ..Default::default()
        },
        ..Default::default()
    });
    let (request, _pending) = bed.initiator.prepare(BOB, "ctx-suite-r").await.unwrap();
    let err = bed.responder.respond(&request).await.unwrap_err();
    assert!(matches!(err, HandshakeError::ProtocolVersion(_)), "{err}");
}

// ── Resolution and transport failures ────────────────────────────────────────

#[tokio::test]
async fn inactive_peer_fails_at_resolution() {
    let mut resolver = StaticResolver::new();
    resolver.register(AgentMetadata {
        did: BOB.to_string(),
        is_active: false,
        signing_pub: SigningKeyPair::generate_ed25519().public(),
        kem_pub: KemKeyPair::generate().public().clone(),
    });
    let initiator = Initiator::new(
        ALICE,
        SigningKeyPair::generate_ed25519(),
        Arc::new(resolver) as Arc<dyn Resolver>,
        Arc::new(InMemorySessionManager::new()) as Arc<dyn SessionManager>,
        HandshakeConfig::default(),
    )
    .unwrap();

    let err = initiator.prepare(BOB, "ctx-inactive").await.unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::Resolver(ResolverError::Inactive(_))
    ));
}

#[tokio::test]
async fn empty_response_is_a_transport_error() {
    struct EmptyTransport;

    #[async_trait]
    impl Transport for EmptyTransport {
        async fn round_trip(
            &self,
            _request: &HandshakeRequest,
        ) -> Result<Vec<u8>, HandshakeError> {
            Ok(Vec::new())
        }
    }

    let bed = build(TestBedOptions::default());
    let err = bed
        .initiator
        .initiate(&EmptyTransport, BOB, "ctx-empty")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Transport(_)), "{err}");
}

#[tokio::test]
async fn forged_initiator_signature_is_rejected() {
    let bed = build(TestBedOptions::default());
    let (mut request, _pending) = bed.initiator.prepare(BOB, "ctx-forge").await.unwrap();
    // Re-sign the payload with a key the resolver does not know for Alice.
    let mallory = SigningKeyPair::generate_ed25519();
    request.signature = mallory.sign(&request.payload).unwrap();
    let err = bed.responder.respond(&request).await.unwrap_err();
    assert!(matches!(err, HandshakeError::Signature), "{err}");
}

// ── Key id binder ────────────────────────────────────────────────────────────

#[tokio::test]
async fn key_id_binder_issues_deterministic_kids() {
    struct PrefixBinder;
    impl KeyIdBinder for PrefixBinder {
        fn issue_key_id(&self, session_id: &str) -> String {
            format!("sage-{session_id}")
        }
    }

    let bed = build(TestBedOptions {
        key_id_binder: Some(Arc::new(PrefixBinder)),
        ..Default::default()
    });
    let established = bed
        .initiator
        .initiate(&direct(&bed), BOB, "ctx-binder")
        .await
        .unwrap();
    assert_eq!(established.kid, format!("sage-{}", established.session_id));
}
