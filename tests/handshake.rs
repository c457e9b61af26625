//! End-to-end handshakes over an in-memory transport.
//!
//! Each test wires a client and server context together and drives one side
//! from a thread, the way a blocking caller would.

mod common;

use std::sync::Arc;
use std::thread;

use common::{
    client_params, duplex, raw_key_credentials, server_params, RawKeyValidator, RejectAll,
};
use strand_tls::codec::{
    HandshakePayload, NamedGroup, ServerExtension, ServerHello, SignatureScheme,
    DOWNGRADE_SENTINEL_TLS12,
};
use strand_tls::context::Established;
use strand_tls::params::ClientAuthPolicy;
use strand_tls::session::{MemorySessionCache, SessionData, SessionManager, Zeroizing};
use strand_tls::{
    Backend, ClientParams, Context, Params, ServerParams, TlsError, TlsVersion,
};

fn connect(
    cp: ClientParams,
    sp: ServerParams,
) -> (
    Arc<Context>,
    Arc<Context>,
    Result<(), TlsError>,
    Result<(), TlsError>,
) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (ce, se) = duplex();
    let client = Arc::new(Context::new(Arc::new(ce), Params::Client(cp)));
    let server = Arc::new(Context::new(Arc::new(se), Params::Server(sp)));
    let s = server.clone();
    let handle = thread::spawn(move || s.handshake());
    let client_result = client.handshake();
    let server_result = handle.join().unwrap();
    (client, server, client_result, server_result)
}

fn assert_established(client: &Context, server: &Context) {
    assert_eq!(client.established(), Established::Established);
    assert_eq!(server.established(), Established::Established);
    assert_eq!(client.get_finished(), server.get_peer_finished());
    assert_eq!(server.get_finished(), client.get_peer_finished());
}

// ── Scenario S1: TLS 1.3, x25519 + ed25519 ─────────────────

#[test]
fn tls13_handshake_completes() {
    let cp = client_params(1, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(2, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
    assert_eq!(client.version(), Some(TlsVersion::Tls13));

    // Exporter agreement (P7).
    let label = b"EXPORTER-Channel-Binding";
    let c = client.get_tls_exporter(label, b"", 32).unwrap();
    let s = server.get_tls_exporter(label, b"", 32).unwrap();
    assert_eq!(c, s);
    assert_eq!(c.len(), 32);

    // Different context, different output.
    let other = client.get_tls_exporter(label, b"ctx", 32).unwrap();
    assert_ne!(c, other);
}

// ── Scenario S2: TLS 1.2, ECDHE-ECDSA-AES128-GCM-SHA256 ────

#[test]
fn tls12_handshake_completes() {
    let cp = client_params(3, &[TlsVersion::Tls12], SignatureScheme::EcdsaSecp256r1Sha256);
    let sp = server_params(4, &[TlsVersion::Tls12], SignatureScheme::EcdsaSecp256r1Sha256);
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
    assert_eq!(client.version(), Some(TlsVersion::Tls12));
    assert_eq!(client.get_finished().unwrap().len(), 12);

    let c = client.get_tls_exporter(b"EXPORTER-test", b"", 24).unwrap();
    let s = server.get_tls_exporter(b"EXPORTER-test", b"", 24).unwrap();
    assert_eq!(c, s);
}

#[test]
fn tls12_with_ed25519_certificate() {
    let cp = client_params(5, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    let sp = server_params(6, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
}

// ── Application data ────────────────────────────────────────

#[test]
fn app_data_round_trip() {
    let cp = client_params(7, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(8, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();

    client.send_app(b"ping").unwrap();
    assert_eq!(server.recv_app().unwrap(), b"ping");
    server.send_app(b"pong").unwrap();
    assert_eq!(client.recv_app().unwrap(), b"pong");

    // A large payload crosses the fragmentation limit.
    let big = vec![0x5Au8; 40_000];
    client.send_app(&big).unwrap();
    let mut got = Vec::new();
    while got.len() < big.len() {
        got.extend(server.recv_app().unwrap());
    }
    assert_eq!(got, big);
}

// ── Scenario S4: close_notify semantics ─────────────────────

#[test]
fn close_notify_half_close() {
    let cp = client_params(9, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(10, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();

    client.close();
    // The server sees EOF on its next read...
    assert_eq!(server.recv_app().unwrap(), b"");
    // ...but may keep sending until it closes itself.
    server.send_app(b"bye").unwrap();
    server.close();
    assert!(server.send_app(b"late").is_err());

    // The closer's own operations now fail.
    assert_eq!(client.send_app(b"x").unwrap_err(), TlsError::ConnectionClosed);
}

// ── Resumption (P5) ─────────────────────────────────────────

#[test]
fn tls13_psk_resumption() {
    let server_cache = Arc::new(MemorySessionCache::new());
    let client_cache = Arc::new(MemorySessionCache::new());

    let mut cp = client_params(11, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    cp.common.session = client_cache.clone();
    let mut sp = server_params(12, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    sp.common.session = server_cache.clone();
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert!(!client.peer_certificates().is_empty());

    // Reading application data makes the client process the ticket.
    server.send_app(b"after-ticket").unwrap();
    assert_eq!(client.recv_app().unwrap(), b"after-ticket");
    assert_eq!(client_cache.len(), 1);
    assert_eq!(server_cache.len(), 1);

    let ticket = client_cache.any_key().unwrap();
    let data = client_cache.resume(&ticket).unwrap();

    let mut cp2 = client_params(13, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    cp2.common.session = client_cache.clone();
    cp2.resume_session = Some((ticket, data));
    let mut sp2 = server_params(14, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    sp2.common.session = server_cache.clone();
    let (client2, server2, cr2, sr2) = connect(cp2, sp2);
    cr2.unwrap();
    sr2.unwrap();
    assert_established(&client2, &server2);
    // No certificate flight on a PSK handshake.
    assert!(client2.peer_certificates().is_empty());

    let c = client2.get_tls_exporter(b"EXPORTER-r", b"", 32).unwrap();
    let s = server2.get_tls_exporter(b"EXPORTER-r", b"", 32).unwrap();
    assert_eq!(c, s);
}

#[test]
fn tls12_session_id_resumption() {
    let server_cache = Arc::new(MemorySessionCache::new());
    let client_cache = Arc::new(MemorySessionCache::new());

    let mut cp = client_params(15, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    cp.common.session = client_cache.clone();
    let mut sp = server_params(16, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    sp.common.session = server_cache.clone();
    let (_client, _server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_eq!(client_cache.len(), 1);

    let id = client_cache.any_key().unwrap();
    assert_eq!(id.len(), 32);
    let data = client_cache.resume(&id).unwrap();

    let mut cp2 = client_params(17, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    cp2.common.session = client_cache.clone();
    cp2.resume_session = Some((id, data));
    let mut sp2 = server_params(18, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    sp2.common.session = server_cache.clone();
    let (client2, server2, cr2, sr2) = connect(cp2, sp2);
    cr2.unwrap();
    sr2.unwrap();
    assert_established(&client2, &server2);
    // The abbreviated flow has no certificate flight.
    assert!(client2.peer_certificates().is_empty());
    assert_eq!(client2.get_finished().unwrap().len(), 12);
}

#[test]
fn tls12_ticket_resumption() {
    let server_cache = Arc::new(MemorySessionCache::with_tickets());
    let client_cache = Arc::new(MemorySessionCache::new());

    let mut cp = client_params(19, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    cp.common.session = client_cache.clone();
    let mut sp = server_params(20, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    sp.common.session = server_cache.clone();
    let (_c, _s, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();

    // The client stored under the ticket, which is longer than a session ID.
    let ticket = client_cache.any_key().unwrap();
    assert!(ticket.len() > 32);
    let data = client_cache.resume(&ticket).unwrap();

    let mut cp2 = client_params(21, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    cp2.common.session = client_cache.clone();
    cp2.resume_session = Some((ticket, data));
    let mut sp2 = server_params(22, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    sp2.common.session = server_cache.clone();
    let (client2, server2, cr2, sr2) = connect(cp2, sp2);
    cr2.unwrap();
    sr2.unwrap();
    assert_established(&client2, &server2);
    assert!(client2.peer_certificates().is_empty());
}

// ── Scenario S3: unknown session offer falls back to full ───

#[test]
fn unknown_psk_falls_back_to_full_handshake() {
    let mut cp = client_params(23, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    cp.resume_session = Some((
        vec![0xEE; 32],
        SessionData {
            version: TlsVersion::Tls13,
            cipher_suite: 0x1301,
            secret: Zeroizing::new(vec![0x77; 32]),
            client_cert_chain: None,
            alpn: None,
            max_early_data: 0,
            issued_at: 0,
            lifetime: 7200,
            age_add: 0,
        },
    ));
    // The server has no session store at all.
    let sp = server_params(24, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
    // Full handshake: the certificate flight ran.
    assert!(!client.peer_certificates().is_empty());
}

// ── Scenario S5 / P6: tampered Finished ─────────────────────

#[test]
fn tampered_finished_fails_with_decrypt_error() {
    let cp = client_params(25, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(26, &[TlsVersion::Tls13], SignatureScheme::Ed25519);

    let (ce, se) = duplex();
    let client = Arc::new(Context::new(Arc::new(ce), Params::Client(cp)));
    let server = Arc::new(Context::new(Arc::new(se), Params::Server(sp)));

    // Rewrite the server's Finished into garbage on receipt.
    let mut hooks = strand_tls::hooks::Hooks::default();
    hooks.on_recv_handshake13 = Some(Box::new(|msg| match msg {
        HandshakePayload::Finished(_) => HandshakePayload::Finished(vec![0xAB; 12]),
        other => other,
    }));
    client.set_hooks(hooks);

    let s = server.clone();
    let handle = thread::spawn(move || s.handshake());
    assert_eq!(client.handshake().unwrap_err(), TlsError::DecryptError);
    // The client sent alert 51; the server sees it as a fatal alert.
    assert!(handle.join().unwrap().is_err());
}

// ── Scenario S6: record overflow ────────────────────────────

#[test]
fn oversized_record_is_rejected() {
    let (ce, se) = duplex();
    let client = Context::new(Arc::new(ce), Params::Client(client_params(
        27,
        &[TlsVersion::Tls13],
        SignatureScheme::Ed25519,
    )));
    // A raw peer claiming a 17000-byte record.
    se.send(&[22, 0x03, 0x03, 0x42, 0x68]).unwrap();
    assert_eq!(client.handshake().unwrap_err(), TlsError::RecordOverflow);
}

// ── Scenario S8 / P8: downgrade sentinel ────────────────────

#[test]
fn downgrade_sentinel_is_refused() {
    let (ce, se) = duplex();
    let client = Context::new(Arc::new(ce), Params::Client(client_params(
        28,
        &[TlsVersion::Tls13, TlsVersion::Tls12],
        SignatureScheme::Ed25519,
    )));

    // A middled server claims TLS 1.2 but stamps the 1.3 sentinel.
    let mut random = [7u8; 32];
    random[24..].copy_from_slice(&DOWNGRADE_SENTINEL_TLS12);
    let sh = ServerHello {
        server_random: random,
        session_id: Vec::new(),
        cipher_suite: 0xC02B,
        extensions: Vec::new(),
    };
    let msg = HandshakePayload::ServerHello(sh).encode();
    let mut record = vec![22, 0x03, 0x03];
    record.extend_from_slice(&(msg.len() as u16).to_be_bytes());
    record.extend_from_slice(&msg);
    se.send(&record).unwrap();

    assert_eq!(
        client.handshake().unwrap_err(),
        TlsError::InsufficientSecurity
    );
}

// ── Out-of-order messages ───────────────────────────────────

#[test]
fn out_of_order_message_is_rejected() {
    let (ce, se) = duplex();
    let client = Context::new(Arc::new(ce), Params::Client(client_params(
        29,
        &[TlsVersion::Tls13],
        SignatureScheme::Ed25519,
    )));
    let msg = HandshakePayload::ServerHelloDone.encode();
    let mut record = vec![22, 0x03, 0x03];
    record.extend_from_slice(&(msg.len() as u16).to_be_bytes());
    record.extend_from_slice(&msg);
    se.send(&record).unwrap();

    assert_eq!(
        client.handshake().unwrap_err(),
        TlsError::UnexpectedMessage
    );
}

// ── Chain validation ────────────────────────────────────────

#[test]
fn rejected_chain_aborts_handshake() {
    let mut cp = client_params(30, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    cp.validator = Arc::new(RejectAll);
    let sp = server_params(31, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let (_client, _server, cr, sr) = connect(cp, sp);
    assert_eq!(cr.unwrap_err(), TlsError::CertificateInvalid);
    assert!(sr.is_err());
}

// ── Mutual TLS ──────────────────────────────────────────────

#[test]
fn tls13_mutual_auth() {
    let mut cp = client_params(32, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let client_creds = raw_key_credentials(SignatureScheme::Ed25519, 0x99);
    let client_leaf = client_creds.chain[0].clone();
    cp.client_auth = Some(client_creds);

    let mut sp = server_params(33, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    sp.client_auth = ClientAuthPolicy::Require;
    sp.client_validator = Some(Arc::new(RawKeyValidator {
        scheme: SignatureScheme::Ed25519,
    }));

    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
    assert_eq!(server.peer_certificates(), vec![client_leaf]);
}

#[test]
fn tls12_mutual_auth() {
    let mut cp = client_params(34, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    let client_creds = raw_key_credentials(SignatureScheme::EcdsaSecp256r1Sha256, 0x55);
    let client_leaf = client_creds.chain[0].clone();
    cp.client_auth = Some(client_creds);

    let mut sp = server_params(35, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    sp.client_auth = ClientAuthPolicy::Require;
    sp.client_validator = Some(Arc::new(RawKeyValidator {
        scheme: SignatureScheme::EcdsaSecp256r1Sha256,
    }));

    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
    assert_eq!(server.peer_certificates(), vec![client_leaf]);
}

// ── HelloRetryRequest ───────────────────────────────────────

#[test]
fn hello_retry_on_group_mismatch() {
    let cp = client_params(36, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let mut sp = server_params(37, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    // The client's initial share is X25519; the server only takes P-256.
    sp.common.groups = vec![NamedGroup::Secp256r1];

    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
    assert_eq!(client.version(), Some(TlsVersion::Tls13));
}

// ── ALPN ────────────────────────────────────────────────────

#[test]
fn alpn_prefers_server_order() {
    let mut cp = client_params(38, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    cp.common.alpn = vec![b"http/1.1".to_vec(), b"h2".to_vec()];
    let mut sp = server_params(39, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    sp.common.alpn = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_eq!(client.alpn_protocol(), Some(b"h2".to_vec()));
    assert_eq!(server.alpn_protocol(), Some(b"h2".to_vec()));
}

// ── KeyUpdate ───────────────────────────────────────────────

#[test]
fn key_update_rotates_both_directions() {
    let cp = client_params(40, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(41, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();

    client.update_keys(true).unwrap();
    client.send_app(b"fresh-keys").unwrap();
    // The server processes the KeyUpdate, reciprocates, then delivers.
    assert_eq!(server.recv_app().unwrap(), b"fresh-keys");
    server.send_app(b"rotated-too").unwrap();
    assert_eq!(client.recv_app().unwrap(), b"rotated-too");
}

// ── Version negotiation mismatch ────────────────────────────

#[test]
fn disjoint_versions_fail() {
    let cp = client_params(42, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(43, &[TlsVersion::Tls12], SignatureScheme::Ed25519);
    let (_c, _s, cr, sr) = connect(cp, sp);
    // The server falls back to 1.2; the 1.3-only client refuses.
    assert!(cr.is_err());
    assert!(sr.is_err());
}

#[test]
fn mixed_version_peers_meet_on_tls13() {
    let cp = client_params(
        44,
        &[TlsVersion::Tls13, TlsVersion::Tls12],
        SignatureScheme::Ed25519,
    );
    let sp = server_params(
        45,
        &[TlsVersion::Tls13, TlsVersion::Tls12],
        SignatureScheme::Ed25519,
    );
    let (client, server, cr, sr) = connect(cp, sp);
    cr.unwrap();
    sr.unwrap();
    assert_established(&client, &server);
    assert_eq!(client.version(), Some(TlsVersion::Tls13));
}

// ── handshake_with ──────────────────────────────────────────

#[test]
fn server_handshake_with_injected_client_hello() {
    // Capture the client's first flight through a raw sniffer, hand the
    // parsed ClientHello to the server, and let the rest flow normally.
    let cp = client_params(46, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(47, &[TlsVersion::Tls13], SignatureScheme::Ed25519);

    let (ce, se) = duplex();
    let se = Arc::new(se);
    let client = Arc::new(Context::new(Arc::new(ce), Params::Client(cp)));

    let sniffer = se.clone();
    let server_thread = thread::spawn(move || {
        // Read the first record by hand.
        let mut buf: Vec<u8> = Vec::new();
        while buf.len() < 5 {
            buf.extend(sniffer.recv(4096).unwrap());
        }
        let len = ((buf[3] as usize) << 8) | (buf[4] as usize);
        while buf.len() < 5 + len {
            buf.extend(sniffer.recv(4096).unwrap());
        }
        let body = &buf[5..5 + len];
        assert_eq!(body[0], 1); // ClientHello
        let msg_len =
            ((body[1] as usize) << 16) | ((body[2] as usize) << 8) | (body[3] as usize);
        let ch = HandshakePayload::parse(body[0], &body[4..4 + msg_len], None).unwrap();

        let server = Context::new(sniffer, Params::Server(sp));
        server.handshake_with(ch).map(|_| server)
    });

    client.handshake().unwrap();
    let server = server_thread.join().unwrap().unwrap();
    assert_eq!(server.established(), Established::Established);
    assert_eq!(client.get_finished(), server.get_peer_finished());
}

// ── Hook observation ────────────────────────────────────────

#[test]
fn certificate_chain_hook_fires() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let seen = Arc::new(AtomicUsize::new(0));

    let cp = client_params(48, &[TlsVersion::Tls13], SignatureScheme::Ed25519);
    let sp = server_params(49, &[TlsVersion::Tls13], SignatureScheme::Ed25519);

    let (ce, se) = duplex();
    let client = Arc::new(Context::new(Arc::new(ce), Params::Client(cp)));
    let server = Arc::new(Context::new(Arc::new(se), Params::Server(sp)));

    let counter = seen.clone();
    let mut hooks = strand_tls::hooks::Hooks::default();
    hooks.on_recv_certificate_chain = Some(Box::new(move |chain| {
        assert!(!chain.is_empty());
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    client.set_hooks(hooks);

    let s = server.clone();
    let handle = thread::spawn(move || s.handshake());
    client.handshake().unwrap();
    handle.join().unwrap().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

// ── ServerHello with unknown extension survives ─────────────

#[test]
fn unknown_extensions_are_tolerated() {
    // Exercised through the codec: unknown extensions round-trip opaquely,
    // so a hello carrying one still parses.
    let sh = ServerHello {
        server_random: [1u8; 32],
        session_id: Vec::new(),
        cipher_suite: 0x1301,
        extensions: vec![
            ServerExtension::SupportedVersions(0x0304),
            ServerExtension::Unknown {
                id: 0x7A7A,
                body: vec![1, 2, 3],
            },
        ],
    };
    let wire = HandshakePayload::ServerHello(sh.clone()).encode();
    let parsed = HandshakePayload::parse(wire[0], &wire[4..], None).unwrap();
    assert_eq!(parsed, HandshakePayload::ServerHello(sh));
}
