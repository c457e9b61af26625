//! Server handshake driver, both protocol versions.
//!
//! Version selection happens on the ClientHello: supported_versions naming
//! TLS 1.3 wins when this endpoint speaks it, otherwise TLS 1.2. A server
//! that negotiates 1.2 while capable of 1.3 stamps the downgrade sentinel
//! into its random.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use zeroize::Zeroizing;

use super::{
    certificate_verify_content, select_alpn, select_group, select_scheme, unexpected,
    verify_data13, Event, HandshakeJoiner, HandshakeOutput, Io, Negotiated, PendingAction,
    SessionSecrets, CV_CONTEXT_CLIENT, CV_CONTEXT_SERVER,
};
use crate::backend::Backend;
use crate::codec::{
    Certificate13, CertificateChain, CertificateEntry, CertificateRequest12, ClientExtension,
    ClientHello, DigitallySigned, HandshakePayload, KeyShareEntry, NamedGroup,
    NewSessionTicket12, NewSessionTicket13, ServerExtension, ServerHello, ServerKeyExchange,
    DOWNGRADE_SENTINEL_TLS12, HELLO_RETRY_REQUEST_RANDOM, PSK_MODE_DHE_KE,
};
use crate::crypto::{ct_eq, KeyExchange, VerifyKey};
use crate::hooks::Hooks;
use crate::key_schedule::{
    key_block, master_secret, resumption_psk, verify_data12, Schedule13,
};
use crate::params::{ChainValidator, ClientAuthPolicy, ServerParams};
use crate::record::{Epoch, RecordReceiver, RecordSender};
use crate::session::SessionData;
use crate::suites::{self, CipherSuite};
use crate::transcript::Transcript;
use crate::{TlsError, TlsVersion};

/// Run the server handshake to completion.
///
/// `injected` carries a pre-read first message (`handshake_with`).
pub fn run(
    backend: &dyn Backend,
    params: &mut ServerParams,
    hooks: &Hooks,
    tx: &mut RecordSender,
    rx: &mut RecordReceiver,
    joiner: &mut HandshakeJoiner,
    injected: Option<HandshakePayload>,
) -> Result<HandshakeOutput, TlsError> {
    let mut transcript = Transcript::new();
    let mut io = Io::new(backend, tx, rx, joiner, &mut transcript, hooks);

    let (payload, ch_raw) = match injected {
        Some(payload) => {
            let raw = payload.encode();
            (payload, raw)
        }
        None => io.recv_message()?,
    };
    let ch = match payload {
        HandshakePayload::ClientHello(ch) => ch,
        other => return unexpected(&other),
    };
    if !ch.compression_methods.contains(&0) {
        return Err(TlsError::HandshakeFailure);
    }

    let offers13 = ch
        .supported_versions()
        .map(|vs| vs.contains(&0x0304))
        .unwrap_or(false);

    if offers13 && params.common.supports(TlsVersion::Tls13) {
        server13(&mut io, params, ch, ch_raw)
    } else if params.common.supports(TlsVersion::Tls12) {
        io.transcript.push(&ch_raw);
        server12(&mut io, params, ch)
    } else {
        Err(TlsError::ProtocolVersion)
    }
}

fn random_32(params: &mut ServerParams) -> [u8; 32] {
    let mut out = [0u8; 32];
    params.common.rng.fill_bytes(&mut out);
    out
}

// ── TLS 1.3 ─────────────────────────────────────────────────

/// The client key share picked for the exchange, retrying once via
/// HelloRetryRequest when the client offered the group but not a share.
fn pick_share<'a>(
    params: &ServerParams,
    ch: &'a ClientHello,
) -> Result<Option<&'a KeyShareEntry>, TlsError> {
    let shares = ch.key_shares().ok_or(TlsError::HandshakeFailure)?;
    for group in &params.common.groups {
        if let Some(entry) = shares.iter().find(|e| e.group == *group as u16) {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

fn server13(
    io: &mut Io<'_>,
    params: &mut ServerParams,
    ch: ClientHello,
    ch_raw: Vec<u8>,
) -> Result<HandshakeOutput, TlsError> {
    let suite = suites::choose(
        &params.common.suites,
        &ch.cipher_suites,
        TlsVersion::Tls13,
    )
    .ok_or(TlsError::HandshakeFailure)?;

    // Key-share agreement, with one HelloRetryRequest round if the client
    // offered a usable group without a share for it.
    let (ch, ch_raw) = if pick_share(params, &ch)?.is_none() {
        let groups = ch.supported_groups().ok_or(TlsError::HandshakeFailure)?;
        let group =
            select_group(&params.common.groups, groups).ok_or(TlsError::HandshakeFailure)?;

        io.transcript.push(&ch_raw);
        io.transcript.hello_retry_substitute(suite.hash);
        let hrr = ServerHello {
            server_random: HELLO_RETRY_REQUEST_RANDOM,
            session_id: ch.session_id.clone(),
            cipher_suite: suite.id,
            extensions: alloc::vec![
                ServerExtension::SupportedVersions(0x0304),
                ServerExtension::KeyShareRetry(group as u16),
            ],
        };
        io.send_handshake(&HandshakePayload::ServerHello(hrr))?;
        io.send_ccs()?;
        log::debug!("server: sent HelloRetryRequest for group {:?}", group);

        let (payload, raw) = io.recv_message()?;
        match payload {
            HandshakePayload::ClientHello(ch2) => {
                if !ch2.cipher_suites.contains(&suite.id) {
                    return Err(TlsError::HandshakeFailure);
                }
                (ch2, raw)
            }
            other => return unexpected(&other),
        }
    } else {
        (ch, ch_raw)
    };

    let share = pick_share(params, &ch)?.ok_or(TlsError::HandshakeFailure)?;
    let group = NamedGroup::from_u16(share.group).ok_or(TlsError::HandshakeFailure)?;
    let share_payload = share.payload.clone();

    // PSK resumption: validate the first offered identity's binder.
    let mut psk: Option<Zeroizing<Vec<u8>>> = None;
    if let Some(offer) = ch.psk_offer() {
        let modes = ch.psk_modes().ok_or(TlsError::HandshakeFailure)?;
        if modes.contains(&PSK_MODE_DHE_KE) {
            let identity = &offer.identities[0].identity;
            let looked_up = if ch.offers_early_data() {
                params.common.session.resume_once(identity)
            } else {
                params.common.session.resume(identity)
            };
            if let Some(data) = looked_up {
                let compatible = data.version == TlsVersion::Tls13
                    && suites::from_id(data.cipher_suite)
                        .map(|s| s.hash == suite.hash)
                        .unwrap_or(false)
                    && ch.cipher_suites.contains(&data.cipher_suite);
                if compatible {
                    let binder_ok = {
                        let truncated = &ch_raw[..ch_raw.len() - offer.binders_len()];
                        let early = Schedule13::early(suite.hash, Some(&data.secret));
                        let key = early.resumption_binder_key();
                        let hash = io.transcript.hash_with_extra(suite.hash, truncated);
                        ct_eq(&offer.binders[0], &suite.hash.hmac(&key, &hash))
                    };
                    if !binder_ok {
                        return Err(TlsError::DecryptError);
                    }
                    psk = Some(data.secret.clone());
                }
            }
        }
    }
    let resumed = psk.is_some();

    io.transcript.push(&ch_raw);
    io.transcript.set_algorithm(suite.hash);
    io.version = Some(TlsVersion::Tls13);

    // ServerHello.
    let server_random = random_32(params);
    let kx = KeyExchange::generate(group, &mut *params.common.rng)?;
    let mut extensions = alloc::vec![
        ServerExtension::SupportedVersions(0x0304),
        ServerExtension::KeyShare(KeyShareEntry {
            group: group as u16,
            payload: kx.public_bytes(),
        }),
    ];
    if resumed {
        extensions.push(ServerExtension::PreSharedKey(0));
    }
    let sh = ServerHello {
        server_random,
        session_id: ch.session_id.clone(),
        cipher_suite: suite.id,
        extensions,
    };
    io.send_handshake(&HandshakePayload::ServerHello(sh))?;
    io.send_ccs()?;

    // Key schedule through the handshake secrets.
    let shared = kx.agree(&share_payload)?;
    let early = Schedule13::early(suite.hash, psk.as_deref().map(|s| &s[..]));
    let hs = early.advance(&shared);
    let hs_hash = io.transcript.current_hash();
    let c_hs = hs.derive(b"c hs traffic", &hs_hash);
    let s_hs = hs.derive(b"s hs traffic", &hs_hash);
    io.hooks
        .log_key("CLIENT_HANDSHAKE_TRAFFIC_SECRET", &ch.client_random, &c_hs);
    io.hooks
        .log_key("SERVER_HANDSHAKE_TRAFFIC_SECRET", &ch.client_random, &s_hs);
    io.tx.state.install(Epoch::tls13(suite, &s_hs)?);
    io.rx.state.install(Epoch::tls13(suite, &c_hs)?);
    let master = hs.advance_zero();
    log::debug!(
        "server: TLS 1.3 keys installed ({}, resumed: {})",
        suite.name,
        resumed
    );

    // Rejected early data arrives under keys we never derived; skip it.
    if ch.offers_early_data() {
        io.skip_undecryptable = true;
    }

    // EncryptedExtensions.
    let alpn = match ch.alpn_protocols() {
        Some(theirs) if !params.common.alpn.is_empty() => {
            let selected =
                select_alpn(&params.common.alpn, theirs).ok_or(TlsError::HandshakeFailure)?;
            Some(selected)
        }
        _ => None,
    };
    let mut ee = Vec::new();
    if ch.server_name().is_some() {
        ee.push(ServerExtension::ServerNameAck);
    }
    if let Some(p) = &alpn {
        ee.push(ServerExtension::Protocols(alloc::vec![p.clone()]));
    }
    io.send_handshake(&HandshakePayload::EncryptedExtensions(ee))?;

    // Certificate block (full handshakes only).
    let request_client_cert = params.client_auth != ClientAuthPolicy::None && !resumed;
    if request_client_cert {
        io.send_handshake(&HandshakePayload::CertificateRequest13(
            crate::codec::CertificateRequest13 {
                context: Vec::new(),
                extensions: alloc::vec![ClientExtension::SignatureAlgorithms(
                    params
                        .common
                        .signature_schemes
                        .iter()
                        .map(|s| *s as u16)
                        .collect(),
                )],
            },
        ))?;
    }

    if !resumed {
        let scheme = params.credentials.key.scheme() as u16;
        let offered = ch.signature_algorithms().ok_or(TlsError::HandshakeFailure)?;
        if !offered.contains(&scheme) {
            return Err(TlsError::HandshakeFailure);
        }
        let cert = Certificate13 {
            context: Vec::new(),
            entries: params
                .credentials
                .chain
                .iter()
                .map(|der| CertificateEntry {
                    der: der.clone(),
                    extensions: Vec::new(),
                })
                .collect(),
        };
        io.send_handshake(&HandshakePayload::Certificate13(cert))?;

        let cv_hash = io.transcript.current_hash();
        let sig = params
            .credentials
            .key
            .sign(&certificate_verify_content(CV_CONTEXT_SERVER, &cv_hash));
        io.send_handshake(&HandshakePayload::CertificateVerify(DigitallySigned {
            scheme,
            signature: sig,
        }))?;
    }

    // Server Finished; application keys for TX right after.
    let fin_hash = io.transcript.current_hash();
    let local_finished = verify_data13(suite.hash, &s_hs, &fin_hash);
    io.send_handshake(&HandshakePayload::Finished(local_finished.clone()))?;

    let ap_hash = io.transcript.current_hash();
    let c_ap = master.derive(b"c ap traffic", &ap_hash);
    let s_ap = master.derive(b"s ap traffic", &ap_hash);
    let exporter_master = master.derive(b"exp master", &ap_hash);
    io.hooks
        .log_key("CLIENT_TRAFFIC_SECRET_0", &ch.client_random, &c_ap);
    io.hooks
        .log_key("SERVER_TRAFFIC_SECRET_0", &ch.client_random, &s_ap);
    io.hooks
        .log_key("EXPORTER_SECRET", &ch.client_random, &exporter_master);
    io.tx.state.install(Epoch::tls13(suite, &s_ap)?);

    // Client authentication flight.
    let mut peer_chain = Vec::new();
    if request_client_cert {
        let (payload, raw) = io.recv_message()?;
        let cert = match payload {
            HandshakePayload::Certificate13(c) => c,
            other => return unexpected(&other),
        };
        if !cert.context.is_empty() {
            return Err(TlsError::DecodeError);
        }
        io.transcript.push(&raw);
        peer_chain = cert.chain();
        if let Some(hook) = &io.hooks.on_recv_certificate_chain {
            hook(&peer_chain);
        }
        if peer_chain.is_empty() {
            if params.client_auth == ClientAuthPolicy::Require {
                return Err(TlsError::CertificateInvalid);
            }
        } else {
            let client_key = client_chain_key(params, &peer_chain)?;
            let cv_hash = io.transcript.current_hash();
            let (payload, raw) = io.recv_message()?;
            let ds = match payload {
                HandshakePayload::CertificateVerify(ds) => ds,
                other => return unexpected(&other),
            };
            if ds.scheme != client_key.scheme() as u16
                || !params
                    .common
                    .signature_schemes
                    .iter()
                    .any(|s| *s as u16 == ds.scheme)
            {
                return Err(TlsError::HandshakeFailure);
            }
            client_key.verify(
                &certificate_verify_content(CV_CONTEXT_CLIENT, &cv_hash),
                &ds.signature,
            )?;
            io.transcript.push(&raw);
        }
    }

    // Client Finished; application keys for RX after it.
    let client_fin_hash = io.transcript.current_hash();
    let (payload, raw) = io.recv_message()?;
    let peer_finished = match payload {
        HandshakePayload::Finished(v) => v,
        other => return unexpected(&other),
    };
    let expected = verify_data13(suite.hash, &c_hs, &client_fin_hash);
    if !ct_eq(&peer_finished, &expected) {
        return Err(TlsError::DecryptError);
    }
    io.transcript.push(&raw);
    io.skip_undecryptable = false;
    io.rx.state.install(Epoch::tls13(suite, &c_ap)?);

    let resumption_master = master.derive(b"res master", &io.transcript.current_hash());

    // Queue one NewSessionTicket; the context sends it once established.
    let pending = alloc::vec![build_ticket13(
        params,
        suite,
        &resumption_master,
        &peer_chain,
        &alpn,
    )];
    log::debug!("server: TLS 1.3 handshake complete");

    Ok(HandshakeOutput {
        negotiated: Negotiated {
            version: TlsVersion::Tls13,
            suite,
            alpn,
            client_random: ch.client_random,
            server_random,
            local_finished,
            peer_finished,
            secrets: SessionSecrets::Tls13 {
                client_app: c_ap,
                server_app: s_ap,
                exporter_master,
                resumption_master,
            },
            peer_chain,
            local_chain: params.credentials.chain.clone(),
        },
        pending,
    })
}

fn client_chain_key(
    params: &ServerParams,
    chain: &[Vec<u8>],
) -> Result<VerifyKey, TlsError> {
    let validator: &Arc<dyn ChainValidator> = params
        .client_validator
        .as_ref()
        .ok_or(TlsError::InternalError)?;
    validator.verify_chain(chain, None)
}

fn build_ticket13(
    params: &mut ServerParams,
    suite: &'static CipherSuite,
    resumption_master: &[u8],
    peer_chain: &[Vec<u8>],
    alpn: &Option<Vec<u8>>,
) -> PendingAction {
    let nonce = [0u8; 8];
    let psk = resumption_psk(suite.hash, resumption_master, &nonce);
    let age_add = params.common.rng.next_u32();
    let id = {
        let mut id = alloc::vec![0u8; 32];
        params.common.rng.fill_bytes(&mut id);
        id
    };
    let data = SessionData {
        version: TlsVersion::Tls13,
        cipher_suite: suite.id,
        secret: psk,
        client_cert_chain: (!peer_chain.is_empty()).then(|| peer_chain.to_vec()),
        alpn: alpn.clone(),
        max_early_data: 0,
        issued_at: 0,
        lifetime: 7200,
        age_add,
    };
    let identity = params
        .common
        .session
        .establish(&id, data)
        .unwrap_or(id);
    let nst = NewSessionTicket13 {
        lifetime: 7200,
        age_add,
        nonce: nonce.to_vec(),
        ticket: identity,
        extensions: Vec::new(),
    };
    PendingAction::SendTicket(HandshakePayload::NewSessionTicket13(nst).encode())
}

// ── TLS 1.2 ─────────────────────────────────────────────────

fn server_random12(params: &mut ServerParams) -> [u8; 32] {
    let mut random = random_32(params);
    // Negotiating 1.2 while capable of 1.3: stamp the downgrade sentinel.
    if params.common.supports(TlsVersion::Tls13) {
        random[24..].copy_from_slice(&DOWNGRADE_SENTINEL_TLS12);
    }
    random
}

fn stage_epochs12(
    io: &mut Io<'_>,
    suite: &'static CipherSuite,
    master: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<(), TlsError> {
    let kb = key_block(
        suite.hash,
        master,
        client_random,
        server_random,
        0,
        suite.aead.key_len(),
        suite.aead.tls12_fixed_iv_len(),
    );
    io.tx.state.set_pending(Epoch::tls12(
        suite,
        &kb.server_write_key,
        &kb.server_write_iv,
    )?);
    io.rx.state.set_pending(Epoch::tls12(
        suite,
        &kb.client_write_key,
        &kb.client_write_iv,
    )?);
    Ok(())
}

fn server12(
    io: &mut Io<'_>,
    params: &mut ServerParams,
    ch: ClientHello,
) -> Result<HandshakeOutput, TlsError> {
    io.version = Some(TlsVersion::Tls12);

    // Resumption lookup: ticket first, then session ID.
    let mut resume: Option<(Vec<u8>, SessionData)> = None;
    if let Some(ticket) = ch.session_ticket() {
        if !ticket.is_empty() {
            if let Some(data) = params.common.session.resume(ticket) {
                resume = Some((ticket.to_vec(), data));
            }
        }
    }
    if resume.is_none() && !ch.session_id.is_empty() {
        if let Some(data) = params.common.session.resume(&ch.session_id) {
            resume = Some((ch.session_id.clone(), data));
        }
    }
    // Accept only if the stored pair is still on offer.
    let resume = resume.filter(|(_, data)| {
        data.version == TlsVersion::Tls12
            && ch.cipher_suites.contains(&data.cipher_suite)
            && suites::from_id(data.cipher_suite).is_some()
    });

    if let Some((key, data)) = resume {
        // A failure after accepting a resumption invalidates the entry.
        let result = server12_abbreviated(io, params, &ch, &key, &data);
        if result.is_err() {
            params.common.session.invalidate(&key);
        }
        return result;
    }

    server12_full(io, params, ch)
}

fn alpn12(params: &ServerParams, ch: &ClientHello) -> Result<Option<Vec<u8>>, TlsError> {
    match ch.alpn_protocols() {
        Some(theirs) if !params.common.alpn.is_empty() => {
            select_alpn(&params.common.alpn, theirs)
                .map(Some)
                .ok_or(TlsError::HandshakeFailure)
        }
        _ => Ok(None),
    }
}

fn server12_abbreviated(
    io: &mut Io<'_>,
    params: &mut ServerParams,
    ch: &ClientHello,
    session_key: &[u8],
    data: &SessionData,
) -> Result<HandshakeOutput, TlsError> {
    let suite = suites::from_id(data.cipher_suite).ok_or(TlsError::InternalError)?;
    let alpn = alpn12(params, ch)?;
    let server_random = server_random12(params);

    let mut extensions = Vec::new();
    if ch.server_name().is_some() {
        extensions.push(ServerExtension::ServerNameAck);
    }
    if let Some(p) = &alpn {
        extensions.push(ServerExtension::Protocols(alloc::vec![p.clone()]));
    }
    // Echoing the client's session ID signals the abbreviated flow.
    let sh = ServerHello {
        server_random,
        session_id: ch.session_id.clone(),
        cipher_suite: suite.id,
        extensions,
    };
    io.send_handshake(&HandshakePayload::ServerHello(sh))?;

    let master = data.secret.clone();
    io.hooks.log_key("CLIENT_RANDOM", &ch.client_random, &master);
    stage_epochs12(io, suite, &master, &ch.client_random, &server_random)?;

    io.send_ccs()?;
    io.tx.state.swap()?;
    let fin_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let local_finished = verify_data12(suite.hash, &master, b"server finished", &fin_hash);
    io.send_handshake(&HandshakePayload::Finished(local_finished.clone()))?;

    match io.recv_event()? {
        Event::ChangeCipherSpec => {}
        Event::Message(other, _) => return unexpected(&other),
    }
    io.rx.state.swap()?;

    let client_fin_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let (payload, raw) = io.recv_message()?;
    let peer_finished = match payload {
        HandshakePayload::Finished(v) => v,
        other => return unexpected(&other),
    };
    let expected = verify_data12(suite.hash, &master, b"client finished", &client_fin_hash);
    if !ct_eq(&peer_finished, &expected) {
        return Err(TlsError::DecryptError);
    }
    io.transcript.push(&raw);

    // Refresh the store.
    params.common.session.establish(session_key, data.clone());
    log::debug!("server: TLS 1.2 abbreviated handshake complete");

    Ok(HandshakeOutput {
        negotiated: Negotiated {
            version: TlsVersion::Tls12,
            suite,
            alpn,
            client_random: ch.client_random,
            server_random,
            local_finished,
            peer_finished,
            secrets: SessionSecrets::Tls12 { master },
            peer_chain: data.client_cert_chain.clone().unwrap_or_default(),
            local_chain: params.credentials.chain.clone(),
        },
        pending: Vec::new(),
    })
}

fn server12_full(
    io: &mut Io<'_>,
    params: &mut ServerParams,
    ch: ClientHello,
) -> Result<HandshakeOutput, TlsError> {
    let suite = suites::choose(
        &params.common.suites,
        &ch.cipher_suites,
        TlsVersion::Tls12,
    )
    .ok_or(TlsError::HandshakeFailure)?;
    let alpn = alpn12(params, &ch)?;

    // The client must accept our certificate key's scheme.
    let scheme = params.credentials.key.scheme();
    if let Some(theirs) = ch.signature_algorithms() {
        if select_scheme(&[scheme], theirs).is_none() {
            return Err(TlsError::HandshakeFailure);
        }
    }

    let group = match ch.supported_groups() {
        Some(theirs) => {
            select_group(&params.common.groups, theirs).ok_or(TlsError::HandshakeFailure)?
        }
        None => *params
            .common
            .groups
            .first()
            .ok_or(TlsError::HandshakeFailure)?,
    };

    let ticket_mode = params.common.session.use_ticket() && ch.session_ticket().is_some();
    // Fresh session ID for the cache; empty in ticket mode (the ticket is
    // the handle, and a non-echo keeps abbreviated detection unambiguous).
    let session_id = if ticket_mode {
        Vec::new()
    } else {
        random_32(params).to_vec()
    };

    let server_random = server_random12(params);
    let mut extensions = Vec::new();
    if ch.server_name().is_some() {
        extensions.push(ServerExtension::ServerNameAck);
    }
    if let Some(p) = &alpn {
        extensions.push(ServerExtension::Protocols(alloc::vec![p.clone()]));
    }
    if ticket_mode {
        extensions.push(ServerExtension::SessionTicketAck);
    }
    let sh = ServerHello {
        server_random,
        session_id: session_id.clone(),
        cipher_suite: suite.id,
        extensions,
    };
    io.send_handshake(&HandshakePayload::ServerHello(sh))?;

    // Certificate, signed key exchange, [CertificateRequest], done.
    io.send_handshake(&HandshakePayload::Certificate(CertificateChain(
        params.credentials.chain.clone(),
    )))?;

    let kx = KeyExchange::generate(group, &mut *params.common.rng)?;
    let ske_unsigned = ServerKeyExchange {
        group: group as u16,
        public: kx.public_bytes(),
        scheme: scheme as u16,
        signature: Vec::new(),
    };
    let mut signed = Vec::new();
    signed.extend_from_slice(&ch.client_random);
    signed.extend_from_slice(&server_random);
    signed.extend_from_slice(&ske_unsigned.params_bytes());
    let signature = params.credentials.key.sign(&signed);
    io.send_handshake(&HandshakePayload::ServerKeyExchange(ServerKeyExchange {
        signature,
        ..ske_unsigned
    }))?;

    let request_client_cert = params.client_auth != ClientAuthPolicy::None;
    if request_client_cert {
        io.send_handshake(&HandshakePayload::CertificateRequest(
            CertificateRequest12 {
                cert_types: alloc::vec![64], // ecdsa_sign
                schemes: params
                    .common
                    .signature_schemes
                    .iter()
                    .map(|s| *s as u16)
                    .collect(),
                authorities: Vec::new(),
            },
        ))?;
    }
    io.send_handshake(&HandshakePayload::ServerHelloDone)?;

    // Client flight.
    let mut peer_chain = Vec::new();
    let mut payload;
    let mut raw;
    let (p0, r0) = io.recv_message()?;
    payload = p0;
    raw = r0;

    if request_client_cert {
        let cert = match payload {
            HandshakePayload::Certificate(c) => c,
            other => return unexpected(&other),
        };
        io.transcript.push(&raw);
        peer_chain = cert.0;
        if let Some(hook) = &io.hooks.on_recv_certificate_chain {
            hook(&peer_chain);
        }
        if peer_chain.is_empty() && params.client_auth == ClientAuthPolicy::Require {
            return Err(TlsError::CertificateInvalid);
        }
        let (p, r) = io.recv_message()?;
        payload = p;
        raw = r;
    }

    let point = match payload {
        HandshakePayload::ClientKeyExchange(point) => point,
        other => return unexpected(&other),
    };
    io.transcript.push(&raw);
    let shared = kx.agree(&point)?;

    if !peer_chain.is_empty() {
        let client_key = client_chain_key(params, &peer_chain)?;
        // The signature covers the raw transcript up to (not including)
        // the CertificateVerify itself.
        let signed_transcript = io
            .transcript
            .raw()
            .ok_or(TlsError::InternalError)?
            .to_vec();
        let (payload, raw) = io.recv_message()?;
        let ds = match payload {
            HandshakePayload::CertificateVerify(ds) => ds,
            other => return unexpected(&other),
        };
        if ds.scheme != client_key.scheme() as u16 {
            return Err(TlsError::HandshakeFailure);
        }
        client_key.verify(&signed_transcript, &ds.signature)?;
        io.transcript.push(&raw);
    }

    let master = master_secret(suite.hash, &shared, &ch.client_random, &server_random);
    io.hooks.log_key("CLIENT_RANDOM", &ch.client_random, &master);
    stage_epochs12(io, suite, &master, &ch.client_random, &server_random)?;

    match io.recv_event()? {
        Event::ChangeCipherSpec => {}
        Event::Message(other, _) => return unexpected(&other),
    }
    io.rx.state.swap()?;

    let client_fin_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let (payload, raw) = io.recv_message()?;
    let peer_finished = match payload {
        HandshakePayload::Finished(v) => v,
        other => return unexpected(&other),
    };
    let expected = verify_data12(suite.hash, &master, b"client finished", &client_fin_hash);
    if !ct_eq(&peer_finished, &expected) {
        return Err(TlsError::DecryptError);
    }
    io.transcript.push(&raw);

    // Store the session; in ticket mode, emit the ticket before our
    // ChangeCipherSpec (RFC 5077 message order).
    let data = SessionData {
        version: TlsVersion::Tls12,
        cipher_suite: suite.id,
        secret: Zeroizing::new(master.to_vec()),
        client_cert_chain: (!peer_chain.is_empty()).then(|| peer_chain.clone()),
        alpn: alpn.clone(),
        max_early_data: 0,
        issued_at: 0,
        lifetime: 7200,
        age_add: 0,
    };
    if ticket_mode {
        let mut id = alloc::vec![0u8; 32];
        params.common.rng.fill_bytes(&mut id);
        let ticket = params
            .common
            .session
            .establish(&id, data)
            .unwrap_or(id);
        io.send_handshake(&HandshakePayload::NewSessionTicket(NewSessionTicket12 {
            lifetime_hint: 7200,
            ticket,
        }))?;
    } else {
        params.common.session.establish(&session_id, data);
    }

    io.send_ccs()?;
    io.tx.state.swap()?;
    let fin_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let local_finished = verify_data12(suite.hash, &master, b"server finished", &fin_hash);
    io.send_handshake(&HandshakePayload::Finished(local_finished.clone()))?;
    log::debug!("server: TLS 1.2 handshake complete ({})", suite.name);

    Ok(HandshakeOutput {
        negotiated: Negotiated {
            version: TlsVersion::Tls12,
            suite,
            alpn,
            client_random: ch.client_random,
            server_random,
            local_finished,
            peer_finished,
            secrets: SessionSecrets::Tls12 { master },
            peer_chain,
            local_chain: params.credentials.chain.clone(),
        },
        pending: Vec::new(),
    })
}
