//! Client handshake driver, both protocol versions.
//!
//! One flow sends the ClientHello and branches on the ServerHello: the
//! supported_versions extension selects TLS 1.3, its absence selects
//! TLS 1.2 (after the downgrade-sentinel check). Each expected message is
//! received in order; anything else is `UnexpectedMessage`.

extern crate alloc;

use alloc::vec::Vec;

use zeroize::Zeroizing;

use super::{
    certificate_verify_content, unexpected, verify_data13, Event, HandshakeJoiner,
    HandshakeOutput, Io, Negotiated, SessionSecrets, CV_CONTEXT_CLIENT, CV_CONTEXT_SERVER,
};
use crate::backend::Backend;
use crate::codec::{
    ClientExtension, ClientHello, HandshakePayload, KeyShareEntry, NamedGroup, PskIdentity,
    PskOffer, ServerHello,
};
use crate::crypto::{ct_eq, HashAlgorithm, KeyExchange};
use crate::hooks::Hooks;
use crate::key_schedule::{
    key_block, master_secret, verify_data12, Schedule13,
};
use crate::params::ClientParams;
use crate::record::{Epoch, RecordReceiver, RecordSender};
use crate::session::SessionData;
use crate::suites::{self, CipherSuite};
use crate::transcript::Transcript;
use crate::{TlsError, TlsVersion};

/// What the ClientHello offered; carried until the ServerHello resolves it.
struct Offer {
    client_random: [u8; 32],
    legacy_session_id: Vec<u8>,
    kx: KeyExchange,
    /// TLS 1.3 PSK offer: identity and its session data.
    resume13: Option<(Vec<u8>, SessionData)>,
    /// TLS 1.2 offer (session ID or ticket) and its session data.
    resume12: Option<(Vec<u8>, SessionData)>,
    /// Whether the TLS 1.2 offer went out as a ticket.
    offered_ticket: bool,
}

/// Run the client handshake to completion.
pub fn run(
    backend: &dyn Backend,
    params: &mut ClientParams,
    hooks: &Hooks,
    tx: &mut RecordSender,
    rx: &mut RecordReceiver,
    joiner: &mut HandshakeJoiner,
) -> Result<HandshakeOutput, TlsError> {
    let mut transcript = Transcript::new();
    let mut io = Io::new(backend, tx, rx, joiner, &mut transcript, hooks);

    let mut offer = build_offer(params)?;
    let ch_wire = encode_client_hello(params, &offer, None, None)?;
    io.send_raw_handshake(&ch_wire)?;
    log::debug!("client: sent ClientHello ({} bytes)", ch_wire.len());

    // ServerHello, possibly via one HelloRetryRequest round.
    let (payload, raw) = io.recv_message()?;
    let mut sh = match payload {
        HandshakePayload::ServerHello(sh) => sh,
        other => return unexpected(&other),
    };
    let mut sh_raw = raw;

    let mut retried = false;
    if sh.is_hello_retry() {
        let (sh2, raw2) = retry_hello(&mut io, params, &mut offer, &sh, &sh_raw)?;
        sh = sh2;
        sh_raw = raw2;
        retried = true;
        if sh.is_hello_retry() {
            // At most one retry per handshake.
            return Err(TlsError::UnexpectedMessage);
        }
    }
    io.transcript.push(&sh_raw);

    match sh.selected_version() {
        Some(0x0304) => {
            if !params.common.supports(TlsVersion::Tls13) {
                return Err(TlsError::ProtocolVersion);
            }
            client13(&mut io, params, offer, sh)
        }
        Some(_) => Err(TlsError::ProtocolVersion),
        None => {
            if retried {
                // A retried hello must stay on TLS 1.3.
                return Err(TlsError::UnexpectedMessage);
            }
            if params.common.supports(TlsVersion::Tls13) && sh.has_downgrade_sentinel() {
                return Err(TlsError::InsufficientSecurity);
            }
            if !params.common.supports(TlsVersion::Tls12) {
                return Err(TlsError::ProtocolVersion);
            }
            client12(&mut io, params, offer, sh)
        }
    }
}

fn build_offer(params: &mut ClientParams) -> Result<Offer, TlsError> {
    let group = *params
        .common
        .groups
        .first()
        .ok_or(TlsError::HandshakeFailure)?;
    let kx = KeyExchange::generate(group, &mut *params.common.rng)?;

    let mut client_random = [0u8; 32];
    params.common.rng.fill_bytes(&mut client_random);

    let mut resume13 = None;
    let mut resume12 = None;
    let mut offered_ticket = false;
    if let Some((id, data)) = &params.resume_session {
        match data.version {
            TlsVersion::Tls13 if params.common.supports(TlsVersion::Tls13) => {
                resume13 = Some((id.clone(), data.clone()));
            }
            TlsVersion::Tls12 if params.common.supports(TlsVersion::Tls12) => {
                offered_ticket = id.len() > 32;
                resume12 = Some((id.clone(), data.clone()));
            }
            _ => {}
        }
    }

    // The legacy session ID doubles as the TLS 1.2 resumption offer (ID
    // mode) and as the RFC 5077 / middlebox-compat echo detector otherwise.
    let legacy_session_id = match &resume12 {
        Some((id, _)) if !offered_ticket => id.clone(),
        _ => {
            let mut id = alloc::vec![0u8; 32];
            params.common.rng.fill_bytes(&mut id);
            id
        }
    };

    Ok(Offer {
        client_random,
        legacy_session_id,
        kx,
        resume13,
        resume12,
        offered_ticket,
    })
}

/// Build and encode the ClientHello, sealing the PSK binder when one is
/// offered. `cookie` and the retry flag belong to the second hello.
fn encode_client_hello(
    params: &ClientParams,
    offer: &Offer,
    cookie: Option<&[u8]>,
    transcript: Option<&Transcript>,
) -> Result<Vec<u8>, TlsError> {
    let common = &params.common;
    let tls13 = common.supports(TlsVersion::Tls13);

    let mut extensions = Vec::new();
    if let Some(name) = &params.server_name {
        extensions.push(ClientExtension::ServerName(name.clone()));
    }
    extensions.push(ClientExtension::SupportedGroups(
        common.groups.iter().map(|g| *g as u16).collect(),
    ));
    extensions.push(ClientExtension::SignatureAlgorithms(
        common.signature_schemes.iter().map(|s| *s as u16).collect(),
    ));
    if !common.alpn.is_empty() {
        extensions.push(ClientExtension::Protocols(common.alpn.clone()));
    }
    if common.supports(TlsVersion::Tls12) {
        // Empty body requests a ticket; a stored ticket offers it.
        let ticket = match &offer.resume12 {
            Some((id, _)) if offer.offered_ticket => id.clone(),
            _ => Vec::new(),
        };
        extensions.push(ClientExtension::SessionTicket(ticket));
    }
    if tls13 {
        extensions.push(ClientExtension::SupportedVersions(
            common.versions.iter().map(|v| u16::from_be_bytes(v.to_bytes())).collect(),
        ));
        extensions.push(ClientExtension::KeyShare(alloc::vec![KeyShareEntry {
            group: offer.kx.group() as u16,
            payload: offer.kx.public_bytes(),
        }]));
        if let Some(c) = cookie {
            extensions.push(ClientExtension::Cookie(c.to_vec()));
        }
        if let Some((identity, data)) = &offer.resume13 {
            extensions.push(ClientExtension::PskKeyExchangeModes(alloc::vec![
                crate::codec::PSK_MODE_DHE_KE
            ]));
            let hash = psk_hash(data)?;
            extensions.push(ClientExtension::PreSharedKey(PskOffer {
                identities: alloc::vec![PskIdentity {
                    identity: identity.clone(),
                    obfuscated_ticket_age: data.age_add,
                }],
                binders: alloc::vec![alloc::vec![0u8; hash.output_len()]],
            }));
        }
    }

    let ch = ClientHello {
        client_random: offer.client_random,
        session_id: offer.legacy_session_id.clone(),
        cipher_suites: common.suites.iter().map(|s| s.id).collect(),
        compression_methods: alloc::vec![0],
        extensions,
    };
    let mut wire = HandshakePayload::ClientHello(ch).encode();

    if let Some((_, data)) = &offer.resume13 {
        seal_binder(&mut wire, data, transcript)?;
    }
    Ok(wire)
}

fn psk_hash(data: &SessionData) -> Result<HashAlgorithm, TlsError> {
    suites::from_id(data.cipher_suite)
        .map(|s| s.hash)
        .ok_or(TlsError::InternalError)
}

/// Overwrite the zero binder at the tail of an encoded ClientHello with the
/// real one, computed over the hello truncated before the binders list
/// (RFC 8446 §4.2.11.2).
fn seal_binder(
    wire: &mut [u8],
    data: &SessionData,
    transcript: Option<&Transcript>,
) -> Result<(), TlsError> {
    let hash = psk_hash(data)?;
    let binder_len = hash.output_len();
    // binders list: u16 list length + (u8 entry length + binder)
    let binders_section = 2 + 1 + binder_len;
    if wire.len() < binders_section {
        return Err(TlsError::InternalError);
    }
    let truncated = &wire[..wire.len() - binders_section];

    let early = Schedule13::early(hash, Some(&data.secret));
    let binder_key = early.resumption_binder_key();
    let truncated_hash = match transcript {
        Some(t) => t.hash_with_extra(hash, truncated),
        None => hash.hash(truncated),
    };
    let binder = hash.hmac(&binder_key, &truncated_hash);

    let start = wire.len() - binder_len;
    wire[start..].copy_from_slice(&binder);
    Ok(())
}

/// Handle a HelloRetryRequest: substitute the transcript, regenerate the
/// share on the requested group, and send the second ClientHello.
fn retry_hello(
    io: &mut Io<'_>,
    params: &mut ClientParams,
    offer: &mut Offer,
    hrr: &ServerHello,
    hrr_raw: &[u8],
) -> Result<(ServerHello, Vec<u8>), TlsError> {
    if hrr.selected_version() != Some(0x0304) || !params.common.supports(TlsVersion::Tls13) {
        return Err(TlsError::ProtocolVersion);
    }
    let suite = suites::from_id(hrr.cipher_suite)
        .filter(|s| s.is_tls13() && params.common.suites.iter().any(|o| o.id == s.id))
        .ok_or(TlsError::HandshakeFailure)?;

    io.transcript.hello_retry_substitute(suite.hash);
    io.transcript.push(hrr_raw);

    let group = hrr
        .retry_group()
        .and_then(NamedGroup::from_u16)
        .ok_or(TlsError::HandshakeFailure)?;
    if !params.common.groups.contains(&group) || group == offer.kx.group() {
        // Retrying onto an unoffered group, or the one we already sent, is
        // a protocol violation.
        return Err(TlsError::HandshakeFailure);
    }
    offer.kx = KeyExchange::generate(group, &mut *params.common.rng)?;

    // A PSK whose hash disagrees with the retry's suite cannot be offered
    // again; its binder would bind the wrong transcript hash.
    if let Some((_, data)) = &offer.resume13 {
        if psk_hash(data)? != suite.hash {
            offer.resume13 = None;
        }
    }

    let ch2 = encode_client_hello(params, offer, hrr.cookie(), Some(io.transcript))?;
    io.send_raw_handshake(&ch2)?;
    log::debug!("client: retried hello on group {:?}", group);

    let (payload, raw) = io.recv_message()?;
    match payload {
        HandshakePayload::ServerHello(sh) => Ok((sh, raw)),
        other => unexpected(&other),
    }
}

// ── TLS 1.3 ─────────────────────────────────────────────────

fn client13(
    io: &mut Io<'_>,
    params: &mut ClientParams,
    offer: Offer,
    sh: ServerHello,
) -> Result<HandshakeOutput, TlsError> {
    let suite = suites::from_id(sh.cipher_suite)
        .filter(|s| s.is_tls13() && params.common.suites.iter().any(|o| o.id == s.id))
        .ok_or(TlsError::HandshakeFailure)?;
    io.version = Some(TlsVersion::Tls13);
    io.transcript.set_algorithm(suite.hash);

    // PSK acceptance.
    let psk = match sh.selected_psk() {
        Some(0) => {
            let (_, data) = offer.resume13.as_ref().ok_or(TlsError::UnexpectedMessage)?;
            if psk_hash(data)? != suite.hash {
                return Err(TlsError::HandshakeFailure);
            }
            Some(data.secret.clone())
        }
        Some(_) => return Err(TlsError::UnexpectedMessage),
        None => None,
    };
    let resumed = psk.is_some();

    // Key schedule up to the handshake secrets.
    let share = sh.key_share().ok_or(TlsError::HandshakeFailure)?;
    if share.group != offer.kx.group() as u16 {
        return Err(TlsError::HandshakeFailure);
    }
    let shared = offer.kx.agree(&share.payload)?;

    let early = Schedule13::early(suite.hash, psk.as_deref().map(|s| &s[..]));
    let hs = early.advance(&shared);
    let hs_hash = io.transcript.current_hash();
    let c_hs = hs.derive(b"c hs traffic", &hs_hash);
    let s_hs = hs.derive(b"s hs traffic", &hs_hash);
    io.hooks
        .log_key("CLIENT_HANDSHAKE_TRAFFIC_SECRET", &offer.client_random, &c_hs);
    io.hooks
        .log_key("SERVER_HANDSHAKE_TRAFFIC_SECRET", &offer.client_random, &s_hs);

    io.rx.state.install(Epoch::tls13(suite, &s_hs)?);
    io.tx.state.install(Epoch::tls13(suite, &c_hs)?);
    io.send_ccs()?;
    let master = hs.advance_zero();
    log::debug!("client: TLS 1.3 handshake keys installed ({})", suite.name);

    // EncryptedExtensions.
    let (payload, raw) = io.recv_message()?;
    let alpn = match payload {
        HandshakePayload::EncryptedExtensions(ref exts) => {
            io.transcript.push(&raw);
            let alpn = exts.iter().find_map(|e| match e {
                crate::codec::ServerExtension::Protocols(p) => {
                    p.first().map(|v| v.clone())
                }
                _ => None,
            });
            if let Some(p) = &alpn {
                if !params.common.alpn.contains(p) {
                    return Err(TlsError::HandshakeFailure);
                }
            }
            alpn
        }
        other => return unexpected(&other),
    };

    // Server authentication block (absent on PSK resumption).
    let mut cert_request = None;
    let mut peer_chain = Vec::new();
    let mut payload;
    let mut raw;
    let (p0, r0) = io.recv_message()?;
    payload = p0;
    raw = r0;

    if !resumed {
        if let HandshakePayload::CertificateRequest13(cr) = payload {
            if !cr.context.is_empty() {
                return Err(TlsError::DecodeError);
            }
            io.transcript.push(&raw);
            cert_request = Some(cr);
            let (p, r) = io.recv_message()?;
            payload = p;
            raw = r;
        }

        let cert = match payload {
            HandshakePayload::Certificate13(c) => c,
            other => return unexpected(&other),
        };
        io.transcript.push(&raw);
        peer_chain = cert.chain();
        if let Some(hook) = &io.hooks.on_recv_certificate_chain {
            hook(&peer_chain);
        }
        if peer_chain.is_empty() {
            return Err(TlsError::CertificateInvalid);
        }
        let server_key = params
            .validator
            .verify_chain(&peer_chain, params.server_name.as_deref())?;

        // CertificateVerify signs the transcript through the Certificate.
        let cv_hash = io.transcript.current_hash();
        let (cv_payload, cv_raw) = io.recv_message()?;
        let ds = match cv_payload {
            HandshakePayload::CertificateVerify(ds) => ds,
            other => return unexpected(&other),
        };
        if ds.scheme != server_key.scheme() as u16
            || !params
                .common
                .signature_schemes
                .iter()
                .any(|s| *s as u16 == ds.scheme)
        {
            return Err(TlsError::HandshakeFailure);
        }
        server_key.verify(
            &certificate_verify_content(CV_CONTEXT_SERVER, &cv_hash),
            &ds.signature,
        )?;
        io.transcript.push(&cv_raw);

        let (p, r) = io.recv_message()?;
        payload = p;
        raw = r;
    }

    // Server Finished.
    let fin_hash = io.transcript.current_hash();
    let peer_finished = match payload {
        HandshakePayload::Finished(v) => v,
        other => return unexpected(&other),
    };
    let expected = verify_data13(suite.hash, &s_hs, &fin_hash);
    if !ct_eq(&peer_finished, &expected) {
        return Err(TlsError::DecryptError);
    }
    io.transcript.push(&raw);

    // Application secrets hang off the transcript through server Finished.
    let ap_hash = io.transcript.current_hash();
    let c_ap = master.derive(b"c ap traffic", &ap_hash);
    let s_ap = master.derive(b"s ap traffic", &ap_hash);
    let exporter_master = master.derive(b"exp master", &ap_hash);
    io.hooks
        .log_key("CLIENT_TRAFFIC_SECRET_0", &offer.client_random, &c_ap);
    io.hooks
        .log_key("SERVER_TRAFFIC_SECRET_0", &offer.client_random, &s_ap);
    io.hooks
        .log_key("EXPORTER_SECRET", &offer.client_random, &exporter_master);
    io.rx.state.install(Epoch::tls13(suite, &s_ap)?);

    // Client authentication flight.
    let mut local_chain = Vec::new();
    if let Some(cr) = cert_request {
        let chain = params
            .client_auth
            .as_ref()
            .map(|c| c.chain.clone())
            .unwrap_or_default();
        let cert = crate::codec::Certificate13 {
            context: cr.context.clone(),
            entries: chain
                .iter()
                .map(|der| crate::codec::CertificateEntry {
                    der: der.clone(),
                    extensions: Vec::new(),
                })
                .collect(),
        };
        io.send_handshake(&HandshakePayload::Certificate13(cert))?;
        if let Some(creds) = &params.client_auth {
            let offered = cr.signature_algorithms().ok_or(TlsError::DecodeError)?;
            if !offered.contains(&(creds.key.scheme() as u16)) {
                return Err(TlsError::HandshakeFailure);
            }
            let cv_hash = io.transcript.current_hash();
            let sig = creds
                .key
                .sign(&certificate_verify_content(CV_CONTEXT_CLIENT, &cv_hash));
            io.send_handshake(&HandshakePayload::CertificateVerify(
                crate::codec::DigitallySigned {
                    scheme: creds.key.scheme() as u16,
                    signature: sig,
                },
            ))?;
            local_chain = chain;
        }
    }

    // Client Finished; application TX keys follow it.
    let my_fin_hash = io.transcript.current_hash();
    let local_finished = verify_data13(suite.hash, &c_hs, &my_fin_hash);
    io.send_handshake(&HandshakePayload::Finished(local_finished.clone()))?;
    io.tx.state.install(Epoch::tls13(suite, &c_ap)?);

    let resumption_master = master.derive(b"res master", &io.transcript.current_hash());
    log::debug!("client: TLS 1.3 handshake complete (resumed: {})", resumed);

    Ok(HandshakeOutput {
        negotiated: Negotiated {
            version: TlsVersion::Tls13,
            suite,
            alpn,
            client_random: offer.client_random,
            server_random: sh.server_random,
            local_finished,
            peer_finished,
            secrets: SessionSecrets::Tls13 {
                client_app: c_ap,
                server_app: s_ap,
                exporter_master,
                resumption_master,
            },
            peer_chain,
            local_chain,
        },
        pending: Vec::new(),
    })
}

// ── TLS 1.2 ─────────────────────────────────────────────────

fn client12(
    io: &mut Io<'_>,
    params: &mut ClientParams,
    offer: Offer,
    sh: ServerHello,
) -> Result<HandshakeOutput, TlsError> {
    let suite = suites::from_id(sh.cipher_suite)
        .filter(|s| !s.is_tls13() && params.common.suites.iter().any(|o| o.id == s.id))
        .ok_or(TlsError::HandshakeFailure)?;
    io.version = Some(TlsVersion::Tls12);

    let alpn = sh.alpn_protocol().map(|p| p.to_vec());
    if let Some(p) = &alpn {
        if !params.common.alpn.contains(p) {
            return Err(TlsError::HandshakeFailure);
        }
    }

    // Abbreviated handshake: the server echoed the session ID we offered.
    let resumed = offer.resume12.is_some()
        && !sh.session_id.is_empty()
        && sh.session_id == offer.legacy_session_id;

    if resumed {
        let (id, data) = offer.resume12.as_ref().expect("checked above");
        if data.cipher_suite != suite.id {
            return Err(TlsError::HandshakeFailure);
        }
        return client12_abbreviated(io, params, &offer, sh, suite, id.clone(), data.clone(), alpn);
    }

    client12_full(io, params, offer, sh, suite, alpn)
}

/// Stage both record epochs out of the key block; the CCS exchange swaps
/// them in.
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
        &kb.client_write_key,
        &kb.client_write_iv,
    )?);
    io.rx.state.set_pending(Epoch::tls12(
        suite,
        &kb.server_write_key,
        &kb.server_write_iv,
    )?);
    Ok(())
}

fn client12_abbreviated(
    io: &mut Io<'_>,
    params: &mut ClientParams,
    offer: &Offer,
    sh: ServerHello,
    suite: &'static CipherSuite,
    session_key: Vec<u8>,
    data: SessionData,
    alpn: Option<Vec<u8>>,
) -> Result<HandshakeOutput, TlsError> {
    let master = data.secret.clone();
    io.hooks
        .log_key("CLIENT_RANDOM", &offer.client_random, &master);
    stage_epochs12(io, suite, &master, &offer.client_random, &sh.server_random)?;

    // The server may renew our ticket before its ChangeCipherSpec.
    let mut new_ticket = None;
    loop {
        match io.recv_event()? {
            Event::Message(HandshakePayload::NewSessionTicket(nst), raw) => {
                io.transcript.push(&raw);
                new_ticket = Some(nst.ticket);
            }
            Event::Message(other, _) => return unexpected(&other),
            Event::ChangeCipherSpec => break,
        }
    }
    io.rx.state.swap()?;

    let fin_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let (payload, raw) = io.recv_message()?;
    let peer_finished = match payload {
        HandshakePayload::Finished(v) => v,
        other => return unexpected(&other),
    };
    let expected = verify_data12(suite.hash, &master, b"server finished", &fin_hash);
    if !ct_eq(&peer_finished, &expected) {
        return Err(TlsError::DecryptError);
    }
    io.transcript.push(&raw);

    io.send_ccs()?;
    io.tx.state.swap()?;
    let my_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let local_finished = verify_data12(suite.hash, &master, b"client finished", &my_hash);
    io.send_handshake(&HandshakePayload::Finished(local_finished.clone()))?;

    // Refresh the stored session.
    let store_key = new_ticket.unwrap_or(session_key);
    params.common.session.establish(&store_key, data);
    log::debug!("client: TLS 1.2 abbreviated handshake complete");

    Ok(HandshakeOutput {
        negotiated: Negotiated {
            version: TlsVersion::Tls12,
            suite,
            alpn,
            client_random: offer.client_random,
            server_random: sh.server_random,
            local_finished,
            peer_finished,
            secrets: SessionSecrets::Tls12 { master },
            peer_chain: Vec::new(),
            local_chain: Vec::new(),
        },
        pending: Vec::new(),
    })
}

fn client12_full(
    io: &mut Io<'_>,
    params: &mut ClientParams,
    offer: Offer,
    sh: ServerHello,
    suite: &'static CipherSuite,
    alpn: Option<Vec<u8>>,
) -> Result<HandshakeOutput, TlsError> {
    // Certificate.
    let peer_chain = match io.recv_transcripted()? {
        HandshakePayload::Certificate(c) => c.0,
        other => return unexpected(&other),
    };
    if let Some(hook) = &io.hooks.on_recv_certificate_chain {
        hook(&peer_chain);
    }
    if peer_chain.is_empty() {
        return Err(TlsError::CertificateInvalid);
    }
    let server_key = params
        .validator
        .verify_chain(&peer_chain, params.server_name.as_deref())?;

    // ServerKeyExchange, signed over the randoms and ECDHE parameters.
    let ske = match io.recv_transcripted()? {
        HandshakePayload::ServerKeyExchange(ske) => ske,
        other => return unexpected(&other),
    };
    let group = NamedGroup::from_u16(ske.group).ok_or(TlsError::HandshakeFailure)?;
    if !params.common.groups.contains(&group) {
        return Err(TlsError::HandshakeFailure);
    }
    if ske.scheme != server_key.scheme() as u16
        || !params
            .common
            .signature_schemes
            .iter()
            .any(|s| *s as u16 == ske.scheme)
    {
        return Err(TlsError::HandshakeFailure);
    }
    let mut signed = Vec::with_capacity(64 + ske.public.len() + 4);
    signed.extend_from_slice(&offer.client_random);
    signed.extend_from_slice(&sh.server_random);
    signed.extend_from_slice(&ske.params_bytes());
    server_key.verify(&signed, &ske.signature)?;

    // Optional CertificateRequest, then ServerHelloDone.
    let mut cert_request = None;
    let mut payload = io.recv_transcripted()?;
    if let HandshakePayload::CertificateRequest(cr) = payload {
        cert_request = Some(cr);
        payload = io.recv_transcripted()?;
    }
    match payload {
        HandshakePayload::ServerHelloDone => {}
        other => return unexpected(&other),
    }

    // Client flight: [Certificate], ClientKeyExchange, [CertificateVerify].
    let mut local_chain = Vec::new();
    if let Some(cr) = &cert_request {
        local_chain = params
            .client_auth
            .as_ref()
            .map(|c| c.chain.clone())
            .unwrap_or_default();
        io.send_handshake(&HandshakePayload::Certificate(
            crate::codec::CertificateChain(local_chain.clone()),
        ))?;
        if let Some(creds) = &params.client_auth {
            if !cr.schemes.contains(&(creds.key.scheme() as u16)) {
                return Err(TlsError::HandshakeFailure);
            }
        }
    }

    let kx = KeyExchange::generate(group, &mut *params.common.rng)?;
    let public = kx.public_bytes();
    let shared = kx.agree(&ske.public)?;
    io.send_handshake(&HandshakePayload::ClientKeyExchange(public))?;

    if cert_request.is_some() && !local_chain.is_empty() {
        if let Some(creds) = &params.client_auth {
            // The TLS 1.2 CertificateVerify signs every handshake message so
            // far; the transcript is still raw in 1.2 mode.
            let raw = io.transcript.raw().ok_or(TlsError::InternalError)?;
            let sig = creds.key.sign(raw);
            io.send_handshake(&HandshakePayload::CertificateVerify(
                crate::codec::DigitallySigned {
                    scheme: creds.key.scheme() as u16,
                    signature: sig,
                },
            ))?;
        }
    }

    // Keys.
    let master = master_secret(
        suite.hash,
        &shared,
        &offer.client_random,
        &sh.server_random,
    );
    io.hooks
        .log_key("CLIENT_RANDOM", &offer.client_random, &master);
    stage_epochs12(io, suite, &master, &offer.client_random, &sh.server_random)?;

    io.send_ccs()?;
    io.tx.state.swap()?;
    let my_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let local_finished = verify_data12(suite.hash, &master, b"client finished", &my_hash);
    io.send_handshake(&HandshakePayload::Finished(local_finished.clone()))?;

    // Server close: [NewSessionTicket], ChangeCipherSpec, Finished.
    let mut ticket = None;
    loop {
        match io.recv_event()? {
            Event::Message(HandshakePayload::NewSessionTicket(nst), raw) => {
                if !sh.acked_session_ticket() {
                    return Err(TlsError::UnexpectedMessage);
                }
                io.transcript.push(&raw);
                ticket = Some(nst.ticket);
            }
            Event::Message(other, _) => return unexpected(&other),
            Event::ChangeCipherSpec => break,
        }
    }
    io.rx.state.swap()?;

    let fin_hash = io.transcript.hash_with_extra(suite.hash, &[]);
    let (payload, raw) = io.recv_message()?;
    let peer_finished = match payload {
        HandshakePayload::Finished(v) => v,
        other => return unexpected(&other),
    };
    let expected = verify_data12(suite.hash, &master, b"server finished", &fin_hash);
    if !ct_eq(&peer_finished, &expected) {
        return Err(TlsError::DecryptError);
    }
    io.transcript.push(&raw);

    // Store the session for later resumption, keyed by ticket when we got
    // one, by the server's session ID otherwise.
    let data = SessionData {
        version: TlsVersion::Tls12,
        cipher_suite: suite.id,
        secret: Zeroizing::new(master.to_vec()),
        client_cert_chain: (!local_chain.is_empty()).then(|| local_chain.clone()),
        alpn: alpn.clone(),
        max_early_data: 0,
        issued_at: 0,
        lifetime: 7200,
        age_add: 0,
    };
    if let Some(t) = &ticket {
        params.common.session.establish(t, data);
    } else if !sh.session_id.is_empty() {
        params.common.session.establish(&sh.session_id, data);
    }
    log::debug!("client: TLS 1.2 handshake complete ({})", suite.name);

    Ok(HandshakeOutput {
        negotiated: Negotiated {
            version: TlsVersion::Tls12,
            suite,
            alpn,
            client_random: offer.client_random,
            server_random: sh.server_random,
            local_finished,
            peer_finished,
            secrets: SessionSecrets::Tls12 { master },
            peer_chain,
            local_chain,
        },
        pending: Vec::new(),
    })
}
