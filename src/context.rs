//! Per-connection context.
//!
//! The `Context` is the public face of the engine: it owns the transport,
//! the caller's parameters, and the connection's shared state behind three
//! independent locks.
//!
//! # Locking
//!
//! - `state` — negotiated results, hooks, parameters, establishment flags.
//! - `read`  — the receiving record half and handshake reassembly.
//! - `write` — the sending record half.
//!
//! Locks are always acquired in the order state → read → write; no lock is
//! held across caller callbacks except the documented hooks. Holding `read`
//! (and `state`) across a blocking receive is deliberate: full-duplex peers
//! contend only on the brief `state` sections, and cancellation is the
//! caller closing the transport.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::backend::Backend;
use crate::codec::{HandshakePayload, KeyUpdateRequest, NewSessionTicket13};
use crate::handshake::{
    client, server, HandshakeJoiner, Negotiated, PendingAction, SessionSecrets,
};
use crate::hooks::Hooks;
use crate::key_schedule::{exporter12, exporter13, resumption_psk, update_traffic_secret};
use crate::params::Params;
use crate::record::{ContentType, Epoch, RecordReceiver, RecordSender};
use crate::session::SessionData;
use crate::{AlertDescription, AlertLevel, Role, TlsError, TlsVersion};

/// Establishment progress of the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Established {
    NotEstablished,
    /// Reserved for the 0-RTT acceptance window; this endpoint never enters
    /// it (early data is never accepted) but the state is part of the
    /// connection model.
    EarlyDataAllowed,
    Established,
}

pub(crate) struct ConnState {
    pub params: Params,
    pub hooks: Hooks,
    pub established: Established,
    pub negotiated: Option<Negotiated>,
    pub fatal: Option<TlsError>,
    pub closed: bool,
}

pub(crate) struct ReadState {
    pub rx: RecordReceiver,
    pub joiner: HandshakeJoiner,
    /// close_notify received; reads return EOF, writes may continue.
    pub peer_closed: bool,
    /// Transport is gone or the connection was poisoned.
    pub eof: bool,
}

pub(crate) struct WriteState {
    pub tx: RecordSender,
    pub sent_close_notify: bool,
    pub dead: Option<TlsError>,
}

/// A TLS connection over a caller-supplied transport.
pub struct Context {
    backend: Arc<dyn Backend>,
    role: Role,
    state: Mutex<ConnState>,
    read: Mutex<ReadState>,
    write: Mutex<WriteState>,
}

impl Context {
    /// Create a connection context. Record states start with the null
    /// cipher and sequence zero; the state machine sits at its initial
    /// state until [`Context::handshake`].
    pub fn new(backend: Arc<dyn Backend>, params: Params) -> Self {
        let role = params.role();
        Context {
            backend,
            role,
            state: Mutex::new(ConnState {
                params,
                hooks: Hooks::default(),
                established: Established::NotEstablished,
                negotiated: None,
                fatal: None,
                closed: false,
            }),
            read: Mutex::new(ReadState {
                rx: RecordReceiver::new(),
                joiner: HandshakeJoiner::new(),
                peer_closed: false,
                eof: false,
            }),
            write: Mutex::new(WriteState {
                tx: RecordSender::new(role == Role::Client),
                sent_close_notify: false,
                dead: None,
            }),
        }
    }

    /// This endpoint's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Run the handshake to completion. Idempotent once established.
    pub fn handshake(&self) -> Result<(), TlsError> {
        self.handshake_inner(None)
    }

    /// Run the handshake from a pre-read first message (a server consuming
    /// a ClientHello the caller already pulled off the wire).
    pub fn handshake_with(&self, first: HandshakePayload) -> Result<(), TlsError> {
        self.handshake_inner(Some(first))
    }

    fn handshake_inner(&self, injected: Option<HandshakePayload>) -> Result<(), TlsError> {
        let mut st = self.state.lock();
        if let Some(e) = &st.fatal {
            return Err(e.clone());
        }
        if st.established == Established::Established {
            return Ok(());
        }
        let mut rd = self.read.lock();
        let mut wr = self.write.lock();

        let result = {
            let ConnState {
                ref mut params,
                ref hooks,
                ..
            } = *st;
            let ReadState { rx, joiner, .. } = &mut *rd;
            let WriteState { tx, .. } = &mut *wr;
            match params {
                Params::Client(p) => {
                    if injected.is_some() {
                        // Only a server can be handed its first message.
                        Err(TlsError::InternalError)
                    } else {
                        client::run(&*self.backend, p, hooks, tx, rx, joiner)
                    }
                }
                Params::Server(p) => {
                    server::run(&*self.backend, p, hooks, tx, rx, joiner, injected)
                }
            }
        };

        match result {
            Ok(out) => {
                st.negotiated = Some(out.negotiated);
                st.established = Established::Established;
                for action in out.pending {
                    match action {
                        PendingAction::SendTicket(bytes) => {
                            if let Err(e) = wr.tx.send_bytes(
                                &*self.backend,
                                ContentType::Handshake,
                                &bytes,
                            ) {
                                wr.dead = Some(e.clone());
                                return Err(e);
                            }
                        }
                    }
                }
                let _ = self.backend.flush();
                Ok(())
            }
            Err(e) => {
                self.poison(&mut st, &mut rd, &mut wr, e.clone());
                Err(e)
            }
        }
    }

    /// Mark the connection dead and send the matching alert, best effort.
    fn poison(
        &self,
        st: &mut ConnState,
        rd: &mut ReadState,
        wr: &mut WriteState,
        err: TlsError,
    ) {
        if let Some((level, desc)) = err.alert() {
            if err.is_fatal() {
                let _ = wr.tx.send_bytes(
                    &*self.backend,
                    ContentType::Alert,
                    &[level as u8, desc as u8],
                );
            }
        }
        log::debug!("connection poisoned: {}", err);
        st.fatal = Some(err.clone());
        rd.eof = true;
        wr.dead = Some(err);
    }

    /// Send application bytes. The write lock alone is held across the
    /// transport write, so sends and receives stay concurrent.
    pub fn send_app(&self, data: &[u8]) -> Result<(), TlsError> {
        {
            let st = self.state.lock();
            if let Some(e) = &st.fatal {
                return Err(e.clone());
            }
            if st.established != Established::Established {
                return Err(TlsError::InternalError);
            }
        }
        let mut wr = self.write.lock();
        if let Some(e) = &wr.dead {
            return Err(e.clone());
        }
        if wr.sent_close_notify {
            return Err(TlsError::ConnectionClosed);
        }
        match wr
            .tx
            .send_bytes(&*self.backend, ContentType::ApplicationData, data)
        {
            Ok(()) => Ok(()),
            Err(e) => {
                wr.dead = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Receive application bytes. An empty result means the peer sent
    /// close_notify (or the transport reached EOF after one was seen).
    pub fn recv_app(&self) -> Result<Vec<u8>, TlsError> {
        let mut st = self.state.lock();
        if let Some(e) = &st.fatal {
            return Err(e.clone());
        }
        if st.established != Established::Established {
            return Err(TlsError::InternalError);
        }
        let mut rd = self.read.lock();
        if rd.peer_closed || rd.eof {
            return Ok(Vec::new());
        }

        loop {
            // Finish any buffered post-handshake message first.
            let version = st.negotiated.as_ref().map(|n| n.version);
            let buffered = match rd.joiner.next_message(version) {
                Ok(m) => m,
                Err(e) => return Err(self.fail_read(&mut st, &mut rd, e)),
            };
            if let Some((payload, _)) = buffered {
                if let Err(e) = self.post_handshake(&mut st, &mut rd, payload) {
                    return Err(self.fail_read(&mut st, &mut rd, e));
                }
                continue;
            }

            match rd.rx.recv_record(&*self.backend) {
                Ok((ContentType::ApplicationData, data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    return Ok(data);
                }
                Ok((ContentType::Handshake, data)) => {
                    if data.is_empty() {
                        return Err(self.fail_read(&mut st, &mut rd, TlsError::DecodeError));
                    }
                    rd.joiner.push_fragment(&data);
                }
                Ok((ContentType::Alert, data)) => {
                    match self.incoming_alert(&mut rd, &data) {
                        Ok(true) => return Ok(Vec::new()),
                        Ok(false) => continue,
                        Err(e) => return Err(self.fail_read(&mut st, &mut rd, e)),
                    }
                }
                Ok((ContentType::ChangeCipherSpec, _)) => {
                    return Err(self.fail_read(&mut st, &mut rd, TlsError::UnexpectedMessage));
                }
                Err(TlsError::ConnectionClosed) => {
                    rd.eof = true;
                    st.fatal = Some(TlsError::ConnectionClosed);
                    return Err(TlsError::ConnectionClosed);
                }
                Err(e) => return Err(self.fail_read(&mut st, &mut rd, e)),
            }
        }
    }

    /// Returns Ok(true) when the alert was close_notify.
    fn incoming_alert(&self, rd: &mut ReadState, data: &[u8]) -> Result<bool, TlsError> {
        if data.len() != 2 {
            return Err(TlsError::DecodeError);
        }
        match (AlertLevel::from_byte(data[0]), AlertDescription::from_byte(data[1])) {
            (_, Some(AlertDescription::CloseNotify)) => {
                rd.peer_closed = true;
                Ok(true)
            }
            (Some(AlertLevel::Warning), _) => {
                // user_canceled and other warnings do not end the connection.
                log::debug!("ignoring warning alert {}", data[1]);
                Ok(false)
            }
            (Some(AlertLevel::Fatal), Some(d)) => Err(TlsError::AlertReceived(d)),
            _ => Err(TlsError::DecodeError),
        }
    }

    fn fail_read(&self, st: &mut ConnState, rd: &mut ReadState, err: TlsError) -> TlsError {
        let mut wr = self.write.lock();
        self.poison(st, rd, &mut wr, err.clone());
        err
    }

    /// Handle a post-handshake handshake message.
    fn post_handshake(
        &self,
        st: &mut ConnState,
        rd: &mut ReadState,
        payload: HandshakePayload,
    ) -> Result<(), TlsError> {
        match payload {
            HandshakePayload::NewSessionTicket13(nst) => self.store_ticket(st, nst),
            HandshakePayload::KeyUpdate(req) => self.peer_key_update(st, rd, req),
            HandshakePayload::HelloRequest => {
                // Renegotiation refused: answer with a warning and move on.
                let mut wr = self.write.lock();
                let _ = wr.tx.send_bytes(
                    &*self.backend,
                    ContentType::Alert,
                    &[
                        AlertLevel::Warning as u8,
                        AlertDescription::NoRenegotiation as u8,
                    ],
                );
                Ok(())
            }
            other => {
                log::debug!("post-handshake message refused: {:?}", other.typ());
                Err(TlsError::UnexpectedMessage)
            }
        }
    }

    /// Client side of NewSessionTicket: derive the PSK and store it.
    fn store_ticket(&self, st: &mut ConnState, nst: NewSessionTicket13) -> Result<(), TlsError> {
        let Some(neg) = &st.negotiated else {
            return Err(TlsError::InternalError);
        };
        let SessionSecrets::Tls13 {
            resumption_master, ..
        } = &neg.secrets
        else {
            return Err(TlsError::UnexpectedMessage);
        };
        let psk = resumption_psk(neg.suite.hash, resumption_master, &nst.nonce);
        let data = SessionData {
            version: TlsVersion::Tls13,
            cipher_suite: neg.suite.id,
            secret: psk,
            client_cert_chain: (!neg.local_chain.is_empty()).then(|| neg.local_chain.clone()),
            alpn: neg.alpn.clone(),
            max_early_data: nst.max_early_data().unwrap_or(0),
            issued_at: 0,
            lifetime: nst.lifetime,
            age_add: nst.age_add,
        };
        st.params.common().session.establish(&nst.ticket, data);
        log::debug!("stored session ticket ({} bytes)", nst.ticket.len());
        Ok(())
    }

    /// Peer-initiated KeyUpdate: rotate the receive epoch, and reciprocate
    /// when requested.
    fn peer_key_update(
        &self,
        st: &mut ConnState,
        rd: &mut ReadState,
        req: KeyUpdateRequest,
    ) -> Result<(), TlsError> {
        let Some(neg) = st.negotiated.as_mut() else {
            return Err(TlsError::InternalError);
        };
        let suite = neg.suite;
        let SessionSecrets::Tls13 {
            client_app,
            server_app,
            ..
        } = &mut neg.secrets
        else {
            return Err(TlsError::UnexpectedMessage);
        };
        let (own_secret, peer_secret) = match self.role {
            Role::Client => (client_app, server_app),
            Role::Server => (server_app, client_app),
        };
        *peer_secret = update_traffic_secret(suite.hash, peer_secret);
        rd.rx.state.install(Epoch::tls13(suite, peer_secret)?);
        log::debug!("receive traffic keys rotated");

        if req == KeyUpdateRequest::UpdateRequested {
            let next = update_traffic_secret(suite.hash, own_secret);
            let mut wr = self.write.lock();
            let msg =
                HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateNotRequested).encode();
            wr.tx
                .send_bytes(&*self.backend, ContentType::Handshake, &msg)?;
            wr.tx.state.install(Epoch::tls13(suite, &next)?);
            *own_secret = next;
            log::debug!("send traffic keys rotated (peer requested)");
        }
        Ok(())
    }

    /// Rotate this endpoint's send keys (TLS 1.3 post-handshake), optionally
    /// asking the peer to rotate too.
    pub fn update_keys(&self, request_peer: bool) -> Result<(), TlsError> {
        let mut st = self.state.lock();
        if let Some(e) = &st.fatal {
            return Err(e.clone());
        }
        if st.established != Established::Established {
            return Err(TlsError::InternalError);
        }
        let Some(neg) = st.negotiated.as_mut() else {
            return Err(TlsError::InternalError);
        };
        let suite = neg.suite;
        let SessionSecrets::Tls13 {
            client_app,
            server_app,
            ..
        } = &mut neg.secrets
        else {
            return Err(TlsError::UnexpectedMessage);
        };
        let own_secret = match self.role {
            Role::Client => client_app,
            Role::Server => server_app,
        };
        let next = update_traffic_secret(suite.hash, own_secret);
        let req = if request_peer {
            KeyUpdateRequest::UpdateRequested
        } else {
            KeyUpdateRequest::UpdateNotRequested
        };
        let mut wr = self.write.lock();
        if let Some(e) = &wr.dead {
            return Err(e.clone());
        }
        let msg = HandshakePayload::KeyUpdate(req).encode();
        wr.tx
            .send_bytes(&*self.backend, ContentType::Handshake, &msg)?;
        wr.tx.state.install(Epoch::tls13(suite, &next)?);
        *own_secret = next;
        Ok(())
    }

    /// Close the connection: send close_notify if the handshake completed
    /// and the peer has not already closed, then close the transport.
    /// Idempotent.
    pub fn close(&self) {
        let mut st = self.state.lock();
        if st.closed {
            return;
        }
        st.closed = true;
        let mut rd = self.read.lock();
        let mut wr = self.write.lock();
        let should_notify = st.established == Established::Established
            && st.fatal.is_none()
            && !rd.peer_closed
            && !wr.sent_close_notify
            && wr.dead.is_none();
        if should_notify {
            let _ = wr.tx.send_bytes(
                &*self.backend,
                ContentType::Alert,
                &[
                    AlertLevel::Warning as u8,
                    AlertDescription::CloseNotify as u8,
                ],
            );
            wr.sent_close_notify = true;
        }
        let _ = self.backend.flush();
        self.backend.close();
        st.fatal.get_or_insert(TlsError::ConnectionClosed);
        rd.eof = true;
        wr.dead.get_or_insert(TlsError::ConnectionClosed);
    }

    /// Replace the hooks table. The packet logger is snapshotted into both
    /// record halves.
    pub fn set_hooks(&self, hooks: Hooks) {
        let mut st = self.state.lock();
        let mut rd = self.read.lock();
        let mut wr = self.write.lock();
        rd.rx.packet_log = hooks.on_packet.clone();
        wr.tx.packet_log = hooks.on_packet.clone();
        st.hooks = hooks;
    }

    /// Establishment progress.
    pub fn established(&self) -> Established {
        self.state.lock().established
    }

    /// Negotiated protocol version, once established.
    pub fn version(&self) -> Option<TlsVersion> {
        self.state.lock().negotiated.as_ref().map(|n| n.version)
    }

    /// Negotiated cipher suite id, once established.
    pub fn cipher_suite(&self) -> Option<u16> {
        self.state.lock().negotiated.as_ref().map(|n| n.suite.id)
    }

    /// Negotiated ALPN protocol, if any.
    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.state
            .lock()
            .negotiated
            .as_ref()
            .and_then(|n| n.alpn.clone())
    }

    /// Peer certificate chain (DER, leaf first). Empty on PSK resumption.
    pub fn peer_certificates(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .negotiated
            .as_ref()
            .map(|n| n.peer_chain.clone())
            .unwrap_or_default()
    }

    /// Our Finished verify_data, for channel binding.
    pub fn get_finished(&self) -> Option<Vec<u8>> {
        self.state
            .lock()
            .negotiated
            .as_ref()
            .map(|n| n.local_finished.clone())
    }

    /// The peer's Finished verify_data, for channel binding.
    pub fn get_peer_finished(&self) -> Option<Vec<u8>> {
        self.state
            .lock()
            .negotiated
            .as_ref()
            .map(|n| n.peer_finished.clone())
    }

    /// RFC 5705 / RFC 8446 keying-material exporter.
    pub fn get_tls_exporter(
        &self,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, TlsError> {
        let st = self.state.lock();
        let neg = st.negotiated.as_ref().ok_or(TlsError::InternalError)?;
        // HKDF-Expand caps one expansion at 255 hash blocks.
        if length > 255 * neg.suite.hash.output_len() {
            return Err(TlsError::InternalError);
        }
        match &neg.secrets {
            SessionSecrets::Tls13 {
                exporter_master, ..
            } => Ok(exporter13(
                neg.suite.hash,
                exporter_master,
                label,
                context,
                length,
            )),
            SessionSecrets::Tls12 { master } => Ok(exporter12(
                neg.suite.hash,
                master,
                label,
                &neg.client_random,
                &neg.server_random,
                Some(context),
                length,
            )),
        }
    }
}
