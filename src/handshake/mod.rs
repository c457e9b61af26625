//! Handshake state machines.
//!
//! The drivers in `client` and `server` are written as straight-line flows:
//! each expected message is received and checked in order, and anything out
//! of order fails with `UnexpectedMessage`. This module carries the plumbing
//! they share — record-level message I/O, handshake reassembly, negotiation
//! helpers, and the signature/finished computations common to both roles.

extern crate alloc;

pub mod client;
pub mod server;

use alloc::vec::Vec;

use zeroize::Zeroizing;

use crate::backend::Backend;
use crate::codec::{HandshakePayload, NamedGroup, SignatureScheme};
use crate::crypto::HashAlgorithm;
use crate::hooks::Hooks;
use crate::key_schedule::finished_key;
use crate::record::{ContentType, RecordReceiver, RecordSender};
use crate::suites::CipherSuite;
use crate::transcript::Transcript;
use crate::{AlertDescription, AlertLevel, TlsError, TlsVersion};

/// Bound on records skipped while discarding rejected early data.
const MAX_SKIPPED_RECORDS: usize = 64;

/// Reassembles handshake messages out of record fragments.
///
/// Messages may coalesce within one record or span several; the buffer
/// lives in the connection's read state because post-handshake messages
/// (tickets, key updates) keep arriving after the handshake is done.
pub struct HandshakeJoiner {
    buf: Vec<u8>,
}

impl HandshakeJoiner {
    pub fn new() -> Self {
        HandshakeJoiner { buf: Vec::new() }
    }

    /// Append one record's worth of handshake bytes.
    pub fn push_fragment(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Whether a partial message is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete message, if one is buffered.
    ///
    /// Returns the parsed payload together with its raw wire bytes (the
    /// transcript wants the bytes, not the value).
    pub fn next_message(
        &mut self,
        version: Option<TlsVersion>,
    ) -> Result<Option<(HandshakePayload, Vec<u8>)>, TlsError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = ((self.buf[1] as usize) << 16) | ((self.buf[2] as usize) << 8)
            | (self.buf[3] as usize);
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let raw: Vec<u8> = self.buf.drain(..4 + len).collect();
        let payload = HandshakePayload::parse(raw[0], &raw[4..], version)?;
        Ok(Some((payload, raw)))
    }
}

impl Default for HandshakeJoiner {
    fn default() -> Self {
        Self::new()
    }
}

/// One record-layer event as seen by a handshake driver.
pub enum Event {
    Message(HandshakePayload, Vec<u8>),
    ChangeCipherSpec,
}

/// The I/O face a handshake driver works through: record halves, transcript,
/// reassembly, and the receive hooks.
pub struct Io<'a> {
    pub backend: &'a dyn Backend,
    pub tx: &'a mut RecordSender,
    pub rx: &'a mut RecordReceiver,
    pub joiner: &'a mut HandshakeJoiner,
    pub transcript: &'a mut Transcript,
    pub hooks: &'a Hooks,
    /// Set once the version is negotiated; selects message parsing.
    pub version: Option<TlsVersion>,
    /// Discard undecryptable records (rejected early data) until the flag is
    /// cleared again.
    pub skip_undecryptable: bool,
    skipped: usize,
}

impl<'a> Io<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        tx: &'a mut RecordSender,
        rx: &'a mut RecordReceiver,
        joiner: &'a mut HandshakeJoiner,
        transcript: &'a mut Transcript,
        hooks: &'a Hooks,
    ) -> Self {
        Io {
            backend,
            tx,
            rx,
            joiner,
            transcript,
            hooks,
            version: None,
            skip_undecryptable: false,
            skipped: 0,
        }
    }

    /// Encode, transcript, and send one handshake message.
    pub fn send_handshake(&mut self, payload: &HandshakePayload) -> Result<(), TlsError> {
        let bytes = payload.encode();
        self.send_raw_handshake(&bytes)
    }

    /// Send pre-encoded handshake bytes (used when the wire bytes were
    /// patched after encoding, e.g. PSK binders).
    pub fn send_raw_handshake(&mut self, bytes: &[u8]) -> Result<(), TlsError> {
        self.transcript.push(bytes);
        self.tx
            .send_bytes(self.backend, ContentType::Handshake, bytes)
    }

    /// Send a change_cipher_spec record.
    pub fn send_ccs(&mut self) -> Result<(), TlsError> {
        self.tx
            .send_bytes(self.backend, ContentType::ChangeCipherSpec, &[1])
    }

    /// Send an alert record.
    pub fn send_alert(
        &mut self,
        level: AlertLevel,
        desc: AlertDescription,
    ) -> Result<(), TlsError> {
        self.tx
            .send_bytes(self.backend, ContentType::Alert, &[level as u8, desc as u8])
    }

    /// Receive the next handshake message or change_cipher_spec.
    ///
    /// The message is *not* appended to the transcript; callers push the raw
    /// bytes themselves (HelloRetryRequest and PSK binders need the gap).
    pub fn recv_event(&mut self) -> Result<Event, TlsError> {
        loop {
            if let Some((payload, raw)) = self.joiner.next_message(self.version)? {
                let (payload, raw) = self.apply_hook(payload, raw);
                return Ok(Event::Message(payload, raw));
            }

            let (typ, data) = match self.rx.recv_record(self.backend) {
                Ok(v) => v,
                Err(TlsError::BadRecordMac)
                    if self.skip_undecryptable && self.skipped < MAX_SKIPPED_RECORDS =>
                {
                    self.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match typ {
                ContentType::Handshake => {
                    if data.is_empty() {
                        return Err(TlsError::DecodeError);
                    }
                    self.joiner.push_fragment(&data);
                }
                ContentType::ChangeCipherSpec => {
                    if data != [1] {
                        return Err(TlsError::DecodeError);
                    }
                    // A message must never span an epoch boundary.
                    if !self.joiner.is_empty() {
                        return Err(TlsError::UnexpectedMessage);
                    }
                    return Ok(Event::ChangeCipherSpec);
                }
                ContentType::Alert => self.handle_alert(&data)?,
                ContentType::ApplicationData => return Err(TlsError::UnexpectedMessage),
            }
        }
    }

    /// Receive a handshake message, tolerating compatibility
    /// change_cipher_spec records (TLS 1.3 paths).
    pub fn recv_message(&mut self) -> Result<(HandshakePayload, Vec<u8>), TlsError> {
        for _ in 0..4 {
            match self.recv_event()? {
                Event::Message(payload, raw) => return Ok((payload, raw)),
                Event::ChangeCipherSpec => continue,
            }
        }
        Err(TlsError::UnexpectedMessage)
    }

    /// Receive a handshake message and append it to the transcript.
    pub fn recv_transcripted(&mut self) -> Result<HandshakePayload, TlsError> {
        let (payload, raw) = self.recv_message()?;
        self.transcript.push(&raw);
        Ok(payload)
    }

    fn apply_hook(
        &self,
        payload: HandshakePayload,
        raw: Vec<u8>,
    ) -> (HandshakePayload, Vec<u8>) {
        let hook = match self.version {
            Some(TlsVersion::Tls13) => self.hooks.on_recv_handshake13.as_ref(),
            _ => self.hooks.on_recv_handshake.as_ref(),
        };
        match hook {
            Some(f) => {
                let rewritten = f(payload);
                let raw = rewritten.encode();
                (rewritten, raw)
            }
            None => (payload, raw),
        }
    }

    fn handle_alert(&mut self, data: &[u8]) -> Result<(), TlsError> {
        if data.len() != 2 {
            return Err(TlsError::DecodeError);
        }
        let level = AlertLevel::from_byte(data[0]);
        let desc = AlertDescription::from_byte(data[1]);
        match (level, desc) {
            (_, Some(AlertDescription::CloseNotify)) => Err(TlsError::CloseNotify),
            (Some(AlertLevel::Fatal), Some(d)) => Err(TlsError::AlertReceived(d)),
            (Some(AlertLevel::Fatal), None) => {
                Err(TlsError::AlertReceived(AlertDescription::InternalError))
            }
            // Warnings (user_canceled and friends) don't end the handshake.
            (Some(AlertLevel::Warning), _) => {
                log::debug!("ignoring warning alert {:?}", data[1]);
                Ok(())
            }
            (None, _) => Err(TlsError::DecodeError),
        }
    }
}

// ── Negotiation helpers ─────────────────────────────────────

/// First of ours that the peer also lists.
pub fn select_group(ours: &[NamedGroup], theirs: &[u16]) -> Option<NamedGroup> {
    ours.iter()
        .copied()
        .find(|g| theirs.contains(&(*g as u16)))
}

/// First of ours that the peer also lists.
pub fn select_scheme(ours: &[SignatureScheme], theirs: &[u16]) -> Option<SignatureScheme> {
    ours.iter()
        .copied()
        .find(|s| theirs.contains(&(*s as u16)))
}

/// ALPN selection, local preference order winning.
pub fn select_alpn(ours: &[Vec<u8>], theirs: &[Vec<u8>]) -> Option<Vec<u8>> {
    ours.iter().find(|p| theirs.contains(p)).cloned()
}

// ── Signature and Finished computations ─────────────────────

/// The bytes a TLS 1.3 CertificateVerify signature covers
/// (RFC 8446 §4.4.3): 64 spaces, context string, NUL, transcript hash.
pub fn certificate_verify_content(context: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    out.extend_from_slice(&[0x20; 64]);
    out.extend_from_slice(context);
    out.push(0);
    out.extend_from_slice(transcript_hash);
    out
}

pub const CV_CONTEXT_SERVER: &[u8] = b"TLS 1.3, server CertificateVerify";
pub const CV_CONTEXT_CLIENT: &[u8] = b"TLS 1.3, client CertificateVerify";

/// TLS 1.3 Finished verify_data over a base traffic secret.
pub fn verify_data13(
    hash: HashAlgorithm,
    base_secret: &[u8],
    transcript_hash: &[u8],
) -> Vec<u8> {
    let key = finished_key(hash, base_secret);
    hash.hmac(&key, transcript_hash)
}

// ── Shared handshake output ─────────────────────────────────

/// Secrets retained after the handshake, by version.
pub enum SessionSecrets {
    Tls12 {
        master: Zeroizing<Vec<u8>>,
    },
    Tls13 {
        /// Current application traffic secrets (rotated by KeyUpdate).
        client_app: Zeroizing<Vec<u8>>,
        server_app: Zeroizing<Vec<u8>>,
        exporter_master: Zeroizing<Vec<u8>>,
        resumption_master: Zeroizing<Vec<u8>>,
    },
}

/// Everything the connection keeps once the handshake completes.
pub struct Negotiated {
    pub version: TlsVersion,
    pub suite: &'static CipherSuite,
    pub alpn: Option<Vec<u8>>,
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    pub local_finished: Vec<u8>,
    pub peer_finished: Vec<u8>,
    pub secrets: SessionSecrets,
    /// Peer certificate chain (DER, leaf first); empty on PSK resumption.
    pub peer_chain: Vec<Vec<u8>>,
    /// Client certificate chain this endpoint presented, if any.
    pub local_chain: Vec<Vec<u8>>,
}

/// Work queued during the handshake to run right after it completes.
pub enum PendingAction {
    /// Send a TLS 1.3 NewSessionTicket (already encoded).
    SendTicket(Vec<u8>),
}

/// A driver's result: the negotiated connection plus queued actions.
pub struct HandshakeOutput {
    pub negotiated: Negotiated,
    pub pending: Vec<PendingAction>,
}

// ── Small shared utilities ──────────────────────────────────

/// Expectation helper: the error every wrong-message arm returns.
pub fn unexpected<T>(payload: &HandshakePayload) -> Result<T, TlsError> {
    log::debug!("unexpected handshake message: {:?}", payload.typ());
    Err(TlsError::UnexpectedMessage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HandshakeType;
    use alloc::vec;

    #[test]
    fn joiner_coalesced_messages() {
        let mut j = HandshakeJoiner::new();
        let a = HandshakePayload::ServerHelloDone.encode();
        let b = HandshakePayload::Finished(vec![0; 12]).encode();
        let mut both = a.clone();
        both.extend_from_slice(&b);
        j.push_fragment(&both);

        let (m1, raw1) = j
            .next_message(Some(TlsVersion::Tls12))
            .unwrap()
            .unwrap();
        assert_eq!(m1.typ(), HandshakeType::ServerHelloDone);
        assert_eq!(raw1, a);
        let (m2, _) = j.next_message(Some(TlsVersion::Tls12)).unwrap().unwrap();
        assert_eq!(m2.typ(), HandshakeType::Finished);
        assert!(j.next_message(Some(TlsVersion::Tls12)).unwrap().is_none());
    }

    #[test]
    fn joiner_spanning_message() {
        let mut j = HandshakeJoiner::new();
        let msg = HandshakePayload::Finished(vec![7; 32]).encode();
        let (first, second) = msg.split_at(10);
        j.push_fragment(first);
        assert!(j.next_message(Some(TlsVersion::Tls13)).unwrap().is_none());
        assert!(!j.is_empty());
        j.push_fragment(second);
        let (m, raw) = j.next_message(Some(TlsVersion::Tls13)).unwrap().unwrap();
        assert_eq!(m, HandshakePayload::Finished(vec![7; 32]));
        assert_eq!(raw, msg);
    }

    #[test]
    fn selection_helpers_prefer_ours() {
        let ours = [NamedGroup::X25519, NamedGroup::Secp256r1];
        assert_eq!(
            select_group(&ours, &[0x0017, 0x001D]),
            Some(NamedGroup::X25519)
        );
        assert_eq!(select_group(&ours, &[0x0019]), None);

        let alpn = select_alpn(
            &[b"h2".to_vec(), b"http/1.1".to_vec()],
            &[b"http/1.1".to_vec(), b"h2".to_vec()],
        );
        assert_eq!(alpn, Some(b"h2".to_vec()));
    }

    #[test]
    fn certificate_verify_layout() {
        let content = certificate_verify_content(CV_CONTEXT_SERVER, &[0xAA; 32]);
        assert_eq!(&content[..64], &[0x20; 64][..]);
        assert_eq!(&content[64..64 + CV_CONTEXT_SERVER.len()], CV_CONTEXT_SERVER);
        assert_eq!(content[64 + CV_CONTEXT_SERVER.len()], 0);
        assert_eq!(&content[64 + CV_CONTEXT_SERVER.len() + 1..], &[0xAA; 32][..]);
    }
}
