//! TLS record layer.
//!
//! Frames and deframes records, applies the current read/write encryption
//! epoch, and enforces the length and sequence rules. One structure serves
//! both protocol versions; an epoch kind selects nonce construction and
//! TLS 1.3 inner-content-type handling.

extern crate alloc;

use alloc::vec::Vec;

use zeroize::Zeroizing;

use crate::backend::Backend;
use crate::crypto::AeadKey;
use crate::hooks::PacketLogger;
use crate::key_schedule::traffic_keys;
use crate::suites::CipherSuite;
use crate::TlsError;

/// Maximum plaintext fragment size.
pub const MAX_PLAINTEXT: usize = 16384;

/// Maximum ciphertext fragment size a peer may send us.
pub const MAX_CIPHERTEXT: usize = MAX_PLAINTEXT + 256;

const HEADER_LEN: usize = 5;

/// Content type of a TLS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// How an epoch builds nonces and frames ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EpochKind {
    /// TLS 1.2 GCM: 4-byte implicit salt, 8-byte explicit nonce on the wire.
    Tls12GcmExplicit,
    /// TLS 1.2 ChaCha20-Poly1305 (RFC 7905): 12-byte IV XOR sequence.
    Tls12ChaCha,
    /// TLS 1.3: 12-byte IV XOR sequence, inner content type, outer type 23.
    Tls13,
}

/// One direction's cipher state: AEAD key, static IV, and framing kind.
pub struct Epoch {
    aead: AeadKey,
    iv: Zeroizing<Vec<u8>>,
    kind: EpochKind,
}

impl Epoch {
    /// Build a TLS 1.3 epoch from a traffic secret.
    pub fn tls13(suite: &'static CipherSuite, traffic_secret: &[u8]) -> Result<Self, TlsError> {
        let (key, iv) = traffic_keys(suite.hash, suite.aead, traffic_secret);
        Ok(Epoch {
            aead: AeadKey::new(suite.aead, &key)?,
            iv,
            kind: EpochKind::Tls13,
        })
    }

    /// Build a TLS 1.2 epoch from key-block material.
    pub fn tls12(suite: &'static CipherSuite, key: &[u8], iv: &[u8]) -> Result<Self, TlsError> {
        let kind = match suite.aead.tls12_explicit_nonce_len() {
            0 => EpochKind::Tls12ChaCha,
            _ => EpochKind::Tls12GcmExplicit,
        };
        Ok(Epoch {
            aead: AeadKey::new(suite.aead, key)?,
            iv: Zeroizing::new(iv.to_vec()),
            kind,
        })
    }

    /// nonce = static IV XOR big-endian sequence (12-byte IV kinds).
    fn xor_nonce(&self, seq: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&self.iv);
        for (i, b) in seq.to_be_bytes().iter().enumerate() {
            nonce[4 + i] ^= b;
        }
        nonce
    }

    /// nonce = 4-byte salt || 8-byte explicit (TLS 1.2 GCM).
    fn explicit_nonce(&self, explicit: &[u8; 8]) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.iv);
        nonce[4..].copy_from_slice(explicit);
        nonce
    }
}

/// Per-direction record state: current epoch, pending next epoch, sequence.
pub struct DirectionState {
    epoch: Option<Epoch>,
    pending: Option<Epoch>,
    seq: u64,
}

impl DirectionState {
    /// Null-cipher initial state.
    pub fn new() -> Self {
        DirectionState {
            epoch: None,
            pending: None,
            seq: 0,
        }
    }

    /// Whether records are currently encrypted in this direction.
    pub fn is_active(&self) -> bool {
        self.epoch.is_some()
    }

    /// Current sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Stage the next epoch; it takes effect at [`DirectionState::swap`]
    /// (TLS 1.2 ChangeCipherSpec discipline).
    pub fn set_pending(&mut self, epoch: Epoch) {
        self.pending = Some(epoch);
    }

    /// Swap in the staged epoch; the sequence number resets to zero.
    pub fn swap(&mut self) -> Result<(), TlsError> {
        let next = self.pending.take().ok_or(TlsError::UnexpectedMessage)?;
        self.epoch = Some(next);
        self.seq = 0;
        Ok(())
    }

    /// Install an epoch immediately (TLS 1.3 key transitions).
    pub fn install(&mut self, epoch: Epoch) {
        self.epoch = Some(epoch);
        self.pending = None;
        self.seq = 0;
    }

    fn next_seq(&mut self) -> Result<u64, TlsError> {
        if self.seq == u64::MAX {
            return Err(TlsError::SeqOverflow);
        }
        let seq = self.seq;
        self.seq += 1;
        Ok(seq)
    }
}

impl Default for DirectionState {
    fn default() -> Self {
        Self::new()
    }
}

fn header(content_type: ContentType, version: u16, len: usize) -> [u8; HEADER_LEN] {
    [
        content_type as u8,
        (version >> 8) as u8,
        version as u8,
        (len >> 8) as u8,
        len as u8,
    ]
}

/// TLS 1.2 AEAD additional data: seq || type || version || plaintext length.
fn aad_tls12(seq: u64, content_type: ContentType, len: usize) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&seq.to_be_bytes());
    aad[8] = content_type as u8;
    aad[9] = 0x03;
    aad[10] = 0x03;
    aad[11] = (len >> 8) as u8;
    aad[12] = len as u8;
    aad
}

/// Encrypt and frame one fragment (≤ [`MAX_PLAINTEXT`] bytes).
///
/// `legacy_version` is what goes in the outer header of plaintext records
/// (the first client record says 0x0301 for middlebox tolerance).
pub fn encrypt_record(
    dir: &mut DirectionState,
    content_type: ContentType,
    payload: &[u8],
    legacy_version: u16,
) -> Result<Vec<u8>, TlsError> {
    debug_assert!(payload.len() <= MAX_PLAINTEXT);

    let Some(epoch) = &dir.epoch else {
        // Null cipher: pass through.
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&header(content_type, legacy_version, payload.len()));
        out.extend_from_slice(payload);
        return Ok(out);
    };

    // TLS 1.3 change_cipher_spec compatibility records stay plaintext.
    if epoch.kind == EpochKind::Tls13 && content_type == ContentType::ChangeCipherSpec {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&header(content_type, 0x0303, payload.len()));
        out.extend_from_slice(payload);
        return Ok(out);
    }

    let seq = dir.next_seq()?;
    let epoch = dir.epoch.as_ref().expect("checked above");
    match epoch.kind {
        EpochKind::Tls13 => {
            let mut inner = Vec::with_capacity(payload.len() + 1);
            inner.extend_from_slice(payload);
            inner.push(content_type as u8);
            let total = inner.len() + epoch.aead.algorithm().tag_len();
            let hdr = header(ContentType::ApplicationData, 0x0303, total);
            let nonce = epoch.xor_nonce(seq);
            let sealed = epoch.aead.seal(&nonce, &hdr, &inner);
            let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
            out.extend_from_slice(&hdr);
            out.extend_from_slice(&sealed);
            Ok(out)
        }
        EpochKind::Tls12GcmExplicit => {
            let explicit = seq.to_be_bytes();
            let nonce = epoch.explicit_nonce(&explicit);
            let aad = aad_tls12(seq, content_type, payload.len());
            let sealed = epoch.aead.seal(&nonce, &aad, payload);
            let total = explicit.len() + sealed.len();
            let mut out = Vec::with_capacity(HEADER_LEN + total);
            out.extend_from_slice(&header(content_type, 0x0303, total));
            out.extend_from_slice(&explicit);
            out.extend_from_slice(&sealed);
            Ok(out)
        }
        EpochKind::Tls12ChaCha => {
            let nonce = epoch.xor_nonce(seq);
            let aad = aad_tls12(seq, content_type, payload.len());
            let sealed = epoch.aead.seal(&nonce, &aad, payload);
            let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
            out.extend_from_slice(&header(content_type, 0x0303, sealed.len()));
            out.extend_from_slice(&sealed);
            Ok(out)
        }
    }
}

/// Decrypt one received record body under the current epoch.
pub fn decrypt_record(
    dir: &mut DirectionState,
    content_type: ContentType,
    payload: &[u8],
) -> Result<(ContentType, Vec<u8>), TlsError> {
    if dir.epoch.is_none() {
        return Ok((content_type, payload.to_vec()));
    }

    // TLS 1.3 tolerates plaintext change_cipher_spec mid-handshake; TLS 1.2
    // never encrypts it either.
    if content_type == ContentType::ChangeCipherSpec {
        return Ok((content_type, payload.to_vec()));
    }

    if dir.seq == u64::MAX {
        return Err(TlsError::SeqOverflow);
    }
    let seq = dir.seq;
    let epoch = dir.epoch.as_ref().expect("checked above");
    let result = match epoch.kind {
        EpochKind::Tls13 => {
            if content_type != ContentType::ApplicationData {
                // Alerts and handshake are wrapped once keys are live.
                return Err(TlsError::UnexpectedMessage);
            }
            let hdr = header(ContentType::ApplicationData, 0x0303, payload.len());
            let nonce = epoch.xor_nonce(seq);
            epoch.aead.open(&nonce, &hdr, payload).and_then(|mut inner| {
                // Strip zero padding; the last non-zero byte is the true type.
                while let Some(0) = inner.last() {
                    inner.pop();
                }
                let typ = inner
                    .pop()
                    .and_then(ContentType::from_byte)
                    .ok_or(TlsError::DecodeError)?;
                Ok((typ, inner))
            })
        }
        EpochKind::Tls12GcmExplicit => {
            if payload.len() < 8 {
                return Err(TlsError::BadRecordMac);
            }
            let (explicit, sealed) = payload.split_at(8);
            let plain_len = sealed
                .len()
                .checked_sub(epoch.aead.algorithm().tag_len())
                .ok_or(TlsError::BadRecordMac)?;
            let nonce = epoch.explicit_nonce(explicit.try_into().expect("length checked"));
            let aad = aad_tls12(seq, content_type, plain_len);
            epoch
                .aead
                .open(&nonce, &aad, sealed)
                .map(|plain| (content_type, plain))
        }
        EpochKind::Tls12ChaCha => {
            let plain_len = payload
                .len()
                .checked_sub(epoch.aead.algorithm().tag_len())
                .ok_or(TlsError::BadRecordMac)?;
            let nonce = epoch.xor_nonce(seq);
            let aad = aad_tls12(seq, content_type, plain_len);
            epoch
                .aead
                .open(&nonce, &aad, payload)
                .map(|plain| (content_type, plain))
        }
    };
    // A failed decrypt must not consume the sequence number: the record may
    // be rejected early data the caller is skipping.
    if result.is_ok() {
        dir.seq += 1;
    }
    result
}

/// Sending half of the record layer. Guarded by the context's write lock.
pub struct RecordSender {
    pub state: DirectionState,
    /// First client record carries legacy version 0x0301.
    first_record_sent: bool,
    is_client: bool,
    pub packet_log: Option<PacketLogger>,
}

impl RecordSender {
    pub fn new(is_client: bool) -> Self {
        RecordSender {
            state: DirectionState::new(),
            first_record_sent: false,
            is_client,
            packet_log: None,
        }
    }

    /// Fragment, encrypt, and write `payload` as records of `content_type`.
    pub fn send_bytes(
        &mut self,
        backend: &dyn Backend,
        content_type: ContentType,
        payload: &[u8],
    ) -> Result<(), TlsError> {
        let legacy = if self.is_client && !self.first_record_sent {
            0x0301
        } else {
            0x0303
        };
        let mut chunks = payload.chunks(MAX_PLAINTEXT);
        // An empty payload still produces one (empty) record.
        let first = chunks.next().unwrap_or(&[]);
        self.send_one(backend, content_type, first, legacy)?;
        for chunk in chunks {
            self.send_one(backend, content_type, chunk, 0x0303)?;
        }
        Ok(())
    }

    fn send_one(
        &mut self,
        backend: &dyn Backend,
        content_type: ContentType,
        chunk: &[u8],
        legacy: u16,
    ) -> Result<(), TlsError> {
        let record = encrypt_record(&mut self.state, content_type, chunk, legacy)?;
        self.first_record_sent = true;
        if let Some(log) = &self.packet_log {
            log("send", &record);
        }
        backend.send(&record)
    }
}

/// Receiving half of the record layer. Guarded by the context's read lock.
pub struct RecordReceiver {
    pub state: DirectionState,
    buf: Vec<u8>,
    pub packet_log: Option<PacketLogger>,
}

impl RecordReceiver {
    pub fn new() -> Self {
        RecordReceiver {
            state: DirectionState::new(),
            buf: Vec::new(),
            packet_log: None,
        }
    }

    /// Read exactly one record from the transport and decrypt it.
    ///
    /// Transport EOF surfaces as `ConnectionClosed` (an orderly close uses a
    /// close_notify alert first).
    pub fn recv_record(
        &mut self,
        backend: &dyn Backend,
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        self.fill_to(backend, HEADER_LEN)?;
        let content_type =
            ContentType::from_byte(self.buf[0]).ok_or(TlsError::DecodeError)?;
        // Legacy header version: 0x0300..0x0303 all occur in the wild; only
        // the major octet is meaningful.
        if self.buf[1] != 0x03 || self.buf[2] > 0x04 {
            return Err(TlsError::ProtocolVersion);
        }
        let len = ((self.buf[3] as usize) << 8) | (self.buf[4] as usize);
        if len > MAX_CIPHERTEXT {
            return Err(TlsError::RecordOverflow);
        }
        self.fill_to(backend, HEADER_LEN + len)?;

        let record: Vec<u8> = self.buf.drain(..HEADER_LEN + len).collect();
        if let Some(log) = &self.packet_log {
            log("recv", &record);
        }
        let (typ, plain) = decrypt_record(&mut self.state, content_type, &record[HEADER_LEN..])?;
        if plain.len() > MAX_PLAINTEXT {
            return Err(TlsError::RecordOverflow);
        }
        Ok((typ, plain))
    }

    fn fill_to(&mut self, backend: &dyn Backend, target: usize) -> Result<(), TlsError> {
        while self.buf.len() < target {
            let chunk = backend.recv(MAX_CIPHERTEXT + HEADER_LEN)?;
            if chunk.is_empty() {
                return Err(TlsError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk);
        }
        Ok(())
    }
}

impl Default for RecordReceiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites;
    use alloc::collections::VecDeque;
    use alloc::vec;
    use spin::Mutex;

    struct LoopBackend {
        data: Mutex<VecDeque<u8>>,
    }

    impl LoopBackend {
        fn new() -> Self {
            LoopBackend {
                data: Mutex::new(VecDeque::new()),
            }
        }
    }

    impl Backend for LoopBackend {
        fn send(&self, data: &[u8]) -> Result<(), TlsError> {
            self.data.lock().extend(data.iter().copied());
            Ok(())
        }

        fn recv(&self, max: usize) -> Result<Vec<u8>, TlsError> {
            let mut q = self.data.lock();
            let n = max.min(q.len());
            Ok(q.drain(..n).collect())
        }
    }

    fn paired_tls13() -> (DirectionState, DirectionState) {
        let suite = &suites::TLS13_AES_128_GCM_SHA256;
        let secret = [0x42u8; 32];
        let mut tx = DirectionState::new();
        let mut rx = DirectionState::new();
        tx.install(Epoch::tls13(suite, &secret).unwrap());
        rx.install(Epoch::tls13(suite, &secret).unwrap());
        (tx, rx)
    }

    #[test]
    fn tls13_round_trip_hides_content_type() {
        let (mut tx, mut rx) = paired_tls13();
        let record = encrypt_record(&mut tx, ContentType::Handshake, b"finished", 0x0303).unwrap();
        assert_eq!(record[0], ContentType::ApplicationData as u8);
        let (typ, plain) = decrypt_record(&mut rx, ContentType::ApplicationData, &record[5..]).unwrap();
        assert_eq!(typ, ContentType::Handshake);
        assert_eq!(plain, b"finished");
    }

    #[test]
    fn tls13_tamper_fails() {
        let (mut tx, mut rx) = paired_tls13();
        let mut record =
            encrypt_record(&mut tx, ContentType::ApplicationData, b"data", 0x0303).unwrap();
        let last = record.len() - 1;
        record[last] ^= 0x01;
        assert_eq!(
            decrypt_record(&mut rx, ContentType::ApplicationData, &record[5..]).unwrap_err(),
            TlsError::BadRecordMac
        );
    }

    #[test]
    fn reorder_detected_by_sequence() {
        let (mut tx, mut rx) = paired_tls13();
        let r1 = encrypt_record(&mut tx, ContentType::ApplicationData, b"one", 0x0303).unwrap();
        let r2 = encrypt_record(&mut tx, ContentType::ApplicationData, b"two", 0x0303).unwrap();
        assert_eq!(tx.seq(), 2);
        // Delivering r2 first decrypts under the wrong sequence number.
        assert_eq!(
            decrypt_record(&mut rx, ContentType::ApplicationData, &r2[5..]).unwrap_err(),
            TlsError::BadRecordMac
        );
        let _ = r1;
    }

    #[test]
    fn tls12_gcm_and_chacha_round_trip() {
        for suite in [
            &suites::ECDHE_ECDSA_AES_128_GCM_SHA256,
            &suites::ECDHE_ECDSA_CHACHA20_POLY1305_SHA256,
        ] {
            let key = vec![7u8; suite.aead.key_len()];
            let iv = vec![9u8; suite.aead.tls12_fixed_iv_len()];
            let mut tx = DirectionState::new();
            let mut rx = DirectionState::new();
            tx.set_pending(Epoch::tls12(suite, &key, &iv).unwrap());
            tx.swap().unwrap();
            rx.set_pending(Epoch::tls12(suite, &key, &iv).unwrap());
            rx.swap().unwrap();

            let record =
                encrypt_record(&mut tx, ContentType::ApplicationData, b"payload", 0x0303).unwrap();
            // TLS 1.2 keeps the true content type on the outside.
            assert_eq!(record[0], ContentType::ApplicationData as u8);
            let (typ, plain) =
                decrypt_record(&mut rx, ContentType::ApplicationData, &record[5..]).unwrap();
            assert_eq!(typ, ContentType::ApplicationData);
            assert_eq!(plain, b"payload");
        }
    }

    #[test]
    fn swap_without_pending_fails() {
        let mut dir = DirectionState::new();
        assert_eq!(dir.swap().unwrap_err(), TlsError::UnexpectedMessage);
    }

    #[test]
    fn swap_resets_sequence() {
        let suite = &suites::TLS13_AES_128_GCM_SHA256;
        let mut tx = DirectionState::new();
        tx.install(Epoch::tls13(suite, &[1u8; 32]).unwrap());
        for _ in 0..3 {
            encrypt_record(&mut tx, ContentType::ApplicationData, b"x", 0x0303).unwrap();
        }
        assert_eq!(tx.seq(), 3);
        tx.install(Epoch::tls13(suite, &[2u8; 32]).unwrap());
        assert_eq!(tx.seq(), 0);
    }

    #[test]
    fn oversized_record_rejected() {
        let backend = LoopBackend::new();
        // Header claiming 17000 bytes.
        backend.send(&[22, 0x03, 0x03, 0x42, 0x68]).unwrap();
        let mut rx = RecordReceiver::new();
        assert_eq!(
            rx.recv_record(&backend).unwrap_err(),
            TlsError::RecordOverflow
        );
    }

    #[test]
    fn sender_fragments_large_payloads() {
        let backend = LoopBackend::new();
        let mut sender = RecordSender::new(false);
        let payload = vec![0xAA; MAX_PLAINTEXT + 100];
        sender
            .send_bytes(&backend, ContentType::ApplicationData, &payload)
            .unwrap();

        let mut rx = RecordReceiver::new();
        let (_, first) = rx.recv_record(&backend).unwrap();
        let (_, second) = rx.recv_record(&backend).unwrap();
        assert_eq!(first.len(), MAX_PLAINTEXT);
        assert_eq!(second.len(), 100);
    }

    #[test]
    fn first_client_record_uses_tls10_legacy_version() {
        let backend = LoopBackend::new();
        let mut sender = RecordSender::new(true);
        sender
            .send_bytes(&backend, ContentType::Handshake, b"hello")
            .unwrap();
        sender
            .send_bytes(&backend, ContentType::Handshake, b"again")
            .unwrap();
        let raw = backend.data.lock().iter().copied().collect::<Vec<u8>>();
        assert_eq!(&raw[1..3], &[0x03, 0x01]);
        let second_hdr = 5 + 5;
        assert_eq!(&raw[second_hdr + 1..second_hdr + 3], &[0x03, 0x03]);
    }

    #[test]
    fn transport_eof_is_connection_closed() {
        let backend = LoopBackend::new();
        let mut rx = RecordReceiver::new();
        assert_eq!(
            rx.recv_record(&backend).unwrap_err(),
            TlsError::ConnectionClosed
        );
    }
}
