//! Handshake message types and their wire codecs.
//!
//! Parsing is version-sensitive where the wire is: message type 4 is the
//! RFC 5077 ticket in TLS 1.2 and the RFC 8446 ticket in TLS 1.3, and the
//! Certificate / CertificateRequest bodies differ between versions.

extern crate alloc;

use alloc::vec::Vec;

use super::extensions::*;
use super::{put_u24, put_u32, put_vec16, put_vec24, put_vec8, HandshakeType, Reader};
use crate::{TlsError, TlsVersion};

/// The fixed ServerHello random that marks a HelloRetryRequest
/// (SHA-256 of "HelloRetryRequest", RFC 8446 §4.1.3).
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8,
    0x91, 0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8,
    0x33, 0x9C,
];

/// Downgrade-protection sentinel for a TLS 1.3-capable server negotiating
/// TLS 1.2, written into the last 8 bytes of the ServerHello random
/// (RFC 8446 §4.1.3).
pub const DOWNGRADE_SENTINEL_TLS12: [u8; 8] = *b"DOWNGRD\x01";

const LEGACY_VERSION: u16 = 0x0303;

/// ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<ClientExtension>,
}

impl ClientHello {
    fn encode_body(&self, out: &mut Vec<u8>) {
        super::put_u16(out, LEGACY_VERSION);
        out.extend_from_slice(&self.client_random);
        put_vec8(out, &self.session_id);
        let mut suites = Vec::new();
        for s in &self.cipher_suites {
            super::put_u16(&mut suites, *s);
        }
        put_vec16(out, &suites);
        put_vec8(out, &self.compression_methods);
        encode_client_extensions(&self.extensions, out);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        if r.u16()? != LEGACY_VERSION {
            return Err(TlsError::DecodeError);
        }
        let mut client_random = [0u8; 32];
        client_random.copy_from_slice(r.take(32)?);
        let session_id = r.vec8()?;
        if session_id.len() > 32 {
            return Err(TlsError::DecodeError);
        }
        let raw_suites = r.vec16()?;
        if raw_suites.is_empty() || raw_suites.len() % 2 != 0 {
            return Err(TlsError::DecodeError);
        }
        let mut cipher_suites = Vec::with_capacity(raw_suites.len() / 2);
        for pair in raw_suites.chunks(2) {
            cipher_suites.push(u16::from_be_bytes([pair[0], pair[1]]));
        }
        let compression_methods = r.vec8()?.to_vec();
        if compression_methods.is_empty() {
            return Err(TlsError::DecodeError);
        }
        let extensions = parse_client_extensions(r)?;
        Ok(ClientHello {
            client_random,
            session_id: session_id.to_vec(),
            cipher_suites,
            compression_methods,
            extensions,
        })
    }

    /// First extension matching the predicate.
    fn find<'a, T>(&'a self, f: impl Fn(&'a ClientExtension) -> Option<T>) -> Option<T> {
        self.extensions.iter().find_map(f)
    }

    pub fn server_name(&self) -> Option<&[u8]> {
        self.find(|e| match e {
            ClientExtension::ServerName(n) => Some(n.as_slice()),
            _ => None,
        })
    }

    pub fn supported_versions(&self) -> Option<&[u16]> {
        self.find(|e| match e {
            ClientExtension::SupportedVersions(v) => Some(v.as_slice()),
            _ => None,
        })
    }

    pub fn supported_groups(&self) -> Option<&[u16]> {
        self.find(|e| match e {
            ClientExtension::SupportedGroups(g) => Some(g.as_slice()),
            _ => None,
        })
    }

    pub fn signature_algorithms(&self) -> Option<&[u16]> {
        self.find(|e| match e {
            ClientExtension::SignatureAlgorithms(s) => Some(s.as_slice()),
            _ => None,
        })
    }

    pub fn alpn_protocols(&self) -> Option<&[Vec<u8>]> {
        self.find(|e| match e {
            ClientExtension::Protocols(p) => Some(p.as_slice()),
            _ => None,
        })
    }

    pub fn key_shares(&self) -> Option<&[KeyShareEntry]> {
        self.find(|e| match e {
            ClientExtension::KeyShare(k) => Some(k.as_slice()),
            _ => None,
        })
    }

    pub fn psk_offer(&self) -> Option<&PskOffer> {
        self.find(|e| match e {
            ClientExtension::PreSharedKey(p) => Some(p),
            _ => None,
        })
    }

    pub fn psk_modes(&self) -> Option<&[u8]> {
        self.find(|e| match e {
            ClientExtension::PskKeyExchangeModes(m) => Some(m.as_slice()),
            _ => None,
        })
    }

    pub fn session_ticket(&self) -> Option<&[u8]> {
        self.find(|e| match e {
            ClientExtension::SessionTicket(t) => Some(t.as_slice()),
            _ => None,
        })
    }

    pub fn offers_early_data(&self) -> bool {
        self.extensions
            .iter()
            .any(|e| matches!(e, ClientExtension::EarlyData))
    }
}

/// ServerHello (also carries HelloRetryRequest, distinguished by random).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub extensions: Vec<ServerExtension>,
}

impl ServerHello {
    /// Whether this ServerHello is a HelloRetryRequest.
    pub fn is_hello_retry(&self) -> bool {
        self.server_random == HELLO_RETRY_REQUEST_RANDOM
    }

    /// Whether the random carries the TLS 1.2 downgrade sentinel.
    pub fn has_downgrade_sentinel(&self) -> bool {
        self.server_random[24..] == DOWNGRADE_SENTINEL_TLS12
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        super::put_u16(out, LEGACY_VERSION);
        out.extend_from_slice(&self.server_random);
        put_vec8(out, &self.session_id);
        super::put_u16(out, self.cipher_suite);
        out.push(0); // null compression
        encode_server_extensions(&self.extensions, out);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        if r.u16()? != LEGACY_VERSION {
            return Err(TlsError::DecodeError);
        }
        let mut server_random = [0u8; 32];
        server_random.copy_from_slice(r.take(32)?);
        let session_id = r.vec8()?.to_vec();
        if session_id.len() > 32 {
            return Err(TlsError::DecodeError);
        }
        let cipher_suite = r.u16()?;
        if r.u8()? != 0 {
            return Err(TlsError::DecodeError);
        }
        // TLS 1.2 servers may omit the extension block entirely.
        let extensions = if r.is_empty() {
            Vec::new()
        } else {
            parse_server_extensions(r, server_random == HELLO_RETRY_REQUEST_RANDOM)?
        };
        Ok(ServerHello {
            server_random,
            session_id,
            cipher_suite,
            extensions,
        })
    }

    pub fn selected_version(&self) -> Option<u16> {
        self.extensions.iter().find_map(|e| match e {
            ServerExtension::SupportedVersions(v) => Some(*v),
            _ => None,
        })
    }

    pub fn key_share(&self) -> Option<&KeyShareEntry> {
        self.extensions.iter().find_map(|e| match e {
            ServerExtension::KeyShare(k) => Some(k),
            _ => None,
        })
    }

    pub fn retry_group(&self) -> Option<u16> {
        self.extensions.iter().find_map(|e| match e {
            ServerExtension::KeyShareRetry(g) => Some(*g),
            _ => None,
        })
    }

    pub fn cookie(&self) -> Option<&[u8]> {
        self.extensions.iter().find_map(|e| match e {
            ServerExtension::Cookie(c) => Some(c.as_slice()),
            _ => None,
        })
    }

    pub fn selected_psk(&self) -> Option<u16> {
        self.extensions.iter().find_map(|e| match e {
            ServerExtension::PreSharedKey(i) => Some(*i),
            _ => None,
        })
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.extensions.iter().find_map(|e| match e {
            ServerExtension::Protocols(p) => p.first().map(|v| v.as_slice()),
            _ => None,
        })
    }

    pub fn acked_session_ticket(&self) -> bool {
        self.extensions
            .iter()
            .any(|e| matches!(e, ServerExtension::SessionTicketAck))
    }
}

/// TLS 1.2 certificate chain: a list of DER certificates, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain(pub Vec<Vec<u8>>);

impl CertificateChain {
    fn encode_body(&self, out: &mut Vec<u8>) {
        let mut list = Vec::new();
        for cert in &self.0 {
            put_vec24(&mut list, cert);
        }
        put_vec24(out, &list);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let mut list = Reader::new(r.vec24()?);
        let mut certs = Vec::new();
        while !list.is_empty() {
            certs.push(list.vec24()?.to_vec());
        }
        Ok(CertificateChain(certs))
    }
}

/// One TLS 1.3 certificate entry: DER plus an opaque per-entry extension block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub der: Vec<u8>,
    pub extensions: Vec<u8>,
}

/// TLS 1.3 Certificate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate13 {
    pub context: Vec<u8>,
    pub entries: Vec<CertificateEntry>,
}

impl Certificate13 {
    /// The DER chain, leaf first.
    pub fn chain(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|e| e.der.clone()).collect()
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        put_vec8(out, &self.context);
        let mut list = Vec::new();
        for entry in &self.entries {
            put_vec24(&mut list, &entry.der);
            put_vec16(&mut list, &entry.extensions);
        }
        put_vec24(out, &list);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let context = r.vec8()?.to_vec();
        let mut list = Reader::new(r.vec24()?);
        let mut entries = Vec::new();
        while !list.is_empty() {
            entries.push(CertificateEntry {
                der: list.vec24()?.to_vec(),
                extensions: list.vec16()?.to_vec(),
            });
        }
        Ok(Certificate13 { context, entries })
    }
}

/// TLS 1.2 ECDHE ServerKeyExchange (named-curve form only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub group: u16,
    pub public: Vec<u8>,
    pub scheme: u16,
    pub signature: Vec<u8>,
}

impl ServerKeyExchange {
    /// The bytes the signature covers (after client/server randoms):
    /// curve_type, named curve, and the public point.
    pub fn params_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(3); // named_curve
        super::put_u16(&mut out, self.group);
        put_vec8(&mut out, &self.public);
        out
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.params_bytes());
        super::put_u16(out, self.scheme);
        put_vec16(out, &self.signature);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        if r.u8()? != 3 {
            // Only named curves; explicit-prime curves are long dead.
            return Err(TlsError::DecodeError);
        }
        let group = r.u16()?;
        let public = r.vec8()?.to_vec();
        let scheme = r.u16()?;
        let signature = r.vec16()?.to_vec();
        Ok(ServerKeyExchange {
            group,
            public,
            scheme,
            signature,
        })
    }
}

/// A signature with its scheme, as carried by CertificateVerify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub scheme: u16,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    fn encode_body(&self, out: &mut Vec<u8>) {
        super::put_u16(out, self.scheme);
        put_vec16(out, &self.signature);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        Ok(DigitallySigned {
            scheme: r.u16()?,
            signature: r.vec16()?.to_vec(),
        })
    }
}

/// TLS 1.2 CertificateRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest12 {
    pub cert_types: Vec<u8>,
    pub schemes: Vec<u16>,
    /// DER-encoded distinguished names; opaque to the engine.
    pub authorities: Vec<Vec<u8>>,
}

impl CertificateRequest12 {
    fn encode_body(&self, out: &mut Vec<u8>) {
        put_vec8(out, &self.cert_types);
        let mut schemes = Vec::new();
        for s in &self.schemes {
            super::put_u16(&mut schemes, *s);
        }
        put_vec16(out, &schemes);
        let mut names = Vec::new();
        for n in &self.authorities {
            put_vec16(&mut names, n);
        }
        put_vec16(out, &names);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let cert_types = r.vec8()?.to_vec();
        let mut slist = r.sub16()?;
        let mut schemes = Vec::new();
        while !slist.is_empty() {
            schemes.push(slist.u16()?);
        }
        let mut nlist = r.sub16()?;
        let mut authorities = Vec::new();
        while !nlist.is_empty() {
            authorities.push(nlist.vec16()?.to_vec());
        }
        Ok(CertificateRequest12 {
            cert_types,
            schemes,
            authorities,
        })
    }
}

/// TLS 1.3 CertificateRequest: a context plus an extension block
/// (signature_algorithms is mandatory and is all this engine consumes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest13 {
    pub context: Vec<u8>,
    pub extensions: Vec<ClientExtension>,
}

impl CertificateRequest13 {
    pub fn signature_algorithms(&self) -> Option<&[u16]> {
        self.extensions.iter().find_map(|e| match e {
            ClientExtension::SignatureAlgorithms(s) => Some(s.as_slice()),
            _ => None,
        })
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        put_vec8(out, &self.context);
        encode_client_extensions(&self.extensions, out);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        Ok(CertificateRequest13 {
            context: r.vec8()?.to_vec(),
            extensions: parse_client_extensions(r)?,
        })
    }
}

/// RFC 5077 NewSessionTicket (TLS 1.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket12 {
    pub lifetime_hint: u32,
    pub ticket: Vec<u8>,
}

impl NewSessionTicket12 {
    fn encode_body(&self, out: &mut Vec<u8>) {
        put_u32(out, self.lifetime_hint);
        put_vec16(out, &self.ticket);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        Ok(NewSessionTicket12 {
            lifetime_hint: r.u32()?,
            ticket: r.vec16()?.to_vec(),
        })
    }
}

/// RFC 8446 NewSessionTicket (TLS 1.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket13 {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: Vec<u8>,
    pub ticket: Vec<u8>,
    pub extensions: Vec<TicketExtension>,
}

impl NewSessionTicket13 {
    pub fn max_early_data(&self) -> Option<u32> {
        self.extensions.iter().find_map(|e| match e {
            TicketExtension::EarlyData(max) => Some(*max),
            _ => None,
        })
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        put_u32(out, self.lifetime);
        put_u32(out, self.age_add);
        put_vec8(out, &self.nonce);
        put_vec16(out, &self.ticket);
        encode_ticket_extensions(&self.extensions, out);
    }

    fn parse_body(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        Ok(NewSessionTicket13 {
            lifetime: r.u32()?,
            age_add: r.u32()?,
            nonce: r.vec8()?.to_vec(),
            ticket: r.vec16()?.to_vec(),
            extensions: parse_ticket_extensions(r)?,
        })
    }
}

/// KeyUpdate request flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyUpdateRequest {
    UpdateNotRequested = 0,
    UpdateRequested = 1,
}

/// A parsed handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePayload {
    HelloRequest,
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    NewSessionTicket(NewSessionTicket12),
    NewSessionTicket13(NewSessionTicket13),
    EndOfEarlyData,
    EncryptedExtensions(Vec<ServerExtension>),
    Certificate(CertificateChain),
    Certificate13(Certificate13),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest12),
    CertificateRequest13(CertificateRequest13),
    ServerHelloDone,
    CertificateVerify(DigitallySigned),
    ClientKeyExchange(Vec<u8>),
    Finished(Vec<u8>),
    KeyUpdate(KeyUpdateRequest),
    /// Synthetic transcript stand-in for ClientHello1 after a
    /// HelloRetryRequest; never sent on the wire.
    MessageHash(Vec<u8>),
}

impl HandshakePayload {
    /// Wire type of this message.
    pub fn typ(&self) -> HandshakeType {
        match self {
            HandshakePayload::HelloRequest => HandshakeType::HelloRequest,
            HandshakePayload::ClientHello(_) => HandshakeType::ClientHello,
            HandshakePayload::ServerHello(_) => HandshakeType::ServerHello,
            HandshakePayload::NewSessionTicket(_) | HandshakePayload::NewSessionTicket13(_) => {
                HandshakeType::NewSessionTicket
            }
            HandshakePayload::EndOfEarlyData => HandshakeType::EndOfEarlyData,
            HandshakePayload::EncryptedExtensions(_) => HandshakeType::EncryptedExtensions,
            HandshakePayload::Certificate(_) | HandshakePayload::Certificate13(_) => {
                HandshakeType::Certificate
            }
            HandshakePayload::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakePayload::CertificateRequest(_)
            | HandshakePayload::CertificateRequest13(_) => HandshakeType::CertificateRequest,
            HandshakePayload::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakePayload::CertificateVerify(_) => HandshakeType::CertificateVerify,
            HandshakePayload::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakePayload::Finished(_) => HandshakeType::Finished,
            HandshakePayload::KeyUpdate(_) => HandshakeType::KeyUpdate,
            HandshakePayload::MessageHash(_) => HandshakeType::MessageHash,
        }
    }

    /// Encode the full message: type, u24 length, body.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            HandshakePayload::HelloRequest
            | HandshakePayload::EndOfEarlyData
            | HandshakePayload::ServerHelloDone => {}
            HandshakePayload::ClientHello(m) => m.encode_body(&mut body),
            HandshakePayload::ServerHello(m) => m.encode_body(&mut body),
            HandshakePayload::NewSessionTicket(m) => m.encode_body(&mut body),
            HandshakePayload::NewSessionTicket13(m) => m.encode_body(&mut body),
            HandshakePayload::EncryptedExtensions(exts) => {
                encode_server_extensions(exts, &mut body)
            }
            HandshakePayload::Certificate(m) => m.encode_body(&mut body),
            HandshakePayload::Certificate13(m) => m.encode_body(&mut body),
            HandshakePayload::ServerKeyExchange(m) => m.encode_body(&mut body),
            HandshakePayload::CertificateRequest(m) => m.encode_body(&mut body),
            HandshakePayload::CertificateRequest13(m) => m.encode_body(&mut body),
            HandshakePayload::CertificateVerify(m) => m.encode_body(&mut body),
            HandshakePayload::ClientKeyExchange(point) => put_vec8(&mut body, point),
            HandshakePayload::Finished(data) => body.extend_from_slice(data),
            HandshakePayload::KeyUpdate(req) => body.push(*req as u8),
            HandshakePayload::MessageHash(hash) => body.extend_from_slice(hash),
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.push(self.typ() as u8);
        put_u24(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }

    /// Parse a message body given its type byte.
    ///
    /// `version` is the negotiated version, or `None` before negotiation
    /// (only Hello messages are valid then).
    pub fn parse(
        typ: u8,
        body: &[u8],
        version: Option<TlsVersion>,
    ) -> Result<Self, TlsError> {
        let typ = HandshakeType::from_byte(typ).ok_or(TlsError::DecodeError)?;
        let mut r = Reader::new(body);
        let msg = match typ {
            HandshakeType::HelloRequest => HandshakePayload::HelloRequest,
            HandshakeType::ClientHello => {
                HandshakePayload::ClientHello(ClientHello::parse_body(&mut r)?)
            }
            HandshakeType::ServerHello => {
                HandshakePayload::ServerHello(ServerHello::parse_body(&mut r)?)
            }
            HandshakeType::NewSessionTicket => match version {
                Some(TlsVersion::Tls13) => HandshakePayload::NewSessionTicket13(
                    NewSessionTicket13::parse_body(&mut r)?,
                ),
                _ => HandshakePayload::NewSessionTicket(NewSessionTicket12::parse_body(&mut r)?),
            },
            HandshakeType::EndOfEarlyData => HandshakePayload::EndOfEarlyData,
            HandshakeType::EncryptedExtensions => {
                HandshakePayload::EncryptedExtensions(parse_server_extensions(&mut r, false)?)
            }
            HandshakeType::Certificate => match version {
                Some(TlsVersion::Tls13) => {
                    HandshakePayload::Certificate13(Certificate13::parse_body(&mut r)?)
                }
                _ => HandshakePayload::Certificate(CertificateChain::parse_body(&mut r)?),
            },
            HandshakeType::ServerKeyExchange => {
                HandshakePayload::ServerKeyExchange(ServerKeyExchange::parse_body(&mut r)?)
            }
            HandshakeType::CertificateRequest => match version {
                Some(TlsVersion::Tls13) => HandshakePayload::CertificateRequest13(
                    CertificateRequest13::parse_body(&mut r)?,
                ),
                _ => HandshakePayload::CertificateRequest(CertificateRequest12::parse_body(
                    &mut r,
                )?),
            },
            HandshakeType::ServerHelloDone => HandshakePayload::ServerHelloDone,
            HandshakeType::CertificateVerify => {
                HandshakePayload::CertificateVerify(DigitallySigned::parse_body(&mut r)?)
            }
            HandshakeType::ClientKeyExchange => {
                HandshakePayload::ClientKeyExchange(r.vec8()?.to_vec())
            }
            HandshakeType::Finished => HandshakePayload::Finished(r.rest().to_vec()),
            HandshakeType::KeyUpdate => match r.u8()? {
                0 => HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateNotRequested),
                1 => HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateRequested),
                _ => return Err(TlsError::DecodeError),
            },
            HandshakeType::MessageHash => {
                // Synthetic; a peer must never send it.
                return Err(TlsError::DecodeError);
            }
        };
        r.expect_empty()?;
        Ok(msg)
    }
}

/// Build the synthetic message_hash message replacing ClientHello1 in the
/// transcript after a HelloRetryRequest.
pub fn message_hash_transcript(ch1_hash: &[u8]) -> Vec<u8> {
    HandshakePayload::MessageHash(ch1_hash.to_vec()).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn round_trip(msg: HandshakePayload, version: Option<TlsVersion>) {
        let wire = msg.encode();
        assert_eq!(wire[0], msg.typ() as u8);
        let len = ((wire[1] as usize) << 16) | ((wire[2] as usize) << 8) | (wire[3] as usize);
        assert_eq!(len, wire.len() - 4);
        let parsed = HandshakePayload::parse(wire[0], &wire[4..], version).unwrap();
        assert_eq!(parsed, msg);
    }

    fn sample_client_hello() -> ClientHello {
        ClientHello {
            client_random: [7u8; 32],
            session_id: vec![1; 32],
            cipher_suites: vec![0x1301, 0xC02B],
            compression_methods: vec![0],
            extensions: vec![
                ClientExtension::ServerName(b"host.test".to_vec()),
                ClientExtension::SupportedVersions(vec![0x0304, 0x0303]),
                ClientExtension::SupportedGroups(vec![0x001D]),
                ClientExtension::SignatureAlgorithms(vec![0x0807]),
                ClientExtension::KeyShare(vec![KeyShareEntry {
                    group: 0x001D,
                    payload: vec![0x42; 32],
                }]),
            ],
        }
    }

    #[test]
    fn client_hello_round_trip() {
        round_trip(HandshakePayload::ClientHello(sample_client_hello()), None);
    }

    #[test]
    fn server_hello_round_trip() {
        let sh = ServerHello {
            server_random: [9u8; 32],
            session_id: vec![1; 32],
            cipher_suite: 0x1301,
            extensions: vec![
                ServerExtension::SupportedVersions(0x0304),
                ServerExtension::KeyShare(KeyShareEntry {
                    group: 0x001D,
                    payload: vec![0x24; 32],
                }),
            ],
        };
        round_trip(HandshakePayload::ServerHello(sh), None);
    }

    #[test]
    fn hello_retry_detection() {
        let hrr = ServerHello {
            server_random: HELLO_RETRY_REQUEST_RANDOM,
            session_id: Vec::new(),
            cipher_suite: 0x1301,
            extensions: vec![
                ServerExtension::SupportedVersions(0x0304),
                ServerExtension::KeyShareRetry(0x0017),
            ],
        };
        assert!(hrr.is_hello_retry());
        round_trip(HandshakePayload::ServerHello(hrr), None);
    }

    #[test]
    fn downgrade_sentinel_detection() {
        let mut random = [3u8; 32];
        random[24..].copy_from_slice(&DOWNGRADE_SENTINEL_TLS12);
        let sh = ServerHello {
            server_random: random,
            session_id: Vec::new(),
            cipher_suite: 0xC02B,
            extensions: Vec::new(),
        };
        assert!(sh.has_downgrade_sentinel());
    }

    #[test]
    fn tls12_messages_round_trip() {
        round_trip(
            HandshakePayload::Certificate(CertificateChain(vec![vec![1, 2, 3], vec![4, 5]])),
            Some(TlsVersion::Tls12),
        );
        round_trip(
            HandshakePayload::ServerKeyExchange(ServerKeyExchange {
                group: 0x001D,
                public: vec![0x11; 32],
                scheme: 0x0807,
                signature: vec![0x22; 64],
            }),
            Some(TlsVersion::Tls12),
        );
        round_trip(
            HandshakePayload::CertificateRequest(CertificateRequest12 {
                cert_types: vec![64],
                schemes: vec![0x0403],
                authorities: vec![],
            }),
            Some(TlsVersion::Tls12),
        );
        round_trip(HandshakePayload::ServerHelloDone, Some(TlsVersion::Tls12));
        round_trip(
            HandshakePayload::ClientKeyExchange(vec![0x33; 32]),
            Some(TlsVersion::Tls12),
        );
        round_trip(
            HandshakePayload::NewSessionTicket(NewSessionTicket12 {
                lifetime_hint: 3600,
                ticket: vec![0x55; 48],
            }),
            Some(TlsVersion::Tls12),
        );
        round_trip(
            HandshakePayload::Finished(vec![0; 12]),
            Some(TlsVersion::Tls12),
        );
    }

    #[test]
    fn tls13_messages_round_trip() {
        round_trip(
            HandshakePayload::EncryptedExtensions(vec![ServerExtension::Protocols(vec![
                b"h2".to_vec()
            ])]),
            Some(TlsVersion::Tls13),
        );
        round_trip(
            HandshakePayload::Certificate13(Certificate13 {
                context: Vec::new(),
                entries: vec![CertificateEntry {
                    der: vec![0x30, 0x82, 0x01, 0x00],
                    extensions: Vec::new(),
                }],
            }),
            Some(TlsVersion::Tls13),
        );
        round_trip(
            HandshakePayload::CertificateVerify(DigitallySigned {
                scheme: 0x0807,
                signature: vec![0x77; 64],
            }),
            Some(TlsVersion::Tls13),
        );
        round_trip(
            HandshakePayload::NewSessionTicket13(NewSessionTicket13 {
                lifetime: 7200,
                age_add: 0xDEADBEEF,
                nonce: vec![0, 0, 0, 1],
                ticket: vec![0x66; 32],
                extensions: vec![TicketExtension::EarlyData(16384)],
            }),
            Some(TlsVersion::Tls13),
        );
        round_trip(
            HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateRequested),
            Some(TlsVersion::Tls13),
        );
        round_trip(
            HandshakePayload::Finished(vec![0xAB; 32]),
            Some(TlsVersion::Tls13),
        );
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut wire = HandshakePayload::ServerHelloDone.encode();
        wire[3] = 1; // claim one body byte
        wire.push(0xFF);
        assert_eq!(
            HandshakePayload::parse(wire[0], &wire[4..], Some(TlsVersion::Tls12)).unwrap_err(),
            TlsError::DecodeError
        );
    }

    #[test]
    fn short_client_hello_rejected() {
        let wire = HandshakePayload::ClientHello(sample_client_hello()).encode();
        for cut in [5, 40, wire.len() - 2] {
            assert!(HandshakePayload::parse(wire[0], &wire[4..cut], None).is_err());
        }
    }
}
