//! Extension codecs.
//!
//! Extensions are split by direction the way the wire uses them: the client
//! forms appear in ClientHello, the server forms in ServerHello,
//! HelloRetryRequest, EncryptedExtensions and NewSessionTicket. Unknown
//! extensions round-trip opaquely in both directions.

extern crate alloc;

use alloc::vec::Vec;

use super::{put_u16, put_u32, put_vec16, put_vec8, ExtensionType, Reader};
use crate::TlsError;

/// One entry of a key_share list: a group id and its opaque public share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: u16,
    pub payload: Vec<u8>,
}

impl KeyShareEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.group);
        put_vec16(out, &self.payload);
    }

    fn parse(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        Ok(KeyShareEntry {
            group: r.u16()?,
            payload: r.vec16()?.to_vec(),
        })
    }
}

/// One offered PSK identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskIdentity {
    pub identity: Vec<u8>,
    pub obfuscated_ticket_age: u32,
}

/// The pre_shared_key offer: identities plus their binders.
///
/// Binders are computed over the ClientHello truncated just before the
/// binders list itself; [`PskOffer::binders_len`] gives the truncation size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskOffer {
    pub identities: Vec<PskIdentity>,
    pub binders: Vec<Vec<u8>>,
}

impl PskOffer {
    /// Encoded length of the binders list including its u16 length prefix.
    pub fn binders_len(&self) -> usize {
        2 + self.binders.iter().map(|b| 1 + b.len()).sum::<usize>()
    }
}

/// Extension carried in a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientExtension {
    /// server_name: a single host_name entry.
    ServerName(Vec<u8>),
    SupportedGroups(Vec<u16>),
    SignatureAlgorithms(Vec<u16>),
    /// application_layer_protocol_negotiation, offered protocols in order.
    Protocols(Vec<Vec<u8>>),
    /// session_ticket (RFC 5077); empty body requests a ticket.
    SessionTicket(Vec<u8>),
    /// supported_versions, offered versions in preference order.
    SupportedVersions(Vec<u16>),
    KeyShare(Vec<KeyShareEntry>),
    PskKeyExchangeModes(Vec<u8>),
    /// pre_shared_key; must be the last extension when present.
    PreSharedKey(PskOffer),
    /// early_data indication (empty in a ClientHello).
    EarlyData,
    /// cookie echoed from a HelloRetryRequest.
    Cookie(Vec<u8>),
    Unknown { id: u16, body: Vec<u8> },
}

impl ClientExtension {
    /// Wire id of this extension.
    pub fn ext_type(&self) -> u16 {
        match self {
            ClientExtension::ServerName(_) => ExtensionType::ServerName as u16,
            ClientExtension::SupportedGroups(_) => ExtensionType::SupportedGroups as u16,
            ClientExtension::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms as u16,
            ClientExtension::Protocols(_) => {
                ExtensionType::ApplicationLayerProtocolNegotiation as u16
            }
            ClientExtension::SessionTicket(_) => ExtensionType::SessionTicket as u16,
            ClientExtension::SupportedVersions(_) => ExtensionType::SupportedVersions as u16,
            ClientExtension::KeyShare(_) => ExtensionType::KeyShare as u16,
            ClientExtension::PskKeyExchangeModes(_) => ExtensionType::PskKeyExchangeModes as u16,
            ClientExtension::PreSharedKey(_) => ExtensionType::PreSharedKey as u16,
            ClientExtension::EarlyData => ExtensionType::EarlyData as u16,
            ClientExtension::Cookie(_) => ExtensionType::Cookie as u16,
            ClientExtension::Unknown { id, .. } => *id,
        }
    }

    /// Encode as id + u16-length-prefixed body.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.ext_type());
        let mut body = Vec::new();
        match self {
            ClientExtension::ServerName(name) => {
                let mut entry = Vec::new();
                entry.push(0); // host_name
                put_vec16(&mut entry, name);
                put_vec16(&mut body, &entry);
            }
            ClientExtension::SupportedGroups(groups) => {
                let mut list = Vec::new();
                for g in groups {
                    put_u16(&mut list, *g);
                }
                put_vec16(&mut body, &list);
            }
            ClientExtension::SignatureAlgorithms(schemes) => {
                let mut list = Vec::new();
                for s in schemes {
                    put_u16(&mut list, *s);
                }
                put_vec16(&mut body, &list);
            }
            ClientExtension::Protocols(protos) => {
                let mut list = Vec::new();
                for p in protos {
                    put_vec8(&mut list, p);
                }
                put_vec16(&mut body, &list);
            }
            ClientExtension::SessionTicket(ticket) => {
                body.extend_from_slice(ticket);
            }
            ClientExtension::SupportedVersions(versions) => {
                let mut list = Vec::new();
                for v in versions {
                    put_u16(&mut list, *v);
                }
                put_vec8(&mut body, &list);
            }
            ClientExtension::KeyShare(entries) => {
                let mut list = Vec::new();
                for e in entries {
                    e.encode(&mut list);
                }
                put_vec16(&mut body, &list);
            }
            ClientExtension::PskKeyExchangeModes(modes) => {
                put_vec8(&mut body, modes);
            }
            ClientExtension::PreSharedKey(offer) => {
                let mut ids = Vec::new();
                for id in &offer.identities {
                    put_vec16(&mut ids, &id.identity);
                    put_u32(&mut ids, id.obfuscated_ticket_age);
                }
                put_vec16(&mut body, &ids);
                let mut binders = Vec::new();
                for b in &offer.binders {
                    put_vec8(&mut binders, b);
                }
                put_vec16(&mut body, &binders);
            }
            ClientExtension::EarlyData => {}
            ClientExtension::Cookie(cookie) => {
                put_vec16(&mut body, cookie);
            }
            ClientExtension::Unknown { body: b, .. } => {
                body.extend_from_slice(b);
            }
        }
        put_vec16(out, &body);
    }

    fn parse_body(id: u16, body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let ext = match ExtensionType::from_u16(id) {
            Some(ExtensionType::ServerName) => {
                // Take the first (and in practice only) host_name entry.
                let mut list = r.sub16()?;
                let typ = list.u8()?;
                if typ != 0 {
                    return Err(TlsError::DecodeError);
                }
                ClientExtension::ServerName(list.vec16()?.to_vec())
            }
            Some(ExtensionType::SupportedGroups) => {
                let mut list = r.sub16()?;
                let mut groups = Vec::new();
                while !list.is_empty() {
                    groups.push(list.u16()?);
                }
                ClientExtension::SupportedGroups(groups)
            }
            Some(ExtensionType::SignatureAlgorithms) => {
                let mut list = r.sub16()?;
                let mut schemes = Vec::new();
                while !list.is_empty() {
                    schemes.push(list.u16()?);
                }
                ClientExtension::SignatureAlgorithms(schemes)
            }
            Some(ExtensionType::ApplicationLayerProtocolNegotiation) => {
                let mut list = r.sub16()?;
                let mut protos = Vec::new();
                while !list.is_empty() {
                    let p = list.vec8()?;
                    if p.is_empty() {
                        return Err(TlsError::DecodeError);
                    }
                    protos.push(p.to_vec());
                }
                ClientExtension::Protocols(protos)
            }
            Some(ExtensionType::SessionTicket) => {
                ClientExtension::SessionTicket(r.rest().to_vec())
            }
            Some(ExtensionType::SupportedVersions) => {
                let mut list = Reader::new(r.vec8()?);
                let mut versions = Vec::new();
                while !list.is_empty() {
                    versions.push(list.u16()?);
                }
                ClientExtension::SupportedVersions(versions)
            }
            Some(ExtensionType::KeyShare) => {
                let mut list = r.sub16()?;
                let mut entries = Vec::new();
                while !list.is_empty() {
                    entries.push(KeyShareEntry::parse(&mut list)?);
                }
                ClientExtension::KeyShare(entries)
            }
            Some(ExtensionType::PskKeyExchangeModes) => {
                ClientExtension::PskKeyExchangeModes(r.vec8()?.to_vec())
            }
            Some(ExtensionType::PreSharedKey) => {
                let mut ids = r.sub16()?;
                let mut identities = Vec::new();
                while !ids.is_empty() {
                    identities.push(PskIdentity {
                        identity: ids.vec16()?.to_vec(),
                        obfuscated_ticket_age: ids.u32()?,
                    });
                }
                let mut blist = r.sub16()?;
                let mut binders = Vec::new();
                while !blist.is_empty() {
                    binders.push(blist.vec8()?.to_vec());
                }
                if identities.is_empty() || identities.len() != binders.len() {
                    return Err(TlsError::DecodeError);
                }
                ClientExtension::PreSharedKey(PskOffer {
                    identities,
                    binders,
                })
            }
            Some(ExtensionType::EarlyData) => {
                if !body.is_empty() {
                    return Err(TlsError::DecodeError);
                }
                ClientExtension::EarlyData
            }
            Some(ExtensionType::Cookie) => ClientExtension::Cookie(r.vec16()?.to_vec()),
            None => ClientExtension::Unknown {
                id,
                body: body.to_vec(),
            },
        };
        if !matches!(ext, ClientExtension::Unknown { .. } | ClientExtension::SessionTicket(_)) {
            r.expect_empty()?;
        }
        Ok(ext)
    }
}

/// Parse a ClientHello extension block (including its u16 length prefix).
pub fn parse_client_extensions(r: &mut Reader<'_>) -> Result<Vec<ClientExtension>, TlsError> {
    let mut block = r.sub16()?;
    let mut out = Vec::new();
    while !block.is_empty() {
        let id = block.u16()?;
        let body = block.vec16()?;
        out.push(ClientExtension::parse_body(id, body)?);
    }
    Ok(out)
}

/// Encode a ClientHello extension block (including its u16 length prefix).
pub fn encode_client_extensions(exts: &[ClientExtension], out: &mut Vec<u8>) {
    let mut block = Vec::new();
    for e in exts {
        e.encode(&mut block);
    }
    put_vec16(out, &block);
}

/// Extension carried in a server-to-client handshake message
/// (ServerHello, HelloRetryRequest, EncryptedExtensions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerExtension {
    /// Empty server_name acknowledgement.
    ServerNameAck,
    /// The single selected ALPN protocol.
    Protocols(Vec<Vec<u8>>),
    /// Empty session_ticket acknowledgement (RFC 5077).
    SessionTicketAck,
    /// supported_versions: the selected version.
    SupportedVersions(u16),
    /// key_share in a ServerHello: the server's share.
    KeyShare(KeyShareEntry),
    /// key_share in a HelloRetryRequest: the requested group.
    KeyShareRetry(u16),
    /// pre_shared_key: the selected identity index.
    PreSharedKey(u16),
    /// early_data acceptance (empty, EncryptedExtensions only).
    EarlyDataAck,
    /// cookie (HelloRetryRequest only).
    Cookie(Vec<u8>),
    Unknown { id: u16, body: Vec<u8> },
}

impl ServerExtension {
    /// Wire id of this extension.
    pub fn ext_type(&self) -> u16 {
        match self {
            ServerExtension::ServerNameAck => ExtensionType::ServerName as u16,
            ServerExtension::Protocols(_) => {
                ExtensionType::ApplicationLayerProtocolNegotiation as u16
            }
            ServerExtension::SessionTicketAck => ExtensionType::SessionTicket as u16,
            ServerExtension::SupportedVersions(_) => ExtensionType::SupportedVersions as u16,
            ServerExtension::KeyShare(_) | ServerExtension::KeyShareRetry(_) => {
                ExtensionType::KeyShare as u16
            }
            ServerExtension::PreSharedKey(_) => ExtensionType::PreSharedKey as u16,
            ServerExtension::EarlyDataAck => ExtensionType::EarlyData as u16,
            ServerExtension::Cookie(_) => ExtensionType::Cookie as u16,
            ServerExtension::Unknown { id, .. } => *id,
        }
    }

    /// Encode as id + u16-length-prefixed body.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.ext_type());
        let mut body = Vec::new();
        match self {
            ServerExtension::ServerNameAck
            | ServerExtension::SessionTicketAck
            | ServerExtension::EarlyDataAck => {}
            ServerExtension::Protocols(protos) => {
                let mut list = Vec::new();
                for p in protos {
                    put_vec8(&mut list, p);
                }
                put_vec16(&mut body, &list);
            }
            ServerExtension::SupportedVersions(v) => put_u16(&mut body, *v),
            ServerExtension::KeyShare(entry) => entry.encode(&mut body),
            ServerExtension::KeyShareRetry(group) => put_u16(&mut body, *group),
            ServerExtension::PreSharedKey(idx) => put_u16(&mut body, *idx),
            ServerExtension::Cookie(cookie) => put_vec16(&mut body, cookie),
            ServerExtension::Unknown { body: b, .. } => body.extend_from_slice(b),
        }
        put_vec16(out, &body);
    }

    fn parse_body(id: u16, body: &[u8], hello_retry: bool) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let ext = match ExtensionType::from_u16(id) {
            Some(ExtensionType::ServerName) => {
                if !body.is_empty() {
                    return Err(TlsError::DecodeError);
                }
                ServerExtension::ServerNameAck
            }
            Some(ExtensionType::ApplicationLayerProtocolNegotiation) => {
                let mut list = r.sub16()?;
                let mut protos = Vec::new();
                while !list.is_empty() {
                    protos.push(list.vec8()?.to_vec());
                }
                ServerExtension::Protocols(protos)
            }
            Some(ExtensionType::SessionTicket) => {
                if !body.is_empty() {
                    return Err(TlsError::DecodeError);
                }
                ServerExtension::SessionTicketAck
            }
            Some(ExtensionType::SupportedVersions) => {
                ServerExtension::SupportedVersions(r.u16()?)
            }
            Some(ExtensionType::KeyShare) => {
                if hello_retry {
                    ServerExtension::KeyShareRetry(r.u16()?)
                } else {
                    ServerExtension::KeyShare(KeyShareEntry::parse(&mut r)?)
                }
            }
            Some(ExtensionType::PreSharedKey) => ServerExtension::PreSharedKey(r.u16()?),
            Some(ExtensionType::EarlyData) => {
                if !body.is_empty() {
                    return Err(TlsError::DecodeError);
                }
                ServerExtension::EarlyDataAck
            }
            Some(ExtensionType::Cookie) => ServerExtension::Cookie(r.vec16()?.to_vec()),
            _ => ServerExtension::Unknown {
                id,
                body: body.to_vec(),
            },
        };
        if !matches!(ext, ServerExtension::Unknown { .. }) {
            r.expect_empty()?;
        }
        Ok(ext)
    }
}

/// Parse a server extension block (including its u16 length prefix).
///
/// `hello_retry` selects the HelloRetryRequest form of key_share.
pub fn parse_server_extensions(
    r: &mut Reader<'_>,
    hello_retry: bool,
) -> Result<Vec<ServerExtension>, TlsError> {
    let mut block = r.sub16()?;
    let mut out = Vec::new();
    while !block.is_empty() {
        let id = block.u16()?;
        let body = block.vec16()?;
        out.push(ServerExtension::parse_body(id, body, hello_retry)?);
    }
    Ok(out)
}

/// Encode a server extension block (including its u16 length prefix).
pub fn encode_server_extensions(exts: &[ServerExtension], out: &mut Vec<u8>) {
    let mut block = Vec::new();
    for e in exts {
        e.encode(&mut block);
    }
    put_vec16(out, &block);
}

/// Extension carried in a TLS 1.3 NewSessionTicket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketExtension {
    /// early_data: maximum early data size the ticket permits.
    EarlyData(u32),
    Unknown { id: u16, body: Vec<u8> },
}

impl TicketExtension {
    /// Encode as id + u16-length-prefixed body.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            TicketExtension::EarlyData(max) => {
                put_u16(out, ExtensionType::EarlyData as u16);
                let mut body = Vec::new();
                put_u32(&mut body, *max);
                put_vec16(out, &body);
            }
            TicketExtension::Unknown { id, body } => {
                put_u16(out, *id);
                put_vec16(out, body);
            }
        }
    }

    fn parse_body(id: u16, body: &[u8]) -> Result<Self, TlsError> {
        if id == ExtensionType::EarlyData as u16 {
            let mut r = Reader::new(body);
            let max = r.u32()?;
            r.expect_empty()?;
            Ok(TicketExtension::EarlyData(max))
        } else {
            Ok(TicketExtension::Unknown {
                id,
                body: body.to_vec(),
            })
        }
    }
}

/// Parse a NewSessionTicket extension block.
pub fn parse_ticket_extensions(r: &mut Reader<'_>) -> Result<Vec<TicketExtension>, TlsError> {
    let mut block = r.sub16()?;
    let mut out = Vec::new();
    while !block.is_empty() {
        let id = block.u16()?;
        let body = block.vec16()?;
        out.push(TicketExtension::parse_body(id, body)?);
    }
    Ok(out)
}

/// Encode a NewSessionTicket extension block.
pub fn encode_ticket_extensions(exts: &[TicketExtension], out: &mut Vec<u8>) {
    let mut block = Vec::new();
    for e in exts {
        e.encode(&mut block);
    }
    put_vec16(out, &block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn round_trip_client(ext: ClientExtension) {
        let mut out = Vec::new();
        ext.encode(&mut out);
        let mut full = Vec::new();
        put_vec16(&mut full, &out);
        let parsed = parse_client_extensions(&mut Reader::new(&full)).unwrap();
        assert_eq!(parsed, vec![ext]);
    }

    #[test]
    fn client_extension_round_trips() {
        round_trip_client(ClientExtension::ServerName(b"example.com".to_vec()));
        round_trip_client(ClientExtension::SupportedGroups(vec![0x001D, 0x0017]));
        round_trip_client(ClientExtension::SignatureAlgorithms(vec![0x0807, 0x0403]));
        round_trip_client(ClientExtension::Protocols(vec![
            b"h2".to_vec(),
            b"http/1.1".to_vec(),
        ]));
        round_trip_client(ClientExtension::SupportedVersions(vec![0x0304, 0x0303]));
        round_trip_client(ClientExtension::KeyShare(vec![KeyShareEntry {
            group: 0x001D,
            payload: vec![0xAB; 32],
        }]));
        round_trip_client(ClientExtension::PreSharedKey(PskOffer {
            identities: vec![PskIdentity {
                identity: vec![1, 2, 3],
                obfuscated_ticket_age: 77,
            }],
            binders: vec![vec![0u8; 32]],
        }));
        round_trip_client(ClientExtension::Unknown {
            id: 0xFF01,
            body: vec![9, 8, 7],
        });
    }

    #[test]
    fn server_extension_round_trips() {
        for ext in [
            ServerExtension::ServerNameAck,
            ServerExtension::SupportedVersions(0x0304),
            ServerExtension::KeyShare(KeyShareEntry {
                group: 0x001D,
                payload: vec![1; 32],
            }),
            ServerExtension::PreSharedKey(0),
            ServerExtension::Cookie(vec![5; 8]),
        ] {
            let mut out = Vec::new();
            ext.encode(&mut out);
            let mut full = Vec::new();
            put_vec16(&mut full, &out);
            let hrr = matches!(ext, ServerExtension::Cookie(_));
            let parsed = parse_server_extensions(&mut Reader::new(&full), hrr).unwrap();
            assert_eq!(parsed, vec![ext]);
        }
    }

    #[test]
    fn hrr_key_share_form() {
        let ext = ServerExtension::KeyShareRetry(0x0017);
        let mut out = Vec::new();
        ext.encode(&mut out);
        let mut full = Vec::new();
        put_vec16(&mut full, &out);
        let parsed = parse_server_extensions(&mut Reader::new(&full), true).unwrap();
        assert_eq!(parsed, vec![ext]);
    }

    #[test]
    fn empty_alpn_protocol_rejected() {
        let ext = ClientExtension::Protocols(vec![Vec::new()]);
        let mut out = Vec::new();
        ext.encode(&mut out);
        let mut full = Vec::new();
        put_vec16(&mut full, &out);
        assert!(parse_client_extensions(&mut Reader::new(&full)).is_err());
    }
}
