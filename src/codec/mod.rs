//! Wire codec for TLS records and handshake messages.
//!
//! Pure encode/decode with no I/O. Length fields are strictly validated;
//! short input, over-long fields, and forbidden values fail with
//! [`TlsError::DecodeError`]. Unknown extensions are preserved opaquely.

extern crate alloc;

use alloc::vec::Vec;

use crate::TlsError;

pub mod extensions;
pub mod handshake;

pub use extensions::*;
pub use handshake::*;

/// Cursor over received wire bytes.
///
/// Every accessor checks remaining length and fails with `DecodeError`
/// rather than panicking.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.remaining() < n {
            return Err(TlsError::DecodeError);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consume the rest of the input.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Read a u8.
    pub fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian u16.
    pub fn u16(&mut self) -> Result<u16, TlsError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u24 into a usize.
    pub fn u24(&mut self) -> Result<usize, TlsError> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | (b[2] as usize))
    }

    /// Read a big-endian u32.
    pub fn u32(&mut self) -> Result<u32, TlsError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a u8-length-prefixed vector.
    pub fn vec8(&mut self) -> Result<&'a [u8], TlsError> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    /// Read a u16-length-prefixed vector.
    pub fn vec16(&mut self) -> Result<&'a [u8], TlsError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    /// Read a u24-length-prefixed vector.
    pub fn vec24(&mut self) -> Result<&'a [u8], TlsError> {
        let len = self.u24()?;
        self.take(len)
    }

    /// Fail unless the input is fully consumed.
    pub fn expect_empty(&self) -> Result<(), TlsError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TlsError::DecodeError)
        }
    }

    /// Sub-reader over a u16-length-prefixed region.
    pub fn sub16(&mut self) -> Result<Reader<'a>, TlsError> {
        Ok(Reader::new(self.vec16()?))
    }
}

/// Append a big-endian u16.
pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Append a big-endian u24. The value must fit; callers build bounded bodies.
pub fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.push((v >> 16) as u8);
    out.push((v >> 8) as u8);
    out.push(v as u8);
}

/// Append a big-endian u32.
pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Append a u8-length-prefixed vector.
pub fn put_vec8(out: &mut Vec<u8>, body: &[u8]) {
    debug_assert!(body.len() <= 0xFF);
    out.push(body.len() as u8);
    out.extend_from_slice(body);
}

/// Append a u16-length-prefixed vector.
pub fn put_vec16(out: &mut Vec<u8>, body: &[u8]) {
    debug_assert!(body.len() <= 0xFFFF);
    put_u16(out, body.len() as u16);
    out.extend_from_slice(body);
}

/// Append a u24-length-prefixed vector.
pub fn put_vec24(out: &mut Vec<u8>, body: &[u8]) {
    debug_assert!(body.len() <= 0xFF_FFFF);
    put_u24(out, body.len());
    out.extend_from_slice(body);
}

/// Handshake message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    EncryptedExtensions = 8,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    KeyUpdate = 24,
    MessageHash = 254,
}

impl HandshakeType {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(HandshakeType::HelloRequest),
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            4 => Some(HandshakeType::NewSessionTicket),
            5 => Some(HandshakeType::EndOfEarlyData),
            8 => Some(HandshakeType::EncryptedExtensions),
            11 => Some(HandshakeType::Certificate),
            12 => Some(HandshakeType::ServerKeyExchange),
            13 => Some(HandshakeType::CertificateRequest),
            14 => Some(HandshakeType::ServerHelloDone),
            15 => Some(HandshakeType::CertificateVerify),
            16 => Some(HandshakeType::ClientKeyExchange),
            20 => Some(HandshakeType::Finished),
            24 => Some(HandshakeType::KeyUpdate),
            254 => Some(HandshakeType::MessageHash),
            _ => None,
        }
    }
}

/// TLS extension type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ExtensionType {
    ServerName = 0,
    SupportedGroups = 10,
    SignatureAlgorithms = 13,
    ApplicationLayerProtocolNegotiation = 16,
    SessionTicket = 35,
    PreSharedKey = 41,
    EarlyData = 42,
    SupportedVersions = 43,
    Cookie = 44,
    PskKeyExchangeModes = 45,
    KeyShare = 51,
}

impl ExtensionType {
    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ExtensionType::ServerName),
            10 => Some(ExtensionType::SupportedGroups),
            13 => Some(ExtensionType::SignatureAlgorithms),
            16 => Some(ExtensionType::ApplicationLayerProtocolNegotiation),
            35 => Some(ExtensionType::SessionTicket),
            41 => Some(ExtensionType::PreSharedKey),
            42 => Some(ExtensionType::EarlyData),
            43 => Some(ExtensionType::SupportedVersions),
            44 => Some(ExtensionType::Cookie),
            45 => Some(ExtensionType::PskKeyExchangeModes),
            51 => Some(ExtensionType::KeyShare),
            _ => None,
        }
    }
}

/// Named group (elliptic curves and DH groups).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NamedGroup {
    Secp256r1 = 0x0017,
    Secp384r1 = 0x0018,
    Secp521r1 = 0x0019,
    X25519 = 0x001D,
    X448 = 0x001E,
}

impl NamedGroup {
    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0017 => Some(NamedGroup::Secp256r1),
            0x0018 => Some(NamedGroup::Secp384r1),
            0x0019 => Some(NamedGroup::Secp521r1),
            0x001D => Some(NamedGroup::X25519),
            0x001E => Some(NamedGroup::X448),
            _ => None,
        }
    }
}

/// Signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SignatureScheme {
    RsaPkcs1Sha256 = 0x0401,
    RsaPkcs1Sha384 = 0x0501,
    RsaPkcs1Sha512 = 0x0601,
    EcdsaSecp256r1Sha256 = 0x0403,
    EcdsaSecp384r1Sha384 = 0x0503,
    EcdsaSecp521r1Sha512 = 0x0603,
    RsaPssRsaeSha256 = 0x0804,
    RsaPssRsaeSha384 = 0x0805,
    RsaPssRsaeSha512 = 0x0806,
    Ed25519 = 0x0807,
    Ed448 = 0x0808,
}

impl SignatureScheme {
    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0401 => Some(SignatureScheme::RsaPkcs1Sha256),
            0x0501 => Some(SignatureScheme::RsaPkcs1Sha384),
            0x0601 => Some(SignatureScheme::RsaPkcs1Sha512),
            0x0403 => Some(SignatureScheme::EcdsaSecp256r1Sha256),
            0x0503 => Some(SignatureScheme::EcdsaSecp384r1Sha384),
            0x0603 => Some(SignatureScheme::EcdsaSecp521r1Sha512),
            0x0804 => Some(SignatureScheme::RsaPssRsaeSha256),
            0x0805 => Some(SignatureScheme::RsaPssRsaeSha384),
            0x0806 => Some(SignatureScheme::RsaPssRsaeSha512),
            0x0807 => Some(SignatureScheme::Ed25519),
            0x0808 => Some(SignatureScheme::Ed448),
            _ => None,
        }
    }
}

/// PSK key exchange mode (RFC 8446 §4.2.9).
pub const PSK_MODE_KE: u8 = 0;
pub const PSK_MODE_DHE_KE: u8 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn reader_primitives() {
        let mut r = Reader::new(&[0x01, 0x02, 0x03, 0x00, 0x02, 0xAA, 0xBB]);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u16().unwrap(), 0x0203);
        assert_eq!(r.vec16().unwrap(), &[0xAA, 0xBB]);
        assert!(r.is_empty());
        assert!(r.u8().is_err());
    }

    #[test]
    fn reader_short_vec_fails() {
        let mut r = Reader::new(&[0x00, 0x05, 0x01]);
        assert_eq!(r.vec16().unwrap_err(), TlsError::DecodeError);
    }

    #[test]
    fn writer_round_trip() {
        let mut out = vec![];
        put_u24(&mut out, 0x01_0203);
        put_vec8(&mut out, &[9, 9]);
        let mut r = Reader::new(&out);
        assert_eq!(r.u24().unwrap(), 0x01_0203);
        assert_eq!(r.vec8().unwrap(), &[9, 9]);
    }

    #[test]
    fn enum_parse() {
        assert_eq!(HandshakeType::from_byte(2), Some(HandshakeType::ServerHello));
        assert_eq!(HandshakeType::from_byte(3), None);
        assert_eq!(NamedGroup::from_u16(0x001D), Some(NamedGroup::X25519));
        assert_eq!(
            SignatureScheme::from_u16(0x0807),
            Some(SignatureScheme::Ed25519)
        );
    }
}
