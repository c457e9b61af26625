//! Strand TLS endpoint engine.
//!
//! This crate drives a secure channel from initial handshake, through
//! authenticated record exchange, to orderly shutdown, for both client and
//! server roles over a caller-supplied byte transport.
//!
//! # Architecture
//!
//! The engine is organized into:
//!
//! - `codec`: wire encoding/decoding of records and handshake messages
//! - `record`: record framing and the per-direction encryption epochs
//! - `key_schedule`: TLS 1.2 PRF and TLS 1.3 HKDF secret derivation
//! - `handshake`: the client and server state machines for both versions
//! - `context`: the per-connection aggregate and its public API
//! - `session`: the pluggable resumption store interface
//! - `params`: caller-supplied configuration and hooks
//!
//! The caller supplies the transport (`backend::Backend`), certificate chain
//! validation (`params::ChainValidator`), session storage
//! (`session::SessionManager`), and randomness. The engine performs no I/O
//! of its own beyond what the transport does.

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

use core::fmt;

pub mod backend;
pub mod codec;
pub mod context;
pub mod crypto;
pub mod handshake;
pub mod hooks;
pub mod key_schedule;
pub mod params;
pub mod record;
pub mod session;
pub mod suites;
pub mod transcript;

pub use backend::Backend;
pub use context::{Context, Established};
pub use params::{ChainValidator, ClientParams, Params, ServerParams};
pub use session::{NoSessionManager, SessionData, SessionManager};
pub use suites::CipherSuite;

/// TLS protocol version.
///
/// Only TLS 1.2 and 1.3 are spoken; older versions appear on the wire solely
/// as legacy compatibility values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3.
    Tls13,
}

impl TlsVersion {
    /// Get the protocol version bytes.
    pub fn to_bytes(&self) -> [u8; 2] {
        match self {
            TlsVersion::Tls12 => [0x03, 0x03],
            TlsVersion::Tls13 => [0x03, 0x04],
        }
    }

    /// Parse from bytes.
    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        match bytes {
            [0x03, 0x03] => Some(TlsVersion::Tls12),
            [0x03, 0x04] => Some(TlsVersion::Tls13),
            _ => None,
        }
    }
}

/// TLS alert level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl AlertLevel {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(AlertLevel::Warning),
            2 => Some(AlertLevel::Fatal),
            _ => None,
        }
    }
}

/// TLS alert description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    NoRenegotiation = 100,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    UnknownPskIdentity = 115,
    CertificateRequired = 116,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AlertDescription::CloseNotify),
            10 => Some(AlertDescription::UnexpectedMessage),
            20 => Some(AlertDescription::BadRecordMac),
            22 => Some(AlertDescription::RecordOverflow),
            40 => Some(AlertDescription::HandshakeFailure),
            42 => Some(AlertDescription::BadCertificate),
            43 => Some(AlertDescription::UnsupportedCertificate),
            44 => Some(AlertDescription::CertificateRevoked),
            45 => Some(AlertDescription::CertificateExpired),
            46 => Some(AlertDescription::CertificateUnknown),
            47 => Some(AlertDescription::IllegalParameter),
            48 => Some(AlertDescription::UnknownCa),
            49 => Some(AlertDescription::AccessDenied),
            50 => Some(AlertDescription::DecodeError),
            51 => Some(AlertDescription::DecryptError),
            70 => Some(AlertDescription::ProtocolVersion),
            71 => Some(AlertDescription::InsufficientSecurity),
            80 => Some(AlertDescription::InternalError),
            86 => Some(AlertDescription::InappropriateFallback),
            90 => Some(AlertDescription::UserCanceled),
            100 => Some(AlertDescription::NoRenegotiation),
            109 => Some(AlertDescription::MissingExtension),
            110 => Some(AlertDescription::UnsupportedExtension),
            112 => Some(AlertDescription::UnrecognizedName),
            115 => Some(AlertDescription::UnknownPskIdentity),
            116 => Some(AlertDescription::CertificateRequired),
            120 => Some(AlertDescription::NoApplicationProtocol),
            _ => None,
        }
    }
}

/// TLS error types.
///
/// Every fatal variant maps onto the alert the engine sends before marking
/// the connection dead; see [`TlsError::alert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsError {
    /// Malformed or over-long wire data.
    DecodeError,
    /// A handshake message arrived out of order.
    UnexpectedMessage,
    /// AEAD tag verification failed on a received record.
    BadRecordMac,
    /// Received record exceeds the length limit.
    RecordOverflow,
    /// A per-epoch sequence number would wrap.
    SeqOverflow,
    /// Negotiation could not find a common parameter set.
    HandshakeFailure,
    /// The chain validator rejected the peer certificate.
    CertificateInvalid,
    /// The peer certificate could not be processed at all.
    CertificateUnknown,
    /// A CertificateVerify or Finished check failed.
    DecryptError,
    /// The peer speaks no version we accept.
    ProtocolVersion,
    /// Parameters were negotiable but below our floor (downgrade sentinel).
    InsufficientSecurity,
    /// A bug or unsupported internal condition.
    InternalError,
    /// Peer sent user_canceled (warning; connection continues).
    UserCanceled,
    /// Peer closed the channel gracefully.
    CloseNotify,
    /// The transport failed or was closed underneath us.
    ConnectionClosed,
    /// Peer sent a fatal alert.
    AlertReceived(AlertDescription),
}

impl TlsError {
    /// The alert to send for this error, if any.
    ///
    /// `AlertReceived` and `ConnectionClosed` describe conditions where the
    /// peer is already gone; no alert is emitted for them.
    pub fn alert(&self) -> Option<(AlertLevel, AlertDescription)> {
        match self {
            TlsError::DecodeError => Some((AlertLevel::Fatal, AlertDescription::DecodeError)),
            TlsError::UnexpectedMessage => {
                Some((AlertLevel::Fatal, AlertDescription::UnexpectedMessage))
            }
            TlsError::BadRecordMac => Some((AlertLevel::Fatal, AlertDescription::BadRecordMac)),
            TlsError::RecordOverflow => Some((AlertLevel::Fatal, AlertDescription::RecordOverflow)),
            TlsError::SeqOverflow => Some((AlertLevel::Fatal, AlertDescription::InternalError)),
            TlsError::HandshakeFailure => {
                Some((AlertLevel::Fatal, AlertDescription::HandshakeFailure))
            }
            TlsError::CertificateInvalid => {
                Some((AlertLevel::Fatal, AlertDescription::BadCertificate))
            }
            TlsError::CertificateUnknown => {
                Some((AlertLevel::Fatal, AlertDescription::CertificateUnknown))
            }
            TlsError::DecryptError => Some((AlertLevel::Fatal, AlertDescription::DecryptError)),
            TlsError::ProtocolVersion => {
                Some((AlertLevel::Fatal, AlertDescription::ProtocolVersion))
            }
            TlsError::InsufficientSecurity => {
                Some((AlertLevel::Fatal, AlertDescription::InsufficientSecurity))
            }
            TlsError::InternalError => Some((AlertLevel::Fatal, AlertDescription::InternalError)),
            TlsError::UserCanceled => Some((AlertLevel::Warning, AlertDescription::UserCanceled)),
            TlsError::CloseNotify => Some((AlertLevel::Warning, AlertDescription::CloseNotify)),
            TlsError::ConnectionClosed => None,
            TlsError::AlertReceived(_) => None,
        }
    }

    /// Whether the connection survives this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TlsError::UserCanceled)
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::DecodeError => write!(f, "decode error"),
            TlsError::UnexpectedMessage => write!(f, "unexpected handshake message"),
            TlsError::BadRecordMac => write!(f, "bad record MAC"),
            TlsError::RecordOverflow => write!(f, "record overflow"),
            TlsError::SeqOverflow => write!(f, "sequence number overflow"),
            TlsError::HandshakeFailure => write!(f, "handshake failure"),
            TlsError::CertificateInvalid => write!(f, "peer certificate rejected"),
            TlsError::CertificateUnknown => write!(f, "peer certificate unprocessable"),
            TlsError::DecryptError => write!(f, "signature or finished verification failed"),
            TlsError::ProtocolVersion => write!(f, "unsupported protocol version"),
            TlsError::InsufficientSecurity => write!(f, "insufficient security"),
            TlsError::InternalError => write!(f, "internal error"),
            TlsError::UserCanceled => write!(f, "user canceled"),
            TlsError::CloseNotify => write!(f, "connection closed by peer"),
            TlsError::ConnectionClosed => write!(f, "transport closed"),
            TlsError::AlertReceived(desc) => write!(f, "fatal alert received: {:?}", desc),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TlsError {}

/// Endpoint role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bytes() {
        assert_eq!(TlsVersion::Tls13.to_bytes(), [0x03, 0x04]);
        assert_eq!(
            TlsVersion::from_bytes([0x03, 0x03]),
            Some(TlsVersion::Tls12)
        );
        assert_eq!(TlsVersion::from_bytes([0x03, 0x01]), None);
    }

    #[test]
    fn alert_mapping() {
        assert_eq!(
            TlsError::DecryptError.alert(),
            Some((AlertLevel::Fatal, AlertDescription::DecryptError))
        );
        assert_eq!(
            TlsError::RecordOverflow.alert(),
            Some((AlertLevel::Fatal, AlertDescription::RecordOverflow))
        );
        assert!(TlsError::UserCanceled.alert().unwrap().0 == AlertLevel::Warning);
        assert!(TlsError::AlertReceived(AlertDescription::InternalError)
            .alert()
            .is_none());
        assert!(!TlsError::UserCanceled.is_fatal());
    }
}
