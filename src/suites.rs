//! Cipher suite table.
//!
//! TLS 1.3 suites fix only the AEAD and hash; key exchange and signature are
//! negotiated separately. The TLS 1.2 suites here are the forward-secret
//! AEAD family only.

use crate::crypto::{AeadAlgorithm, HashAlgorithm};
use crate::TlsVersion;

/// Key-exchange kind fixed by a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexKind {
    /// TLS 1.3: taken from the key_share negotiation.
    Negotiated,
    /// TLS 1.2 ephemeral ECDH.
    Ecdhe,
}

/// Signature kind fixed by a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigKind {
    /// TLS 1.3: taken from signature_algorithms.
    Negotiated,
    /// ECDSA-family certificates (includes EdDSA per RFC 8422).
    Ecdsa,
}

/// A supported cipher suite.
#[derive(Debug, PartialEq, Eq)]
pub struct CipherSuite {
    pub id: u16,
    pub name: &'static str,
    pub version: TlsVersion,
    pub hash: HashAlgorithm,
    pub aead: AeadAlgorithm,
    pub kex: KexKind,
    pub sig: SigKind,
}

impl CipherSuite {
    /// Whether this is a TLS 1.3 suite.
    pub fn is_tls13(&self) -> bool {
        self.version == TlsVersion::Tls13
    }

    /// Finished verify_data length for this suite.
    pub fn verify_data_len(&self) -> usize {
        match self.version {
            TlsVersion::Tls12 => 12,
            TlsVersion::Tls13 => self.hash.output_len(),
        }
    }
}

pub static TLS13_AES_128_GCM_SHA256: CipherSuite = CipherSuite {
    id: 0x1301,
    name: "TLS_AES_128_GCM_SHA256",
    version: TlsVersion::Tls13,
    hash: HashAlgorithm::Sha256,
    aead: AeadAlgorithm::Aes128Gcm,
    kex: KexKind::Negotiated,
    sig: SigKind::Negotiated,
};

pub static TLS13_AES_256_GCM_SHA384: CipherSuite = CipherSuite {
    id: 0x1302,
    name: "TLS_AES_256_GCM_SHA384",
    version: TlsVersion::Tls13,
    hash: HashAlgorithm::Sha384,
    aead: AeadAlgorithm::Aes256Gcm,
    kex: KexKind::Negotiated,
    sig: SigKind::Negotiated,
};

pub static TLS13_CHACHA20_POLY1305_SHA256: CipherSuite = CipherSuite {
    id: 0x1303,
    name: "TLS_CHACHA20_POLY1305_SHA256",
    version: TlsVersion::Tls13,
    hash: HashAlgorithm::Sha256,
    aead: AeadAlgorithm::ChaCha20Poly1305,
    kex: KexKind::Negotiated,
    sig: SigKind::Negotiated,
};

pub static ECDHE_ECDSA_AES_128_GCM_SHA256: CipherSuite = CipherSuite {
    id: 0xC02B,
    name: "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    version: TlsVersion::Tls12,
    hash: HashAlgorithm::Sha256,
    aead: AeadAlgorithm::Aes128Gcm,
    kex: KexKind::Ecdhe,
    sig: SigKind::Ecdsa,
};

pub static ECDHE_ECDSA_AES_256_GCM_SHA384: CipherSuite = CipherSuite {
    id: 0xC02C,
    name: "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    version: TlsVersion::Tls12,
    hash: HashAlgorithm::Sha384,
    aead: AeadAlgorithm::Aes256Gcm,
    kex: KexKind::Ecdhe,
    sig: SigKind::Ecdsa,
};

pub static ECDHE_ECDSA_CHACHA20_POLY1305_SHA256: CipherSuite = CipherSuite {
    id: 0xCCA9,
    name: "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    version: TlsVersion::Tls12,
    hash: HashAlgorithm::Sha256,
    aead: AeadAlgorithm::ChaCha20Poly1305,
    kex: KexKind::Ecdhe,
    sig: SigKind::Ecdsa,
};

/// All supported suites.
pub static ALL_SUITES: &[&CipherSuite] = &[
    &TLS13_AES_128_GCM_SHA256,
    &TLS13_AES_256_GCM_SHA384,
    &TLS13_CHACHA20_POLY1305_SHA256,
    &ECDHE_ECDSA_AES_128_GCM_SHA256,
    &ECDHE_ECDSA_AES_256_GCM_SHA384,
    &ECDHE_ECDSA_CHACHA20_POLY1305_SHA256,
];

/// Default preference order: 1.3 before 1.2, AES-GCM before ChaCha.
pub static DEFAULT_SUITES: &[&CipherSuite] = ALL_SUITES;

/// Look up a supported suite by wire id.
pub fn from_id(id: u16) -> Option<&'static CipherSuite> {
    ALL_SUITES.iter().find(|s| s.id == id).copied()
}

/// Pick the first of `ours` (preference order) that the peer offered and
/// that belongs to `version`.
pub fn choose(
    ours: &[&'static CipherSuite],
    offered: &[u16],
    version: TlsVersion,
) -> Option<&'static CipherSuite> {
    ours.iter()
        .find(|s| s.version == version && offered.contains(&s.id))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn lookup_by_id() {
        assert_eq!(from_id(0x1301).unwrap().name, "TLS_AES_128_GCM_SHA256");
        assert!(from_id(0x1301).unwrap().is_tls13());
        assert!(!from_id(0xC02B).unwrap().is_tls13());
        assert!(from_id(0x0000).is_none());
    }

    #[test]
    fn verify_data_lengths() {
        assert_eq!(ECDHE_ECDSA_AES_128_GCM_SHA256.verify_data_len(), 12);
        assert_eq!(TLS13_AES_128_GCM_SHA256.verify_data_len(), 32);
        assert_eq!(TLS13_AES_256_GCM_SHA384.verify_data_len(), 48);
    }

    #[test]
    fn choose_respects_our_preference_and_version() {
        let offered = vec![0xC02B, 0x1301];
        let picked = choose(DEFAULT_SUITES, &offered, TlsVersion::Tls13).unwrap();
        assert_eq!(picked.id, 0x1301);
        let picked12 = choose(DEFAULT_SUITES, &offered, TlsVersion::Tls12).unwrap();
        assert_eq!(picked12.id, 0xC02B);
        assert!(choose(DEFAULT_SUITES, &[0x009C], TlsVersion::Tls12).is_none());
    }
}
