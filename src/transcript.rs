//! Running transcript hash over handshake message bytes.
//!
//! The hash function is only known once a cipher suite is negotiated, so the
//! transcript buffers raw bytes until then and streams afterwards. Snapshots
//! never disturb the ongoing stream.

extern crate alloc;

use alloc::vec::Vec;

use crate::codec::message_hash_transcript;
use crate::crypto::{HashAlgorithm, HashContext};

/// Transcript of every handshake message byte, in order.
pub struct Transcript {
    buffer: Vec<u8>,
    digest: Option<HashContext>,
}

impl Transcript {
    /// Empty transcript, no hash selected yet.
    pub fn new() -> Self {
        Transcript {
            buffer: Vec::new(),
            digest: None,
        }
    }

    /// Append the full wire bytes of one handshake message.
    pub fn push(&mut self, msg: &[u8]) {
        match &mut self.digest {
            Some(d) => d.update(msg),
            None => self.buffer.extend_from_slice(msg),
        }
    }

    /// Fix the hash and replay anything buffered. A repeat call with the
    /// same algorithm is a no-op.
    pub fn set_algorithm(&mut self, alg: HashAlgorithm) {
        match &self.digest {
            Some(d) if d.algorithm() == alg => return,
            Some(_) => {
                // A handshake never renegotiates its hash mid-flight.
                debug_assert!(false, "transcript hash changed mid-handshake");
            }
            None => {}
        }
        let mut d = HashContext::new(alg);
        d.update(&self.buffer);
        self.buffer.clear();
        self.digest = Some(d);
    }

    /// Whether a hash has been selected.
    pub fn started(&self) -> bool {
        self.digest.is_some()
    }

    /// Snapshot of the current transcript hash.
    ///
    /// Only valid once an algorithm is set.
    pub fn current_hash(&self) -> Vec<u8> {
        self.digest
            .as_ref()
            .expect("transcript hash queried before negotiation")
            .snapshot()
    }

    /// Hash of the transcript with `extra` appended, without mutating the
    /// transcript. Used for PSK binders, where the hash may be needed before
    /// negotiation fixes the algorithm.
    pub fn hash_with_extra(&self, alg: HashAlgorithm, extra: &[u8]) -> Vec<u8> {
        match &self.digest {
            Some(d) => {
                debug_assert!(d.algorithm() == alg);
                let mut d = d.clone();
                d.update(extra);
                d.snapshot()
            }
            None => {
                let mut d = HashContext::new(alg);
                d.update(&self.buffer);
                d.update(extra);
                d.snapshot()
            }
        }
    }

    /// The raw transcript bytes, available while still buffering (the
    /// TLS 1.2 CertificateVerify signs the concatenation, not a hash).
    pub fn raw(&self) -> Option<&[u8]> {
        match self.digest {
            Some(_) => None,
            None => Some(&self.buffer),
        }
    }

    /// HelloRetryRequest substitution (RFC 8446 §4.4.1): replace ClientHello1
    /// with a synthetic message_hash message containing H(ClientHello1).
    ///
    /// Must be called before the HelloRetryRequest itself is pushed.
    pub fn hello_retry_substitute(&mut self, alg: HashAlgorithm) {
        let ch1_hash = match &self.digest {
            Some(d) => {
                debug_assert!(d.algorithm() == alg);
                d.snapshot()
            }
            None => alg.hash(&self.buffer),
        };
        let mut d = HashContext::new(alg);
        d.update(&message_hash_transcript(&ch1_hash));
        self.buffer.clear();
        self.digest = Some(d);
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_then_stream_matches_one_shot() {
        let alg = HashAlgorithm::Sha256;
        let mut t = Transcript::new();
        t.push(b"client hello bytes");
        t.set_algorithm(alg);
        t.push(b"server hello bytes");
        assert_eq!(
            t.current_hash(),
            alg.hash(b"client hello bytesserver hello bytes")
        );
    }

    #[test]
    fn snapshot_does_not_disturb_stream() {
        let alg = HashAlgorithm::Sha384;
        let mut t = Transcript::new();
        t.set_algorithm(alg);
        t.push(b"one");
        let first = t.current_hash();
        t.push(b"two");
        assert_eq!(first, alg.hash(b"one"));
        assert_eq!(t.current_hash(), alg.hash(b"onetwo"));
    }

    #[test]
    fn hash_with_extra_matches_push() {
        let alg = HashAlgorithm::Sha256;
        let mut t = Transcript::new();
        t.push(b"partial");
        let predicted = t.hash_with_extra(alg, b" tail");
        t.set_algorithm(alg);
        t.push(b" tail");
        assert_eq!(predicted, t.current_hash());
    }

    #[test]
    fn hello_retry_substitution() {
        let alg = HashAlgorithm::Sha256;
        let mut t = Transcript::new();
        t.push(b"ch1");
        t.hello_retry_substitute(alg);
        t.push(b"hrr");

        let ch1_hash = alg.hash(b"ch1");
        let mut expect = message_hash_transcript(&ch1_hash);
        expect.extend_from_slice(b"hrr");
        assert_eq!(t.current_hash(), alg.hash(&expect));
    }
}
