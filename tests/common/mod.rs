//! Shared test fixtures: an in-memory duplex transport, a raw-public-key
//! chain validator, and parameter builders with seeded RNGs.

#![allow(dead_code)]

use std::boxed::Box;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::vec::Vec;

use rand::rngs::StdRng;
use rand::SeedableRng;

use strand_tls::codec::SignatureScheme;
use strand_tls::crypto::{SigningKey, VerifyKey};
use strand_tls::params::{ClientAuthPolicy, CommonParams, Credentials};
use strand_tls::{Backend, ChainValidator, ClientParams, ServerParams, TlsError, TlsVersion};

/// One direction of the in-memory connection.
struct Pipe {
    state: Mutex<PipeState>,
    cond: Condvar,
}

struct PipeState {
    bytes: VecDeque<u8>,
    closed: bool,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Pipe {
            state: Mutex::new(PipeState {
                bytes: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        })
    }
}

/// One endpoint of an in-memory full-duplex byte stream.
pub struct DuplexEnd {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

/// Create a connected transport pair.
pub fn duplex() -> (DuplexEnd, DuplexEnd) {
    let a = Pipe::new();
    let b = Pipe::new();
    (
        DuplexEnd {
            incoming: a.clone(),
            outgoing: b.clone(),
        },
        DuplexEnd {
            incoming: b,
            outgoing: a,
        },
    )
}

impl Backend for DuplexEnd {
    fn send(&self, data: &[u8]) -> Result<(), TlsError> {
        let mut st = self.outgoing.state.lock().unwrap();
        // Writes after the peer closed succeed and vanish, like writes into
        // a TCP send buffer after the far end went away.
        if !st.closed {
            st.bytes.extend(data.iter().copied());
            self.outgoing.cond.notify_all();
        }
        Ok(())
    }

    fn recv(&self, max: usize) -> Result<Vec<u8>, TlsError> {
        let mut st = self.incoming.state.lock().unwrap();
        while st.bytes.is_empty() && !st.closed {
            st = self.incoming.cond.wait(st).unwrap();
        }
        let n = max.min(st.bytes.len());
        Ok(st.bytes.drain(..n).collect())
    }

    fn close(&self) {
        for pipe in [&self.incoming, &self.outgoing] {
            let mut st = pipe.state.lock().unwrap();
            st.closed = true;
            pipe.cond.notify_all();
        }
    }
}

/// Validator for the test-world "certificates": the chain's leaf is the raw
/// public key itself.
pub struct RawKeyValidator {
    pub scheme: SignatureScheme,
}

impl ChainValidator for RawKeyValidator {
    fn verify_chain(
        &self,
        chain: &[Vec<u8>],
        _server_name: Option<&[u8]>,
    ) -> Result<VerifyKey, TlsError> {
        let leaf = chain.first().ok_or(TlsError::CertificateInvalid)?;
        VerifyKey::from_bytes(self.scheme, leaf).map_err(|_| TlsError::CertificateInvalid)
    }
}

/// A validator that rejects everything.
pub struct RejectAll;

impl ChainValidator for RejectAll {
    fn verify_chain(
        &self,
        _chain: &[Vec<u8>],
        _server_name: Option<&[u8]>,
    ) -> Result<VerifyKey, TlsError> {
        Err(TlsError::CertificateInvalid)
    }
}

pub fn seeded_common(seed: u64, versions: &[TlsVersion]) -> CommonParams {
    let mut common = CommonParams::new(Box::new(StdRng::seed_from_u64(seed)));
    common.versions = versions.to_vec();
    common
}

/// Credentials whose "chain" is the raw public key.
pub fn raw_key_credentials(scheme: SignatureScheme, seed_byte: u8) -> Credentials {
    let key = SigningKey::from_bytes(scheme, &[seed_byte; 32]).expect("valid key seed");
    let chain = vec![key.public_bytes()];
    Credentials { chain, key }
}

pub fn client_params(
    seed: u64,
    versions: &[TlsVersion],
    scheme: SignatureScheme,
) -> ClientParams {
    ClientParams {
        common: seeded_common(seed, versions),
        server_name: Some(b"test.local".to_vec()),
        validator: Arc::new(RawKeyValidator { scheme }),
        client_auth: None,
        resume_session: None,
    }
}

pub fn server_params(
    seed: u64,
    versions: &[TlsVersion],
    scheme: SignatureScheme,
) -> ServerParams {
    ServerParams {
        common: seeded_common(seed, versions),
        credentials: raw_key_credentials(scheme, 0x42),
        client_auth: ClientAuthPolicy::None,
        client_validator: None,
    }
}
