//! Caller-supplied connection parameters.
//!
//! One record per role, sharing a common core; the `Params` tagged variant
//! is what `Context::new` consumes. Debug affordances are the RNG seam
//! (hand in a seeded CSPRNG for determinism) and the key-log hook.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use rand_core::CryptoRngCore;

use crate::codec::{NamedGroup, SignatureScheme};
use crate::crypto::{SigningKey, VerifyKey};
use crate::session::{no_session_manager, SessionManager};
use crate::suites::{CipherSuite, DEFAULT_SUITES};
use crate::{Role, TlsError, TlsVersion};

/// Verifies a peer certificate chain and yields the leaf's verify key.
///
/// The engine does not parse X.509; the validator both judges the chain and
/// extracts the key. A validator may deliberately approve a chain it could
/// not verify — that is the caller's decision, and the signature checks that
/// follow still run against the returned key.
pub trait ChainValidator: Send + Sync {
    /// Validate `chain` (DER, leaf first). `server_name` carries the SNI the
    /// client targeted, when validating a server.
    fn verify_chain(
        &self,
        chain: &[Vec<u8>],
        server_name: Option<&[u8]>,
    ) -> Result<VerifyKey, TlsError>;
}

/// A certificate chain plus the key that signs for its leaf.
pub struct Credentials {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    pub key: SigningKey,
}

/// Whether a server asks for / insists on a client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthPolicy {
    None,
    Request,
    Require,
}

/// Configuration shared by both roles.
pub struct CommonParams {
    /// Accepted versions, highest first.
    pub versions: Vec<TlsVersion>,
    /// Cipher suites in preference order.
    pub suites: Vec<&'static CipherSuite>,
    /// Key-exchange groups in preference order.
    pub groups: Vec<NamedGroup>,
    /// Signature schemes accepted from the peer, in preference order.
    pub signature_schemes: Vec<SignatureScheme>,
    /// ALPN protocols, most preferred first; empty disables ALPN.
    pub alpn: Vec<Vec<u8>>,
    /// Resumption store.
    pub session: Arc<dyn SessionManager>,
    /// CSPRNG; seed it deterministically for reproducible handshakes.
    pub rng: Box<dyn CryptoRngCore + Send>,
}

impl CommonParams {
    /// Defaults: both versions, all suites, X25519 then P-256, Ed25519 then
    /// ECDSA-P256, no ALPN, no resumption store.
    pub fn new(rng: Box<dyn CryptoRngCore + Send>) -> Self {
        CommonParams {
            versions: alloc::vec![TlsVersion::Tls13, TlsVersion::Tls12],
            suites: DEFAULT_SUITES.to_vec(),
            groups: alloc::vec![NamedGroup::X25519, NamedGroup::Secp256r1],
            signature_schemes: alloc::vec![
                SignatureScheme::Ed25519,
                SignatureScheme::EcdsaSecp256r1Sha256,
            ],
            alpn: Vec::new(),
            session: no_session_manager(),
            rng,
        }
    }

    /// Highest configured version.
    pub fn max_version(&self) -> TlsVersion {
        self.versions
            .iter()
            .copied()
            .max()
            .unwrap_or(TlsVersion::Tls13)
    }

    /// Whether a version is enabled.
    pub fn supports(&self, version: TlsVersion) -> bool {
        self.versions.contains(&version)
    }
}

/// Client-side parameters.
pub struct ClientParams {
    pub common: CommonParams,
    /// SNI host name, sent when present.
    pub server_name: Option<Vec<u8>>,
    /// Validates the server chain.
    pub validator: Arc<dyn ChainValidator>,
    /// Credentials offered if the server requests client auth.
    pub client_auth: Option<Credentials>,
    /// A stored session to offer for resumption: the ID or ticket plus its
    /// data, as previously handed to the session manager's `establish`.
    pub resume_session: Option<(Vec<u8>, crate::session::SessionData)>,
}

/// Server-side parameters.
pub struct ServerParams {
    pub common: CommonParams,
    /// The server's certificate chain and signing key.
    pub credentials: Credentials,
    /// Client-certificate policy.
    pub client_auth: ClientAuthPolicy,
    /// Validates client chains when `client_auth` is not `None`.
    pub client_validator: Option<Arc<dyn ChainValidator>>,
}

/// Role-tagged parameters.
pub enum Params {
    Client(ClientParams),
    Server(ServerParams),
}

impl Params {
    /// The role these parameters configure.
    pub fn role(&self) -> Role {
        match self {
            Params::Client(_) => Role::Client,
            Params::Server(_) => Role::Server,
        }
    }

    /// The shared core.
    pub fn common(&self) -> &CommonParams {
        match self {
            Params::Client(p) => &p.common,
            Params::Server(p) => &p.common,
        }
    }

    /// Mutable access to the shared core.
    pub fn common_mut(&mut self) -> &mut CommonParams {
        match self {
            Params::Client(p) => &mut p.common,
            Params::Server(p) => &mut p.common,
        }
    }
}
