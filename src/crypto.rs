//! Cryptographic primitive layer.
//!
//! The engine consumes abstract hashes, AEADs, key-exchange groups, and
//! signing keys; this module binds those names to concrete implementations.
//! Dispatch is by enum, not trait object: the set of primitives is closed
//! and known at compile time.

extern crate alloc;

use alloc::vec::Vec;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, CryptoRngCore, RngCore};
use sha2::{Digest, Sha256, Sha384};
use zeroize::Zeroizing;

use crate::codec::{NamedGroup, SignatureScheme};
use crate::TlsError;

/// Hash function selected by the negotiated cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    /// Digest output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }

    /// One-shot digest.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        }
    }

    /// One-shot HMAC.
    pub fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => {
                let mut mac =
                    <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlgorithm::Sha384 => {
                let mut mac =
                    <Hmac<Sha384> as Mac>::new_from_slice(key).expect("hmac accepts any key size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Constant-time HMAC verification.
    pub fn hmac_verify(&self, key: &[u8], data: &[u8], tag: &[u8]) -> bool {
        match self {
            HashAlgorithm::Sha256 => {
                let mut mac =
                    <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key size");
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
            HashAlgorithm::Sha384 => {
                let mut mac =
                    <Hmac<Sha384> as Mac>::new_from_slice(key).expect("hmac accepts any key size");
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
        }
    }

    /// HKDF-Extract.
    pub fn hkdf_extract(&self, salt: &[u8], ikm: &[u8]) -> Zeroizing<Vec<u8>> {
        let salt = if salt.is_empty() { None } else { Some(salt) };
        match self {
            HashAlgorithm::Sha256 => {
                let (prk, _) = Hkdf::<Sha256>::extract(salt, ikm);
                Zeroizing::new(prk.to_vec())
            }
            HashAlgorithm::Sha384 => {
                let (prk, _) = Hkdf::<Sha384>::extract(salt, ikm);
                Zeroizing::new(prk.to_vec())
            }
        }
    }

    /// HKDF-Expand from a pseudorandom key.
    pub fn hkdf_expand(&self, prk: &[u8], info: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
        let mut okm = Zeroizing::new(alloc::vec![0u8; len]);
        match self {
            HashAlgorithm::Sha256 => Hkdf::<Sha256>::from_prk(prk)
                .expect("prk is a digest output")
                .expand(info, &mut okm)
                .expect("output length within hkdf bounds"),
            HashAlgorithm::Sha384 => Hkdf::<Sha384>::from_prk(prk)
                .expect("prk is a digest output")
                .expand(info, &mut okm)
                .expect("output length within hkdf bounds"),
        }
        okm
    }
}

/// Streaming digest context, cloneable for transcript snapshots.
#[derive(Clone)]
pub enum HashContext {
    Sha256(Sha256),
    Sha384(Sha384),
}

impl HashContext {
    /// Fresh context for the given algorithm.
    pub fn new(alg: HashAlgorithm) -> Self {
        match alg {
            HashAlgorithm::Sha256 => HashContext::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => HashContext::Sha384(Sha384::new()),
        }
    }

    /// The algorithm of this context.
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            HashContext::Sha256(_) => HashAlgorithm::Sha256,
            HashContext::Sha384(_) => HashAlgorithm::Sha384,
        }
    }

    /// Absorb bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            HashContext::Sha256(d) => d.update(data),
            HashContext::Sha384(d) => d.update(data),
        }
    }

    /// Digest of everything absorbed so far, without disturbing the stream.
    pub fn snapshot(&self) -> Vec<u8> {
        match self {
            HashContext::Sha256(d) => d.clone().finalize().to_vec(),
            HashContext::Sha384(d) => d.clone().finalize().to_vec(),
        }
    }
}

/// AEAD cipher selected by the negotiated cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            AeadAlgorithm::Aes128Gcm => 16,
            AeadAlgorithm::Aes256Gcm | AeadAlgorithm::ChaCha20Poly1305 => 32,
        }
    }

    /// Authentication tag length in bytes.
    pub fn tag_len(&self) -> usize {
        16
    }

    /// TLS 1.2 implicit (key-block) IV length.
    ///
    /// GCM suites carry a 4-byte salt plus an 8-byte explicit nonce on the
    /// wire; ChaCha20-Poly1305 (RFC 7905) uses the full 12-byte IV with the
    /// sequence number XORed in, like TLS 1.3.
    pub fn tls12_fixed_iv_len(&self) -> usize {
        match self {
            AeadAlgorithm::Aes128Gcm | AeadAlgorithm::Aes256Gcm => 4,
            AeadAlgorithm::ChaCha20Poly1305 => 12,
        }
    }

    /// TLS 1.2 explicit per-record nonce length.
    pub fn tls12_explicit_nonce_len(&self) -> usize {
        match self {
            AeadAlgorithm::Aes128Gcm | AeadAlgorithm::Aes256Gcm => 8,
            AeadAlgorithm::ChaCha20Poly1305 => 0,
        }
    }
}

/// A keyed AEAD instance.
pub struct AeadKey {
    alg: AeadAlgorithm,
    cipher: AeadCipher,
}

enum AeadCipher {
    Aes128Gcm(Aes128Gcm),
    Aes256Gcm(Aes256Gcm),
    ChaCha20Poly1305(ChaCha20Poly1305),
}

impl AeadKey {
    /// Key an AEAD. The key slice length must match the algorithm.
    pub fn new(alg: AeadAlgorithm, key: &[u8]) -> Result<Self, TlsError> {
        if key.len() != alg.key_len() {
            return Err(TlsError::InternalError);
        }
        let cipher = match alg {
            AeadAlgorithm::Aes128Gcm => {
                AeadCipher::Aes128Gcm(Aes128Gcm::new_from_slice(key).expect("length checked"))
            }
            AeadAlgorithm::Aes256Gcm => {
                AeadCipher::Aes256Gcm(Aes256Gcm::new_from_slice(key).expect("length checked"))
            }
            AeadAlgorithm::ChaCha20Poly1305 => AeadCipher::ChaCha20Poly1305(
                ChaCha20Poly1305::new_from_slice(key).expect("length checked"),
            ),
        };
        Ok(AeadKey { alg, cipher })
    }

    /// The algorithm behind this key.
    pub fn algorithm(&self) -> AeadAlgorithm {
        self.alg
    }

    /// Encrypt; output is ciphertext followed by the tag.
    pub fn seal(&self, nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        match &self.cipher {
            AeadCipher::Aes128Gcm(c) => c
                .encrypt(aes_gcm::Nonce::from_slice(nonce), payload)
                .expect("aead encryption is infallible"),
            AeadCipher::Aes256Gcm(c) => c
                .encrypt(aes_gcm::Nonce::from_slice(nonce), payload)
                .expect("aead encryption is infallible"),
            AeadCipher::ChaCha20Poly1305(c) => c
                .encrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
                .expect("aead encryption is infallible"),
        }
    }

    /// Decrypt and verify the tag.
    pub fn open(&self, nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, TlsError> {
        if ciphertext.len() < self.alg.tag_len() {
            return Err(TlsError::BadRecordMac);
        }
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let out = match &self.cipher {
            AeadCipher::Aes128Gcm(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            AeadCipher::Aes256Gcm(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            AeadCipher::ChaCha20Poly1305(c) => {
                c.decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
            }
        };
        out.map_err(|_| TlsError::BadRecordMac)
    }
}

/// Adapter exposing a boxed CSPRNG to APIs generic over `RngCore + CryptoRng`.
pub struct RngAdapter<'a>(pub &'a mut dyn CryptoRngCore);

impl RngCore for RngAdapter<'_> {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.0.try_fill_bytes(dest)
    }
}

impl CryptoRng for RngAdapter<'_> {}

/// An ephemeral key-exchange secret for one named group.
pub enum KeyExchange {
    X25519(x25519_dalek::StaticSecret),
    Secp256r1(p256::ecdh::EphemeralSecret),
}

impl KeyExchange {
    /// Generate a fresh keypair on `group`.
    pub fn generate(group: NamedGroup, rng: &mut dyn CryptoRngCore) -> Result<Self, TlsError> {
        match group {
            NamedGroup::X25519 => {
                let mut seed = [0u8; 32];
                rng.fill_bytes(&mut seed);
                Ok(KeyExchange::X25519(x25519_dalek::StaticSecret::from(seed)))
            }
            NamedGroup::Secp256r1 => Ok(KeyExchange::Secp256r1(
                p256::ecdh::EphemeralSecret::random(&mut RngAdapter(rng)),
            )),
            _ => Err(TlsError::HandshakeFailure),
        }
    }

    /// The group of this keypair.
    pub fn group(&self) -> NamedGroup {
        match self {
            KeyExchange::X25519(_) => NamedGroup::X25519,
            KeyExchange::Secp256r1(_) => NamedGroup::Secp256r1,
        }
    }

    /// The public share in its wire form (raw for X25519, uncompressed SEC1
    /// for P-256).
    pub fn public_bytes(&self) -> Vec<u8> {
        match self {
            KeyExchange::X25519(secret) => {
                x25519_dalek::PublicKey::from(secret).as_bytes().to_vec()
            }
            KeyExchange::Secp256r1(secret) => {
                use p256::elliptic_curve::sec1::ToEncodedPoint;
                secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec()
            }
        }
    }

    /// Complete the exchange against the peer's public share.
    pub fn agree(self, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>, TlsError> {
        match self {
            KeyExchange::X25519(secret) => {
                let bytes: [u8; 32] = peer.try_into().map_err(|_| TlsError::DecodeError)?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(bytes));
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            KeyExchange::Secp256r1(secret) => {
                let pk = p256::PublicKey::from_sec1_bytes(peer)
                    .map_err(|_| TlsError::DecodeError)?;
                let shared = secret.diffie_hellman(&pk);
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    }
}

/// A private signing key with its TLS signature scheme.
pub enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl SigningKey {
    /// Load a key from raw bytes (32-byte seed for Ed25519, 32-byte scalar
    /// for ECDSA-P256).
    pub fn from_bytes(scheme: SignatureScheme, bytes: &[u8]) -> Result<Self, TlsError> {
        match scheme {
            SignatureScheme::Ed25519 => {
                let seed: [u8; 32] = bytes.try_into().map_err(|_| TlsError::DecodeError)?;
                Ok(SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(
                    &seed,
                )))
            }
            SignatureScheme::EcdsaSecp256r1Sha256 => Ok(SigningKey::EcdsaP256(
                p256::ecdsa::SigningKey::from_slice(bytes).map_err(|_| TlsError::DecodeError)?,
            )),
            _ => Err(TlsError::HandshakeFailure),
        }
    }

    /// The TLS signature scheme this key signs under.
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            SigningKey::Ed25519(_) => SignatureScheme::Ed25519,
            SigningKey::EcdsaP256(_) => SignatureScheme::EcdsaSecp256r1Sha256,
        }
    }

    /// Sign a message; ECDSA output is DER as TLS requires.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            SigningKey::Ed25519(key) => {
                use ed25519_dalek::Signer as _;
                key.sign(message).to_bytes().to_vec()
            }
            SigningKey::EcdsaP256(key) => {
                use p256::ecdsa::signature::Signer as _;
                let sig: p256::ecdsa::Signature = key.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
        }
    }

    /// The matching public verification key.
    pub fn verify_key(&self) -> VerifyKey {
        match self {
            SigningKey::Ed25519(key) => VerifyKey::Ed25519(key.verifying_key()),
            SigningKey::EcdsaP256(key) => VerifyKey::EcdsaP256(*key.verifying_key()),
        }
    }

    /// Wire bytes of the public key (raw for Ed25519, SEC1 for P-256), as
    /// [`VerifyKey::from_bytes`] consumes them.
    pub fn public_bytes(&self) -> Vec<u8> {
        match self {
            SigningKey::Ed25519(key) => key.verifying_key().to_bytes().to_vec(),
            SigningKey::EcdsaP256(key) => {
                use p256::elliptic_curve::sec1::ToEncodedPoint;
                key.verifying_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec()
            }
        }
    }
}

/// A public verification key, as handed back by the chain validator.
#[derive(Clone)]
pub enum VerifyKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
}

impl VerifyKey {
    /// Load a key from raw bytes (32 bytes for Ed25519, SEC1 for P-256).
    pub fn from_bytes(scheme: SignatureScheme, bytes: &[u8]) -> Result<Self, TlsError> {
        match scheme {
            SignatureScheme::Ed25519 => {
                let raw: [u8; 32] = bytes.try_into().map_err(|_| TlsError::DecodeError)?;
                Ok(VerifyKey::Ed25519(
                    ed25519_dalek::VerifyingKey::from_bytes(&raw)
                        .map_err(|_| TlsError::DecodeError)?,
                ))
            }
            SignatureScheme::EcdsaSecp256r1Sha256 => Ok(VerifyKey::EcdsaP256(
                p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                    .map_err(|_| TlsError::DecodeError)?,
            )),
            _ => Err(TlsError::HandshakeFailure),
        }
    }

    /// The TLS scheme this key verifies.
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            VerifyKey::Ed25519(_) => SignatureScheme::Ed25519,
            VerifyKey::EcdsaP256(_) => SignatureScheme::EcdsaSecp256r1Sha256,
        }
    }

    /// Verify a TLS-wire signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), TlsError> {
        match self {
            VerifyKey::Ed25519(key) => {
                use ed25519_dalek::Verifier as _;
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| TlsError::DecryptError)?;
                key.verify(message, &sig).map_err(|_| TlsError::DecryptError)
            }
            VerifyKey::EcdsaP256(key) => {
                use p256::ecdsa::signature::Verifier as _;
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| TlsError::DecryptError)?;
                key.verify(message, &sig).map_err(|_| TlsError::DecryptError)
            }
        }
    }
}

/// Constant-time byte-slice equality.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
