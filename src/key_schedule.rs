//! Key derivation for both protocol versions.
//!
//! TLS 1.2: the PRF, master secret, and key block of RFC 5246 plus the
//! RFC 5705 exporter. TLS 1.3: the HKDF secret tree of RFC 8446 §7.1 with
//! the exporter, resumption, and traffic-update derivations.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use zeroize::Zeroizing;

use crate::crypto::{AeadAlgorithm, HashAlgorithm};

// ── TLS 1.2 ─────────────────────────────────────────────────

/// P_hash-based PRF: `PRF(secret, label, seed) = P_<hash>(secret, label + seed)`.
pub fn prf(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    out_len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    // P_hash(secret, seed) = HMAC(secret, A(1) + seed) + HMAC(secret, A(2) + seed) + ...
    // where A(0) = seed, A(i) = HMAC(secret, A(i-1)).
    let mut a = hash.hmac(secret, &label_seed);
    let mut out = Zeroizing::new(Vec::with_capacity(out_len));
    while out.len() < out_len {
        let mut data = a.clone();
        data.extend_from_slice(&label_seed);
        out.extend_from_slice(&hash.hmac(secret, &data));
        a = hash.hmac(secret, &a);
    }
    out.truncate(out_len);
    out
}

/// `master_secret = PRF(pre_master_secret, "master secret", CR || SR, 48)`.
pub fn master_secret(
    hash: HashAlgorithm,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Zeroizing<Vec<u8>> {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf(hash, pre_master_secret, b"master secret", &seed, 48)
}

/// The traffic keying material split out of the TLS 1.2 key block.
///
/// MAC keys are zero-length for the AEAD suites this engine speaks, but the
/// split stays general.
pub struct KeyBlock {
    pub client_write_mac_key: Zeroizing<Vec<u8>>,
    pub server_write_mac_key: Zeroizing<Vec<u8>>,
    pub client_write_key: Zeroizing<Vec<u8>>,
    pub server_write_key: Zeroizing<Vec<u8>>,
    pub client_write_iv: Zeroizing<Vec<u8>>,
    pub server_write_iv: Zeroizing<Vec<u8>>,
}

/// `key_block = PRF(master_secret, "key expansion", SR || CR)`, split by the
/// cipher's lengths.
pub fn key_block(
    hash: HashAlgorithm,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    mac_key_len: usize,
    enc_key_len: usize,
    fixed_iv_len: usize,
) -> KeyBlock {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let total = 2 * (mac_key_len + enc_key_len + fixed_iv_len);
    let block = prf(hash, master_secret, b"key expansion", &seed, total);

    let mut pos = 0;
    let mut split = |len: usize| {
        let piece = Zeroizing::new(block[pos..pos + len].to_vec());
        pos += len;
        piece
    };
    KeyBlock {
        client_write_mac_key: split(mac_key_len),
        server_write_mac_key: split(mac_key_len),
        client_write_key: split(enc_key_len),
        server_write_key: split(enc_key_len),
        client_write_iv: split(fixed_iv_len),
        server_write_iv: split(fixed_iv_len),
    }
}

/// TLS 1.2 Finished verify_data (12 bytes).
pub fn verify_data12(
    hash: HashAlgorithm,
    master_secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Vec<u8> {
    prf(hash, master_secret, label, transcript_hash, 12).to_vec()
}

/// RFC 5705 exporter over the TLS 1.2 master secret.
pub fn exporter12(
    hash: HashAlgorithm,
    master_secret: &[u8],
    label: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    context: Option<&[u8]>,
    out_len: usize,
) -> Vec<u8> {
    let mut seed = Vec::with_capacity(64 + 2 + context.map_or(0, <[u8]>::len));
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    if let Some(ctx) = context {
        seed.extend_from_slice(&(ctx.len() as u16).to_be_bytes());
        seed.extend_from_slice(ctx);
    }
    prf(hash, master_secret, label, &seed, out_len).to_vec()
}

// ── TLS 1.3 ─────────────────────────────────────────────────

/// `HKDF-Expand-Label(secret, label, context, length)` with the `"tls13 "`
/// prefix of RFC 8446 §7.1.
pub fn hkdf_expand_label(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut info = Vec::with_capacity(4 + 6 + label.len() + context.len());
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    hash.hkdf_expand(secret, &info, out_len)
}

/// `Derive-Secret(secret, label, messages) =
///  HKDF-Expand-Label(secret, label, transcript_hash, hash.len)`.
pub fn derive_secret(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Zeroizing<Vec<u8>> {
    hkdf_expand_label(hash, secret, label, transcript_hash, hash.output_len())
}

/// The chain of extracted secrets: early → handshake → master.
///
/// Stage labels hang off whichever extracted secret is current; advancing
/// consumes the previous stage through the fixed "derived" step.
pub struct Schedule13 {
    hash: HashAlgorithm,
    secret: Zeroizing<Vec<u8>>,
}

impl Schedule13 {
    /// Start the tree: `early_secret = HKDF-Extract(0, psk-or-zeros)`.
    pub fn early(hash: HashAlgorithm, psk: Option<&[u8]>) -> Self {
        let zeros = vec![0u8; hash.output_len()];
        let ikm = psk.unwrap_or(&zeros);
        Schedule13 {
            hash,
            secret: hash.hkdf_extract(&[], ikm),
        }
    }

    /// The hash this schedule runs on.
    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    /// Derive a stage secret off the current extracted secret.
    pub fn derive(&self, label: &[u8], transcript_hash: &[u8]) -> Zeroizing<Vec<u8>> {
        derive_secret(self.hash, &self.secret, label, transcript_hash)
    }

    /// The PSK binder key ("res binder" for resumption PSKs), finished-keyed.
    pub fn resumption_binder_key(&self) -> Zeroizing<Vec<u8>> {
        let empty_hash = self.hash.hash(&[]);
        let binder = derive_secret(self.hash, &self.secret, b"res binder", &empty_hash);
        finished_key(self.hash, &binder)
    }

    /// Advance: `next = HKDF-Extract(Derive-Secret(current, "derived", ""), ikm)`.
    pub fn advance(self, ikm: &[u8]) -> Self {
        let empty_hash = self.hash.hash(&[]);
        let derived = derive_secret(self.hash, &self.secret, b"derived", &empty_hash);
        Schedule13 {
            hash: self.hash,
            secret: self.hash.hkdf_extract(&derived, ikm),
        }
    }

    /// Advance with the zero IKM (handshake → master step).
    pub fn advance_zero(self) -> Self {
        let zeros = vec![0u8; self.hash.output_len()];
        self.advance(&zeros)
    }
}

/// Expand a traffic secret into its record-protection key and IV.
pub fn traffic_keys(
    hash: HashAlgorithm,
    aead: AeadAlgorithm,
    traffic_secret: &[u8],
) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
    let key = hkdf_expand_label(hash, traffic_secret, b"key", &[], aead.key_len());
    let iv = hkdf_expand_label(hash, traffic_secret, b"iv", &[], 12);
    (key, iv)
}

/// `finished_key = HKDF-Expand-Label(base_key, "finished", "", hash.len)`.
pub fn finished_key(hash: HashAlgorithm, base_key: &[u8]) -> Zeroizing<Vec<u8>> {
    hkdf_expand_label(hash, base_key, b"finished", &[], hash.output_len())
}

/// Post-handshake traffic rotation: `"traffic upd"` (RFC 8446 §7.2).
pub fn update_traffic_secret(hash: HashAlgorithm, current: &[u8]) -> Zeroizing<Vec<u8>> {
    hkdf_expand_label(hash, current, b"traffic upd", &[], hash.output_len())
}

/// PSK issued with a ticket: `HKDF-Expand-Label(res_master, "resumption",
/// ticket_nonce, hash.len)`.
pub fn resumption_psk(
    hash: HashAlgorithm,
    resumption_master: &[u8],
    ticket_nonce: &[u8],
) -> Zeroizing<Vec<u8>> {
    hkdf_expand_label(hash, resumption_master, b"resumption", ticket_nonce, hash.output_len())
}

/// RFC 8446 §7.5 exporter over the exporter master secret.
pub fn exporter13(
    hash: HashAlgorithm,
    exporter_master: &[u8],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Vec<u8> {
    let empty_hash = hash.hash(&[]);
    let secret = derive_secret(hash, exporter_master, label, &empty_hash);
    let context_hash = hash.hash(context);
    hkdf_expand_label(hash, &secret, b"exporter", &context_hash, out_len).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_is_deterministic_and_sized() {
        let a = prf(HashAlgorithm::Sha256, b"secret", b"label", b"seed", 100);
        let b = prf(HashAlgorithm::Sha256, b"secret", b"label", b"seed", 100);
        assert_eq!(a, b);
        assert_eq!(a.len(), 100);
        let c = prf(HashAlgorithm::Sha256, b"secret", b"label", b"tilt", 100);
        assert_ne!(a, c);
    }

    #[test]
    fn master_secret_is_48_bytes() {
        let ms = master_secret(HashAlgorithm::Sha256, &[1; 32], &[2; 32], &[3; 32]);
        assert_eq!(ms.len(), 48);
    }

    #[test]
    fn key_block_split_lengths() {
        let kb = key_block(HashAlgorithm::Sha256, &[7; 48], &[1; 32], &[2; 32], 0, 16, 4);
        assert_eq!(kb.client_write_mac_key.len(), 0);
        assert_eq!(kb.client_write_key.len(), 16);
        assert_eq!(kb.server_write_key.len(), 16);
        assert_eq!(kb.client_write_iv.len(), 4);
        assert_eq!(kb.server_write_iv.len(), 4);
        assert_ne!(kb.client_write_key, kb.server_write_key);
    }

    #[test]
    fn expand_label_distinguishes_labels() {
        let h = HashAlgorithm::Sha256;
        let a = hkdf_expand_label(h, &[9; 32], b"c hs traffic", &[0; 32], 32);
        let b = hkdf_expand_label(h, &[9; 32], b"s hs traffic", &[0; 32], 32);
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn schedule_advances() {
        let h = HashAlgorithm::Sha256;
        let early = Schedule13::early(h, None);
        let with_psk = Schedule13::early(h, Some(&[0x55; 32]));
        assert_ne!(
            early.derive(b"c e traffic", &h.hash(&[])),
            with_psk.derive(b"c e traffic", &h.hash(&[]))
        );

        let hs = early.advance(&[0xAB; 32]);
        let c = hs.derive(b"c hs traffic", &h.hash(b"transcript"));
        let s = hs.derive(b"s hs traffic", &h.hash(b"transcript"));
        assert_ne!(c, s);

        let master = hs.advance_zero();
        let exp = master.derive(b"exp master", &h.hash(b"transcript"));
        assert_eq!(exp.len(), 32);
    }

    #[test]
    fn exporters_depend_on_context() {
        let h = HashAlgorithm::Sha256;
        let a = exporter13(h, &[1; 32], b"EXPORTER-test", b"", 32);
        let b = exporter13(h, &[1; 32], b"EXPORTER-test", b"ctx", 32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);

        let e12a = exporter12(h, &[1; 48], b"EXPORTER-test", &[2; 32], &[3; 32], None, 32);
        let e12b = exporter12(h, &[1; 48], b"EXPORTER-test", &[2; 32], &[3; 32], Some(b""), 32);
        // RFC 5705: absent and empty context differ.
        assert_ne!(e12a, e12b);
    }

    #[test]
    fn traffic_key_lengths_follow_aead() {
        let (k, iv) = traffic_keys(HashAlgorithm::Sha256, AeadAlgorithm::Aes128Gcm, &[4; 32]);
        assert_eq!((k.len(), iv.len()), (16, 12));
        let (k, iv) = traffic_keys(
            HashAlgorithm::Sha384,
            AeadAlgorithm::Aes256Gcm,
            &[4; 48],
        );
        assert_eq!((k.len(), iv.len()), (32, 12));
    }
}
