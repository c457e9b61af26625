//! Observation hooks.
//!
//! Hooks observe (and for the handshake hooks, may rewrite) traffic for test
//! harnesses and debugging. The table is swapped atomically under the state
//! lock; callbacks must not re-enter the same context.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::codec::HandshakePayload;

/// Rewrites a received handshake message before processing.
pub type HandshakeObserver = Box<dyn Fn(HandshakePayload) -> HandshakePayload + Send + Sync>;

/// Observes a received certificate chain (DER, leaf first).
pub type ChainObserver = Box<dyn Fn(&[Vec<u8>]) + Send + Sync>;

/// Observes raw records; the first argument is `"send"` or `"recv"`.
/// Shared (`Arc`) so the read and write halves can hold snapshots without
/// touching the state lock.
pub type PacketLogger = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Receives NSS-format key log lines.
pub type KeyLogger = Box<dyn Fn(&str) + Send + Sync>;

/// The hook table.
#[derive(Default)]
pub struct Hooks {
    /// Applied to TLS 1.2 handshake messages on receive.
    pub on_recv_handshake: Option<HandshakeObserver>,
    /// Applied to TLS 1.3 handshake messages on receive.
    pub on_recv_handshake13: Option<HandshakeObserver>,
    /// Called with every certificate chain received.
    pub on_recv_certificate_chain: Option<ChainObserver>,
    /// Raw send/recv record logging.
    pub on_packet: Option<PacketLogger>,
    /// Key log sink, NSS `SSLKEYLOGFILE` format.
    pub key_log: Option<KeyLogger>,
}

impl Hooks {
    /// Emit one key log line if a sink is installed.
    pub fn log_key(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        if let Some(sink) = &self.key_log {
            sink(&key_log_line(label, client_random, secret));
        }
    }
}

/// Format one NSS key log line: `LABEL <client_random> <secret>`.
pub fn key_log_line(label: &str, client_random: &[u8], secret: &[u8]) -> String {
    let mut line = String::with_capacity(label.len() + 2 + 2 * (client_random.len() + secret.len()));
    line.push_str(label);
    line.push(' ');
    push_hex(&mut line, client_random);
    line.push(' ');
    push_hex(&mut line, secret);
    line
}

fn push_hex(out: &mut String, bytes: &[u8]) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0F) as usize] as char);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_log_format() {
        let line = key_log_line("CLIENT_RANDOM", &[0xAB, 0x01], &[0xFF]);
        assert_eq!(line, "CLIENT_RANDOM ab01 ff");
    }
}
