//! Pluggable session resumption store.
//!
//! The engine never persists anything itself: lookups and stores go through
//! a caller-supplied [`SessionManager`]. Keys are session IDs or tickets,
//! opaque either way; values carry enough to resume, so treat both as key
//! material.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::Mutex;
pub use zeroize::Zeroizing;

use crate::TlsVersion;

/// Resumption state for one session.
#[derive(Clone)]
pub struct SessionData {
    pub version: TlsVersion,
    pub cipher_suite: u16,
    /// TLS 1.2: the 48-byte master secret. TLS 1.3: the resumption PSK.
    pub secret: Zeroizing<Vec<u8>>,
    /// Client certificate chain presented on the original connection.
    pub client_cert_chain: Option<Vec<Vec<u8>>>,
    /// ALPN protocol negotiated on the original connection.
    pub alpn: Option<Vec<u8>>,
    /// TLS 1.3 tickets only: early-data allowance (this engine never uses it
    /// to send, but stores and re-offers honestly).
    pub max_early_data: u32,
    /// Ticket issue time, seconds on the caller's clock.
    pub issued_at: u64,
    /// Ticket lifetime in seconds.
    pub lifetime: u32,
    /// TLS 1.3 obfuscated-age offset.
    pub age_add: u32,
}

/// Caller-supplied resumption store.
pub trait SessionManager: Send + Sync {
    /// Look up (or decrypt) a session by ID or ticket.
    fn resume(&self, id: &[u8]) -> Option<SessionData>;

    /// Like `resume`, but the entry must be invalidated on first use.
    /// Called when the offered PSK advertised early data; the manager owns
    /// the at-most-once guarantee.
    fn resume_once(&self, id: &[u8]) -> Option<SessionData>;

    /// Store a session. A ticketing server returns the ticket to hand out;
    /// a client (or an ID-mode server) stores and returns `None`.
    fn establish(&self, id: &[u8], data: SessionData) -> Option<Vec<u8>>;

    /// Drop a session (TLS 1.2 handshake failure after a resumption accept).
    fn invalidate(&self, id: &[u8]);

    /// Server only: emit NewSessionTicket in TLS 1.2 (RFC 5077).
    fn use_ticket(&self) -> bool {
        false
    }
}

/// The default manager: remembers nothing, discards everything.
pub struct NoSessionManager;

impl SessionManager for NoSessionManager {
    fn resume(&self, _id: &[u8]) -> Option<SessionData> {
        None
    }

    fn resume_once(&self, _id: &[u8]) -> Option<SessionData> {
        None
    }

    fn establish(&self, _id: &[u8], _data: SessionData) -> Option<Vec<u8>> {
        None
    }

    fn invalidate(&self, _id: &[u8]) {}
}

/// A default no-op manager instance.
pub fn no_session_manager() -> Arc<dyn SessionManager> {
    Arc::new(NoSessionManager)
}

/// In-memory session store, usable on either role.
///
/// In ticket mode the ticket is the storage key itself; real deployments
/// would seal the state into the ticket instead.
pub struct MemorySessionCache {
    entries: Mutex<HashMap<Vec<u8>, SessionData>>,
    tickets: bool,
}

impl MemorySessionCache {
    /// ID-mode cache (client side, or a server without tickets).
    pub fn new() -> Self {
        MemorySessionCache {
            entries: Mutex::new(HashMap::new()),
            tickets: false,
        }
    }

    /// Ticket-mode cache: `use_ticket` is on and `establish` returns a ticket.
    pub fn with_tickets() -> Self {
        MemorySessionCache {
            entries: Mutex::new(HashMap::new()),
            tickets: true,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recently stored entry, if any (test convenience).
    pub fn any_key(&self) -> Option<Vec<u8>> {
        self.entries.lock().keys().next().cloned()
    }
}

impl Default for MemorySessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager for MemorySessionCache {
    fn resume(&self, id: &[u8]) -> Option<SessionData> {
        self.entries.lock().get(id).cloned()
    }

    fn resume_once(&self, id: &[u8]) -> Option<SessionData> {
        self.entries.lock().remove(id)
    }

    fn establish(&self, id: &[u8], data: SessionData) -> Option<Vec<u8>> {
        if self.tickets {
            // The "ticket" is just a longer storage key here; a real
            // deployment seals the state into the ticket.
            let mut ticket = id.to_vec();
            ticket.extend_from_slice(id);
            self.entries.lock().insert(ticket.clone(), data);
            Some(ticket)
        } else {
            self.entries.lock().insert(id.to_vec(), data);
            None
        }
    }

    fn invalidate(&self, id: &[u8]) {
        self.entries.lock().remove(id);
    }

    fn use_ticket(&self) -> bool {
        self.tickets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample() -> SessionData {
        SessionData {
            version: TlsVersion::Tls13,
            cipher_suite: 0x1301,
            secret: Zeroizing::new(vec![0x5A; 32]),
            client_cert_chain: None,
            alpn: None,
            max_early_data: 0,
            issued_at: 0,
            lifetime: 7200,
            age_add: 1,
        }
    }

    #[test]
    fn noop_manager_forgets() {
        let m = NoSessionManager;
        assert!(m.establish(b"id", sample()).is_none());
        assert!(m.resume(b"id").is_none());
        assert!(!m.use_ticket());
    }

    #[test]
    fn memory_cache_round_trip() {
        let m = MemorySessionCache::new();
        assert!(m.establish(b"id", sample()).is_none());
        assert_eq!(m.resume(b"id").unwrap().cipher_suite, 0x1301);
        m.invalidate(b"id");
        assert!(m.resume(b"id").is_none());
    }

    #[test]
    fn resume_once_is_single_use() {
        let m = MemorySessionCache::new();
        m.establish(b"id", sample());
        assert!(m.resume_once(b"id").is_some());
        assert!(m.resume_once(b"id").is_none());
        assert!(m.resume(b"id").is_none());
    }

    #[test]
    fn ticket_mode_returns_ticket() {
        let m = MemorySessionCache::with_tickets();
        assert!(m.use_ticket());
        let ticket = m.establish(b"key", sample()).unwrap();
        assert!(m.resume(&ticket).is_some());
    }
}
