//! The byte-transport seam.

extern crate alloc;

use alloc::vec::Vec;

use crate::TlsError;

/// A full-duplex reliable byte stream supplied by the caller.
///
/// Methods take `&self`: the engine calls `send` under its write lock and
/// `recv` under its read lock, possibly concurrently, so implementations own
/// whatever interior mutability they need.
///
/// Any blocking the engine does happens inside these calls; the engine
/// imposes no timeouts of its own.
pub trait Backend: Send + Sync {
    /// Write all of `data` or fail.
    fn send(&self, data: &[u8]) -> Result<(), TlsError>;

    /// Block for at least one byte and return up to `max` bytes.
    /// An empty result means the peer half-closed the transport.
    fn recv(&self, max: usize) -> Result<Vec<u8>, TlsError>;

    /// Flush buffered writes, if the transport buffers.
    fn flush(&self) -> Result<(), TlsError> {
        Ok(())
    }

    /// Close the transport. Idempotent.
    fn close(&self) {}
}
