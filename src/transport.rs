//! Transport abstraction for the byte pipe under a session.
//!
//! A transport is any ordered bidirectional byte pipe: a TCP socket, a
//! framed conduit, or the in-memory [`crate::bridge`] pair. The session only
//! needs the outbound half of the pipe as a trait object; inbound signals
//! travel the other way, as explicit observer calls on the session
//! (`handle_data`, `handle_end`, `handle_drain`, `handle_error`,
//! `handle_close`), made by whatever task drives the transport's I/O.
//!
//! The session borrows the transport: it forwards its own teardown cause via
//! `destroy` and requests graceful finalisation via `end`, but never closes
//! the pipe beyond that.

use crate::error::Error;

/// Outbound half of the transport contract.
pub trait Transport: Send {
    /// Queue bytes for the wire.
    ///
    /// Returns `false` when the transport's buffer is above its high-water
    /// mark; the session then stops pushing until `handle_drain` is
    /// signalled. Bytes handed over are never dropped either way.
    fn write(&mut self, bytes: &[u8]) -> bool;

    /// Gracefully finish the outbound direction.
    fn end(&mut self);

    /// Tear the transport down, forwarding the session's cause if any.
    fn destroy(&mut self, error: Option<Error>);

    /// Stop delivering inbound data. Best effort.
    fn pause(&mut self) {}

    /// Resume inbound delivery after a `pause`.
    fn resume(&mut self) {}

    /// Hint how many more bytes the frame currently being reassembled still
    /// needs. Transports capable of flow sizing may use this; others ignore
    /// it.
    fn set_content_size(&mut self, _remaining: usize) {}
}
