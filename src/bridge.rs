//! In-memory loopback transport.
//!
//! When a session is started without a transport it creates a bridge: a pair
//! of mirrored endpoints over shared queues. The inner endpoint becomes the
//! session's transport; the outer endpoint is handed to the caller as the
//! session's raw stream. Writing on the outer side surfaces as inbound bytes
//! on the session, session output surfaces as readable chunks on the outer
//! side, and `end`/`destroy` propagate in both directions.
//!
//! The shared state sits behind a mutex so the session stays `Send`, but the
//! model is still single-threaded cooperative: outer writes become visible
//! to the session the next time it is polled.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::transport::Transport;

/// Chunks buffered toward the user before the writable signal drops.
const HIGH_WATER_CHUNKS: usize = 64;

#[derive(Debug, Default)]
struct Shared {
    /// Chunks written by the outer side, waiting for the session.
    to_session: VecDeque<Vec<u8>>,
    /// Chunks written by the session, waiting for the outer side.
    to_user: VecDeque<Vec<u8>>,
    /// Outer side finished writing; the session sees end-of-input.
    user_ended: bool,
    /// Session finished writing; the outer side sees end-of-input.
    session_ended: bool,
    /// Set once by whichever side tears the bridge down first.
    destroyed: Option<Option<Error>>,
    /// The session consumed the teardown signal.
    teardown_seen: bool,
    /// The session consumed the outer side's end-of-input.
    end_seen: bool,
    /// Session asked the outer side to stop writing.
    paused: bool,
    /// Handshake completion, re-emitted on the outer side.
    handshake_done: bool,
}

/// Create a connected bridge: the session-side transport, its control
/// handle, and the user-facing raw stream.
pub(crate) fn bridge() -> (Endpoint, Control, RawStream) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    (
        Endpoint {
            shared: Arc::clone(&shared),
        },
        Control {
            shared: Arc::clone(&shared),
        },
        RawStream { shared },
    )
}

/// Session-side bridge endpoint, used as the session's transport.
pub(crate) struct Endpoint {
    shared: Arc<Mutex<Shared>>,
}

impl Transport for Endpoint {
    fn write(&mut self, bytes: &[u8]) -> bool {
        let mut shared = self.shared.lock().unwrap();
        if shared.destroyed.is_some() || shared.session_ended {
            return false;
        }
        shared.to_user.push_back(bytes.to_vec());
        shared.to_user.len() < HIGH_WATER_CHUNKS
    }

    fn end(&mut self) {
        self.shared.lock().unwrap().session_ended = true;
    }

    fn destroy(&mut self, error: Option<Error>) {
        let mut shared = self.shared.lock().unwrap();
        if shared.destroyed.is_none() {
            shared.destroyed = Some(error);
            // Our own teardown needs no echo back into the session.
            shared.teardown_seen = true;
        }
    }

    fn pause(&mut self) {
        self.shared.lock().unwrap().paused = true;
    }

    fn resume(&mut self) {
        self.shared.lock().unwrap().paused = false;
    }
}

/// Session-side control handle for draining inbound traffic and mirroring
/// session events onto the outer side.
pub(crate) struct Control {
    shared: Arc<Mutex<Shared>>,
}

impl Control {
    pub(crate) fn pop_inbound(&self) -> Option<Vec<u8>> {
        self.shared.lock().unwrap().to_session.pop_front()
    }

    /// The outer side's teardown, delivered once.
    pub(crate) fn take_teardown(&self) -> Option<Option<Error>> {
        let mut shared = self.shared.lock().unwrap();
        if shared.teardown_seen {
            return None;
        }
        match shared.destroyed.clone() {
            Some(cause) => {
                shared.teardown_seen = true;
                Some(cause)
            }
            None => None,
        }
    }

    /// The outer side's end-of-input, delivered once after its queued data.
    pub(crate) fn take_end(&self) -> bool {
        let mut shared = self.shared.lock().unwrap();
        if shared.user_ended && !shared.end_seen && shared.to_session.is_empty() {
            shared.end_seen = true;
            return true;
        }
        false
    }

    pub(crate) fn mark_handshake(&self) {
        self.shared.lock().unwrap().handshake_done = true;
    }
}

/// User-facing side of the bridge.
///
/// This is what `raw_stream()` returns for sessions that were not given a
/// transport: a pipe the caller can shovel bytes through, typically into the
/// matching pipe of a peer session or into a socket.
#[derive(Clone)]
pub struct RawStream {
    shared: Arc<Mutex<Shared>>,
}

impl RawStream {
    /// Write raw wire bytes toward the session.
    ///
    /// The bytes become visible the next time the session is polled.
    /// Returns `false` when the session has the stream paused or torn down,
    /// meaning the writer should back off; the bytes are still queued unless
    /// the bridge is destroyed.
    pub fn write(&self, bytes: &[u8]) -> bool {
        let mut shared = self.shared.lock().unwrap();
        if shared.destroyed.is_some() || shared.user_ended {
            return false;
        }
        shared.to_session.push_back(bytes.to_vec());
        !shared.paused
    }

    /// Read the next chunk of wire bytes the session produced.
    pub fn read(&self) -> Option<Vec<u8>> {
        self.shared.lock().unwrap().to_user.pop_front()
    }

    /// Signal that no more bytes will be written toward the session.
    pub fn end(&self) {
        self.shared.lock().unwrap().user_ended = true;
    }

    /// Tear the bridge down from the outer side.
    pub fn destroy(&self, error: Option<Error>) {
        let mut shared = self.shared.lock().unwrap();
        if shared.destroyed.is_none() {
            shared.destroyed = Some(error);
        }
    }

    /// Whether either side has torn the bridge down.
    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().unwrap().destroyed.is_some()
    }

    /// The teardown cause, once destroyed. `None` both before teardown and
    /// for a clean teardown.
    pub fn error(&self) -> Option<Error> {
        self.shared.lock().unwrap().destroyed.clone().flatten()
    }

    /// Whether the session finished its outbound direction and everything it
    /// wrote has been read.
    pub fn has_ended(&self) -> bool {
        let shared = self.shared.lock().unwrap();
        shared.session_ended && shared.to_user.is_empty()
    }

    /// The session's handshake completion, mirrored here so callers holding
    /// only the raw stream can observe it.
    pub fn handshake_complete(&self) -> bool {
        self.shared.lock().unwrap().handshake_done
    }
}
