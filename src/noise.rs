//! Noise handshake driver.
//!
//! Wraps a `snow` handshake state and sequences it over the frame codec: the
//! initiator emits the first message, each inbound message is fed through a
//! read step, and whenever the pattern then calls for a write step the
//! driver performs it immediately and hands back the produced frame. When
//! the handshake completes the driver surfaces the derived directional keys,
//! the transcript hash and the peer's static key in one bundle.
//!
//! The default pattern is `XX`:
//!
//! ```text
//! -> e
//! <- e, ee, s, es
//! -> s, se
//! ```
//!
//! The prologue is always empty; callers that need to bind extra context do
//! so through the pattern choice.

use std::fmt;

use snow::params::NoiseParams;
use snow::{Builder, HandshakeState};

use crate::crypto::{Keypair, KEY_LEN};
use crate::error::{Error, Result};
use crate::framing;

/// The Noise pattern used when the caller does not pick one.
pub const DEFAULT_PATTERN: &str = "XX";

/// Maximum size of a single Noise message.
const MAX_MESSAGE_LEN: usize = 65535;

/// Everything a completed handshake produced.
#[derive(Clone)]
pub struct HandshakeResult {
    /// Our static public key.
    pub public_key: [u8; KEY_LEN],
    /// The peer's static public key, learned or confirmed by the handshake.
    pub remote_public_key: [u8; KEY_LEN],
    /// The 32-byte handshake transcript hash.
    pub hash: [u8; KEY_LEN],
    /// Key for the sending direction.
    pub tx: [u8; KEY_LEN],
    /// Key for the receiving direction.
    pub rx: [u8; KEY_LEN],
}

impl fmt::Debug for HandshakeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // tx/rx are live key material and stay out of logs.
        f.debug_struct("HandshakeResult")
            .field("remote_public_key", &self.remote_public_key)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// Outcome of one driver step.
pub struct HandshakeOutput {
    /// A frame-wrapped Noise message ready for the wire, if the step
    /// produced one.
    pub frame: Option<Vec<u8>>,
    /// Set when this step completed the handshake.
    pub result: Option<HandshakeResult>,
}

/// Drives one side of a Noise handshake.
#[derive(Debug)]
pub struct Handshake {
    state: Option<HandshakeState>,
    local_public: [u8; KEY_LEN],
    buf: Vec<u8>,
}

impl Handshake {
    /// Build a driver for the given role, static key pair and pattern.
    ///
    /// `remote_public_key` is passed to the Noise state for patterns that
    /// pre-share the responder static; for `XX` the peer's key is learned
    /// during the handshake and checked by the caller afterwards.
    pub fn new(
        is_initiator: bool,
        keypair: &Keypair,
        remote_public_key: Option<[u8; KEY_LEN]>,
        pattern: &str,
    ) -> Result<Self> {
        let name = format!("Noise_{pattern}_25519_ChaChaPoly_BLAKE2b");
        let params: NoiseParams = name
            .parse()
            .map_err(|_| Error::Pattern(pattern.to_string()))?;

        let mut builder = Builder::new(params)
            .local_private_key(&keypair.secret)
            .prologue(&[]);
        if pattern != "XX" {
            if let Some(remote) = remote_public_key.as_ref() {
                builder = builder.remote_public_key(remote);
            }
        }

        let state = if is_initiator {
            builder.build_initiator()?
        } else {
            builder.build_responder()?
        };

        Ok(Self {
            state: Some(state),
            local_public: keypair.public,
            buf: vec![0u8; MAX_MESSAGE_LEN],
        })
    }

    /// Whether the driver has been poisoned by a failure or consumed by
    /// completion.
    pub fn is_finished(&self) -> bool {
        self.state.is_none()
    }

    /// Run one Noise write step and frame the produced message.
    pub fn send(&mut self) -> Result<HandshakeOutput> {
        let written = match self.state.as_mut() {
            Some(state) => state.write_message(&[], &mut self.buf),
            None => return Err(Error::Handshake),
        };
        let len = match written {
            Ok(len) => len,
            Err(_) => {
                self.state = None;
                return Err(Error::Handshake);
            }
        };
        let frame = framing::frame(&self.buf[..len]);

        let finished = self
            .state
            .as_ref()
            .map_or(false, |s| s.is_handshake_finished());
        let result = if finished { Some(self.finish()?) } else { None };
        Ok(HandshakeOutput {
            frame: Some(frame),
            result,
        })
    }

    /// Run one Noise read step on an unframed payload.
    ///
    /// When the pattern calls for a reply, the follow-up write step runs
    /// internally and its frame is returned.
    pub fn recv(&mut self, payload: &[u8]) -> Result<HandshakeOutput> {
        let read = match self.state.as_mut() {
            Some(state) => state.read_message(payload, &mut self.buf),
            None => return Err(Error::Handshake),
        };
        if read.is_err() {
            self.state = None;
            return Err(Error::Handshake);
        }

        let finished = self
            .state
            .as_ref()
            .map_or(false, |s| s.is_handshake_finished());
        if finished {
            let result = self.finish()?;
            return Ok(HandshakeOutput {
                frame: None,
                result: Some(result),
            });
        }

        // Noise messages strictly alternate, so an unfinished read step
        // always hands the turn to us.
        self.send()
    }

    fn finish(&mut self) -> Result<HandshakeResult> {
        let local_public = self.local_public;
        let state = self.state.as_mut().ok_or(Error::Handshake)?;

        let hash: [u8; KEY_LEN] = state
            .get_handshake_hash()
            .try_into()
            .map_err(|_| Error::Handshake)?;
        let remote_public_key: [u8; KEY_LEN] = state
            .get_remote_static()
            .ok_or(Error::Handshake)?
            .try_into()
            .map_err(|_| Error::Handshake)?;
        let (tx, rx) = state.dangerously_get_raw_split();
        self.state = None;

        Ok(HandshakeResult {
            public_key: local_public,
            remote_public_key,
            hash,
            tx,
            rx,
        })
    }
}
