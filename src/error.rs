//! Error types for the secret-stream crate.

use thiserror::Error;

/// Stream error type covering all possible failure modes.
///
/// Variants carry owned strings rather than source errors so that errors can
/// be cloned into the session event queue and forwarded to the transport at
/// the same time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // Handshake errors
    /// Any cryptographic failure while driving the Noise handshake: bad MAC,
    /// wrong pattern bytes, malformed DH element, or a remote static key that
    /// does not match the one the caller pinned.
    #[error("Noise handshake failed")]
    Handshake,

    /// The configured Noise pattern could not be parsed.
    #[error("unsupported noise pattern: {0}")]
    Pattern(String),

    // Header errors
    /// The first post-handshake frame did not have the expected 56-byte
    /// length.
    #[error("Invalid header message received")]
    InvalidHeaderMessage,

    /// The stream id carried by the peer's header frame did not match the
    /// value derived from the handshake hash.
    #[error("Invalid header received")]
    InvalidHeader,

    // Data-frame errors
    /// Encryption of an outbound frame failed, or the plaintext was too large
    /// to fit a single frame.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// A post-handshake frame was shorter than the AEAD overhead or failed
    /// authentication.
    #[error("decryption failed: {0}")]
    Decryption(String),

    // Lifecycle errors
    /// The session was torn down; pending operations complete with this.
    #[error("Stream destroyed")]
    Destroyed,

    /// `start` was called on a session that already has a transport.
    #[error("stream already started")]
    AlreadyStarted,

    /// `write` was called after `end`.
    #[error("write after end")]
    WriteAfterEnd,

    /// A failure reported by the underlying transport.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Result type alias for stream operations.
pub type Result<T> = std::result::Result<T, Error>;

// Any runtime failure inside the Noise state machine is fatal and surfaces
// with fixed wording.
impl From<snow::Error> for Error {
    fn from(_: snow::Error) -> Self {
        Error::Handshake
    }
}

impl From<chacha20poly1305::Error> for Error {
    fn from(err: chacha20poly1305::Error) -> Self {
        Error::Decryption(err.to_string())
    }
}
