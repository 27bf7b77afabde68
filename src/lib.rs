//! # Secret Stream
//!
//! An end-to-end encrypted duplex byte stream: a Noise-based authenticated
//! key exchange layered with a symmetric authenticated stream cipher over
//! any ordered byte transport: TCP, a framed conduit, or the built-in
//! in-memory bridge.
//!
//! Peers are identified by long-term Curve25519 public keys. After a
//! successful handshake each side knows the other's public key, a shared
//! handshake transcript hash, and two directional symmetric keys used to
//! encrypt and authenticate a stream of length-prefixed frames.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Application Bytes              │
//! ├─────────────────────────────────────────┤
//! │       Stream Encryption (Push/Pull)     │  XChaCha20-Poly1305
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  u24 LE length prefix
//! ├─────────────────────────────────────────┤
//! │    Transport (TCP / conduit / bridge)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use secret_stream::{Options, SecretStream};
//!
//! // Two sessions over in-memory bridges, wired back to back.
//! let mut a = SecretStream::new_initiator(None, Options::default()).unwrap();
//! let mut b = SecretStream::new_responder(None, Options::default()).unwrap();
//! let ra = a.raw_stream().unwrap();
//! let rb = b.raw_stream().unwrap();
//!
//! a.write(b"hello encrypted world").unwrap();
//!
//! let mut received = None;
//! while received.is_none() {
//!     while let Some(chunk) = ra.read() {
//!         rb.write(&chunk);
//!     }
//!     while let Some(chunk) = rb.read() {
//!         ra.write(&chunk);
//!     }
//!     while a.poll_event().is_some() {}
//!     while let Some(event) = b.poll_event() {
//!         if let secret_stream::Event::Data(plaintext) = event {
//!             received = Some(plaintext);
//!         }
//!     }
//! }
//! assert_eq!(received.unwrap(), b"hello encrypted world");
//! ```
//!
//! ## Modules
//!
//! - [`session`]: the duplex session gluing everything together
//! - [`framing`]: length-prefixed frame parser and encoder
//! - [`noise`]: Noise handshake driver
//! - [`cipher`]: post-handshake stream cipher pair
//! - [`crypto`]: key pairs and stream-identity derivation
//! - [`bridge`]: in-memory loopback transport
//! - [`transport`]: the contract any attached transport fulfils
//! - [`error`]: error types

pub mod bridge;
pub mod cipher;
pub mod crypto;
pub mod error;
pub mod framing;
pub mod noise;
pub mod session;
pub mod transport;

pub use bridge::RawStream;
pub use cipher::{Pull, Push, HEADER_LEN, MAC_LEN, OVERHEAD};
pub use crypto::{stream_id, Keypair, ID_LEN, KEY_LEN};
pub use error::{Error, Result};
pub use framing::{frame, FrameParser, MAX_FRAME_LEN};
pub use noise::{Handshake, HandshakeOutput, HandshakeResult, DEFAULT_PATTERN};
pub use session::{
    Event, Options, Phase, SecretStream, SessionKeys, StartOptions, WriteAlloc, MAX_PLAINTEXT,
};
pub use transport::Transport;
