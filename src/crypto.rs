//! Long-term key pairs and stream-identity derivation.
//!
//! Peers are identified by Curve25519 static keys. After a handshake each
//! side additionally derives a 32-byte per-direction stream id from the
//! handshake transcript hash, namespaced so that the initiator and responder
//! directions never collide. The namespace constants are fixed for wire
//! compatibility.

use std::fmt;
use std::sync::OnceLock;

use blake2::digest::consts::U32;
use blake2::digest::{Digest, KeyInit, Mac};
use blake2::{Blake2b, Blake2bMac};
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of public keys, secret keys, hashes and stream ids.
pub const KEY_LEN: usize = 32;

/// Length of a derived stream id.
pub const ID_LEN: usize = 32;

type Blake2b256 = Blake2b<U32>;
type Blake2bMac256 = Blake2bMac<U32>;

/// The protocol namespace every stream id is derived under.
const NAMESPACE: &[u8] = b"hyperswarm/secret-stream";

/// A Curve25519 static key pair identifying one side of a session.
#[derive(Clone)]
pub struct Keypair {
    /// The public half, shared with peers during the handshake.
    pub public: [u8; KEY_LEN],
    /// The secret half. Never leaves this process.
    pub secret: [u8; KEY_LEN],
}

impl Keypair {
    /// Generate a fresh random key pair from the operating system RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_secret(secret)
    }

    /// Derive a key pair deterministically from a 32-byte seed.
    ///
    /// The seed is hashed before use so that callers can pass low-structure
    /// material; the result is clamped by the curve implementation.
    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        let digest = Sha256::digest(seed);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        Self::from_secret(StaticSecret::from(bytes))
    }

    /// Rebuild a key pair from a stored secret key.
    pub fn from_secret_bytes(secret: &[u8; KEY_LEN]) -> Self {
        Self::from_secret(StaticSecret::from(*secret))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The secret half stays out of logs.
        f.debug_struct("Keypair")
            .field("public", &hex(&self.public))
            .finish_non_exhaustive()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn namespace() -> &'static [u8; 32] {
    static NS: OnceLock<[u8; 32]> = OnceLock::new();
    NS.get_or_init(|| Blake2b256::digest(NAMESPACE).into())
}

fn ns_initiator() -> &'static [u8; 32] {
    static NS_I: OnceLock<[u8; 32]> = OnceLock::new();
    NS_I.get_or_init(|| {
        let mut h = Blake2b256::new();
        h.update([0x00]);
        h.update(namespace());
        h.finalize().into()
    })
}

fn ns_responder() -> &'static [u8; 32] {
    static NS_R: OnceLock<[u8; 32]> = OnceLock::new();
    NS_R.get_or_init(|| {
        let mut h = Blake2b256::new();
        h.update([0x01]);
        h.update(namespace());
        h.finalize().into()
    })
}

/// Derive the 32-byte stream id for one direction of a session.
///
/// The id is a keyed BLAKE2b-256 of the role namespace under the handshake
/// hash. Each side sends `stream_id(hash, is_initiator)` for its own role
/// and expects `stream_id(hash, !is_initiator)` from its peer, so the same
/// derivation doubles as header validation and as a routing tag for higher
/// layers.
pub fn stream_id(handshake_hash: &[u8], is_initiator: bool) -> [u8; ID_LEN] {
    let ns = if is_initiator {
        ns_initiator()
    } else {
        ns_responder()
    };
    let mut mac = <Blake2bMac256 as KeyInit>::new_from_slice(handshake_hash)
        .expect("handshake hash is a valid blake2b key");
    Mac::update(&mut mac, ns);
    mac.finalize().into_bytes().into()
}
