//! Authenticated stream cipher pair for the post-handshake phase.
//!
//! Each direction of a session is keyed independently: the sending side
//! holds a [`Push`] half, the receiving side a [`Pull`] half seeded with the
//! 24-byte header the Push half emitted at construction. Every payload write
//! becomes exactly one sealed frame of shape `[tag][ciphertext][mac]`,
//! giving a fixed 17-byte overhead per frame.
//!
//! Frames are sealed in place inside the caller's wire buffer: the plaintext
//! occupies the middle of a `[tag][plaintext][mac]` region and the cipher
//! writes the tag byte and MAC into the reserved slots around it.
//!
//! Per-frame nonces combine the stream header with a little-endian frame
//! counter, so the two halves stay in lockstep as long as frames are
//! delivered in order, which the surrounding session guarantees.

use chacha20poly1305::aead::{Aead, AeadInPlace, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// Length of the stream header exchanged once per direction.
pub const HEADER_LEN: usize = 24;

/// Length of the per-frame authentication tag.
pub const MAC_LEN: usize = 16;

/// Total per-frame overhead: one tag byte plus the MAC.
pub const OVERHEAD: usize = 1 + MAC_LEN;

/// Symmetric key length for both halves.
pub const KEY_LEN: usize = 32;

/// Tag byte for an ordinary payload frame.
const TAG_MESSAGE: u8 = 0x00;

fn frame_nonce(header: &[u8; HEADER_LEN], counter: u64) -> XNonce {
    let mut nonce = *header;
    for (byte, ctr) in nonce[16..].iter_mut().zip(counter.to_le_bytes()) {
        *byte ^= ctr;
    }
    XNonce::from(nonce)
}

/// Encrypting half of a stream direction.
pub struct Push {
    aead: XChaCha20Poly1305,
    header: [u8; HEADER_LEN],
    counter: u64,
}

impl Push {
    /// Key the half and generate its stream header.
    ///
    /// The header must reach the peer's [`Pull`] half (the session carries
    /// it inside the one-time header frame) before any sealed frame can be
    /// opened.
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let mut header = [0u8; HEADER_LEN];
        OsRng.fill_bytes(&mut header);
        Self {
            aead: XChaCha20Poly1305::new(Key::from_slice(key)),
            header,
            counter: 0,
        }
    }

    /// The 24-byte header seeding the peer's decryptor.
    pub fn header(&self) -> &[u8; HEADER_LEN] {
        &self.header
    }

    /// Seal a frame in place.
    ///
    /// `frame` must be laid out as `[1 tag byte][plaintext][16 mac bytes]`;
    /// the plaintext window is encrypted where it sits and the surrounding
    /// slots are filled in.
    pub fn seal_in_place(&mut self, frame: &mut [u8]) -> Result<()> {
        if frame.len() < OVERHEAD {
            return Err(Error::Encryption(
                "frame buffer smaller than cipher overhead".into(),
            ));
        }
        frame[0] = TAG_MESSAGE;
        let nonce = frame_nonce(&self.header, self.counter);

        let body_len = frame.len() - MAC_LEN;
        let (body, mac_slot) = frame.split_at_mut(body_len);
        let mac = self
            .aead
            .encrypt_in_place_detached(&nonce, &[TAG_MESSAGE], &mut body[1..])
            .map_err(|e| Error::Encryption(e.to_string()))?;
        mac_slot.copy_from_slice(&mac);

        self.counter += 1;
        Ok(())
    }

    /// Seal a standalone frame, allocating the buffer.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut frame = vec![0u8; OVERHEAD + plaintext.len()];
        frame[1..1 + plaintext.len()].copy_from_slice(plaintext);
        self.seal_in_place(&mut frame)?;
        Ok(frame)
    }
}

/// Decrypting half of a stream direction.
///
/// Keyed at handshake completion but inert until [`Pull::init`] arms it with
/// the peer's stream header.
pub struct Pull {
    aead: XChaCha20Poly1305,
    header: Option<[u8; HEADER_LEN]>,
    counter: u64,
}

impl Pull {
    /// Key the half. It cannot open frames until `init` is called.
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(Key::from_slice(key)),
            header: None,
            counter: 0,
        }
    }

    /// Arm the half with the peer's stream header.
    pub fn init(&mut self, header: [u8; HEADER_LEN]) {
        self.header = Some(header);
    }

    /// Whether `init` has run.
    pub fn is_ready(&self) -> bool {
        self.header.is_some()
    }

    /// Open a sealed frame, returning the plaintext.
    pub fn open(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let header = self
            .header
            .ok_or_else(|| Error::Decryption("stream header not received".into()))?;
        if frame.len() < OVERHEAD {
            return Err(Error::Decryption(
                "frame shorter than cipher overhead".into(),
            ));
        }
        let nonce = frame_nonce(&header, self.counter);
        let plaintext = self
            .aead
            .decrypt(
                &nonce,
                Payload {
                    msg: &frame[1..],
                    aad: &frame[..1],
                },
            )
            .map_err(|e| Error::Decryption(e.to_string()))?;
        self.counter += 1;
        Ok(plaintext)
    }
}
