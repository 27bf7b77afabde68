//! Duplex session tying the codec, handshake and cipher layers together.
//!
//! A [`SecretStream`] converts an ordered byte transport into an encrypted,
//! authenticated duplex byte stream. The session starts in the Handshaking
//! phase, where inbound frames feed the Noise driver; once both sides are
//! keyed each sends a one-time header frame binding the connection to a
//! stream identity, and from then on every application write becomes exactly
//! one sealed data frame.
//!
//! ```text
//! Handshaking ──> AwaitingHeader ──> Established
//!      │                │                 │
//!      └────────────────┴────────> Closed <┘
//! ```
//!
//! Events are delivered through a single ordered queue drained with
//! [`SecretStream::poll_event`]: `Handshake` fires once when keys are
//! derived, `Open` (and its synonym `Connect`) once the session can carry
//! plaintext, then `Data` per inbound frame, with `End`, `Close` and `Error`
//! closing the sequence. `Open` always precedes the first `Data`.
//!
//! Application writes issued before `Open` are held in the session's own
//! write queue and flushed after the header frame is on the wire, so the
//! header is always the first thing the keyed side sends.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::bridge::{self, Control, RawStream};
use crate::cipher::{Pull, Push, HEADER_LEN, OVERHEAD};
use crate::crypto::{self, Keypair, ID_LEN, KEY_LEN};
use crate::error::{Error, Result};
use crate::framing::{self, FrameParser, LEN_BYTES, MAX_FRAME_LEN};
use crate::noise::{Handshake, HandshakeResult, DEFAULT_PATTERN};
use crate::transport::Transport;

/// Largest plaintext that fits a single data frame.
pub const MAX_PLAINTEXT: usize = MAX_FRAME_LEN - OVERHEAD;

/// Queued events above which the transport is paused.
const EVENT_HIGH_WATER: usize = 64;

/// Queued events at or below which a paused transport is resumed.
const EVENT_LOW_WATER: usize = 16;

/// Session phase. Monotonic, except that `Closed` absorbs every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Noise messages are being exchanged; only the handshake driver
    /// consumes frames.
    Handshaking,
    /// Keyed and header sent; the peer's header frame is the next expected
    /// inbound frame.
    AwaitingHeader,
    /// Both directions keyed and armed; frames carry application data.
    Established,
    /// Torn down. Terminal.
    Closed,
}

/// Events surfaced by a session, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Keys derived; fires once, never later than `Open`.
    Handshake,
    /// Ready to carry plaintext in both directions. Fires once.
    Open,
    /// Synonym of `Open`, queued immediately after it.
    Connect,
    /// One decrypted inbound frame. Boundaries match the peer's writes.
    Data(Vec<u8>),
    /// The inbound direction finished.
    End,
    /// The session is gone. Always the final event.
    Close,
    /// Fatal failure; followed by `Close`.
    Error(Error),
}

/// Construction options.
pub struct Options {
    /// Long-term key pair. Generated when not provided.
    pub keypair: Option<Keypair>,
    /// Pin the peer's static key; the handshake fails on mismatch.
    pub remote_public_key: Option<[u8; KEY_LEN]>,
    /// Noise pattern. Defaults to `XX`.
    pub pattern: Option<String>,
    /// Start immediately. When `false`, `start` must be called later.
    /// Defaults to `true`.
    pub auto_start: bool,
    /// Pre-computed handshake, bypassing the Noise driver entirely.
    pub handshake: Option<SessionKeys>,
    /// Transport bytes buffered before the session existed, replayed through
    /// the inbound path on start.
    pub data: Option<Vec<u8>>,
    /// Signal inbound end-of-input right after `data`.
    pub ended: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            keypair: None,
            remote_public_key: None,
            pattern: None,
            auto_start: true,
            handshake: None,
            data: None,
            ended: false,
        }
    }
}

/// Options for a deferred `start`.
#[derive(Default)]
pub struct StartOptions {
    /// Pre-computed handshake, bypassing the Noise driver entirely.
    pub handshake: Option<SessionKeys>,
    /// Buffered transport bytes replayed through the inbound path.
    pub data: Option<Vec<u8>>,
    /// Signal inbound end-of-input right after `data`.
    pub ended: bool,
}

/// A pre-computed handshake: everything a completed Noise exchange would
/// have produced, supplied by a caller that ran the handshake elsewhere.
///
/// Sessions keyed this way never construct a Noise driver.
#[derive(Clone)]
pub struct SessionKeys {
    /// This side's public key.
    pub public_key: [u8; KEY_LEN],
    /// The peer's public key.
    pub remote_public_key: [u8; KEY_LEN],
    /// The handshake transcript hash.
    pub hash: [u8; KEY_LEN],
    /// Key for the sending direction.
    pub tx: [u8; KEY_LEN],
    /// Key for the receiving direction.
    pub rx: [u8; KEY_LEN],
}

impl From<HandshakeResult> for SessionKeys {
    fn from(result: HandshakeResult) -> Self {
        Self {
            public_key: result.public_key,
            remote_public_key: result.remote_public_key,
            hash: result.hash,
            tx: result.tx,
            rx: result.rx,
        }
    }
}

/// A wire buffer reserved by [`SecretStream::alloc`].
///
/// The caller fills the plaintext window in place and hands the token back
/// to [`SecretStream::write_alloc`], which seals it without copying the
/// plaintext again.
pub struct WriteAlloc {
    buf: Vec<u8>,
}

impl WriteAlloc {
    fn new(len: usize) -> Self {
        Self {
            buf: framing::alloc_frame(OVERHEAD + len),
        }
    }

    /// The writable plaintext window.
    pub fn plaintext_mut(&mut self) -> &mut [u8] {
        let end = self.buf.len() - (OVERHEAD - 1);
        &mut self.buf[LEN_BYTES + 1..end]
    }

    /// Plaintext capacity of this buffer.
    pub fn len(&self) -> usize {
        self.buf.len() - LEN_BYTES - OVERHEAD
    }

    /// Whether the plaintext window is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn plaintext(&self) -> &[u8] {
        let end = self.buf.len() - (OVERHEAD - 1);
        &self.buf[LEN_BYTES + 1..end]
    }
}

/// An end-to-end encrypted duplex byte stream over an arbitrary ordered
/// transport.
pub struct SecretStream {
    is_initiator: bool,
    keypair: Keypair,
    public_key: [u8; KEY_LEN],
    remote_public_key: Option<[u8; KEY_LEN]>,
    expected_remote: Option<[u8; KEY_LEN]>,
    handshake_hash: Option<[u8; KEY_LEN]>,
    pattern: String,

    phase: Phase,
    handshake: Option<Handshake>,
    encryptor: Option<Push>,
    decryptor: Option<Pull>,
    parser: FrameParser,

    transport: Option<Box<dyn Transport>>,
    bridge: Option<Control>,
    raw: Option<RawStream>,

    events: VecDeque<Event>,
    pending: VecDeque<Vec<u8>>,

    started: bool,
    opened: bool,
    local_ended: bool,
    remote_ended: bool,
    end_emitted: bool,
    destroyed: bool,
    draining: bool,
    paused: bool,
}

impl SecretStream {
    /// Create a session for the given role.
    ///
    /// With the default options the session starts immediately: a missing
    /// `transport` creates an in-memory bridge whose outer side is available
    /// through [`SecretStream::raw_stream`], and an initiator emits its
    /// first handshake message right away.
    pub fn new(
        is_initiator: bool,
        transport: Option<Box<dyn Transport>>,
        options: Options,
    ) -> Result<Self> {
        let keypair = options.keypair.unwrap_or_else(Keypair::generate);
        let mut session = Self {
            is_initiator,
            public_key: keypair.public,
            keypair,
            remote_public_key: None,
            expected_remote: options.remote_public_key,
            handshake_hash: None,
            pattern: options
                .pattern
                .unwrap_or_else(|| DEFAULT_PATTERN.to_string()),
            phase: Phase::Handshaking,
            handshake: None,
            encryptor: None,
            decryptor: None,
            parser: FrameParser::new(),
            transport: None,
            bridge: None,
            raw: None,
            events: VecDeque::new(),
            pending: VecDeque::new(),
            started: false,
            opened: false,
            local_ended: false,
            remote_ended: false,
            end_emitted: false,
            destroyed: false,
            draining: false,
            paused: false,
        };

        if options.auto_start {
            session.start(
                transport,
                StartOptions {
                    handshake: options.handshake,
                    data: options.data,
                    ended: options.ended,
                },
            )?;
        } else if let Some(t) = transport {
            session.transport = Some(t);
        }
        Ok(session)
    }

    /// Shorthand for `new(true, ..)`.
    pub fn new_initiator(
        transport: Option<Box<dyn Transport>>,
        options: Options,
    ) -> Result<Self> {
        Self::new(true, transport, options)
    }

    /// Shorthand for `new(false, ..)`.
    pub fn new_responder(
        transport: Option<Box<dyn Transport>>,
        options: Options,
    ) -> Result<Self> {
        Self::new(false, transport, options)
    }

    /// Attach the transport and begin. Valid exactly once.
    ///
    /// A deferred session that buffered transport bytes before starting
    /// passes them as `options.data`; they run through the inbound path
    /// in order, before anything the transport delivers afterwards.
    pub fn start(
        &mut self,
        transport: Option<Box<dyn Transport>>,
        options: StartOptions,
    ) -> Result<()> {
        if self.destroyed {
            return Err(Error::Destroyed);
        }
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        self.started = true;

        if let Some(t) = transport {
            self.transport = Some(t);
        }
        if self.transport.is_none() {
            let (endpoint, control, raw) = bridge::bridge();
            self.transport = Some(Box::new(endpoint));
            self.bridge = Some(control);
            self.raw = Some(raw);
        }

        match options.handshake {
            Some(keys) => {
                self.on_keys(keys)?;
            }
            None => {
                let driver = Handshake::new(
                    self.is_initiator,
                    &self.keypair,
                    self.expected_remote,
                    &self.pattern,
                )
                .map_err(|e| {
                    self.fatal(e.clone());
                    e
                })?;
                self.handshake = Some(driver);

                if self.is_initiator {
                    let step = match self.handshake.as_mut() {
                        Some(driver) => driver.send(),
                        None => return Err(Error::Handshake),
                    };
                    match step {
                        Ok(out) => {
                            if let Some(frame) = out.frame {
                                self.transport_write(&frame);
                            }
                        }
                        Err(e) => {
                            self.fatal(e.clone());
                            return Err(e);
                        }
                    }
                }
            }
        }

        if let Some(data) = options.data {
            self.handle_data(&data);
        }
        if options.ended {
            self.handle_end();
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------------

    /// Write application bytes; one call becomes exactly one frame on the
    /// peer.
    ///
    /// Writes issued before the session is open are queued and flushed after
    /// the header frame, preserving order. Returns `false` when the
    /// transport asked for backpressure; the bytes are still delivered.
    pub fn write(&mut self, data: &[u8]) -> Result<bool> {
        self.check_writable(data.len())?;
        if !self.opened {
            self.pending.push_back(data.to_vec());
            return Ok(true);
        }
        self.write_frame(data)
    }

    /// Reserve a wire buffer for `len` plaintext bytes.
    ///
    /// Fill [`WriteAlloc::plaintext_mut`] and pass the token to
    /// [`SecretStream::write_alloc`]; the plaintext is encrypted where it
    /// sits, with no extra copy.
    pub fn alloc(&self, len: usize) -> WriteAlloc {
        WriteAlloc::new(len)
    }

    /// Write a buffer previously reserved with [`SecretStream::alloc`].
    pub fn write_alloc(&mut self, alloc: WriteAlloc) -> Result<bool> {
        self.check_writable(alloc.len())?;
        if !self.opened {
            self.pending.push_back(alloc.plaintext().to_vec());
            return Ok(true);
        }
        self.send_alloc(alloc)
    }

    fn check_writable(&self, len: usize) -> Result<()> {
        if self.destroyed {
            return Err(Error::Destroyed);
        }
        if self.local_ended {
            return Err(Error::WriteAfterEnd);
        }
        if len > MAX_PLAINTEXT {
            return Err(Error::Encryption(
                "plaintext exceeds maximum frame size".into(),
            ));
        }
        Ok(())
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<bool> {
        let mut alloc = WriteAlloc::new(data.len());
        alloc.plaintext_mut().copy_from_slice(data);
        self.send_alloc(alloc)
    }

    fn send_alloc(&mut self, alloc: WriteAlloc) -> Result<bool> {
        let mut buf = alloc.buf;
        match self.encryptor.as_mut() {
            Some(push) => push.seal_in_place(&mut buf[LEN_BYTES..])?,
            None => return Err(Error::Destroyed),
        }
        Ok(self.transport_write(&buf))
    }

    fn flush_pending(&mut self) {
        while let Some(data) = self.pending.pop_front() {
            if self.destroyed {
                return;
            }
            if let Err(e) = self.write_frame(&data) {
                self.fatal(e);
                return;
            }
        }
        if self.local_ended {
            if let Some(t) = self.transport.as_mut() {
                t.end();
            }
        }
    }

    /// Hand bytes to the transport. Returns `false` while the transport is
    /// above its high-water mark; the latch clears on `handle_drain`.
    fn transport_write(&mut self, bytes: &[u8]) -> bool {
        let drained = match self.transport.as_mut() {
            Some(t) => t.write(bytes),
            None => return false,
        };
        if !drained {
            trace!("transport above high water, awaiting drain");
            self.draining = true;
        }
        !self.draining
    }

    // ---------------------------------------------------------------------
    // Read path: transport observers
    // ---------------------------------------------------------------------

    /// Inbound transport bytes. Call from the transport's data observer.
    pub fn handle_data(&mut self, chunk: &[u8]) {
        if self.destroyed {
            return;
        }
        trace!(len = chunk.len(), "inbound chunk");
        let frames = self.parser.feed(chunk);
        for payload in frames {
            if self.destroyed {
                return;
            }
            self.dispatch(payload.as_ref());
        }
        if self.destroyed {
            return;
        }
        if let Some(remaining) = self.parser.remaining() {
            if let Some(t) = self.transport.as_mut() {
                t.set_content_size(remaining);
            }
        }
    }

    /// Inbound end-of-input. Call from the transport's end observer.
    pub fn handle_end(&mut self) {
        if self.destroyed || self.remote_ended {
            return;
        }
        self.remote_ended = true;
        match self.phase {
            Phase::Established => {
                if !self.end_emitted {
                    self.end_emitted = true;
                    self.emit(Event::End);
                }
                self.maybe_close();
            }
            Phase::Closed => {}
            _ => {
                // End of input before the session is keyed: the handshake
                // can no longer complete. Treated as a clean close.
                self.teardown(None);
            }
        }
    }

    /// The transport drained its buffer. Call from the drain observer.
    pub fn handle_drain(&mut self) {
        self.draining = false;
    }

    /// The transport failed. Tears the session down with the same cause.
    pub fn handle_error(&mut self, error: Error) {
        self.teardown(Some(error));
    }

    /// The transport closed cleanly. A quiet close, not an error.
    pub fn handle_close(&mut self) {
        self.teardown(None);
    }

    fn dispatch(&mut self, payload: &[u8]) {
        match self.phase {
            Phase::Handshaking => self.on_handshake_frame(payload),
            Phase::AwaitingHeader => self.on_header_frame(payload),
            Phase::Established => self.on_data_frame(payload),
            Phase::Closed => {}
        }
    }

    fn on_handshake_frame(&mut self, payload: &[u8]) {
        let step = match self.handshake.as_mut() {
            Some(driver) => driver.recv(payload),
            None => return,
        };
        match step {
            Ok(out) => {
                // A step can both reply and complete; the reply goes on the
                // wire before the header frame.
                if let Some(frame) = out.frame {
                    self.transport_write(&frame);
                }
                if let Some(result) = out.result {
                    let _ = self.on_keys(result.into());
                }
            }
            Err(e) => self.fatal(e),
        }
    }

    fn on_header_frame(&mut self, payload: &[u8]) {
        let hash = match self.handshake_hash {
            Some(hash) => hash,
            None => {
                self.fatal(Error::InvalidHeader);
                return;
            }
        };
        if payload.len() != ID_LEN + HEADER_LEN {
            self.fatal(Error::InvalidHeaderMessage);
            return;
        }
        let expected = crypto::stream_id(&hash, !self.is_initiator);
        if payload[..ID_LEN] != expected {
            self.fatal(Error::InvalidHeader);
            return;
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&payload[ID_LEN..]);
        match self.decryptor.as_mut() {
            Some(pull) => pull.init(header),
            None => {
                self.fatal(Error::InvalidHeader);
                return;
            }
        }
        self.phase = Phase::Established;
        debug!("secure channel established");
    }

    fn on_data_frame(&mut self, payload: &[u8]) {
        let plaintext = match self.decryptor.as_mut() {
            Some(pull) => pull.open(payload),
            None => return,
        };
        match plaintext {
            Ok(data) => self.push_data(data),
            Err(e) => self.fatal(e),
        }
    }

    fn push_data(&mut self, data: Vec<u8>) {
        self.emit(Event::Data(data));
        if !self.paused && self.events.len() >= EVENT_HIGH_WATER {
            self.paused = true;
            if let Some(t) = self.transport.as_mut() {
                t.pause();
            }
        }
    }

    // ---------------------------------------------------------------------
    // Keying
    // ---------------------------------------------------------------------

    /// Shared tail of handshake completion and pre-keyed injection: set up
    /// both cipher halves, put the header frame on the wire before anything
    /// else, then open the session and flush queued writes.
    fn on_keys(&mut self, keys: SessionKeys) -> Result<()> {
        if let Some(expected) = self.expected_remote {
            if expected != keys.remote_public_key {
                self.fatal(Error::Handshake);
                return Err(Error::Handshake);
            }
        }

        self.handshake = None;
        self.public_key = keys.public_key;
        self.remote_public_key = Some(keys.remote_public_key);
        self.handshake_hash = Some(keys.hash);

        let push = Push::new(&keys.tx);
        let mut header = framing::alloc_frame(ID_LEN + HEADER_LEN);
        let id = crypto::stream_id(&keys.hash, self.is_initiator);
        header[LEN_BYTES..LEN_BYTES + ID_LEN].copy_from_slice(&id);
        header[LEN_BYTES + ID_LEN..].copy_from_slice(push.header());
        self.encryptor = Some(push);
        self.decryptor = Some(Pull::new(&keys.rx));
        self.phase = Phase::AwaitingHeader;

        debug!(initiator = self.is_initiator, "handshake complete");
        // Keys are derived: the handshake event fires first, then the header
        // frame goes on the wire.
        if let Some(bridge) = &self.bridge {
            bridge.mark_handshake();
        }
        self.emit(Event::Handshake);
        self.transport_write(&header);

        self.opened = true;
        self.emit(Event::Open);
        self.emit(Event::Connect);
        self.flush_pending();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Finish the outbound direction. Maps to a transport-level end; the
    /// protocol has no cryptographic close frame.
    pub fn end(&mut self) {
        if self.destroyed || self.local_ended {
            return;
        }
        self.local_ended = true;
        // Pre-open writes are still queued; the transport end follows the
        // flush in that case.
        if self.opened {
            if let Some(t) = self.transport.as_mut() {
                t.end();
            }
        }
        self.maybe_close();
    }

    /// Tear the session down, forwarding `error` to the transport.
    /// Idempotent, and valid before a transport was ever attached.
    pub fn destroy(&mut self, error: Option<Error>) {
        self.teardown(error);
    }

    fn maybe_close(&mut self) {
        if self.local_ended && self.remote_ended && !self.destroyed {
            self.teardown(None);
        }
    }

    fn fatal(&mut self, error: Error) {
        self.teardown(Some(error));
    }

    fn teardown(&mut self, error: Option<Error>) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.phase = Phase::Closed;
        self.pending.clear();
        self.handshake = None;

        match &error {
            Some(e) => {
                warn!(error = %e, "destroying session");
                self.emit(Event::Error(e.clone()));
            }
            None => {
                debug!("closing session");
                if !self.end_emitted {
                    self.end_emitted = true;
                    self.emit(Event::End);
                }
            }
        }
        self.emit(Event::Close);

        if let Some(mut t) = self.transport.take() {
            t.destroy(error);
        }
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Drain the next session event, if any.
    ///
    /// For bridge-backed sessions this also processes bytes the outer side
    /// wrote since the last poll, so `None` means the session is fully
    /// caught up.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.pump_bridge();
        let event = self.events.pop_front();
        if self.paused && self.events.len() <= EVENT_LOW_WATER {
            self.paused = false;
            if let Some(t) = self.transport.as_mut() {
                t.resume();
            }
        }
        event
    }

    fn pump_bridge(&mut self) {
        if self.bridge.is_none() {
            return;
        }
        loop {
            if self.destroyed || self.paused {
                break;
            }
            let chunk = match &self.bridge {
                Some(control) => control.pop_inbound(),
                None => None,
            };
            let Some(chunk) = chunk else { break };
            self.handle_data(&chunk);
        }
        if self.destroyed {
            return;
        }

        let teardown = match &self.bridge {
            Some(control) => control.take_teardown(),
            None => None,
        };
        if let Some(cause) = teardown {
            match cause {
                Some(error) => self.handle_error(error),
                None => self.handle_close(),
            }
            return;
        }

        let ended = match &self.bridge {
            Some(control) => control.take_end(),
            None => false,
        };
        if ended {
            self.handle_end();
        }
    }

    fn emit(&mut self, event: Event) {
        self.events.push_back(event);
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Role fixed at construction.
    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    /// This side's static public key.
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public_key
    }

    /// The peer's static public key, once the handshake learned it.
    pub fn remote_public_key(&self) -> Option<[u8; KEY_LEN]> {
        self.remote_public_key
    }

    /// The handshake transcript hash, once keyed.
    pub fn handshake_hash(&self) -> Option<[u8; KEY_LEN]> {
        self.handshake_hash
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the session has been torn down.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// The outer side of the in-memory bridge, for sessions started without
    /// a transport.
    pub fn raw_stream(&self) -> Option<RawStream> {
        self.raw.clone()
    }

    /// Generate a long-term key pair, optionally from a seed.
    pub fn keypair(seed: Option<&[u8; KEY_LEN]>) -> Keypair {
        match seed {
            Some(seed) => Keypair::from_seed(seed),
            None => Keypair::generate(),
        }
    }

    /// The stream-id derivation used during header validation, exposed so
    /// higher layers can pre-bind stream identity for routing.
    pub fn id(handshake_hash: &[u8], is_initiator: bool) -> [u8; ID_LEN] {
        crypto::stream_id(handshake_hash, is_initiator)
    }
}
