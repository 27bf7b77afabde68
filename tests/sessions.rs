//! End-to-end tests for encrypted duplex sessions.
//!
//! These tests wire two bridge-backed sessions together and verify complete
//! flows:
//! - Mutual authentication over a loopback relay
//! - Ciphertext never leaking plaintext onto the wire
//! - Reassembly under pathological (one byte at a time) chunking
//! - Deferred start with a buffered head of transport bytes
//! - Fatal handling of garbage handshakes and headers
//! - Bulk streaming
//! - Teardown symmetry between a session and its transport

use rand::RngCore;

use secret_stream::{
    Error, Event, Keypair, Options, RawStream, SecretStream, SessionKeys, StartOptions,
};

/// Relay bytes between two bridge-backed sessions until neither side makes
/// progress.
///
/// `piece` limits the relayed chunk size; `Some(1)` delivers the wire one
/// byte at a time in both directions. Returns the events each session
/// emitted plus every wire byte seen in each direction.
fn relay(
    a: &mut SecretStream,
    b: &mut SecretStream,
    ra: &RawStream,
    rb: &RawStream,
    piece: Option<usize>,
) -> (Vec<Event>, Vec<Event>, Vec<u8>, Vec<u8>) {
    let mut a_events = Vec::new();
    let mut b_events = Vec::new();
    let mut a_wire = Vec::new();
    let mut b_wire = Vec::new();
    let mut a_end_relayed = false;
    let mut b_end_relayed = false;

    loop {
        let mut progressed = false;

        while let Some(chunk) = ra.read() {
            a_wire.extend_from_slice(&chunk);
            match piece {
                Some(n) => {
                    for part in chunk.chunks(n) {
                        rb.write(part);
                    }
                }
                None => {
                    rb.write(&chunk);
                }
            }
            progressed = true;
        }
        while let Some(chunk) = rb.read() {
            b_wire.extend_from_slice(&chunk);
            match piece {
                Some(n) => {
                    for part in chunk.chunks(n) {
                        ra.write(part);
                    }
                }
                None => {
                    ra.write(&chunk);
                }
            }
            progressed = true;
        }

        if !a_end_relayed && ra.has_ended() {
            rb.end();
            a_end_relayed = true;
            progressed = true;
        }
        if !b_end_relayed && rb.has_ended() {
            ra.end();
            b_end_relayed = true;
            progressed = true;
        }

        while let Some(event) = a.poll_event() {
            a_events.push(event);
            progressed = true;
        }
        while let Some(event) = b.poll_event() {
            b_events.push(event);
            progressed = true;
        }

        if !progressed {
            return (a_events, b_events, a_wire, b_wire);
        }
    }
}

fn connected_pair() -> (SecretStream, SecretStream, RawStream, RawStream) {
    let a = SecretStream::new_initiator(None, Options::default()).unwrap();
    let b = SecretStream::new_responder(None, Options::default()).unwrap();
    let ra = a.raw_stream().unwrap();
    let rb = b.raw_stream().unwrap();
    (a, b, ra, rb)
}

fn prekeyed_pair() -> (SessionKeys, SessionKeys) {
    let a_keys = Keypair::generate();
    let b_keys = Keypair::generate();
    let mut hash = [0u8; 32];
    let mut tx = [0u8; 32];
    let mut rx = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut hash);
    rand::thread_rng().fill_bytes(&mut tx);
    rand::thread_rng().fill_bytes(&mut rx);

    let a = SessionKeys {
        public_key: a_keys.public,
        remote_public_key: b_keys.public,
        hash,
        tx,
        rx,
    };
    let b = SessionKeys {
        public_key: b_keys.public,
        remote_public_key: a_keys.public,
        hash,
        tx: rx,
        rx: tx,
    };
    (a, b)
}

fn datas(events: &[Event]) -> Vec<Vec<u8>> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Data(d) => Some(d.clone()),
            _ => None,
        })
        .collect()
}

fn drain(session: &mut SecretStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = session.poll_event() {
        events.push(event);
    }
    events
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// =============================================================================
// Basic connectivity and authentication
// =============================================================================

#[test]
fn test_basic_mutual_authentication() {
    let (mut a, mut b, ra, rb) = connected_pair();
    let (a_events, b_events, _, _) = relay(&mut a, &mut b, &ra, &rb, None);

    assert!(a_events.contains(&Event::Open));
    assert!(b_events.contains(&Event::Open));
    assert_eq!(a.remote_public_key(), Some(b.public_key()));
    assert_eq!(b.remote_public_key(), Some(a.public_key()));
    assert_eq!(a.handshake_hash(), b.handshake_hash());
}

#[test]
fn test_handshake_mirrored_on_raw_stream() {
    let (mut a, mut b, ra, rb) = connected_pair();
    assert!(!ra.handshake_complete());
    relay(&mut a, &mut b, &ra, &rb, None);
    assert!(ra.handshake_complete());
    assert!(rb.handshake_complete());
}

// =============================================================================
// Confidentiality
// =============================================================================

#[test]
fn test_plaintext_never_hits_the_wire() {
    let (mut a, mut b, ra, rb) = connected_pair();
    a.write(b"plaintext").unwrap();
    let (_, b_events, a_wire, _) = relay(&mut a, &mut b, &ra, &rb, None);

    assert_eq!(datas(&b_events), vec![b"plaintext".to_vec()]);
    assert!(!contains_subslice(&a_wire, b"plaintext"));
}

#[test]
fn test_large_plaintext_never_hits_the_wire() {
    let (mut a, mut b, ra, rb) = connected_pair();
    let mut payload = vec![0u8; 4096];
    rand::thread_rng().fill_bytes(&mut payload);
    a.write(&payload).unwrap();
    let (_, b_events, a_wire, _) = relay(&mut a, &mut b, &ra, &rb, None);

    assert_eq!(datas(&b_events), vec![payload.clone()]);
    // No 64-byte window of the plaintext appears on the wire.
    assert!(!contains_subslice(&a_wire, &payload[..64]));
}

// =============================================================================
// Fragmentation tolerance
// =============================================================================

#[test]
fn test_one_byte_at_a_time_relay() {
    let (mut a, mut b, ra, rb) = connected_pair();

    let mut random = vec![0u8; 40_000];
    rand::thread_rng().fill_bytes(&mut random);
    a.write(b"hello world").unwrap();
    a.write(&random).unwrap();

    let (_, b_events, _, _) = relay(&mut a, &mut b, &ra, &rb, Some(1));

    let received = datas(&b_events);
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], b"hello world");
    assert_eq!(received[1], random);
}

#[test]
fn test_odd_chunk_sizes_preserve_boundaries() {
    let (mut a, mut b, ra, rb) = connected_pair();
    let messages: Vec<Vec<u8>> = (1..20).map(|i| vec![i as u8; i * 7]).collect();
    for message in &messages {
        a.write(message).unwrap();
    }
    let (_, b_events, _, _) = relay(&mut a, &mut b, &ra, &rb, Some(3));

    // Each write surfaces as exactly one data event, bytewise intact.
    assert_eq!(datas(&b_events), messages);
}

#[test]
fn test_empty_write_is_one_empty_frame() {
    let (mut a, mut b, ra, rb) = connected_pair();
    a.write(b"").unwrap();
    a.write(b"tail").unwrap();
    let (_, b_events, _, _) = relay(&mut a, &mut b, &ra, &rb, None);

    assert_eq!(datas(&b_events), vec![Vec::new(), b"tail".to_vec()]);
}

// =============================================================================
// Deferred start
// =============================================================================

#[test]
fn test_deferred_start_with_buffered_head() {
    let (ka, kb) = prekeyed_pair();

    let mut a = SecretStream::new_initiator(
        None,
        Options {
            handshake: Some(ka),
            ..Options::default()
        },
    )
    .unwrap();
    let ra = a.raw_stream().unwrap();

    a.write(b"first").unwrap();
    a.write(b"second").unwrap();

    // Collect the raw chunks that accumulated before the receiver existed.
    let mut head = Vec::new();
    while let Some(chunk) = ra.read() {
        head.extend_from_slice(&chunk);
    }
    assert!(!head.is_empty());

    let mut b = SecretStream::new_responder(
        None,
        Options {
            auto_start: false,
            ..Options::default()
        },
    )
    .unwrap();
    b.start(
        None,
        StartOptions {
            handshake: Some(kb),
            data: Some(head),
            ended: false,
        },
    )
    .unwrap();

    a.write(b"third").unwrap();
    let rb = b.raw_stream().unwrap();
    let (_, b_events, _, _) = relay(&mut a, &mut b, &ra, &rb, None);

    assert_eq!(
        datas(&b_events),
        vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
    );
}

#[test]
fn test_start_with_immediate_eof() {
    let (_, kb) = prekeyed_pair();
    let mut b = SecretStream::new_responder(
        None,
        Options {
            auto_start: false,
            ..Options::default()
        },
    )
    .unwrap();
    b.start(
        None,
        StartOptions {
            handshake: Some(kb),
            data: None,
            ended: true,
        },
    )
    .unwrap();

    let events = drain(&mut b);
    assert!(events.contains(&Event::End));
    assert_eq!(events.last(), Some(&Event::Close));
    assert!(!events.iter().any(|e| matches!(e, Event::Error(_))));
}

// =============================================================================
// Garbage input
// =============================================================================

#[test]
fn test_garbage_handshake_zeros() {
    let mut a = SecretStream::new_initiator(None, Options::default()).unwrap();
    let ra = a.raw_stream().unwrap();

    ra.write(&vec![0u8; 65_536]);
    let events = drain(&mut a);

    assert!(events.contains(&Event::Error(Error::Handshake)));
    assert_eq!(events.last(), Some(&Event::Close));
    assert!(a.is_destroyed());
}

#[test]
fn test_garbage_handshake_framed_ascii() {
    let mut a = SecretStream::new_initiator(None, Options::default()).unwrap();
    let ra = a.raw_stream().unwrap();

    let mut wire = vec![16, 0, 0];
    wire.extend_from_slice(b"garbage garbage!");
    ra.write(&wire);
    let events = drain(&mut a);

    assert!(events.contains(&Event::Error(Error::Handshake)));
    assert!(a.is_destroyed());
}

#[test]
fn test_garbage_header_wrong_length() {
    let (_, kb) = prekeyed_pair();
    let mut b = SecretStream::new_responder(
        None,
        Options {
            handshake: Some(kb),
            ..Options::default()
        },
    )
    .unwrap();
    let rb = b.raw_stream().unwrap();
    drain(&mut b);

    // A 255-byte frame arrives where the 56-byte header frame is expected.
    let mut wire = vec![0xFF, 0x00, 0x00];
    let mut junk = vec![0u8; 255];
    rand::thread_rng().fill_bytes(&mut junk);
    wire.extend_from_slice(&junk);
    rb.write(&wire);

    let events = drain(&mut b);
    assert!(events.contains(&Event::Error(Error::InvalidHeaderMessage)));
    assert_eq!(
        Error::InvalidHeaderMessage.to_string(),
        "Invalid header message received"
    );
}

#[test]
fn test_garbage_header_wrong_id() {
    let (_, kb) = prekeyed_pair();
    let mut b = SecretStream::new_responder(
        None,
        Options {
            handshake: Some(kb),
            ..Options::default()
        },
    )
    .unwrap();
    let rb = b.raw_stream().unwrap();
    drain(&mut b);

    // Correct length, wrong stream id.
    let mut wire = vec![56, 0, 0];
    let mut junk = vec![0u8; 56];
    rand::thread_rng().fill_bytes(&mut junk);
    wire.extend_from_slice(&junk);
    rb.write(&wire);

    let events = drain(&mut b);
    assert!(events.contains(&Event::Error(Error::InvalidHeader)));
    assert_eq!(Error::InvalidHeader.to_string(), "Invalid header received");
}

#[test]
fn test_tampered_data_frame_is_fatal() {
    let (mut a, mut b, ra, rb) = connected_pair();
    relay(&mut a, &mut b, &ra, &rb, None);

    a.write(b"payload").unwrap();
    let mut chunk = ra.read().unwrap();
    let last = chunk.len() - 1;
    chunk[last] ^= 0xFF;
    rb.write(&chunk);

    let events = drain(&mut b);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Error(Error::Decryption(_)))));
    assert!(b.is_destroyed());
}

// =============================================================================
// Bulk streaming
// =============================================================================

#[test]
fn test_bulk_chunk_stream() {
    let (mut a, mut b, ra, rb) = connected_pair();
    relay(&mut a, &mut b, &ra, &rb, None);

    const CHUNK: usize = 65_536;
    const COUNT: usize = 64;
    let mut source = vec![0u8; CHUNK];
    rand::thread_rng().fill_bytes(&mut source);

    let mut received = Vec::new();
    for _ in 0..COUNT {
        a.write(&source).unwrap();
        let (_, b_events, _, _) = relay(&mut a, &mut b, &ra, &rb, None);
        received.extend(datas(&b_events));
    }

    assert_eq!(received.len(), COUNT);
    let mut total = 0usize;
    for chunk in &received {
        assert_eq!(chunk, &source);
        total += chunk.len();
    }
    assert_eq!(total, CHUNK * COUNT);
}

// =============================================================================
// Teardown
// =============================================================================

#[test]
fn test_destroy_surfaces_on_session_and_transport() {
    let (mut a, mut b, ra, rb) = connected_pair();
    relay(&mut a, &mut b, &ra, &rb, None);

    let cause = Error::Transport("user teardown".into());
    a.destroy(Some(cause.clone()));

    let a_events = drain(&mut a);
    assert!(a_events.contains(&Event::Error(cause.clone())));
    assert_eq!(a_events.last(), Some(&Event::Close));
    assert!(ra.is_destroyed());
    assert_eq!(ra.error(), Some(cause.clone()));

    // The relay propagates the closure; the peer observes the same cause.
    rb.destroy(ra.error());
    let b_events = drain(&mut b);
    assert!(b_events.contains(&Event::Error(cause)));
    assert_eq!(b_events.last(), Some(&Event::Close));
}

#[test]
fn test_clean_transport_close_is_quiet() {
    let (mut a, mut b, ra, rb) = connected_pair();
    relay(&mut a, &mut b, &ra, &rb, None);

    rb.destroy(None);
    let events = drain(&mut b);
    assert!(!events.iter().any(|e| matches!(e, Event::Error(_))));
    assert!(events.contains(&Event::End));
    assert_eq!(events.last(), Some(&Event::Close));
}

#[test]
fn test_graceful_shutdown_round_trip() {
    let (mut a, mut b, ra, rb) = connected_pair();
    relay(&mut a, &mut b, &ra, &rb, None);

    a.write(b"goodbye").unwrap();
    a.end();
    let (_, b_events, _, _) = relay(&mut a, &mut b, &ra, &rb, None);

    // Data written before end still arrives, then the stream ends.
    let data_at = b_events
        .iter()
        .position(|e| *e == Event::Data(b"goodbye".to_vec()))
        .unwrap();
    let end_at = b_events.iter().position(|e| *e == Event::End).unwrap();
    assert!(data_at < end_at);
}
