//! End-to-end tests: real relay, real sockets, protocol-level clients.

use fanout_relay::protocol::{adler32, decode_frame, encode_frame};
use fanout_relay::{ChatClient, Relay, RelayConfig, RelayHandle};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn start_relay(endpoint_capacity: usize) -> RelayHandle {
    let mut config = RelayConfig::default();
    config.listen = "127.0.0.1:0".parse().unwrap();
    config.queues.endpoint_capacity = endpoint_capacity;
    config.reaper.interval_ms = 20;
    Relay::bind(config).unwrap().spawn().unwrap()
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn connect(relay: &RelayHandle) -> TcpStream {
    let stream = TcpStream::connect(relay.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn every_connection_receives_identical_bytes() {
    let relay = start_relay(4);
    let mut alice = connect(&relay);
    let mut bob = connect(&relay);
    wait_for("both registrations", || {
        relay.metrics().snapshot().registered == 2
    });

    let mut frame = Vec::new();
    encode_frame("alice", b"hi", &mut frame).unwrap();
    assert_eq!(frame[0], 12);
    assert_eq!(&frame[1..5], &adler32(b"alice:hi").to_be_bytes());
    alice.write_all(&frame).unwrap();

    for stream in [&mut bob, &mut alice] {
        let mut received = [0u8; 13];
        stream.read_exact(&mut received).unwrap();
        assert_eq!(&received[..], &frame[..]);
        assert_eq!(decode_frame(&received).unwrap().payload, b"alice:hi");
    }

    let snapshot = relay.metrics().snapshot();
    assert_eq!(snapshot.received, 1);
    assert_eq!(snapshot.delivered, 2);
    assert_eq!(snapshot.dropped, 0);
}

#[test]
fn truncated_line_still_verifies() {
    let relay = start_relay(4);
    let mut bob = ChatClient::connect(relay.local_addr(), "bob").unwrap();
    let mut frames = bob.reader().unwrap();
    wait_for("registration", || relay.metrics().snapshot().registered == 1);

    let long = "x".repeat(253);
    assert_eq!(bob.send_line(&long).unwrap(), 247);

    let frame = frames.next_frame().unwrap();
    assert_eq!(frame.payload.len(), 251);
    let (name, text) = frame.split().unwrap();
    assert_eq!(name, b"bob");
    assert_eq!(text.len(), 247);
}

#[test]
fn closed_connection_is_reaped_without_leaking_buffers() {
    let relay = start_relay(2);
    let mut talker = ChatClient::connect(relay.local_addr(), "talker").unwrap();
    let listener = connect(&relay);
    wait_for("both registrations", || {
        relay.metrics().snapshot().registered == 2
    });

    for i in 0..10 {
        talker.send_line(&format!("line {i}")).unwrap();
    }
    wait_for("distribution", || relay.metrics().snapshot().received == 10);

    drop(listener);
    drop(talker);
    wait_for("reap of both endpoints", || {
        relay.metrics().snapshot().reaped == 2
    });
    wait_for("buffers returned", || relay.pool().stats().in_flight() == 0);

    let snapshot = relay.shutdown().unwrap().unwrap();
    assert_eq!(snapshot.live, 0);
    assert_eq!(snapshot.pool.acquired, snapshot.pool.returned);
}

#[test]
fn stalled_reader_does_not_hold_up_others() {
    let relay = start_relay(1);
    let mut producer = ChatClient::connect(relay.local_addr(), "flood").unwrap();
    let _stalled = connect(&relay);
    let watcher = ChatClient::connect(relay.local_addr(), "watch").unwrap();
    wait_for("three registrations", || {
        relay.metrics().snapshot().registered == 3
    });

    let seen_marker = Arc::new(AtomicBool::new(false));
    let watched = Arc::new(AtomicUsize::new(0));
    let reader = {
        let seen_marker = Arc::clone(&seen_marker);
        let watched = Arc::clone(&watched);
        let frames = watcher.reader().unwrap();
        thread::spawn(move || {
            for frame in frames {
                let Ok(frame) = frame else { break };
                watched.fetch_add(1, Ordering::Relaxed);
                if frame.payload.ends_with(b"marker") {
                    seen_marker.store(true, Ordering::Relaxed);
                    break;
                }
            }
        })
    };

    let filler = "z".repeat(200);
    for _ in 0..2000 {
        producer.send_line(&filler).unwrap();
    }
    wait_for("flood distributed", || {
        relay.metrics().snapshot().received == 2000
    });

    // The watcher's one-slot queue may be occupied when a marker arrives; keep trying.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !seen_marker.load(Ordering::Relaxed) {
        assert!(Instant::now() < deadline, "watcher never saw the marker");
        producer.send_line("marker").unwrap();
        thread::sleep(Duration::from_millis(50));
    }
    reader.join().unwrap();
    assert!(watched.load(Ordering::Relaxed) > 0);

    // Every message was either queued or dropped for each of the three endpoints.
    let snapshot = relay.metrics().snapshot();
    assert_eq!(snapshot.delivered + snapshot.dropped, 3 * snapshot.received);
}

#[test]
fn shutdown_releases_queued_buffers() {
    let relay = start_relay(8);
    let mut producer = ChatClient::connect(relay.local_addr(), "p").unwrap();
    let _idle = connect(&relay);
    wait_for("registrations", || relay.metrics().snapshot().registered == 2);

    for _ in 0..5 {
        producer.send_line("pending").unwrap();
    }
    wait_for("distribution", || relay.metrics().snapshot().received == 5);

    let snapshot = relay.shutdown().unwrap().unwrap();
    assert_eq!(snapshot.live, 0);
    wait_for("buffers returned", || relay.pool().stats().in_flight() == 0);
}
