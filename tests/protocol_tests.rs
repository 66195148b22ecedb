//! Unit tests for the session state machine, driven from recorded byte
//! streams. Emissions and decoded packets are examined without any transport.

use rcu_rs::bus::frame::FrameByte;
use rcu_rs::bus::protocol::{PendingWrite, RcuSession, SessionConfig, SessionOutput, SessionState};
use rcu_rs::bus::serial::FrameTag;
use rcu_rs::registry::default_registry;
use rcu_rs::store::ValueStore;
use rcu_rs::util::hex::hex_to_bytes;
use rcu_rs::{DecodedValue, RcuError, ValueKey};
use std::sync::Arc;
use std::time::Duration;

fn session() -> RcuSession {
    RcuSession::new(SessionConfig::default(), Arc::new(default_registry()))
}

/// Feeds tagged frame bytes, collecting every output.
fn feed_tagged(session: &mut RcuSession, frames: &[FrameByte]) -> Vec<SessionOutput> {
    let mut outputs = Vec::new();
    for frame in frames {
        outputs.extend(session.on_byte(
            frame.value(),
            Some(FrameTag::from(*frame)),
            Duration::from_millis(1),
        ));
    }
    outputs
}

/// Feeds raw bytes whose tag the transport could not report.
fn feed_untagged(session: &mut RcuSession, bytes: &[u8], gap: Duration) -> Vec<SessionOutput> {
    let mut outputs = Vec::new();
    for byte in bytes {
        outputs.extend(session.on_byte(*byte, None, gap));
    }
    outputs
}

/// Every emission in the outputs, in order.
fn emissions(outputs: &[SessionOutput]) -> Vec<FrameByte> {
    let mut sent = Vec::new();
    for output in outputs {
        match output {
            SessionOutput::Send(frame) => sent.push(*frame),
            SessionOutput::SendMany(frames) => sent.extend(frames.iter().copied()),
            _ => {}
        }
    }
    sent
}

fn s1_packet() -> Vec<u8> {
    hex_to_bytes("c0 00 24 04 00 01 fe 3a 25")
}

/// The S1 exchange: poll, ACK, data packet, ACK + ETX, decoded value stored.
#[test]
fn test_single_temperature_reply() {
    let mut s = session();
    let store = ValueStore::new();
    let registry = default_registry();

    let mut outputs = feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    assert_eq!(emissions(&outputs), vec![FrameByte::Data(0x06)]);

    outputs = feed_untagged(&mut s, &s1_packet(), Duration::from_millis(1));
    assert_eq!(
        emissions(&outputs),
        vec![FrameByte::Data(0x06), FrameByte::Address(0x03)]
    );
    for output in &outputs {
        if let SessionOutput::Decoded(packet) = output {
            store.record_packet(packet, &registry);
        }
    }
    assert_eq!(
        store.get(0x01).unwrap().value,
        DecodedValue::Real(-45.4, "\u{b0}C".to_string())
    );
    assert_eq!(s.state(), SessionState::Idle);
}

/// A corrupted packet draws a single NAK, no store update, and the session
/// returns to idle.
#[test]
fn test_checksum_failure_draws_nak() {
    let mut s = session();
    feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );

    let mut packet = s1_packet();
    packet[7] ^= 0x01;
    let outputs = feed_untagged(&mut s, &packet, Duration::from_millis(1));

    assert_eq!(emissions(&outputs), vec![FrameByte::Data(0x15)]);
    assert!(!outputs
        .iter()
        .any(|o| matches!(o, SessionOutput::Decoded(_))));
    assert_eq!(s.state(), SessionState::Idle);
}

/// Three consecutive checksum failures escalate to a bus-noise fault; a
/// good packet in between resets the counter.
#[test]
fn test_noise_escalation_after_three_failures() {
    let mut s = session();
    let mut bad = s1_packet();
    bad[7] ^= 0x01;

    for round in 0..2 {
        feed_tagged(
            &mut s,
            &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
        );
        let outputs = feed_untagged(&mut s, &bad, Duration::from_millis(1));
        assert!(
            !outputs.iter().any(|o| matches!(o, SessionOutput::Fault(_))),
            "no fault expected on round {round}"
        );
    }

    feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    let outputs = feed_untagged(&mut s, &bad, Duration::from_millis(1));
    assert!(outputs
        .iter()
        .any(|o| matches!(o, SessionOutput::Fault(RcuError::BusNoisy))));
}

#[test]
fn test_good_packet_resets_noise_counter() {
    let mut s = session();
    let mut bad = s1_packet();
    bad[7] ^= 0x01;

    for _ in 0..2 {
        feed_tagged(
            &mut s,
            &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
        );
        feed_untagged(&mut s, &bad, Duration::from_millis(1));
    }
    feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    feed_untagged(&mut s, &s1_packet(), Duration::from_millis(1));

    feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    let outputs = feed_untagged(&mut s, &bad, Duration::from_millis(1));
    assert!(!outputs.iter().any(|o| matches!(o, SessionOutput::Fault(_))));
}

/// No write without the ENQ handshake: when the master never clears the
/// ENQ, the request completes with WriteTimeout and no write-packet bytes
/// appear among the emissions.
#[test]
fn test_no_write_without_handshake() {
    let mut s = session();
    s.queue_write(PendingWrite {
        index: 0x0B,
        raw: 5,
        width: 1,
    })
    .unwrap();

    let mut outputs = feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    outputs.extend(s.on_timeout());

    let sent = emissions(&outputs);
    assert_eq!(sent, vec![FrameByte::Data(0x05)]);
    assert!(sent.iter().all(|f| f.value() != 0xC0));
    assert!(outputs
        .iter()
        .any(|o| matches!(o, SessionOutput::WriteDone(Err(RcuError::WriteTimeout)))));
    assert_eq!(s.state(), SessionState::Idle);
}

/// The full write handshake: ENQ, master ACK, write packet, master ACK,
/// ETX, success.
#[test]
fn test_write_handshake_accepted() {
    let mut s = session();
    s.queue_write(PendingWrite {
        index: 0x0B,
        raw: 5,
        width: 1,
    })
    .unwrap();

    let outputs = feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    assert_eq!(emissions(&outputs), vec![FrameByte::Data(0x05)]);
    assert_eq!(s.state(), SessionState::Polled { write: true });

    // Master clears the ENQ.
    let outputs = s.on_byte(0x06, None, Duration::from_millis(1));
    let sent = emissions(&outputs);
    let expected: Vec<FrameByte> = hex_to_bytes("c0 00 14 03 00 0b 05 d9")
        .into_iter()
        .map(FrameByte::Data)
        .collect();
    assert_eq!(sent, expected);
    assert_eq!(s.state(), SessionState::Writing);

    // Master acknowledges the packet.
    let outputs = s.on_byte(0x06, None, Duration::from_millis(1));
    assert_eq!(emissions(&outputs), vec![FrameByte::Address(0x03)]);
    assert!(outputs
        .iter()
        .any(|o| matches!(o, SessionOutput::WriteDone(Ok(())))));
    assert_eq!(s.state(), SessionState::Idle);
}

/// A NAK after the write packet classifies as WriteRejected.
#[test]
fn test_write_handshake_rejected() {
    let mut s = session();
    s.queue_write(PendingWrite {
        index: 0x0B,
        raw: 5,
        width: 1,
    })
    .unwrap();
    feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    s.on_byte(0x06, None, Duration::from_millis(1));

    let outputs = s.on_byte(0x15, None, Duration::from_millis(1));
    assert!(outputs
        .iter()
        .any(|o| matches!(o, SessionOutput::WriteDone(Err(RcuError::WriteRejected)))));
    assert!(emissions(&outputs).is_empty());
    assert_eq!(s.state(), SessionState::Idle);
}

/// Idempotent reads: replaying the same recorded stream into fresh
/// sessions produces identical snapshots.
#[test]
fn test_idempotent_reads_over_recorded_stream() {
    let registry = default_registry();
    let mut stream: Vec<u8> = vec![0x00, 0x14];
    stream.extend(s1_packet());
    stream.extend([0x00, 0x14]);
    let mut packet2 = hex_to_bytes("c0 00 24 07 00 13 43 00 01 00 7b");
    packet2.push(rcu_rs::bus::frame::xor_checksum(&packet2));
    stream.extend(&packet2);

    let run = |bytes: &[u8]| {
        let mut s = session();
        let store = ValueStore::new();
        for byte in bytes {
            for output in s.on_byte(*byte, None, Duration::from_millis(1)) {
                if let SessionOutput::Decoded(packet) = output {
                    store.record_packet(&packet, &registry);
                }
            }
        }
        store.snapshot()
    };

    let first = run(&stream);
    let second = run(&stream);
    assert_eq!(first, second);
    assert_eq!(
        first[&ValueKey::Bitfield(0x13, "Kompressor".to_string())].value,
        DecodedValue::Boolean(true)
    );
    assert_eq!(
        first[&ValueKey::Param(0x01)].value,
        DecodedValue::Real(12.3, "\u{b0}C".to_string())
    );
}

/// Payload bytes 0x00 0x14 inside a packet are not mistaken for a poll:
/// the Receiving state consumes them.
#[test]
fn test_payload_bytes_do_not_fake_a_poll() {
    let mut s = session();
    let store = ValueStore::new();
    let registry = default_registry();

    // Packet carrying index 0x14 (one byte wide): payload contains 00 14.
    let mut packet = hex_to_bytes("c0 00 24 03 00 14 0a");
    packet.push(rcu_rs::bus::frame::xor_checksum(&packet));

    let mut stream: Vec<u8> = vec![0x00, 0x14];
    stream.extend(&packet);

    let outputs = feed_untagged(&mut s, &stream, Duration::from_millis(1));
    // One ACK for the poll, one ACK + ETX for the packet; no spurious ACK
    // from the payload's 00 14.
    assert_eq!(
        emissions(&outputs),
        vec![
            FrameByte::Data(0x06),
            FrameByte::Data(0x06),
            FrameByte::Address(0x03)
        ]
    );
    for output in &outputs {
        if let SessionOutput::Decoded(packet) = output {
            store.record_packet(packet, &registry);
        }
    }
    assert_eq!(
        store.get_bitfield(0x14, "Fan Speed").unwrap().value,
        DecodedValue::Enumerated(1, Some("Low".to_string()))
    );
}

/// An address-tagged byte inside a packet aborts reception without any
/// emission.
#[test]
fn test_address_byte_mid_packet_resets() {
    let mut s = session();
    feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    let outputs = feed_untagged(&mut s, &[0xC0, 0x00, 0x24], Duration::from_millis(1));
    assert!(emissions(&outputs).is_empty());

    let outputs = s.on_byte(0x03, Some(FrameTag::Address), Duration::from_millis(1));
    assert!(emissions(&outputs).is_empty());
    assert_eq!(s.state(), SessionState::Idle);
}

/// Protocol-level failures are recoverable inside the session; transport
/// and configuration failures are not.
#[test]
fn test_error_recoverability_split() {
    assert!(RcuError::Checksum {
        expected: 0x25,
        calculated: 0x24
    }
    .is_recoverable());
    assert!(RcuError::Framing("bad separator".to_string()).is_recoverable());
    assert!(RcuError::Addressing { sender: 0xF9 }.is_recoverable());
    assert!(!RcuError::Transport("unplugged".to_string()).is_recoverable());
    assert!(!RcuError::BusNoisy.is_recoverable());
    assert!(!RcuError::Config("bad mask".to_string()).is_recoverable());
}

/// After a completed read pass the session ignores the bus.
#[test]
fn test_complete_state_is_terminal() {
    let mut s = session();
    s.mark_complete();
    let outputs = feed_tagged(
        &mut s,
        &[FrameByte::Address(0x00), FrameByte::Address(0x14)],
    );
    assert!(outputs.is_empty());
    assert_eq!(s.state(), SessionState::Complete);
}
