//! Unit tests for the packet codec: parsing, packing, and checksum
//! verification of master data packets and RCU write packets.

use rcu_rs::bus::frame::{
    pack_data_packet, pack_write_packet, parse_data_packet, xor_checksum, DataPacket, ParamRecord,
};
use rcu_rs::constants::{CMD_DATA, MASTER_ADDR, RCU_ADDR};
use rcu_rs::registry::default_registry;
use rcu_rs::util::hex::hex_to_bytes;
use rcu_rs::RcuError;

/// A three-parameter packet decodes into the expected raw values.
#[test]
fn test_parse_three_parameter_packet() {
    let registry = default_registry();
    let mut bytes = hex_to_bytes("c0 00 24 0c 00 01 00 7b 00 02 01 e0 00 06 01 5a");
    bytes.push(xor_checksum(&bytes));
    assert_eq!(*bytes.last().unwrap(), 0x2C);

    let packet = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap();
    assert_eq!(packet.sender, MASTER_ADDR);
    assert_eq!(packet.records.len(), 3);
    assert_eq!(packet.records[0].index, 0x01);
    assert_eq!(packet.records[0].raw, 0x007B);
    assert_eq!(packet.records[1].index, 0x02);
    assert_eq!(packet.records[1].raw, 0x01E0);
    assert_eq!(packet.records[2].index, 0x06);
    assert_eq!(packet.records[2].raw, 0x015A);
}

/// A packet mixing 1- and 2-byte parameters walks correctly because widths
/// come from the registry.
#[test]
fn test_parse_mixed_width_packet() {
    let registry = default_registry();
    // 0x13 is one byte wide (status register), 0x01 is two.
    let mut bytes = hex_to_bytes("c0 00 24 07 00 13 43 00 01 fe 3a");
    bytes.push(xor_checksum(&bytes));

    let packet = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap();
    assert_eq!(packet.records.len(), 2);
    assert_eq!(packet.records[0].index, 0x13);
    assert_eq!(packet.records[0].raw, 0x43);
    assert_eq!(packet.records[0].width, 1);
    assert_eq!(packet.records[1].index, 0x01);
    assert_eq!(packet.records[1].raw, 0xFE3A);
}

/// Checksum round-trip: packing a decoded packet reproduces the original
/// bytes, checksum included.
#[test]
fn test_encode_decode_identity() {
    let registry = default_registry();
    let mut bytes = hex_to_bytes("c0 00 24 0c 00 01 00 7b 00 02 01 e0 00 06 01 5a");
    bytes.push(xor_checksum(&bytes));

    let packet = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap();
    let packed = pack_data_packet(&packet, CMD_DATA);
    assert_eq!(&packed[..], &bytes[..]);
}

/// A single-bit corruption is caught by the XOR discipline.
#[test]
fn test_corrupted_packet_fails_checksum() {
    let registry = default_registry();
    let mut bytes = hex_to_bytes("c0 00 24 04 00 01 fe 3a");
    bytes.push(xor_checksum(&bytes));
    bytes[7] ^= 0x01;

    let err = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap_err();
    assert!(matches!(err, RcuError::Checksum { .. }));
}

/// A packet from an unexpected sender is an addressing failure, caught
/// before the payload is walked.
#[test]
fn test_unexpected_sender() {
    let registry = default_registry();
    let mut bytes = hex_to_bytes("c0 00 f9 04 00 01 fe 3a");
    bytes.push(xor_checksum(&bytes));

    let err = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap_err();
    assert!(matches!(err, RcuError::Addressing { sender: 0xF9 }));
}

/// A missing record separator is a framing failure.
#[test]
fn test_bad_record_separator() {
    let registry = default_registry();
    let mut bytes = hex_to_bytes("c0 00 24 04 ff 01 fe 3a");
    bytes.push(xor_checksum(&bytes));

    let err = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap_err();
    assert!(matches!(err, RcuError::Framing(_)));
}

/// An index missing from the registry is decoded at the fallback width and
/// flagged as unknown.
#[test]
fn test_unknown_index_uses_fallback_width() {
    let registry = default_registry();
    let mut bytes = hex_to_bytes("c0 00 24 04 00 7f 12 34");
    bytes.push(xor_checksum(&bytes));
    assert_eq!(*bytes.last().unwrap(), 0xB9);

    let packet = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap();
    assert_eq!(packet.records.len(), 1);
    let record = &packet.records[0];
    assert_eq!(record.index, 0x7F);
    assert_eq!(record.raw, 0x1234);
    assert_eq!(record.width, 2);
    assert!(!record.known);
}

/// A write packet carries exactly one record with the RCU as sender.
#[test]
fn test_write_packet_layout() {
    let packed = pack_write_packet(CMD_DATA, RCU_ADDR, 0x0B, 5, 1);
    assert_eq!(&packed[..], &hex_to_bytes("c0 00 14 03 00 0b 05 d9")[..]);

    let packed = pack_write_packet(CMD_DATA, RCU_ADDR, 0x01, 0xFE3A, 2);
    let mut expected = hex_to_bytes("c0 00 14 04 00 01 fe 3a");
    expected.push(xor_checksum(&expected));
    assert_eq!(&packed[..], &expected[..]);
}

/// Packing preserves declared widths, so a hand-built packet round-trips.
#[test]
fn test_pack_then_parse_hand_built_packet() {
    let registry = default_registry();
    let packet = DataPacket {
        sender: MASTER_ADDR,
        records: vec![
            ParamRecord {
                index: 0x13,
                raw: 0x43,
                width: 1,
                known: true,
            },
            ParamRecord {
                index: 0x07,
                raw: 0x0115,
                width: 2,
                known: true,
            },
        ],
    };
    let bytes = pack_data_packet(&packet, CMD_DATA);
    let reparsed = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap();
    assert_eq!(reparsed, packet);
}
