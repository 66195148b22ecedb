//! # Packet Codec
//!
//! Stateless encoding and decoding of the data packet format exchanged with
//! the pump's master controller, using the `nom` crate for the byte-level
//! structure.
//!
//! Master packet layout:
//!
//! ```text
//! C0 00 SENDER LEN <records> CHK
//! record := 00 IDX [HI,] LO        (width from the parameter registry)
//! CHK    := XOR(C0 ..= last record byte)
//! ```
//!
//! LEN counts the record bytes only; the checksum byte is excluded from both
//! LEN and the XOR. Multi-byte values are big-endian. An RCU-originated write
//! packet has the same shape with the RCU as sender and exactly one record.

use crate::constants::{PACKET_FILLER, PACKET_OVERHEAD, RECORD_SEPARATOR};
use crate::error::RcuError;
use crate::registry::ParamRegistry;
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

/// A byte on the wire, tagged with the ninth (framing) bit.
///
/// Address bytes carry ninth bit = 1 and are produced with MARK parity;
/// data bytes carry ninth bit = 0 and are produced with SPACE parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameByte {
    Address(u8),
    Data(u8),
}

impl FrameByte {
    pub fn value(self) -> u8 {
        match self {
            FrameByte::Address(b) | FrameByte::Data(b) => b,
        }
    }

    pub fn is_address(self) -> bool {
        matches!(self, FrameByte::Address(_))
    }
}

/// One decoded parameter record from a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRecord {
    pub index: u8,
    /// Raw big-endian value, unsigned; interpretation happens at projection.
    pub raw: u16,
    /// Width the record occupied on the wire (1 or 2).
    pub width: u8,
    /// False when the index was absent from the registry and the fallback
    /// width was assumed.
    pub known: bool,
}

/// A validated, decoded data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub sender: u8,
    pub records: Vec<ParamRecord>,
}

/// XOR of all bytes, the bus's checksum discipline.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Total packet length implied by its LEN byte.
pub fn packet_size(len: u8) -> usize {
    len as usize + PACKET_OVERHEAD
}

fn packet_structure(input: &[u8]) -> IResult<&[u8], (u8, u8, u8, &[u8], u8)> {
    let (i, start) = be_u8(input)?;
    let (i, filler) = be_u8(i)?;
    let (i, sender) = be_u8(i)?;
    let (i, len) = be_u8(i)?;
    let (i, payload) = take(len as usize)(i)?;
    let (i, checksum) = be_u8(i)?;
    Ok((i, (start, filler, sender, payload, checksum)))
}

/// Decodes and validates a complete data packet.
///
/// `cmd_data` and `expected_sender` come from the active pump profile;
/// record widths come from the registry, with the registry's fallback width
/// assumed for unknown indices.
pub fn parse_data_packet(
    input: &[u8],
    cmd_data: u8,
    expected_sender: u8,
    registry: &ParamRegistry,
) -> Result<DataPacket, RcuError> {
    let (_, (start, filler, sender, payload, checksum)) = packet_structure(input)
        .map_err(|_| RcuError::Framing("truncated data packet".to_string()))?;

    if start != cmd_data {
        return Err(RcuError::Framing(format!(
            "bad start byte {start:#04X}, expected {cmd_data:#04X}"
        )));
    }
    if filler != PACKET_FILLER {
        return Err(RcuError::Framing(format!(
            "bad filler byte {filler:#04X}, expected {PACKET_FILLER:#04X}"
        )));
    }
    if sender != expected_sender {
        return Err(RcuError::Addressing { sender });
    }

    let calculated = xor_checksum(&input[..4 + payload.len()]);
    if calculated != checksum {
        return Err(RcuError::Checksum {
            expected: checksum,
            calculated,
        });
    }

    let records = walk_records(payload, registry)?;
    Ok(DataPacket { sender, records })
}

fn walk_records(payload: &[u8], registry: &ParamRegistry) -> Result<Vec<ParamRecord>, RcuError> {
    let mut records = Vec::new();
    let mut i = 0usize;
    while i < payload.len() {
        if payload[i] != RECORD_SEPARATOR {
            return Err(RcuError::Framing(format!(
                "expected record separator at payload offset {i}, got {:#04X}",
                payload[i]
            )));
        }
        let index = *payload
            .get(i + 1)
            .ok_or_else(|| RcuError::Framing("record truncated after separator".to_string()))?;

        let width = registry.width_or_fallback(index);
        let known = registry.size(index).is_some();
        let raw = match width {
            1 => *payload
                .get(i + 2)
                .ok_or_else(|| RcuError::Framing("record value truncated".to_string()))?
                as u16,
            _ => {
                let hi = *payload
                    .get(i + 2)
                    .ok_or_else(|| RcuError::Framing("record value truncated".to_string()))?;
                let lo = *payload
                    .get(i + 3)
                    .ok_or_else(|| RcuError::Framing("record value truncated".to_string()))?;
                ((hi as u16) << 8) | lo as u16
            }
        };

        records.push(ParamRecord {
            index,
            raw,
            width,
            known,
        });
        i += 2 + width as usize;
    }
    Ok(records)
}

/// Packs a data packet back into wire bytes. Inverse of
/// [`parse_data_packet`] on well-formed input.
pub fn pack_data_packet(packet: &DataPacket, cmd_data: u8) -> BytesMut {
    let payload_len: usize = packet
        .records
        .iter()
        .map(|r| 2 + r.width as usize)
        .sum();
    let mut buf = BytesMut::with_capacity(payload_len + PACKET_OVERHEAD);
    buf.put_u8(cmd_data);
    buf.put_u8(PACKET_FILLER);
    buf.put_u8(packet.sender);
    buf.put_u8(payload_len as u8);
    for rec in &packet.records {
        buf.put_u8(RECORD_SEPARATOR);
        buf.put_u8(rec.index);
        if rec.width == 2 {
            buf.put_u8((rec.raw >> 8) as u8);
        }
        buf.put_u8(rec.raw as u8);
    }
    let checksum = xor_checksum(&buf);
    buf.put_u8(checksum);
    buf
}

/// Packs an RCU-originated write packet carrying exactly one parameter.
pub fn pack_write_packet(
    cmd_data: u8,
    rcu_addr: u8,
    index: u8,
    raw: u16,
    width: u8,
) -> BytesMut {
    let packet = DataPacket {
        sender: rcu_addr,
        records: vec![ParamRecord {
            index,
            raw,
            width,
            known: true,
        }],
    };
    pack_data_packet(&packet, cmd_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CMD_DATA, MASTER_ADDR, RCU_ADDR};
    use crate::registry::default_registry;

    #[test]
    fn checksum_is_plain_xor() {
        assert_eq!(xor_checksum(&[]), 0);
        assert_eq!(xor_checksum(&[0xC0, 0x00, 0x24]), 0xE4);
    }

    #[test]
    fn parses_single_record_packet() {
        let registry = default_registry();
        let bytes = [0xC0, 0x00, 0x24, 0x04, 0x00, 0x01, 0xFE, 0x3A, 0x25];
        let packet = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap();
        assert_eq!(packet.sender, MASTER_ADDR);
        assert_eq!(packet.records.len(), 1);
        assert_eq!(packet.records[0].index, 0x01);
        assert_eq!(packet.records[0].raw, 0xFE3A);
        assert!(packet.records[0].known);
    }

    #[test]
    fn rejects_wrong_sender() {
        let registry = default_registry();
        let mut bytes = vec![0xC0, 0x00, 0xF9, 0x04, 0x00, 0x01, 0xFE, 0x3A];
        bytes.push(xor_checksum(&bytes));
        let err = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap_err();
        assert!(matches!(err, RcuError::Addressing { sender: 0xF9 }));
    }

    #[test]
    fn rejects_truncated_record() {
        let registry = default_registry();
        // Index 0x01 is declared two bytes wide but only one value byte fits.
        let mut bytes = vec![0xC0, 0x00, 0x24, 0x03, 0x00, 0x01, 0xFE];
        bytes.push(xor_checksum(&bytes));
        let err = parse_data_packet(&bytes, CMD_DATA, MASTER_ADDR, &registry).unwrap_err();
        assert!(matches!(err, RcuError::Framing(_)));
    }

    #[test]
    fn write_packet_bytes() {
        let buf = pack_write_packet(CMD_DATA, RCU_ADDR, 0x0B, 5, 1);
        assert_eq!(&buf[..], &[0xC0, 0x00, 0x14, 0x03, 0x00, 0x0B, 0x05, 0xD9]);
    }
}
