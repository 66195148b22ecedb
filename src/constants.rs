//! Bus Protocol Constants
//!
//! This module defines the byte values and timing defaults used on the
//! heat-pump bus. The pump's master controller owns the bus and polls each
//! attached node in turn; the values below are the fixed vocabulary of that
//! exchange.

/// Start byte of a data packet (master -> RCU and RCU -> master).
pub const CMD_DATA: u8 = 0xC0;

/// Bus address of the pump's master controller.
pub const MASTER_ADDR: u8 = 0x24;

/// Bus address of the Room Control Unit this crate impersonates.
pub const RCU_ADDR: u8 = 0x14;

/// Acknowledge: ready to receive, or data accepted.
pub const ACK: u8 = 0x06;

/// Enquiry: the RCU has a write request to transmit.
pub const ENQ: u8 = 0x05;

/// Negative acknowledge: checksum failure or rejected write.
pub const NAK: u8 = 0x15;

/// End of turn, always address-tagged on the wire.
pub const ETX: u8 = 0x03;

/// Second byte of every data packet, between the start byte and the sender.
pub const PACKET_FILLER: u8 = 0x00;

/// Separator preceding each parameter record inside a packet payload.
pub const RECORD_SEPARATOR: u8 = 0x00;

/// Fixed packet overhead in bytes: start, filler, sender, length, checksum.
pub const PACKET_OVERHEAD: usize = 5;

/// Default line speed of the bus.
pub const DEFAULT_BAUDRATE: u32 = 19_200;

/// Default width assumed for parameter indices missing from the registry.
pub const DEFAULT_FALLBACK_WIDTH: u8 = 2;

/// Consecutive checksum failures that escalate to a bus-noise fault.
pub const NOISE_THRESHOLD: u8 = 3;

// Timing defaults. All of these are empirical and overridable through
// `SessionConfig` / `LinkConfig`; none is referenced directly at a use site.

/// Delay after emitting ENQ before the write handshake proceeds (ms).
pub const DEFAULT_POST_ENQ_DELAY_MS: u64 = 150;

/// Delay after the write packet before expecting the master's ACK/NAK (ms).
pub const DEFAULT_POST_WRITE_DELAY_MS: u64 = 200;

/// How long the RCU waits for the master after ACK/ENQ before giving up (ms).
pub const DEFAULT_RESPONSE_DEADLINE_MS: u64 = 2_000;

/// Maximum gap between the 0x00 prefix and the address byte of a poll (ms).
pub const DEFAULT_INTER_BYTE_GAP_MS: u64 = 50;

/// Settling time applied when the hardware parity setting changes (us).
pub const DEFAULT_PARITY_SETTLE_US: u64 = 600;
