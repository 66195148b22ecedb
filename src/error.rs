//! Error Handling
//!
//! This module defines the RcuError enum, which represents the different error
//! types that can occur in the rcu-rs crate.

use thiserror::Error;

/// Represents the different error types that can occur while talking to the pump.
#[derive(Debug, Clone, Error)]
pub enum RcuError {
    /// Indicates an error related to the serial port communication.
    /// Fatal at the session level; surfaces to the facade.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Indicates an unexpected byte where the packet grammar required a
    /// specific one. Local: drop, return to idle, do not emit.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Indicates an XOR checksum mismatch on a received packet.
    #[error("Invalid checksum: expected {expected:#04X}, calculated {calculated:#04X}")]
    Checksum { expected: u8, calculated: u8 },

    /// Indicates a data packet from an unexpected sender address.
    #[error("Unexpected sender address: {sender:#04X}")]
    Addressing { sender: u8 },

    /// Indicates a parameter index that is not in the registry.
    /// Non-fatal: the value is decoded at the fallback width and stored
    /// with a warning annotation.
    #[error("Unknown parameter index: {0:#04X}")]
    UnknownParameter(u8),

    /// Indicates a write request against a read-only parameter.
    #[error("Parameter {0:#04X} is not writable")]
    NotWritable(u8),

    /// Indicates a write value outside the parameter's declared range.
    #[error("Value {value} for parameter {index:#04X} outside range {min}..={max}")]
    OutOfRange {
        index: u8,
        value: i32,
        min: i32,
        max: i32,
    },

    /// The master never acknowledged the write handshake in time.
    #[error("Write timed out waiting for master acknowledge")]
    WriteTimeout,

    /// The master rejected the write packet with NAK.
    #[error("Write rejected by master")]
    WriteRejected,

    /// A write request is already pending; the queue holds one slot.
    #[error("A write request is already in flight")]
    WriteBusy,

    /// Raised after repeated consecutive checksum failures.
    #[error("Bus noisy: repeated checksum failures")]
    BusNoisy,

    /// Indicates an invalid parameter configuration document.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl RcuError {
    /// Recoverable protocol errors are handled inside the session (logged and
    /// counted); everything else propagates to the facade caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RcuError::Framing(_)
                | RcuError::Checksum { .. }
                | RcuError::Addressing { .. }
                | RcuError::UnknownParameter(_)
        )
    }
}
