//! # Ninth-Bit Serial Transport
//!
//! This module presents a send/receive interface whose primitives carry the
//! address/data distinction explicitly, hiding the fact that the distinction
//! is physically produced by parity-bit manipulation.
//!
//! The serial layer exposes only odd/even parity; a MARK or SPACE ninth bit
//! is produced by choosing, per byte, the setting whose parity bit equals the
//! desired tag for that byte's popcount. Runs of bytes that resolve to the
//! same hardware setting are coalesced into a single parity switch and write.
//!
//! Receiving happens with the line held in a known parity. The host cannot
//! report the ninth bit of incoming bytes, so received bytes carry no tag and
//! the session infers it (see the protocol module).

use crate::bus::frame::FrameByte;
use crate::constants::{DEFAULT_BAUDRATE, DEFAULT_PARITY_SETTLE_US};
use crate::error::RcuError;
use crate::logging::log_debug;
use crate::util::hex::format_hex_compact;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout, Instant};
use tokio_serial::{SerialPort, SerialPortBuilderExt};

/// The logical ninth bit of a wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    /// Ninth bit = 1: address/control byte, MARK parity.
    Address,
    /// Ninth bit = 0: payload byte, SPACE parity.
    Data,
}

impl From<FrameByte> for FrameTag {
    fn from(fb: FrameByte) -> Self {
        if fb.is_address() {
            FrameTag::Address
        } else {
            FrameTag::Data
        }
    }
}

/// A received byte with its best-effort tag. `None` when the host cannot
/// report the ninth bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxByte {
    pub byte: u8,
    pub tag: Option<FrameTag>,
}

/// A raw byte captured in diagnostic mode, stamped with its offset from the
/// start of the capture.
#[derive(Debug, Clone, Copy)]
pub struct CapturedByte {
    pub offset: Duration,
    pub byte: u8,
}

/// Configuration for the serial link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub baudrate: u32,
    /// Settling time applied when the hardware parity setting changes.
    pub parity_settle: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            baudrate: DEFAULT_BAUDRATE,
            parity_settle: Duration::from_micros(DEFAULT_PARITY_SETTLE_US),
        }
    }
}

/// Trait for the byte-level port operations, so tests can inject a mock.
#[async_trait]
pub trait ParityPort: Send {
    /// Writes all bytes under the given ninth-bit tag.
    async fn write_tagged(&mut self, bytes: &[u8], tag: FrameTag) -> Result<(), RcuError>;

    /// Blocks until one byte arrives. Callers bound the wait with a timeout.
    async fn read_byte(&mut self) -> Result<RxByte, RcuError>;

    /// Discards pending input bytes.
    fn clear_input(&mut self) -> Result<(), RcuError>;

    async fn flush(&mut self) -> Result<(), RcuError>;
}

/// Picks the hardware parity setting that yields the desired ninth bit for
/// this byte. Even parity makes the parity bit equal the byte's popcount
/// parity; odd parity inverts it.
pub fn hardware_parity(byte: u8, tag: FrameTag) -> tokio_serial::Parity {
    let odd_popcount = byte.count_ones() % 2 == 1;
    match (tag, odd_popcount) {
        (FrameTag::Address, false) => tokio_serial::Parity::Odd,
        (FrameTag::Address, true) => tokio_serial::Parity::Even,
        (FrameTag::Data, false) => tokio_serial::Parity::Even,
        (FrameTag::Data, true) => tokio_serial::Parity::Odd,
    }
}

/// The real port: a `tokio_serial` stream plus the parity bookkeeping.
pub struct NativeParityPort {
    stream: tokio_serial::SerialStream,
    current_parity: Option<tokio_serial::Parity>,
    parity_settle: Duration,
}

#[async_trait]
impl ParityPort for NativeParityPort {
    async fn write_tagged(&mut self, bytes: &[u8], tag: FrameTag) -> Result<(), RcuError> {
        let mut start = 0usize;
        while start < bytes.len() {
            let parity = hardware_parity(bytes[start], tag);
            let mut end = start + 1;
            while end < bytes.len() && hardware_parity(bytes[end], tag) == parity {
                end += 1;
            }
            if self.current_parity != Some(parity) {
                self.stream
                    .set_parity(parity)
                    .map_err(|e| RcuError::Transport(e.to_string()))?;
                self.current_parity = Some(parity);
                sleep(self.parity_settle).await;
            }
            self.stream
                .write_all(&bytes[start..end])
                .await
                .map_err(|e| RcuError::Transport(e.to_string()))?;
            start = end;
        }
        Ok(())
    }

    async fn read_byte(&mut self) -> Result<RxByte, RcuError> {
        let mut buf = [0u8; 1];
        let n = self
            .stream
            .read(&mut buf)
            .await
            .map_err(|e| RcuError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(RcuError::Transport("serial port closed".to_string()));
        }
        Ok(RxByte {
            byte: buf[0],
            tag: None,
        })
    }

    fn clear_input(&mut self) -> Result<(), RcuError> {
        self.stream
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| RcuError::Transport(e.to_string()))
    }

    async fn flush(&mut self) -> Result<(), RcuError> {
        AsyncWriteExt::flush(&mut self.stream)
            .await
            .map_err(|e| RcuError::Transport(e.to_string()))
    }
}

/// Handle owning the serial link. Exactly one session owns a handle; all
/// parity transitions are serialized through it.
pub struct RcuLinkHandle<P: ParityPort> {
    port: P,
}

impl RcuLinkHandle<NativeParityPort> {
    /// Opens the port at 8 data bits, 1 stop bit, and a parity mode that is
    /// switched per emission.
    pub async fn open(port_name: &str, config: LinkConfig) -> Result<Self, RcuError> {
        let stream = tokio_serial::new(port_name, config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::Even)
            .open_native_async()
            .map_err(|e| RcuError::Transport(e.to_string()))?;

        Ok(RcuLinkHandle {
            port: NativeParityPort {
                stream,
                current_parity: Some(tokio_serial::Parity::Even),
                parity_settle: config.parity_settle,
            },
        })
    }
}

impl<P: ParityPort> RcuLinkHandle<P> {
    /// Wraps an already-open port. Used by tests with the mock port.
    pub fn with_port(port: P) -> Self {
        RcuLinkHandle { port }
    }

    /// Sends a single tagged byte.
    pub async fn send(&mut self, frame: FrameByte) -> Result<(), RcuError> {
        self.port
            .write_tagged(&[frame.value()], FrameTag::from(frame))
            .await?;
        self.port.flush().await
    }

    /// Sends a sequence, coalescing runs of same-tagged bytes into one
    /// parity-set operation plus a single write.
    pub async fn send_many(&mut self, frames: &[FrameByte]) -> Result<(), RcuError> {
        let mut run: Vec<u8> = Vec::with_capacity(frames.len());
        let mut run_tag: Option<FrameTag> = None;
        for frame in frames {
            let tag = FrameTag::from(*frame);
            if run_tag != Some(tag) && !run.is_empty() {
                self.port.write_tagged(&run, run_tag.unwrap()).await?;
                run.clear();
            }
            run_tag = Some(tag);
            run.push(frame.value());
        }
        if let Some(tag) = run_tag {
            self.port.write_tagged(&run, tag).await?;
        }
        log_debug(&format!(
            "sent {} bytes: {}",
            frames.len(),
            format_hex_compact(&frames.iter().map(|f| f.value()).collect::<Vec<_>>())
        ));
        self.port.flush().await
    }

    /// Waits up to `wait` for one byte. `Ok(None)` on timeout.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<RxByte>, RcuError> {
        match timeout(wait, self.port.read_byte()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Discards pending input. Used before sensitive ACK/NAK waits.
    pub fn drain(&mut self) -> Result<(), RcuError> {
        self.port.clear_input()
    }

    /// Diagnostic passthrough: records the raw byte stream with timestamps
    /// for the given duration. The transport never interprets the payload.
    pub async fn capture(&mut self, duration: Duration) -> Result<Vec<CapturedByte>, RcuError> {
        let started = Instant::now();
        let mut captured = Vec::new();
        while started.elapsed() < duration {
            let remaining = duration.saturating_sub(started.elapsed());
            let slice = remaining.min(Duration::from_millis(100));
            if let Some(rx) = self.recv(slice).await? {
                captured.push(CapturedByte {
                    offset: started.elapsed(),
                    byte: rx.byte,
                });
            }
        }
        Ok(captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_choice_produces_the_requested_ninth_bit() {
        // 0x00 has even popcount: MARK needs odd parity, SPACE even.
        assert_eq!(
            hardware_parity(0x00, FrameTag::Address),
            tokio_serial::Parity::Odd
        );
        assert_eq!(
            hardware_parity(0x00, FrameTag::Data),
            tokio_serial::Parity::Even
        );
        // 0x01 has odd popcount: the choice inverts.
        assert_eq!(
            hardware_parity(0x01, FrameTag::Address),
            tokio_serial::Parity::Even
        );
        assert_eq!(
            hardware_parity(0x01, FrameTag::Data),
            tokio_serial::Parity::Odd
        );
    }

    #[test]
    fn every_byte_value_gets_a_consistent_setting() {
        for byte in 0u16..=255 {
            let byte = byte as u8;
            let mark = hardware_parity(byte, FrameTag::Address);
            let space = hardware_parity(byte, FrameTag::Data);
            assert_ne!(mark, space, "byte {byte:#04X}");
        }
    }
}
