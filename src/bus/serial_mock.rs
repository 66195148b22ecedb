//! Mock serial port implementation for testing
//!
//! Provides a mock port that records the tag in force for every written byte
//! and replays scripted incoming bytes, so the protocol can be tested without
//! hardware. Scripted input is left intact by `clear_input` (tests pre-queue
//! entire exchanges); the call is counted instead so drain discipline can be
//! asserted.

use crate::bus::frame::FrameByte;
use crate::bus::serial::{FrameTag, ParityPort, RxByte};
use crate::error::RcuError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

/// Mock port that simulates the bus counterparty.
#[derive(Clone, Default)]
pub struct MockParityPort {
    /// Bytes queued to be read from the port (incoming).
    rx: Arc<Mutex<VecDeque<RxByte>>>,
    /// Every byte written, with the tag in force when it was emitted.
    tx: Arc<Mutex<Vec<(FrameTag, u8)>>>,
    /// Error to surface on the next operation.
    next_error: Arc<Mutex<Option<String>>>,
    /// Number of times the input was drained.
    drains: Arc<Mutex<u32>>,
}

impl MockParityPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue tagged bytes to be read from the port.
    pub fn queue_rx(&self, frames: &[FrameByte]) {
        let mut rx = self.rx.lock().unwrap();
        rx.extend(frames.iter().map(|f| RxByte {
            byte: f.value(),
            tag: Some(FrameTag::from(*f)),
        }));
    }

    /// Queue raw bytes whose tag the host cannot report.
    pub fn queue_rx_untagged(&self, bytes: &[u8]) {
        let mut rx = self.rx.lock().unwrap();
        rx.extend(bytes.iter().map(|&byte| RxByte { byte, tag: None }));
    }

    /// Everything written so far, with tags.
    pub fn sent(&self) -> Vec<(FrameTag, u8)> {
        self.tx.lock().unwrap().clone()
    }

    /// Everything written so far, as frame bytes.
    pub fn sent_frames(&self) -> Vec<FrameByte> {
        self.sent()
            .into_iter()
            .map(|(tag, byte)| match tag {
                FrameTag::Address => FrameByte::Address(byte),
                FrameTag::Data => FrameByte::Data(byte),
            })
            .collect()
    }

    /// Raw written bytes without tags.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent().into_iter().map(|(_, b)| b).collect()
    }

    pub fn drain_count(&self) -> u32 {
        *self.drains.lock().unwrap()
    }

    pub fn clear(&self) {
        self.rx.lock().unwrap().clear();
        self.tx.lock().unwrap().clear();
    }

    /// Surface a transport error on the next operation.
    pub fn set_next_error(&self, message: &str) {
        *self.next_error.lock().unwrap() = Some(message.to_string());
    }

    fn take_error(&self) -> Option<RcuError> {
        self.next_error
            .lock()
            .unwrap()
            .take()
            .map(RcuError::Transport)
    }
}

#[async_trait]
impl ParityPort for MockParityPort {
    async fn write_tagged(&mut self, bytes: &[u8], tag: FrameTag) -> Result<(), RcuError> {
        if let Some(err) = self.take_error() {
            return Err(err);
        }
        let mut tx = self.tx.lock().unwrap();
        tx.extend(bytes.iter().map(|&b| (tag, b)));
        Ok(())
    }

    async fn read_byte(&mut self) -> Result<RxByte, RcuError> {
        loop {
            if let Some(err) = self.take_error() {
                return Err(err);
            }
            if let Some(rx) = self.rx.lock().unwrap().pop_front() {
                return Ok(rx);
            }
            sleep(Duration::from_millis(1)).await;
        }
    }

    fn clear_input(&mut self) -> Result<(), RcuError> {
        *self.drains.lock().unwrap() += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), RcuError> {
        Ok(())
    }
}
