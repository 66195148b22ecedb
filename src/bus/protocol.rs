//! # RCU Session State Machine
//!
//! The protocol logic of the emulated Room Control Unit: recognizing its
//! address poll, answering with ACK or ENQ, receiving and validating data
//! packets, and running the write handshake.
//!
//! The machine is synchronous and pure. Every received byte (plus a
//! best-effort tag and the gap since the previous byte) or timeout drives one
//! transition, which yields an ordered list of [`SessionOutput`]s for the
//! owning worker to execute. This keeps the machine drivable from recorded
//! byte streams: feed bytes, examine emissions and decoded packets.

use crate::bus::frame::{self, DataPacket, FrameByte};
use crate::bus::serial::FrameTag;
use crate::constants::*;
use crate::error::RcuError;
use crate::logging::{log_debug, log_warn};
use crate::registry::ParamRegistry;
use crate::util::hex::format_hex_compact;
use std::sync::Arc;
use std::time::Duration;

/// States of the RCU session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Awaiting the master's poll.
    Idle,
    /// The 0x00 address prefix was just seen.
    AddressSeen,
    /// Own address seen and answered; `write` is true when ENQ was emitted
    /// because a write request is queued.
    Polled { write: bool },
    /// Inside a data packet.
    Receiving,
    /// Write packet emitted, awaiting the master's ACK/NAK.
    Writing,
    /// Terminal for a one-shot read pass.
    Complete,
}

/// Session tuning. The timing values are empirical; they are parameters here
/// rather than constants so deployments can adapt to a particular master.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rcu_addr: u8,
    pub master_addr: u8,
    pub cmd_data: u8,
    pub ack: u8,
    pub enq: u8,
    pub nak: u8,
    pub etx: u8,
    /// How long to wait for the master after emitting ACK/ENQ or a write
    /// packet before the transition times out.
    pub response_deadline: Duration,
    /// Delay after ENQ; must stay below the master's own timeout.
    pub post_enq_delay: Duration,
    /// Delay after the write packet before expecting ACK/NAK.
    pub post_write_delay: Duration,
    /// Maximum gap between the 0x00 prefix and the address byte for the
    /// untagged poll heuristic.
    pub inter_byte_gap: Duration,
    /// Consecutive checksum failures that escalate to `BusNoisy`.
    pub noise_threshold: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            rcu_addr: RCU_ADDR,
            master_addr: MASTER_ADDR,
            cmd_data: CMD_DATA,
            ack: ACK,
            enq: ENQ,
            nak: NAK,
            etx: ETX,
            response_deadline: Duration::from_millis(DEFAULT_RESPONSE_DEADLINE_MS),
            post_enq_delay: Duration::from_millis(DEFAULT_POST_ENQ_DELAY_MS),
            post_write_delay: Duration::from_millis(DEFAULT_POST_WRITE_DELAY_MS),
            inter_byte_gap: Duration::from_millis(DEFAULT_INTER_BYTE_GAP_MS),
            noise_threshold: NOISE_THRESHOLD,
        }
    }
}

/// A queued parameter write, already validated and encoded to its raw form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub index: u8,
    pub raw: u16,
    pub width: u8,
}

/// Effects the worker must execute, in order, after a transition.
#[derive(Debug)]
pub enum SessionOutput {
    /// Emit one tagged byte.
    Send(FrameByte),
    /// Emit a sequence (the transport coalesces same-tagged runs).
    SendMany(Vec<FrameByte>),
    /// Discard pending input before a sensitive ACK/NAK wait.
    DrainInput,
    /// Sleep before continuing with the following outputs.
    Pause(Duration),
    /// A packet decoded and validated; update the store.
    Decoded(DataPacket),
    /// The in-flight write request completed.
    WriteDone(Result<(), RcuError>),
    /// A fault the facade must see (transport loss, noisy bus).
    Fault(RcuError),
}

/// The RCU-side protocol session. One session owns one transport.
pub struct RcuSession {
    config: SessionConfig,
    registry: Arc<ParamRegistry>,
    state: SessionState,
    rx: Vec<u8>,
    pending_write: Option<PendingWrite>,
    checksum_failures: u8,
}

impl RcuSession {
    pub fn new(config: SessionConfig, registry: Arc<ParamRegistry>) -> Self {
        RcuSession {
            config,
            registry,
            state: SessionState::Idle,
            rx: Vec::new(),
            pending_write: None,
            checksum_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Queues a write to be offered at the next poll. The queue holds a
    /// single slot.
    pub fn queue_write(&mut self, write: PendingWrite) -> Result<(), RcuError> {
        if self.pending_write.is_some() {
            return Err(RcuError::WriteBusy);
        }
        self.pending_write = Some(write);
        Ok(())
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending_write.is_some()
    }

    /// Whether the worker should accept a new write request right now.
    pub fn accepts_write(&self) -> bool {
        self.pending_write.is_none() && !matches!(self.state, SessionState::Writing)
    }

    /// The receive deadline attached to the current state, if any. `None`
    /// means the session is passively listening.
    pub fn recv_deadline(&self) -> Option<Duration> {
        match self.state {
            SessionState::Polled { .. } | SessionState::Receiving | SessionState::Writing => {
                Some(self.config.response_deadline)
            }
            _ => None,
        }
    }

    /// Marks the one-shot read pass finished; further bytes are ignored.
    pub fn mark_complete(&mut self) {
        self.state = SessionState::Complete;
        self.rx.clear();
    }

    /// Drives the machine with one received byte.
    ///
    /// `tag` is the transport's best-effort ninth bit; `gap` is the time
    /// since the previous byte, used by the tag-inference heuristic when the
    /// tag is unknown.
    pub fn on_byte(&mut self, byte: u8, tag: Option<FrameTag>, gap: Duration) -> Vec<SessionOutput> {
        match self.state {
            SessionState::Idle => self.on_idle(byte, tag),
            SessionState::AddressSeen => self.on_address_seen(byte, tag, gap),
            SessionState::Polled { write: false } => self.on_polled_read(byte, tag),
            SessionState::Polled { write: true } => self.on_polled_write(byte, tag),
            SessionState::Receiving => self.on_receiving(byte, tag),
            SessionState::Writing => self.on_writing(byte),
            SessionState::Complete => Vec::new(),
        }
    }

    /// Drives the machine when the state's receive deadline elapsed.
    pub fn on_timeout(&mut self) -> Vec<SessionOutput> {
        match self.state {
            SessionState::Polled { write: false } | SessionState::Receiving => {
                log_debug("response deadline elapsed waiting for data packet");
                self.reset();
                Vec::new()
            }
            SessionState::Polled { write: true } => {
                log_warn("master never acknowledged ENQ; dropping write request");
                self.pending_write = None;
                self.reset();
                vec![SessionOutput::WriteDone(Err(RcuError::WriteTimeout))]
            }
            SessionState::Writing => {
                log_warn("master never acknowledged write packet");
                self.reset();
                vec![SessionOutput::WriteDone(Err(RcuError::WriteTimeout))]
            }
            _ => Vec::new(),
        }
    }

    /// A transport failure forces the session back to idle; any in-flight
    /// write completes with the error's write-side classification.
    pub fn on_transport_error(&mut self) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();
        if matches!(
            self.state,
            SessionState::Polled { write: true } | SessionState::Writing
        ) || self.pending_write.is_some()
        {
            self.pending_write = None;
            outputs.push(SessionOutput::WriteDone(Err(RcuError::WriteTimeout)));
        }
        self.reset();
        outputs
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.rx.clear();
    }

    fn on_idle(&mut self, byte: u8, tag: Option<FrameTag>) -> Vec<SessionOutput> {
        let prefix = match tag {
            Some(FrameTag::Address) => byte == 0x00,
            Some(FrameTag::Data) => false,
            // Heuristic: a bare 0x00 opens the poll window. 0x00 appears as
            // payload only inside packets bounded by the start byte and
            // checksum, which the Receiving state consumes.
            None => byte == 0x00,
        };
        if prefix {
            self.state = SessionState::AddressSeen;
        }
        Vec::new()
    }

    fn on_address_seen(
        &mut self,
        byte: u8,
        tag: Option<FrameTag>,
        gap: Duration,
    ) -> Vec<SessionOutput> {
        let addressed = match tag {
            Some(FrameTag::Address) => byte == self.config.rcu_addr,
            Some(FrameTag::Data) => false,
            None => byte == self.config.rcu_addr && gap <= self.config.inter_byte_gap,
        };

        if addressed {
            return if self.pending_write.is_some() {
                self.state = SessionState::Polled { write: true };
                vec![
                    SessionOutput::Send(FrameByte::Data(self.config.enq)),
                    SessionOutput::Pause(self.config.post_enq_delay),
                    SessionOutput::DrainInput,
                ]
            } else {
                self.state = SessionState::Polled { write: false };
                vec![SessionOutput::Send(FrameByte::Data(self.config.ack))]
            };
        }

        // Another 0x00 restarts the window; any other byte (a poll for a
        // different node, or noise) resets.
        self.state = if byte == 0x00 && tag != Some(FrameTag::Data) {
            SessionState::AddressSeen
        } else {
            SessionState::Idle
        };
        Vec::new()
    }

    fn on_polled_read(&mut self, byte: u8, tag: Option<FrameTag>) -> Vec<SessionOutput> {
        if tag == Some(FrameTag::Address) {
            log_debug("address byte where data packet expected");
            self.reset();
            return Vec::new();
        }
        if byte == self.config.cmd_data {
            self.state = SessionState::Receiving;
            self.rx.clear();
            self.rx.push(byte);
        } else {
            // FramingError is local: drop, return to idle, do not emit.
            log_debug(&format!(
                "expected data packet start, got {byte:#04X}; resetting"
            ));
            self.reset();
        }
        Vec::new()
    }

    fn on_receiving(&mut self, byte: u8, tag: Option<FrameTag>) -> Vec<SessionOutput> {
        if tag == Some(FrameTag::Address) {
            log_debug("address byte inside data packet; resetting");
            self.reset();
            return Vec::new();
        }
        self.rx.push(byte);
        if self.rx.len() >= 4 && self.rx.len() == frame::packet_size(self.rx[3]) {
            return self.finish_packet();
        }
        Vec::new()
    }

    fn finish_packet(&mut self) -> Vec<SessionOutput> {
        let bytes = std::mem::take(&mut self.rx);
        self.state = SessionState::Idle;

        match frame::parse_data_packet(
            &bytes,
            self.config.cmd_data,
            self.config.master_addr,
            &self.registry,
        ) {
            Ok(packet) => {
                self.checksum_failures = 0;
                log_debug(&format!("packet ok: {}", format_hex_compact(&bytes)));
                vec![
                    SessionOutput::Decoded(packet),
                    SessionOutput::Send(FrameByte::Data(self.config.ack)),
                    SessionOutput::Send(FrameByte::Address(self.config.etx)),
                ]
            }
            Err(err @ RcuError::Checksum { .. }) => {
                self.checksum_failures += 1;
                log_warn(&format!(
                    "{err} ({} consecutive): {}",
                    self.checksum_failures,
                    format_hex_compact(&bytes)
                ));
                let mut outputs = vec![SessionOutput::Send(FrameByte::Data(self.config.nak))];
                if self.checksum_failures >= self.config.noise_threshold {
                    self.checksum_failures = 0;
                    outputs.push(SessionOutput::Fault(RcuError::BusNoisy));
                }
                outputs
            }
            Err(err) => {
                // Framing and addressing failures: drop without emitting.
                log_debug(&format!("{err}: {}", format_hex_compact(&bytes)));
                Vec::new()
            }
        }
    }

    fn on_polled_write(&mut self, byte: u8, tag: Option<FrameTag>) -> Vec<SessionOutput> {
        if byte == self.config.ack && tag != Some(FrameTag::Address) {
            // The polled-for-write state is only entered with a write queued.
            let Some(write) = self.pending_write.take() else {
                self.reset();
                return Vec::new();
            };
            let packet = frame::pack_write_packet(
                self.config.cmd_data,
                self.config.rcu_addr,
                write.index,
                write.raw,
                write.width,
            );
            log_debug(&format!(
                "master cleared ENQ; sending write packet {}",
                format_hex_compact(&packet)
            ));
            self.state = SessionState::Writing;
            vec![
                SessionOutput::SendMany(packet.iter().map(|&b| FrameByte::Data(b)).collect()),
                SessionOutput::Pause(self.config.post_write_delay),
                SessionOutput::DrainInput,
            ]
        } else {
            log_warn(&format!(
                "unexpected byte {byte:#04X} instead of ENQ clearance; dropping write"
            ));
            self.pending_write = None;
            self.reset();
            vec![SessionOutput::WriteDone(Err(RcuError::WriteTimeout))]
        }
    }

    fn on_writing(&mut self, byte: u8) -> Vec<SessionOutput> {
        if byte == self.config.ack {
            self.reset();
            vec![
                SessionOutput::Send(FrameByte::Address(self.config.etx)),
                SessionOutput::WriteDone(Ok(())),
            ]
        } else if byte == self.config.nak {
            self.reset();
            vec![SessionOutput::WriteDone(Err(RcuError::WriteRejected))]
        } else {
            // Stray bytes (line echo) are ignored until the deadline.
            Vec::new()
        }
    }
}
