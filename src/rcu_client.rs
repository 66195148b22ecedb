//! # RCU Client
//!
//! The facade host programs use. A client owns one worker task, which in turn
//! is the sole owner of the transport: it blocks on `recv`, feeds bytes to
//! the session state machine, executes the resulting emissions, and delivers
//! decoded values to the store and to a registered callback. The facade
//! threads communicate with the worker only through the store (reads) and a
//! single-slot write queue, so byte ordering and parity discipline stay
//! serialized in one place.

use crate::bus::protocol::{PendingWrite, RcuSession, SessionConfig, SessionOutput};
use crate::bus::serial::{ParityPort, RcuLinkHandle};
use crate::error::RcuError;
use crate::logging::{log_debug, log_error, log_info};
use crate::registry::{DecodedValue, ParamRegistry};
use crate::store::{StoredValue, ValueKey, ValueStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Called on the worker for every decoded value, in decode order.
pub type DecodeCallback = Box<dyn Fn(&ValueKey, &DecodedValue) + Send + Sync>;

/// Result of a one-shot read pass.
#[derive(Debug)]
pub struct ReadPass {
    pub values: BTreeMap<ValueKey, StoredValue>,
    /// True when the deadline fired before every expected index was seen.
    pub partial: bool,
}

/// Completion handle for a queued write request.
pub struct WriteTicket {
    rx: oneshot::Receiver<Result<(), RcuError>>,
}

impl WriteTicket {
    /// Waits for the write handshake to finish.
    pub async fn wait(self) -> Result<(), RcuError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(RcuError::Other("worker terminated".to_string())))
    }
}

struct WriteRequest {
    pending: PendingWrite,
    done: oneshot::Sender<Result<(), RcuError>>,
}

enum Control {
    Write(WriteRequest),
    /// Ends the one-shot read pass; the session ignores the bus afterwards.
    Complete,
}

/// Handle to a running RCU session.
pub struct RcuClient {
    store: Arc<ValueStore>,
    registry: Arc<ParamRegistry>,
    control_tx: mpsc::Sender<Control>,
    fault_rx: watch::Receiver<Option<RcuError>>,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl RcuClient {
    /// Spawns the worker on the given link.
    pub fn attach<P: ParityPort + 'static>(
        link: RcuLinkHandle<P>,
        registry: Arc<ParamRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self::attach_with_callback(link, registry, config, None)
    }

    /// Spawns the worker with a decode callback for continuous monitoring.
    pub fn attach_with_callback<P: ParityPort + 'static>(
        link: RcuLinkHandle<P>,
        registry: Arc<ParamRegistry>,
        config: SessionConfig,
        callback: Option<DecodeCallback>,
    ) -> Self {
        let store = Arc::new(ValueStore::new());
        let (control_tx, control_rx) = mpsc::channel(1);
        let (fault_tx, fault_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = RcuSession::new(config, Arc::clone(&registry));
        let worker = tokio::spawn(worker_loop(
            link,
            session,
            Arc::clone(&store),
            Arc::clone(&registry),
            control_rx,
            fault_tx,
            callback,
            shutdown_rx,
        ));

        RcuClient {
            store,
            registry,
            control_tx,
            fault_rx,
            shutdown_tx,
            worker,
        }
    }

    /// Blocks until every expected index has been observed or the deadline
    /// fires; the snapshot is tagged partial in the latter case.
    pub async fn run_once(
        &self,
        expected: &[u8],
        deadline: Duration,
    ) -> Result<ReadPass, RcuError> {
        let mut fault_rx = self.fault_rx.clone();
        let pass = tokio::select! {
            _ = self.store.wait_complete(expected) => ReadPass {
                values: self.store.snapshot(),
                partial: false,
            },
            _ = sleep(deadline) => ReadPass {
                values: self.store.snapshot(),
                partial: true,
            },
            err = wait_fault(&mut fault_rx) => return Err(err),
        };
        let _ = self.control_tx.send(Control::Complete).await;
        Ok(pass)
    }

    /// Runs until a fault surfaces or the client is shut down. Decoded
    /// values reach the callback registered at attach time.
    pub async fn run_forever(&self) -> Result<(), RcuError> {
        let mut fault_rx = self.fault_rx.clone();
        Err(wait_fault(&mut fault_rx).await)
    }

    /// Queues a single write request. Writability and range are validated
    /// synchronously; the handshake outcome arrives through the ticket.
    pub fn request_write(&self, index: u8, value: i32) -> Result<WriteTicket, RcuError> {
        let def = self
            .registry
            .definition(index)
            .ok_or(RcuError::NotWritable(index))?;
        if !def.writable {
            return Err(RcuError::NotWritable(index));
        }
        let (min, max) = def.write_range();
        if value < min || value > max {
            return Err(RcuError::OutOfRange {
                index,
                value,
                min,
                max,
            });
        }

        let raw = match def.size {
            1 => (value as i8 as u8) as u16,
            _ => value as i16 as u16,
        };
        let (done, rx) = oneshot::channel();
        self.control_tx
            .try_send(Control::Write(WriteRequest {
                pending: PendingWrite {
                    index,
                    raw,
                    width: def.size,
                },
                done,
            }))
            .map_err(|_| RcuError::WriteBusy)?;
        Ok(WriteTicket { rx })
    }

    /// Cached lookup of a parameter's last observed value.
    pub fn get(&self, index: u8) -> Option<StoredValue> {
        self.store.get(index)
    }

    /// Cached lookup of one projected bitfield.
    pub fn get_bitfield(&self, index: u8, name: &str) -> Option<StoredValue> {
        self.store.get_bitfield(index, name)
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    /// Stops the worker cooperatively and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.worker.await;
    }
}

async fn wait_fault(rx: &mut watch::Receiver<Option<RcuError>>) -> RcuError {
    loop {
        if let Some(err) = rx.borrow_and_update().clone() {
            return err;
        }
        if rx.changed().await.is_err() {
            return RcuError::Other("worker terminated".to_string());
        }
    }
}

/// How often the worker wakes while passively listening, to notice shutdown
/// and queued writes even on a silent bus.
const IDLE_RECHECK: Duration = Duration::from_millis(250);

#[allow(clippy::too_many_arguments)]
async fn worker_loop<P: ParityPort>(
    mut link: RcuLinkHandle<P>,
    mut session: RcuSession,
    store: Arc<ValueStore>,
    registry: Arc<ParamRegistry>,
    mut control_rx: mpsc::Receiver<Control>,
    fault_tx: watch::Sender<Option<RcuError>>,
    callback: Option<DecodeCallback>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut last_rx: Option<Instant> = None;
    let mut write_done: Option<oneshot::Sender<Result<(), RcuError>>> = None;
    let mut controls_open = true;

    log_info("session worker started");

    'worker: loop {
        let wait = session.recv_deadline().unwrap_or(IDLE_RECHECK);

        let outputs = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break 'worker,
            control = control_rx.recv(), if controls_open => {
                match control {
                    Some(Control::Write(request)) => {
                        if session.accepts_write() && write_done.is_none() {
                            // accepts_write guarantees the slot is free
                            let _ = session.queue_write(request.pending);
                            write_done = Some(request.done);
                            log_debug("write request queued for next poll");
                        } else {
                            let _ = request.done.send(Err(RcuError::WriteBusy));
                        }
                        continue;
                    }
                    Some(Control::Complete) => {
                        session.mark_complete();
                        log_debug("read pass complete; session parked");
                        continue;
                    }
                    None => {
                        controls_open = false;
                        continue;
                    }
                }
            }
            received = link.recv(wait) => match received {
                Ok(Some(rx)) => {
                    let gap = last_rx
                        .map(|at| at.elapsed())
                        .unwrap_or(Duration::MAX);
                    last_rx = Some(Instant::now());
                    session.on_byte(rx.byte, rx.tag, gap)
                }
                Ok(None) => session.on_timeout(),
                Err(err) => {
                    log_error(&format!("transport failed: {err}"));
                    let mut outputs = session.on_transport_error();
                    outputs.push(SessionOutput::Fault(err));
                    outputs
                }
            },
        };

        let fatal = matches!(outputs.last(), Some(SessionOutput::Fault(RcuError::Transport(_))));
        if let Err(err) = execute_outputs(
            &mut link,
            outputs,
            &store,
            &registry,
            &mut write_done,
            &fault_tx,
            callback.as_ref(),
        )
        .await
        {
            log_error(&format!("emission failed: {err}"));
            let _ = fault_tx.send(Some(err));
            break 'worker;
        }
        if fatal {
            break 'worker;
        }
    }

    log_info("session worker stopped");
}

/// Executes one transition's outputs in order. Returns the first transport
/// error encountered while emitting.
async fn execute_outputs<P: ParityPort>(
    link: &mut RcuLinkHandle<P>,
    outputs: Vec<SessionOutput>,
    store: &ValueStore,
    registry: &ParamRegistry,
    write_done: &mut Option<oneshot::Sender<Result<(), RcuError>>>,
    fault_tx: &watch::Sender<Option<RcuError>>,
    callback: Option<&DecodeCallback>,
) -> Result<(), RcuError> {
    for output in outputs {
        match output {
            SessionOutput::Send(frame) => link.send(frame).await?,
            SessionOutput::SendMany(frames) => link.send_many(&frames).await?,
            SessionOutput::DrainInput => link.drain()?,
            SessionOutput::Pause(duration) => sleep(duration).await,
            SessionOutput::Decoded(packet) => {
                let updates = store.record_packet(&packet, registry);
                if let Some(cb) = callback {
                    for (key, stored) in &updates {
                        cb(key, &stored.value);
                    }
                }
            }
            SessionOutput::WriteDone(result) => {
                if let Some(done) = write_done.take() {
                    let _ = done.send(result);
                }
            }
            SessionOutput::Fault(err) => {
                let _ = fault_tx.send(Some(err));
            }
        }
    }
    Ok(())
}
