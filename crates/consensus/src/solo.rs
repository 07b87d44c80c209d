//! Solo consenter - single process, order is arrival order
//!
//! Accepted envelopes go through a bounded queue to one ordering task,
//! which is the only writer to the ledger. A full queue refuses new
//! envelopes instead of blocking the caller.

use crate::blockcutter::{Batch, BlockCutter};
use crate::error::OrderError;
use crate::types::{ConsenterState, SoloConfig};
use crate::writer::BlockWriter;
use crate::Consenter;
use async_trait::async_trait;
use orderer_types::{BlockMetadata, Envelope};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

pub struct SoloConsenter {
    /// Ordering queue sender
    sender: mpsc::Sender<Envelope>,
    /// Ordering queue receiver, taken by the task on start
    receiver: Mutex<Option<mpsc::Receiver<Envelope>>>,
    writer: BlockWriter,
    config: SoloConfig,
    state: Arc<watch::Sender<ConsenterState>>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SoloConsenter {
    /// Create a consenter; nothing is ordered until [`SoloConsenter::start`]
    pub fn new(config: SoloConfig, writer: BlockWriter) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let (state, _) = watch::channel(ConsenterState::Live);
        let state = Arc::new(state);
        let (shutdown, _) = watch::channel(false);

        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            writer,
            config,
            state,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConsenterState> {
        self.state.subscribe()
    }
}

#[async_trait]
impl Consenter for SoloConsenter {
    fn start(&self) {
        let Some(receiver) = self.receiver.lock().take() else {
            tracing::warn!("Solo consenter already started");
            return;
        };

        let task = SoloTask {
            receiver,
            writer: self.writer.clone(),
            cutter: BlockCutter::new(self.config.batch.clone()),
            state: self.state.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        *self.handle.lock() = Some(tokio::spawn(task.run()));

        tracing::info!(
            "Solo consenter started (queue {}, batch {} msgs / {:?})",
            self.config.queue_size,
            self.config.batch.max_message_count,
            self.config.batch.timeout
        );
    }

    /// Envelopes not yet cut are dropped
    async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.state.send_replace(ConsenterState::Shutdown);
    }

    fn order(&self, envelope: Envelope) -> Result<(), OrderError> {
        let state = *self.state.borrow();
        if state.is_terminal() {
            return Err(OrderError::Unavailable(format!("consenter is {}", state)));
        }
        self.sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OrderError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                OrderError::Unavailable("ordering task stopped".to_string())
            }
        })
    }

    fn state(&self) -> ConsenterState {
        *self.state.borrow()
    }

    fn kind(&self) -> &'static str {
        "solo"
    }
}

struct SoloTask {
    receiver: mpsc::Receiver<Envelope>,
    writer: BlockWriter,
    cutter: BlockCutter,
    state: Arc<watch::Sender<ConsenterState>>,
    shutdown: watch::Receiver<bool>,
}

impl SoloTask {
    async fn run(mut self) {
        loop {
            let deadline = self.cutter.deadline();

            let committed = tokio::select! {
                _ = self.shutdown.changed() => break,
                msg = self.receiver.recv() => match msg {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    match self.cutter.timer_fired() {
                        Some(batch) => self.commit(batch),
                        None => true,
                    }
                }
            };

            if !committed {
                self.state.send_replace(ConsenterState::Halted);
                tracing::error!("Solo consenter halted; no further blocks will be written");
                return;
            }
        }

        tracing::info!(
            "Solo consenter stopped ({} envelopes not yet cut)",
            self.cutter.pending_len()
        );
    }

    /// Returns false if a block could not be written
    fn handle_envelope(&mut self, envelope: Envelope) -> bool {
        if !self.writer.admit(&envelope) {
            return true;
        }
        match self.cutter.enqueue(envelope) {
            Ok(result) => result.batches.into_iter().all(|batch| self.commit(batch)),
            Err(e) => {
                tracing::warn!("Dropping envelope: {}", e);
                true
            }
        }
    }

    fn commit(&self, batch: Batch) -> bool {
        match self.writer.write_batch(batch, BlockMetadata::default()) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to append block: {}", e);
                false
            }
        }
    }
}
