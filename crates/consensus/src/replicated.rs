//! Replicated-log consenter
//!
//! Envelopes are published to a shared log partition; every orderer
//! consumes the same partition and cuts blocks from it deterministically.
//! Batch timeouts are themselves ordered: the first orderer whose timer
//! fires publishes `TimeToCut(n)`, and every orderer cuts block `n` when
//! that record reaches it. Stale `TimeToCut` records are ignored.
//!
//! Each block's metadata stores the last log offset it covers, so a
//! restarted orderer resumes consumption right after its newest block.

use crate::blockcutter::{Batch, BlockCutter};
use crate::broker::{LogBroker, LogMessage, LogRecord};
use crate::error::{BrokerError, CutterError, OrderError};
use crate::types::{ConsenterState, ReplicatedConfig};
use crate::writer::BlockWriter;
use crate::Consenter;
use async_trait::async_trait;
use orderer_ledger::LedgerError;
use orderer_types::{BlockMetadata, Envelope};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

pub struct ReplicatedConsenter {
    broker: Arc<dyn LogBroker>,
    writer: BlockWriter,
    config: ReplicatedConfig,
    /// Publish queue feeding the producer task
    publish_tx: mpsc::Sender<LogMessage>,
    publish_rx: Mutex<Option<mpsc::Receiver<LogMessage>>>,
    state: Arc<watch::Sender<ConsenterState>>,
    /// Set while publishing keeps failing
    degraded: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ReplicatedConsenter {
    pub fn new(config: ReplicatedConfig, broker: Arc<dyn LogBroker>, writer: BlockWriter) -> Self {
        let (publish_tx, publish_rx) = mpsc::channel(config.queue_size.max(1));
        let (state, _) = watch::channel(ConsenterState::Connecting);
        let (shutdown, _) = watch::channel(false);

        Self {
            broker,
            writer,
            config,
            publish_tx,
            publish_rx: Mutex::new(Some(publish_rx)),
            state: Arc::new(state),
            degraded: Arc::new(AtomicBool::new(false)),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConsenterState> {
        self.state.subscribe()
    }

    pub fn writer(&self) -> &BlockWriter {
        &self.writer
    }
}

#[async_trait]
impl Consenter for ReplicatedConsenter {
    fn start(&self) {
        let Some(publish_rx) = self.publish_rx.lock().take() else {
            tracing::warn!("Replicated consenter already started");
            return;
        };

        let producer = Producer {
            broker: self.broker.clone(),
            config: self.config.clone(),
            queue: publish_rx,
            degraded: self.degraded.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        let consumer = ConsumerTask {
            broker: self.broker.clone(),
            writer: self.writer.clone(),
            config: self.config.clone(),
            publish_tx: self.publish_tx.clone(),
            state: self.state.clone(),
            shutdown: self.shutdown.subscribe(),
        };

        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(producer.run()));
        handles.push(tokio::spawn(consumer.run()));

        tracing::info!(
            "Replicated consenter started on partition {}",
            self.config.partition
        );
    }

    async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        self.state.send_replace(ConsenterState::Shutdown);
    }

    fn order(&self, envelope: Envelope) -> Result<(), OrderError> {
        let state = *self.state.borrow();
        if state.is_terminal() {
            return Err(OrderError::Unavailable(format!("consenter is {}", state)));
        }
        if self.is_degraded() {
            return Err(OrderError::Unavailable("replicated log unreachable".to_string()));
        }

        let size = envelope.encoded_len();
        if size > self.config.batch.absolute_max_bytes {
            return Err(CutterError::Oversized {
                size,
                max: self.config.batch.absolute_max_bytes,
            }
            .into());
        }

        self.publish_tx
            .try_send(LogMessage::Regular(envelope.to_bytes()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => OrderError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => {
                    OrderError::Unavailable("producer stopped".to_string())
                }
            })
    }

    fn state(&self) -> ConsenterState {
        *self.state.borrow()
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "replicated"
    }
}

/// Publishes queued messages, retrying with backoff until each succeeds
struct Producer {
    broker: Arc<dyn LogBroker>,
    config: ReplicatedConfig,
    queue: mpsc::Receiver<LogMessage>,
    degraded: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl Producer {
    async fn run(mut self) {
        if !self.publish(LogMessage::Connect).await {
            return;
        }

        loop {
            let msg = tokio::select! {
                _ = self.shutdown.changed() => return,
                msg = self.queue.recv() => match msg {
                    Some(msg) => msg,
                    None => return,
                },
            };
            if !self.publish(msg).await {
                return;
            }
        }
    }

    /// Returns false on shutdown
    async fn publish(&mut self, msg: LogMessage) -> bool {
        let payload = msg.to_bytes();
        let mut attempt = 0u32;

        loop {
            match self.broker.produce(&self.config.partition, payload.clone()).await {
                Ok(offset) => {
                    if self.degraded.swap(false, Ordering::SeqCst) {
                        tracing::info!("Publishing to {} recovered", self.config.partition);
                    }
                    tracing::trace!("Published at offset {}", offset);
                    return true;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!("Publish attempt {} failed: {}", attempt, e);
                    if attempt >= self.config.publish_retry.max_attempts
                        && !self.degraded.swap(true, Ordering::SeqCst)
                    {
                        tracing::error!(
                            "Publishing to {} failed {} times; refusing new envelopes",
                            self.config.partition,
                            attempt
                        );
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.changed() => return false,
                _ = sleep(self.config.publish_retry.delay(attempt)) => {}
            }
        }
    }
}

/// Batch timer of the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Idle,
    Armed(Instant),
    /// `TimeToCut` published for the current batch
    Sent,
}

enum Exit {
    Shutdown,
    Halted,
    Reconnect,
}

/// Consumes the log and writes blocks
struct ConsumerTask {
    broker: Arc<dyn LogBroker>,
    writer: BlockWriter,
    config: ReplicatedConfig,
    publish_tx: mpsc::Sender<LogMessage>,
    state: Arc<watch::Sender<ConsenterState>>,
    shutdown: watch::Receiver<bool>,
}

impl ConsumerTask {
    async fn run(mut self) {
        loop {
            match self.session().await {
                Exit::Shutdown => return,
                Exit::Halted => {
                    self.state.send_replace(ConsenterState::Halted);
                    tracing::error!("Replicated consenter halted; no further blocks will be written");
                    return;
                }
                Exit::Reconnect => {
                    self.state.send_replace(ConsenterState::Reconnecting);
                    tokio::select! {
                        _ = self.shutdown.changed() => return,
                        _ = sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    /// One attachment to the log, from the offset after the newest block
    async fn session(&mut self) -> Exit {
        let resume = match self.writer.last_metadata() {
            Ok(metadata) => metadata.last_offset.map_or(0, |offset| offset + 1),
            Err(e) => {
                tracing::error!("Cannot read resume offset from ledger: {}", e);
                return Exit::Halted;
            }
        };

        let partition = self.config.partition.clone();
        let broker = self.broker.clone();
        let target = partition.clone();
        let attached = async move {
            let consumer = broker.consume(&target, resume).await?;
            let high_watermark = broker.high_watermark(&target).await?;
            Ok::<_, BrokerError>((consumer, high_watermark))
        };
        let (mut consumer, high_watermark) = tokio::select! {
            _ = self.shutdown.changed() => return Exit::Shutdown,
            attached = attached => match attached {
                Ok(attached) => attached,
                Err(e) => {
                    tracing::warn!("Cannot attach to {} at offset {}: {}", partition, resume, e);
                    return Exit::Reconnect;
                }
            },
        };

        if resume < high_watermark {
            tracing::info!(
                "Catching up on {} from offset {} to {}",
                partition,
                resume,
                high_watermark
            );
            self.state.send_replace(ConsenterState::CatchingUp);
        } else {
            self.state.send_replace(ConsenterState::Live);
        }

        // Pending envelopes from a previous session are re-read from the log
        let mut cutter = BlockCutter::new(self.config.batch.clone());
        let mut timer = Timer::Idle;

        loop {
            let live = *self.state.borrow() == ConsenterState::Live;
            let deadline = match timer {
                Timer::Armed(at) if live => Some(at),
                _ => None,
            };

            tokio::select! {
                _ = self.shutdown.changed() => return Exit::Shutdown,
                record = consumer.recv() => {
                    let record = match record {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::warn!("Lost consumer on {}: {}", partition, e);
                            return Exit::Reconnect;
                        }
                    };
                    let offset = record.offset;

                    match self.process(record, &mut cutter) {
                        Ok(true) => timer = Timer::Idle,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!("Failed to append block: {}", e);
                            return Exit::Halted;
                        }
                    }

                    if !live && offset + 1 >= high_watermark {
                        tracing::info!("Caught up on {} at offset {}", partition, offset);
                        self.state.send_replace(ConsenterState::Live);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let next = self.writer.next_block_number();
                    timer = match self.publish_tx.try_send(LogMessage::TimeToCut(next)) {
                        Ok(()) => {
                            tracing::debug!("Batch timer expired, requested cut of block {}", next);
                            Timer::Sent
                        }
                        Err(_) => Timer::Armed(Instant::now() + self.config.batch.timeout),
                    };
                }
            }

            if cutter.pending_len() == 0 {
                timer = Timer::Idle;
            } else if timer == Timer::Idle {
                timer = Timer::Armed(Instant::now() + self.config.batch.timeout);
            }
        }
    }

    /// Apply one log record. Returns whether a block was written.
    fn process(&self, record: LogRecord, cutter: &mut BlockCutter) -> Result<bool, LedgerError> {
        let offset = record.offset;
        let msg = match LogMessage::from_bytes(&record.payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Skipping undecodable record at offset {}: {}", offset, e);
                return Ok(false);
            }
        };

        match msg {
            LogMessage::Connect => Ok(false),
            LogMessage::TimeToCut(number) => {
                if number != self.writer.next_block_number() {
                    tracing::debug!("Ignoring stale cut request for block {}", number);
                    return Ok(false);
                }
                match cutter.cut() {
                    Some(batch) => self.commit(batch, Some(offset)).map(|_| true),
                    None => Ok(false),
                }
            }
            LogMessage::Regular(data) => {
                let envelope = match Envelope::from_bytes(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!("Skipping malformed envelope at offset {}: {}", offset, e);
                        return Ok(false);
                    }
                };
                if !self.writer.admit(&envelope) {
                    return Ok(false);
                }

                let result = match cutter.enqueue(envelope) {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!("Dropping envelope at offset {}: {}", offset, e);
                        return Ok(false);
                    }
                };

                // Only the last batch can contain this record, and only if
                // the record did not stay behind in the pending batch
                let cut = result.batches.len();
                for (i, batch) in result.batches.into_iter().enumerate() {
                    let last_offset = if i + 1 == cut && !result.pending {
                        Some(offset)
                    } else {
                        offset.checked_sub(1)
                    };
                    self.commit(batch, last_offset)?;
                }
                Ok(cut > 0)
            }
        }
    }

    fn commit(&self, batch: Batch, last_offset: Option<u64>) -> Result<u64, LedgerError> {
        self.writer.write_batch(batch, BlockMetadata { last_offset })
    }
}
