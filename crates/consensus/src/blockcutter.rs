//! Block cutter - turns a stream of envelopes into bounded batches
//!
//! A batch is cut when it reaches the message count limit, when the next
//! envelope would push it past the preferred byte size, or when its timer
//! expires. Configuration envelopes always get a batch to themselves.

use crate::error::CutterError;
use crate::types::BatchConfig;
use orderer_types::{Envelope, MessageType};
use tokio::time::Instant;

/// Envelopes destined for one block, in order
pub type Batch = Vec<Envelope>;

/// Output of [`BlockCutter::enqueue`]
#[derive(Debug, Default)]
pub struct CutResult {
    /// Batches cut by this envelope, oldest first
    pub batches: Vec<Batch>,
    /// Whether the envelope is still waiting in the pending batch
    pub pending: bool,
}

pub struct BlockCutter {
    config: BatchConfig,
    pending: Batch,
    pending_bytes: usize,
    /// When the first envelope entered the current batch
    pending_since: Option<Instant>,
}

impl BlockCutter {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            pending: Vec::with_capacity(config.max_message_count),
            config,
            pending_bytes: 0,
            pending_since: None,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Add an envelope, returning any batches it causes to be cut.
    ///
    /// Oversized envelopes are rejected without touching the pending batch.
    pub fn enqueue(&mut self, envelope: Envelope) -> Result<CutResult, CutterError> {
        let size = envelope.encoded_len();
        if size > self.config.absolute_max_bytes {
            return Err(CutterError::Oversized {
                size,
                max: self.config.absolute_max_bytes,
            });
        }

        let mut result = CutResult::default();

        if is_configuration(&envelope) || size > self.config.preferred_max_bytes {
            if let Some(batch) = self.cut() {
                result.batches.push(batch);
            }
            tracing::debug!("Isolating envelope of {} bytes in its own batch", size);
            result.batches.push(vec![envelope]);
            return Ok(result);
        }

        if self.pending_bytes + size > self.config.preferred_max_bytes {
            tracing::debug!(
                "Envelope of {} bytes would overflow the batch ({} pending), cutting",
                size,
                self.pending_bytes
            );
            if let Some(batch) = self.cut() {
                result.batches.push(batch);
            }
        }

        if self.pending.is_empty() {
            self.pending_since = Some(Instant::now());
        }
        self.pending.push(envelope);
        self.pending_bytes += size;

        if self.pending.len() >= self.config.max_message_count {
            if let Some(batch) = self.cut() {
                result.batches.push(batch);
            }
        } else {
            result.pending = true;
        }

        Ok(result)
    }

    /// Batch timer expiry. A no-op on an empty batch.
    pub fn timer_fired(&mut self) -> Option<Batch> {
        let batch = self.cut();
        if let Some(batch) = &batch {
            tracing::debug!("Batch timer expired, cut {} envelopes", batch.len());
        }
        batch
    }

    /// Finalize the pending batch, if any
    pub fn cut(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending_bytes = 0;
        self.pending_since = None;
        Some(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.max_message_count),
        ))
    }

    /// When the pending batch must be cut, if there is one
    pub fn deadline(&self) -> Option<Instant> {
        self.pending_since.map(|since| since + self.config.timeout)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }
}

fn is_configuration(envelope: &Envelope) -> bool {
    envelope
        .open()
        .map(|m| m.message_type == MessageType::Configuration)
        .unwrap_or(false)
}
