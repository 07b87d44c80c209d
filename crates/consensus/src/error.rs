//! Consenter errors

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

/// Rejections from the batch cutter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CutterError {
    #[error("Envelope of {size} bytes exceeds the {max} byte limit")]
    Oversized { size: usize, max: usize },
}

/// Why a consenter did not accept an envelope for ordering
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Ordering queue is full")]
    QueueFull,

    #[error("Ordering unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Rejected(#[from] CutterError),
}

impl OrderError {
    /// Whether the client should back off and resubmit
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OrderError::Rejected(_))
    }
}

/// Replicated log failures. Also sent over the wire by the broker server.
#[derive(Error, Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BrokerError {
    #[error("Log unavailable: {0}")]
    Unavailable(String),

    #[error("Consumer disconnected")]
    Disconnected,

    #[error("Offset {offset} is beyond the log head {head}")]
    OffsetOutOfRange { offset: u64, head: u64 },

    #[error("Broker protocol error: {0}")]
    Protocol(String),
}
