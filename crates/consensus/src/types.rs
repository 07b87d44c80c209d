//! Core types for consenters

use crate::broker::PartitionId;
use orderer_types::DEFAULT_CHAIN_ID;
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Lifecycle of a consenter's ordering task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsenterState {
    /// Opening the replicated log
    Connecting,
    /// Replaying log entries written before the consumer attached
    CatchingUp,
    /// Steady state: consume, cut, append
    Live,
    /// Lost the log; will resume from the last processed offset
    Reconnecting,
    /// A block could not be written; no further appends
    Halted,
    Shutdown,
}

impl ConsenterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsenterState::Connecting => "connecting",
            ConsenterState::CatchingUp => "catching_up",
            ConsenterState::Live => "live",
            ConsenterState::Reconnecting => "reconnecting",
            ConsenterState::Halted => "halted",
            ConsenterState::Shutdown => "shutdown",
        }
    }

    /// Whether the consenter can still order new envelopes
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsenterState::Halted | ConsenterState::Shutdown)
    }
}

impl fmt::Display for ConsenterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block size and timing limits
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Cut as soon as a batch holds this many envelopes
    pub max_message_count: usize,
    /// Envelopes larger than this are rejected outright
    pub absolute_max_bytes: usize,
    /// Soft cap on batch size; a single larger envelope gets a block alone
    pub preferred_max_bytes: usize,
    /// Cut a non-empty batch this long after its first envelope
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_message_count: 10,
            absolute_max_bytes: 10 * 1024 * 1024,
            preferred_max_bytes: 512 * 1024,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before reporting degraded
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.initial_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        let jitter_ms = (base.as_millis() as u64) / 10;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        (base + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

/// Configuration for the single-process consenter
#[derive(Debug, Clone)]
pub struct SoloConfig {
    /// Capacity of the ordering queue; submissions beyond it are refused
    pub queue_size: usize,
    pub batch: BatchConfig,
}

impl Default for SoloConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            batch: BatchConfig::default(),
        }
    }
}

/// Configuration for the replicated-log consenter
#[derive(Debug, Clone)]
pub struct ReplicatedConfig {
    pub partition: PartitionId,
    /// Capacity of the publish queue
    pub queue_size: usize,
    pub batch: BatchConfig,
    pub publish_retry: RetryPolicy,
    /// Pause before reattaching a lost consumer
    pub reconnect_delay: Duration,
}

impl Default for ReplicatedConfig {
    fn default() -> Self {
        Self {
            partition: PartitionId::for_chain(DEFAULT_CHAIN_ID),
            queue_size: 1000,
            batch: BatchConfig::default(),
            publish_retry: RetryPolicy::default(),
            reconnect_delay: Duration::from_millis(500),
        }
    }
}
