//! Ordering consenters
//!
//! Architecture:
//! - Broadcast hands accepted envelopes to a consenter via `order()`
//! - The block cutter groups ordered envelopes into batches
//! - Solo orders in arrival order inside one process
//! - Replicated publishes to a shared log and every orderer consumes the
//!   same log, so all ledgers hold the same blocks

pub mod blockcutter;
pub mod broker;
pub mod broker_net;
pub mod error;
pub mod replicated;
pub mod solo;
pub mod types;
pub mod writer;


pub use blockcutter::{Batch, BlockCutter, CutResult};
pub use broker::{LogBroker, LogConsumer, LogMessage, LogRecord, MemoryBroker, PartitionId};
pub use broker_net::{BrokerServer, RemoteBroker};
pub use error::{BrokerError, CutterError, OrderError};
pub use replicated::ReplicatedConsenter;
pub use solo::SoloConsenter;
pub use types::*;
pub use writer::BlockWriter;

use async_trait::async_trait;
use orderer_types::Envelope;

/// An ordering backend
#[async_trait]
pub trait Consenter: Send + Sync {
    /// Spawn the ordering tasks
    fn start(&self);

    /// Stop ordering; returns once the tasks have exited
    async fn stop(&self);

    /// Hand an envelope over for ordering. Never blocks: a full queue is
    /// reported as [`OrderError::QueueFull`].
    fn order(&self, envelope: Envelope) -> Result<(), OrderError>;

    fn state(&self) -> ConsenterState;

    /// Whether ordering is failing to make progress
    fn is_degraded(&self) -> bool {
        false
    }

    /// Short name used in logs and status output
    fn kind(&self) -> &'static str;
}
