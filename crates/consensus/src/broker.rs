//! Replicated log abstraction
//!
//! A partition is an append-only sequence of opaque records addressed by
//! offset. Every replicated consenter reads the same partition from the
//! same offset, so they observe the same order.

use crate::error::BrokerError;
use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// A single ordered log within the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct PartitionId {
    pub topic: String,
    pub partition: u32,
}

impl PartitionId {
    /// The partition carrying a chain's ordering stream
    pub fn for_chain(chain_id: &str) -> Self {
        Self {
            topic: chain_id.to_string(),
            partition: 0,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// A record read back from the log
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LogRecord {
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// What the consenters write into the log
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum LogMessage {
    /// Written once by each consenter on start; carries no data
    Connect,
    /// A serialized envelope
    Regular(Vec<u8>),
    /// Cut the pending batch as block number N, if it is still pending
    TimeToCut(u64),
}

impl LogMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("LogMessage serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Producer and consumer access to a replicated log
#[async_trait]
pub trait LogBroker: Send + Sync {
    /// Append a record. Returns its offset.
    async fn produce(&self, partition: &PartitionId, payload: Vec<u8>) -> Result<u64, BrokerError>;

    /// Read the partition starting at `offset`
    async fn consume(
        &self,
        partition: &PartitionId,
        offset: u64,
    ) -> Result<Box<dyn LogConsumer>, BrokerError>;

    /// Offset the next produced record will get
    async fn high_watermark(&self, partition: &PartitionId) -> Result<u64, BrokerError>;
}

#[async_trait]
pub trait LogConsumer: Send {
    /// Next record in offset order; waits while the log has nothing new
    async fn recv(&mut self) -> Result<LogRecord, BrokerError>;
}

/// In-process broker.
///
/// Partitions live in memory and are shared by every clone. Availability
/// can be toggled to simulate a broker outage: while unavailable, produce
/// and consume fail and open consumers are disconnected.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    partitions: DashMap<PartitionId, Arc<MemoryPartition>>,
    available: watch::Sender<bool>,
}

struct MemoryPartition {
    records: RwLock<Vec<Vec<u8>>>,
    /// Number of records, bumped after every append
    head: watch::Sender<u64>,
}

impl MemoryPartition {
    fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            head,
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (available, _) = watch::channel(true);
        Self {
            inner: Arc::new(MemoryInner {
                partitions: DashMap::new(),
                available,
            }),
        }
    }

    /// Bring the broker up or down
    pub fn set_available(&self, available: bool) {
        let previous = self.inner.available.send_replace(available);
        if previous != available {
            if available {
                tracing::info!("Memory broker available");
            } else {
                tracing::warn!("Memory broker unavailable");
            }
        }
    }

    pub fn is_available(&self) -> bool {
        *self.inner.available.borrow()
    }

    /// Number of records in a partition
    pub fn len(&self, partition: &PartitionId) -> u64 {
        self.inner
            .partitions
            .get(partition)
            .map(|p| p.records.read().len() as u64)
            .unwrap_or(0)
    }

    fn partition(&self, partition: &PartitionId) -> Arc<MemoryPartition> {
        self.inner
            .partitions
            .entry(partition.clone())
            .or_insert_with(|| Arc::new(MemoryPartition::new()))
            .clone()
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("broker is down".to_string()))
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogBroker for MemoryBroker {
    async fn produce(&self, partition: &PartitionId, payload: Vec<u8>) -> Result<u64, BrokerError> {
        self.check_available()?;
        let part = self.partition(partition);

        let mut records = part.records.write();
        records.push(payload);
        let len = records.len() as u64;
        part.head.send_replace(len);

        Ok(len - 1)
    }

    async fn consume(
        &self,
        partition: &PartitionId,
        offset: u64,
    ) -> Result<Box<dyn LogConsumer>, BrokerError> {
        self.check_available()?;
        let part = self.partition(partition);

        let head = part.records.read().len() as u64;
        if offset > head {
            return Err(BrokerError::OffsetOutOfRange { offset, head });
        }

        Ok(Box::new(MemoryConsumer {
            head_rx: part.head.subscribe(),
            available_rx: self.inner.available.subscribe(),
            partition: part,
            next: offset,
        }))
    }

    async fn high_watermark(&self, partition: &PartitionId) -> Result<u64, BrokerError> {
        self.check_available()?;
        Ok(self.len(partition))
    }
}

struct MemoryConsumer {
    partition: Arc<MemoryPartition>,
    head_rx: watch::Receiver<u64>,
    available_rx: watch::Receiver<bool>,
    next: u64,
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn recv(&mut self) -> Result<LogRecord, BrokerError> {
        loop {
            if !*self.available_rx.borrow_and_update() {
                return Err(BrokerError::Disconnected);
            }

            let _ = self.head_rx.borrow_and_update();
            let record = self.partition.records.read().get(self.next as usize).cloned();
            if let Some(payload) = record {
                let offset = self.next;
                self.next += 1;
                return Ok(LogRecord { offset, payload });
            }

            tokio::select! {
                changed = self.head_rx.changed() => changed.map_err(|_| BrokerError::Disconnected)?,
                changed = self.available_rx.changed() => changed.map_err(|_| BrokerError::Disconnected)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn partition() -> PartitionId {
        PartitionId::for_chain("testchain")
    }

    #[tokio::test]
    async fn test_produce_assigns_sequential_offsets() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.produce(&partition(), vec![1]).await.unwrap(), 0);
        assert_eq!(broker.produce(&partition(), vec![2]).await.unwrap(), 1);
        assert_eq!(broker.high_watermark(&partition()).await.unwrap(), 2);

        let other = PartitionId::for_chain("other");
        assert_eq!(broker.produce(&other, vec![3]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consume_from_offset_and_wait() {
        let broker = MemoryBroker::new();
        for i in 0..3u8 {
            broker.produce(&partition(), vec![i]).await.unwrap();
        }

        let mut consumer = broker.consume(&partition(), 1).await.unwrap();
        assert_eq!(consumer.recv().await.unwrap(), LogRecord { offset: 1, payload: vec![1] });
        assert_eq!(consumer.recv().await.unwrap(), LogRecord { offset: 2, payload: vec![2] });

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.produce(&partition(), vec![9]).await.unwrap();
        });
        let record = tokio::time::timeout(Duration::from_secs(2), consumer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record, LogRecord { offset: 3, payload: vec![9] });
    }

    #[tokio::test]
    async fn test_consume_past_head_rejected() {
        let broker = MemoryBroker::new();
        broker.produce(&partition(), vec![0]).await.unwrap();
        assert_eq!(
            broker.consume(&partition(), 5).await.err(),
            Some(BrokerError::OffsetOutOfRange { offset: 5, head: 1 })
        );
        assert!(broker.consume(&partition(), 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_outage_disconnects_consumers() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consume(&partition(), 0).await.unwrap();

        let toggler = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            toggler.set_available(false);
        });

        let result = tokio::time::timeout(Duration::from_secs(2), consumer.recv())
            .await
            .unwrap();
        assert_eq!(result, Err(BrokerError::Disconnected));
        assert!(matches!(
            broker.produce(&partition(), vec![0]).await,
            Err(BrokerError::Unavailable(_))
        ));

        broker.set_available(true);
        assert_eq!(broker.produce(&partition(), vec![0]).await.unwrap(), 0);
    }

    #[test]
    fn test_log_message_encoding() {
        let msg = LogMessage::TimeToCut(7);
        assert_eq!(LogMessage::from_bytes(&msg.to_bytes()).unwrap(), msg);
        assert!(LogMessage::from_bytes(&[0xff]).is_err());
    }
}
