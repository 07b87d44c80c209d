//! Deliver sessions
//!
//! A session owns one ledger cursor and a flow-control window. Blocks are
//! released up to `window_size` past the seek start or the last
//! acknowledged block, whichever is later.

use orderer_ledger::{Cursor, Ledger, LedgerError};
use orderer_types::{Block, DeliverUpdate, SeekInfo, Status};

pub struct DeliverSession {
    ledger: Ledger,
    max_window_size: u64,
    cursor: Option<Cursor>,
    /// First block number not yet covered by an acknowledgement
    base: u64,
    window: u64,
}

/// What the transport should do after [`DeliverSession::next`]
#[derive(Debug)]
pub enum DeliverEvent {
    Block(Block),
    /// Send the status; the cursor has been dropped
    Status(Status),
}

impl DeliverSession {
    pub fn new(ledger: Ledger, max_window_size: u64) -> Self {
        Self {
            ledger,
            max_window_size,
            cursor: None,
            base: 0,
            window: 0,
        }
    }

    /// Apply a client frame. Returns a status to report, if any.
    pub fn update(&mut self, update: DeliverUpdate) -> Option<Status> {
        match update {
            DeliverUpdate::Seek(info) => self.seek(info),
            DeliverUpdate::Acknowledgement(number) => {
                if self.cursor.is_none() {
                    return Some(Status::BadRequest);
                }
                self.base = self.base.max(number.saturating_add(1));
                None
            }
        }
    }

    fn seek(&mut self, info: SeekInfo) -> Option<Status> {
        if info.window_size == 0 || info.window_size > self.max_window_size {
            tracing::debug!(
                "Rejecting window of {} (max {})",
                info.window_size,
                self.max_window_size
            );
            return Some(Status::BadRequest);
        }

        match self.ledger.iterator(info.start) {
            Ok(cursor) => {
                tracing::debug!(
                    "Deliver seek to {:?} resolved to block {}",
                    info.start,
                    cursor.position()
                );
                self.base = cursor.position();
                self.window = info.window_size;
                self.cursor = Some(cursor);
                None
            }
            Err(LedgerError::NotFound(n)) => {
                tracing::debug!("Deliver seek to missing block {}", n);
                self.cursor = None;
                Some(Status::NotFound)
            }
            Err(e) => {
                tracing::warn!("Deliver seek failed: {}", e);
                self.cursor = None;
                Some(Status::ServiceUnavailable)
            }
        }
    }

    /// Whether another block may be sent now
    pub fn can_send(&self) -> bool {
        match &self.cursor {
            Some(cursor) => cursor.position() < self.base.saturating_add(self.window),
            None => false,
        }
    }

    /// Wait for the next block inside the window.
    ///
    /// Only call while [`DeliverSession::can_send`] is true; otherwise this
    /// never resolves.
    pub async fn next(&mut self) -> DeliverEvent {
        if !self.can_send() {
            return std::future::pending().await;
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return std::future::pending().await;
        };

        let (block, status) = cursor.next_block().await;
        match (block, status) {
            (Some(block), _) => DeliverEvent::Block(block),
            (None, status) => {
                self.cursor = None;
                DeliverEvent::Status(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_types::{BlockMetadata, SeekPosition, ZERO_HASH};
    use std::time::Duration;

    fn ledger(blocks: u64) -> Ledger {
        let genesis = Block::new(0, ZERO_HASH, vec![b"genesis".to_vec()], BlockMetadata::default());
        let ledger = Ledger::ram(100, genesis).unwrap();
        for n in 1..blocks {
            let block = ledger.next_block(vec![n.to_le_bytes().to_vec()], BlockMetadata::default());
            ledger.append(block).unwrap();
        }
        ledger
    }

    fn seek(start: SeekPosition, window_size: u64) -> DeliverUpdate {
        DeliverUpdate::Seek(SeekInfo { start, window_size })
    }

    async fn next_number(session: &mut DeliverSession) -> u64 {
        match tokio::time::timeout(Duration::from_secs(2), session.next()).await.unwrap() {
            DeliverEvent::Block(block) => block.number,
            DeliverEvent::Status(status) => panic!("unexpected status {:?}", status),
        }
    }

    #[tokio::test]
    async fn test_window_limits_unacknowledged_blocks() {
        let mut session = DeliverSession::new(ledger(6), 10);
        assert_eq!(session.update(seek(SeekPosition::Oldest, 2)), None);

        assert_eq!(next_number(&mut session).await, 0);
        assert_eq!(next_number(&mut session).await, 1);
        assert!(!session.can_send());

        assert_eq!(session.update(DeliverUpdate::Acknowledgement(0)), None);
        assert!(session.can_send());
        assert_eq!(next_number(&mut session).await, 2);
        assert!(!session.can_send());

        // Acknowledging older blocks again does not widen the window
        session.update(DeliverUpdate::Acknowledgement(0));
        assert!(!session.can_send());
    }

    #[tokio::test]
    async fn test_bad_windows_and_seeks() {
        let mut session = DeliverSession::new(ledger(3), 10);
        assert_eq!(session.update(seek(SeekPosition::Oldest, 0)), Some(Status::BadRequest));
        assert_eq!(session.update(seek(SeekPosition::Oldest, 11)), Some(Status::BadRequest));
        assert_eq!(session.update(DeliverUpdate::Acknowledgement(1)), Some(Status::BadRequest));
        assert_eq!(
            session.update(seek(SeekPosition::Specified(9), 1)),
            Some(Status::NotFound)
        );
        assert!(!session.can_send());
    }

    #[tokio::test]
    async fn test_specified_seek_is_repeatable() {
        let ledger = ledger(4);
        let mut first = DeliverSession::new(ledger.clone(), 10);
        let mut second = DeliverSession::new(ledger, 10);
        first.update(seek(SeekPosition::Specified(2), 10));
        second.update(seek(SeekPosition::Specified(2), 10));

        let a = match first.next().await {
            DeliverEvent::Block(block) => block,
            other => panic!("{:?}", other),
        };
        let b = match second.next().await {
            DeliverEvent::Block(block) => block,
            other => panic!("{:?}", other),
        };
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.number, 2);
    }

    #[tokio::test]
    async fn test_newest_waits_then_closed_ledger_ends_stream() {
        let ledger = ledger(2);
        let mut session = DeliverSession::new(ledger.clone(), 10);
        session.update(seek(SeekPosition::Newest, 10));
        assert_eq!(next_number(&mut session).await, 1);

        let appender = ledger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let block = appender.next_block(vec![b"late".to_vec()], BlockMetadata::default());
            appender.append(block).unwrap();
        });
        assert_eq!(next_number(&mut session).await, 2);

        let closer = ledger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });
        match tokio::time::timeout(Duration::from_secs(2), session.next()).await.unwrap() {
            DeliverEvent::Status(status) => assert_eq!(status, Status::ServiceUnavailable),
            DeliverEvent::Block(block) => panic!("unexpected block {}", block.number),
        }
        assert!(!session.can_send());
    }
}
