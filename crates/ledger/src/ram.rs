//! In-memory block storage with a bounded history

use crate::{BlockStore, LedgerError};
use orderer_types::Block;
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Keeps at most `history_size` of the most recent blocks.
///
/// Older blocks are dropped from the front as new ones arrive, so a reader
/// that falls too far behind will find its next block gone.
pub struct RamStore {
    blocks: RwLock<VecDeque<Block>>,
    history_size: usize,
}

impl RamStore {
    /// Create an empty store; a history size of 0 is treated as 1
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            blocks: RwLock::new(VecDeque::with_capacity(history_size.min(1024))),
            history_size,
        }
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Number of blocks currently retained
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockStore for RamStore {
    fn append(&self, block: &Block) -> Result<(), LedgerError> {
        let mut blocks = self.blocks.write();
        blocks.push_back(block.clone());
        while blocks.len() > self.history_size {
            if let Some(evicted) = blocks.pop_front() {
                tracing::trace!("Evicted block {} from RAM ledger", evicted.number);
            }
        }
        Ok(())
    }

    fn get(&self, number: u64) -> Result<Option<Block>, LedgerError> {
        let blocks = self.blocks.read();
        let Some(front) = blocks.front() else {
            return Ok(None);
        };
        if number < front.number {
            return Ok(None);
        }
        Ok(blocks.get((number - front.number) as usize).cloned())
    }

    fn height(&self) -> u64 {
        self.blocks.read().back().map(|b| b.number + 1).unwrap_or(0)
    }

    fn oldest(&self) -> u64 {
        self.blocks.read().front().map(|b| b.number).unwrap_or(0)
    }
}
