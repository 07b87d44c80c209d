//! Ledger - append-only block log
//!
//! This crate provides the block store shared by every consenter:
//! - A hash-chain checked `Ledger` with a single writer
//! - Cursors that block (without polling) until the next block exists
//! - RAM (bounded history) and file (sled) backends

pub mod error;
pub mod file;
pub mod ledger;
pub mod ram;

pub use error::LedgerError;
pub use file::FileStore;
pub use ledger::{Cursor, Ledger};
pub use ram::RamStore;

use orderer_types::Block;

/// Backend storage for a ledger.
///
/// Implementations only store and fetch; ordering and hash-chain checks
/// are done by [`Ledger`].
pub trait BlockStore: Send + Sync {
    /// Persist a block. The caller guarantees `block.number == self.height()`.
    fn append(&self, block: &Block) -> Result<(), LedgerError>;

    /// Fetch a block; `None` if it was never written or has been evicted
    fn get(&self, number: u64) -> Result<Option<Block>, LedgerError>;

    /// Number of the next block to be written
    fn height(&self) -> u64;

    /// Number of the oldest block still retained
    fn oldest(&self) -> u64;
}
