//! Ledger errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Block encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Block {got} appended out of order, expected {expected}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("Block {0} does not link to the previous block hash")]
    HashMismatch(u64),

    #[error("Block {0} is not available")]
    NotFound(u64),

    #[error("Genesis block must be block 0, got {0}")]
    InvalidGenesis(u64),

    #[error("Stored genesis block does not match the configured one")]
    GenesisMismatch,

    #[error("Ledger is closed")]
    Closed,
}
