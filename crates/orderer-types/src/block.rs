//! Blocks and the hash chain

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

pub type BlockHash = [u8; 32];

/// Previous hash of the genesis block
pub const ZERO_HASH: BlockHash = [0u8; 32];

/// Consenter bookkeeping stored next to the block. Not covered by the hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Last replicated-log offset whose effects are fully contained in this
    /// block and its predecessors
    pub last_offset: Option<u64>,
}

/// An immutable, hash-linked group of serialized envelopes
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub previous_hash: BlockHash,
    pub data_hash: BlockHash,
    /// Serialized envelopes in commit order
    pub transactions: Vec<Vec<u8>>,
    pub metadata: BlockMetadata,
}

impl Block {
    pub fn new(
        number: u64,
        previous_hash: BlockHash,
        transactions: Vec<Vec<u8>>,
        metadata: BlockMetadata,
    ) -> Self {
        let data_hash = Self::compute_data_hash(&transactions);
        Self {
            number,
            previous_hash,
            data_hash,
            transactions,
            metadata,
        }
    }

    pub fn compute_data_hash(transactions: &[Vec<u8>]) -> BlockHash {
        let mut hasher = blake3::Hasher::new();
        for tx in transactions {
            hasher.update(&(tx.len() as u64).to_le_bytes());
            hasher.update(tx);
        }
        *hasher.finalize().as_bytes()
    }

    /// Header hash; the next block's `previous_hash` must equal this
    pub fn hash(&self) -> BlockHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.number.to_le_bytes());
        hasher.update(&self.previous_hash);
        hasher.update(&self.data_hash);
        *hasher.finalize().as_bytes()
    }

    /// Check that the stored data hash matches the transactions
    pub fn verify_data_hash(&self) -> bool {
        Self::compute_data_hash(&self.transactions) == self.data_hash
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Block serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}
