//! Persistent block storage
//!
//! Uses sled embedded database. Blocks are keyed by big-endian number so
//! the tree iterates in chain order, and every append is flushed before it
//! is acknowledged.

use crate::{BlockStore, LedgerError};
use orderer_types::Block;
use sled::Db;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct FileStore {
    /// Sled database instance
    db: Db,
    /// Blocks tree
    blocks: sled::Tree,
    /// Cached height
    height: AtomicU64,
}

impl FileStore {
    /// Open or create a block store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = sled::open(&path)?;
        let blocks = db.open_tree("blocks")?;

        let height = match blocks.last()? {
            Some((key, _)) => decode_key(&key) + 1,
            None => 0,
        };

        tracing::info!("Opened file ledger at {:?} (height {})", path.as_ref(), height);

        Ok(Self {
            db,
            blocks,
            height: AtomicU64::new(height),
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_key(key: &[u8]) -> u64 {
    let arr: [u8; 8] = key.try_into().unwrap_or([0u8; 8]);
    u64::from_be_bytes(arr)
}

impl BlockStore for FileStore {
    fn append(&self, block: &Block) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(block)?;
        self.blocks.insert(block.number.to_be_bytes(), bytes)?;
        self.flush()?;
        self.height.store(block.number + 1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, number: u64) -> Result<Option<Block>, LedgerError> {
        match self.blocks.get(number.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    fn oldest(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_types::{BlockMetadata, ZERO_HASH};
    use tempfile::tempdir;

    #[test]
    fn test_store_and_reopen() {
        let dir = tempdir().unwrap();
        let block = Block::new(
            0,
            ZERO_HASH,
            vec![vec![1, 2, 3]],
            BlockMetadata { last_offset: Some(9) },
        );

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.append(&block).unwrap();
            assert_eq!(store.height(), 1);
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.height(), 1);
        assert_eq!(store.get(0).unwrap(), Some(block));
        assert!(store.get(1).unwrap().is_none());
    }
}
