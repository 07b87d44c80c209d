//! Hash-chained ledger and its cursors

use crate::{BlockStore, FileStore, LedgerError, RamStore};
use orderer_types::{Block, BlockHash, BlockMetadata, SeekPosition, Status};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::watch;

struct LedgerInner {
    store: Box<dyn BlockStore>,
    /// Hash of the newest block; the append lock
    tip: Mutex<BlockHash>,
    /// Current height, watched by cursors
    height_tx: watch::Sender<u64>,
    closed: AtomicBool,
}

/// Append-only block log.
///
/// Cloning is cheap and every clone refers to the same log. Appends are
/// checked against the hash chain; any number of [`Cursor`]s may read while
/// a single writer appends.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<LedgerInner>,
}

impl Ledger {
    /// Wrap a store, seeding it with `genesis` if it is empty
    pub fn new(store: Box<dyn BlockStore>, genesis: Block) -> Result<Self, LedgerError> {
        if store.height() == 0 {
            if genesis.number != 0 {
                return Err(LedgerError::InvalidGenesis(genesis.number));
            }
            store.append(&genesis)?;
            tracing::info!("Seeded ledger with genesis block {}", hex_prefix(&genesis.hash()));
        } else if let Some(stored) = store.get(0)? {
            if stored.hash() != genesis.hash() {
                tracing::error!(
                    "Stored genesis {} differs from configured genesis {}",
                    hex_prefix(&stored.hash()),
                    hex_prefix(&genesis.hash())
                );
                return Err(LedgerError::GenesisMismatch);
            }
        }

        let height = store.height();
        let last = store
            .get(height - 1)?
            .ok_or(LedgerError::NotFound(height - 1))?;
        let (height_tx, _) = watch::channel(height);

        Ok(Self {
            inner: Arc::new(LedgerInner {
                store,
                tip: Mutex::new(last.hash()),
                height_tx,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// In-memory ledger retaining the last `history_size` blocks
    pub fn ram(history_size: usize, genesis: Block) -> Result<Self, LedgerError> {
        Self::new(Box::new(RamStore::new(history_size)), genesis)
    }

    /// Sled-backed ledger at `path`
    pub fn file<P: AsRef<Path>>(path: P, genesis: Block) -> Result<Self, LedgerError> {
        Self::new(Box::new(FileStore::open(path)?), genesis)
    }

    /// Number of the next block to be appended
    pub fn height(&self) -> u64 {
        self.inner.store.height()
    }

    pub fn last_hash(&self) -> BlockHash {
        *self.inner.tip.lock()
    }

    pub fn get(&self, number: u64) -> Result<Option<Block>, LedgerError> {
        self.inner.store.get(number)
    }

    pub fn last_block(&self) -> Result<Block, LedgerError> {
        let number = self.height() - 1;
        self.get(number)?.ok_or(LedgerError::NotFound(number))
    }

    /// Build the block that would extend the chain right now
    pub fn next_block(&self, transactions: Vec<Vec<u8>>, metadata: BlockMetadata) -> Block {
        let tip = self.inner.tip.lock();
        Block::new(self.inner.store.height(), *tip, transactions, metadata)
    }

    /// Append a block and wake waiting cursors. Returns the block number.
    pub fn append(&self, block: Block) -> Result<u64, LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }

        let mut tip = self.inner.tip.lock();
        let expected = self.inner.store.height();
        if block.number != expected {
            return Err(LedgerError::OutOfOrder {
                expected,
                got: block.number,
            });
        }
        if block.previous_hash != *tip {
            return Err(LedgerError::HashMismatch(block.number));
        }

        self.inner.store.append(&block)?;
        *tip = block.hash();
        drop(tip);

        self.inner.height_tx.send_replace(block.number + 1);
        tracing::debug!(
            "Appended block {} ({} transactions)",
            block.number,
            block.transactions.len()
        );
        Ok(block.number)
    }

    /// Open a cursor at a seek position.
    ///
    /// `Specified(n)` may name the next block to be written, in which case
    /// the cursor waits for it; anything further ahead, or already evicted,
    /// is `NotFound`.
    pub fn iterator(&self, start: SeekPosition) -> Result<Cursor, LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }

        let height = self.height();
        let oldest = self.inner.store.oldest();
        let next = match start {
            SeekPosition::Oldest => oldest,
            SeekPosition::Newest => height - 1,
            SeekPosition::Specified(n) if n < oldest || n > height => {
                return Err(LedgerError::NotFound(n));
            }
            SeekPosition::Specified(n) => n,
        };

        Ok(Cursor {
            inner: self.inner.clone(),
            height_rx: self.inner.height_tx.subscribe(),
            next,
        })
    }

    /// Tear down the ledger. Waiting cursors wake and fail.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.height_tx.send_modify(|_| {});
            tracing::info!("Ledger closed at height {}", self.height());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Reading position in a [`Ledger`]
pub struct Cursor {
    inner: Arc<LedgerInner>,
    height_rx: watch::Receiver<u64>,
    next: u64,
}

impl Cursor {
    /// Number of the block the next successful `next()` returns
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Resolves once the next block exists or the ledger is closed
    pub async fn ready(&mut self) {
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.next < *self.height_rx.borrow_and_update() {
                return;
            }
            if self.height_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Non-blocking fetch of the next block.
    ///
    /// `NotFound` means nothing is available at the position yet (or it was
    /// evicted); `ServiceUnavailable` is terminal.
    pub fn next(&mut self) -> (Option<Block>, Status) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return (None, Status::ServiceUnavailable);
        }
        match self.inner.store.get(self.next) {
            Ok(Some(block)) => {
                self.next += 1;
                (Some(block), Status::Success)
            }
            Ok(None) => (None, Status::NotFound),
            Err(e) => {
                tracing::error!("Failed to read block {}: {}", self.next, e);
                (None, Status::ServiceUnavailable)
            }
        }
    }

    /// Wait for the next block and return it
    pub async fn next_block(&mut self) -> (Option<Block>, Status) {
        self.ready().await;
        self.next()
    }
}

fn hex_prefix(hash: &BlockHash) -> String {
    hash[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_types::ZERO_HASH;
    use std::time::Duration;

    fn genesis() -> Block {
        Block::new(0, ZERO_HASH, vec![b"genesis".to_vec()], BlockMetadata::default())
    }

    fn append_tx(ledger: &Ledger, tx: &[u8]) -> u64 {
        let block = ledger.next_block(vec![tx.to_vec()], BlockMetadata::default());
        ledger.append(block).unwrap()
    }

    #[test]
    fn test_hash_chain_integrity() {
        let ledger = Ledger::ram(100, genesis()).unwrap();
        for i in 0..10u8 {
            append_tx(&ledger, &[i]);
        }

        let mut cursor = ledger.iterator(SeekPosition::Oldest).unwrap();
        let mut prev: Option<Block> = None;
        while let (Some(block), Status::Success) = cursor.next() {
            if let Some(p) = &prev {
                assert_eq!(block.previous_hash, p.hash());
            }
            prev = Some(block);
        }
        assert_eq!(prev.unwrap().number, 10);
    }

    #[test]
    fn test_append_rejects_gap_and_bad_link() {
        let ledger = Ledger::ram(10, genesis()).unwrap();

        let skipping = Block::new(2, ledger.last_hash(), Vec::new(), BlockMetadata::default());
        assert!(matches!(
            ledger.append(skipping),
            Err(LedgerError::OutOfOrder { expected: 1, got: 2 })
        ));

        let unlinked = Block::new(1, [9u8; 32], Vec::new(), BlockMetadata::default());
        assert!(matches!(ledger.append(unlinked), Err(LedgerError::HashMismatch(1))));
        assert_eq!(ledger.height(), 1);
    }

    #[test]
    fn test_seek_positions() {
        let ledger = Ledger::ram(10, genesis()).unwrap();
        append_tx(&ledger, b"a");
        append_tx(&ledger, b"b");

        assert_eq!(ledger.iterator(SeekPosition::Oldest).unwrap().position(), 0);
        assert_eq!(ledger.iterator(SeekPosition::Newest).unwrap().position(), 2);
        assert_eq!(ledger.iterator(SeekPosition::Specified(1)).unwrap().position(), 1);
        assert_eq!(ledger.iterator(SeekPosition::Specified(3)).unwrap().position(), 3);
        assert!(matches!(
            ledger.iterator(SeekPosition::Specified(4)),
            Err(LedgerError::NotFound(4))
        ));
    }

    #[test]
    fn test_evicted_history_is_not_found() {
        let ledger = Ledger::ram(2, genesis()).unwrap();
        append_tx(&ledger, b"a");
        append_tx(&ledger, b"b");

        assert_eq!(ledger.iterator(SeekPosition::Oldest).unwrap().position(), 1);
        assert!(ledger.iterator(SeekPosition::Specified(0)).is_err());
    }

    #[test]
    fn test_specified_reads_are_identical() {
        let ledger = Ledger::ram(10, genesis()).unwrap();
        append_tx(&ledger, b"a");

        let (first, _) = ledger.iterator(SeekPosition::Specified(1)).unwrap().next();
        let (second, _) = ledger.iterator(SeekPosition::Specified(1)).unwrap().next();
        assert_eq!(first.unwrap().to_bytes(), second.unwrap().to_bytes());
    }

    #[tokio::test]
    async fn test_cursor_waits_for_append() {
        let ledger = Ledger::ram(10, genesis()).unwrap();
        let mut cursor = ledger.iterator(SeekPosition::Specified(1)).unwrap();
        assert_eq!(cursor.next().1, Status::NotFound);

        let writer = ledger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            append_tx(&writer, b"late");
        });

        let (block, status) = tokio::time::timeout(Duration::from_secs(2), cursor.next_block())
            .await
            .unwrap();
        assert_eq!(status, Status::Success);
        assert_eq!(block.unwrap().transactions, vec![b"late".to_vec()]);
    }

    #[tokio::test]
    async fn test_close_wakes_cursor() {
        let ledger = Ledger::ram(10, genesis()).unwrap();
        let mut cursor = ledger.iterator(SeekPosition::Specified(1)).unwrap();

        let closer = ledger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let (block, status) = tokio::time::timeout(Duration::from_secs(2), cursor.next_block())
            .await
            .unwrap();
        assert!(block.is_none());
        assert_eq!(status, Status::ServiceUnavailable);
        assert!(matches!(ledger.append(genesis()), Err(LedgerError::Closed)));
    }

    #[test]
    fn test_file_ledger_resumes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = Ledger::file(dir.path(), genesis()).unwrap();
            append_tx(&ledger, b"persisted");
        }

        let ledger = Ledger::file(dir.path(), genesis()).unwrap();
        assert_eq!(ledger.height(), 2);
        let last = ledger.last_block().unwrap();
        assert_eq!(ledger.last_hash(), last.hash());
        assert_eq!(last.transactions, vec![b"persisted".to_vec()]);
    }

    #[test]
    fn test_reopen_rejects_foreign_genesis() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = Ledger::file(dir.path(), genesis()).unwrap();
            append_tx(&ledger, b"persisted");
        }

        let foreign = Block::new(0, ZERO_HASH, vec![b"other chain".to_vec()], BlockMetadata::default());
        assert!(matches!(
            Ledger::file(dir.path(), foreign),
            Err(LedgerError::GenesisMismatch)
        ));
    }
}
