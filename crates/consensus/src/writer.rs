//! Block assembly shared by every consenter
//!
//! Consenters differ only in how they discover order; once a batch is cut
//! it goes through the same path: build the block, append it, and apply it
//! if it is a configuration block.

use crate::blockcutter::Batch;
use orderer_configtx::ConfigManager;
use orderer_ledger::{Ledger, LedgerError};
use orderer_types::{BlockMetadata, ConfigurationEnvelope, Envelope};
use std::sync::Arc;

#[derive(Clone)]
pub struct BlockWriter {
    ledger: Ledger,
    config: Arc<ConfigManager>,
}

impl BlockWriter {
    pub fn new(ledger: Ledger, config: Arc<ConfigManager>) -> Self {
        Self { ledger, config }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// Number the next written block will get
    pub fn next_block_number(&self) -> u64 {
        self.ledger.height()
    }

    /// Metadata of the newest block
    pub fn last_metadata(&self) -> Result<BlockMetadata, LedgerError> {
        Ok(self.ledger.last_block()?.metadata)
    }

    /// Re-check an envelope at ordering time.
    ///
    /// Configuration envelopes were validated at submission, but another
    /// configuration may have been ordered since; stale ones are dropped
    /// here so every consenter reading the same order drops the same ones.
    pub fn admit(&self, envelope: &Envelope) -> bool {
        let Some(config) = ConfigurationEnvelope::from_envelope(envelope) else {
            return true;
        };
        match self.config.validate(&config) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Discarding configuration sequence {} at ordering time: {}",
                    config.sequence,
                    e
                );
                false
            }
        }
    }

    /// Append a cut batch as the next block. Returns the block number.
    pub fn write_batch(&self, batch: Batch, metadata: BlockMetadata) -> Result<u64, LedgerError> {
        let config = match batch.as_slice() {
            [only] => ConfigurationEnvelope::from_envelope(only),
            _ => None,
        };

        let transactions = batch.iter().map(Envelope::to_bytes).collect();
        let block = self.ledger.next_block(transactions, metadata);
        let number = self.ledger.append(block)?;

        tracing::info!("Wrote block {} with {} envelopes", number, batch.len());

        if let Some(config) = config {
            if let Err(e) = self.config.apply(&config) {
                tracing::error!(
                    "Configuration in block {} failed to apply: {}",
                    number,
                    e
                );
            }
        }

        Ok(number)
    }
}
