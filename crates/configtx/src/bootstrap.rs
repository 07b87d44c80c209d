//! Genesis block construction

use crate::{ConfigError, ACCEPT_ALL_POLICY, DEFAULT_MODIFICATION_POLICY};
use orderer_types::{
    Block, BlockMetadata, ConfigurationEnvelope, ConfigurationItem, ConfigurationType, Envelope,
    Message, MessageType, Policy, SignedConfigurationItem, ZERO_HASH,
};

/// Supplies block 0 of a chain
pub trait GenesisProvider {
    fn genesis_block(&self) -> Result<Block, ConfigError>;
}

/// Builds a genesis block from static settings.
///
/// The block holds a single configuration transaction at sequence 0 with
/// permissive default policies and any orderer parameters supplied.
#[derive(Debug, Clone)]
pub struct StaticBootstrapper {
    chain_id: String,
    policies: Vec<(String, Policy)>,
    orderer_values: Vec<(String, Vec<u8>)>,
}

impl StaticBootstrapper {
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            policies: vec![
                (ACCEPT_ALL_POLICY.to_string(), Policy::accept_all()),
                (DEFAULT_MODIFICATION_POLICY.to_string(), Policy::accept_all()),
            ],
            orderer_values: Vec::new(),
        }
    }

    /// Add or replace a named policy
    pub fn with_policy(mut self, name: &str, policy: Policy) -> Self {
        self.policies.retain(|(n, _)| n != name);
        self.policies.push((name.to_string(), policy));
        self
    }

    /// Record an orderer parameter in the genesis configuration
    pub fn with_orderer_value(mut self, key: &str, value: Vec<u8>) -> Self {
        self.orderer_values.push((key.to_string(), value));
        self
    }

    pub fn config_envelope(&self) -> ConfigurationEnvelope {
        let policies = self.policies.iter().map(|(name, policy)| {
            self.item(ConfigurationType::Policy, name, policy.to_bytes())
        });
        let values = self
            .orderer_values
            .iter()
            .map(|(key, value)| self.item(ConfigurationType::Orderer, key, value.clone()));

        ConfigurationEnvelope {
            sequence: 0,
            chain_id: self.chain_id.clone(),
            items: policies
                .chain(values)
                .map(|item| SignedConfigurationItem::unsigned(&item))
                .collect(),
        }
    }

    fn item(&self, config_type: ConfigurationType, key: &str, value: Vec<u8>) -> ConfigurationItem {
        ConfigurationItem {
            chain_id: self.chain_id.clone(),
            config_type,
            key: key.to_string(),
            last_modified: 0,
            modification_policy: DEFAULT_MODIFICATION_POLICY.to_string(),
            value,
        }
    }
}

impl GenesisProvider for StaticBootstrapper {
    fn genesis_block(&self) -> Result<Block, ConfigError> {
        // Block 0 depends only on the settings
        let message = Message::new(
            MessageType::Configuration,
            Vec::new(),
            self.config_envelope().to_bytes(),
        )
        .with_timestamp(0);
        let envelope = Envelope::new(&message, Vec::new());
        Ok(Block::new(
            0,
            ZERO_HASH,
            vec![envelope.to_bytes()],
            BlockMetadata::default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_genesis_carries_configuration() {
        let block = StaticBootstrapper::new("chain")
            .with_orderer_value("BatchSize", b"10".to_vec())
            .genesis_block()
            .unwrap();

        assert_eq!(block.number, 0);
        assert_eq!(block.previous_hash, ZERO_HASH);
        assert_eq!(block.transactions.len(), 1);

        let envelope = Envelope::from_bytes(&block.transactions[0]).unwrap();
        let config = ConfigurationEnvelope::from_envelope(&envelope).unwrap();
        assert_eq!(config.sequence, 0);
        assert_eq!(config.chain_id, "chain");
        assert_eq!(config.items.len(), 3);
    }

    #[test]
    fn test_genesis_is_reproducible() {
        let bootstrapper = StaticBootstrapper::new("chain").with_orderer_value("BatchSize", b"10".to_vec());
        let first = bootstrapper.genesis_block().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = StaticBootstrapper::new("chain")
            .with_orderer_value("BatchSize", b"10".to_vec())
            .genesis_block()
            .unwrap();
        assert_eq!(first.hash(), second.hash());

        let other = StaticBootstrapper::new("other").genesis_block().unwrap();
        assert_ne!(first.hash(), other.hash());
    }
}
