//! Active chain configuration and its update rules

use crate::{
    ConfigError, ConfigHandler, PolicySet, SignatureVerifier, DEFAULT_MODIFICATION_POLICY,
    INGRESS_POLICY_KEY,
};
use orderer_ledger::Ledger;
use orderer_types::{
    ConfigSignature, ConfigurationEnvelope, ConfigurationItem, ConfigurationType, Envelope,
    Message, SeekPosition, Status,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

type ItemKey = (ConfigurationType, String);

/// One accepted configuration: its items and the policies they define
#[derive(Debug, Clone)]
pub struct ChainConfig {
    sequence: u64,
    chain_id: String,
    items: BTreeMap<ItemKey, ConfigurationItem>,
    policies: PolicySet,
}

impl ChainConfig {
    /// Trust a configuration as-is; used for the bootstrap configuration
    fn from_trusted(envelope: &ConfigurationEnvelope) -> Result<Self, ConfigError> {
        let mut items = BTreeMap::new();
        let mut policies = PolicySet::new();

        for signed in &envelope.items {
            let item = decode_item(signed.item.as_slice())?;
            check_chain(&envelope.chain_id, &item.chain_id)?;
            ConfigHandler::for_type(item.config_type).propose(&item, &mut policies)?;
            insert_unique(&mut items, item)?;
        }

        Ok(Self {
            sequence: envelope.sequence,
            chain_id: envelope.chain_id.clone(),
            items,
            policies,
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn item(&self, config_type: ConfigurationType, key: &str) -> Option<&ConfigurationItem> {
        self.items.get(&(config_type, key.to_string()))
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Policy transactions must satisfy, if one is configured
    pub fn ingress_policy(&self) -> Option<&str> {
        self.item(ConfigurationType::Orderer, INGRESS_POLICY_KEY)
            .and_then(|item| std::str::from_utf8(&item.value).ok())
            .filter(|name| !name.is_empty())
    }
}

/// Validates and applies configuration envelopes.
///
/// Readers take a snapshot with [`ConfigManager::current`]; applying a
/// configuration swaps the snapshot in one step, so a reader sees either
/// the old configuration or the new one, never a mix.
pub struct ConfigManager {
    current: watch::Sender<Arc<ChainConfig>>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl ConfigManager {
    /// Start from a known configuration
    pub fn new(
        initial: &ConfigurationEnvelope,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, ConfigError> {
        let config = ChainConfig::from_trusted(initial)?;
        tracing::info!(
            "Configuration manager started for chain {} at sequence {} ({} items)",
            config.chain_id,
            config.sequence,
            config.items.len()
        );
        let (current, _) = watch::channel(Arc::new(config));
        Ok(Self {
            current,
            verifier,
        })
    }

    /// Start from the newest configuration transaction in the ledger
    pub fn bootstrap(ledger: &Ledger, verifier: Arc<dyn SignatureVerifier>) -> Result<Self, ConfigError> {
        let envelope = retrieve_configuration(ledger)?.ok_or(ConfigError::NoConfiguration)?;
        Self::new(&envelope, verifier)
    }

    pub fn current(&self) -> Arc<ChainConfig> {
        self.current.borrow().clone()
    }

    /// Receiver that observes every applied configuration
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChainConfig>> {
        self.current.subscribe()
    }

    pub fn sequence(&self) -> u64 {
        self.current().sequence
    }

    pub fn chain_id(&self) -> String {
        self.current().chain_id.clone()
    }

    pub fn verifier(&self) -> &dyn SignatureVerifier {
        self.verifier.as_ref()
    }

    /// Check a configuration against the active one without applying it
    pub fn validate(&self, envelope: &ConfigurationEnvelope) -> Result<(), ConfigError> {
        self.process(&self.current(), envelope).map(|_| ())
    }

    /// Validate and make a configuration active
    pub fn apply(&self, envelope: &ConfigurationEnvelope) -> Result<Arc<ChainConfig>, ConfigError> {
        let next = Arc::new(self.process(&self.current(), envelope)?);
        self.current.send_replace(next.clone());

        tracing::info!(
            "Applied configuration sequence {} for chain {}",
            next.sequence,
            next.chain_id
        );
        Ok(next)
    }

    /// Check a transaction envelope against the ingress policy
    pub fn authorize_transaction(&self, envelope: &Envelope, message: &Message) -> Result<(), ConfigError> {
        let config = self.current();
        let Some(policy) = config.ingress_policy() else {
            return Ok(());
        };
        let signature = ConfigSignature {
            identity: message.creator.clone(),
            signature: envelope.signature.clone(),
        };
        config
            .policies
            .evaluate(policy, &envelope.message, &[signature], self.verifier.as_ref())
    }

    fn process(
        &self,
        current: &ChainConfig,
        envelope: &ConfigurationEnvelope,
    ) -> Result<ChainConfig, ConfigError> {
        // Sequential only, so old updates cannot be replayed
        let expected = current.sequence + 1;
        if envelope.sequence != expected {
            return Err(ConfigError::BadSequence {
                expected,
                got: envelope.sequence,
            });
        }
        check_chain(&current.chain_id, &envelope.chain_id)?;

        let mut items = BTreeMap::new();
        let mut policies = PolicySet::new();

        for signed in &envelope.items {
            let item = decode_item(signed.item.as_slice())?;
            check_chain(&current.chain_id, &item.chain_id)?;

            let existing = current.items.get(&(item.config_type, item.key.clone()));
            let modified = match existing {
                Some(old) => {
                    old.last_modified != item.last_modified
                        || old.value != item.value
                        || old.modification_policy != item.modification_policy
                }
                None => true,
            };

            if modified {
                if item.last_modified != envelope.sequence {
                    return Err(ConfigError::BadLastModified {
                        key: item.key.clone(),
                        expected: envelope.sequence,
                        got: item.last_modified,
                    });
                }
                let policy = existing
                    .map(|old| old.modification_policy.as_str())
                    .unwrap_or(DEFAULT_MODIFICATION_POLICY);
                current.policies.evaluate(
                    policy,
                    &signed.item,
                    &signed.signatures,
                    self.verifier.as_ref(),
                )?;
            }

            ConfigHandler::for_type(item.config_type).propose(&item, &mut policies)?;
            insert_unique(&mut items, item)?;
        }

        // No implicit deletion
        if let Some((config_type, key)) = current.items.keys().find(|k| !items.contains_key(*k)) {
            return Err(ConfigError::MissingItem {
                config_type: *config_type,
                key: key.clone(),
            });
        }

        Ok(ChainConfig {
            sequence: envelope.sequence,
            chain_id: current.chain_id.clone(),
            items,
            policies,
        })
    }
}

fn decode_item(bytes: &[u8]) -> Result<ConfigurationItem, ConfigError> {
    ConfigurationItem::from_bytes(bytes).map_err(|e| ConfigError::Malformed(e.to_string()))
}

fn check_chain(expected: &str, got: &str) -> Result<(), ConfigError> {
    if expected != got {
        return Err(ConfigError::WrongChain {
            expected: expected.to_string(),
            got: got.to_string(),
        });
    }
    Ok(())
}

fn insert_unique(
    items: &mut BTreeMap<ItemKey, ConfigurationItem>,
    item: ConfigurationItem,
) -> Result<(), ConfigError> {
    let key = (item.config_type, item.key.clone());
    if items.contains_key(&key) {
        return Err(ConfigError::DuplicateItem {
            config_type: item.config_type,
            key: item.key,
        });
    }
    items.insert(key, item);
    Ok(())
}

/// Scan the ledger from the oldest block for configuration transactions.
///
/// Only single-transaction blocks are considered. The scan does not stop
/// early: the newest configuration found wins.
pub fn retrieve_configuration(ledger: &Ledger) -> Result<Option<ConfigurationEnvelope>, ConfigError> {
    let mut cursor = ledger.iterator(SeekPosition::Oldest)?;
    let mut last = None;
    let mut found = 0usize;

    loop {
        let block = match cursor.next() {
            (Some(block), Status::Success) => block,
            (_, Status::NotFound) => break,
            (_, status) => return Err(ConfigError::Scan(status)),
        };

        if block.transactions.len() != 1 {
            continue;
        }
        let Ok(envelope) = Envelope::from_bytes(&block.transactions[0]) else {
            continue;
        };
        if let Some(config) = ConfigurationEnvelope::from_envelope(&envelope) {
            tracing::debug!(
                "Found configuration sequence {} in block {}",
                config.sequence,
                block.number
            );
            found += 1;
            last = Some(config);
        }
    }

    if found > 1 {
        tracing::warn!(
            "Found {} configuration transactions in the ledger, using the newest",
            found
        );
    }

    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests::{identity, sign, signing_key};
    use crate::{Ed25519Verifier, GenesisProvider, StaticBootstrapper, ACCEPT_ALL_POLICY};
    use orderer_types::{
        Block, BlockMetadata, MessageType, Policy, SignaturePolicy, SignaturePolicyEnvelope,
        SignedConfigurationItem, DEFAULT_CHAIN_ID,
    };

    fn verifier() -> Arc<dyn SignatureVerifier> {
        Arc::new(Ed25519Verifier::new())
    }

    fn genesis_config() -> ConfigurationEnvelope {
        StaticBootstrapper::new(DEFAULT_CHAIN_ID).config_envelope()
    }

    fn manager() -> ConfigManager {
        ConfigManager::new(&genesis_config(), verifier()).unwrap()
    }

    /// Next configuration: every current item carried over, plus `extra`
    fn update(manager: &ConfigManager, extra: Vec<SignedConfigurationItem>) -> ConfigurationEnvelope {
        let current = manager.current();
        let mut items: Vec<SignedConfigurationItem> =
            current.items.values().map(SignedConfigurationItem::unsigned).collect();
        items.extend(extra);
        ConfigurationEnvelope {
            sequence: current.sequence + 1,
            chain_id: current.chain_id.clone(),
            items,
        }
    }

    fn item(config_type: ConfigurationType, key: &str, sequence: u64, value: Vec<u8>) -> ConfigurationItem {
        ConfigurationItem {
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            config_type,
            key: key.to_string(),
            last_modified: sequence,
            modification_policy: crate::DEFAULT_MODIFICATION_POLICY.to_string(),
            value,
        }
    }

    fn tx_block(ledger: &Ledger, txs: Vec<Vec<u8>>) {
        let block = ledger.next_block(txs, BlockMetadata::default());
        ledger.append(block).unwrap();
    }

    fn tx_bytes(payload: &[u8]) -> Vec<u8> {
        Envelope::new(&Message::new(MessageType::Transaction, Vec::new(), payload.to_vec()), Vec::new())
            .to_bytes()
    }

    fn config_with_marker(sequence: u64, marker: &str) -> Vec<u8> {
        let mut config = genesis_config();
        config.sequence = sequence;
        config.items.push(SignedConfigurationItem::unsigned(&item(
            ConfigurationType::ChannelParameters,
            "Marker",
            sequence,
            marker.as_bytes().to_vec(),
        )));
        config.into_envelope(Vec::new(), Vec::new()).to_bytes()
    }

    #[test]
    fn test_apply_new_item() {
        let manager = manager();
        let extra = item(ConfigurationType::ChannelParameters, "Param", 1, b"v".to_vec());
        let config = update(&manager, vec![SignedConfigurationItem::unsigned(&extra)]);

        manager.validate(&config).unwrap();
        let applied = manager.apply(&config).unwrap();
        assert_eq!(applied.sequence(), 1);
        assert_eq!(
            manager.current().item(ConfigurationType::ChannelParameters, "Param").unwrap().value,
            b"v".to_vec()
        );
    }

    #[test]
    fn test_rejects_wrong_sequence_and_chain() {
        let manager = manager();

        let mut config = update(&manager, Vec::new());
        config.sequence = 5;
        assert!(matches!(manager.validate(&config), Err(ConfigError::BadSequence { .. })));

        let mut config = update(&manager, Vec::new());
        config.chain_id = "other".into();
        assert!(matches!(manager.validate(&config), Err(ConfigError::WrongChain { .. })));
    }

    #[test]
    fn test_rejects_stale_last_modified() {
        let manager = manager();
        let extra = item(ConfigurationType::Orderer, "BatchSize", 0, b"5".to_vec());
        let config = update(&manager, vec![SignedConfigurationItem::unsigned(&extra)]);
        assert!(matches!(manager.validate(&config), Err(ConfigError::BadLastModified { .. })));
    }

    #[test]
    fn test_rejects_implicit_deletion() {
        let manager = manager();
        let mut config = update(&manager, Vec::new());
        config.items.pop();
        assert!(matches!(manager.validate(&config), Err(ConfigError::MissingItem { .. })));
        assert_eq!(manager.sequence(), 0);
    }

    #[test]
    fn test_modification_policy_enforced() {
        let admin = signing_key(7);
        let manager = manager();

        // Sequence 1: an admin-only policy plus an item it governs
        let admin_policy = Policy::Signature(SignaturePolicyEnvelope {
            identities: vec![identity(&admin)],
            rule: SignaturePolicy::SignedBy(0),
        });
        let mut guarded = item(ConfigurationType::Orderer, "Guarded", 1, b"a".to_vec());
        guarded.modification_policy = "Admins".into();
        let config = update(
            &manager,
            vec![
                SignedConfigurationItem::unsigned(&item(
                    ConfigurationType::Policy,
                    "Admins",
                    1,
                    admin_policy.to_bytes(),
                )),
                SignedConfigurationItem::unsigned(&guarded),
            ],
        );
        manager.apply(&config).unwrap();

        // Unsigned change is rejected
        let mut changed = guarded.clone();
        changed.last_modified = 2;
        changed.value = b"b".to_vec();
        let unsigned = update(&manager, Vec::new());
        let mut unsigned_items: Vec<_> = unsigned
            .items
            .iter()
            .filter(|s| s.decode().unwrap().key != "Guarded")
            .cloned()
            .collect();
        unsigned_items.push(SignedConfigurationItem::unsigned(&changed));
        let attempt = ConfigurationEnvelope {
            items: unsigned_items.clone(),
            ..unsigned.clone()
        };
        assert!(matches!(manager.validate(&attempt), Err(ConfigError::PolicyNotSatisfied(_))));

        // Admin-signed change is accepted
        let bytes = changed.to_bytes();
        let last = unsigned_items.len() - 1;
        unsigned_items[last] = SignedConfigurationItem {
            signatures: vec![ConfigSignature {
                identity: identity(&admin),
                signature: sign(&admin, &bytes),
            }],
            item: bytes,
        };
        let attempt = ConfigurationEnvelope {
            items: unsigned_items,
            ..unsigned
        };
        manager.apply(&attempt).unwrap();
        assert_eq!(manager.sequence(), 2);
    }

    #[test]
    fn test_snapshot_survives_apply() {
        let manager = manager();
        let before = manager.current();
        let config = update(&manager, Vec::new());
        manager.apply(&config).unwrap();

        assert_eq!(before.sequence(), 0);
        assert_eq!(manager.current().sequence(), 1);
        assert!(before.policies().get(ACCEPT_ALL_POLICY).is_some());
    }

    #[test]
    fn test_subscriber_observes_apply() {
        let manager = manager();
        let mut rx = manager.subscribe();
        assert_eq!(rx.borrow_and_update().sequence(), 0);

        // Rejected updates publish nothing
        let mut stale = update(&manager, Vec::new());
        stale.sequence = 5;
        assert!(manager.apply(&stale).is_err());
        assert!(!rx.has_changed().unwrap());

        manager.apply(&update(&manager, Vec::new())).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().sequence(), 1);
    }

    #[test]
    fn test_ingress_policy() {
        let writer = signing_key(3);
        let manager = manager();
        let writers = Policy::Signature(SignaturePolicyEnvelope {
            identities: vec![identity(&writer)],
            rule: SignaturePolicy::SignedBy(0),
        });
        let config = update(
            &manager,
            vec![
                SignedConfigurationItem::unsigned(&item(ConfigurationType::Policy, "Writers", 1, writers.to_bytes())),
                SignedConfigurationItem::unsigned(&item(
                    ConfigurationType::Orderer,
                    INGRESS_POLICY_KEY,
                    1,
                    b"Writers".to_vec(),
                )),
            ],
        );
        manager.apply(&config).unwrap();

        let message = Message::new(MessageType::Transaction, identity(&writer), b"tx".to_vec());
        let bytes = message.to_bytes();
        let good = Envelope::new(&message, sign(&writer, &bytes));
        assert!(manager.authorize_transaction(&good, &message).is_ok());

        let bad = Envelope::new(&message, sign(&signing_key(4), &bytes));
        assert!(manager.authorize_transaction(&bad, &message).is_err());
    }

    #[test]
    fn test_bootstrap_last_config_wins() {
        let genesis = StaticBootstrapper::new(DEFAULT_CHAIN_ID).genesis_block().unwrap();
        let ledger = Ledger::ram(100, genesis).unwrap();

        tx_block(&ledger, vec![tx_bytes(b"1")]);
        tx_block(&ledger, vec![tx_bytes(b"2")]);
        tx_block(&ledger, vec![config_with_marker(1, "A")]);
        tx_block(&ledger, vec![tx_bytes(b"3")]);
        tx_block(&ledger, vec![config_with_marker(2, "B")]);
        tx_block(&ledger, vec![tx_bytes(b"4")]);

        let manager = ConfigManager::bootstrap(&ledger, verifier()).unwrap();
        let config = manager.current();
        assert_eq!(config.sequence(), 2);
        assert_eq!(
            config.item(ConfigurationType::ChannelParameters, "Marker").unwrap().value,
            b"B".to_vec()
        );
    }

    #[test]
    fn test_bootstrap_skips_multi_message_blocks() {
        let genesis = StaticBootstrapper::new(DEFAULT_CHAIN_ID).genesis_block().unwrap();
        let ledger = Ledger::ram(100, genesis).unwrap();
        tx_block(&ledger, vec![config_with_marker(1, "A"), tx_bytes(b"1")]);

        let manager = ConfigManager::bootstrap(&ledger, verifier()).unwrap();
        assert_eq!(manager.sequence(), 0);
        assert!(manager
            .current()
            .item(ConfigurationType::ChannelParameters, "Marker")
            .is_none());
    }

    #[test]
    fn test_bootstrap_without_configuration_fails() {
        let genesis = Block::new(0, orderer_types::ZERO_HASH, vec![tx_bytes(b"0")], BlockMetadata::default());
        let ledger = Ledger::ram(10, genesis).unwrap();
        assert!(matches!(
            ConfigManager::bootstrap(&ledger, verifier()),
            Err(ConfigError::NoConfiguration)
        ));
    }
}
