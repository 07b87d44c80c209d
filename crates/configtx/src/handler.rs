//! Per-type configuration handlers

use crate::policies::validate_policy;
use crate::{ConfigError, PolicySet};
use orderer_types::{ConfigurationItem, ConfigurationType, Policy};

/// Handler variant for a configuration type.
///
/// Policies get parsed and staged into the next policy set; every other
/// type is opaque bytes validated elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigHandler {
    Policy,
    Bytes,
}

impl ConfigHandler {
    pub fn for_type(config_type: ConfigurationType) -> Self {
        match config_type {
            ConfigurationType::Policy => ConfigHandler::Policy,
            ConfigurationType::ChannelParameters | ConfigurationType::Orderer => ConfigHandler::Bytes,
        }
    }

    /// Validate an item and stage its effects into `staged`
    pub fn propose(&self, item: &ConfigurationItem, staged: &mut PolicySet) -> Result<(), ConfigError> {
        match self {
            ConfigHandler::Policy => {
                let policy = Policy::from_bytes(&item.value).map_err(|e| ConfigError::InvalidPolicy {
                    name: item.key.clone(),
                    reason: e.to_string(),
                })?;
                validate_policy(&item.key, &policy)?;
                staged.insert(item.key.clone(), policy);
                Ok(())
            }
            ConfigHandler::Bytes => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(config_type: ConfigurationType, value: Vec<u8>) -> ConfigurationItem {
        ConfigurationItem {
            chain_id: "c".into(),
            config_type,
            key: "k".into(),
            last_modified: 0,
            modification_policy: String::new(),
            value,
        }
    }

    #[test]
    fn test_policy_handler_stages_policy() {
        let mut staged = PolicySet::new();
        ConfigHandler::for_type(ConfigurationType::Policy)
            .propose(&item(ConfigurationType::Policy, Policy::accept_all().to_bytes()), &mut staged)
            .unwrap();
        assert!(staged.get("k").is_some());
    }

    #[test]
    fn test_policy_handler_rejects_garbage() {
        let mut staged = PolicySet::new();
        let result = ConfigHandler::for_type(ConfigurationType::Policy)
            .propose(&item(ConfigurationType::Policy, vec![0xde, 0xad]), &mut staged);
        assert!(result.is_err());
        assert!(staged.is_empty());
    }

    #[test]
    fn test_bytes_handler_accepts_anything() {
        let mut staged = PolicySet::new();
        ConfigHandler::for_type(ConfigurationType::Orderer)
            .propose(&item(ConfigurationType::Orderer, vec![0xde, 0xad]), &mut staged)
            .unwrap();
        assert!(staged.is_empty());
    }
}
