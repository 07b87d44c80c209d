//! Configuration transaction types

use crate::message::{Envelope, Message, MessageType};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// The closed set of configuration item kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum ConfigurationType {
    /// Named policies; value is a borsh-encoded [`Policy`]
    Policy,
    /// Channel-wide parameters, opaque to the orderer
    ChannelParameters,
    /// Orderer parameters (batch size, ingress policy, ...)
    Orderer,
}

/// A single keyed configuration value
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ConfigurationItem {
    pub chain_id: String,
    pub config_type: ConfigurationType,
    pub key: String,
    /// Sequence number of the configuration that last changed this item
    pub last_modified: u64,
    /// Name of the policy that must be satisfied to change this item
    pub modification_policy: String,
    pub value: Vec<u8>,
}

impl ConfigurationItem {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ConfigurationItem serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ConfigSignature {
    pub identity: Vec<u8>,
    pub signature: Vec<u8>,
}

/// A serialized item plus the signatures endorsing it
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SignedConfigurationItem {
    pub item: Vec<u8>,
    pub signatures: Vec<ConfigSignature>,
}

impl SignedConfigurationItem {
    pub fn unsigned(item: &ConfigurationItem) -> Self {
        Self {
            item: item.to_bytes(),
            signatures: Vec::new(),
        }
    }

    pub fn decode(&self) -> Result<ConfigurationItem, borsh::io::Error> {
        ConfigurationItem::from_bytes(&self.item)
    }
}

/// A complete replacement configuration for a chain
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ConfigurationEnvelope {
    pub sequence: u64,
    pub chain_id: String,
    pub items: Vec<SignedConfigurationItem>,
}

impl ConfigurationEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ConfigurationEnvelope serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }

    /// Wrap into a CONFIGURATION envelope. Authorization is carried by the
    /// per-item signatures, so the outer signature may be empty.
    pub fn into_envelope(&self, creator: Vec<u8>, signature: Vec<u8>) -> Envelope {
        let message = Message::new(MessageType::Configuration, creator, self.to_bytes());
        Envelope::new(&message, signature)
    }

    /// Extract a configuration envelope from an envelope, if it carries one
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let message = envelope.open().ok()?;
        if message.message_type != MessageType::Configuration {
            return None;
        }
        Self::from_bytes(&message.payload).ok()
    }
}

/// Signature rule over the identities listed in a [`SignaturePolicyEnvelope`]
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum SignaturePolicy {
    /// Satisfied if the identity at this index signed
    SignedBy(u32),
    /// Satisfied if at least `n` of the sub-rules are
    NOutOf { n: u32, rules: Vec<SignaturePolicy> },
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SignaturePolicyEnvelope {
    pub identities: Vec<Vec<u8>>,
    pub rule: SignaturePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum Policy {
    Signature(SignaturePolicyEnvelope),
}

impl Policy {
    /// 0-of-0: satisfied by anyone, including no signatures at all
    pub fn accept_all() -> Self {
        Policy::Signature(SignaturePolicyEnvelope {
            identities: Vec::new(),
            rule: SignaturePolicy::NOutOf {
                n: 0,
                rules: Vec::new(),
            },
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Policy serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_envelope_only_matches_configuration() {
        let config = ConfigurationEnvelope {
            sequence: 0,
            chain_id: "c".into(),
            items: Vec::new(),
        };
        let env = config.into_envelope(Vec::new(), Vec::new());
        assert_eq!(ConfigurationEnvelope::from_envelope(&env), Some(config.clone()));

        let tx = Envelope::new(
            &Message::new(MessageType::Transaction, Vec::new(), config.to_bytes()),
            Vec::new(),
        );
        assert_eq!(ConfigurationEnvelope::from_envelope(&tx), None);
    }
}
