//! Envelopes and messages

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Protocol message kinds. Only `Transaction` and `Configuration` are
/// accepted for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum MessageType {
    Undefined,
    Discovery,
    Sync,
    Proposal,
    ProposalResult,
    Transaction,
    Configuration,
}

/// Typed payload carried inside an envelope
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    pub version: u32,
    /// Unix millis at creation
    pub timestamp: i64,
    /// Serialized identity of the signer (an ed25519 public key)
    pub creator: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(message_type: MessageType, creator: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            version: 1,
            timestamp: chrono::Utc::now().timestamp_millis(),
            creator,
            payload,
        }
    }

    /// Replace the creation time, for messages whose bytes must be reproducible
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Message serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Signed wrapper around a serialized [`Message`].
///
/// The signature covers `message` exactly as stored, so the message is kept
/// in serialized form and only decoded on demand.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Envelope {
    pub fn new(message: &Message, signature: Vec<u8>) -> Self {
        Self {
            message: message.to_bytes(),
            signature,
        }
    }

    /// Decode the wrapped message
    pub fn open(&self) -> Result<Message, borsh::io::Error> {
        Message::from_bytes(&self.message)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Envelope serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }

    /// Size of the envelope as it will be stored in a block
    pub fn encoded_len(&self) -> usize {
        // two u32 length prefixes
        8 + self.message.len() + self.signature.len()
    }
}
