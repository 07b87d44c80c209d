//! Atomic broadcast frames

use crate::block::Block;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Result code for broadcast submissions and delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum Status {
    Success,
    BadRequest,
    NotFound,
    ServiceUnavailable,
}

impl Status {
    /// HTTP-style numeric code
    pub fn code(&self) -> u16 {
        match self {
            Status::Success => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::ServiceUnavailable => 503,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum SeekPosition {
    Oldest,
    Newest,
    Specified(u64),
}

/// Where a Deliver stream starts and how many unacknowledged blocks it may
/// carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SeekInfo {
    pub start: SeekPosition,
    pub window_size: u64,
}

/// Client frame on a Deliver stream
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum DeliverUpdate {
    Seek(SeekInfo),
    Acknowledgement(u64),
}

impl DeliverUpdate {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("DeliverUpdate serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Server frame on a Deliver stream
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum DeliverResponse {
    Block(Block),
    Status(Status),
}

impl DeliverResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("DeliverResponse serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Server frame on a Broadcast stream, one per submitted envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: Status,
}

impl BroadcastResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("BroadcastResponse serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

