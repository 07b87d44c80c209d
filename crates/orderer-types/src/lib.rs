//! Shared types for the ordering service
//!
//! Everything that crosses a component or process boundary lives here:
//! - Envelopes and the messages they wrap
//! - Blocks and their hash chain
//! - Configuration envelopes and signature policies
//! - Atomic broadcast request/response frames

pub mod ab;
pub mod block;
pub mod config;
pub mod message;

pub use ab::{BroadcastResponse, DeliverResponse, DeliverUpdate, SeekInfo, SeekPosition, Status};
pub use block::{Block, BlockHash, BlockMetadata, ZERO_HASH};
pub use config::{
    ConfigSignature, ConfigurationEnvelope, ConfigurationItem, ConfigurationType, Policy,
    SignaturePolicy, SignaturePolicyEnvelope, SignedConfigurationItem,
};
pub use message::{Envelope, Message, MessageType};

/// Chain id used when none is configured
pub const DEFAULT_CHAIN_ID: &str = "testchainid";
