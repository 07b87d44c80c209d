//! Configuration transactions
//!
//! Validates and applies configuration envelopes under policy control:
//! - `ConfigManager` holds the active chain configuration and swaps it
//!   atomically on every accepted update
//! - Each configuration type is handled by a fixed `ConfigHandler` variant
//! - Policies are signature rules checked through a `SignatureVerifier`

pub mod bootstrap;
pub mod crypto;
pub mod error;
pub mod handler;
pub mod manager;
pub mod policies;

pub use bootstrap::{GenesisProvider, StaticBootstrapper};
pub use crypto::{Ed25519Verifier, SignatureVerifier, VerifyError};
pub use error::ConfigError;
pub use handler::ConfigHandler;
pub use manager::{retrieve_configuration, ChainConfig, ConfigManager};
pub use policies::PolicySet;

/// Policy every generated genesis configuration carries; satisfied by anyone
pub const ACCEPT_ALL_POLICY: &str = "AcceptAllPolicy";

/// Policy governing items that do not exist yet
pub const DEFAULT_MODIFICATION_POLICY: &str = "DefaultModificationPolicy";

/// Orderer item naming the policy transactions must satisfy
pub const INGRESS_POLICY_KEY: &str = "IngressPolicy";
