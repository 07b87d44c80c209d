//! Configuration errors

use orderer_ledger::LedgerError;
use orderer_types::{ConfigurationType, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed configuration: {0}")]
    Malformed(String),

    #[error("Configuration for chain {got}, expected {expected}")]
    WrongChain { expected: String, got: String },

    #[error("Configuration sequence {got}, expected {expected}")]
    BadSequence { expected: u64, got: u64 },

    #[error("Item {key} was modified but has last_modified {got}, expected {expected}")]
    BadLastModified { key: String, expected: u64, got: u64 },

    #[error("Item {key} of type {config_type:?} appears more than once")]
    DuplicateItem { config_type: ConfigurationType, key: String },

    #[error("Item {key} of type {config_type:?} missing from new configuration")]
    MissingItem { config_type: ConfigurationType, key: String },

    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    #[error("Policy {0} not satisfied")]
    PolicyNotSatisfied(String),

    #[error("Invalid policy {name}: {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("No configuration transaction found in ledger")]
    NoConfiguration,

    #[error("Ledger scan failed with status {0:?}")]
    Scan(Status),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
