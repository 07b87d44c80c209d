//! Orderer Configuration

use ab_server::ServerConfig;
use anyhow::Context;
use clap::ValueEnum;
use orderer_consensus::{BatchConfig, PartitionId, ReplicatedConfig, RetryPolicy, SoloConfig};
use orderer_types::DEFAULT_CHAIN_ID;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Ordering backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OrdererType {
    Solo,
    Replicated,
}

/// Ledger backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LedgerType {
    Ram,
    File,
}

/// How block 0 is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenesisMethod {
    Static,
}

/// Orderer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdererConfig {
    pub general: GeneralConfig,
    pub ledger: LedgerConfig,
    pub replicated: ReplicatedSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub orderer_type: OrdererType,
    pub chain_id: String,
    pub listen_address: String,
    /// Broadcast / Deliver WebSocket port
    pub listen_port: u16,
    /// Status API port
    pub http_port: u16,
    pub queue_size: usize,
    pub max_window_size: u64,
    pub batch_timeout_ms: u64,
    pub batch_size: BatchSize,
    pub genesis_method: GenesisMethod,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            orderer_type: OrdererType::Solo,
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            listen_address: "127.0.0.1".to_string(),
            listen_port: 7050,
            http_port: 7051,
            queue_size: 1000,
            max_window_size: 1000,
            batch_timeout_ms: 2000,
            batch_size: BatchSize::default(),
            genesis_method: GenesisMethod::Static,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSize {
    pub max_message_count: usize,
    pub absolute_max_bytes: usize,
    pub preferred_max_bytes: usize,
}

impl Default for BatchSize {
    fn default() -> Self {
        Self {
            max_message_count: 10,
            absolute_max_bytes: 10 * 1024 * 1024,
            preferred_max_bytes: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub ledger_type: LedgerType,
    pub ram: RamLedgerConfig,
    pub file: FileLedgerConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_type: LedgerType::Ram,
            ram: RamLedgerConfig::default(),
            file: FileLedgerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RamLedgerConfig {
    /// Blocks retained before the oldest are evicted
    pub history_size: usize,
}

impl Default for RamLedgerConfig {
    fn default() -> Self {
        Self { history_size: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLedgerConfig {
    /// Ledger directory; empty means a fresh temporary directory
    pub location: String,
    /// Name prefix of the temporary directory
    pub prefix: String,
}

impl Default for FileLedgerConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            prefix: "orderer-ledger".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatedSection {
    pub broker_address: String,
    pub publish_retry: PublishRetry,
    pub reconnect_delay_ms: u64,
}

impl Default for ReplicatedSection {
    fn default() -> Self {
        Self {
            broker_address: "127.0.0.1:9092".to_string(),
            publish_retry: PublishRetry::default(),
            reconnect_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRetry {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures before the consenter reports degraded
    pub max_attempts: u32,
}

impl Default for PublishRetry {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            max_attempts: 5,
        }
    }
}

impl OrdererConfig {
    /// Load from a JSON file, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn batch_config(&self) -> BatchConfig {
        let size = &self.general.batch_size;
        BatchConfig {
            max_message_count: size.max_message_count,
            absolute_max_bytes: size.absolute_max_bytes,
            preferred_max_bytes: size.preferred_max_bytes,
            timeout: Duration::from_millis(self.general.batch_timeout_ms),
        }
    }

    pub fn solo_config(&self) -> SoloConfig {
        SoloConfig {
            queue_size: self.general.queue_size,
            batch: self.batch_config(),
        }
    }

    pub fn replicated_config(&self) -> ReplicatedConfig {
        let retry = &self.replicated.publish_retry;
        ReplicatedConfig {
            partition: PartitionId::for_chain(&self.general.chain_id),
            queue_size: self.general.queue_size,
            batch: self.batch_config(),
            publish_retry: RetryPolicy {
                initial_delay: Duration::from_millis(retry.initial_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
                max_attempts: retry.max_attempts,
            },
            reconnect_delay: Duration::from_millis(self.replicated.reconnect_delay_ms),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        let general = &self.general;
        ServerConfig {
            ws_addr: format!("{}:{}", general.listen_address, general.listen_port),
            http_addr: format!("{}:{}", general.listen_address, general.http_port),
            max_window_size: general.max_window_size,
            absolute_max_bytes: general.batch_size.absolute_max_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrdererConfig::load(None).unwrap();
        assert_eq!(config.general.orderer_type, OrdererType::Solo);
        assert_eq!(config.general.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(config.ledger.ledger_type, LedgerType::Ram);
        assert_eq!(config.server_config().ws_addr, "127.0.0.1:7050");
        assert_eq!(config.batch_config().timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "general": {{ "orderer_type": "replicated", "batch_size": {{ "max_message_count": 3 }} }},
                "ledger": {{ "ledger_type": "file", "file": {{ "location": "/var/orderer" }} }},
                "replicated": {{ "publish_retry": {{ "max_attempts": 9 }} }}
            }}"#
        )
        .unwrap();

        let config = OrdererConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.general.orderer_type, OrdererType::Replicated);
        assert_eq!(config.general.batch_size.max_message_count, 3);
        assert_eq!(config.general.batch_size.preferred_max_bytes, 512 * 1024);
        assert_eq!(config.ledger.ledger_type, LedgerType::File);
        assert_eq!(config.ledger.file.location, "/var/orderer");
        assert_eq!(config.ledger.file.prefix, "orderer-ledger");

        let replicated = config.replicated_config();
        assert_eq!(replicated.publish_retry.max_attempts, 9);
        assert_eq!(replicated.partition, PartitionId::for_chain(DEFAULT_CHAIN_ID));
        assert_eq!(replicated.batch.max_message_count, 3);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "general": {{ "orderer_type": "kafka" }} }}"#).unwrap();
        assert!(OrdererConfig::load(Some(file.path())).is_err());
        assert!(OrdererConfig::load(Some(Path::new("/nonexistent/orderer.json"))).is_err());
    }
}
