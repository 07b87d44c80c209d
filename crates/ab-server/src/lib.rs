//! Atomic Broadcast service
//!
//! Client-facing surface of the orderer:
//! - WebSocket `/broadcast`: borsh `Envelope` frames in, `BroadcastResponse` out
//! - WebSocket `/deliver`: `DeliverUpdate` frames in, `DeliverResponse` out
//! - HTTP: `/health`, `/status`, `/blocks/:number`

pub mod broadcast;
pub mod deliver;
pub mod http_server;
pub mod ws_server;

pub use broadcast::BroadcastHandler;
pub use deliver::DeliverSession;
pub use http_server::HttpStatusServer;
pub use ws_server::AbServer;

use orderer_configtx::ConfigManager;
use orderer_consensus::Consenter;
use orderer_ledger::Ledger;
use std::sync::Arc;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Broadcast / Deliver WebSocket bind address
    pub ws_addr: String,
    /// Status API bind address
    pub http_addr: String,
    /// Largest flow-control window a Deliver client may ask for
    pub max_window_size: u64,
    /// Envelopes larger than this are refused at the boundary
    pub absolute_max_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: "127.0.0.1:7050".to_string(),
            http_addr: "127.0.0.1:7051".to_string(),
            max_window_size: 1000,
            absolute_max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// State shared by every connection
pub struct AbContext {
    pub ledger: Ledger,
    pub config: Arc<ConfigManager>,
    pub consenter: Arc<dyn Consenter>,
    pub settings: ServerConfig,
}

impl AbContext {
    pub fn new(
        ledger: Ledger,
        config: Arc<ConfigManager>,
        consenter: Arc<dyn Consenter>,
        settings: ServerConfig,
    ) -> Self {
        Self {
            ledger,
            config,
            consenter,
            settings,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use orderer_configtx::{Ed25519Verifier, GenesisProvider, StaticBootstrapper};
    use orderer_consensus::{BlockWriter, OrderError, SoloConfig, SoloConsenter};
    use orderer_types::{Block, Envelope, Message, MessageType, DEFAULT_CHAIN_ID};

    pub fn genesis() -> Block {
        StaticBootstrapper::new(DEFAULT_CHAIN_ID).genesis_block().unwrap()
    }

    /// Context over a RAM ledger and a started solo consenter
    pub fn solo_context(genesis: Block, settings: ServerConfig) -> Arc<AbContext> {
        let ledger = Ledger::ram(100, genesis).unwrap();
        let config =
            Arc::new(ConfigManager::bootstrap(&ledger, Arc::new(Ed25519Verifier::new())).unwrap());
        let consenter = SoloConsenter::new(
            SoloConfig::default(),
            BlockWriter::new(ledger.clone(), config.clone()),
        );
        consenter.start();
        Arc::new(AbContext::new(ledger, config, Arc::new(consenter), settings))
    }

    pub fn envelope(n: u32) -> Envelope {
        let msg = Message::new(MessageType::Transaction, Vec::new(), n.to_le_bytes().to_vec())
            .with_timestamp(i64::from(n));
        Envelope::new(&msg, Vec::new())
    }

    /// Consenter whose queue is always full
    pub struct FullConsenter;

    #[async_trait::async_trait]
    impl Consenter for FullConsenter {
        fn start(&self) {}
        async fn stop(&self) {}
        fn order(&self, _envelope: Envelope) -> Result<(), OrderError> {
            Err(OrderError::QueueFull)
        }
        fn state(&self) -> orderer_consensus::ConsenterState {
            orderer_consensus::ConsenterState::Live
        }
        fn kind(&self) -> &'static str {
            "full"
        }
    }
}
