//! Ordering service
//!
//! Main entry point for the orderer. Runs one of:
//! - solo: single-process ordering
//! - replicated: ordering through a shared log served by a broker process
//! - broker: the shared log itself

use ab_server::{AbContext, AbServer, HttpStatusServer};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use orderer_configtx::{ConfigManager, Ed25519Verifier, GenesisProvider, StaticBootstrapper};
use orderer_consensus::{
    BlockWriter, BrokerServer, Consenter, MemoryBroker, RemoteBroker, ReplicatedConsenter,
    SoloConsenter,
};
use orderer_ledger::Ledger;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::{LedgerType, OrdererConfig, OrdererType};

/// Process mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Single-process ordering
    Solo,
    /// Ordering through a shared log
    Replicated,
    /// Serve the shared log
    Broker,
}

/// Atomic broadcast ordering service
#[derive(Parser, Debug)]
#[command(name = "orderer")]
#[command(about = "Totally ordered, hash-chained block delivery", long_about = None)]
struct Args {
    /// Process mode; defaults to the configured orderer type
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Ledger backend
    #[arg(long, value_enum, env = "ORDERER_LEDGER_TYPE")]
    ledger_type: Option<LedgerType>,

    /// Directory of the file ledger
    #[arg(long)]
    ledger_dir: Option<String>,

    /// Bind address for all listeners
    #[arg(long)]
    listen_address: Option<String>,

    /// Broadcast / Deliver WebSocket port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Status API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Batch timeout in milliseconds
    #[arg(long)]
    batch_timeout_ms: Option<u64>,

    /// Ordering queue capacity
    #[arg(long)]
    queue_size: Option<usize>,

    /// Broker address (replicated mode: connect to; broker mode: listen on)
    #[arg(long)]
    broker_address: Option<String>,
}

impl Args {
    /// Fold command line overrides into the loaded configuration
    fn apply(&self, config: &mut OrdererConfig) {
        match self.mode {
            Some(Mode::Solo) => config.general.orderer_type = OrdererType::Solo,
            Some(Mode::Replicated) => config.general.orderer_type = OrdererType::Replicated,
            Some(Mode::Broker) | None => {}
        }
        if let Some(ledger_type) = self.ledger_type {
            config.ledger.ledger_type = ledger_type;
        }
        if let Some(dir) = &self.ledger_dir {
            config.ledger.file.location = dir.clone();
        }
        if let Some(addr) = &self.listen_address {
            config.general.listen_address = addr.clone();
        }
        if let Some(port) = self.listen_port {
            config.general.listen_port = port;
        }
        if let Some(port) = self.http_port {
            config.general.http_port = port;
        }
        if let Some(ms) = self.batch_timeout_ms {
            config.general.batch_timeout_ms = ms;
        }
        if let Some(size) = self.queue_size {
            config.general.queue_size = size;
        }
        if let Some(addr) = &self.broker_address {
            config.replicated.broker_address = addr.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = OrdererConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    match args.mode {
        Some(Mode::Broker) => run_broker(&config).await,
        _ => run_orderer(config).await,
    }
}

/// Serve the shared log until Ctrl+C
async fn run_broker(config: &OrdererConfig) -> Result<()> {
    let addr = &config.replicated.broker_address;
    tracing::info!("Starting orderer - BROKER MODE");

    let server = BrokerServer::new(Arc::new(MemoryBroker::new()));
    server.start(addr).await?;

    tracing::info!("Broker running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Broker stopped");

    Ok(())
}

/// Run a solo or replicated orderer
async fn run_orderer(config: OrdererConfig) -> Result<()> {
    let general = &config.general;
    let server_config = config.server_config();
    tracing::info!("Starting orderer - {:?} MODE", general.orderer_type);
    tracing::info!("  Chain: {}", general.chain_id);
    tracing::info!("  Broadcast/Deliver: {}", server_config.ws_addr);
    tracing::info!("  HTTP status: {}", server_config.http_addr);
    tracing::info!(
        "  Batch: {} msgs, {} bytes preferred, {}ms timeout",
        general.batch_size.max_message_count,
        general.batch_size.preferred_max_bytes,
        general.batch_timeout_ms
    );
    tracing::info!("  Ledger: {:?}", config.ledger.ledger_type);

    // Genesis carries the batch parameters as pass-through values
    let genesis = StaticBootstrapper::new(&general.chain_id)
        .with_orderer_value("BatchSize", serde_json::to_vec(&general.batch_size)?)
        .with_orderer_value("BatchTimeout", general.batch_timeout_ms.to_string().into_bytes())
        .genesis_block()?;

    // Held until exit so a scratch ledger directory outlives the ledger
    let mut _scratch = None;
    let ledger = match config.ledger.ledger_type {
        LedgerType::Ram => Ledger::ram(config.ledger.ram.history_size, genesis)?,
        LedgerType::File => {
            let file = &config.ledger.file;
            let dir = if file.location.is_empty() {
                let scratch = tempfile::Builder::new().prefix(&file.prefix).tempdir()?;
                let path = scratch.path().to_path_buf();
                _scratch = Some(scratch);
                path
            } else {
                PathBuf::from(&file.location)
            };
            std::fs::create_dir_all(&dir)?;
            tracing::info!("  Ledger directory: {}", dir.display());
            Ledger::file(dir.join(&general.chain_id), genesis)
                .with_context(|| format!("opening ledger in {}", dir.display()))?
        }
    };
    tracing::info!("Ledger ready at height {}", ledger.height());

    let manager = Arc::new(
        ConfigManager::bootstrap(&ledger, Arc::new(Ed25519Verifier::new()))
            .context("bootstrapping configuration")?,
    );
    let writer = BlockWriter::new(ledger.clone(), manager.clone());

    let consenter: Arc<dyn Consenter> = match general.orderer_type {
        OrdererType::Solo => Arc::new(SoloConsenter::new(config.solo_config(), writer)),
        OrdererType::Replicated => {
            tracing::info!("  Broker: {}", config.replicated.broker_address);
            let broker = Arc::new(RemoteBroker::new(&config.replicated.broker_address));
            Arc::new(ReplicatedConsenter::new(config.replicated_config(), broker, writer))
        }
    };
    consenter.start();

    let context = Arc::new(AbContext::new(
        ledger.clone(),
        manager,
        consenter.clone(),
        server_config.clone(),
    ));

    // Start Broadcast / Deliver server
    let ws_context = context.clone();
    let ws_addr = server_config.ws_addr.clone();
    let ws_server = tokio::spawn(async move {
        if let Err(e) = AbServer::new(ws_context).run(&ws_addr).await {
            tracing::error!("Atomic broadcast server error: {}", e);
        }
    });

    // Start HTTP status server
    let http_context = context.clone();
    let http_addr = server_config.http_addr.clone();
    let http_server = tokio::spawn(async move {
        if let Err(e) = HttpStatusServer::new(http_context).run(&http_addr).await {
            tracing::error!("HTTP status server error: {}", e);
        }
    });

    tracing::info!("Orderer running ({}). Press Ctrl+C to stop.", consenter.kind());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");

    // Pending envelopes that were never cut are dropped here
    consenter.stop().await;
    ledger.close();

    ws_server.abort();
    http_server.abort();

    tracing::info!("Orderer stopped at height {}", ledger.height());

    Ok(())
}
