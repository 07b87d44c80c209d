//! HTTP status API
//!
//! Read-only JSON views of the orderer for operators and tooling.

use crate::AbContext;
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use orderer_types::Block;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub chain_id: String,
    pub orderer_type: String,
    pub height: u64,
    pub consenter_state: String,
    pub degraded: bool,
    pub config_sequence: u64,
}

#[derive(Debug, Serialize)]
pub struct BlockResponse {
    pub number: u64,
    pub previous_hash: String,
    pub data_hash: String,
    pub hash: String,
    pub last_offset: Option<u64>,
    /// Serialized envelopes, base64
    pub transactions: Vec<String>,
}

impl From<&Block> for BlockResponse {
    fn from(block: &Block) -> Self {
        Self {
            number: block.number,
            previous_hash: hex(&block.previous_hash),
            data_hash: hex(&block.data_hash),
            hash: hex(&block.hash()),
            last_offset: block.metadata.last_offset,
            transactions: block.transactions.iter().map(|tx| BASE64.encode(tx)).collect(),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// HTTP status server
pub struct HttpStatusServer {
    context: Arc<AbContext>,
}

impl HttpStatusServer {
    pub fn new(context: Arc<AbContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/blocks/:number", get(handle_block))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP status server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_health(State(context): State<Arc<AbContext>>) -> impl IntoResponse {
    let state = context.consenter.state();
    if state.is_terminal() || context.ledger.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": state.as_str() })))
    } else {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    }
}

async fn handle_status(State(context): State<Arc<AbContext>>) -> Json<StatusResponse> {
    let config = context.config.current();
    Json(StatusResponse {
        chain_id: config.chain_id().to_string(),
        orderer_type: context.consenter.kind().to_string(),
        height: context.ledger.height(),
        consenter_state: context.consenter.state().to_string(),
        degraded: context.consenter.is_degraded(),
        config_sequence: config.sequence(),
    })
}

async fn handle_block(
    State(context): State<Arc<AbContext>>,
    Path(number): Path<u64>,
) -> impl IntoResponse {
    match context.ledger.get(number) {
        Ok(Some(block)) => (StatusCode::OK, Json(json!(BlockResponse::from(&block)))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("block {} not found", number) })),
        ),
        Err(e) => {
            tracing::warn!("Failed to read block {}: {}", number, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
