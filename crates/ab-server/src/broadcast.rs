//! Broadcast: classify, authorize and hand envelopes to the consenter
//!
//! `SUCCESS` means the envelope entered the ordering pipeline, not that it
//! has been written to a block.

use crate::AbContext;
use orderer_consensus::OrderError;
use orderer_types::{ConfigurationEnvelope, Envelope, MessageType, Status};
use std::sync::Arc;

#[derive(Clone)]
pub struct BroadcastHandler {
    context: Arc<AbContext>,
}

impl BroadcastHandler {
    pub fn new(context: Arc<AbContext>) -> Self {
        Self { context }
    }

    /// Process one submitted frame and return its status
    pub fn handle(&self, data: &[u8]) -> Status {
        let max = self.context.settings.absolute_max_bytes;
        if data.len() > max {
            tracing::debug!("Rejecting {} byte submission (limit {})", data.len(), max);
            return Status::BadRequest;
        }

        let envelope = match Envelope::from_bytes(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Rejecting malformed envelope: {}", e);
                return Status::BadRequest;
            }
        };

        if let Err(status) = self.check(&envelope) {
            return status;
        }

        match self.context.consenter.order(envelope) {
            Ok(()) => Status::Success,
            Err(OrderError::Rejected(e)) => {
                tracing::debug!("Consenter rejected envelope: {}", e);
                Status::BadRequest
            }
            Err(e) => {
                tracing::warn!("Cannot order envelope: {}", e);
                Status::ServiceUnavailable
            }
        }
    }

    /// Classification and authorization against the active configuration
    fn check(&self, envelope: &Envelope) -> Result<(), Status> {
        let message = envelope.open().map_err(|e| {
            tracing::debug!("Rejecting envelope with malformed message: {}", e);
            Status::BadRequest
        })?;

        match message.message_type {
            MessageType::Transaction => {
                self.context
                    .config
                    .authorize_transaction(envelope, &message)
                    .map_err(|e| {
                        tracing::debug!("Transaction not authorized: {}", e);
                        Status::BadRequest
                    })
            }
            MessageType::Configuration => {
                let config = ConfigurationEnvelope::from_envelope(envelope).ok_or_else(|| {
                    tracing::debug!("Rejecting malformed configuration envelope");
                    Status::BadRequest
                })?;
                self.context.config.validate(&config).map_err(|e| {
                    tracing::info!("Rejecting configuration sequence {}: {}", config.sequence, e);
                    Status::BadRequest
                })
            }
            other => {
                tracing::debug!("Rejecting unsupported message type {:?}", other);
                Err(Status::BadRequest)
            }
        }
    }
}
