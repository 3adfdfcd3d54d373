//! Transport driver port for SMS and push delivery

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{MessageKind, Recipient};
use crate::types::MessageId;

/// Transport-level failure, recorded verbatim as a message's last error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// Provider refused the message
    #[error("rejected: {0}")]
    Rejected(String),

    /// Provider could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Provider did not answer within the deadline
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// A message handed to a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Scheduled message being delivered
    pub message_id: MessageId,
    /// Transport
    pub kind: MessageKind,
    /// Destination
    pub recipient: Recipient,
    /// Free-form channel tag
    pub channel: String,
    /// Decoded payload
    pub payload: serde_json::Value,
}

/// A single transport (SMS gateway, push service)
#[async_trait]
pub trait TransportDriver: Send + Sync {
    /// Transport this driver serves
    fn kind(&self) -> MessageKind;

    /// Hand the message to the provider
    async fn send(&self, message: &OutboundMessage) -> Result<(), DriverError>;
}
