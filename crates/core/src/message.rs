//! Scheduled notification records
//!
//! Status transitions: `Pending -> Processing -> {Sent, Failed}` and
//! `Pending -> Cancelled`. Terminal states are absorbing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::preferences::NotificationCategory;
use crate::types::{MessageId, Timestamp, UserId};

/// Delivery transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Text message
    Sms,
    /// Mobile push notification
    Push,
}

impl MessageKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Sms => "sms",
            MessageKind::Push => "push",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(MessageKind::Sms),
            "push" => Ok(MessageKind::Push),
            other => Err(Error::invalid_field(
                "kind",
                format!("unknown message kind '{other}'"),
            )),
        }
    }
}

/// Delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting for its scheduled instant
    Pending,
    /// Claimed by a worker
    Processing,
    /// Delivered to the transport
    Sent,
    /// Transport error or suppressed by preferences
    Failed,
    /// Withdrawn before delivery
    Cancelled,
}

impl MessageStatus {
    /// Terminal states are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Sent | MessageStatus::Failed | MessageStatus::Cancelled
        )
    }

    /// Check if transition to new status is valid
    pub fn can_transition_to(&self, new_status: MessageStatus) -> bool {
        matches!(
            (self, new_status),
            (MessageStatus::Pending, MessageStatus::Processing)
                | (MessageStatus::Pending, MessageStatus::Cancelled)
                | (MessageStatus::Processing, MessageStatus::Sent)
                | (MessageStatus::Processing, MessageStatus::Failed)
        )
    }

    /// Wire and storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            "cancelled" => Ok(MessageStatus::Cancelled),
            other => Err(Error::internal(format!("unknown message status '{other}'"))),
        }
    }
}

/// Who receives a message: a known user or a raw phone number / device token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// Registered user, gated by preferences
    User(UserId),
    /// Raw address, not gated
    Address(String),
}

impl Recipient {
    /// Parse a facade `recipient` field: UUIDs are users, anything else an address
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::invalid_field("recipient", "recipient cannot be empty"));
        }
        match uuid::Uuid::parse_str(value) {
            Ok(id) => Ok(Recipient::User(UserId(id))),
            Err(_) => Ok(Recipient::Address(value.to_string())),
        }
    }

    /// User id, when addressed to a user
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Recipient::User(id) => Some(*id),
            Recipient::Address(_) => None,
        }
    }
}

/// Reason recorded when preferences block a delivery
pub const SUPPRESSED: &str = "suppressed";

/// A future-dated notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    /// Unique identifier
    pub id: MessageId,
    /// Registered recipient (exclusive with `raw_recipient`)
    pub recipient_user_id: Option<UserId>,
    /// Phone number or device token (exclusive with `recipient_user_id`)
    pub raw_recipient: Option<String>,
    /// Transport
    pub kind: MessageKind,
    /// Free-form channel tag
    pub channel: String,
    /// Category gating quiet hours and preference flags
    pub category: NotificationCategory,
    /// Delivery status
    pub status: MessageStatus,
    /// Serialized JSON payload
    pub payload: String,
    /// Earliest delivery instant
    pub scheduled_for: Timestamp,
    /// Delivery instant
    pub sent_at: Option<Timestamp>,
    /// Worker that claimed the message
    pub claimed_by: Option<String>,
    /// Creation instant
    pub created: Timestamp,
    /// Last update instant, monotonic per message
    pub updated: Timestamp,
    /// Last transport error or suppression reason
    pub last_error: Option<String>,
}

impl ScheduledMessage {
    /// Create a pending message
    pub fn new(
        recipient: Recipient,
        kind: MessageKind,
        channel: impl Into<String>,
        category: NotificationCategory,
        payload: String,
        scheduled_for: Timestamp,
        now: Timestamp,
    ) -> Self {
        let (recipient_user_id, raw_recipient) = match recipient {
            Recipient::User(id) => (Some(id), None),
            Recipient::Address(addr) => (None, Some(addr)),
        };
        Self {
            id: MessageId::new(),
            recipient_user_id,
            raw_recipient,
            kind,
            channel: channel.into(),
            category,
            status: MessageStatus::Pending,
            payload,
            scheduled_for,
            sent_at: None,
            claimed_by: None,
            created: now,
            updated: now,
            last_error: None,
        }
    }

    /// Recipient as an enum
    pub fn recipient(&self) -> Result<Recipient> {
        match (&self.recipient_user_id, &self.raw_recipient) {
            (Some(id), None) => Ok(Recipient::User(*id)),
            (None, Some(addr)) => Ok(Recipient::Address(addr.clone())),
            _ => Err(Error::internal(format!(
                "message {} must have exactly one recipient",
                self.id
            ))),
        }
    }

    /// Next monotonic update stamp
    pub fn next_stamp(&self, now: Timestamp) -> Timestamp {
        if now > self.updated {
            now
        } else {
            self.updated + chrono::TimeDelta::milliseconds(1)
        }
    }
}
