//! Transport drivers and payload validation

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use lifeline_core::{
    DriverError, Error, MessageKind, NotificationCategory, OutboundMessage, Recipient, Result,
    TransportDriver,
};

/// Longest SMS body accepted, in characters
pub const MAX_SMS_CHARS: usize = 1600;

fn required_text<'a>(payload: &'a Value, field: &str) -> Result<&'a str> {
    match payload.get(field).and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(Error::invalid_field(
            format!("payload.{field}"),
            format!("{field} must be a non-empty string"),
        )),
    }
}

/// Check a payload for its transport and return its category
pub fn validate_payload(kind: MessageKind, payload: &Value) -> Result<NotificationCategory> {
    if !payload.is_object() {
        return Err(Error::invalid_field("payload", "payload must be a JSON object"));
    }
    match kind {
        MessageKind::Sms => {
            let body = required_text(payload, "body")?;
            if body.chars().count() > MAX_SMS_CHARS {
                return Err(Error::invalid_field(
                    "payload.body",
                    format!("sms body exceeds {MAX_SMS_CHARS} characters"),
                ));
            }
        }
        MessageKind::Push => {
            required_text(payload, "title")?;
            required_text(payload, "body")?;
        }
    }
    match payload.get("category") {
        None | Some(Value::Null) => Ok(NotificationCategory::default()),
        Some(Value::String(raw)) => raw.parse(),
        Some(_) => Err(Error::invalid_field("category", "category must be a string")),
    }
}

/// Drivers keyed by transport
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<MessageKind, Arc<dyn TransportDriver>>,
}

impl DriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the logging drivers
    pub fn logging() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LoggingSmsDriver));
        registry.register(Arc::new(LoggingPushDriver));
        registry
    }

    /// Add or replace the driver for its transport
    pub fn register(&mut self, driver: Arc<dyn TransportDriver>) {
        self.drivers.insert(driver.kind(), driver);
    }

    /// Driver for a transport
    pub fn get(&self, kind: MessageKind) -> Option<Arc<dyn TransportDriver>> {
        self.drivers.get(&kind).cloned()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.drivers.keys().map(MessageKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("DriverRegistry").field("kinds", &kinds).finish()
    }
}

fn describe(recipient: &Recipient) -> String {
    match recipient {
        Recipient::User(id) => format!("user:{id}"),
        Recipient::Address(addr) => format!("address:{addr}"),
    }
}

/// SMS driver that logs instead of sending
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSmsDriver;

#[async_trait]
impl TransportDriver for LoggingSmsDriver {
    fn kind(&self) -> MessageKind {
        MessageKind::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), DriverError> {
        let body = message
            .payload
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Rejected("missing body".into()))?;
        info!(
            message_id = %message.message_id,
            recipient = %describe(&message.recipient),
            channel = %message.channel,
            chars = body.chars().count(),
            "SMS sent"
        );
        Ok(())
    }
}

/// Push driver that logs instead of sending
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPushDriver;

#[async_trait]
impl TransportDriver for LoggingPushDriver {
    fn kind(&self) -> MessageKind {
        MessageKind::Push
    }

    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), DriverError> {
        let title = message
            .payload
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Rejected("missing title".into()))?;
        info!(
            message_id = %message.message_id,
            recipient = %describe(&message.recipient),
            channel = %message.channel,
            title,
            "Push sent"
        );
        Ok(())
    }
}
