//! Scheduled notification worker
//!
//! Messages are persisted `Pending`, claimed in batches by a worker that
//! stamps its id on them, and driven to `Sent` or `Failed`. A claimed batch
//! always runs to completion; the stop token is honoured between batches.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lifeline_core::config::SchedulerConfig;
use lifeline_core::message::SUPPRESSED;
use lifeline_core::{
    ensure_active, CancellationToken, Clock, Completion, DriverError, Error, MessageId,
    MessageKind, MessageRepository, OutboundMessage, Recipient, Result, ScheduledMessage,
    Timestamp, UserId,
};

use crate::drivers::{validate_payload, DriverRegistry};
use crate::preferences::{allows_delivery, PreferenceService};

/// Input to [`NotificationScheduler::schedule`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScheduleRequest {
    /// Transport
    pub kind: MessageKind,
    /// Destination
    pub recipient: Recipient,
    /// JSON payload, checked against the transport's rules
    pub payload: Value,
    /// Free-form channel tag
    #[serde(default)]
    pub channel: String,
    /// Delivery instant, strictly in the future
    pub when: Timestamp,
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Messages claimed
    pub claimed: usize,
    /// Delivered
    pub sent: usize,
    /// Blocked by recipient preferences
    pub suppressed: usize,
    /// Driver or payload failures
    pub failed: usize,
}

/// Cumulative counters since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    /// Batches processed, empty ones included
    pub batches: u64,
    /// Messages claimed by this worker
    pub claimed: u64,
    /// Messages handed to a driver successfully
    pub sent: u64,
    /// Messages dropped by preferences or quiet hours
    pub suppressed: u64,
    /// Messages whose driver or payload failed
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    batches: AtomicU64,
    claimed: AtomicU64,
    sent: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, report: &BatchReport) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.claimed.fetch_add(report.claimed as u64, Ordering::Relaxed);
        self.sent.fetch_add(report.sent as u64, Ordering::Relaxed);
        self.suppressed.fetch_add(report.suppressed as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            batches: self.batches.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

enum Outcome {
    Sent,
    Suppressed,
    Failed(String),
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable future-dated notification delivery
pub struct NotificationScheduler {
    messages: Arc<dyn MessageRepository>,
    preferences: Arc<PreferenceService>,
    drivers: DriverRegistry,
    clock: Arc<dyn Clock>,
    worker_id: String,
    tick: Duration,
    batch_size: usize,
    driver_timeout: Duration,
    running: AtomicBool,
    counters: Counters,
}

impl NotificationScheduler {
    /// Create a scheduler with a fresh worker id
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        preferences: Arc<PreferenceService>,
        drivers: DriverRegistry,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            messages,
            preferences,
            drivers,
            clock,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            tick: config.tick(),
            batch_size: config.batch_size,
            driver_timeout: config.driver_timeout(),
            running: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Override the worker id stamped on claims
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Id stamped on claimed messages
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Persist a message for future delivery
    pub async fn schedule(&self, cancel: &CancellationToken, request: ScheduleRequest) -> Result<ScheduledMessage> {
        let now = self.clock.now();
        if request.when <= now {
            return Err(Error::invalid_field("when", "delivery time must be in the future"));
        }
        let category = validate_payload(request.kind, &request.payload)?;
        if let Recipient::Address(addr) = &request.recipient {
            if addr.trim().is_empty() {
                return Err(Error::invalid_field("recipient", "recipient cannot be empty"));
            }
        }

        let message = ScheduledMessage::new(
            request.recipient,
            request.kind,
            request.channel,
            category,
            serde_json::to_string(&request.payload)?,
            request.when,
            now,
        );
        ensure_active(cancel)?;
        self.messages.insert_message(&message).await?;
        info!(
            message_id = %message.id,
            kind = message.kind.as_str(),
            category = message.category.as_str(),
            scheduled_for = %message.scheduled_for,
            "Message scheduled"
        );
        Ok(message)
    }

    /// Cancel a pending message
    pub async fn cancel(&self, cancel: &CancellationToken, id: MessageId) -> Result<()> {
        ensure_active(cancel)?;
        if self.messages.cancel_pending(id, self.clock.now()).await? {
            info!(message_id = %id, "Scheduled message cancelled");
            return Ok(());
        }
        let message = self
            .messages
            .get_message(id)
            .await?
            .ok_or_else(|| Error::not_found(MessageId::RESOURCE, id))?;
        Err(Error::validation(format!(
            "message {id} is {}; only pending messages can be cancelled",
            message.status
        )))
    }

    /// Fetch a message
    pub async fn get(&self, cancel: &CancellationToken, id: MessageId) -> Result<ScheduledMessage> {
        ensure_active(cancel)?;
        self.messages
            .get_message(id)
            .await?
            .ok_or_else(|| Error::not_found(MessageId::RESOURCE, id))
    }

    /// Messages addressed to a user
    pub async fn list_for_user(&self, cancel: &CancellationToken, user_id: UserId) -> Result<Vec<ScheduledMessage>> {
        ensure_active(cancel)?;
        self.messages.list_messages_for_user(user_id).await
    }

    /// Cumulative counters
    pub fn metrics(&self) -> SchedulerMetrics {
        self.counters.snapshot()
    }

    /// Claim one batch of due messages and drive each to a terminal state
    pub async fn process_batch(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        ensure_active(cancel)?;
        let claimed = self
            .messages
            .claim_due(&self.worker_id, self.clock.now(), self.batch_size)
            .await?;
        let mut report = BatchReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }
        debug!(worker_id = %self.worker_id, claimed = claimed.len(), "Batch claimed");

        for message in &claimed {
            let outcome = self.deliver(message).await;
            let completion = match &outcome {
                Outcome::Sent => Completion::Sent,
                Outcome::Suppressed => Completion::Failed(SUPPRESSED.to_string()),
                Outcome::Failed(reason) => Completion::Failed(reason.clone()),
            };
            match self
                .messages
                .complete(message.id, &self.worker_id, completion, self.clock.now())
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(message_id = %message.id, worker_id = %self.worker_id, "Claim lost before completion");
                    continue;
                }
                Err(e) => {
                    error!(message_id = %message.id, error = %e, "Completion write failed");
                    report.failed += 1;
                    continue;
                }
            }
            match outcome {
                Outcome::Sent => report.sent += 1,
                Outcome::Suppressed => report.suppressed += 1,
                Outcome::Failed(_) => report.failed += 1,
            }
        }

        self.counters.record(&report);
        info!(
            worker_id = %self.worker_id,
            claimed = report.claimed,
            sent = report.sent,
            suppressed = report.suppressed,
            failed = report.failed,
            "Batch processed"
        );
        Ok(report)
    }

    async fn deliver(&self, message: &ScheduledMessage) -> Outcome {
        let recipient = match message.recipient() {
            Ok(r) => r,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if let Recipient::User(user_id) = &recipient {
            let prefs = match self.preferences.effective(*user_id).await {
                Ok(p) => p,
                Err(e) => return Outcome::Failed(format!("preferences unavailable: {e}")),
            };
            if !allows_delivery(&prefs, message.kind, message.category, self.clock.now()) {
                warn!(
                    message_id = %message.id,
                    user_id = %user_id,
                    category = message.category.as_str(),
                    "Delivery suppressed by preferences"
                );
                return Outcome::Suppressed;
            }
        }

        let Some(driver) = self.drivers.get(message.kind) else {
            return Outcome::Failed(format!("no driver for {}", message.kind));
        };
        let payload: Value = match serde_json::from_str(&message.payload) {
            Ok(v) => v,
            Err(e) => return Outcome::Failed(format!("corrupt payload: {e}")),
        };
        let outbound = OutboundMessage {
            message_id: message.id,
            kind: message.kind,
            recipient,
            channel: message.channel.clone(),
            payload,
        };

        let sent = match tokio::time::timeout(self.driver_timeout, driver.send(&outbound)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(self.driver_timeout.as_millis() as u64)),
        };
        match sent {
            Ok(()) => {
                debug!(message_id = %message.id, kind = message.kind.as_str(), "Message delivered");
                Outcome::Sent
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Transport failed");
                Outcome::Failed(e.to_string())
            }
        }
    }

    /// Run batches every tick until cancelled
    ///
    /// A second concurrent call on the same scheduler is rejected. The guard
    /// is per instance, and the node builds exactly one scheduler per
    /// process. Schedulers in other processes may run their own workers over
    /// the same store: the claim hands each due message to one `worker_id`.
    pub async fn run_worker(&self, cancel: CancellationToken) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::validation("scheduler worker already running"));
        }
        let _running = RunningGuard(&self.running);

        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(worker_id = %self.worker_id, tick_secs = self.tick.as_secs(), batch_size = self.batch_size, "Scheduler worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    match self.process_batch(&cancel).await {
                        Ok(_) | Err(Error::Cancelled) => {}
                        Err(e) => error!(worker_id = %self.worker_id, error = %e, "Batch failed"),
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "Scheduler worker stopped");
        Ok(())
    }
}
