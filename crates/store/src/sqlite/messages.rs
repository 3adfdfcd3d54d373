//! Scheduled messages and notification preferences
//!
//! Terminal writes are guarded by `status = 'processing' AND claimed_by = ?`.

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::str::FromStr;
use tracing::debug;

use lifeline_core::message::MessageStatus;
use lifeline_core::{
    Completion, MessageId, MessageKind, MessageRepository, NotificationCategory,
    NotificationPreferences, PreferenceRepository, Result, ScheduledMessage, Timestamp, UserId,
};

use super::SqliteStore;
use crate::error::StoreError;

const MESSAGE_COLUMNS: &str = "id, recipient_user_id, raw_recipient, kind, channel, category, \
     status, payload, scheduled_for, sent_at, claimed_by, created, updated, last_error";

/// Raw column values of a `scheduled_messages` row
struct MessageRow {
    id: String,
    recipient_user_id: Option<String>,
    raw_recipient: Option<String>,
    kind: String,
    channel: String,
    category: String,
    status: String,
    payload: String,
    scheduled_for: i64,
    sent_at: Option<i64>,
    claimed_by: Option<String>,
    created: i64,
    updated: i64,
    last_error: Option<String>,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recipient_user_id: row.get(1)?,
            raw_recipient: row.get(2)?,
            kind: row.get(3)?,
            channel: row.get(4)?,
            category: row.get(5)?,
            status: row.get(6)?,
            payload: row.get(7)?,
            scheduled_for: row.get(8)?,
            sent_at: row.get(9)?,
            claimed_by: row.get(10)?,
            created: row.get(11)?,
            updated: row.get(12)?,
            last_error: row.get(13)?,
        })
    }

    fn into_message(self) -> std::result::Result<ScheduledMessage, StoreError> {
        let corrupt = |e: lifeline_core::Error| StoreError::CorruptRow(e.to_string());
        Ok(ScheduledMessage {
            id: MessageId::parse("id", &self.id).map_err(corrupt)?,
            recipient_user_id: self
                .recipient_user_id
                .as_deref()
                .map(|s| UserId::parse("recipient_user_id", s))
                .transpose()
                .map_err(corrupt)?,
            raw_recipient: self.raw_recipient,
            kind: MessageKind::from_str(&self.kind).map_err(corrupt)?,
            channel: self.channel,
            category: NotificationCategory::from_str(&self.category).map_err(corrupt)?,
            status: MessageStatus::from_str(&self.status).map_err(corrupt)?,
            payload: self.payload,
            scheduled_for: from_millis(self.scheduled_for)?,
            sent_at: self.sent_at.map(from_millis).transpose()?,
            claimed_by: self.claimed_by,
            created: from_millis(self.created)?,
            updated: from_millis(self.updated)?,
            last_error: self.last_error,
        })
    }
}

fn from_millis(ms: i64) -> std::result::Result<Timestamp, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::CorruptRow(format!("timestamp {ms} out of range")))
}

impl SqliteStore {
    fn load_message(conn: &Connection, id: &str) -> std::result::Result<Option<ScheduledMessage>, StoreError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM scheduled_messages WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id], MessageRow::from_row)
            .optional()?;
        row.map(MessageRow::into_message).transpose()
    }

    fn claim(
        &self,
        worker_id: &str,
        now: Timestamp,
        limit: usize,
    ) -> std::result::Result<Vec<ScheduledMessage>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now_ms = now.timestamp_millis();

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id FROM scheduled_messages
                WHERE status = 'pending' AND scheduled_for <= ?1
                ORDER BY scheduled_for, id
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![now_ms, limit as i64], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in &ids {
            let changed = tx.execute(
                r#"
                UPDATE scheduled_messages
                SET status = 'processing',
                    claimed_by = ?2,
                    updated = CASE WHEN ?3 > updated THEN ?3 ELSE updated + 1 END
                WHERE id = ?1 AND status = 'pending'
                "#,
                params![id, worker_id, now_ms],
            )?;
            if changed == 1 {
                if let Some(message) = Self::load_message(&tx, id)? {
                    claimed.push(message);
                }
            }
        }

        tx.commit()?;
        debug!(worker_id = %worker_id, claimed = claimed.len(), "Claimed due messages");
        Ok(claimed)
    }
}

#[async_trait]
impl MessageRepository for SqliteStore {
    async fn insert_message(&self, message: &ScheduledMessage) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO scheduled_messages ({MESSAGE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                message.id.to_string(),
                message.recipient_user_id.map(|u| u.to_string()),
                message.raw_recipient,
                message.kind.as_str(),
                message.channel,
                message.category.as_str(),
                message.status.as_str(),
                message.payload,
                message.scheduled_for.timestamp_millis(),
                message.sent_at.map(|t| t.timestamp_millis()),
                message.claimed_by,
                message.created.timestamp_millis(),
                message.updated.timestamp_millis(),
                message.last_error,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<ScheduledMessage>> {
        let conn = self.conn.lock();
        Ok(Self::load_message(&conn, &id.to_string())?)
    }

    async fn cancel_pending(&self, id: MessageId, now: Timestamp) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                r#"
                UPDATE scheduled_messages
                SET status = 'cancelled',
                    updated = CASE WHEN ?2 > updated THEN ?2 ELSE updated + 1 END
                WHERE id = ?1 AND status = 'pending'
                "#,
                params![id.to_string(), now.timestamp_millis()],
            )
            .map_err(StoreError::from)?;
        if changed == 1 {
            return Ok(true);
        }
        match Self::load_message(&conn, &id.to_string())? {
            Some(_) => Ok(false),
            None => Err(lifeline_core::Error::not_found(MessageId::RESOURCE, id)),
        }
    }

    async fn claim_due(&self, worker_id: &str, now: Timestamp, limit: usize) -> Result<Vec<ScheduledMessage>> {
        Ok(self.claim(worker_id, now, limit)?)
    }

    async fn complete(&self, id: MessageId, worker_id: &str, completion: Completion, now: Timestamp) -> Result<bool> {
        let conn = self.conn.lock();
        let now_ms = now.timestamp_millis();
        let changed = match completion {
            Completion::Sent => conn.execute(
                r#"
                UPDATE scheduled_messages
                SET status = 'sent',
                    sent_at = ?3,
                    updated = CASE WHEN ?3 > updated THEN ?3 ELSE updated + 1 END
                WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2
                "#,
                params![id.to_string(), worker_id, now_ms],
            ),
            Completion::Failed(reason) => conn.execute(
                r#"
                UPDATE scheduled_messages
                SET status = 'failed',
                    last_error = ?4,
                    updated = CASE WHEN ?3 > updated THEN ?3 ELSE updated + 1 END
                WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2
                "#,
                params![id.to_string(), worker_id, now_ms, reason],
            ),
        }
        .map_err(StoreError::from)?;
        Ok(changed == 1)
    }

    async fn list_messages_for_user(&self, user_id: UserId) -> Result<Vec<ScheduledMessage>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages \
             WHERE recipient_user_id = ?1 ORDER BY scheduled_for, id"
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![user_id.to_string()], MessageRow::from_row)
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)?;
        let messages = rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

#[async_trait]
impl PreferenceRepository for SqliteStore {
    async fn get_preferences(&self, user_id: UserId) -> Result<Option<NotificationPreferences>> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM notification_preferences WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        match data {
            Some(json) => {
                let prefs = serde_json::from_str(&json).map_err(StoreError::from)?;
                Ok(Some(prefs))
            }
            None => Ok(None),
        }
    }

    async fn put_preferences(&self, prefs: &NotificationPreferences) -> Result<()> {
        let data = serde_json::to_string(prefs).map_err(StoreError::from)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO notification_preferences (user_id, data, updated)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET data = excluded.data, updated = excluded.updated
            "#,
            params![prefs.user_id.to_string(), data, prefs.updated.timestamp_millis()],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }
}
