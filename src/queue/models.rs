//! Queue data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Lifecycle status of a queued message.
///
/// A row is claimable iff it is `Queued` and its scheduled time has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Processing => "processing",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(MessageStatus::Queued),
            "processing" => Some(MessageStatus::Processing),
            "completed" => Some(MessageStatus::Completed),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Failed)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message waiting for (or undergoing) dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedMessage {
    /// Monotonically increasing sequence id
    pub id: i64,
    /// Owning notification request
    pub request_id: Uuid,
    /// Recipient identifier (address semantics belong to the channel)
    pub recipient_id: String,
    /// Channel tag, e.g. "push", "sms", "email", "webhook"
    pub channel: String,
    /// Opaque message content
    pub content: Value,
    /// Higher is more urgent; bumped by requeue and the stale sweep
    pub priority: i32,
    pub status: MessageStatus,
    /// The row must not be claimed before this time
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Stamped when a worker claims the row
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    /// Whether the row is currently claimable.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Queued && self.scheduled_at <= now
    }
}

/// Input for `enqueue` / `bulk_enqueue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueuedMessage {
    pub request_id: Uuid,
    pub recipient_id: String,
    pub channel: String,
    pub content: Value,
    #[serde(default)]
    pub priority: i32,
    /// Defaults to now when absent.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewQueuedMessage {
    pub fn new(request_id: Uuid, recipient_id: impl Into<String>, channel: impl Into<String>, content: Value) -> Self {
        Self {
            request_id,
            recipient_id: recipient_id.into(),
            channel: channel.into(),
            content,
            priority: 0,
            scheduled_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Reject the message before any write if required fields are absent.
    pub fn validate(&self) -> Result<()> {
        if self.recipient_id.trim().is_empty() {
            return Err(DispatchError::required("recipient_id"));
        }
        if self.channel.trim().is_empty() {
            return Err(DispatchError::required("channel"));
        }
        if self.content.is_null() {
            return Err(DispatchError::required("content"));
        }
        Ok(())
    }
}

/// Filter for paged queue queries. Every field is optional; absent fields
/// do not constrain the result.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub request_id: Option<Uuid>,
    pub recipient_id: Option<String>,
    pub channel: Option<String>,
    pub status: Option<MessageStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Order by (priority desc, created_at asc) instead of created_at asc.
    pub high_priority_first: bool,
}

impl QueueFilter {
    /// In-memory predicate; mirrors the SQL predicates exactly.
    pub fn matches(&self, msg: &QueuedMessage) -> bool {
        if let Some(id) = self.request_id {
            if msg.request_id != id {
                return false;
            }
        }
        if let Some(ref recipient) = self.recipient_id {
            if &msg.recipient_id != recipient {
                return false;
            }
        }
        if let Some(ref channel) = self.channel {
            if &msg.channel != channel {
                return false;
            }
        }
        if let Some(status) = self.status {
            if msg.status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if msg.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if msg.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// Operational snapshot of the queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSummary {
    pub queued: i64,
    pub processing: i64,
    pub failed: i64,
    /// Non-terminal row counts keyed by channel
    pub by_channel: BTreeMap<String, i64>,
    /// Non-terminal row counts keyed by priority
    pub by_priority: BTreeMap<i32, i64>,
}
