//! Event log data models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Well-known event types. The column is free-form TEXT; these constants
/// just keep writers consistent.
pub mod event_types {
    pub const STATUS_CHANGED: &str = "StatusChanged";
    pub const PROVIDER_RESPONSE: &str = "ProviderResponse";
    pub const PROVIDER_ERROR: &str = "ProviderError";
    pub const DELIVERY_ATTEMPT: &str = "DeliveryAttempt";
    pub const DELIVERY_FAILED: &str = "DeliveryFailed";
    pub const REQUEST_SUBMITTED: &str = "RequestSubmitted";
    pub const SYSTEM_ERROR: &str = "SystemError";

    /// Event types counted by the frequent-error aggregation.
    pub const ERROR_TYPES: &[&str] = &[PROVIDER_ERROR, DELIVERY_FAILED, SYSTEM_ERROR];
}

/// The entity a log row belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOwner {
    pub entity_kind: String,
    pub entity_id: String,
}

impl LogOwner {
    pub fn new(entity_kind: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            entity_id: entity_id.into(),
        }
    }

    pub fn delivery(id: i64) -> Self {
        Self::new("delivery", id.to_string())
    }

    pub fn request(id: uuid::Uuid) -> Self {
        Self::new("request", id.to_string())
    }

    pub fn queue_message(id: i64) -> Self {
        Self::new("queue_message", id.to_string())
    }
}

/// An immutable log row.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub entity_kind: String,
    pub entity_id: String,
    pub event_type: String,
    /// Opaque event data
    pub data: Value,
    /// User id of the actor, when the event was user-initiated
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for log queries.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl LogFilter {
    /// In-memory predicate; mirrors the SQL predicates exactly.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(ref event_type) = self.event_type {
            if &entry.event_type != event_type {
                return false;
            }
        }
        if let Some(ref actor) = self.actor {
            if entry.actor.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if entry.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if entry.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// One bucket of the frequent-error aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrequency {
    pub error_type: String,
    pub count: i64,
    pub last_seen: DateTime<Utc>,
}
