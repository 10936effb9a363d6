//! Delivery data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Lifecycle status of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Attempted,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Attempted => "attempted",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeliveryStatus::Queued),
            "attempted" => Some(DeliveryStatus::Attempted),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery attempt series for one (queue row, provider) pairing.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDelivery {
    pub id: i64,
    /// Originating queue row; None for deliveries created outside the
    /// queue path (direct sends recorded for audit).
    pub queue_id: Option<i64>,
    pub request_id: Uuid,
    pub recipient_id: String,
    pub provider_id: String,
    pub channel: String,
    /// Opaque content snapshot handed to the provider
    pub content: Value,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Set iff status is Delivered
    pub delivered_at: Option<DateTime<Utc>>,
    /// Last provider response or failure reason
    pub provider_response: Option<String>,
    /// Identifier assigned by the provider on acceptance
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for delivery creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDelivery {
    #[serde(default)]
    pub queue_id: Option<i64>,
    pub request_id: Uuid,
    pub recipient_id: String,
    pub provider_id: String,
    pub channel: String,
    pub content: Value,
}

impl NewDelivery {
    pub fn validate(&self) -> Result<()> {
        if self.recipient_id.trim().is_empty() {
            return Err(DispatchError::required("recipient_id"));
        }
        if self.provider_id.trim().is_empty() {
            return Err(DispatchError::required("provider_id"));
        }
        if self.channel.trim().is_empty() {
            return Err(DispatchError::required("channel"));
        }
        Ok(())
    }
}

/// Filter for paged delivery queries.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub request_id: Option<Uuid>,
    pub queue_id: Option<i64>,
    pub recipient_id: Option<String>,
    pub provider_id: Option<String>,
    pub channel: Option<String>,
    pub status: Option<DeliveryStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl DeliveryFilter {
    /// In-memory predicate; mirrors the SQL predicates exactly.
    pub fn matches(&self, delivery: &MessageDelivery) -> bool {
        if let Some(id) = self.request_id {
            if delivery.request_id != id {
                return false;
            }
        }
        if let Some(queue_id) = self.queue_id {
            if delivery.queue_id != Some(queue_id) {
                return false;
            }
        }
        if let Some(ref recipient_id) = self.recipient_id {
            if &delivery.recipient_id != recipient_id {
                return false;
            }
        }
        if let Some(ref provider_id) = self.provider_id {
            if &delivery.provider_id != provider_id {
                return false;
            }
        }
        if let Some(ref channel) = self.channel {
            if &delivery.channel != channel {
                return false;
            }
        }
        if let Some(status) = self.status {
            if delivery.status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if delivery.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if delivery.created_at >= before {
                return false;
            }
        }
        true
    }
}
