//! Request data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Lifecycle status of a notification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "processing" => Some(RequestStatus::Processing),
            "completed" => Some(RequestStatus::Completed),
            "failed" => Some(RequestStatus::Failed),
            "cancelled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses are closed: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing priority band. Ordering for listings is High, Normal,
/// Low; the integer priority on queue rows is a separate, finer knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    High,
    Normal,
    Low,
}

impl RequestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::High => "high",
            RequestPriority::Normal => "normal",
            RequestPriority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(RequestPriority::High),
            "normal" => Some(RequestPriority::Normal),
            "low" => Some(RequestPriority::Low),
            _ => None,
        }
    }

    /// Sort rank: lower sorts first in listings.
    pub fn rank(&self) -> i32 {
        match self {
            RequestPriority::High => 0,
            RequestPriority::Normal => 1,
            RequestPriority::Low => 2,
        }
    }

    /// Queue-row priority assigned to this band's messages at fan-out.
    pub fn queue_priority(&self) -> i32 {
        match self {
            RequestPriority::High => 10,
            RequestPriority::Normal => 5,
            RequestPriority::Low => 0,
        }
    }
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted notification request.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest {
    /// Time-sortable unique id (UUIDv7)
    pub id: Uuid,
    /// Originating application reference
    pub application_id: String,
    /// Template reference (rendering happens outside this core)
    pub template_id: String,
    /// Opaque request data
    pub payload: Value,
    pub priority: RequestPriority,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    /// Past this instant a non-terminal request is swept to Cancelled
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional address notified about the outcome by the caller's layer
    pub callback_url: Option<String>,
    /// Identity of the submitter, when known
    pub requested_by: Option<String>,
}

impl NotificationRequest {
    /// Whether the request has logically expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal()
            && self.expires_at.map(|at| at < now).unwrap_or(false)
    }
}

/// Input for request creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub application_id: String,
    pub template_id: String,
    pub payload: Value,
    pub priority: RequestPriority,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl NewRequest {
    pub fn new(
        application_id: impl Into<String>,
        template_id: impl Into<String>,
        payload: Value,
        priority: RequestPriority,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            template_id: template_id.into(),
            payload,
            priority,
            expires_at: None,
            callback_url: None,
            requested_by: None,
        }
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.application_id.trim().is_empty() {
            return Err(DispatchError::required("application_id"));
        }
        if self.template_id.trim().is_empty() {
            return Err(DispatchError::required("template_id"));
        }
        Ok(())
    }
}

/// One fan-out target of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub recipient_id: String,
    pub channel: String,
    /// Per-recipient content override; the request payload is used when
    /// absent.
    #[serde(default)]
    pub content: Option<Value>,
}

impl Recipient {
    pub fn new(recipient_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            channel: channel.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }
}

/// Filter for paged request queries.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub application_id: Option<String>,
    pub template_id: Option<String>,
    pub status: Option<RequestStatus>,
    pub priority: Option<RequestPriority>,
    pub requested_by: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl RequestFilter {
    /// In-memory predicate; mirrors the SQL predicates exactly.
    pub fn matches(&self, request: &NotificationRequest) -> bool {
        if let Some(ref application_id) = self.application_id {
            if &request.application_id != application_id {
                return false;
            }
        }
        if let Some(ref template_id) = self.template_id {
            if &request.template_id != template_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if request.priority != priority {
                return false;
            }
        }
        if let Some(ref requested_by) = self.requested_by {
            if request.requested_by.as_deref() != Some(requested_by.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if request.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if request.created_at >= before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Processing,
            RequestStatus::Completed,
            RequestStatus::Failed,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("stalled"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(RequestPriority::High.rank() < RequestPriority::Normal.rank());
        assert!(RequestPriority::Normal.rank() < RequestPriority::Low.rank());
        assert!(RequestPriority::High.queue_priority() > RequestPriority::Low.queue_priority());
    }

    #[test]
    fn test_expiry_needs_non_terminal_status() {
        let mut request = NotificationRequest {
            id: Uuid::now_v7(),
            application_id: "herdbook".to_string(),
            template_id: "permit-expiry".to_string(),
            payload: json!({}),
            priority: RequestPriority::Normal,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            callback_url: None,
            requested_by: None,
        };

        assert!(request.is_expired(Utc::now()));

        request.status = RequestStatus::Cancelled;
        assert!(!request.is_expired(Utc::now()));

        request.status = RequestStatus::Pending;
        request.expires_at = None;
        assert!(!request.is_expired(Utc::now()));
    }

    #[test]
    fn test_new_request_validation() {
        let ok = NewRequest::new("herdbook", "permit-expiry", json!({}), RequestPriority::High);
        assert!(ok.validate().is_ok());

        let bad = NewRequest::new("", "permit-expiry", json!({}), RequestPriority::High);
        assert!(bad.validate().is_err());
    }
}
