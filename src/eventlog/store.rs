//! Storage trait for the append-only event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::paging::{PageRequest, PagedResult};

use super::models::{ErrorFrequency, LogEntry, LogFilter, LogOwner};

/// Append-only audit trail. Rows are immutable once written; there is no
/// update path.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Append one row.
    async fn append(
        &self,
        owner: &LogOwner,
        event_type: &str,
        data: Value,
        actor: Option<&str>,
    ) -> Result<LogEntry>;

    /// Fire-and-forget append for the dispatch hot path: a failed write is
    /// logged and swallowed, never surfaced to the operation it describes.
    async fn record(&self, owner: &LogOwner, event_type: &str, data: Value, actor: Option<&str>) {
        if let Err(e) = self.append(owner, event_type, data, actor).await {
            tracing::warn!(
                entity_kind = %owner.entity_kind,
                entity_id = %owner.entity_id,
                event_type = %event_type,
                error = %e,
                "Failed to append log entry"
            );
        }
    }

    /// Paged listing for one owner, newest first.
    async fn query(
        &self,
        owner: &LogOwner,
        filter: &LogFilter,
        page: PageRequest,
    ) -> Result<PagedResult<LogEntry>>;

    /// All rows of one event type for one owner, oldest first.
    async fn by_event_type(&self, owner: &LogOwner, event_type: &str) -> Result<Vec<LogEntry>>;

    /// Copy rows created before the cutoff into the archive, then delete
    /// them from the live table. Returns how many rows moved.
    async fn archive(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Aggregate error-class events since `since`:
    /// (error type, count, most recent occurrence), most frequent first.
    async fn frequent_errors(
        &self,
        since: DateTime<Utc>,
        filter: &LogFilter,
    ) -> Result<Vec<ErrorFrequency>>;
}
