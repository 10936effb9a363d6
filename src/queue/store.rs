//! Storage trait for the message queue.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::paging::{PageRequest, PagedResult};

use super::models::{MessageStatus, NewQueuedMessage, QueueFilter, QueueSummary, QueuedMessage};

/// Storage for pending notification dispatches.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; multiple worker tasks call
/// `dequeue_next` concurrently.
///
/// # Claim Discipline
///
/// `dequeue_next` is the one concurrency-critical operation: selecting the
/// next eligible row and flipping it to Processing must be a single atomic
/// unit so no two callers ever claim the same row. Everything else is a
/// plain single-row or batch mutation.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert one message with status Queued.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Validation` when recipient, channel, or
    /// content are absent; nothing is written in that case.
    async fn enqueue(&self, new: NewQueuedMessage) -> Result<QueuedMessage>;

    /// Insert a batch atomically: either every message is queued or none
    /// is. Validation runs for the whole batch before the first write.
    async fn bulk_enqueue(&self, batch: Vec<NewQueuedMessage>) -> Result<u64>;

    /// Atomically claim the next eligible row.
    ///
    /// Picks the highest-priority, oldest Queued row whose scheduled time
    /// has passed, flips it to Processing, and stamps `processed_at`.
    /// Returns `None` when nothing is eligible.
    async fn dequeue_next(&self) -> Result<Option<QueuedMessage>>;

    /// Fetch a single row by id.
    async fn get(&self, id: i64) -> Result<Option<QueuedMessage>>;

    /// Return a row to the queue: status Queued, `processed_at` cleared,
    /// priority bumped by one so repeatedly requeued rows stop starving.
    /// Returns false when the id is unknown.
    async fn requeue(&self, id: i64) -> Result<bool>;

    /// Direct transition to Processing.
    async fn mark_processing(&self, id: i64) -> Result<bool>;

    /// Direct transition to Completed.
    async fn mark_completed(&self, id: i64) -> Result<bool>;

    /// Direct transition to Failed; when `error` is given it is merged
    /// into the content payload under `errorDetails`.
    async fn mark_failed(&self, id: i64, error: Option<&str>) -> Result<bool>;

    /// Replace the priority of a row.
    async fn update_priority(&self, id: i64, priority: i32) -> Result<bool>;

    /// Bump the priority of a row by one.
    async fn promote_priority(&self, id: i64) -> Result<bool>;

    /// Paged, filtered listing. Ordered by (priority desc, created_at asc)
    /// when the filter asks for `high_priority_first`, else created_at asc.
    async fn query(
        &self,
        filter: &QueueFilter,
        page: PageRequest,
    ) -> Result<PagedResult<QueuedMessage>>;

    /// Recover rows stuck in `from_status` for longer than `older_than`:
    /// back to Queued with priority bumped and `processed_at` cleared.
    /// Returns the number of rows rescued.
    async fn reschedule_stale(&self, older_than: Duration, from_status: MessageStatus)
        -> Result<u64>;

    /// Hard-delete terminal rows processed before the cutoff.
    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Fail every still-Queued sibling of a request, merging `error` into
    /// each payload. Used when a request is cancelled; rows already claimed
    /// finish their current attempt.
    async fn fail_for_request(&self, request_id: Uuid, error: &str) -> Result<u64>;

    /// Operational snapshot: counts by status, channel, and priority.
    async fn status_summary(&self) -> Result<QueueSummary>;
}
