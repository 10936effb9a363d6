//! Storage trait for delivery records.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::paging::{PageRequest, PagedResult};

use super::models::{DeliveryFilter, DeliveryStatus, MessageDelivery, NewDelivery};

/// Storage for delivery attempt records.
///
/// Provider invocation failures are caught by the dispatch worker, not
/// here; this layer only persists outcomes. The retry budget lives in the
/// sweep parameters, not on the row.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Create a record with status Queued and attempt_count 0.
    async fn create(&self, new: NewDelivery) -> Result<MessageDelivery>;

    async fn get(&self, id: i64) -> Result<Option<MessageDelivery>>;

    /// Record one attempt: status Attempted, attempt_count incremented,
    /// last_attempt_at stamped, provider response and message id stored.
    async fn mark_attempted(
        &self,
        id: i64,
        provider_response: &str,
        provider_message_id: Option<&str>,
    ) -> Result<bool>;

    /// Finalize as Delivered. Calling on an already-Delivered row is a
    /// no-op success; the original delivered_at is preserved.
    async fn mark_delivered(&self, id: i64) -> Result<bool>;

    /// Finalize as Failed with the given reason. When `permanent`, the row
    /// is tagged so the retry sweep skips it.
    async fn mark_failed(&self, id: i64, reason: &str, permanent: bool) -> Result<bool>;

    /// Record intent to retry without creating a new row: status Queued,
    /// attempt_count incremented.
    async fn retry(&self, id: i64) -> Result<bool>;

    /// Move the delivery to another provider and reset it to Queued.
    /// Used when a provider is ejected from rotation.
    async fn reassign_provider(&self, id: i64, new_provider_id: &str) -> Result<bool>;

    /// Paged, filtered listing ordered by created_at descending.
    async fn query(
        &self,
        filter: &DeliveryFilter,
        page: PageRequest,
    ) -> Result<PagedResult<MessageDelivery>>;

    /// Row counts keyed by status.
    async fn status_distribution(&self) -> Result<BTreeMap<String, i64>>;

    async fn count_by_status(&self, status: DeliveryStatus) -> Result<i64>;

    /// Bounded retry sweep: requeue Failed rows whose last attempt is
    /// older than `age` and whose attempt_count is under `max_attempts`,
    /// skipping rows tagged permanent. Rows at or over the budget stay
    /// Failed (dead letter). Returns how many rows were requeued.
    async fn retry_failed_older_than(&self, age: Duration, max_attempts: i32) -> Result<u64>;

    /// Hard-delete terminal rows created before the cutoff.
    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
