//! Storage trait for notification requests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::paging::{PageRequest, PagedResult};

use super::models::{NewRequest, NotificationRequest, RequestFilter, RequestPriority, RequestStatus};

/// Storage for request lifecycle rows.
///
/// Every transition returns `false` instead of erroring when the target row
/// is missing or already terminal, so bulk callers and sweeps can branch
/// without exception overhead.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Create a request with a fresh time-sortable id and status Pending.
    async fn create(&self, new: NewRequest) -> Result<NotificationRequest>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRequest>>;

    /// Pending → Processing.
    async fn mark_processing(&self, id: Uuid) -> Result<bool>;

    /// Non-terminal → Completed.
    async fn mark_completed(&self, id: Uuid) -> Result<bool>;

    /// Non-terminal → Failed; `error` is merged into the payload under
    /// `errorDetails`.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Pending/Processing → Cancelled. Returns false from any terminal
    /// state.
    async fn cancel(&self, id: Uuid) -> Result<bool>;

    /// Set an arbitrary status; refused (false) when the row is terminal.
    async fn update_status(&self, id: Uuid, status: RequestStatus) -> Result<bool>;

    async fn update_priority(&self, id: Uuid, priority: RequestPriority) -> Result<bool>;

    /// Apply `update_status` across ids; returns how many rows changed.
    async fn bulk_update_status(&self, ids: &[Uuid], status: RequestStatus) -> Result<u64>;

    /// Cancel every id still in Pending/Processing; returns how many rows
    /// changed.
    async fn bulk_cancel(&self, ids: &[Uuid]) -> Result<u64>;

    /// Non-terminal rows whose expiry has passed. Polled by the
    /// maintenance sweep, which then cancels each one.
    async fn expired(&self) -> Result<Vec<NotificationRequest>>;

    /// Paged, filtered listing ordered by priority band (High, Normal,
    /// Low), then created_at descending.
    async fn query(
        &self,
        filter: &RequestFilter,
        page: PageRequest,
    ) -> Result<PagedResult<NotificationRequest>>;
}
