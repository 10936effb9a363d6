//! In-memory request store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::paging::{paginate, PageRequest, PagedResult};
use crate::payload;

use super::models::{
    NewRequest, NotificationRequest, RequestFilter, RequestPriority, RequestStatus,
};
use super::store::RequestStore;

/// In-memory `RequestStore` implementation.
pub struct MemoryRequestStore {
    rows: Mutex<HashMap<Uuid, NotificationRequest>>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    /// Apply a transition guarded on the current status being non-terminal
    /// (and optionally within an allowed set).
    async fn transition<F>(&self, id: Uuid, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut NotificationRequest),
    {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row) if !row.status.is_terminal() => {
                apply(row);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Default for MemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn create(&self, new: NewRequest) -> Result<NotificationRequest> {
        new.validate()?;

        let row = NotificationRequest {
            id: Uuid::now_v7(),
            application_id: new.application_id,
            template_id: new.template_id,
            payload: new.payload,
            priority: new.priority,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            callback_url: new.callback_url,
            requested_by: new.requested_by,
        };

        self.rows.lock().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRequest>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool> {
        self.transition(id, |row| row.status = RequestStatus::Processing)
            .await
    }

    async fn mark_completed(&self, id: Uuid) -> Result<bool> {
        self.transition(id, |row| row.status = RequestStatus::Completed)
            .await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool> {
        self.transition(id, |row| {
            row.status = RequestStatus::Failed;
            row.payload = payload::with_error_details(&row.payload, error);
        })
        .await
    }

    async fn cancel(&self, id: Uuid) -> Result<bool> {
        self.transition(id, |row| row.status = RequestStatus::Cancelled)
            .await
    }

    async fn update_status(&self, id: Uuid, status: RequestStatus) -> Result<bool> {
        self.transition(id, |row| row.status = status).await
    }

    async fn update_priority(&self, id: Uuid, priority: RequestPriority) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row) => {
                row.priority = priority;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn bulk_update_status(&self, ids: &[Uuid], status: RequestStatus) -> Result<u64> {
        let mut changed = 0;
        for id in ids {
            if self.update_status(*id, status).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn bulk_cancel(&self, ids: &[Uuid]) -> Result<u64> {
        let mut changed = 0;
        for id in ids {
            if self.cancel(*id).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn expired(&self) -> Result<Vec<NotificationRequest>> {
        let now = Utc::now();
        let rows = self.rows.lock().await;
        let mut expired: Vec<NotificationRequest> = rows
            .values()
            .filter(|row| row.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|row| row.created_at);
        Ok(expired)
    }

    async fn query(
        &self,
        filter: &RequestFilter,
        page: PageRequest,
    ) -> Result<PagedResult<NotificationRequest>> {
        let rows = self.rows.lock().await;
        let mut matched: Vec<NotificationRequest> = rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();

        matched.sort_by_key(|row| (row.priority.rank(), std::cmp::Reverse(row.created_at)));

        Ok(paginate(matched, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_request(priority: RequestPriority) -> NewRequest {
        NewRequest::new(
            "herdbook",
            "inspection-reminder",
            json!({"farm": "F-100"}),
            priority,
        )
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = MemoryRequestStore::new();
        let request = store.create(new_request(RequestPriority::Normal)).await.unwrap();

        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_happy_path() {
        let store = MemoryRequestStore::new();
        let request = store.create(new_request(RequestPriority::Normal)).await.unwrap();

        assert!(store.mark_processing(request.id).await.unwrap());
        assert!(store.mark_completed(request.id).await.unwrap());

        let row = store.get(request.id).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_terminal_states_are_closed() {
        let store = MemoryRequestStore::new();
        let request = store.create(new_request(RequestPriority::Normal)).await.unwrap();
        store.mark_completed(request.id).await.unwrap();

        assert!(!store.cancel(request.id).await.unwrap());
        assert!(!store.mark_failed(request.id, "late failure").await.unwrap());
        assert!(!store
            .update_status(request.id, RequestStatus::Pending)
            .await
            .unwrap());

        let row = store.get(request.id).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_mark_failed_merges_error() {
        let store = MemoryRequestStore::new();
        let request = store.create(new_request(RequestPriority::Normal)).await.unwrap();

        assert!(store.mark_failed(request.id, "no recipients").await.unwrap());

        let row = store.get(request.id).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::Failed);
        assert_eq!(crate::payload::error_details(&row.payload), Some("no recipients"));
        assert_eq!(row.payload["farm"], "F-100");
    }

    #[tokio::test]
    async fn test_bulk_cancel_skips_terminal() {
        let store = MemoryRequestStore::new();
        let a = store.create(new_request(RequestPriority::Normal)).await.unwrap();
        let b = store.create(new_request(RequestPriority::Normal)).await.unwrap();
        let c = store.create(new_request(RequestPriority::Normal)).await.unwrap();
        store.mark_completed(c.id).await.unwrap();

        let cancelled = store.bulk_cancel(&[a.id, b.id, c.id]).await.unwrap();
        assert_eq!(cancelled, 2);

        assert_eq!(
            store.get(c.id).await.unwrap().unwrap().status,
            RequestStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_expired_excludes_terminal() {
        let store = MemoryRequestStore::new();
        let past = Utc::now() - chrono::Duration::seconds(1);
        let request = store
            .create(new_request(RequestPriority::Normal).expires_at(past))
            .await
            .unwrap();
        store
            .create(new_request(RequestPriority::Normal))
            .await
            .unwrap();

        let expired = store.expired().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, request.id);

        assert!(store.cancel(request.id).await.unwrap());
        assert!(store.expired().await.unwrap().is_empty());
        assert!(!store.cancel(request.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_orders_by_priority_band() {
        let store = MemoryRequestStore::new();
        store.create(new_request(RequestPriority::Low)).await.unwrap();
        store.create(new_request(RequestPriority::High)).await.unwrap();
        store.create(new_request(RequestPriority::Normal)).await.unwrap();

        let result = store
            .query(&RequestFilter::default(), PageRequest::default())
            .await
            .unwrap();

        let priorities: Vec<RequestPriority> =
            result.items.iter().map(|r| r.priority).collect();
        assert_eq!(
            priorities,
            vec![
                RequestPriority::High,
                RequestPriority::Normal,
                RequestPriority::Low
            ]
        );
    }
}
