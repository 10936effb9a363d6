//! In-memory delivery store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::paging::{paginate, PageRequest, PagedResult};
use crate::payload;

use super::models::{DeliveryFilter, DeliveryStatus, MessageDelivery, NewDelivery};
use super::store::DeliveryStore;

struct DeliveryInner {
    next_id: i64,
    rows: BTreeMap<i64, MessageDelivery>,
}

/// In-memory `DeliveryStore` implementation.
pub struct MemoryDeliveryStore {
    inner: Mutex<DeliveryInner>,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DeliveryInner {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
        }
    }
}

impl Default for MemoryDeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn create(&self, new: NewDelivery) -> Result<MessageDelivery> {
        new.validate()?;

        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let row = MessageDelivery {
            id,
            queue_id: new.queue_id,
            request_id: new.request_id,
            recipient_id: new.recipient_id,
            provider_id: new.provider_id,
            channel: new.channel,
            content: new.content,
            status: DeliveryStatus::Queued,
            attempt_count: 0,
            last_attempt_at: None,
            delivered_at: None,
            provider_response: None,
            provider_message_id: None,
            created_at: Utc::now(),
        };
        inner.rows.insert(id, row.clone());

        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<MessageDelivery>> {
        Ok(self.inner.lock().await.rows.get(&id).cloned())
    }

    async fn mark_attempted(
        &self,
        id: i64,
        provider_response: &str,
        provider_message_id: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.status = DeliveryStatus::Attempted;
                row.attempt_count += 1;
                row.last_attempt_at = Some(Utc::now());
                row.provider_response = Some(provider_response.to_string());
                if let Some(message_id) = provider_message_id {
                    row.provider_message_id = Some(message_id.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_delivered(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                // Idempotent: a second call keeps the original timestamp.
                if row.status != DeliveryStatus::Delivered {
                    row.status = DeliveryStatus::Delivered;
                    row.delivered_at = Some(Utc::now());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, id: i64, reason: &str, permanent: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.status = DeliveryStatus::Failed;
                row.provider_response = Some(reason.to_string());
                if permanent {
                    row.content =
                        payload::merge_key(&row.content, payload::PERMANENT_KEY, true.into());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn retry(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.status = DeliveryStatus::Queued;
                row.attempt_count += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reassign_provider(&self, id: i64, new_provider_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.provider_id = new_provider_id.to_string();
                row.status = DeliveryStatus::Queued;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query(
        &self,
        filter: &DeliveryFilter,
        page: PageRequest,
    ) -> Result<PagedResult<MessageDelivery>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<MessageDelivery> = inner
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();

        rows.sort_by_key(|row| (std::cmp::Reverse(row.created_at), std::cmp::Reverse(row.id)));

        Ok(paginate(rows, page))
    }

    async fn status_distribution(&self) -> Result<BTreeMap<String, i64>> {
        let inner = self.inner.lock().await;
        let mut distribution = BTreeMap::new();
        for row in inner.rows.values() {
            *distribution.entry(row.status.as_str().to_string()).or_default() += 1;
        }
        Ok(distribution)
    }

    async fn count_by_status(&self, status: DeliveryStatus) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner.rows.values().filter(|row| row.status == status).count() as i64)
    }

    async fn retry_failed_older_than(&self, age: Duration, max_attempts: i32) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let cutoff = Utc::now() - age;
        let mut requeued = 0;

        for row in inner.rows.values_mut() {
            let old_enough = row
                .last_attempt_at
                .unwrap_or(row.created_at)
                < cutoff;
            if row.status == DeliveryStatus::Failed
                && old_enough
                && row.attempt_count < max_attempts
                && !payload::is_permanent(&row.content)
            {
                row.status = DeliveryStatus::Queued;
                requeued += 1;
            }
        }

        Ok(requeued)
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.rows.len();
        inner
            .rows
            .retain(|_, row| !(row.status.is_terminal() && row.created_at < cutoff));
        Ok((before - inner.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn new_delivery() -> NewDelivery {
        NewDelivery {
            queue_id: Some(1),
            request_id: Uuid::now_v7(),
            recipient_id: "keeper-3".to_string(),
            provider_id: "sns-primary".to_string(),
            channel: "sms".to_string(),
            content: json!({"body": "brand inspection scheduled"}),
        }
    }

    #[tokio::test]
    async fn test_create_starts_queued() {
        let store = MemoryDeliveryStore::new();
        let delivery = store.create(new_delivery()).await.unwrap();

        assert_eq!(delivery.status, DeliveryStatus::Queued);
        assert_eq!(delivery.attempt_count, 0);
        assert!(delivery.delivered_at.is_none());
    }

    #[tokio::test]
    async fn test_attempt_then_deliver() {
        let store = MemoryDeliveryStore::new();
        let delivery = store.create(new_delivery()).await.unwrap();

        assert!(store
            .mark_attempted(delivery.id, "accepted", Some("prov-msg-1"))
            .await
            .unwrap());
        assert!(store.mark_delivered(delivery.id).await.unwrap());

        let row = store.get(delivery.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Delivered);
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.provider_message_id.as_deref(), Some("prov-msg-1"));
        assert!(row.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_delivered_is_idempotent() {
        let store = MemoryDeliveryStore::new();
        let delivery = store.create(new_delivery()).await.unwrap();

        assert!(store.mark_delivered(delivery.id).await.unwrap());
        let first = store.get(delivery.id).await.unwrap().unwrap().delivered_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.mark_delivered(delivery.id).await.unwrap());
        let second = store.get(delivery.id).await.unwrap().unwrap().delivered_at;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_attempt_then_fail_keeps_attempt_count() {
        let store = MemoryDeliveryStore::new();
        let delivery = store.create(new_delivery()).await.unwrap();

        store
            .mark_attempted(delivery.id, "rejected", None)
            .await
            .unwrap();
        store
            .mark_failed(delivery.id, "invalid address", false)
            .await
            .unwrap();

        let row = store.get(delivery.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Failed);
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.provider_response.as_deref(), Some("invalid address"));
    }

    #[tokio::test]
    async fn test_retry_increments_attempts() {
        let store = MemoryDeliveryStore::new();
        let delivery = store.create(new_delivery()).await.unwrap();
        store.mark_failed(delivery.id, "timeout", false).await.unwrap();

        assert!(store.retry(delivery.id).await.unwrap());

        let row = store.get(delivery.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Queued);
        assert_eq!(row.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_reassign_provider_resets_to_queued() {
        let store = MemoryDeliveryStore::new();
        let delivery = store.create(new_delivery()).await.unwrap();
        store.mark_failed(delivery.id, "provider down", false).await.unwrap();

        assert!(store
            .reassign_provider(delivery.id, "sns-fallback")
            .await
            .unwrap());

        let row = store.get(delivery.id).await.unwrap().unwrap();
        assert_eq!(row.provider_id, "sns-fallback");
        assert_eq!(row.status, DeliveryStatus::Queued);
    }

    #[tokio::test]
    async fn test_retry_sweep_respects_attempt_budget() {
        let store = MemoryDeliveryStore::new();

        let under = store.create(new_delivery()).await.unwrap();
        for _ in 0..2 {
            store.mark_attempted(under.id, "no route", None).await.unwrap();
        }
        store.mark_failed(under.id, "no route", false).await.unwrap();

        let exhausted = store.create(new_delivery()).await.unwrap();
        for _ in 0..3 {
            store.mark_attempted(exhausted.id, "no route", None).await.unwrap();
        }
        store.mark_failed(exhausted.id, "no route", false).await.unwrap();

        // Backdate the attempts past the retry window.
        {
            let mut inner = store.inner.lock().await;
            for row in inner.rows.values_mut() {
                row.last_attempt_at = Some(Utc::now() - Duration::hours(1));
            }
        }

        let requeued = store
            .retry_failed_older_than(Duration::minutes(10), 3)
            .await
            .unwrap();
        assert_eq!(requeued, 1);

        assert_eq!(
            store.get(under.id).await.unwrap().unwrap().status,
            DeliveryStatus::Queued
        );
        // The exhausted row is a dead letter.
        assert_eq!(
            store.get(exhausted.id).await.unwrap().unwrap().status,
            DeliveryStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_retry_sweep_skips_permanent_failures() {
        let store = MemoryDeliveryStore::new();
        let permanent = store.create(new_delivery()).await.unwrap();
        store.mark_attempted(permanent.id, "bad address", None).await.unwrap();
        store
            .mark_failed(permanent.id, "bad address", true)
            .await
            .unwrap();

        {
            let mut inner = store.inner.lock().await;
            for row in inner.rows.values_mut() {
                row.last_attempt_at = Some(Utc::now() - Duration::hours(1));
            }
        }

        let requeued = store
            .retry_failed_older_than(Duration::minutes(10), 3)
            .await
            .unwrap();
        assert_eq!(requeued, 0);
        assert_eq!(
            store.get(permanent.id).await.unwrap().unwrap().status,
            DeliveryStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_retry_sweep_ignores_recent_failures() {
        let store = MemoryDeliveryStore::new();
        let recent = store.create(new_delivery()).await.unwrap();
        store.mark_attempted(recent.id, "flaky", None).await.unwrap();
        store.mark_failed(recent.id, "flaky", false).await.unwrap();

        let requeued = store
            .retry_failed_older_than(Duration::minutes(10), 3)
            .await
            .unwrap();
        assert_eq!(requeued, 0);
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_terminal() {
        let store = MemoryDeliveryStore::new();
        let delivered = store.create(new_delivery()).await.unwrap();
        store.mark_delivered(delivered.id).await.unwrap();
        let open = store.create(new_delivery()).await.unwrap();

        {
            let mut inner = store.inner.lock().await;
            for row in inner.rows.values_mut() {
                row.created_at = Utc::now() - Duration::days(60);
            }
        }

        let removed = store
            .cleanup_older_than(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(delivered.id).await.unwrap().is_none());
        assert!(store.get(open.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_status_distribution() {
        let store = MemoryDeliveryStore::new();
        let a = store.create(new_delivery()).await.unwrap();
        store.mark_delivered(a.id).await.unwrap();
        let b = store.create(new_delivery()).await.unwrap();
        store.mark_failed(b.id, "x", false).await.unwrap();
        store.create(new_delivery()).await.unwrap();

        let distribution = store.status_distribution().await.unwrap();
        assert_eq!(distribution.get("delivered"), Some(&1));
        assert_eq!(distribution.get("failed"), Some(&1));
        assert_eq!(distribution.get("queued"), Some(&1));

        assert_eq!(
            store.count_by_status(DeliveryStatus::Failed).await.unwrap(),
            1
        );
    }
}
