//! In-memory queue store.
//!
//! Used in tests and single-process deployments without PostgreSQL. A
//! single async mutex guards the whole table, which makes the
//! claim-next-row operation trivially atomic: selection and the status
//! flip happen under one lock acquisition.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::{QUEUE_CLAIMED_TOTAL, QUEUE_ENQUEUED_TOTAL, QUEUE_REQUEUED_TOTAL};
use crate::paging::{paginate, PageRequest, PagedResult};
use crate::payload;

use super::models::{MessageStatus, NewQueuedMessage, QueueFilter, QueueSummary, QueuedMessage};
use super::store::QueueStore;

struct QueueInner {
    next_id: i64,
    rows: BTreeMap<i64, QueuedMessage>,
}

/// In-memory `QueueStore` implementation.
pub struct MemoryQueueStore {
    inner: Mutex<QueueInner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
        }
    }

    fn insert_row(inner: &mut QueueInner, new: NewQueuedMessage, now: DateTime<Utc>) -> QueuedMessage {
        let id = inner.next_id;
        inner.next_id += 1;

        let row = QueuedMessage {
            id,
            request_id: new.request_id,
            recipient_id: new.recipient_id,
            channel: new.channel,
            content: new.content,
            priority: new.priority,
            status: MessageStatus::Queued,
            scheduled_at: new.scheduled_at.unwrap_or(now),
            created_at: now,
            processed_at: None,
        };
        inner.rows.insert(id, row.clone());
        row
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, new: NewQueuedMessage) -> Result<QueuedMessage> {
        new.validate()?;

        let mut inner = self.inner.lock().await;
        let row = Self::insert_row(&mut inner, new, Utc::now());
        QUEUE_ENQUEUED_TOTAL.inc();

        tracing::trace!(
            message_id = row.id,
            request_id = %row.request_id,
            channel = %row.channel,
            "Message enqueued"
        );

        Ok(row)
    }

    async fn bulk_enqueue(&self, batch: Vec<NewQueuedMessage>) -> Result<u64> {
        // Validate the whole batch before touching the table: all-or-nothing.
        for new in &batch {
            new.validate()?;
        }

        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let count = batch.len() as u64;
        for new in batch {
            Self::insert_row(&mut inner, new, now);
            QUEUE_ENQUEUED_TOTAL.inc();
        }

        Ok(count)
    }

    async fn dequeue_next(&self) -> Result<Option<QueuedMessage>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        // Highest priority first, then FIFO by creation time, then id as
        // the final tie-break for rows created in the same instant.
        let next_id = inner
            .rows
            .values()
            .filter(|row| row.is_eligible(now))
            .min_by_key(|row| (std::cmp::Reverse(row.priority), row.created_at, row.id))
            .map(|row| row.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let row = inner.rows.get_mut(&id).map(|row| {
            row.status = MessageStatus::Processing;
            row.processed_at = Some(now);
            row.clone()
        });

        if row.is_some() {
            QUEUE_CLAIMED_TOTAL.inc();
        }

        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<QueuedMessage>> {
        Ok(self.inner.lock().await.rows.get(&id).cloned())
    }

    async fn requeue(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.status = MessageStatus::Queued;
                row.processed_at = None;
                row.priority += 1;
                QUEUE_REQUEUED_TOTAL.inc();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_processing(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.status = MessageStatus::Processing;
                row.processed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_completed(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.status = MessageStatus::Completed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, id: i64, error: Option<&str>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.status = MessageStatus::Failed;
                if let Some(details) = error {
                    row.content = payload::with_error_details(&row.content, details);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_priority(&self, id: i64, priority: i32) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.priority = priority;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn promote_priority(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) => {
                row.priority += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query(
        &self,
        filter: &QueueFilter,
        page: PageRequest,
    ) -> Result<PagedResult<QueuedMessage>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<QueuedMessage> = inner
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();

        if filter.high_priority_first {
            rows.sort_by_key(|row| (std::cmp::Reverse(row.priority), row.created_at, row.id));
        } else {
            rows.sort_by_key(|row| (row.created_at, row.id));
        }

        Ok(paginate(rows, page))
    }

    async fn reschedule_stale(
        &self,
        older_than: Duration,
        from_status: MessageStatus,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let cutoff = Utc::now() - older_than;
        let mut rescued = 0;

        for row in inner.rows.values_mut() {
            if row.status == from_status
                && row.processed_at.map(|at| at < cutoff).unwrap_or(false)
            {
                row.status = MessageStatus::Queued;
                row.processed_at = None;
                row.priority += 1;
                rescued += 1;
            }
        }

        if rescued > 0 {
            QUEUE_REQUEUED_TOTAL.inc_by(rescued);
            tracing::info!(
                rescued = rescued,
                from_status = %from_status,
                "Rescheduled stale queue rows"
            );
        }

        Ok(rescued)
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.rows.len();
        inner.rows.retain(|_, row| {
            !(row.status.is_terminal()
                && row.processed_at.map(|at| at < older_than).unwrap_or(false))
        });
        Ok((before - inner.rows.len()) as u64)
    }

    async fn fail_for_request(&self, request_id: Uuid, error: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut failed = 0;

        for row in inner.rows.values_mut() {
            if row.request_id == request_id && row.status == MessageStatus::Queued {
                row.status = MessageStatus::Failed;
                row.content = payload::with_error_details(&row.content, error);
                failed += 1;
            }
        }

        Ok(failed)
    }

    async fn status_summary(&self) -> Result<QueueSummary> {
        let inner = self.inner.lock().await;
        let mut summary = QueueSummary::default();

        for row in inner.rows.values() {
            match row.status {
                MessageStatus::Queued => summary.queued += 1,
                MessageStatus::Processing => summary.processing += 1,
                MessageStatus::Failed => summary.failed += 1,
                MessageStatus::Completed => {}
            }
            if !row.status.is_terminal() {
                *summary.by_channel.entry(row.channel.clone()).or_default() += 1;
                *summary.by_priority.entry(row.priority).or_default() += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_message(priority: i32) -> NewQueuedMessage {
        NewQueuedMessage::new(
            Uuid::now_v7(),
            "keeper-7",
            "sms",
            json!({"body": "movement permit approved"}),
        )
        .with_priority(priority)
    }

    #[tokio::test]
    async fn test_enqueue_assigns_sequential_ids() {
        let store = MemoryQueueStore::new();
        let first = store.enqueue(new_message(0)).await.unwrap();
        let second = store.enqueue(new_message(0)).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.status, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid() {
        let store = MemoryQueueStore::new();
        let mut bad = new_message(0);
        bad.recipient_id = String::new();

        assert!(store.enqueue(bad).await.is_err());
        let summary = store.status_summary().await.unwrap();
        assert_eq!(summary.queued, 0);
    }

    #[tokio::test]
    async fn test_bulk_enqueue_all_or_nothing() {
        let store = MemoryQueueStore::new();
        let mut bad = new_message(0);
        bad.channel = String::new();

        let result = store.bulk_enqueue(vec![new_message(0), bad]).await;
        assert!(result.is_err());

        // First message must not have been written either.
        let summary = store.status_summary().await.unwrap();
        assert_eq!(summary.queued, 0);
    }

    #[tokio::test]
    async fn test_dequeue_orders_by_priority_then_age() {
        let store = MemoryQueueStore::new();
        let low = store.enqueue(new_message(1)).await.unwrap();
        let high = store.enqueue(new_message(10)).await.unwrap();
        let mid = store.enqueue(new_message(5)).await.unwrap();

        let claimed: Vec<i64> = [
            store.dequeue_next().await.unwrap().unwrap().id,
            store.dequeue_next().await.unwrap().unwrap().id,
            store.dequeue_next().await.unwrap().unwrap().id,
        ]
        .to_vec();

        assert_eq!(claimed, vec![high.id, mid.id, low.id]);
        assert!(store.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_skips_future_scheduled() {
        let store = MemoryQueueStore::new();
        let mut deferred = new_message(10);
        deferred.scheduled_at = Some(Utc::now() + Duration::hours(1));
        store.enqueue(deferred).await.unwrap();
        let ready = store.enqueue(new_message(0)).await.unwrap();

        let claimed = store.dequeue_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, ready.id);
        assert!(store.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_requeue_bumps_priority() {
        let store = MemoryQueueStore::new();
        let row = store.enqueue(new_message(2)).await.unwrap();
        store.dequeue_next().await.unwrap().unwrap();

        assert!(store.requeue(row.id).await.unwrap());

        let row = store.get(row.id).await.unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Queued);
        assert_eq!(row.priority, 3);
        assert!(row.processed_at.is_none());

        assert!(!store.requeue(9999).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_failed_merges_error() {
        let store = MemoryQueueStore::new();
        let row = store.enqueue(new_message(0)).await.unwrap();

        assert!(store.mark_failed(row.id, Some("provider down")).await.unwrap());

        let row = store.get(row.id).await.unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(crate::payload::error_details(&row.content), Some("provider down"));
        assert_eq!(row.content["body"], "movement permit approved");
    }

    #[tokio::test]
    async fn test_reschedule_stale() {
        let store = MemoryQueueStore::new();
        let stuck = store.enqueue(new_message(1)).await.unwrap();
        store.dequeue_next().await.unwrap().unwrap();

        // Backdate the claim to simulate a crashed worker.
        {
            let mut inner = store.inner.lock().await;
            inner.rows.get_mut(&stuck.id).unwrap().processed_at =
                Some(Utc::now() - Duration::minutes(10));
        }

        let fresh = store.enqueue(new_message(1)).await.unwrap();
        store.mark_processing(fresh.id).await.unwrap();

        let rescued = store
            .reschedule_stale(Duration::minutes(5), MessageStatus::Processing)
            .await
            .unwrap();
        assert_eq!(rescued, 1);

        let stuck = store.get(stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, MessageStatus::Queued);
        assert_eq!(stuck.priority, 2);
        assert!(stuck.processed_at.is_none());

        let fresh = store.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, MessageStatus::Processing);
    }

    #[tokio::test]
    async fn test_purge_processed_only_touches_terminal() {
        let store = MemoryQueueStore::new();
        let done = store.enqueue(new_message(0)).await.unwrap();
        store.dequeue_next().await.unwrap().unwrap();
        store.mark_completed(done.id).await.unwrap();
        {
            let mut inner = store.inner.lock().await;
            inner.rows.get_mut(&done.id).unwrap().processed_at =
                Some(Utc::now() - Duration::days(10));
        }
        store.enqueue(new_message(0)).await.unwrap();

        let purged = store
            .purge_processed(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 1);

        let summary = store.status_summary().await.unwrap();
        assert_eq!(summary.queued, 1);
    }

    #[tokio::test]
    async fn test_fail_for_request_spares_claimed_rows() {
        let store = MemoryQueueStore::new();
        let request_id = Uuid::now_v7();
        let make = |priority: i32| {
            NewQueuedMessage::new(request_id, "keeper-7", "sms", json!({"n": 1}))
                .with_priority(priority)
        };

        store.enqueue(make(5)).await.unwrap();
        let sibling = store.enqueue(make(0)).await.unwrap();
        let claimed = store.dequeue_next().await.unwrap().unwrap();

        let failed = store.fail_for_request(request_id, "request cancelled").await.unwrap();
        assert_eq!(failed, 1);

        let sibling = store.get(sibling.id).await.unwrap().unwrap();
        assert_eq!(sibling.status, MessageStatus::Failed);

        // The claimed row finishes its current attempt untouched.
        let claimed = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, MessageStatus::Processing);
    }

    #[tokio::test]
    async fn test_query_pagination_and_order() {
        let store = MemoryQueueStore::new();
        for priority in [1, 3, 2] {
            store.enqueue(new_message(priority)).await.unwrap();
        }

        let mut filter = QueueFilter {
            high_priority_first: true,
            ..Default::default()
        };
        let result = store.query(&filter, PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].priority, 3);
        assert_eq!(result.items[1].priority, 2);

        filter.high_priority_first = false;
        let result = store.query(&filter, PageRequest::new(1, 10)).await.unwrap();
        let ids: Vec<i64> = result.items.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_status_summary_counts() {
        let store = MemoryQueueStore::new();
        let mut email = new_message(2);
        email.channel = "email".to_string();
        store.enqueue(email).await.unwrap();
        store.enqueue(new_message(2)).await.unwrap();
        let failed = store.enqueue(new_message(0)).await.unwrap();
        store.mark_failed(failed.id, None).await.unwrap();

        let summary = store.status_summary().await.unwrap();
        assert_eq!(summary.queued, 2);
        assert_eq!(summary.processing, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_channel.get("email"), Some(&1));
        assert_eq!(summary.by_channel.get("sms"), Some(&1));
        assert_eq!(summary.by_priority.get(&2), Some(&2));
    }
}
