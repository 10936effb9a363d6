//! In-memory event log store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::paging::{paginate, PageRequest, PagedResult};

use super::models::{event_types, ErrorFrequency, LogEntry, LogFilter, LogOwner};
use super::store::EventLogStore;

struct LogInner {
    next_id: i64,
    rows: Vec<LogEntry>,
    archived: Vec<LogEntry>,
}

/// In-memory `EventLogStore` implementation.
pub struct MemoryEventLogStore {
    inner: Mutex<LogInner>,
}

impl MemoryEventLogStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                next_id: 1,
                rows: Vec::new(),
                archived: Vec::new(),
            }),
        }
    }

    /// Number of rows moved to the archive (test observability).
    pub async fn archived_count(&self) -> usize {
        self.inner.lock().await.archived.len()
    }
}

impl Default for MemoryEventLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLogStore for MemoryEventLogStore {
    async fn append(
        &self,
        owner: &LogOwner,
        event_type: &str,
        data: Value,
        actor: Option<&str>,
    ) -> Result<LogEntry> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let entry = LogEntry {
            id,
            entity_kind: owner.entity_kind.clone(),
            entity_id: owner.entity_id.clone(),
            event_type: event_type.to_string(),
            data,
            actor: actor.map(str::to_string),
            created_at: Utc::now(),
        };
        inner.rows.push(entry.clone());

        Ok(entry)
    }

    async fn query(
        &self,
        owner: &LogOwner,
        filter: &LogFilter,
        page: PageRequest,
    ) -> Result<PagedResult<LogEntry>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<LogEntry> = inner
            .rows
            .iter()
            .filter(|entry| {
                entry.entity_kind == owner.entity_kind
                    && entry.entity_id == owner.entity_id
                    && filter.matches(entry)
            })
            .cloned()
            .collect();

        rows.sort_by_key(|entry| (std::cmp::Reverse(entry.created_at), std::cmp::Reverse(entry.id)));

        Ok(paginate(rows, page))
    }

    async fn by_event_type(&self, owner: &LogOwner, event_type: &str) -> Result<Vec<LogEntry>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<LogEntry> = inner
            .rows
            .iter()
            .filter(|entry| {
                entry.entity_kind == owner.entity_kind
                    && entry.entity_id == owner.entity_id
                    && entry.event_type == event_type
            })
            .cloned()
            .collect();
        rows.sort_by_key(|entry| entry.id);
        Ok(rows)
    }

    async fn archive(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let (old, live): (Vec<LogEntry>, Vec<LogEntry>) = inner
            .rows
            .drain(..)
            .partition(|entry| entry.created_at < cutoff);

        let moved = old.len() as u64;
        inner.archived.extend(old);
        inner.rows = live;

        Ok(moved)
    }

    async fn frequent_errors(
        &self,
        since: DateTime<Utc>,
        filter: &LogFilter,
    ) -> Result<Vec<ErrorFrequency>> {
        let inner = self.inner.lock().await;
        let mut buckets: std::collections::HashMap<String, (i64, DateTime<Utc>)> =
            std::collections::HashMap::new();

        for entry in &inner.rows {
            if entry.created_at < since
                || !event_types::ERROR_TYPES.contains(&entry.event_type.as_str())
                || !filter.matches(entry)
            {
                continue;
            }
            let bucket = buckets
                .entry(entry.event_type.clone())
                .or_insert((0, entry.created_at));
            bucket.0 += 1;
            bucket.1 = bucket.1.max(entry.created_at);
        }

        let mut frequencies: Vec<ErrorFrequency> = buckets
            .into_iter()
            .map(|(error_type, (count, last_seen))| ErrorFrequency {
                error_type,
                count,
                last_seen,
            })
            .collect();
        frequencies.sort_by_key(|f| (std::cmp::Reverse(f.count), f.error_type.clone()));

        Ok(frequencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_query_newest_first() {
        let store = MemoryEventLogStore::new();
        let owner = LogOwner::delivery(7);

        store
            .append(&owner, event_types::DELIVERY_ATTEMPT, json!({"n": 1}), None)
            .await
            .unwrap();
        store
            .append(&owner, event_types::PROVIDER_RESPONSE, json!({"n": 2}), None)
            .await
            .unwrap();
        store
            .append(
                &LogOwner::delivery(8),
                event_types::DELIVERY_ATTEMPT,
                json!({}),
                None,
            )
            .await
            .unwrap();

        let result = store
            .query(&owner, &LogFilter::default(), PageRequest::default())
            .await
            .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.items[0].event_type, event_types::PROVIDER_RESPONSE);
    }

    #[tokio::test]
    async fn test_by_event_type_oldest_first() {
        let store = MemoryEventLogStore::new();
        let owner = LogOwner::delivery(7);
        for n in 0..3 {
            store
                .append(&owner, event_types::DELIVERY_ATTEMPT, json!({"n": n}), None)
                .await
                .unwrap();
        }
        store
            .append(&owner, event_types::DELIVERY_FAILED, json!({}), None)
            .await
            .unwrap();

        let attempts = store
            .by_event_type(&owner, event_types::DELIVERY_ATTEMPT)
            .await
            .unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].data["n"], 0);
        assert_eq!(attempts[2].data["n"], 2);
    }

    #[tokio::test]
    async fn test_record_swallows_nothing_on_success() {
        let store = MemoryEventLogStore::new();
        let owner = LogOwner::request(uuid::Uuid::now_v7());

        store
            .record(&owner, event_types::STATUS_CHANGED, json!({"to": "pending"}), Some("clerk-1"))
            .await;

        let result = store
            .query(&owner, &LogFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.items[0].actor.as_deref(), Some("clerk-1"));
    }

    #[tokio::test]
    async fn test_archive_moves_old_rows() {
        let store = MemoryEventLogStore::new();
        let owner = LogOwner::delivery(1);
        store
            .append(&owner, event_types::DELIVERY_ATTEMPT, json!({}), None)
            .await
            .unwrap();
        store
            .append(&owner, event_types::DELIVERY_FAILED, json!({}), None)
            .await
            .unwrap();

        // Backdate the first row.
        {
            let mut inner = store.inner.lock().await;
            inner.rows[0].created_at = Utc::now() - Duration::days(100);
        }

        let moved = store
            .archive(Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(store.archived_count().await, 1);

        let remaining = store
            .query(&owner, &LogFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(remaining.total, 1);
    }

    #[tokio::test]
    async fn test_frequent_errors_aggregation() {
        let store = MemoryEventLogStore::new();
        let owner = LogOwner::delivery(1);

        for _ in 0..3 {
            store
                .append(&owner, event_types::DELIVERY_FAILED, json!({}), None)
                .await
                .unwrap();
        }
        store
            .append(&owner, event_types::PROVIDER_ERROR, json!({}), None)
            .await
            .unwrap();
        // Not an error type; must not be counted.
        store
            .append(&owner, event_types::PROVIDER_RESPONSE, json!({}), None)
            .await
            .unwrap();

        let frequencies = store
            .frequent_errors(Utc::now() - Duration::hours(1), &LogFilter::default())
            .await
            .unwrap();

        assert_eq!(frequencies.len(), 2);
        assert_eq!(frequencies[0].error_type, event_types::DELIVERY_FAILED);
        assert_eq!(frequencies[0].count, 3);
        assert_eq!(frequencies[1].count, 1);
    }
}
