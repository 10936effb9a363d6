//! PostgreSQL event log store.
//!
//! Table structure:
//! - `delivery_events` - live append-only rows
//! - `delivery_events_archive` - identical shape, filled by `archive`
//!
//! Archive is copy-then-delete inside one transaction so a crash between
//! the halves can never lose rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::Result;
use crate::paging::{PageRequest, PagedResult};

use super::models::{event_types, ErrorFrequency, LogEntry, LogFilter, LogOwner};
use super::store::EventLogStore;

const COLUMNS: &str = "id, entity_kind, entity_id, event_type, data, actor, created_at";

/// PostgreSQL-backed `EventLogStore` implementation.
pub struct PostgresEventLogStore {
    pool: PgPool,
}

impl PostgresEventLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &PgRow) -> Result<LogEntry> {
        Ok(LogEntry {
            id: row.try_get("id")?,
            entity_kind: row.try_get("entity_kind")?,
            entity_id: row.try_get("entity_id")?,
            event_type: row.try_get("event_type")?,
            data: row.try_get("data")?,
            actor: row.try_get("actor")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn apply_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a LogFilter) {
        if let Some(ref event_type) = filter.event_type {
            qb.push(" AND event_type = ").push_bind(event_type);
        }
        if let Some(ref actor) = filter.actor {
            qb.push(" AND actor = ").push_bind(actor);
        }
        if let Some(after) = filter.created_after {
            qb.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            qb.push(" AND created_at < ").push_bind(before);
        }
    }
}

#[async_trait]
impl EventLogStore for PostgresEventLogStore {
    async fn append(
        &self,
        owner: &LogOwner,
        event_type: &str,
        data: Value,
        actor: Option<&str>,
    ) -> Result<LogEntry> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO delivery_events (entity_kind, entity_id, event_type, data, actor, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&owner.entity_kind)
        .bind(&owner.entity_id)
        .bind(event_type)
        .bind(&data)
        .bind(actor)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_entry(&row)
    }

    async fn query(
        &self,
        owner: &LogOwner,
        filter: &LogFilter,
        page: PageRequest,
    ) -> Result<PagedResult<LogEntry>> {
        let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM delivery_events WHERE entity_kind = ",
        );
        count_qb.push_bind(&owner.entity_kind);
        count_qb.push(" AND entity_id = ").push_bind(&owner.entity_id);
        Self::apply_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select_qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM delivery_events WHERE entity_kind = "
        ));
        select_qb.push_bind(&owner.entity_kind);
        select_qb.push(" AND entity_id = ").push_bind(&owner.entity_id);
        Self::apply_filter(&mut select_qb, filter);
        select_qb.push(" ORDER BY created_at DESC, id DESC");
        select_qb.push(" LIMIT ").push_bind(page.limit());
        select_qb.push(" OFFSET ").push_bind(page.offset());

        let rows = select_qb.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?;

        Ok(PagedResult::new(items, total, page))
    }

    async fn by_event_type(&self, owner: &LogOwner, event_type: &str) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM delivery_events
            WHERE entity_kind = $1 AND entity_id = $2 AND event_type = $3
            ORDER BY id ASC
            "#
        ))
        .bind(&owner.entity_kind)
        .bind(&owner.entity_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn archive(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO delivery_events_archive (id, entity_kind, entity_id, event_type, data, actor, created_at)
            SELECT id, entity_kind, entity_id, event_type, data, actor, created_at
            FROM delivery_events
            WHERE created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM delivery_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let moved = deleted.rows_affected();
        if moved > 0 {
            tracing::info!(moved = moved, "Archived log entries");
        }
        Ok(moved)
    }

    async fn frequent_errors(
        &self,
        since: DateTime<Utc>,
        filter: &LogFilter,
    ) -> Result<Vec<ErrorFrequency>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT event_type, COUNT(*) AS occurrences, MAX(created_at) AS last_seen \
             FROM delivery_events WHERE created_at >= ",
        );
        qb.push_bind(since);
        qb.push(" AND event_type = ANY(").push_bind(
            event_types::ERROR_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>(),
        );
        qb.push(")");
        Self::apply_filter(&mut qb, filter);
        qb.push(" GROUP BY event_type ORDER BY occurrences DESC, event_type ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(ErrorFrequency {
                    error_type: row.try_get("event_type")?,
                    count: row.try_get("occurrences")?,
                    last_seen: row.try_get("last_seen")?,
                })
            })
            .collect()
    }
}
