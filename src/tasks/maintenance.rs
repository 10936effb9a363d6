//! Background maintenance task for the dispatch stores.
//!
//! One task multiplexes the periodic sweeps:
//!
//! - stuck-worker recovery: Processing rows older than the staleness
//!   threshold go back to Queued with a priority bump
//! - request expiration: non-terminal requests past their expiry are
//!   cancelled, cascading to still-Queued siblings
//! - bounded delivery retry: Failed deliveries under the attempt budget
//!   are requeued; dead letters stay Failed
//! - retention: terminal queue/delivery rows are purged and old log rows
//!   archived

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;

use crate::config::{RetentionConfig, SweepConfig};
use crate::delivery::DeliveryStore;
use crate::eventlog::EventLogStore;
use crate::metrics::{DELIVERIES_RETRIED_TOTAL, QUEUE_DEPTH};
use crate::queue::{MessageStatus, QueueStore};
use crate::request::RequestService;

/// Background task running the periodic sweeps.
pub struct MaintenanceTask {
    sweep: SweepConfig,
    retention: RetentionConfig,
    queue: Arc<dyn QueueStore>,
    deliveries: Arc<dyn DeliveryStore>,
    log: Arc<dyn EventLogStore>,
    requests: Arc<RequestService>,
    shutdown: broadcast::Receiver<()>,
}

impl MaintenanceTask {
    pub fn new(
        sweep: SweepConfig,
        retention: RetentionConfig,
        queue: Arc<dyn QueueStore>,
        deliveries: Arc<dyn DeliveryStore>,
        log: Arc<dyn EventLogStore>,
        requests: Arc<RequestService>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            sweep,
            retention,
            queue,
            deliveries,
            log,
            requests,
            shutdown,
        }
    }

    /// Run the sweep timers until shutdown.
    pub async fn run(mut self) {
        let sweep_interval = std::time::Duration::from_secs(self.sweep.interval_seconds);
        let retention_interval = std::time::Duration::from_secs(self.retention.interval_seconds);

        let mut sweep_timer = tokio::time::interval(sweep_interval);
        let mut retention_timer = tokio::time::interval(retention_interval);

        // Skip immediate first tick
        sweep_timer.tick().await;
        retention_timer.tick().await;

        tracing::info!(
            sweep_interval_secs = self.sweep.interval_seconds,
            retention_interval_secs = self.retention.interval_seconds,
            stale_after_minutes = self.sweep.stale_after_minutes,
            max_attempts = self.sweep.max_attempts,
            "Maintenance task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal");
                    break;
                }
                _ = sweep_timer.tick() => {
                    self.run_sweeps().await;
                }
                _ = retention_timer.tick() => {
                    self.run_retention().await;
                }
            }
        }

        tracing::info!("Maintenance task stopped");
    }

    /// One round of the recovery sweeps. Public so deployments can trigger
    /// it out of band (and tests can drive it without timers).
    pub async fn run_sweeps(&self) {
        match self
            .queue
            .reschedule_stale(
                ChronoDuration::minutes(self.sweep.stale_after_minutes as i64),
                MessageStatus::Processing,
            )
            .await
        {
            Ok(rescued) if rescued > 0 => {
                tracing::warn!(rescued = rescued, "Recovered rows from crashed workers");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Stale sweep failed"),
        }

        match self.requests.expire_overdue().await {
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Expiration sweep failed"),
        }

        match self
            .deliveries
            .retry_failed_older_than(
                ChronoDuration::minutes(self.sweep.retry_after_minutes as i64),
                self.sweep.max_attempts,
            )
            .await
        {
            Ok(requeued) if requeued > 0 => {
                DELIVERIES_RETRIED_TOTAL.inc_by(requeued);
                tracing::info!(requeued = requeued, "Retry sweep requeued deliveries");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Retry sweep failed"),
        }

        match self.queue.status_summary().await {
            Ok(summary) => QUEUE_DEPTH.set(summary.queued),
            Err(e) => tracing::error!(error = %e, "Queue summary failed"),
        }
    }

    /// One round of the retention pass.
    pub async fn run_retention(&self) {
        let now = Utc::now();

        match self
            .queue
            .purge_processed(now - ChronoDuration::days(self.retention.queue_retention_days))
            .await
        {
            Ok(purged) if purged > 0 => {
                tracing::info!(purged = purged, "Purged terminal queue rows");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Queue purge failed"),
        }

        match self
            .deliveries
            .cleanup_older_than(now - ChronoDuration::days(self.retention.delivery_retention_days))
            .await
        {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed = removed, "Deleted terminal delivery rows");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Delivery cleanup failed"),
        }

        match self
            .log
            .archive(now - ChronoDuration::days(self.retention.log_archive_days))
            .await
        {
            Ok(moved) if moved > 0 => {
                tracing::info!(moved = moved, "Archived log rows");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Log archive failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MemoryDeliveryStore;
    use crate::eventlog::MemoryEventLogStore;
    use crate::queue::{MemoryQueueStore, NewQueuedMessage};
    use crate::request::{
        MemoryRequestStore, NewRequest, Recipient, RequestPriority, RequestStatus, RequestStore,
    };
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        queue: Arc<MemoryQueueStore>,
        deliveries: Arc<MemoryDeliveryStore>,
        requests: Arc<MemoryRequestStore>,
        service: Arc<RequestService>,
        log: Arc<MemoryEventLogStore>,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(MemoryQueueStore::new());
        let deliveries = Arc::new(MemoryDeliveryStore::new());
        let requests = Arc::new(MemoryRequestStore::new());
        let log = Arc::new(MemoryEventLogStore::new());
        let service = Arc::new(RequestService::new(
            requests.clone(),
            queue.clone(),
            log.clone(),
        ));
        Fixture {
            queue,
            deliveries,
            requests,
            service,
            log,
        }
    }

    fn task(fixture: &Fixture, shutdown: broadcast::Receiver<()>) -> MaintenanceTask {
        MaintenanceTask::new(
            SweepConfig::default(),
            RetentionConfig::default(),
            fixture.queue.clone(),
            fixture.deliveries.clone(),
            fixture.log.clone(),
            fixture.service.clone(),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_sweep_round_expires_requests() {
        let fixture = fixture();
        let (_tx, rx) = broadcast::channel(1);
        let task = task(&fixture, rx);

        let expired = fixture
            .service
            .submit(
                NewRequest::new("herdbook", "permit", json!({}), RequestPriority::Normal)
                    .expires_at(Utc::now() - ChronoDuration::seconds(5)),
                vec![Recipient::new("keeper-1", "sms")],
            )
            .await
            .unwrap();

        task.run_sweeps().await;

        assert_eq!(
            fixture.requests.get(expired.id).await.unwrap().unwrap().status,
            RequestStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_sweep_round_is_safe_on_empty_stores() {
        let fixture = fixture();
        let (_tx, rx) = broadcast::channel(1);
        let task = task(&fixture, rx);

        task.run_sweeps().await;
        task.run_retention().await;

        assert!(fixture
            .queue
            .enqueue(NewQueuedMessage::new(
                Uuid::now_v7(),
                "keeper-1",
                "sms",
                json!({"b": 1}),
            ))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let fixture = fixture();
        let (tx, rx) = broadcast::channel(1);
        let task = task(&fixture, rx);

        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }
}
