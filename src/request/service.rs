//! Request fan-out and cross-store coordination.
//!
//! `RequestService` is the write path callers use: it owns the request
//! store plus the queue and log, so submission can expand a request into
//! per-recipient queue rows and cancellation can cascade to still-Queued
//! siblings. Consistency across the stores is eventual; no transaction
//! spans more than one of them.

use std::sync::Arc;

use serde_json::json;

use crate::error::Result;
use crate::eventlog::{event_types, EventLogStore, LogOwner};
use crate::metrics::{REQUESTS_EXPIRED_TOTAL, REQUESTS_SUBMITTED_TOTAL};
use crate::queue::{NewQueuedMessage, QueueStore};

use super::models::{NewRequest, NotificationRequest, Recipient};
use super::store::RequestStore;

/// Error merged into sibling queue rows when their request is cancelled.
const CANCELLED_ERROR: &str = "request cancelled";

/// Coordinates the request store with the queue and the event log.
pub struct RequestService {
    requests: Arc<dyn RequestStore>,
    queue: Arc<dyn QueueStore>,
    log: Arc<dyn EventLogStore>,
}

impl RequestService {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        queue: Arc<dyn QueueStore>,
        log: Arc<dyn EventLogStore>,
    ) -> Self {
        Self { requests, queue, log }
    }

    pub fn requests(&self) -> &Arc<dyn RequestStore> {
        &self.requests
    }

    /// Create a request and fan it out into one queue row per recipient.
    ///
    /// The queue insert is all-or-nothing; if it fails the request is
    /// marked Failed so it cannot sit Pending forever with no messages.
    #[tracing::instrument(
        name = "request.submit",
        skip(self, new, recipients),
        fields(application_id = %new.application_id, recipient_count = recipients.len())
    )]
    pub async fn submit(
        &self,
        new: NewRequest,
        recipients: Vec<Recipient>,
    ) -> Result<NotificationRequest> {
        new.validate()?;

        let request = self.requests.create(new).await?;
        let queue_priority = request.priority.queue_priority();

        let batch: Vec<NewQueuedMessage> = recipients
            .into_iter()
            .map(|recipient| {
                let content = recipient.content.unwrap_or_else(|| request.payload.clone());
                NewQueuedMessage::new(request.id, recipient.recipient_id, recipient.channel, content)
                    .with_priority(queue_priority)
            })
            .collect();

        let message_count = batch.len();
        if let Err(e) = self.queue.bulk_enqueue(batch).await {
            tracing::error!(
                request_id = %request.id,
                error = %e,
                "Fan-out failed, marking request as failed"
            );
            let _ = self
                .requests
                .mark_failed(request.id, &format!("fan-out failed: {e}"))
                .await;
            return Err(e);
        }

        REQUESTS_SUBMITTED_TOTAL.inc();

        self.log
            .record(
                &LogOwner::request(request.id),
                event_types::REQUEST_SUBMITTED,
                json!({
                    "applicationId": request.application_id,
                    "templateId": request.template_id,
                    "priority": request.priority.as_str(),
                    "messages": message_count,
                }),
                request.requested_by.as_deref(),
            )
            .await;

        tracing::info!(
            request_id = %request.id,
            messages = message_count,
            priority = %request.priority,
            "Request submitted"
        );

        Ok(request)
    }

    /// Cancel a request and cascade to its still-Queued messages.
    ///
    /// Messages already claimed by a worker finish their current attempt;
    /// cancellation only stops future claims. Returns false when the
    /// request is unknown or already terminal.
    #[tracing::instrument(name = "request.cancel", skip(self), fields(request_id = %id))]
    pub async fn cancel(&self, id: uuid::Uuid) -> Result<bool> {
        if !self.requests.cancel(id).await? {
            return Ok(false);
        }

        let failed_siblings = self.queue.fail_for_request(id, CANCELLED_ERROR).await?;

        self.log
            .record(
                &LogOwner::request(id),
                event_types::STATUS_CHANGED,
                json!({ "to": "cancelled", "failedSiblings": failed_siblings }),
                None,
            )
            .await;

        tracing::info!(
            request_id = %id,
            failed_siblings = failed_siblings,
            "Request cancelled"
        );

        Ok(true)
    }

    /// Sweep non-terminal requests past their expiry to Cancelled,
    /// cascading like `cancel`. Returns how many requests were swept.
    pub async fn expire_overdue(&self) -> Result<u64> {
        let overdue = self.requests.expired().await?;
        let mut swept = 0;

        for request in overdue {
            if !self.requests.cancel(request.id).await? {
                // Lost the race against a concurrent terminal transition.
                continue;
            }
            let failed_siblings = self
                .queue
                .fail_for_request(request.id, "request expired")
                .await?;

            REQUESTS_EXPIRED_TOTAL.inc();
            swept += 1;

            self.log
                .record(
                    &LogOwner::request(request.id),
                    event_types::STATUS_CHANGED,
                    json!({
                        "to": "cancelled",
                        "reason": "expired",
                        "expiredAt": request.expires_at,
                        "failedSiblings": failed_siblings,
                    }),
                    None,
                )
                .await;
        }

        if swept > 0 {
            tracing::info!(swept = swept, "Expired overdue requests");
        }

        Ok(swept)
    }
}
