//! Dispatch worker: drains the queue and drives deliveries to completion.
//!
//! Any number of workers may run against the same stores; the atomic claim
//! in `QueueStore::dequeue_next` is the only coordination between them.
//! Polling-based: an empty claim backs off for the poll interval plus
//! jitter so a fleet of workers does not thunder against the store in
//! lockstep.
//!
//! Per-message failures are isolated. A provider error, a timeout, or a
//! store error while recording an outcome is logged and the loop moves to
//! the next claim; only the shutdown signal stops a worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WorkerConfig;
use crate::delivery::{DeliveryStore, NewDelivery};
use crate::error::Result;
use crate::eventlog::{event_types, EventLogStore, LogOwner};
use crate::metrics::{record_delivery, PROVIDER_SEND_SECONDS};
use crate::provider::{ProviderError, ProviderRegistry};
use crate::queue::{QueueStore, QueuedMessage};

/// The dispatch control loop.
pub struct DispatchWorker {
    worker_id: usize,
    queue: Arc<dyn QueueStore>,
    deliveries: Arc<dyn DeliveryStore>,
    log: Arc<dyn EventLogStore>,
    providers: Arc<ProviderRegistry>,
    config: WorkerConfig,
}

impl DispatchWorker {
    pub fn new(
        worker_id: usize,
        queue: Arc<dyn QueueStore>,
        deliveries: Arc<dyn DeliveryStore>,
        log: Arc<dyn EventLogStore>,
        providers: Arc<ProviderRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id,
            queue,
            deliveries,
            log,
            providers,
            config,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            worker_id = self.worker_id,
            poll_interval_ms = self.config.poll_interval_ms,
            provider_timeout_secs = self.config.provider_timeout_seconds,
            "Dispatch worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(worker_id = self.worker_id, "Dispatch worker received shutdown signal");
                    break;
                }
                claimed = self.process_next() => {
                    match claimed {
                        // Claimed and handled one message; try again immediately.
                        Ok(true) => {}
                        Ok(false) => {
                            tokio::time::sleep(self.idle_backoff()).await;
                        }
                        Err(e) => {
                            tracing::error!(
                                worker_id = self.worker_id,
                                error = %e,
                                "Claim failed, backing off"
                            );
                            tokio::time::sleep(Duration::from_millis(self.config.error_backoff_ms)).await;
                        }
                    }
                }
            }
        }

        tracing::info!(worker_id = self.worker_id, "Dispatch worker stopped");
    }

    /// Claim and dispatch one message. Returns false when nothing was
    /// eligible. Storage errors from the claim itself propagate; errors
    /// after the claim are contained inside `dispatch`.
    pub async fn process_next(&self) -> Result<bool> {
        match self.queue.dequeue_next().await? {
            Some(message) => {
                self.dispatch(message).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Poll interval plus jitter.
    fn idle_backoff(&self) -> Duration {
        let jitter = if self.config.poll_jitter_ms > 0 {
            rand::rng().random_range(0..=self.config.poll_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.poll_interval_ms + jitter)
    }

    /// Drive one claimed message through delivery. Never returns an error:
    /// each failure path records what it can and leaves recovery to the
    /// stale sweep.
    #[tracing::instrument(
        name = "worker.dispatch",
        skip(self, message),
        fields(
            worker_id = self.worker_id,
            message_id = message.id,
            request_id = %message.request_id,
            channel = %message.channel
        )
    )]
    async fn dispatch(&self, message: QueuedMessage) {
        let Some(provider) = self.providers.resolve(&message.channel) else {
            let error = format!("no provider registered for channel {}", message.channel);
            tracing::warn!(channel = %message.channel, "No provider for claimed message");

            self.log
                .record(
                    &LogOwner::queue_message(message.id),
                    event_types::SYSTEM_ERROR,
                    json!({ "error": error }),
                    None,
                )
                .await;
            self.finish_failed(&message, None, &error).await;
            return;
        };

        let delivery = match self
            .deliveries
            .create(NewDelivery {
                queue_id: Some(message.id),
                request_id: message.request_id,
                recipient_id: message.recipient_id.clone(),
                provider_id: provider.id().to_string(),
                channel: message.channel.clone(),
                content: message.content.clone(),
            })
            .await
        {
            Ok(delivery) => delivery,
            Err(e) => {
                // Leave the row Processing; the stale sweep requeues it.
                tracing::error!(error = %e, "Failed to create delivery record");
                return;
            }
        };

        let deadline = Duration::from_secs(self.config.provider_timeout_seconds);
        let start = Instant::now();
        let outcome = match timeout(deadline, provider.send(&message.recipient_id, &message.content)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.config.provider_timeout_seconds)),
        };
        PROVIDER_SEND_SECONDS.observe(start.elapsed().as_secs_f64());

        match outcome {
            Ok(receipt) => {
                self.store_call(
                    self.deliveries
                        .mark_attempted(delivery.id, &receipt.response, receipt.message_id.as_deref()),
                    "mark_attempted",
                )
                .await;
                self.store_call(self.deliveries.mark_delivered(delivery.id), "mark_delivered")
                    .await;

                self.log
                    .record(
                        &LogOwner::delivery(delivery.id),
                        event_types::PROVIDER_RESPONSE,
                        json!({
                            "providerId": provider.id(),
                            "response": receipt.response,
                            "providerMessageId": receipt.message_id,
                            "status": "delivered",
                        }),
                        None,
                    )
                    .await;

                self.store_call(self.queue.mark_completed(message.id), "mark_completed")
                    .await;
                record_delivery("delivered");

                tracing::info!(
                    delivery_id = delivery.id,
                    provider_id = %provider.id(),
                    "Message delivered"
                );
            }
            Err(e) => {
                let permanent = e.is_permanent();
                let reason = e.to_string();

                self.store_call(
                    self.deliveries.mark_attempted(delivery.id, &reason, None),
                    "mark_attempted",
                )
                .await;
                self.store_call(
                    self.deliveries.mark_failed(delivery.id, &reason, permanent),
                    "mark_failed",
                )
                .await;

                self.log
                    .record(
                        &LogOwner::delivery(delivery.id),
                        event_types::DELIVERY_FAILED,
                        json!({
                            "providerId": provider.id(),
                            "error": reason,
                            "permanent": permanent,
                        }),
                        None,
                    )
                    .await;

                self.finish_failed(&message, Some(delivery.id), &reason).await;
                record_delivery("failed");

                tracing::warn!(
                    delivery_id = delivery.id,
                    provider_id = %provider.id(),
                    permanent = permanent,
                    error = %reason,
                    "Message delivery failed"
                );
            }
        }
    }

    /// Mark the queue row failed with the error merged into its payload.
    async fn finish_failed(&self, message: &QueuedMessage, delivery_id: Option<i64>, error: &str) {
        self.store_call(self.queue.mark_failed(message.id, Some(error)), "mark_failed")
            .await;
        if delivery_id.is_none() {
            record_delivery("unroutable");
        }
    }

    /// Run a store mutation on a best-effort basis: a failure here must not
    /// abort the dispatch outcome already decided.
    async fn store_call(
        &self,
        call: impl std::future::Future<Output = Result<bool>>,
        operation: &str,
    ) {
        match call.await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(operation = operation, "Store operation targeted a missing row");
            }
            Err(e) => {
                tracing::error!(operation = operation, error = %e, "Store operation failed");
            }
        }
    }
}
