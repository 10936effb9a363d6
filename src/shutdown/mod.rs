//! Graceful shutdown handling for the dispatch service.
//!
//! Coordinated shutdown:
//! 1. Signals workers and the maintenance task to stop
//! 2. Waits for in-flight claims to finish (Processing count drains)
//! 3. Reports what was left behind; anything still Processing is
//!    recovered by the stale sweep on the next start

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::queue::QueueStore;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for in-flight claims to finish (default: 10 seconds)
    pub drain_timeout: Duration,
    /// How often to poll the queue while draining (default: 100ms)
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Handles graceful shutdown of the dispatch service
pub struct GracefulShutdown {
    queue: Arc<dyn QueueStore>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(queue: Arc<dyn QueueStore>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            queue,
            shutdown_tx,
            config: ShutdownConfig::default(),
        }
    }

    pub fn with_config(
        queue: Arc<dyn QueueStore>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            queue,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence.
    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - signaling tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Waiting for in-flight claims to drain");
        result.drained = self.wait_for_drain().await;
        result.in_flight_remaining = match self.queue.status_summary().await {
            Ok(summary) => summary.processing,
            Err(_) => -1,
        };

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            drained = result.drained,
            in_flight_remaining = result.in_flight_remaining,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Poll the Processing count until it reaches zero or the drain
    /// timeout expires.
    async fn wait_for_drain(&self) -> bool {
        let queue = self.queue.clone();
        let poll_interval = self.config.poll_interval;

        let drain_future = async {
            loop {
                match queue.status_summary().await {
                    Ok(summary) if summary.processing == 0 => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Queue summary failed while draining");
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match timeout(self.config.drain_timeout, drain_future).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    drain_timeout_ms = self.config.drain_timeout.as_millis(),
                    "Drain timeout; remaining claims recover via the stale sweep"
                );
                false
            }
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether the sequence ran to completion
    pub success: bool,
    /// Whether all in-flight claims finished inside the timeout
    pub drained: bool,
    /// Processing rows left at the end (-1 when the store was unreachable)
    pub in_flight_remaining: i64,
    /// Total time taken for shutdown
    pub duration: Duration,
}
