//! Store and provider construction from configuration.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Settings;
use crate::delivery::{DeliveryStore, MemoryDeliveryStore, PostgresDeliveryStore};
use crate::eventlog::{EventLogStore, MemoryEventLogStore, PostgresEventLogStore};
use crate::provider::{ProviderRegistry, WebhookProvider};
use crate::queue::{MemoryQueueStore, PostgresQueueStore, QueueStore};
use crate::request::{MemoryRequestStore, PostgresRequestStore, RequestService, RequestStore};

/// The four stores plus the coordinating request service.
pub struct Stores {
    pub requests: Arc<dyn RequestStore>,
    pub queue: Arc<dyn QueueStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub log: Arc<dyn EventLogStore>,
    pub service: Arc<RequestService>,
}

/// Create every store against PostgreSQL when a pool is provided, or the
/// in-memory implementations otherwise.
pub fn create_stores(pool: Option<PgPool>) -> Stores {
    let (requests, queue, deliveries, log): (
        Arc<dyn RequestStore>,
        Arc<dyn QueueStore>,
        Arc<dyn DeliveryStore>,
        Arc<dyn EventLogStore>,
    ) = match pool {
        Some(pool) => {
            tracing::info!(backend = "postgres", "Creating persistent stores");
            (
                Arc::new(PostgresRequestStore::new(pool.clone())),
                Arc::new(PostgresQueueStore::new(pool.clone())),
                Arc::new(PostgresDeliveryStore::new(pool.clone())),
                Arc::new(PostgresEventLogStore::new(pool)),
            )
        }
        None => {
            tracing::warn!(
                backend = "memory",
                "No database configured, stores will not survive a restart"
            );
            (
                Arc::new(MemoryRequestStore::new()),
                Arc::new(MemoryQueueStore::new()),
                Arc::new(MemoryDeliveryStore::new()),
                Arc::new(MemoryEventLogStore::new()),
            )
        }
    };

    let service = Arc::new(RequestService::new(
        requests.clone(),
        queue.clone(),
        log.clone(),
    ));

    Stores {
        requests,
        queue,
        deliveries,
        log,
        service,
    }
}

/// Build the provider registry from configuration.
pub fn create_provider_registry(settings: &Settings) -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::new());

    for webhook in &settings.provider.webhooks {
        match WebhookProvider::new(webhook) {
            Ok(provider) => {
                registry.register(Arc::new(provider), webhook.priority, webhook.default);
            }
            Err(e) => {
                tracing::error!(
                    provider_id = %webhook.id,
                    error = %e,
                    "Skipping webhook provider that failed to build"
                );
            }
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookProviderConfig;

    #[test]
    fn test_memory_stores_without_pool() {
        let stores = create_stores(None);
        // The service shares the request store created here.
        assert!(Arc::ptr_eq(stores.service.requests(), &stores.requests));
    }

    #[test]
    fn test_registry_from_settings() {
        let mut settings = Settings::default();
        settings.provider.webhooks.push(WebhookProviderConfig {
            id: "webhook-main".to_string(),
            channel: "webhook".to_string(),
            priority: 0,
            default: true,
            timeout_seconds: 5,
        });

        let registry = create_provider_registry(&settings);
        assert!(registry.resolve("webhook").is_some());
        assert!(registry.resolve("sms").is_none());
    }
}
