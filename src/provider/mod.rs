//! Channel provider abstraction.
//!
//! A provider is an external service implementation of one channel (push,
//! SMS, email, webhook). The worker only sees the `ChannelProvider` trait
//! and the registry; provider construction and credentials belong to the
//! deployment.

mod webhook;

pub use webhook::WebhookProvider;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

/// A provider send failure, classified for retry policy.
///
/// Transient failures (timeouts, network, 5xx) are retry candidates;
/// permanent failures (rejected recipient, malformed content) are tagged on
/// the delivery record so the retry sweep leaves them alone.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider send timed out after {0}s")]
    Timeout(u64),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProviderError::Permanent(_))
    }
}

/// Successful provider response.
#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    /// Raw provider response text, stored on the delivery row
    pub response: String,
    /// Identifier the provider assigned to the accepted message
    pub message_id: Option<String>,
}

/// One channel implementation.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Stable provider identifier, stored on delivery rows.
    fn id(&self) -> &str;

    /// Channel this provider serves.
    fn channel(&self) -> &str;

    /// Deliver `content` to `recipient`. May block up to the caller's
    /// deadline; the worker wraps the call in a timeout.
    async fn send(&self, recipient: &str, content: &Value)
        -> Result<ProviderReceipt, ProviderError>;
}

struct Registered {
    provider: Arc<dyn ChannelProvider>,
    priority: i32,
    default: bool,
}

/// Providers registered per channel, with priority/default flags.
///
/// Resolution picks the default provider for a channel when one is marked,
/// otherwise the highest-priority registration.
pub struct ProviderRegistry {
    by_channel: DashMap<String, Vec<Registered>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            by_channel: DashMap::new(),
        }
    }

    pub fn register(&self, provider: Arc<dyn ChannelProvider>, priority: i32, default: bool) {
        let channel = provider.channel().to_string();
        tracing::info!(
            provider_id = %provider.id(),
            channel = %channel,
            priority = priority,
            default = default,
            "Provider registered"
        );
        self.by_channel.entry(channel).or_default().push(Registered {
            provider,
            priority,
            default,
        });
    }

    /// Resolve the provider to use for a channel.
    pub fn resolve(&self, channel: &str) -> Option<Arc<dyn ChannelProvider>> {
        let registered = self.by_channel.get(channel)?;
        registered
            .iter()
            .max_by_key(|r| (r.default, r.priority))
            .map(|r| r.provider.clone())
    }

    pub fn channels(&self) -> Vec<String> {
        self.by_channel.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        id: String,
        channel: String,
    }

    #[async_trait]
    impl ChannelProvider for FakeProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn channel(&self) -> &str {
            &self.channel
        }

        async fn send(
            &self,
            _recipient: &str,
            _content: &Value,
        ) -> Result<ProviderReceipt, ProviderError> {
            Ok(ProviderReceipt {
                response: "ok".to_string(),
                message_id: None,
            })
        }
    }

    fn provider(id: &str, channel: &str) -> Arc<dyn ChannelProvider> {
        Arc::new(FakeProvider {
            id: id.to_string(),
            channel: channel.to_string(),
        })
    }

    #[test]
    fn test_resolve_unknown_channel() {
        let registry = ProviderRegistry::new();
        assert!(registry.resolve("sms").is_none());
    }

    #[test]
    fn test_resolve_prefers_default() {
        let registry = ProviderRegistry::new();
        registry.register(provider("sns-a", "sms"), 100, false);
        registry.register(provider("sns-b", "sms"), 0, true);

        let resolved = registry.resolve("sms").unwrap();
        assert_eq!(resolved.id(), "sns-b");
    }

    #[test]
    fn test_resolve_falls_back_to_priority() {
        let registry = ProviderRegistry::new();
        registry.register(provider("sns-a", "sms"), 1, false);
        registry.register(provider("sns-b", "sms"), 5, false);

        let resolved = registry.resolve("sms").unwrap();
        assert_eq!(resolved.id(), "sns-b");
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::Permanent("bad address".into()).is_permanent());
        assert!(!ProviderError::Transient("503".into()).is_permanent());
        assert!(!ProviderError::Timeout(30).is_permanent());
    }
}
