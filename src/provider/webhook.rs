//! Webhook channel provider.
//!
//! Posts the message content as JSON to the recipient id, which for this
//! channel is the target URL. HTTP 4xx responses are permanent failures
//! (the endpoint rejected the message); 5xx and transport errors are
//! transient and eligible for the retry sweep.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::WebhookProviderConfig;

use super::{ChannelProvider, ProviderError, ProviderReceipt};

/// `ChannelProvider` delivering over HTTPS POST.
pub struct WebhookProvider {
    id: String,
    channel: String,
    client: Client,
}

impl WebhookProvider {
    pub fn new(config: &WebhookProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Permanent(format!("client build failed: {e}")))?;

        Ok(Self {
            id: config.id.clone(),
            channel: config.channel.clone(),
            client,
        })
    }
}

#[async_trait]
impl ChannelProvider for WebhookProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    async fn send(
        &self,
        recipient: &str,
        content: &Value,
    ) -> Result<ProviderReceipt, ProviderError> {
        if !recipient.starts_with("http://") && !recipient.starts_with("https://") {
            return Err(ProviderError::Permanent(format!(
                "recipient is not a webhook URL: {recipient}"
            )));
        }

        let response = self
            .client
            .post(recipient)
            .json(content)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Transient(format!("webhook timed out: {e}"))
                } else {
                    ProviderError::Transient(format!("webhook transport error: {e}"))
                }
            })?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            tracing::debug!(
                provider_id = %self.id,
                status = %status.as_u16(),
                "Webhook accepted message"
            );
            return Ok(ProviderReceipt {
                response: format!("{}: {}", status.as_u16(), truncate(&body, 512)),
                message_id,
            });
        }

        let reason = format!("{}: {}", status.as_u16(), truncate(&body, 512));
        if status.is_client_error() {
            Err(ProviderError::Permanent(reason))
        } else {
            Err(ProviderError::Transient(reason))
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
