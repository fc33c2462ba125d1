use crate::message::{NotifyLevel, NotifyMessage};
use crate::notifier::{Notifier, NotifyError, NotifyResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

// ============================================================================
// 日志通知
// ============================================================================

/// 把通知写进 tracing 日志，始终可用
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<NotifyResult, NotifyError> {
        let metadata = message
            .metadata
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_default();

        match message.level {
            NotifyLevel::Info => {
                info!(title = %message.title, metadata = %metadata, "{}", message.content)
            }
            NotifyLevel::Warning => {
                warn!(title = %message.title, metadata = %metadata, "{}", message.content)
            }
            NotifyLevel::Error | NotifyLevel::Critical => {
                error!(title = %message.title, metadata = %metadata, "{}", message.content)
            }
        }

        Ok(NotifyResult::success())
    }

    fn name(&self) -> &str {
        "log"
    }
}

// ============================================================================
// Webhook 通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub headers: Option<HashMap<String, String>>,
    pub timeout_ms: u64,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: None,
            timeout_ms: 5000,
        }
    }
}

pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
    enabled: bool,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            enabled: !config.url.trim().is_empty(),
            config,
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<NotifyResult, NotifyError> {
        let mut request = self.client.post(&self.config.url);

        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(message).send().await?;

        if response.status().is_success() {
            Ok(NotifyResult::success())
        } else {
            Ok(NotifyResult::failure(format!(
                "Webhook failed with status: {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
