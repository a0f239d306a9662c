//! Chat webhook provider.
//!
//! Posts one JSON message per dispatch. Payload shape depends on
//! [`WebhookFormat`]. Rate-limited responses (HTTP 429) are retried a few
//! times, respecting the `Retry-After` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{ChannelProvider, test_request, type_color};
use crate::notification::request::{CHANNEL_WEBHOOK, NotificationRequest};
use crate::utils::http_client::install_rustls_provider;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Upper bound for a single `Retry-After` wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Payload dialect of the receiving service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookFormat {
    /// Flat JSON with every request field.
    #[default]
    Generic,
    /// Discord `embeds` message.
    Discord,
    /// Slack incoming-webhook message.
    Slack,
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

/// Webhook provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Channel id override (default: `webhook`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Webhook URL.
    #[serde(default)]
    pub url: String,
    /// HTTP method (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Payload dialect.
    #[serde(default)]
    pub format: WebhookFormat,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Authentication type.
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    /// Display name for chat services that support it.
    #[serde(default)]
    pub username: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl WebhookConfig {
    pub fn channel_id(&self) -> &str {
        self.id.as_deref().unwrap_or(CHANNEL_WEBHOOK)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            id: None,
            enabled: false,
            url: String::new(),
            method: default_method(),
            format: WebhookFormat::Generic,
            headers: Vec::new(),
            auth: None,
            username: Some("notify-hub".to_string()),
            timeout_secs: default_timeout(),
        }
    }
}

/// Chat webhook provider.
pub struct WebhookProvider {
    config: WebhookConfig,
    client: Client,
}

impl WebhookProvider {
    /// Create a new webhook provider.
    pub fn new(config: WebhookConfig) -> Self {
        install_rustls_provider();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    /// Build the request headers.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
            {
                headers.insert(name, value);
            }
        }

        match &self.config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                if let Ok(value) = format!("Bearer {}", token).parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            Some(WebhookAuth::Header { name, value }) => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
                {
                    headers.insert(name, value);
                }
            }
            // Basic auth is applied on the request builder.
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        headers
    }

    /// Build the JSON payload for the configured format.
    fn build_payload(&self, request: &NotificationRequest) -> serde_json::Value {
        let title = request.render_title();
        let message = request.render_message();
        let footer = format!(
            "Type: {} | Priority: {}",
            request.notification_type(),
            request.priority()
        );

        match self.config.format {
            WebhookFormat::Generic => json!({
                "id": request.id(),
                "type": request.notification_type(),
                "priority": request.priority(),
                "title": title,
                "message": message,
                "recipients": request.recipients(),
                "data": request.data(),
                "attachments": request.attachments(),
                "timestamp": request.created_at().to_rfc3339(),
            }),
            WebhookFormat::Discord => {
                let mut payload = json!({
                    "embeds": [{
                        "title": title,
                        "description": message,
                        "color": type_color(request.notification_type()),
                        "timestamp": request.created_at().to_rfc3339(),
                        "footer": { "text": footer },
                    }]
                });
                if let Some(username) = &self.config.username {
                    payload["username"] = json!(username);
                }
                payload
            }
            WebhookFormat::Slack => {
                let mut payload = json!({
                    "text": title,
                    "attachments": [{
                        "color": format!("#{:06x}", type_color(request.notification_type())),
                        "text": message,
                        "footer": footer,
                        "ts": request.created_at().timestamp(),
                    }]
                });
                if let Some(username) = &self.config.username {
                    payload["username"] = json!(username);
                }
                payload
            }
        }
    }

    /// Parse the wait requested by a 429 response.
    fn parse_retry_after(response: &Response) -> Duration {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(1))
            .min(MAX_RETRY_AFTER)
    }

    async fn deliver(&self, request: &NotificationRequest) -> Result<()> {
        let channel = self.config.channel_id();
        let payload = self.build_payload(request);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let mut builder = match self.config.method.to_uppercase().as_str() {
                "PUT" => self.client.put(&self.config.url),
                _ => self.client.post(&self.config.url),
            };
            builder = builder.headers(self.build_headers()).json(&payload);
            if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
                builder = builder.basic_auth(username, Some(password));
            }

            let response = builder
                .send()
                .await
                .map_err(|e| Error::provider(channel, format!("request failed: {}", e)))?;
            let status = response.status();

            if status.is_success() {
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS && attempts < MAX_RATE_LIMIT_RETRIES {
                let wait = Self::parse_retry_after(&response);
                warn!(
                    channel = %channel,
                    attempt = attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Webhook rate limited, retrying"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(channel, format!("{} - {}", status, body)));
        }
    }
}

#[async_trait]
impl ChannelProvider for WebhookProvider {
    fn channel_id(&self) -> &str {
        self.config.channel_id()
    }

    fn is_available(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    async fn send(&self, request: &NotificationRequest) -> bool {
        match self.deliver(request).await {
            Ok(()) => {
                debug!(
                    channel = %self.channel_id(),
                    notification_id = %request.id(),
                    recipients = request.recipients().len(),
                    "Webhook notification sent"
                );
                true
            }
            Err(e) => {
                warn!(
                    channel = %self.channel_id(),
                    notification_id = %request.id(),
                    error = %e,
                    "Webhook notification failed"
                );
                false
            }
        }
    }

    async fn test(&self) -> Result<()> {
        if !self.is_available() {
            return Err(Error::config(format!(
                "webhook channel {} is not configured",
                self.channel_id()
            )));
        }
        let request = test_request(self.channel_id(), "test")?;
        self.deliver(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::request::NotificationType;

    fn request() -> NotificationRequest {
        NotificationRequest::builder("Build {{build}} failed", "See {{url}}", ["ops"])
            .channel(CHANNEL_WEBHOOK)
            .notification_type(NotificationType::Error)
            .data_entry("build", "42")
            .data_entry("url", "https://ci.example.com/42")
            .build()
            .unwrap()
    }

    #[test]
    fn test_webhook_config_default() {
        let config = WebhookConfig::default();
        assert!(!config.enabled);
        assert!(config.url.is_empty());
        assert_eq!(config.method, "POST");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.channel_id(), CHANNEL_WEBHOOK);
    }

    #[test]
    fn test_availability_requires_url() {
        let provider = WebhookProvider::new(WebhookConfig {
            enabled: true,
            ..Default::default()
        });
        assert!(!provider.is_available());

        let provider = WebhookProvider::new(WebhookConfig {
            enabled: true,
            url: "https://chat.example.com/hook".to_string(),
            ..Default::default()
        });
        assert!(provider.is_available());
    }

    #[test]
    fn test_generic_payload() {
        let provider = WebhookProvider::new(WebhookConfig::default());
        let payload = provider.build_payload(&request());

        assert_eq!(payload["title"], "Build 42 failed");
        assert_eq!(payload["message"], "See https://ci.example.com/42");
        assert_eq!(payload["type"], "error");
        assert_eq!(payload["recipients"][0], "ops");
    }

    #[test]
    fn test_discord_payload() {
        let provider = WebhookProvider::new(WebhookConfig {
            format: WebhookFormat::Discord,
            ..Default::default()
        });
        let payload = provider.build_payload(&request());

        assert_eq!(payload["embeds"][0]["title"], "Build 42 failed");
        assert_eq!(payload["embeds"][0]["color"], 0xe74c3c);
        assert_eq!(payload["username"], "notify-hub");
    }

    #[test]
    fn test_slack_payload() {
        let provider = WebhookProvider::new(WebhookConfig {
            format: WebhookFormat::Slack,
            username: None,
            ..Default::default()
        });
        let payload = provider.build_payload(&request());

        assert_eq!(payload["text"], "Build 42 failed");
        assert_eq!(payload["attachments"][0]["color"], "#e74c3c");
        assert!(payload.get("username").is_none());
    }

    #[test]
    fn test_build_headers_with_bearer() {
        let provider = WebhookProvider::new(WebhookConfig {
            enabled: true,
            url: "https://example.com/webhook".to_string(),
            headers: vec![("X-Team".to_string(), "ops".to_string())],
            auth: Some(WebhookAuth::Bearer {
                token: "test-token".to_string(),
            }),
            ..Default::default()
        });
        let headers = provider.build_headers();

        assert_eq!(headers[reqwest::header::AUTHORIZATION], "Bearer test-token");
        assert_eq!(headers["x-team"], "ops");
    }

    #[tokio::test]
    async fn test_send_to_unreachable_endpoint_returns_false() {
        let provider = WebhookProvider::new(WebhookConfig {
            enabled: true,
            url: "http://127.0.0.1:9/hook".to_string(),
            timeout_secs: 2,
            ..Default::default()
        });
        assert!(!provider.send(&request()).await);
    }

    #[tokio::test]
    async fn test_test_requires_configuration() {
        let provider = WebhookProvider::new(WebhookConfig::default());
        assert!(matches!(provider.test().await, Err(Error::Configuration(_))));
    }
}
