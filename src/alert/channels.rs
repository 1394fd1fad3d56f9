//! Alert delivery channels.
//!
//! A channel exposes one capability: `send(alert) -> bool`. It must never
//! raise past that boundary; every internal failure is logged and reported
//! as `false`. The registry is built once at startup from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{AlertingConfig, EmailChannelConfig, TelegramChannelConfig, WebhookChannelConfig};

use super::Alert;

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one alert. Must not panic or error; `false` means the
    /// delivery failed and the cause was logged.
    async fn send(&self, alert: &Alert) -> bool;
}

/// Build the channel registry. The dashboard channel is always present;
/// network channels register only when enabled.
pub fn build_registry(cfg: &AlertingConfig) -> HashMap<String, Arc<dyn AlertChannel>> {
    let mut registry: HashMap<String, Arc<dyn AlertChannel>> = HashMap::new();
    registry.insert("dashboard".to_string(), Arc::new(DashboardChannel));

    let timeout = Duration::from_secs(cfg.send_timeout_secs);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default();

    if cfg.channels.email.enabled {
        registry.insert(
            "email".to_string(),
            Arc::new(EmailChannel {
                client: client.clone(),
                cfg: cfg.channels.email.clone(),
            }),
        );
    }
    if cfg.channels.telegram.enabled {
        registry.insert(
            "telegram".to_string(),
            Arc::new(TelegramChannel {
                client: client.clone(),
                cfg: cfg.channels.telegram.clone(),
            }),
        );
    }
    if cfg.channels.sms.enabled {
        registry.insert(
            "sms".to_string(),
            Arc::new(WebhookChannel {
                name: "sms".to_string(),
                client,
                cfg: cfg.channels.sms.clone(),
            }),
        );
    }

    registry
}

/// Dashboard channel: the alert row itself is the delivery (the UI reads
/// it from the store), so sending always succeeds.
pub struct DashboardChannel;

#[async_trait]
impl AlertChannel for DashboardChannel {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn send(&self, alert: &Alert) -> bool {
        debug!(alert_id = %alert.id, "alert available on dashboard");
        true
    }
}

/// Email via an HTTP mail gateway. The gateway speaks SMTP to the world;
/// we only hand it a JSON envelope.
pub struct EmailChannel {
    client: reqwest::Client,
    cfg: EmailChannelConfig,
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> bool {
        let subject = format!(
            "[{}] Network Alert: {}",
            alert.severity.as_str().to_uppercase(),
            alert.kind
        );
        let body = serde_json::json!({
            "from": self.cfg.from_address,
            "to": self.cfg.to_addresses,
            "subject": subject,
            "body": alert.message,
        });

        let result = self
            .client
            .post(&self.cfg.gateway_url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "mail gateway rejected alert");
                false
            }
            Err(e) => {
                warn!(error = %e, "email send failed");
                false
            }
        }
    }
}

/// Telegram bot channel.
pub struct TelegramChannel {
    client: reqwest::Client,
    cfg: TelegramChannelConfig,
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, alert: &Alert) -> bool {
        if self.cfg.bot_token.is_empty() || self.cfg.chat_id.is_empty() {
            warn!("telegram bot token or chat_id not configured");
            return false;
        }
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.cfg.bot_token
        );
        let body = serde_json::json!({
            "chat_id": self.cfg.chat_id,
            "text": alert.message,
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "telegram API rejected alert");
                false
            }
            Err(e) => {
                warn!(error = %e, "telegram send failed");
                false
            }
        }
    }
}

/// Generic webhook channel (SMS gateways and similar integrations).
pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    cfg: WebhookChannelConfig,
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, alert: &Alert) -> bool {
        let body = serde_json::json!({
            "alert_id": alert.id,
            "type": alert.kind.as_str(),
            "severity": alert.severity.as_str(),
            "message": alert.message,
        });

        match self.client.post(&self.cfg.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(channel = %self.name, status = %response.status(), "webhook rejected alert");
                false
            }
            Err(e) => {
                warn!(channel = %self.name, error = %e, "webhook send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_always_has_dashboard() {
        let cfg = AlertingConfig::default();
        let registry = build_registry(&cfg);
        assert!(registry.contains_key("dashboard"));
        assert!(!registry.contains_key("email"));
        assert!(!registry.contains_key("telegram"));
    }

    #[test]
    fn test_registry_adds_enabled_channels() {
        let mut cfg = AlertingConfig::default();
        cfg.channels.email.enabled = true;
        cfg.channels.telegram.enabled = true;
        cfg.channels.sms.enabled = true;

        let registry = build_registry(&cfg);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry["email"].name(), "email");
        assert_eq!(registry["sms"].name(), "sms");
    }

    #[tokio::test]
    async fn test_dashboard_send_always_succeeds() {
        let alert = Alert::test_alert("dashboard");
        assert!(DashboardChannel.send(&alert).await);
    }

    #[tokio::test]
    async fn test_unconfigured_telegram_reports_failure() {
        let channel = TelegramChannel {
            client: reqwest::Client::new(),
            cfg: TelegramChannelConfig::default(),
        };
        let alert = Alert::test_alert("telegram");
        assert!(!channel.send(&alert).await);
    }
}
