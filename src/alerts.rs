//! Out-of-band notifications about monitored hosts
//!
//! The ingestion path only decides *when* to notify; delivery goes through the
//! [`Notifier`] trait so it can be swapped out in tests.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::HostId;
use crate::accounting::TrafficAlert;
use crate::config::{Alert, NotificationChannel, Webhook};
use crate::discord::DiscordManager;
use crate::util::format_bytes;

/// Who a notification is about and which channels should carry it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTarget {
    pub host_id: HostId,
    pub host_name: String,
    /// Channel names; empty selects every configured channel
    pub channels: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver a notification. Failures are the notifier's to log.
    async fn notify(&self, target: &NotificationTarget, title: &str, message: &str);
}

pub fn traffic_warning(target: &NotificationTarget, alert: &TrafficAlert) -> (String, String) {
    (
        format!("Traffic Warning: {}", target.host_name),
        format!(
            "Host '{}' (ID: {}) has used {}% of its traffic limit.\nUsed: {} / {}",
            target.host_name,
            target.host_id,
            alert.percent,
            format_bytes(alert.used),
            format_bytes(alert.limit)
        ),
    )
}

pub fn back_online(target: &NotificationTarget) -> (String, String) {
    (
        format!("Host Back Online: {}", target.host_name),
        format!(
            "Host '{}' (ID: {}) is back online.",
            target.host_name, target.host_id
        ),
    )
}

pub fn offline(target: &NotificationTarget, minutes: i64) -> (String, String) {
    (
        format!("Host Offline: {}", target.host_name),
        format!(
            "Host '{}' (ID: {}) has not reported for {} minute(s).",
            target.host_name, target.host_id, minutes
        ),
    )
}

#[derive(Debug, Clone)]
pub struct AlertManager {
    client: Client,
    channels: Vec<NotificationChannel>,
    discord_manager: DiscordManager,
}

impl AlertManager {
    pub fn new(channels: Vec<NotificationChannel>) -> Self {
        let client = Client::new();
        Self {
            discord_manager: DiscordManager::new(client.clone()),
            client,
            channels,
        }
    }

    /// Channels a target asked for; unknown names are skipped with a warning
    pub fn selected_channels(&self, target: &NotificationTarget) -> Vec<&NotificationChannel> {
        if target.channels.is_empty() {
            return self.channels.iter().collect();
        }

        target
            .channels
            .iter()
            .filter_map(|name| {
                let channel = self.channels.iter().find(|c| &c.name == name);
                if channel.is_none() {
                    warn!(
                        "host {} refers to unknown notification channel '{name}'",
                        target.host_id
                    );
                }
                channel
            })
            .collect()
    }

    #[instrument(skip(self, webhook, message))]
    async fn send_webhook_alert(
        &self,
        webhook: &Webhook,
        target: &NotificationTarget,
        title: &str,
        message: &str,
    ) {
        let payload = json!({
            "title": title,
            "message": message,
            "host": target.host_name,
            "timestamp": Utc::now().to_rfc3339()
        });

        match self.client.post(&webhook.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook alert");
                } else {
                    error!("Webhook alert failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
            }
        }
    }
}

#[async_trait]
impl Notifier for AlertManager {
    async fn notify(&self, target: &NotificationTarget, title: &str, message: &str) {
        let channels = self.selected_channels(target);
        if channels.is_empty() {
            debug!("no notification channel for host {}: {title}", target.host_id);
            return;
        }

        for channel in channels {
            match &channel.alert {
                Alert::Discord(discord) => {
                    let msg = self
                        .discord_manager
                        .build_message(discord, target, title, message);
                    self.discord_manager.send_message(discord, &msg).await;
                }
                Alert::Webhook(webhook) => {
                    self.send_webhook_alert(webhook, target, title, message)
                        .await;
                }
            }
        }
    }
}
