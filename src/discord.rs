use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::alerts::NotificationTarget;
use crate::config::Discord;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;

/// Embed colour picked from the notification title
fn embed_color(title: &str) -> u32 {
    if title.starts_with("Host Back Online") {
        GREEN
    } else if title.starts_with("Host Offline") {
        RED
    } else {
        ORANGE
    }
}

#[derive(Debug, Clone)]
pub struct DiscordManager {
    client: Client,
}

impl DiscordManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn build_host_embed(&self, target: &NotificationTarget, title: &str, message: &str) -> Embed {
        Embed {
            title: Some(title.to_string()),
            description: Some(message.to_string()),
            color: Some(embed_color(title)),
            fields: vec![
                EmbedField {
                    name: "Host".to_string(),
                    value: target.host_name.clone(),
                    inline: true,
                },
                EmbedField {
                    name: "ID".to_string(),
                    value: target.host_id.to_string(),
                    inline: true,
                },
            ],
            footer: Some(EmbedFooter {
                text: format!("hostpulse | host {}", target.host_id),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Full message for a channel, mentioning the configured user if any
    pub fn build_message(
        &self,
        discord: &Discord,
        target: &NotificationTarget,
        title: &str,
        message: &str,
    ) -> Message {
        let mut builder =
            MessageBuilder::new().add_embed(self.build_host_embed(target, title, message));
        if let Some(user_id) = &discord.user_id {
            builder = builder.content(format!("{title} <@{user_id}>"));
        }
        builder.build()
    }

    #[instrument(skip(self, discord, message))]
    pub async fn send_message(&self, discord: &Discord, message: &Message) {
        match self.client.post(&discord.url).json(message).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent Discord message");
                } else {
                    error!("Discord message failed with status: {}", response.status());
                    if let Ok(error_text) = response.text().await {
                        error!("Discord API error response: {}", error_text);
                    }
                }
            }
            Err(e) => {
                error!("Failed to send Discord message: {}", e);
            }
        }
    }
}
