//! Photo delivery to a chat channel
//!
//! The scheduler only sees the [`ChannelResolver`] and [`DeliveryPort`]
//! traits. [`DiscordClient`] implements both on top of the Discord REST API:
//! channels are found by name across the guilds the bot has joined and photos
//! are posted as message attachments.

use crate::config::DiscordConfig;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Discord channel type for guild text channels
const GUILD_TEXT: u8 = 0;

/// Error type for chat transport operations
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transport has no credentials
    #[error("Chat transport not configured: {0}")]
    NotConfigured(String),

    /// Request could not be sent or its response read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API answered with a non-success status
    #[error("Chat API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Artifact could not be read
    #[error("Failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    /// Request did not finish in time
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
}

/// Resolved destination for photos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandle {
    pub id: String,
    pub name: String,
    pub guild_id: String,
}

/// Finds channels by name
#[async_trait]
pub trait ChannelResolver: Send + Sync {
    /// Succeeds once the transport can serve lookups and uploads
    async fn check_ready(&self) -> Result<(), DeliveryError>;

    /// Scan joined guilds for a text channel called `name`
    async fn resolve(&self, name: &str) -> Result<Option<ChannelHandle>, DeliveryError>;
}

/// Sends artifacts to a resolved channel
#[async_trait]
pub trait DeliveryPort: Send + Sync {
    async fn deliver(&self, channel: &ChannelHandle, artifact: &Path) -> Result<(), DeliveryError>;

    /// Remove a delivered artifact from local disk
    async fn delete_artifact(&self, artifact: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(artifact).await
    }
}

#[derive(Debug, Deserialize)]
struct GuildSummary {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GuildChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
}

/// First text channel in `channels` named exactly `name`
pub(crate) fn find_text_channel<'a>(
    channels: &'a [GuildChannel],
    name: &str,
) -> Option<&'a GuildChannel> {
    channels
        .iter()
        .find(|c| c.kind == GUILD_TEXT && c.name.as_deref() == Some(name))
}

/// Discord REST client
///
/// Resolved channels are remembered by name until an upload to them is
/// rejected, so a fast special window does not rescan every guild each fire.
pub struct DiscordClient {
    token: String,
    api_base: String,
    client: reqwest::Client,
    resolved: Mutex<HashMap<String, ChannelHandle>>,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Result<Self, DeliveryError> {
        let token = config
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                DeliveryError::NotConfigured("no Discord bot token; set DISCORD_TOKEN".to_string())
            })?;

        Ok(Self {
            token: token.to_string(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            resolved: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeliveryError> {
        let response = self
            .client
            .get(self.url(path))
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChannelResolver for DiscordClient {
    async fn check_ready(&self) -> Result<(), DeliveryError> {
        let _me: serde_json::Value = self.get_json("/users/@me").await?;
        Ok(())
    }

    /// A guild whose channel list cannot be read is skipped. If no other
    /// guild has the channel, the last such error is returned instead of
    /// `None`, since the channel may well exist there.
    async fn resolve(&self, name: &str) -> Result<Option<ChannelHandle>, DeliveryError> {
        if let Some(handle) = self.resolved.lock().await.get(name) {
            return Ok(Some(handle.clone()));
        }

        let guilds: Vec<GuildSummary> = self.get_json("/users/@me/guilds").await?;
        let mut skipped = None;
        for guild in guilds {
            let channels: Vec<GuildChannel> = match self
                .get_json(&format!("/guilds/{}/channels", guild.id))
                .await
            {
                Ok(channels) => channels,
                Err(e) => {
                    warn!(guild = %guild.id, error = %e, "Cannot list guild channels, skipping");
                    skipped = Some(e);
                    continue;
                }
            };
            if let Some(channel) = find_text_channel(&channels, name) {
                let handle = ChannelHandle {
                    id: channel.id.clone(),
                    name: name.to_string(),
                    guild_id: guild.id,
                };
                self.resolved
                    .lock()
                    .await
                    .insert(name.to_string(), handle.clone());
                return Ok(Some(handle));
            }
        }
        match skipped {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DeliveryPort for DiscordClient {
    async fn deliver(&self, channel: &ChannelHandle, artifact: &Path) -> Result<(), DeliveryError> {
        let bytes = tokio::fs::read(artifact).await?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());

        let payload = json!({
            "attachments": [{ "id": 0, "filename": file_name }]
        });
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", part);

        let response = self
            .client
            .post(self.url(&format!("/channels/{}/messages", channel.id)))
            .header(AUTHORIZATION, self.authorization())
            .multipart(form)
            .send()
            .await?;
        if let Err(e) = check_status(response).await {
            // Deleted channel or lost access; look it up again next time
            debug!(channel = %channel.name, "Forgetting resolved channel");
            self.resolved.lock().await.remove(&channel.name);
            return Err(e);
        }
        Ok(())
    }
}
