//! Webhook notification delivery
//!
//! Posts already-rendered payloads to Slack or Discord webhooks. Rendering
//! lives in `report`; this module only delivers.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack block-kit payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SlackPayload {
    pub blocks: Vec<SlackBlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: SlackText,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackText {
    #[serde(rename = "type")]
    pub text_type: String,
    pub text: String,
}

impl SlackPayload {
    /// Append one mrkdwn section block.
    pub fn section(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(SlackBlock {
            block_type: "section".to_string(),
            text: SlackText {
                text_type: "mrkdwn".to_string(),
                text: text.into(),
            },
        });
        self
    }
}

/// Discord webhook payload.
#[derive(Debug, Clone, Serialize)]
pub struct DiscordPayload {
    pub username: String,
    pub avatar_url: String,
    pub content: String,
}

impl DiscordPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            username: "rpc-pulse".to_string(),
            avatar_url: String::new(),
            content: content.into(),
        }
    }
}

/// A payload rendered for a specific webhook kind.
#[derive(Debug, Clone)]
pub enum RenderedPayload {
    Slack(SlackPayload),
    Discord(DiscordPayload),
}

#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
}

impl Notifier {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .expect("default reqwest client");
        Self { http }
    }

    pub async fn send(&self, webhook: &str, payload: &RenderedPayload) -> Result<()> {
        match payload {
            RenderedPayload::Slack(p) => self.post(webhook, p).await,
            RenderedPayload::Discord(p) => self.post(webhook, p).await,
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, webhook: &str, payload: &T) -> Result<()> {
        let response = self
            .http
            .post(webhook)
            .json(payload)
            .send()
            .await
            .context("post webhook")?;
        let status = response.status();
        if !status.is_success() {
            bail!("webhook returned status {status}");
        }
        info!(webhook, "webhook delivered");
        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
