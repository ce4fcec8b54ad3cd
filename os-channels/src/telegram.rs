use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use os_core::{InboundMessage, MessageHandler, Notification, Notifier};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT_SECS: u64 = 30;
const HTTP_TIMEOUT: Duration = Duration::from_secs(35);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-polls the Telegram Bot API for inbound messages and hands each one
/// to the dispatcher before advancing the update offset.
pub struct TelegramReceiver {
    bot_token: String,
    handler: Arc<dyn MessageHandler>,
    http: reqwest::Client,
    base_url: String,
}

impl TelegramReceiver {
    pub fn new(bot_token: &str, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build telegram http client")?;
        Ok(Self {
            bot_token: bot_token.to_string(),
            handler,
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Overrides the API base URL (for tests).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Runs the long-poll loop until the shutdown signal changes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("telegram receiver started");
        let mut offset: i64 = 0;

        loop {
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.poll(offset) => polled,
            };

            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::error!(error = %e, "poll error");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            for update in updates {
                let next_offset = update.update_id + 1;
                match inbound_from_update(update) {
                    // Updates without text are skipped but still advance
                    // the offset.
                    None => {}
                    Some(msg) => self.handler.handle(msg).await,
                }
                offset = next_offset;
            }
        }
        tracing::info!("telegram receiver stopped");
    }

    async fn poll(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!(
            "{}/bot{}/getUpdates?offset={}&timeout={}",
            self.base_url, self.bot_token, offset, LONG_POLL_TIMEOUT_SECS
        );

        let resp = self.http.get(&url).send().await.context("http get")?;
        if !resp.status().is_success() {
            bail!("api status: {}", resp.status().as_u16());
        }

        let api: ApiResponse = resp.json().await.context("decode response")?;
        if !api.ok {
            bail!("api returned ok=false");
        }
        Ok(api.result)
    }
}

fn inbound_from_update(update: Update) -> Option<InboundMessage> {
    let message = update.message?;
    if message.text.is_empty() {
        return None;
    }

    Some(InboundMessage {
        update_id: update.update_id,
        chat_id: message.chat.id,
        user_id: message.from.map(|u| u.id).unwrap_or(0),
        text: message.text,
        timestamp: DateTime::from_timestamp(message.date, 0).unwrap_or_else(Utc::now),
    })
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    from: Option<User>,
    chat: Chat,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Sends notifications to a single chat via the Bot API sendMessage call.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    http: reqwest::Client,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("build telegram http client")?;
        Ok(Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Overrides the API base URL (for tests).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, n: Notification) -> Result<()> {
        let endpoint = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);

        let resp = self
            .http
            .post(&endpoint)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", n.text.as_str())])
            .send()
            .await
            .context("telegram request")?;

        let status = resp.status();
        if !status.is_success() {
            #[derive(Debug, Default, Deserialize)]
            struct ApiError {
                #[serde(default)]
                description: String,
            }
            let body: ApiError = resp.json().await.unwrap_or_default();
            bail!(
                "telegram API error {}: {}",
                status.as_u16(),
                body.description
            );
        }
        Ok(())
    }
}
