use crate::commands::Dispatcher;
use crate::config::Config;
use crate::router::{ChatKind, ChatSender, IncomingMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Server-side wait of a `getUpdates` long poll, in seconds
const LONG_POLL_SECS: u64 = 30;
const SEND_TIMEOUT: Duration = Duration::from_secs(15);
/// Pause after a failed poll before asking again
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

// Telegram update types
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub r#type: String,
    pub title: Option<String>,
}

impl Message {
    pub fn to_incoming(&self) -> Option<IncomingMessage> {
        let from = self.from.as_ref()?;
        Some(IncomingMessage {
            chat_id: self.chat.id,
            chat_kind: ChatKind::from_telegram(&self.chat.r#type),
            chat_title: self.chat.title.clone(),
            message_id: self.message_id,
            sender_id: from.id,
            sender_username: from.username.clone(),
            text: self.text.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: i64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SetWebhookRequest {
    url: String,
    secret_token: String,
    allowed_updates: Vec<String>,
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!(
                "{}/bot{}",
                config.telegram_api_url.trim_end_matches('/'),
                config.telegram_bot_token
            ),
        }
    }

    /// Send a plain-text message, optionally as a reply to `reply_to`.
    pub async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let request = SendMessageRequest {
            chat_id,
            text: text.to_string(),
            reply_to_message_id: reply_to,
        };

        self.call::<_, serde_json::Value>("sendMessage", &request, SEND_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: LONG_POLL_SECS,
            allowed_updates: vec!["message".to_string()],
        };

        self.call(
            "getUpdates",
            &request,
            Duration::from_secs(LONG_POLL_SECS) + SEND_TIMEOUT,
        )
        .await
    }

    pub async fn set_webhook(&self, url: &str, secret: &str) -> Result<()> {
        let request = SetWebhookRequest {
            url: url.to_string(),
            secret_token: secret.to_string(),
            allowed_updates: vec!["message".to_string()],
        };

        self.call::<_, bool>("setWebhook", &request, SEND_TIMEOUT)
            .await?;
        info!("Webhook registered at {}", url);
        Ok(())
    }

    /// Remove any registered webhook; `getUpdates` is refused while one is set.
    pub async fn delete_webhook(&self) -> Result<()> {
        self.call::<_, bool>("deleteWebhook", &serde_json::json!({}), SEND_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to Telegram API", method))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error ({}): {}", status, body);
        }

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if !envelope.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                envelope.description.unwrap_or_default()
            );
        }
        envelope
            .result
            .with_context(|| format!("{} response has no result", method))
    }
}

#[async_trait]
impl ChatSender for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<()> {
        TelegramClient::send_message(self, chat_id, text, reply_to).await
    }
}

/// Fetch and dispatch updates until the task is cancelled.
///
/// Updates are handled one at a time. The offset only moves past an update
/// once it has been dispatched.
pub async fn run_polling(client: &TelegramClient, dispatcher: &Dispatcher) -> Result<()> {
    client
        .delete_webhook()
        .await
        .context("Failed to clear webhook before polling")?;
    info!("Bot started in polling mode");

    let mut offset: Option<i64> = None;
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("Polling failed: {:#}", e);
                tokio::time::sleep(POLL_ERROR_PAUSE).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            dispatcher.dispatch(update).await;
        }
    }
}
