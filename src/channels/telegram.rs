use super::traits::{Channel, ChannelMessage};
use crate::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

/// Telegram typing indicators expire after ~5s; refresh a little sooner.
const TYPING_REFRESH_INTERVAL: Duration = Duration::from_secs(4);

/// Refresh loop for one chat's typing indicator, shared by every in-flight
/// reply to that chat.
struct TypingTask {
    holders: usize,
    handle: tokio::task::JoinHandle<()>,
}

/// Telegram channel that long-polls the Bot API for updates
pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
    /// Base URL for the Telegram Bot API. Defaults to `https://api.telegram.org`.
    /// Override for local Bot API servers or testing.
    api_base: String,
    poll_timeout_secs: u64,
    typing_handles: Mutex<HashMap<String, TypingTask>>,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            typing_handles: Mutex::new(HashMap::new()),
        }
    }

    /// Build a channel from loaded configuration. Fails when no bot token is set.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let token = config
            .bot_token()
            .context("TELEGRAM_BOT_TOKEN is not configured")?;
        Ok(Self::new(token.to_string())
            .with_api_base(config.telegram.api_base.clone())
            .with_poll_timeout(config.telegram.poll_timeout_secs))
    }

    /// Override the Telegram Bot API base URL.
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    fn http_client(&self) -> reqwest::Client {
        self.client.clone()
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn extract_sender_identity(message: &serde_json::Value) -> String {
        let from = message.get("from");
        from.and_then(|f| f.get("username"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                from.and_then(|f| f.get("id"))
                    .and_then(serde_json::Value::as_i64)
                    .map(|id| id.to_string())
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Turn a `getUpdates` entry into a [`ChannelMessage`].
    ///
    /// Only messages carrying `text` are accepted; photos, stickers, edits and
    /// other update kinds yield `None`.
    fn parse_update_message(update: &serde_json::Value) -> Option<ChannelMessage> {
        let message = update.get("message")?;
        let text = message.get("text").and_then(serde_json::Value::as_str)?;

        let chat_id = message
            .get("chat")
            .and_then(|chat| chat.get("id"))
            .and_then(serde_json::Value::as_i64)
            .map(|id| id.to_string())?;

        let message_id = message
            .get("message_id")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);

        let timestamp = message
            .get("date")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_else(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
            });

        Some(ChannelMessage {
            id: format!("telegram_{chat_id}_{message_id}"),
            sender: Self::extract_sender_identity(message),
            reply_target: chat_id,
            content: text.to_string(),
            channel: "telegram".to_string(),
            timestamp,
        })
    }

    /// Fetch `getMe` and return the bot's username.
    pub async fn fetch_bot_username(&self) -> anyhow::Result<String> {
        let resp = self
            .http_client()
            .get(self.api_url("getMe"))
            .send()
            .await
            .context("Telegram getMe request failed")?;
        let data: serde_json::Value = resp.json().await?;
        data.get("result")
            .and_then(|r| r.get("username"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .context("Telegram getMe response missing username")
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &str, recipient: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": recipient,
            "text": message,
        });

        let resp = self
            .http_client()
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed ({status}): {err}");
        }
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let url = self.api_url("getUpdates");
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"]
            });

            let resp = match self.http_client().post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let ok = data
                .get("ok")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true);
            if !ok {
                let error_code = data
                    .get("error_code")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or_default();
                let description = data
                    .get("description")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown Telegram API error");

                if error_code == 409 {
                    tracing::warn!(
                        "Telegram polling conflict (409): {description}. \
Ensure only one `gemrelay` process is using this bot token."
                    );
                    tokio::time::sleep(Duration::from_secs(2)).await;
                } else if error_code == 401 {
                    anyhow::bail!("Telegram rejected the bot token (401): {description}");
                } else {
                    tracing::warn!(
                        "Telegram getUpdates API error (code={}): {description}",
                        error_code
                    );
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                continue;
            }

            if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(msg) = Self::parse_update_message(update) else {
                        tracing::debug!("Skipping non-text Telegram update");
                        continue;
                    };

                    if tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        let timeout_duration = Duration::from_secs(5);

        match tokio::time::timeout(
            timeout_duration,
            self.http_client().get(self.api_url("getMe")).send(),
        )
        .await
        {
            Ok(Ok(resp)) => resp.status().is_success(),
            Ok(Err(e)) => {
                tracing::debug!("Telegram health check failed: {e}");
                false
            }
            Err(_) => {
                tracing::debug!("Telegram health check timed out after 5s");
                false
            }
        }
    }

    async fn start_typing(&self, recipient: &str) -> anyhow::Result<()> {
        let mut handles = self.typing_handles.lock();
        if let Some(task) = handles.get_mut(recipient) {
            task.holders += 1;
            return Ok(());
        }

        let client = self.http_client();
        let url = self.api_url("sendChatAction");
        let chat_id = recipient.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let body = serde_json::json!({
                    "chat_id": &chat_id,
                    "action": "typing"
                });
                if let Err(e) = client.post(&url).json(&body).send().await {
                    tracing::debug!("Telegram sendChatAction failed: {e}");
                }
                tokio::time::sleep(TYPING_REFRESH_INTERVAL).await;
            }
        });

        handles.insert(recipient.to_string(), TypingTask { holders: 1, handle });
        Ok(())
    }

    /// Release one hold on the chat's typing loop; the loop stops when the
    /// last in-flight reply releases it.
    async fn stop_typing(&self, recipient: &str) -> anyhow::Result<()> {
        let mut handles = self.typing_handles.lock();
        if let Entry::Occupied(mut entry) = handles.entry(recipient.to_string()) {
            let task = entry.get_mut();
            task.holders = task.holders.saturating_sub(1);
            if task.holders == 0 {
                entry.remove().handle.abort();
            }
        }
        Ok(())
    }
}
