use super::{HistoryStore, Turn};
use crate::channels::traits::{Channel, ChannelMessage};
use crate::config::{Config, GenerationConfig};
use crate::providers::{GenerationError, Provider};
use crate::util::trim_reply;
use anyhow::{Context, Result};
use std::sync::Arc;

pub const GREETING_REPLY: &str = "Hi! I relay your messages to Google Gemini.\n\
Send a message and I'll reply.\n\
Use /new to clear the conversation history.";
pub const RESET_REPLY: &str = "Conversation history cleared.";
pub const CONFIG_ERROR_REPLY: &str =
    "Configuration error: check TELEGRAM_BOT_TOKEN and GEMINI_API_KEY.";
pub const EMPTY_RESPONSE_REPLY: &str =
    "The model returned an empty response. Try rephrasing your request.";
pub const TIMEOUT_REPLY: &str = "The request to the model timed out. Please try again later.";
pub const UNKNOWN_ERROR_REPLY: &str = "Unexpected error while contacting the model.";

/// Slash commands understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Reset,
}

/// How an inbound message should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound<'a> {
    Command(Command),
    Text(&'a str),
    Ignored,
}

/// Parse `/cmd` or `/cmd@botname`, ignoring any trailing arguments.
fn parse_command(text: &str) -> Option<Option<Command>> {
    let token = text.strip_prefix('/')?.split_whitespace().next().unwrap_or("");
    let name = token.split_once('@').map_or(token, |(name, _)| name);
    Some(match name {
        "start" => Some(Command::Start),
        "new" | "reset" => Some(Command::Reset),
        _ => None,
    })
}

fn classify_inbound(content: &str) -> Inbound<'_> {
    let text = content.trim();
    if text.is_empty() {
        return Inbound::Ignored;
    }
    match parse_command(text) {
        Some(Some(command)) => Inbound::Command(command),
        Some(None) => Inbound::Ignored,
        None => Inbound::Text(text),
    }
}

/// User-facing text for a failed generation.
pub fn fallback_text(error: &GenerationError) -> String {
    match error {
        GenerationError::EmptyResponse => EMPTY_RESPONSE_REPLY.to_string(),
        GenerationError::Api { status } => format!(
            "Generation API error. Check the API key and model, then try again. (HTTP {status})"
        ),
        GenerationError::Timeout => TIMEOUT_REPLY.to_string(),
        GenerationError::Unknown(_) => UNKNOWN_ERROR_REPLY.to_string(),
    }
}

/// Drives one inbound chat message through history, generation and delivery.
///
/// The orchestrator owns the [`HistoryStore`]; one instance is shared by every
/// dispatch worker.
pub struct ConversationOrchestrator {
    config: Arc<Config>,
    generation: GenerationConfig,
    store: HistoryStore,
    provider: Arc<dyn Provider>,
}

impl ConversationOrchestrator {
    pub fn new(config: Arc<Config>, provider: Arc<dyn Provider>) -> Self {
        let store = HistoryStore::new(config.generation().max_history);
        Self::with_store(config, provider, store)
    }

    pub fn with_store(config: Arc<Config>, provider: Arc<dyn Provider>, store: HistoryStore) -> Self {
        Self {
            generation: config.generation(),
            config,
            store,
            provider,
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Handle one inbound message end to end, replying through `channel`.
    ///
    /// Generation failures become fallback replies; only delivery failures are
    /// returned as errors.
    pub async fn handle_message(&self, channel: &dyn Channel, msg: &ChannelMessage) -> Result<()> {
        let conversation_id = msg.conversation_id();

        let reply = match classify_inbound(&msg.content) {
            Inbound::Ignored => {
                tracing::debug!(
                    channel = %msg.channel,
                    conversation = %conversation_id,
                    "Ignoring empty message or unknown command"
                );
                return Ok(());
            }
            Inbound::Command(Command::Start) => GREETING_REPLY.to_string(),
            Inbound::Command(Command::Reset) => {
                self.reset_conversation(conversation_id);
                RESET_REPLY.to_string()
            }
            Inbound::Text(text) => {
                let missing = self.config.missing_credentials();
                if missing.is_empty() {
                    self.reply_with_typing(channel, conversation_id, text)
                        .await
                } else {
                    tracing::error!(missing = ?missing, "Cannot relay message: credentials missing");
                    CONFIG_ERROR_REPLY.to_string()
                }
            }
        };

        let outbound = trim_reply(&reply, self.generation.max_reply_chars);
        channel
            .send(&outbound, &msg.reply_target)
            .await
            .with_context(|| {
                format!(
                    "Failed to deliver reply on {} to {}",
                    channel.name(),
                    msg.reply_target
                )
            })
    }

    async fn reply_with_typing(
        &self,
        channel: &dyn Channel,
        conversation_id: &str,
        text: &str,
    ) -> String {
        self.record_user_turn(conversation_id, text);

        if let Err(e) = channel.start_typing(conversation_id).await {
            tracing::debug!("Failed to start typing on {}: {e}", channel.name());
        }

        let reply = self.generate_and_record(conversation_id).await;

        if let Err(e) = channel.stop_typing(conversation_id).await {
            tracing::debug!("Failed to stop typing on {}: {e}", channel.name());
        }
        reply
    }

    /// Record `text` as a user turn, ask the provider for the next reply, and
    /// record that reply (or the fallback standing in for it) as a model turn.
    ///
    /// The returned text is untrimmed.
    pub async fn generate_reply(&self, conversation_id: &str, text: &str) -> String {
        self.record_user_turn(conversation_id, text);
        self.generate_and_record(conversation_id).await
    }

    fn record_user_turn(&self, conversation_id: &str, text: &str) {
        self.store.append(conversation_id, Turn::user(text.trim()));
    }

    /// Generate from the current history and append the reply as a model turn.
    async fn generate_and_record(&self, conversation_id: &str) -> String {
        let snapshot = self.store.snapshot(conversation_id);

        let started = std::time::Instant::now();
        let reply = match self.provider.generate(&snapshot).await {
            Ok(reply) => {
                tracing::info!(
                    conversation = %conversation_id,
                    provider = self.provider.name(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Generated reply"
                );
                reply
            }
            Err(error) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    provider = self.provider.name(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Generation failed, sending fallback: {error}"
                );
                fallback_text(&error)
            }
        };

        self.store
            .append(conversation_id, Turn::model(reply.clone()));
        reply
    }

    /// Forget a conversation's history. Returns `true` when there was one.
    pub fn reset_conversation(&self, conversation_id: &str) -> bool {
        let existed = self.store.reset(conversation_id);
        tracing::info!(conversation = %conversation_id, existed, "Conversation reset");
        existed
    }
}
