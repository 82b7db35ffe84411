use async_trait::async_trait;

/// An inbound text message from a chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Platform message identifier, unique within the channel
    pub id: String,
    /// Who wrote the message (username or numeric user id)
    pub sender: String,
    /// Chat the reply goes to; also the conversation key for history
    pub reply_target: String,
    pub content: String,
    pub channel: String,
    pub timestamp: u64,
}

impl ChannelMessage {
    /// Conversation key used for history lookups.
    pub fn conversation_id(&self) -> &str {
        &self.reply_target
    }
}

/// Core channel trait, implemented once per messaging platform
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a message through this channel
    async fn send(&self, message: &str, recipient: &str) -> anyhow::Result<()>;

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()>;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }

    /// Signal that the bot is processing a response (e.g. "typing" indicator).
    /// Implementations should repeat the indicator as needed for their platform.
    async fn start_typing(&self, _recipient: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stop any active typing indicator.
    async fn stop_typing(&self, _recipient: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
