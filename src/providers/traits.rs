use crate::conversation::Turn;
use async_trait::async_trait;

/// Why a generation call produced no reply text.
///
/// Every variant is recoverable: the orchestrator turns it into a fallback
/// message for the user instead of propagating it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The API answered successfully but the response carried no usable text.
    #[error("model returned an empty response")]
    EmptyResponse,

    /// The API rejected the request with a non-success HTTP status.
    #[error("generation API error (HTTP {status})")]
    Api { status: u16 },

    /// No response arrived within the configured request timeout.
    #[error("generation request timed out")]
    Timeout,

    /// Any other transport or decoding failure.
    #[error("unexpected generation failure: {0}")]
    Unknown(String),
}

pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider label used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Generate the next model reply for a conversation.
    ///
    /// `turns` is a snapshot of the conversation, oldest first, ending with the
    /// user turn being answered. Implementations make exactly one attempt.
    async fn generate(&self, turns: &[Turn]) -> GenerationResult<String>;

    /// Verify connectivity and credentials without generating anything.
    async fn warmup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
