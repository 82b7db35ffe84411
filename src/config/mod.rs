pub mod schema;

pub use schema::{
    Config, ConversationConfig, GeminiConfig, GenerationConfig, TelegramConfig, CONFIG_PATH_ENV,
    GEMINI_API_KEY_ENV, TELEGRAM_BOT_TOKEN_ENV,
};

/// JSON Schema for `config.toml`, pretty-printed.
pub fn schema_json() -> anyhow::Result<String> {
    let schema = schemars::schema_for!(Config);
    Ok(serde_json::to_string_pretty(&schema)?)
}
