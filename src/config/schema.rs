use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "GEMRELAY_CONFIG";

pub const TELEGRAM_BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level gemrelay configuration, loaded from `config.toml`.
///
/// Resolution order: `--config` flag → `GEMRELAY_CONFIG` env → `~/.gemrelay/config.toml`.
/// A missing default file is not an error; every key has a default and most can
/// be supplied through environment variables instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path the config was read from - computed, not serialized
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Telegram Bot API settings (`[telegram]`).
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Gemini generation API settings (`[gemini]`).
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// History and delivery limits (`[conversation]`).
    #[serde(default)]
    pub conversation: ConversationConfig,
}

// ── Telegram ─────────────────────────────────────────────────────

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

/// Telegram bot channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TelegramConfig {
    /// Telegram Bot API token (from @BotFather). Overridden by `TELEGRAM_BOT_TOKEN`.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Base URL for the Bot API. Override for local Bot API servers or testing.
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Long-poll timeout passed to `getUpdates`, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

// ── Gemini ───────────────────────────────────────────────────────

fn default_gemini_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_api_key_header() -> String {
    "x-goog-api-key".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_request_timeout_secs() -> f64 {
    60.0
}

/// Longest accepted request timeout, in seconds (one day).
pub const MAX_REQUEST_TIMEOUT_SECS: f64 = 86_400.0;

fn is_valid_request_timeout(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0 && secs <= MAX_REQUEST_TIMEOUT_SECS
}

/// Gemini `generateContent` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GeminiConfig {
    /// Static API key. Overridden by `GEMINI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model identifier (e.g. `"gemini-2.5-flash"`). Default: `"gemini-2.5-flash"`.
    #[serde(default = "default_gemini_model")]
    pub model: String,
    /// API root; requests go to `{api_base}/models/{model}:generateContent`.
    #[serde(default = "default_gemini_api_base")]
    pub api_base: String,
    /// Header carrying the API key. Default: `"x-goog-api-key"`.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Optional system instruction sent with every request.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature (0.0–2.0). Default: `0.7`.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Per-request timeout in seconds. Default: `60`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: f64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
            api_base: default_gemini_api_base(),
            api_key_header: default_api_key_header(),
            system_prompt: None,
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Conversation ─────────────────────────────────────────────────

fn default_max_history() -> usize {
    crate::conversation::history::DEFAULT_MAX_HISTORY
}

fn default_max_reply_chars() -> usize {
    3500
}

fn default_max_in_flight_messages() -> usize {
    8
}

/// History bound and outbound limits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConversationConfig {
    /// Turns kept per chat; the oldest is evicted first. Default: `30`.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Longest reply sent to Telegram, in characters. Default: `3500`.
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    /// Messages processed concurrently across all chats. Default: `8`.
    #[serde(default = "default_max_in_flight_messages")]
    pub max_in_flight_messages: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            max_reply_chars: default_max_reply_chars(),
            max_in_flight_messages: default_max_in_flight_messages(),
        }
    }
}

// ── Runtime view ─────────────────────────────────────────────────

/// Immutable generation settings derived from [`Config`] once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub system_instruction: Option<String>,
    pub temperature: f64,
    pub request_timeout: Duration,
    pub max_history: usize,
    pub max_reply_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Config::default().generation()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Default config location: `~/.gemrelay/config.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        UserDirs::new().map(|dirs| dirs.home_dir().join(".gemrelay").join("config.toml"))
    }

    /// Load configuration from `explicit_path`, `GEMRELAY_CONFIG`, or the default
    /// location, then apply environment overrides and validate.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub async fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let (path, required) = match explicit_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => (Some(path), true),
            None => (Self::default_config_path(), false),
        };

        let mut config = match path {
            Some(ref path) if required || path.exists() => Self::load_from_file(path).await?,
            _ => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config
                .config_path
                .as_deref()
                .map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string()),
            model = %config.gemini.model,
            "Config loaded"
        );
        Ok(config)
    }

    /// Parse a TOML config file without applying env overrides.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = get(TELEGRAM_BOT_TOKEN_ENV) {
            self.telegram.bot_token = Some(token.trim().to_string());
        }
        if let Some(base) = get("TELEGRAM_API_BASE") {
            self.telegram.api_base = base.trim().trim_end_matches('/').to_string();
        }
        if let Some(key) = get(GEMINI_API_KEY_ENV) {
            self.gemini.api_key = Some(key.trim().to_string());
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.gemini.model = model.trim().to_string();
        }
        if let Some(base) = get("GEMINI_API_BASE") {
            self.gemini.api_base = base.trim().trim_end_matches('/').to_string();
        }
        if let Some(prompt) = get("SYSTEM_PROMPT") {
            self.gemini.system_prompt = Some(prompt);
        }

        if let Some(raw) = get("TEMPERATURE") {
            match raw.trim().parse::<f64>() {
                Ok(temp) if (0.0..=2.0).contains(&temp) => self.gemini.temperature = temp,
                _ => tracing::warn!(
                    value = %raw,
                    "Ignoring invalid TEMPERATURE (expected a number between 0.0 and 2.0)"
                ),
            }
        }
        if let Some(raw) = get("REQUEST_TIMEOUT") {
            match raw.trim().parse::<f64>() {
                Ok(secs) if is_valid_request_timeout(secs) => {
                    self.gemini.request_timeout_secs = secs;
                }
                _ => tracing::warn!(value = %raw, "Ignoring invalid REQUEST_TIMEOUT"),
            }
        }
        if let Some(raw) = get("MAX_HISTORY") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.conversation.max_history = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid MAX_HISTORY"),
            }
        }
        if let Some(raw) = get("MAX_REPLY_CHARS") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.conversation.max_reply_chars = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid MAX_REPLY_CHARS"),
            }
        }
    }

    /// Validate configuration values that would cause runtime failures.
    ///
    /// Credentials are not checked here; see [`Config::missing_credentials`].
    pub fn validate(&self) -> Result<()> {
        if self.gemini.model.trim().is_empty() {
            anyhow::bail!("gemini.model must not be empty");
        }
        if self.gemini.api_base.trim().is_empty() {
            anyhow::bail!("gemini.api_base must not be empty");
        }
        if self.gemini.api_key_header.trim().is_empty() {
            anyhow::bail!("gemini.api_key_header must not be empty");
        }
        if !(0.0..=2.0).contains(&self.gemini.temperature) {
            anyhow::bail!(
                "gemini.temperature must be between 0.0 and 2.0 (got {})",
                self.gemini.temperature
            );
        }
        if !is_valid_request_timeout(self.gemini.request_timeout_secs) {
            anyhow::bail!(
                "gemini.request_timeout_secs must be greater than 0 and at most {MAX_REQUEST_TIMEOUT_SECS} (got {})",
                self.gemini.request_timeout_secs
            );
        }
        if self.telegram.api_base.trim().is_empty() {
            anyhow::bail!("telegram.api_base must not be empty");
        }
        if self.conversation.max_history == 0 {
            anyhow::bail!("conversation.max_history must be greater than 0");
        }
        if self.conversation.max_reply_chars == 0 {
            anyhow::bail!("conversation.max_reply_chars must be greater than 0");
        }
        if self.conversation.max_in_flight_messages == 0 {
            anyhow::bail!("conversation.max_in_flight_messages must be greater than 0");
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Option<&str> {
        non_empty(self.telegram.bot_token.as_deref())
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(self.gemini.api_key.as_deref())
    }

    /// Names of required credentials that are absent or blank.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.bot_token().is_none() {
            missing.push(TELEGRAM_BOT_TOKEN_ENV);
        }
        if self.api_key().is_none() {
            missing.push(GEMINI_API_KEY_ENV);
        }
        missing
    }

    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            model: self.gemini.model.trim().to_string(),
            system_instruction: non_empty(self.gemini.system_prompt.as_deref())
                .map(str::to_string),
            temperature: self.gemini.temperature,
            request_timeout: Duration::try_from_secs_f64(
                self.gemini
                    .request_timeout_secs
                    .clamp(0.001, MAX_REQUEST_TIMEOUT_SECS),
            )
            .unwrap_or_else(|_| Duration::from_secs_f64(default_request_timeout_secs())),
            max_history: self.conversation.max_history,
            max_reply_chars: self.conversation.max_reply_chars,
        }
    }
}
