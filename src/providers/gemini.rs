//! Google Gemini provider.
//!
//! Sends the conversation snapshot to `models/{model}:generateContent` with the
//! API key in a request header. Each call is a single attempt bounded by the
//! configured request timeout; failures are classified into [`GenerationError`]
//! so the caller can pick a user-facing fallback.

use crate::config::{Config, GenerationConfig};
use crate::conversation::Turn;
use crate::providers::traits::{GenerationError, GenerationResult, Provider};
use crate::util::floor_utf8_char_boundary;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Byte cap for error bodies echoed into logs.
const ERROR_BODY_PREVIEW_BYTES: usize = 512;

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

/// Request body for `generateContent`.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: SamplingConfig,
}

impl GenerateContentRequest {
    pub fn contents_len(&self) -> usize {
        self.contents.len()
    }

    pub fn has_system_instruction(&self) -> bool {
        self.system_instruction.is_some()
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
struct SamplingConfig {
    temperature: f64,
}

// Every field is optional so that shape mismatches surface as "no text"
// rather than as decode errors.
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Build the `generateContent` request body for a conversation snapshot.
///
/// Turns map one-to-one onto `contents` in order. `systemInstruction` is
/// included only when the configured instruction is non-blank.
pub fn build_payload(turns: &[Turn], config: &GenerationConfig) -> GenerateContentRequest {
    let contents = turns
        .iter()
        .map(|turn| Content {
            role: Some(turn.role().as_str().to_string()),
            parts: vec![Part {
                text: turn.text().to_string(),
            }],
        })
        .collect();

    let system_instruction = config
        .system_instruction
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|text| Content {
            role: None,
            parts: vec![Part {
                text: text.to_string(),
            }],
        });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: SamplingConfig {
            temperature: config.temperature,
        },
    }
}

/// Pull the reply text out of a raw `generateContent` response.
///
/// Concatenates every part of the first candidate in order and trims the
/// result. Returns `None` when candidates, content, or parts are missing, when
/// any part lacks `text`, or when the joined text is blank.
pub fn extract_text(raw: &serde_json::Value) -> Option<String> {
    let response: GenerateContentResponse = serde_json::from_value(raw.clone()).ok()?;
    let candidate = response.candidates?.into_iter().next()?;
    let parts = candidate.content?.parts?;
    if parts.is_empty() {
        return None;
    }

    let mut joined = String::new();
    for part in parts {
        joined.push_str(&part.text?);
    }

    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn body_preview(body: &str) -> &str {
    &body[..floor_utf8_char_boundary(body, ERROR_BODY_PREVIEW_BYTES)]
}

fn classify_transport_error(err: &reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Unknown(err.to_string())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// PROVIDER
// ══════════════════════════════════════════════════════════════════════════════

/// Gemini `generateContent` client.
pub struct GeminiProvider {
    api_key: String,
    api_base: String,
    api_key_header: String,
    generation: GenerationConfig,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub const DEFAULT_API_BASE: &'static str = "https://generativelanguage.googleapis.com/v1beta";
    pub const DEFAULT_API_KEY_HEADER: &'static str = "x-goog-api-key";

    pub fn new(api_key: impl Into<String>, generation: GenerationConfig) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            api_key_header: Self::DEFAULT_API_KEY_HEADER.to_string(),
            generation,
            client: reqwest::Client::new(),
        }
    }

    /// Build a provider from loaded configuration. Fails when no API key is set.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config
            .api_key()
            .context("GEMINI_API_KEY is not configured")?;
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            api_key: api_key.to_string(),
            api_base: config.gemini.api_base.trim_end_matches('/').to_string(),
            api_key_header: config.gemini.api_key_header.clone(),
            generation: config.generation(),
            client,
        })
    }

    /// Override the API root (e.g. for a proxy or a mock server).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key_header(mut self, header: &str) -> Self {
        self.api_key_header = header.to_string();
        self
    }

    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.api_base, self.generation.model)
    }

    fn generate_content_url(&self) -> String {
        format!("{}:generateContent", self.model_url())
    }

    async fn send_generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> GenerationResult<String> {
        let response = self
            .client
            .post(self.generate_content_url())
            .header(self.api_key_header.as_str(), self.api_key.as_str())
            .timeout(self.generation.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                model = %self.generation.model,
                body = %body_preview(&body),
                "Gemini API returned an error status"
            );
            return Err(GenerationError::Api {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let raw: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(
                error = %e,
                body = %body_preview(&body),
                "Gemini API returned a non-JSON body"
            );
            GenerationError::Unknown(format!("invalid JSON in response: {e}"))
        })?;

        extract_text(&raw).ok_or(GenerationError::EmptyResponse)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, turns: &[Turn]) -> GenerationResult<String> {
        let request = build_payload(turns, &self.generation);
        tracing::debug!(
            model = %self.generation.model,
            turns = request.contents_len(),
            system_instruction = request.has_system_instruction(),
            "Sending generateContent request"
        );

        let result = self.send_generate_content(&request).await;
        if let Err(ref err) = result {
            tracing::warn!(model = %self.generation.model, "Generation failed: {err}");
        }
        result
    }

    async fn warmup(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .get(self.model_url())
            .header(self.api_key_header.as_str(), self.api_key.as_str())
            .timeout(self.generation.request_timeout)
            .send()
            .await
            .context("Gemini warmup request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini warmup failed ({status}): {}", body_preview(&body));
        }
        tracing::info!(model = %self.generation.model, "Gemini model reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generation(system: Option<&str>) -> GenerationConfig {
        GenerationConfig {
            system_instruction: system.map(str::to_string),
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn payload_maps_turns_in_order() {
        let turns = vec![Turn::user("Hi"), Turn::model("Hello!"), Turn::user("How?")];
        let payload = serde_json::to_value(build_payload(&turns, &generation(None))).unwrap();

        assert_eq!(
            payload["contents"],
            json!([
                {"role": "user", "parts": [{"text": "Hi"}]},
                {"role": "model", "parts": [{"text": "Hello!"}]},
                {"role": "user", "parts": [{"text": "How?"}]},
            ])
        );
        assert_eq!(payload["generationConfig"]["temperature"], json!(0.7));
    }

    #[test]
    fn payload_includes_system_instruction_when_set() {
        let payload = serde_json::to_value(build_payload(
            &[Turn::user("Hi")],
            &generation(Some("Answer in French.")),
        ))
        .unwrap();

        assert_eq!(
            payload["systemInstruction"],
            json!({"parts": [{"text": "Answer in French."}]})
        );
    }

    #[test]
    fn payload_omits_blank_or_absent_system_instruction() {
        for system in [None, Some(""), Some("   ")] {
            let payload =
                serde_json::to_value(build_payload(&[Turn::user("Hi")], &generation(system)))
                    .unwrap();
            assert!(payload.get("systemInstruction").is_none());
        }
    }

    #[test]
    fn extract_concatenates_parts() {
        let raw = json!({
            "candidates": [{"content": {"parts": [{"text": "Hello, "}, {"text": "world"}]}}]
        });
        assert_eq!(extract_text(&raw).as_deref(), Some("Hello, world"));
    }

    #[test]
    fn extract_strips_surrounding_whitespace() {
        let raw = json!({"candidates": [{"content": {"parts": [{"text": "\n  Hello!  \n"}]}}]});
        assert_eq!(extract_text(&raw).as_deref(), Some("Hello!"));
    }

    #[test]
    fn extract_uses_first_candidate_only() {
        let raw = json!({
            "candidates": [
                {"content": {"parts": [{"text": "first"}]}},
                {"content": {"parts": [{"text": "second"}]}}
            ]
        });
        assert_eq!(extract_text(&raw).as_deref(), Some("first"));
    }

    #[test]
    fn extract_missing_shapes_yield_none() {
        let cases = [
            json!({}),
            json!({"candidates": []}),
            json!({"candidates": [{}]}),
            json!({"candidates": [{"content": {}}]}),
            json!({"candidates": [{"content": {"parts": []}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "a"}, {"inlineData": {}}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "   "}]}}]}),
            json!({"candidates": "oops"}),
            json!([1, 2, 3]),
        ];
        for raw in cases {
            assert!(extract_text(&raw).is_none(), "expected None for {raw}");
        }
    }

    #[test]
    fn body_preview_respects_char_boundaries() {
        let body = "é".repeat(ERROR_BODY_PREVIEW_BYTES);
        let preview = body_preview(&body);
        assert!(preview.len() <= ERROR_BODY_PREVIEW_BYTES);
        assert!(preview.chars().all(|c| c == 'é'));
    }

    #[test]
    fn urls_use_model_and_trimmed_base() {
        let provider = GeminiProvider::new("key", GenerationConfig::default())
            .with_api_base("http://localhost:9999/v1beta/");
        assert_eq!(
            provider.generate_content_url(),
            "http://localhost:9999/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = Config::default();
        assert!(GeminiProvider::from_config(&config).is_err());

        let mut config = Config::default();
        config.gemini.api_key = Some("secret".into());
        config.gemini.api_key_header = "x-api-key".into();
        let provider = GeminiProvider::from_config(&config).unwrap();
        assert_eq!(provider.api_key_header, "x-api-key");
        assert_eq!(provider.name(), "gemini");
    }
}
