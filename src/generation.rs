//! Text generation capability used by the answer composer.
//!
//! A [`Generator`] turns one prompt into one piece of text. Providers:
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledGenerator`] | none, always fails |
//! | `"gemini"` | [`GeminiGenerator`] | `v1beta/models/{model}:generateContent` |
//! | `"openai"` | [`OpenAIGenerator`] | `/v1/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`] | `/api/generate` |
//!
//! Generation is not retried: a failed call surfaces as
//! [`AnswerError::GenerationFailed`] and the caller decides what to do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::GenerationConfig;
use crate::embedding::api_key;
use crate::error::AnswerError;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, AnswerError>;
}

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, AnswerError> {
        Err(AnswerError::GenerationFailed(
            "generation provider is disabled".to_string(),
        ))
    }
}

fn build_client(config: &GenerationConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// POST `body` and return the decoded JSON, mapping every failure to text.
async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, AnswerError> {
    let response = request.json(body).send().await.map_err(|e| {
        if e.is_timeout() {
            AnswerError::GenerationFailed(format!("{} request timed out", provider))
        } else {
            AnswerError::GenerationFailed(format!("{} connection error: {}", provider, e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AnswerError::GenerationFailed(format!(
            "{} API error {}: {}",
            provider, status, text
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| {
            AnswerError::GenerationFailed(format!("{} returned invalid JSON: {}", provider, e))
        })
}

fn malformed(what: &str) -> AnswerError {
    AnswerError::GenerationFailed(format!("malformed generation response: missing {}", what))
}

// ============ Gemini ============

pub struct GeminiGenerator {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "gemini-1.5-flash".to_string());
        Ok(Self {
            model: model.trim_start_matches("models/").to_string(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            api_key: api_key("GEMINI_API_KEY")?,
            client: build_client(config)?,
        })
    }
}

/// Concatenate `candidates[0].content.parts[*].text`.
fn parse_gemini_response(json: &Value) -> Result<String, AnswerError> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| malformed("candidates[0].content.parts"))?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<String>())
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, AnswerError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key);
        let json = post_json("Gemini", request, &body).await?;
        parse_gemini_response(&json)
    }
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        Ok(Self {
            model,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key: api_key("OPENAI_API_KEY")?,
            client: build_client(config)?,
        })
    }
}

fn parse_openai_response(json: &Value) -> Result<String, AnswerError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| malformed("choices[0].message.content"))
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, AnswerError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self.client.post(&url).bearer_auth(&self.api_key);
        let json = post_json("OpenAI", request, &body).await?;
        parse_openai_response(&json)
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, AnswerError> {
        let url = format!("{}/api/generate", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let json = post_json("Ollama", self.client.post(&url), &body).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gemini_joins_parts() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "there." }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "Hello there.");
        assert!(parse_gemini_response(&serde_json::json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn test_parse_openai() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "42" } }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), "42");
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_fails() {
        let err = DisabledGenerator.generate("hi").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_openai_requires_model() {
        let config = GenerationConfig {
            provider: "openai".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
