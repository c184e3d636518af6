//! Generative text capability.
//!
//! One prompt in, one completion out. Used for query expansion, generative
//! reranking, summaries, and answer synthesis.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::config::{GenerationBackend, GenerationConfig};
use crate::retry::{send_json, RetryPolicy};

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Every call fails; callers degrade (expansion falls back to the original
/// query, generative scores default to 0.0).
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

/// `POST /api/generate` on a local Ollama instance, non-streaming.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            client: reqwest::Client::new(),
            retry: config.retry_policy(),
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        let endpoint = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let json = self
            .retry
            .run("Ollama generate", || {
                send_json(self.client.post(&endpoint).json(&body), "Ollama")
            })
            .await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
    }
}

/// OpenAI chat completions with a single user message.
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            temperature: config.temperature,
            client: reqwest::Client::new(),
            retry: config.retry_policy(),
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let endpoint = format!("{}/v1/chat/completions", self.url.trim_end_matches('/'));
        let json = self
            .retry
            .run("OpenAI chat", || {
                let request = self
                    .client
                    .post(&endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&body);
                send_json(request, "OpenAI")
            })
            .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    Ok(match config.provider {
        GenerationBackend::Disabled => Arc::new(DisabledGenerator),
        GenerationBackend::Ollama => Arc::new(OllamaGenerator::new(config)),
        GenerationBackend::OpenAI => Arc::new(OpenAIGenerator::new(config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_always_errors() {
        let g = create_generator(&GenerationConfig {
            provider: GenerationBackend::Disabled,
            ..Default::default()
        })
        .unwrap();
        assert!(g.generate("hello").await.is_err());
    }

    #[test]
    fn parses_chat_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "0.8" } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "0.8");
        assert!(parse_chat_response(&serde_json::json!({"choices": []})).is_err());
    }
}
