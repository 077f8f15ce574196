use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{CommandGenerator, GeneratedCommand, SYSTEM_PROMPT, parse_response};

const TEMPERATURE: f64 = 0.3;
const TOP_P: f64 = 0.9;
const MAX_TOKENS: u32 = 256;

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .context("Failed to build HTTP client")
}

async fn read_json(response: reqwest::Response, provider: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("{} returned {}: {}", provider, status, text.trim());
    }
    let body: Value = response.json().await?;
    debug!(
        "{} response: {}",
        provider,
        serde_json::to_string_pretty(&body)?
    );
    Ok(body)
}

/// Ollama's `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(endpoint: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl CommandGenerator for OllamaGenerator {
    async fn generate(&self, query: &str) -> Result<GeneratedCommand> {
        let body = json!({
            "model": self.model,
            "system": SYSTEM_PROMPT,
            "prompt": query,
            "stream": false,
            "options": {
                "temperature": TEMPERATURE,
                "top_p": TOP_P,
                "num_predict": MAX_TOKENS
            }
        });

        debug!("Ollama request: {}", serde_json::to_string_pretty(&body)?);

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.endpoint))?;

        let body = read_json(response, "Ollama").await?;
        let text = body["response"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Ollama response has no text"))?;

        Ok(parse_response(text))
    }
}

/// Any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl CommandGenerator for OpenAIGenerator {
    async fn generate(&self, query: &str) -> Result<GeneratedCommand> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": query }
            ],
            "temperature": TEMPERATURE,
            "top_p": TOP_P,
            "max_tokens": MAX_TOKENS
        });

        debug!("OpenAI request: {}", serde_json::to_string_pretty(&body)?);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        let body = read_json(response, "OpenAI").await?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No content in OpenAI response"))?;

        Ok(parse_response(text))
    }
}
