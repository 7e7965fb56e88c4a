//! HTTP providers for OpenAI, Anthropic and local (OpenAI-compatible) models.

use super::{CallError, CompletionRequest, GenerativeClient};
use crate::config::{ModelConfig, Provider};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn http_client(config: &ModelConfig) -> Result<Client, CallError> {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(|e| CallError::Config(format!("failed to create HTTP client: {e}")))
}

/// Send, map transport errors and non-success statuses, decode JSON.
async fn send_json(request: RequestBuilder, timeout: Duration) -> Result<serde_json::Value, CallError> {
    let response = request.timeout(timeout).send().await.map_err(|e| {
        if e.is_timeout() {
            CallError::Timeout(timeout)
        } else {
            CallError::Network(e.to_string())
        }
    })?;
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| CallError::InvalidResponse(e.to_string()))
}

async fn check_status(response: Response) -> Result<Response, CallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(CallError::from_status(status.as_u16(), body, retry_after))
}

fn non_empty(content: Option<&str>) -> Result<String, CallError> {
    match content.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(CallError::Empty),
    }
}

fn chat_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user },
        ],
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    })
}

// ============================================================================
// OpenAI Provider
// ============================================================================

pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(config: &ModelConfig) -> Result<Self, CallError> {
        if config.api_key.is_empty() {
            return Err(CallError::Config("OpenAI API key is empty".to_string()));
        }
        Ok(Self {
            client: http_client(config)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl GenerativeClient for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = chat_body(&self.model, request);
        if request.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let data = send_json(
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body),
            request.timeout,
        )
        .await?;

        non_empty(data["choices"][0]["message"]["content"].as_str())
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

// ============================================================================
// Anthropic Provider
// ============================================================================

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(config: &ModelConfig) -> Result<Self, CallError> {
        if config.api_key.is_empty() {
            return Err(CallError::Config("Anthropic API key is empty".to_string()));
        }
        Ok(Self {
            client: http_client(config)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl GenerativeClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.user }],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let data = send_json(
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
            request.timeout,
        )
        .await?;

        let text: String = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        non_empty(Some(&text))
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

// ============================================================================
// Local Provider (Ollama, vLLM, etc.)
// ============================================================================

pub struct LocalClient {
    client: Client,
    model: String,
    base_url: String,
}

impl LocalClient {
    pub fn new(config: &ModelConfig) -> Result<Self, CallError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| CallError::Config("no base URL configured for local model".to_string()))?;
        Ok(Self {
            client: http_client(config)?,
            model: config.model.clone(),
            base_url,
        })
    }
}

#[async_trait]
impl GenerativeClient for LocalClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError> {
        // OpenAI-compatible API (vLLM, Ollama in OpenAI mode)
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let data = send_json(
            self.client.post(&url).json(&chat_body(&self.model, request)),
            request.timeout,
        )
        .await?;
        non_empty(data["choices"][0]["message"]["content"].as_str())
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Dispatches to the provider named in the configuration.
pub enum UnifiedClient {
    OpenAI(OpenAIClient),
    Anthropic(AnthropicClient),
    Local(LocalClient),
}

impl UnifiedClient {
    pub fn from_config(config: &ModelConfig) -> Result<Self, CallError> {
        match config.provider {
            Some(Provider::OpenAI) => Ok(Self::OpenAI(OpenAIClient::new(config)?)),
            Some(Provider::Anthropic) => Ok(Self::Anthropic(AnthropicClient::new(config)?)),
            Some(Provider::Local) => Ok(Self::Local(LocalClient::new(config)?)),
            None => Err(CallError::Config(
                "no model provider configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL"
                    .to_string(),
            )),
        }
    }
}

#[async_trait]
impl GenerativeClient for UnifiedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError> {
        match self {
            Self::OpenAI(c) => c.complete(request).await,
            Self::Anthropic(c) => c.complete(request).await,
            Self::Local(c) => c.complete(request).await,
        }
    }

    fn model_name(&self) -> String {
        match self {
            Self::OpenAI(c) => c.model_name(),
            Self::Anthropic(c) => c.model_name(),
            Self::Local(c) => c.model_name(),
        }
    }
}
