use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, Role, ToolCall, ToolSpec, UsageMetadata};
use crate::error::{require_env, Error};

/// Remote LLM provider using OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    embedding_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    /// Unset unless configured; a request may still carry its own limit.
    default_timeout: Option<Duration>,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            embedding_url: embedding_url_for(&base_url),
            base_url,
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-ada-002".to_string(),
            default_timeout: None,
            default_max_tokens: 1500,
            default_temperature: 0.1,
            client: reqwest::Client::new(),
        }
    }

    /// Build from `[llm]` configuration, reading the API key from the configured env var.
    pub fn from_config(config: &common::LlmConfig) -> Result<Self> {
        let api_key = require_env(config.api_key_env())?;
        let mut provider = Self::new(config.api_url(), api_key, config.model())
            .with_embedding_model(config.embedding_model());
        if let Some(url) = &config.embedding_url {
            provider.embedding_url = url.clone();
        }
        Ok(provider.with_defaults(
            config.timeout_seconds,
            config.max_tokens.unwrap_or(1500),
            config.temperature.unwrap_or(0.1),
        ))
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: Option<u64>,
        max_tokens: usize,
        temperature: f32,
    ) -> Self {
        self.default_timeout = timeout_secs.map(Duration::from_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Await `fut`, bounded by `limit` when one is set.
async fn within<F: std::future::Future>(
    limit: Option<Duration>,
    fut: F,
    what: &'static str,
) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .with_context(|| format!("{} timed out", what)),
        None => Ok(fut.await),
    }
}

/// Infer the embeddings endpoint from a chat endpoint,
/// e.g. http://localhost:11434/v1/chat/completions -> http://localhost:11434/v1/embeddings
pub fn embedding_url_for(base_url: &str) -> String {
    if base_url.ends_with("/embeddings") {
        base_url.to_string()
    } else if base_url.ends_with("/chat/completions") {
        base_url.replace("/chat/completions", "/embeddings")
    } else if base_url.ends_with("/completions") {
        base_url.replace("/completions", "/embeddings")
    } else {
        format!("{}/embeddings", base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .or(self.default_timeout);

        let req_body = OpenAiRequest {
            model: self.model.clone(),
            messages: request.messages.into_iter().map(WireMessage::from).collect(),
            max_tokens: Some(request.max_tokens.unwrap_or(self.default_max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.default_temperature)),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.into_iter().map(WireTool::from).collect())
            },
        };

        let response = within(
            timeout,
            self.client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
            "LLM request",
        )
        .await?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                api: "llm",
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let resp_body = within(timeout, response.json::<OpenAiResponse>(), "LLM request")
            .await?
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?;

        let usage = UsageMetadata {
            prompt_tokens: resp_body.usage.prompt_tokens.unwrap_or(0),
            completion_tokens: resp_body.usage.completion_tokens.unwrap_or(0),
            total_tokens: resp_body.usage.total_tokens.unwrap_or(0),
        };

        Ok(ChatResponse {
            message: choice.message.into(),
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let req_body = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: texts.to_vec(),
        };

        let response = within(
            self.default_timeout,
            self.client
                .post(&self.embedding_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
            "Embedding request",
        )
        .await?
        .context("Embedding HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                api: "embeddings",
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let body_text = response.text().await.context("Failed to read embedding response body")?;
        let mut resp_body: EmbeddingResponse = serde_json::from_str(&body_text)
            .with_context(|| format!("Failed to parse Embedding response (Body: {})", body_text))?;

        if resp_body.data.len() != texts.len() {
            anyhow::bail!(
                "Embedding response has {} vectors for {} inputs",
                resp_body.data.len(),
                texts.len()
            );
        }

        // Providers may return vectors out of order; `index` restores input order.
        resp_body.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(resp_body.data.into_iter().map(|d| d.embedding).collect())
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<ChatMessage> for WireMessage {
    fn from(msg: ChatMessage) -> Self {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .into_iter()
                    .map(|call| WireToolCall {
                        id: call.id,
                        kind: "function".to_string(),
                        function: WireFunctionCall {
                            name: call.name,
                            arguments: call.arguments,
                        },
                    })
                    .collect(),
            )
        };
        Self {
            role: msg.role,
            content: msg.content,
            tool_calls,
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<WireMessage> for ChatMessage {
    fn from(msg: WireMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content,
            tool_calls: msg
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
            tool_call_id: msg.tool_call_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<ToolSpec> for WireTool {
    fn from(spec: ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: spec.name,
                description: spec.description,
                parameters: spec.parameters,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}
