//! Chat model abstraction.
//!
//! [`ChatModel`] is the seam between the pipeline and a hosted language
//! model. [`OpenAIChat`] talks to an OpenAI-compatible
//! `POST /chat/completions` endpoint and supports strict JSON-schema
//! structured output for extraction tasks.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A named JSON schema the model's reply must conform to.
#[derive(Debug, Clone)]
pub struct JsonSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return the assistant's text reply to `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Return the assistant's reply parsed as JSON conforming to `schema`.
    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        schema: &JsonSchema,
    ) -> Result<serde_json::Value>;
}

/// OpenAI chat completions client. Requires `OPENAI_API_KEY`.
pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig, temperature: f32) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build OpenAI HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client for answering questions (`llm.temperature`).
    pub fn for_chat(config: &LlmConfig) -> Result<Self> {
        Self::new(config, config.temperature)
    }

    /// Client for structured extraction (`llm.extraction_temperature`).
    pub fn for_extraction(config: &LlmConfig) -> Result<Self> {
        Self::new(config, config.extraction_temperature)
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(request)
            .send()
            .await
            .context("failed to call OpenAI chat completions")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("OpenAI returned {}: {}", status, text);
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("failed to parse OpenAI response")?;
        first_content(parsed)
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages,
            response_format: None,
        };
        self.send(&request).await
    }

    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        schema: &JsonSchema,
    ) -> Result<serde_json::Value> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages,
            response_format: Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema,
                }
            })),
        };
        let content = self.send(&request).await?;
        serde_json::from_str(&content)
            .with_context(|| format!("model reply is not valid JSON for schema {}", schema.name))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

fn first_content(response: ChatResponse) -> Result<String> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| anyhow::anyhow!("OpenAI response has no choices"))?;

    match (message.content, message.refusal) {
        (Some(content), _) => Ok(content),
        (None, Some(refusal)) => bail!("model refused: {}", refusal),
        (None, None) => bail!("OpenAI response has no content"),
    }
}
