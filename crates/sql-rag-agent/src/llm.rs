// sql-rag-agent/crates/sql-rag-agent/src/llm.rs

//! Tool-calling chat model client for OpenAI-compatible endpoints.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::memory::{Message, ToolCall};

/// A function the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::Assistant {
            content: self.content,
            tool_calls: self.tool_calls,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion over the full history. The system prompt is sent ahead
    /// of `messages` but is not part of them.
    async fn invoke(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> anyhow::Result<AssistantReply>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<WireMessage>,
}

fn function_kind() -> String {
    "function".to_string()
}

pub struct OpenAiChatModel {
    base_url: String,
    api_key: Option<String>,
    api_version: Option<String>,
    model: String,
    temperature: f32,
    http_client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_version: None,
            model: model.into(),
            temperature: 0.1,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.llm_timeout())
            .build()
            .context("Failed to build chat model HTTP client")?;
        let model = Self {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            api_version: config.llm_api_version.clone(),
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            http_client,
        };
        info!("Chat model client initialized: {} at {}", model.model, model.base_url);
        Ok(model)
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Azure deployments are addressed by path and versioned by query string.
    fn completions_url(&self) -> String {
        match &self.api_version {
            Some(_) => format!(
                "{}/openai/deployments/{}/chat/completions",
                self.base_url, self.model
            ),
            None => format!("{}/chat/completions", self.base_url),
        }
    }

    fn to_wire_messages(system_prompt: &str, messages: &[Message]) -> Vec<WireMessage> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(WireMessage {
            role: "system".to_string(),
            content: Some(system_prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
        for message in messages {
            wire.push(match message {
                Message::User { content } => WireMessage {
                    role: "user".to_string(),
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                },
                Message::Assistant {
                    content,
                    tool_calls,
                } => WireMessage {
                    role: "assistant".to_string(),
                    content: if content.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(content.clone())
                    },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            tool_calls
                                .iter()
                                .map(|call| WireToolCall {
                                    id: Some(call.id.clone()),
                                    kind: function_kind(),
                                    function: WireFunctionCall {
                                        name: call.name.clone(),
                                        arguments: call.arguments.clone(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: None,
                    name: None,
                },
                Message::Tool {
                    content,
                    tool_name,
                    tool_call_id,
                } => WireMessage {
                    role: "tool".to_string(),
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.clone()),
                    name: Some(tool_name.clone()),
                },
            });
        }
        wire
    }

    fn from_wire_reply(message: WireMessage) -> AssistantReply {
        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();
        AssistantReply {
            content: message.content.unwrap_or_default(),
            tool_calls,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn invoke(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> anyhow::Result<AssistantReply> {
        debug!(
            "Invoking chat model with {} messages and {} tools",
            messages.len(),
            tools.len()
        );
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: Self::to_wire_messages(system_prompt, messages),
            temperature: self.temperature,
            tools: tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireFunctionSpec {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
        };

        let mut builder = self.http_client.post(self.completions_url()).json(&request);
        builder = match (&self.api_version, &self.api_key) {
            (Some(version), key) => {
                let builder = builder.query(&[("api-version", version.as_str())]);
                match key {
                    Some(key) => builder.header("api-key", key),
                    None => builder,
                }
            }
            (None, Some(key)) => builder.bearer_auth(key),
            (None, None) => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("LLM backend request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM backend returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {}", e))?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or_else(|| anyhow::anyhow!("LLM response contained no message"))?;

        let reply = Self::from_wire_reply(message);
        debug!(
            "Chat model replied with {} chars and {} tool calls",
            reply.content.len(),
            reply.tool_calls.len()
        );
        Ok(reply)
    }
}
