//! Chat model abstraction and implementations.
//!
//! Defines the [`ChatProvider`] trait used by the agent loop, plus:
//! - **[`OpenAiChatProvider`]** — any OpenAI-compatible chat-completions
//!   endpoint with function calling, distinguished only by base URL and
//!   API key.
//! - **[`ScriptedChatProvider`]** — replays canned responses and records
//!   what it was asked; drives the integration tests without a network.
//!
//! The wire format is the OpenAI `chat/completions` shape: `tool_calls`
//! on assistant messages, `tool` role messages correlated by
//! `tool_call_id`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{EngineError, Result};

/// One message in a conversation cycle.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message carrying tool calls (content may be absent).
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant",
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Tool-result message correlated to a call id.
    pub fn tool(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            role: "tool",
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn to_wire(&self) -> Value {
        let mut m = serde_json::Map::new();
        m.insert("role".to_string(), json!(self.role));
        m.insert(
            "content".to_string(),
            match &self.content {
                Some(c) => json!(c),
                None => Value::Null,
            },
        );
        if !self.tool_calls.is_empty() {
            let calls: Vec<Value> = self
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            m.insert("tool_calls".to_string(), Value::Array(calls));
        }
        if let Some(id) = &self.tool_call_id {
            m.insert("tool_call_id".to_string(), json!(id));
        }
        Value::Object(m)
    }
}

/// A structured tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Model output for one call: terminal text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Sampling parameters for one model call.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for chat model backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        params: &ChatParams,
    ) -> Result<ChatResponse>;
}

// ============ OpenAI-compatible Provider ============

/// Chat provider for any OpenAI-compatible `chat/completions` endpoint.
///
/// The API key environment variable is read on first use, so commands
/// that never call the model work without it.
pub struct OpenAiChatProvider {
    base_url: String,
    api_key_env: String,
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Upstream(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            client,
        })
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).map_err(|_| {
            EngineError::Upstream(format!("{} environment variable not set", self.api_key_env))
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        params: &ChatParams,
    ) -> Result<ChatResponse> {
        let wire_messages: Vec<Value> = messages.iter().map(|m| m.to_wire()).collect();

        let mut body = json!({
            "model": params.model,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "messages": wire_messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key()?))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("chat request failed ({}): {}", url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::Upstream(format!(
                "chat API error {}: {}",
                status, text
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::Upstream(e.to_string()))?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &Value) -> Result<ChatResponse> {
    let message = json["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| EngineError::Upstream("no choices in chat response".to_string()))?;

    let content = message["content"].as_str().map(String::from);

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|t| {
                    let name = t["function"]["name"].as_str()?.to_string();
                    // Arguments arrive as a JSON-encoded string.
                    let arguments = t["function"]["arguments"]
                        .as_str()
                        .and_then(|a| serde_json::from_str(a).ok())
                        .unwrap_or_else(|| json!({}));
                    Some(ToolCallRequest {
                        id: t["id"].as_str().unwrap_or("").to_string(),
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

// ============ Scripted Provider ============

/// What a [`ScriptedChatProvider`] observed on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub message_count: usize,
    pub tool_count: usize,
    pub system_prompt: String,
    pub temperature: f32,
}

/// Replays a fixed sequence of responses; repeats the last one once the
/// script runs out. Records every call for assertions.
pub struct ScriptedChatProvider {
    script: Mutex<std::collections::VecDeque<ChatResponse>>,
    last: Mutex<Option<ChatResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChatProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All calls observed so far.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChatProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        params: &ChatParams,
    ) -> Result<ChatResponse> {
        let system_prompt = messages
            .first()
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(RecordedCall {
            message_count: messages.len(),
            tool_count: tools.len(),
            system_prompt,
            temperature: params.temperature,
        });

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(resp) => {
                *self.last.lock().unwrap() = Some(resp.clone());
                Ok(resp)
            }
            None => {
                let repeat = self.last.lock().unwrap().clone();
                Ok(repeat.unwrap_or_default())
            }
        }
    }
}
