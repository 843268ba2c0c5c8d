//! LLM provider contract and the built-in HTTP implementations.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::http::{classify_status, classify_transport};
use crate::types::{
    FailureKind, HealthReport, ProviderResponse, UsageUnits,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Tool schema passed natively to providers that support structured tool
/// calling (Ollama); other providers receive the prompt-level directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool parameters.
    pub parameters: serde_json::Value,
}

/// A structured tool call returned by a native tool-calling provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub tools: Vec<ToolSchema>,
    pub timeout: Duration,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages: vec![ChatMessage::user(user)],
            max_tokens: 4096,
            tools: Vec::new(),
            timeout: Duration::from_secs(switchboard_core::config::LLM_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    /// Structured calls from native tool-calling providers; the agent
    /// service normalizes these back into `[TOOL_CALL]` text for the common
    /// parser.
    pub tool_calls: Vec<NativeToolCall>,
}

/// Common interface for all LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn execute(&self, req: &ChatRequest) -> ProviderResponse<ChatCompletion>;

    /// Cheap reachability probe used by the registry health check.
    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        let start = Instant::now();
        match self.ping().await {
            Ok(()) => HealthReport::healthy(start.elapsed().as_millis() as u64),
            Err(detail) => HealthReport::unavailable(detail),
        }
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn execute(&self, req: &ChatRequest) -> ProviderResponse<ChatCompletion> {
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let body = json!({
            "model": req.model,
            "system": req.system,
            "messages": messages,
            "max_tokens": req.max_tokens,
        });

        let result = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(req.timeout)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                return ProviderResponse::fail(self.name(), classify_transport(&e), e.to_string())
            }
        };
        if !response.status().is_success() {
            let kind = classify_status(response.status());
            let detail = response.text().await.unwrap_or_default();
            return ProviderResponse::fail(self.name(), kind, detail);
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ProviderResponse::fail(self.name(), FailureKind::UpstreamError, e.to_string())
            }
        };

        let content = value["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = UsageUnits {
            prompt_units: value["usage"]["input_tokens"].as_u64().unwrap_or(0),
            completion_units: value["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        debug!(model = %req.model, tokens_out = usage.completion_units, "anthropic chat complete");
        ProviderResponse::ok(
            self.name(),
            ChatCompletion {
                content,
                tool_calls: Vec::new(),
            },
            Some(usage),
        )
    }

    async fn ping(&self) -> Result<(), String> {
        self.client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(Duration::from_secs(
                switchboard_core::config::HEALTH_TIMEOUT_SECS,
            ))
            .send()
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| {
                if r.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("status {}", r.status()))
                }
            })
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible (openai, gemini's compat endpoint, openrouter)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OpenAiCompatProvider {
    name: &'static str,
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: &'static str,
        client: reqwest::Client,
        api_key: Option<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name,
            client,
            api_key,
            endpoint: endpoint.into(),
        }
    }

    pub fn openai(client: reqwest::Client, api_key: String) -> Self {
        Self::new(
            "openai",
            client,
            Some(api_key),
            "https://api.openai.com/v1/chat/completions",
        )
    }

    pub fn gemini(client: reqwest::Client, api_key: String) -> Self {
        Self::new(
            "gemini",
            client,
            Some(api_key),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        )
    }

    pub fn openrouter(client: reqwest::Client, api_key: String) -> Self {
        Self::new(
            "openrouter",
            client,
            Some(api_key),
            "https://openrouter.ai/api/v1/chat/completions",
        )
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, req: &ChatRequest) -> ProviderResponse<ChatCompletion> {
        let mut messages = vec![json!({ "role": "system", "content": req.system })];
        messages.extend(
            req.messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content })),
        );
        let body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens,
        });

        let mut builder = self.client.post(&self.endpoint).timeout(req.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                return ProviderResponse::fail(self.name, classify_transport(&e), e.to_string())
            }
        };
        if !response.status().is_success() {
            let kind = classify_status(response.status());
            let detail = response.text().await.unwrap_or_default();
            return ProviderResponse::fail(self.name, kind, detail);
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ProviderResponse::fail(self.name, FailureKind::UpstreamError, e.to_string())
            }
        };

        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = UsageUnits {
            prompt_units: value["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_units: value["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        ProviderResponse::ok(
            self.name,
            ChatCompletion {
                content,
                tool_calls: Vec::new(),
            },
            Some(usage),
        )
    }

    async fn ping(&self) -> Result<(), String> {
        // The chat endpoint's base answers 404/405 for GET, which still
        // proves reachability; only transport errors count as down.
        self.client
            .get(&self.endpoint)
            .timeout(Duration::from_secs(
                switchboard_core::config::HEALTH_TIMEOUT_SECS,
            ))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Ollama (native tool calling)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| {
                std::env::var("OLLAMA_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:11434".to_string())
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn execute(&self, req: &ChatRequest) -> ProviderResponse<ChatCompletion> {
        let mut messages = vec![json!({ "role": "system", "content": req.system })];
        messages.extend(
            req.messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content })),
        );

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": false,
        });
        if !req.tools.is_empty() {
            // Tool-calling models take the schemas natively.
            let tools: Vec<serde_json::Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        let response = match self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(req.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ProviderResponse::fail(self.name(), classify_transport(&e), e.to_string())
            }
        };
        if !response.status().is_success() {
            let kind = classify_status(response.status());
            let detail = response.text().await.unwrap_or_default();
            return ProviderResponse::fail(self.name(), kind, detail);
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ProviderResponse::fail(self.name(), FailureKind::UpstreamError, e.to_string())
            }
        };

        let content = value["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let tool_calls = value["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        let name = c["function"]["name"].as_str()?.to_string();
                        let arguments = c["function"]["arguments"].clone();
                        Some(NativeToolCall { name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let usage = UsageUnits {
            prompt_units: value["prompt_eval_count"].as_u64().unwrap_or(0),
            completion_units: value["eval_count"].as_u64().unwrap_or(0),
        };

        ProviderResponse::ok(
            self.name(),
            ChatCompletion {
                content,
                tool_calls,
            },
            Some(usage),
        )
    }

    async fn ping(&self) -> Result<(), String> {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(
                switchboard_core::config::HEALTH_TIMEOUT_SECS,
            ))
            .send()
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| {
                if r.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("status {}", r.status()))
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_builder_defaults() {
        let req = ChatRequest::new("model", "system", "hello");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, 4096);
        assert!(req.tools.is_empty());
    }

    #[tokio::test]
    async fn unreachable_provider_fails_without_panicking() {
        let provider = OllamaProvider::new(
            crate::http::shared_client(),
            Some("http://127.0.0.1:1".to_string()),
        );
        let mut req = ChatRequest::new("m", "s", "u");
        req.timeout = Duration::from_millis(300);
        let resp = provider.execute(&req).await;
        assert!(!resp.success);
        assert!(resp.error.is_some());
    }
}
