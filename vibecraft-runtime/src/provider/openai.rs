//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI, OpenRouter, vLLM, Ollama, and other OpenAI-compatible APIs.

use super::*;
use crate::error::{self, Error};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                Error::config_invalid("failed to create HTTP client")
                    .with_operation("openai::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request.model.as_deref().unwrap_or(self.default_model()).to_string();

        let api_request = OpenAIRequest {
            model: model.clone(),
            messages: request.messages.into_iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|t| OpenAITool {
                        r#type: "function".into(),
                        function: OpenAIFunction {
                            name: t.name,
                            description: Some(t.description),
                            parameters: Some(t.parameters),
                        },
                    })
                    .collect()
            }),
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url()))
            .json(&api_request);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.bearer_auth(api_key);
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await.map_err(|e| {
            Error::network_failed(e.to_string())
                .with_operation("openai::complete")
                .with_context("model", model.clone())
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();

            if status == 401 {
                return Err(Error::config_invalid("authentication failed, check the API key")
                    .with_operation("openai::complete")
                    .with_context("provider", self.config.name.clone()));
            }

            let err = match status {
                429 | 502..=504 => error::http_status("openai::complete", status, text),
                _ => Error::inference_failed(text)
                    .with_operation("openai::complete")
                    .with_context("status", status.to_string()),
            };
            return Err(err.with_context("model", model));
        }

        let api_response: OpenAIResponse = response.json().await.map_err(|e| {
            Error::parse_failed(e.to_string()).with_operation("openai::complete")
        })?;

        let choice = api_response.choices.into_iter().next().ok_or_else(|| {
            Error::inference_failed("no choices in response")
                .with_operation("openai::complete")
                .with_context("model", model.clone())
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .map(|tcs| {
                tcs.into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = api_response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content,
            tool_calls,
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
            usage,
        })
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<ChatMessage> for OpenAIMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system".into(),
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
                Role::Tool => "tool".into(),
            },
            content: msg.content,
            tool_calls: msg.tool_calls.map(|tcs| {
                tcs.into_iter()
                    .map(|tc| OpenAIToolCall {
                        id: tc.id,
                        r#type: "function".into(),
                        function: OpenAIFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_identity() {
        let provider = OpenAIProvider::new(ProviderConfig::openrouter("sk", "m1")).unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(provider.default_model(), "m1");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider =
            OpenAIProvider::new(ProviderConfig::local("http://localhost:8080/v1/", "m")).unwrap();
        assert_eq!(provider.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_tool_turn_wire_format() {
        let msg = ChatMessage::assistant_turn(
            None,
            vec![ToolCall {
                id: "call_1".into(),
                name: "readFiles".into(),
                arguments: r#"{"files":["a.txt"]}"#.into(),
            }],
        );
        let wire = serde_json::to_value(OpenAIMessage::from(msg)).unwrap();
        assert_eq!(wire["role"], "assistant");
        assert!(wire.get("content").is_none());
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "readFiles");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "id": "gen-1",
            "model": "m1",
            "choices": [{
                "message": {"role": "assistant", "content": null,
                    "tool_calls": [{"id": "c1", "type": "function",
                        "function": {"name": "terminal", "arguments": "{\"command\":\"ls\"}"}}]},
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: OpenAIResponse = serde_json::from_str(body).unwrap();
        let choice = &parsed.choices[0];
        assert!(choice.message.content.is_none());
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.name, "terminal");
    }
}
