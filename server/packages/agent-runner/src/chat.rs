use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::step::AgentError;
use crate::tools::ToolSpec;

const DEFAULT_TEMPERATURE: f32 = 0.6;
const MAX_RETRIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One transcript entry in the chat-completions wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, calls: &[ToolCallRequest]) -> Self {
        Self {
            role: ChatRole::Assistant,
            content,
            tool_calls: calls.iter().map(WireToolCall::from).collect(),
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as the API transmits it.
    pub arguments: String,
}

impl From<&ToolCallRequest> for WireToolCall {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

/// A tool invocation requested by the model, with arguments already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl From<WireToolCall> for ToolCallRequest {
    fn from(call: WireToolCall) -> Self {
        let arguments = serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments));
        Self {
            id: call.id,
            name: call.function.name,
            arguments,
        }
    }
}

/// What the model produced for one agent turn: free text, tool requests,
/// or both.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// External chat-model collaborator. Implementations must serialize the
/// request before returning, so the future owns everything it needs.
pub trait ChatModel: Send + Sync {
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolSpec],
    ) -> BoxFuture<'static, Result<ChatTurn, AgentError>>;
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

/// Azure-OpenAI-style chat completions client.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: ModelConfig,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: ModelConfig) -> Result<Self, AgentError> {
        if config.endpoint.trim().is_empty() {
            return Err(AgentError::Config("model endpoint is empty".to_string()));
        }
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Config("model api key is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| AgentError::Config(err.to_string()))?;
        Ok(Self {
            client,
            config,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version
        )
    }
}

impl ChatModel for OpenAiChatModel {
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolSpec],
    ) -> BoxFuture<'static, Result<ChatTurn, AgentError>> {
        let url = self.url();
        let api_key = self.config.api_key.clone();
        let client = self.client.clone();
        let mut body = json!({
            "messages": messages,
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
        }

        Box::pin(async move {
            let mut last_error = String::new();
            for attempt in 0..=MAX_RETRIES {
                if attempt > 0 {
                    tracing::warn!(attempt, error = %last_error, "retrying chat completion");
                }
                let response = match client
                    .post(&url)
                    .header("api-key", &api_key)
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(response) => response,
                    Err(err) => {
                        last_error = err.to_string();
                        continue;
                    }
                };
                if !response.status().is_success() {
                    last_error = format!("completion returned status {}", response.status());
                    continue;
                }
                let parsed = match response.json::<ChatCompletionResponse>().await {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        return Err(AgentError::MalformedResponse(err.to_string()));
                    }
                };
                let Some(choice) = parsed.choices.into_iter().next() else {
                    return Err(AgentError::MalformedResponse(
                        "completion had no choices".to_string(),
                    ));
                };
                return Ok(ChatTurn {
                    content: choice.message.content.filter(|text| !text.is_empty()),
                    tool_calls: choice
                        .message
                        .tool_calls
                        .into_iter()
                        .map(ToolCallRequest::from)
                        .collect(),
                });
            }
            Err(AgentError::Model(last_error))
        })
    }
}

fn wire_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireAssistantMessage,
}

#[derive(Debug, Deserialize)]
struct WireAssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_are_parsed() {
        let wire = WireToolCall {
            id: "call-1".to_string(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: "get_static_data".to_string(),
                arguments: r#"{"item_name": "market_sectors"}"#.to_string(),
            },
        };
        let call = ToolCallRequest::from(wire);
        assert_eq!(call.name, "get_static_data");
        assert_eq!(call.arguments["item_name"], "market_sectors");
    }

    #[test]
    fn unparseable_arguments_fall_back_to_raw_string() {
        let wire = WireToolCall {
            id: "call-2".to_string(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: "get_positions".to_string(),
                arguments: "not json".to_string(),
            },
        };
        let call = ToolCallRequest::from(wire);
        assert_eq!(call.arguments, Value::String("not json".to_string()));
    }

    #[test]
    fn assistant_transcript_entry_echoes_tool_calls() {
        let calls = vec![ToolCallRequest {
            id: "call-3".to_string(),
            name: "get_positions".to_string(),
            arguments: json!({}),
        }];
        let message = ChatMessage::assistant(None, &calls);
        let encoded = serde_json::to_value(&message).expect("serialize");
        assert_eq!(encoded["role"], "assistant");
        assert_eq!(encoded["tool_calls"][0]["function"]["name"], "get_positions");
        assert_eq!(encoded["tool_calls"][0]["function"]["arguments"], "{}");
        assert!(encoded.get("content").is_none());
    }

    #[test]
    fn model_construction_rejects_missing_credentials() {
        let result = OpenAiChatModel::new(ModelConfig {
            endpoint: "https://example.openai.azure.com".to_string(),
            api_key: "  ".to_string(),
            deployment: "gpt-4o-testing".to_string(),
            api_version: "2025-01-01-preview".to_string(),
        });
        assert!(matches!(result, Err(AgentError::Config(_))));
    }
}
