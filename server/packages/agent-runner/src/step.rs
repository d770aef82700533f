use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of a message inside a [`StepResult`]. The runner decides the role at
/// its boundary; consumers never inspect message shape beyond this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Final assistant text intended for the end user.
    Assistant,
    /// A request to invoke a tool, not user-visible content.
    ToolCall,
    /// Raw tool output fed back into the loop.
    Tool,
    /// Prompt scaffolding.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
}

impl Message {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
        }
    }

    pub fn tool_call(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::ToolCall,
            text: text.into(),
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            text: text.into(),
        }
    }
}

/// One unit of progress from the reasoning loop: the graph node that ran
/// (`"agent"` or `"tools"`) and the messages it emitted, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub stage: String,
    pub messages: Vec<Message>,
}

impl StepResult {
    pub fn new(stage: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            stage: stage.into(),
            messages,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("chat completion failed: {0}")]
    Model(String),
    #[error("chat completion returned malformed data: {0}")]
    MalformedResponse(String),
    #[error("invalid agent configuration: {0}")]
    Config(String),
}

/// A single user query handed to the runner.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub query: String,
    /// Response-language hint, e.g. `"tw"`.
    pub locale: Option<String>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            locale: None,
        }
    }
}

/// The narrow contract the gateway consumes. Each call to `stream_steps`
/// starts a fresh run; the returned stream is finite and not restartable.
///
/// Errors returned by `stream_steps` itself mean the run could not begin
/// (bad configuration); `Err` items inside the stream are mid-run failures.
pub trait AgentRunner: Send + Sync {
    fn stream_steps(
        &self,
        request: RunRequest,
    ) -> Result<BoxStream<'static, Result<StepResult, AgentError>>, AgentError>;
}
