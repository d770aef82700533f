//! Scripted collaborators for consumer tests.

use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use crate::chat::{ChatMessage, ChatModel, ChatTurn};
use crate::step::{AgentError, AgentRunner, Message, RunRequest, StepResult};
use crate::tools::ToolSpec;

/// Yields a fixed sequence of step results. Each `stream_steps` call replays
/// the same script.
pub struct ScriptedRunner {
    steps: Vec<Result<StepResult, AgentError>>,
}

impl ScriptedRunner {
    pub fn new(steps: Vec<Result<StepResult, AgentError>>) -> Self {
        Self { steps }
    }

    /// Convenience: one step per text, each a single assistant-final message
    /// from the `"agent"` stage.
    pub fn answering(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|text| Ok(assistant_step(text)))
                .collect(),
        )
    }
}

impl AgentRunner for ScriptedRunner {
    fn stream_steps(
        &self,
        _request: RunRequest,
    ) -> Result<BoxStream<'static, Result<StepResult, AgentError>>, AgentError> {
        Ok(stream::iter(self.steps.clone()).boxed())
    }
}

/// Replays a script with a delay before each step, so tests can interleave
/// other requests with an in-flight generation.
pub struct DelayedRunner {
    steps: Vec<Result<StepResult, AgentError>>,
    delay: Duration,
}

impl DelayedRunner {
    pub fn new(steps: Vec<Result<StepResult, AgentError>>, delay: Duration) -> Self {
        Self { steps, delay }
    }
}

impl AgentRunner for DelayedRunner {
    fn stream_steps(
        &self,
        _request: RunRequest,
    ) -> Result<BoxStream<'static, Result<StepResult, AgentError>>, AgentError> {
        let delay = self.delay;
        Ok(stream::iter(self.steps.clone())
            .then(move |step| async move {
                tokio::time::sleep(delay).await;
                step
            })
            .boxed())
    }
}

/// Never yields a step; the stream stays pending forever.
pub struct PendingRunner;

impl AgentRunner for PendingRunner {
    fn stream_steps(
        &self,
        _request: RunRequest,
    ) -> Result<BoxStream<'static, Result<StepResult, AgentError>>, AgentError> {
        Ok(stream::pending().boxed())
    }
}

/// Fails before the stream opens.
pub struct FailingSetupRunner {
    message: String,
}

impl FailingSetupRunner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl AgentRunner for FailingSetupRunner {
    fn stream_steps(
        &self,
        _request: RunRequest,
    ) -> Result<BoxStream<'static, Result<StepResult, AgentError>>, AgentError> {
        Err(AgentError::Config(self.message.clone()))
    }
}

/// Pops one scripted turn per `complete` call and records the transcript it
/// was handed.
pub struct ScriptedChatModel {
    turns: Mutex<Vec<Result<ChatTurn, AgentError>>>,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChatModel {
    pub fn new(turns: Vec<Result<ChatTurn, AgentError>>) -> Self {
        Self {
            turns: Mutex::new(turns),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    /// Transcripts received so far, one per `complete` call.
    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts.lock().expect("transcripts lock").clone()
    }
}

impl ChatModel for ScriptedChatModel {
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _tools: &[ToolSpec],
    ) -> BoxFuture<'static, Result<ChatTurn, AgentError>> {
        self.transcripts
            .lock()
            .expect("transcripts lock")
            .push(messages);
        let mut turns = self.turns.lock().expect("turns lock");
        let next = if turns.is_empty() {
            Err(AgentError::Model("script exhausted".to_string()))
        } else {
            turns.remove(0)
        };
        Box::pin(async move { next })
    }
}

/// A single-assistant-message step from the `"agent"` stage.
pub fn assistant_step(text: &str) -> StepResult {
    StepResult::new("agent", vec![Message::assistant(text)])
}

/// A step whose messages carry no assistant-final text.
pub fn tool_step(stage: &str, output: &str) -> StepResult {
    StepResult::new(stage, vec![Message::tool(output)])
}
