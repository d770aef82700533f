use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;

use crate::chat::{ChatMessage, ChatModel, ToolCallRequest};
use crate::step::{AgentError, AgentRunner, Message, RunRequest, StepResult};
use crate::tools;

/// Matches the recursion limit of the original graph runtime.
const DEFAULT_MAX_TURNS: u32 = 25;

const AGENT_STAGE: &str = "agent";
const TOOLS_STAGE: &str = "tools";

const SYSTEM_PROMPT: &str = "You are a trading analysis assistant. \
Analyze the user's question and use the appropriate tools to gather data.\n\
\n\
Available tools:\n\
- get_positions: fetch current trading positions\n\
- get_static_data: fetch static market data\n\
- get_dynamic_data: fetch dynamic market data\n\
- get_ticker_data: fetch per-ticker data\n\
\n\
Call the relevant tool when you need data. If you can answer directly, \
reply to the user without calling tools.";

/// The reasoning loop: agent node → tools node → agent node → … until the
/// model answers without requesting tools, or the turn budget runs out.
pub struct TradingGraph {
    model: Arc<dyn ChatModel>,
    max_turns: u32,
}

impl TradingGraph {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }
}

struct LoopState {
    model: Arc<dyn ChatModel>,
    transcript: Vec<ChatMessage>,
    pending_calls: Vec<ToolCallRequest>,
    remaining_turns: u32,
    done: bool,
}

impl AgentRunner for TradingGraph {
    fn stream_steps(
        &self,
        request: RunRequest,
    ) -> Result<BoxStream<'static, Result<StepResult, AgentError>>, AgentError> {
        if self.max_turns == 0 {
            return Err(AgentError::Config("max_turns must be at least 1".to_string()));
        }

        let transcript = vec![
            ChatMessage::system(system_prompt(request.locale.as_deref())),
            ChatMessage::user(request.query),
        ];
        let state = LoopState {
            model: self.model.clone(),
            transcript,
            pending_calls: Vec::new(),
            remaining_turns: self.max_turns,
            done: false,
        };

        Ok(stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }

            if !state.pending_calls.is_empty() {
                let step = run_tools(&mut state);
                return Some((Ok(step), state));
            }

            if state.remaining_turns == 0 {
                tracing::warn!("reasoning loop hit its turn budget without a final answer");
                return None;
            }
            state.remaining_turns -= 1;

            let specs = tools::specs();
            let turn = match state.model.complete(state.transcript.clone(), &specs).await {
                Ok(turn) => turn,
                Err(err) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
            };

            state
                .transcript
                .push(ChatMessage::assistant(turn.content.clone(), &turn.tool_calls));

            let mut messages = Vec::new();
            if let Some(content) = turn.content.filter(|text| !text.is_empty()) {
                messages.push(Message::assistant(content));
            }
            for call in &turn.tool_calls {
                messages.push(Message::tool_call(format!(
                    "{}({})",
                    call.name, call.arguments
                )));
            }

            if turn.tool_calls.is_empty() {
                state.done = true;
            } else {
                state.pending_calls = turn.tool_calls;
            }

            Some((Ok(StepResult::new(AGENT_STAGE, messages)), state))
        })
        .boxed())
    }
}

fn run_tools(state: &mut LoopState) -> StepResult {
    let calls = std::mem::take(&mut state.pending_calls);
    let mut messages = Vec::with_capacity(calls.len());
    for call in calls {
        let output = match tools::invoke(&call.name, &call.arguments) {
            Ok(value) => value,
            Err(err) => json!({ "error": err.to_string() }),
        };
        let text = output.to_string();
        tracing::debug!(tool = %call.name, bytes = text.len(), "tool invoked");
        state.transcript.push(ChatMessage::tool(call.id, text.clone()));
        messages.push(Message::tool(text));
    }
    StepResult::new(TOOLS_STAGE, messages)
}

fn system_prompt(locale: Option<&str>) -> String {
    match locale {
        Some(locale) if !locale.is_empty() => {
            format!("{SYSTEM_PROMPT}\n\nRespond in the user's locale: {locale}.")
        }
        _ => SYSTEM_PROMPT.to_string(),
    }
}
