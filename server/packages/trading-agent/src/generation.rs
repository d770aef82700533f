//! Drives one generation from start to registry cleanup.
//!
//! The controller wraps the reasoning loop's step stream in a state machine
//! that interleaves heartbeats, honors cancellation between steps, and
//! guarantees the registry record is released on every exit path, including
//! a client disconnect that drops the stream mid-flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use trading_agent_runner::step::{AgentError, MessageRole, StepResult};

use crate::registry::GenerationRegistry;

/// One outbound frame of a generation stream, before SSE serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// A piece of assistant-authored answer text.
    Chunk(String),
    /// A progress note for a step that produced no answer text.
    Status(String),
    /// Emitted when no step arrived within the heartbeat interval.
    Heartbeat,
    /// A terminal diagnostic; the stream ends after this frame.
    Error(String),
}

/// What a single step contributes to the outbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Assistant-facing answer text, in message order.
    Text(Vec<String>),
    /// No answer text; surface the stage name as progress instead.
    Diagnostic(String),
}

/// Pulls user-facing text out of a step. Only non-empty assistant messages
/// count; tool calls and tool outputs stay internal.
pub fn extract_user_text(step: &StepResult) -> Extraction {
    let texts: Vec<String> = step
        .messages
        .iter()
        .filter(|message| message.role == MessageRole::Assistant && !message.text.is_empty())
        .map(|message| message.text.clone())
        .collect();
    if texts.is_empty() {
        Extraction::Diagnostic(step.stage.clone())
    } else {
        Extraction::Text(texts)
    }
}

/// Releases a registry record when dropped, so a consumer that abandons the
/// stream mid-generation still frees the id.
struct ClearOnDrop {
    registry: Arc<GenerationRegistry>,
    request_id: String,
    cleared: bool,
}

impl ClearOnDrop {
    fn new(registry: Arc<GenerationRegistry>, request_id: String) -> Self {
        Self {
            registry,
            request_id,
            cleared: false,
        }
    }

    fn clear(&mut self) {
        if !self.cleared {
            self.registry.clear(&self.request_id);
            self.cleared = true;
        }
    }
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        self.clear();
    }
}

struct GenerationState {
    steps: BoxStream<'static, Result<StepResult, AgentError>>,
    heartbeat: Duration,
    pending: VecDeque<OutboundEvent>,
    done: bool,
    guard: ClearOnDrop,
}

/// Turns a step stream into the outbound event stream for one generation.
///
/// The controller checks the registry's cancellation flag before pulling a
/// step and again when the pull resolves, so a stop that lands while a step
/// is in flight discards that step. Events already extracted from an earlier
/// step are still delivered. When a step takes longer than `heartbeat` to
/// arrive, a heartbeat frame is emitted and the wait resumes.
pub fn run_generation(
    registry: Arc<GenerationRegistry>,
    steps: BoxStream<'static, Result<StepResult, AgentError>>,
    request_id: String,
    heartbeat: Duration,
) -> impl Stream<Item = OutboundEvent> + Send + 'static {
    let guard = ClearOnDrop::new(registry, request_id);
    let state = GenerationState {
        steps,
        heartbeat,
        pending: VecDeque::new(),
        done: false,
        guard,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.done {
                return None;
            }
            if state
                .guard
                .registry
                .is_stop_requested(&state.guard.request_id)
            {
                tracing::info!(request_id = %state.guard.request_id, "generation stopped");
                state.guard.clear();
                return None;
            }

            match tokio::time::timeout(state.heartbeat, state.steps.next()).await {
                Err(_) => return Some((OutboundEvent::Heartbeat, state)),
                Ok(None) => {
                    state.guard.clear();
                    return None;
                }
                Ok(Some(Ok(step))) => {
                    // A stop may have landed while this step was in flight.
                    if state
                        .guard
                        .registry
                        .is_stop_requested(&state.guard.request_id)
                    {
                        tracing::info!(request_id = %state.guard.request_id, "generation stopped");
                        state.guard.clear();
                        return None;
                    }
                    match extract_user_text(&step) {
                        Extraction::Text(texts) => {
                            state.pending.extend(texts.into_iter().map(OutboundEvent::Chunk));
                        }
                        Extraction::Diagnostic(stage) => {
                            state
                                .pending
                                .push_back(OutboundEvent::Status(format!("Processing {stage}...")));
                        }
                    }
                }
                Ok(Some(Err(err))) => {
                    tracing::error!(request_id = %state.guard.request_id, error = %err, "generation failed");
                    state.done = true;
                    state.guard.clear();
                    return Some((
                        OutboundEvent::Error(format!("Error generating response: {err}")),
                        state,
                    ));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::FutureExt;
    use trading_agent_runner::step::{AgentRunner, Message, RunRequest};
    use trading_agent_runner::testing::{
        assistant_step, tool_step, DelayedRunner, PendingRunner, ScriptedRunner,
    };

    fn collect(
        registry: &Arc<GenerationRegistry>,
        runner: &dyn AgentRunner,
        request_id: &str,
    ) -> impl Stream<Item = OutboundEvent> {
        registry.start(request_id);
        let steps = runner
            .stream_steps(RunRequest::new("q"))
            .expect("stream opens");
        run_generation(
            Arc::clone(registry),
            steps,
            request_id.to_string(),
            Duration::from_secs(25),
        )
    }

    #[test]
    fn extraction_prefers_assistant_text() {
        let step = StepResult::new(
            "agent",
            vec![Message::tool_call("get_positions({})"), Message::assistant("hello")],
        );
        assert_eq!(
            extract_user_text(&step),
            Extraction::Text(vec!["hello".to_string()])
        );
    }

    #[test]
    fn extraction_falls_back_to_the_stage() {
        let step = tool_step("tools", "{\"cash\": 1}");
        assert_eq!(
            extract_user_text(&step),
            Extraction::Diagnostic("tools".to_string())
        );
    }

    #[tokio::test]
    async fn chunks_arrive_in_step_order_and_the_record_is_released() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = ScriptedRunner::answering(&["first", "second"]);
        let events: Vec<OutboundEvent> = collect(&registry, &runner, "u1").collect().await;

        assert_eq!(
            events,
            vec![
                OutboundEvent::Chunk("first".to_string()),
                OutboundEvent::Chunk("second".to_string()),
            ]
        );
        assert!(registry.list_active().is_empty());
        assert!(!registry.is_stop_requested("u1"));
    }

    #[tokio::test]
    async fn tool_steps_surface_as_progress() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = ScriptedRunner::new(vec![
            Ok(tool_step("tools", "{}")),
            Ok(assistant_step("done")),
        ]);
        let events: Vec<OutboundEvent> = collect(&registry, &runner, "u1").collect().await;

        assert_eq!(
            events,
            vec![
                OutboundEvent::Status("Processing tools...".to_string()),
                OutboundEvent::Chunk("done".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn an_empty_run_ends_cleanly() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = ScriptedRunner::new(vec![]);
        let events: Vec<OutboundEvent> = collect(&registry, &runner, "u1").collect().await;

        assert!(events.is_empty());
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test]
    async fn a_failing_step_ends_the_stream_with_one_error_frame() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = ScriptedRunner::new(vec![
            Ok(assistant_step("partial")),
            Err(AgentError::Model("upstream 500".to_string())),
            Ok(assistant_step("unreachable")),
        ]);
        let events: Vec<OutboundEvent> = collect(&registry, &runner, "u1").collect().await;

        assert_eq!(
            events,
            vec![
                OutboundEvent::Chunk("partial".to_string()),
                OutboundEvent::Error(
                    "Error generating response: chat completion failed: upstream 500".to_string()
                ),
            ]
        );
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream_between_steps() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = ScriptedRunner::answering(&["one", "two", "three"]);
        let mut events = Box::pin(collect(&registry, &runner, "u1"));

        assert_eq!(
            events.next().await,
            Some(OutboundEvent::Chunk("one".to_string()))
        );
        assert!(registry.request_stop("u1"));

        // The next pull hits the cancellation checkpoint and ends the stream.
        assert_eq!(events.next().await, None);
        assert!(!registry.is_stop_requested("u1"));
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn a_stop_during_an_in_flight_pull_discards_the_arriving_step() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = DelayedRunner::new(
            vec![Ok(assistant_step("late"))],
            Duration::from_secs(5),
        );
        registry.start("u1");
        let steps = runner
            .stream_steps(RunRequest::new("q"))
            .expect("stream opens");
        let mut events = Box::pin(run_generation(
            Arc::clone(&registry),
            steps,
            "u1".to_string(),
            Duration::from_secs(25),
        ));

        let stopper = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                registry.request_stop("u1")
            })
        };

        // The step arrives after the stop; its chunk must not be forwarded.
        assert_eq!(events.next().await, None);
        assert!(stopper.await.expect("stop task"));
        assert!(registry.list_active().is_empty());
        assert!(!registry.is_stop_requested("u1"));
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_record() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = ScriptedRunner::answering(&["one", "two"]);
        let mut events = Box::pin(collect(&registry, &runner, "u1"));

        assert_eq!(
            events.next().await,
            Some(OutboundEvent::Chunk("one".to_string()))
        );
        assert_eq!(registry.list_active(), vec!["u1".to_string()]);

        drop(events);
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn a_silent_stream_produces_heartbeats() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = PendingRunner;
        registry.start("u1");
        let steps = runner
            .stream_steps(RunRequest::new("q"))
            .expect("stream opens");
        let mut events = Box::pin(run_generation(
            Arc::clone(&registry),
            steps,
            "u1".to_string(),
            Duration::from_secs(25),
        ));

        assert_eq!(events.next().await, Some(OutboundEvent::Heartbeat));
        assert_eq!(events.next().await, Some(OutboundEvent::Heartbeat));
    }

    #[tokio::test(start_paused = true)]
    async fn a_slow_step_gets_a_heartbeat_before_its_chunk() {
        let registry = Arc::new(GenerationRegistry::new());
        let runner = DelayedRunner::new(
            vec![Ok(assistant_step("late"))],
            Duration::from_secs(30),
        );
        let mut events = Box::pin(collect(&registry, &runner, "u1"));

        assert_eq!(events.next().await, Some(OutboundEvent::Heartbeat));
        assert_eq!(
            events.next().await,
            Some(OutboundEvent::Chunk("late".to_string()))
        );
        assert_eq!(events.next().await, None);
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test]
    async fn pending_events_still_flush_after_a_stop_request() {
        let registry = Arc::new(GenerationRegistry::new());
        let step = StepResult::new(
            "agent",
            vec![Message::assistant("a"), Message::assistant("b")],
        );
        let runner = ScriptedRunner::new(vec![Ok(step)]);
        let mut events = Box::pin(collect(&registry, &runner, "u1"));

        assert_eq!(
            events.next().await,
            Some(OutboundEvent::Chunk("a".to_string()))
        );
        registry.request_stop("u1");

        // "b" was extracted from the same step and is already queued.
        assert_eq!(
            events.next().await,
            Some(OutboundEvent::Chunk("b".to_string()))
        );
        assert_eq!(events.next().await, None);
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test]
    async fn the_stream_is_send() {
        fn assert_send<T: Send>(_value: &T) {}
        let registry = Arc::new(GenerationRegistry::new());
        let runner = ScriptedRunner::answering(&["x"]);
        let steps = runner
            .stream_steps(RunRequest::new("q"))
            .expect("stream opens");
        let events = run_generation(registry, steps, "u1".to_string(), Duration::from_secs(25));
        assert_send(&events);
        let _ = events.boxed().next().now_or_never();
    }
}
