//! # Transcript rendering
//!
//! Turns an agent's event stream into a sequence of transcript snapshots the
//! shell can redraw from.
//!
//! Ordering of snapshots:
//! 1. the transcript with the user's prompt appended
//! 2. one snapshot per agent event (append, or replace the pending message)
//! 3. the final transcript, once more, when the agent stream ends
//!
//! When the agent fails, the last good transcript is yielded followed by an
//! error item and the stream ends. Nothing is rolled back.

use crate::agent::{AgentFacade, LAST_OUTPUT_MARKER};
use crate::event::AgentEvent;
use crate::message::{Message, Transcript};
use crate::session::SessionState;
use forgent_core::{Error, Result};
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::{debug, warn};

/// Title given to execution log messages for display
pub const OUTPUT_TITLE: &str = "Output";

/// Creates the agent a session binds on its first turn
pub trait AgentFactory: Send + Sync {
    type Agent: AgentFacade;

    fn create(&self) -> Result<Self::Agent>;
}

impl<A, F> AgentFactory for F
where
    A: AgentFacade,
    F: Fn() -> Result<A> + Send + Sync,
{
    type Agent = A;

    fn create(&self) -> Result<A> {
        self()
    }
}

pub struct TranscriptRenderer<F> {
    factory: F,
}

impl<F: AgentFactory> TranscriptRenderer<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Run one turn of `session` and stream transcript snapshots.
    ///
    /// The agent keeps its memory between turns.
    pub fn render_turn<'a>(
        &'a self,
        prompt: String,
        mut transcript: Transcript,
        session: &'a mut SessionState<F::Agent>,
    ) -> impl Stream<Item = Result<Transcript>> + Send + 'a {
        async_stream::stream! {
            let agent = match session.bind_with(|| self.factory.create()) {
                Ok(agent) => agent,
                Err(err) => {
                    yield Ok(transcript.clone());
                    yield Err(interaction_error(err));
                    return;
                }
            };

            transcript.push_user(prompt.clone());
            yield Ok(transcript.clone());

            let mut events = agent.run_stream(&prompt, false);
            while let Some(event) = events.next().await {
                match event {
                    Ok(AgentEvent::Message(message)) => {
                        transcript.push_message(post_process(message));
                    }
                    Ok(AgentEvent::Delta(text)) => {
                        transcript.apply_delta(escape_markup(&text));
                    }
                    Err(err) => {
                        warn!(%err, "agent turn failed");
                        yield Ok(transcript.clone());
                        yield Err(interaction_error(err));
                        return;
                    }
                }
                yield Ok(transcript.clone());
            }

            debug!(messages = transcript.len(), "turn finished");
            yield Ok(transcript);
        }
    }
}

fn interaction_error(err: Error) -> Error {
    Error::new(err.kind(), format!("Error in interaction: {}", err.message()))
        .with_operation("transcript::render_turn")
        .set_source(err)
}

/// Escape angle brackets so streamed text is never taken for markup
pub fn escape_markup(text: &str) -> String {
    text.replace('<', r"\<").replace('>', r"\>")
}

/// Reshape a complete agent message for display.
///
/// JSON object content is reduced to its `"thought"`; malformed JSON is kept
/// as is. Execution logs are retitled and lose the last-output marker.
pub fn post_process(mut message: Message) -> Message {
    let content = message.content.as_str();
    if content.starts_with('{') && content.ends_with('}') {
        match serde_json::from_str::<serde_json::Value>(content) {
            Ok(value) => {
                message.content = match value.get("thought") {
                    Some(serde_json::Value::String(thought)) => thought.clone(),
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
            }
            Err(err) => debug!(%err, "message content is not valid JSON; leaving it as is"),
        }
    }

    if message.title().is_some_and(|t| t.contains("Execution Logs")) {
        message.metadata.title = Some(OUTPUT_TITLE.to_string());
        message.content = strip_last_output_marker(&message.content);
    }
    message
}

/// Remove the marker wherever it starts a line, with the line break before it
fn strip_last_output_marker(content: &str) -> String {
    let content = match content.strip_prefix(LAST_OUTPUT_MARKER) {
        Some(rest) => rest.strip_prefix('\n').unwrap_or(rest),
        None => content,
    };
    content.replace(&format!("\n{}", LAST_OUTPUT_MARKER), "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::scripted_agent;
    use crate::agent::EventStream;
    use crate::message::MessageStatus;
    use forgent_core::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays a fixed list of events every turn
    struct ScriptedAgent {
        script: Vec<std::result::Result<AgentEvent, String>>,
        tasks: Vec<String>,
    }

    impl AgentFacade for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        fn description(&self) -> &str {
            "replays events"
        }

        fn run_stream(&mut self, task: &str, reset_memory: bool) -> EventStream<'_> {
            assert!(!reset_memory);
            self.tasks.push(task.to_string());
            let events: Vec<Result<AgentEvent>> = self
                .script
                .iter()
                .map(|e| e.clone().map_err(Error::inference_failed))
                .collect();
            Box::pin(futures_util::stream::iter(events))
        }
    }

    fn renderer(
        script: Vec<std::result::Result<AgentEvent, String>>,
    ) -> TranscriptRenderer<impl AgentFactory<Agent = ScriptedAgent>> {
        TranscriptRenderer::new(move || -> Result<ScriptedAgent> {
            Ok(ScriptedAgent {
                script: script.clone(),
                tasks: Vec::new(),
            })
        })
    }

    fn delta(text: &str) -> std::result::Result<AgentEvent, String> {
        Ok(AgentEvent::Delta(text.to_string()))
    }

    fn message(message: Message) -> std::result::Result<AgentEvent, String> {
        Ok(AgentEvent::Message(message))
    }

    async fn snapshots<F: AgentFactory>(
        renderer: &TranscriptRenderer<F>,
        prompt: &str,
        transcript: Transcript,
        session: &mut SessionState<F::Agent>,
    ) -> Vec<Result<Transcript>> {
        renderer.render_turn(prompt.to_string(), transcript, session).collect().await
    }

    fn last_ok(items: &[Result<Transcript>]) -> &Transcript {
        items.iter().rev().find_map(|i| i.as_ref().ok()).unwrap()
    }

    #[tokio::test]
    async fn test_deltas_then_message() {
        let renderer = renderer(vec![
            delta("A"),
            delta("AB"),
            delta("ABC"),
            message(Message::assistant("done")),
        ]);
        let mut session = SessionState::new();
        let items = snapshots(&renderer, "go", Transcript::new(), &mut session).await;

        // user prompt, three deltas, one message, final
        assert_eq!(items.len(), 6);
        for item in &items {
            let transcript = item.as_ref().unwrap();
            assert!(transcript.pending_count() <= 1);
            if transcript.pending_count() == 1 {
                assert!(transcript.last().unwrap().is_pending());
            }
        }

        let after_deltas = items[3].as_ref().unwrap();
        assert_eq!(after_deltas.len(), 2);
        assert_eq!(after_deltas.last().unwrap().content, "ABC");

        let last = items.last().unwrap().as_ref().unwrap();
        assert_eq!(last.pending_count(), 0);
        assert_eq!(last.len(), 3);
        assert_eq!(last.messages()[1].content, "ABC");
        assert_eq!(last.messages()[1].metadata.status, MessageStatus::Done);
        assert_eq!(last.last().unwrap().metadata.status, MessageStatus::Done);
        assert_eq!(items[4].as_ref().unwrap(), last);
    }

    #[tokio::test]
    async fn test_pending_message_event_is_finished() {
        let renderer = renderer(vec![
            message(Message::pending("tool call")),
            delta("next step text"),
        ]);
        let mut session = SessionState::new();
        let items = snapshots(&renderer, "go", Transcript::new(), &mut session).await;

        let last = last_ok(&items);
        assert_eq!(last.len(), 3);
        assert_eq!(last.messages()[1].content, "tool call");
        assert_eq!(last.messages()[1].metadata.status, MessageStatus::Done);
        assert_eq!(last.last().unwrap().content, "next step text");
    }

    #[tokio::test]
    async fn test_first_snapshot_has_prompt() {
        let renderer = renderer(vec![]);
        let mut session = SessionState::new();
        let items = snapshots(&renderer, "hello", Transcript::new(), &mut session).await;

        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.messages()[0], Message::user("hello"));
    }

    #[tokio::test]
    async fn test_delta_escapes_markup() {
        let renderer = renderer(vec![delta("<tag>")]);
        let mut session = SessionState::new();
        let items = snapshots(&renderer, "go", Transcript::new(), &mut session).await;

        assert_eq!(last_ok(&items).last().unwrap().content, r"\<tag\>");
    }

    #[tokio::test]
    async fn test_json_thought_extraction() {
        let renderer = renderer(vec![
            message(Message::assistant(r#"{"thought": "hello"}"#)),
            message(Message::assistant("{not valid json}")),
            message(Message::assistant(r#"{"code": "x = 1"}"#)),
        ]);
        let mut session = SessionState::new();
        let items = snapshots(&renderer, "go", Transcript::new(), &mut session).await;

        let contents: Vec<&str> = last_ok(&items).messages()[1..]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["hello", "{not valid json}", ""]);
    }

    #[test]
    fn test_execution_logs_retitled() {
        let message = Message::assistant("Last output from code snippet:\nresult=5")
            .with_title("Execution Logs for step 3");
        let processed = post_process(message);
        assert_eq!(processed.title(), Some(OUTPUT_TITLE));
        assert_eq!(processed.content, "result=5");

        let message = Message::assistant("Execution logs:\nhi\nLast output from code snippet:\nNone")
            .with_title("📝 Execution Logs");
        assert_eq!(post_process(message).content, "Execution logs:\nhi\nNone");

        let untouched = post_process(Message::assistant("Last output from code snippet:\nx"));
        assert_eq!(untouched.content, "Last output from code snippet:\nx");
        assert_eq!(untouched.title(), None);
    }

    #[tokio::test]
    async fn test_error_yields_last_good_transcript() {
        let renderer = renderer(vec![delta("partial"), Err("boom".to_string())]);
        let mut session = SessionState::new();
        let items = snapshots(&renderer, "go", Transcript::new(), &mut session).await;

        assert_eq!(items.len(), 4);
        let err = items[3].as_ref().unwrap_err();
        assert_eq!(err.message(), "Error in interaction: boom");
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);

        let good = items[2].as_ref().unwrap();
        assert_eq!(good, items[1].as_ref().unwrap());
        assert_eq!(good.last().unwrap().content, "partial");
    }

    #[tokio::test]
    async fn test_failed_bind_is_reported() {
        let renderer = TranscriptRenderer::new(|| -> Result<ScriptedAgent> {
            Err(Error::config_invalid("no model configured"))
        });
        let mut session = SessionState::new();
        let mut transcript = Transcript::new();
        transcript.push_user("earlier");

        let items = snapshots(&renderer, "go", transcript.clone(), &mut session).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &transcript);
        assert!(items[1].as_ref().unwrap_err().message().starts_with("Error in interaction:"));
        assert!(!session.is_bound());
    }

    #[tokio::test]
    async fn test_agent_bound_once_per_session() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let renderer = TranscriptRenderer::new(move || -> Result<ScriptedAgent> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedAgent { script: vec![], tasks: Vec::new() })
        });

        let mut first = SessionState::new();
        let mut second = SessionState::new();
        let transcript = last_ok(&snapshots(&renderer, "one", Transcript::new(), &mut first).await).clone();
        snapshots(&renderer, "two", transcript, &mut first).await;
        snapshots(&renderer, "three", Transcript::new(), &mut second).await;

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(first.agent().unwrap().tasks, vec!["one", "two"]);
        assert_eq!(second.agent().unwrap().tasks, vec!["three"]);
    }

    #[tokio::test]
    async fn test_renders_code_agent_turn() {
        let renderer = TranscriptRenderer::new(|| -> Result<_> {
            Ok(scripted_agent(&[r#"{"thought": "I know this", "final_answer": "02:42:ac:11:00:02"}"#]))
        });
        let mut session = SessionState::new();
        let items = snapshots(&renderer, "What is the MAC address of my interface?", Transcript::new(), &mut session).await;

        let transcript = last_ok(&items);
        assert_eq!(transcript.pending_count(), 0);
        assert!(transcript.messages().iter().any(|m| m.content == "I know this"));
        assert_eq!(transcript.last().unwrap().content, "**Final answer:** 02:42:ac:11:00:02");
    }
}
