//! Agent implementation - orchestrates the LLM <-> interpreter loop

use crate::event::AgentEvent;
use crate::executor::{ExecutionOutput, PythonExecutor};
use crate::message::Message;
use forgent_core::error::provider_error;
use forgent_core::{
    render_template, AgentSettings, ChatMessage, CompletionRequest, Error, ExecutorSettings,
    LlmProvider, PromptTemplates, PromptVars, Result, Settings, StreamChunk, Usage, UsageTracker,
};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Title of the message carrying a step's code
pub const TOOL_CALL_TITLE: &str = "🛠️ Used tool python_interpreter";
/// Title of the message carrying a step's captured output
pub const EXECUTION_LOGS_TITLE: &str = "📝 Execution Logs";
/// Title of step failure messages
pub const ERROR_TITLE: &str = "💥 Error";

/// Marker between a snippet's printed output and its final status
pub const LAST_OUTPUT_MARKER: &str = "Last output from code snippet:";

/// Stream of events produced by one agent turn
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send + 'a>>;

/// Anything that can run a task and stream its progress
pub trait AgentFacade: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run `task`, keeping earlier turns in memory unless `reset_memory` is set.
    ///
    /// The stream is finite: it ends when the agent answers, gives up, or
    /// yields an error.
    fn run_stream(&mut self, task: &str, reset_memory: bool) -> EventStream<'_>;
}

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub description: String,
    /// Name of the network interface the prompts point the model at
    pub interface: String,
    /// Model calls per turn before a final answer is forced
    pub max_steps: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub additional_authorized_imports: Vec<String>,
    pub executor: ExecutorSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let agent = AgentSettings::default();
        Self {
            name: "Forgent".to_string(),
            description: "Forges 🛠️ and sends packets over layer 2 and layer 3, captures and analyzes packets, and provides network information.".to_string(),
            interface: String::new(),
            max_steps: agent.max_steps,
            temperature: None,
            max_tokens: None,
            additional_authorized_imports: agent.additional_authorized_imports,
            executor: agent.executor,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &Settings, interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            max_steps: settings.agent.max_steps,
            temperature: settings.model.temperature,
            max_tokens: settings.model.max_tokens,
            additional_authorized_imports: settings.agent.additional_authorized_imports.clone(),
            executor: settings.agent.executor.clone(),
            ..Self::default()
        }
    }
}

/// What the model answers with at every step
#[derive(Debug, Deserialize)]
struct StepOutput {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    final_answer: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct FinalAnswerVars<'a> {
    task: &'a str,
}

/// Parse a step reply, tolerating code fences or chatter around the object
fn parse_step_output(text: &str) -> Result<StepOutput> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(Error::parse_failed("model output contains no JSON object")
                .with_operation("agent::parse_step_output"));
        }
    };
    serde_json::from_str(json).map_err(|e| {
        Error::parse_failed(format!("model output is not valid JSON: {}", e))
            .with_operation("agent::parse_step_output")
            .set_source(e)
    })
}

fn answer_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn execution_logs(output: &ExecutionOutput) -> String {
    format!(
        "```bash\nExecution logs:\n{}\n{}\nexit status {}\n```",
        output.stdout.trim_end(),
        LAST_OUTPUT_MARKER,
        output.exit_code
    )
}

/// A code-writing agent: each step the model replies with a thought and
/// either a snippet to run or a final answer.
pub struct CodeAgent<P> {
    provider: Arc<P>,
    config: AgentConfig,
    system_prompt: String,
    templates: PromptTemplates,
    executor: PythonExecutor,
    /// Conversation after the system prompt, across turns
    memory: Vec<ChatMessage>,
    usage: UsageTracker,
}

impl<P: LlmProvider> CodeAgent<P> {
    pub fn new(provider: Arc<P>, config: AgentConfig, templates: PromptTemplates) -> Result<Self> {
        let executor = PythonExecutor::new(&config.executor, &config.additional_authorized_imports)?;
        let vars = PromptVars {
            authorized_imports: executor.authorized_imports().join(", "),
            interface: config.interface.clone(),
        };
        let system_prompt = templates.render_system_prompt(&vars)?;
        debug!(agent = %config.name, prompt_chars = system_prompt.len(), "code agent created");

        Ok(Self {
            provider,
            config,
            system_prompt,
            templates,
            executor,
            memory: Vec::new(),
            usage: UsageTracker::new(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn memory(&self) -> &[ChatMessage] {
        &self.memory
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn reset(&mut self) {
        self.memory.clear();
        self.usage = UsageTracker::new();
    }

    fn step_request(&self) -> CompletionRequest {
        let mut messages = Vec::with_capacity(self.memory.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.memory.iter().cloned());
        self.request(messages).with_json_output(true)
    }

    fn request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        let mut request = CompletionRequest::new(messages);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    /// Request asking the model to answer from memory after running out of steps
    fn final_answer_request(&self, task: &str) -> Result<Option<CompletionRequest>> {
        let (Some(pre), Some(post)) = (
            self.templates.nested("final_answer", "pre_messages"),
            self.templates.nested("final_answer", "post_messages"),
        ) else {
            return Ok(None);
        };

        let vars = FinalAnswerVars { task };
        let mut messages = vec![ChatMessage::system(render_template(
            "final_answer.pre_messages",
            pre,
            &vars,
        )?)];
        messages.extend(self.memory.iter().cloned());
        messages.push(ChatMessage::user(render_template(
            "final_answer.post_messages",
            post,
            &vars,
        )?));
        Ok(Some(self.request(messages)))
    }

    fn step_footer(&self, step: usize, usage: Option<Usage>) -> Message {
        let content = match usage {
            Some(usage) => format!(
                "Step {} | Input tokens: {} | Output tokens: {}",
                step, usage.prompt_tokens, usage.completion_tokens
            ),
            None => format!("Step {}", step),
        };
        Message::assistant(content)
    }

    /// Run one snippet; returns the messages to show and the observation to remember
    async fn run_code(&self, code: &str) -> (Vec<Message>, String) {
        match self.executor.execute(code).await {
            Ok(output) if output.success() => {
                let observation = format!("Observation:\nExecution logs:\n{}", output.stdout.trim_end());
                (
                    vec![Message::assistant(execution_logs(&output)).with_title(EXECUTION_LOGS_TITLE)],
                    observation,
                )
            }
            Ok(output) => {
                let stderr = output.stderr.trim_end().to_string();
                let observation = format!(
                    "Execution logs:\n{}\nError:\n{}\nNow let's retry: take care not to repeat previous errors!",
                    output.stdout.trim_end(),
                    stderr
                );
                (
                    vec![
                        Message::assistant(execution_logs(&output)).with_title(EXECUTION_LOGS_TITLE),
                        Message::assistant(stderr).with_title(ERROR_TITLE),
                    ],
                    observation,
                )
            }
            Err(err) => {
                warn!(%err, "snippet did not run");
                let observation = format!(
                    "Error:\n{}\nNow let's retry: take care not to repeat previous errors!",
                    err.message()
                );
                (vec![Message::assistant(err.message()).with_title(ERROR_TITLE)], observation)
            }
        }
    }
}

impl<P: LlmProvider + 'static> AgentFacade for CodeAgent<P> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn run_stream(&mut self, task: &str, reset_memory: bool) -> EventStream<'_> {
        if reset_memory {
            self.reset();
        }
        let task = task.to_string();

        Box::pin(async_stream::stream! {
            info!(task = %task, "starting task");
            self.memory.push(ChatMessage::user(format!("New task:\n{}", task)));
            let provider_name = self.provider.name().to_string();
            let model = self.provider.default_model().to_string();

            for step in 1..=self.config.max_steps {
                debug!(step, "agent step");
                yield Ok(AgentEvent::Message(Message::assistant(format!("**Step {}**", step))));

                let mut receiver = match self.provider.stream(self.step_request()).await {
                    Ok(receiver) => receiver,
                    Err(e) => {
                        yield Err(provider_error(&provider_name, e).with_operation("agent::step"));
                        return;
                    }
                };

                let mut output = String::new();
                let mut usage = None;
                while let Some(chunk) = receiver.next().await {
                    match chunk {
                        StreamChunk::Text(text) => {
                            output.push_str(&text);
                            yield Ok(AgentEvent::Delta(output.clone()));
                        }
                        StreamChunk::Done { usage: done_usage, .. } => {
                            usage = done_usage;
                            break;
                        }
                        StreamChunk::Error(e) => {
                            yield Err(Error::inference_failed(e)
                                .with_operation("agent::step")
                                .with_context("provider", provider_name.clone()));
                            return;
                        }
                    }
                }
                if let Some(usage) = &usage {
                    self.usage.track(&model, usage);
                }

                self.memory.push(ChatMessage::assistant(output.clone()));
                yield Ok(AgentEvent::Message(Message::assistant(output.clone())));

                let parsed = match parse_step_output(&output) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(%err, step, "unparseable model output");
                        self.memory.push(ChatMessage::user(format!(
                            "Error:\n{}\nAnswer with a single JSON object with the keys \"thought\", \"code\" and \"final_answer\".",
                            err.message()
                        )));
                        yield Ok(AgentEvent::Message(
                            Message::assistant(err.message()).with_title(ERROR_TITLE),
                        ));
                        yield Ok(AgentEvent::Message(self.step_footer(step, usage)));
                        continue;
                    }
                };

                if let Some(answer) = parsed.final_answer.as_ref().and_then(answer_text) {
                    yield Ok(AgentEvent::Message(self.step_footer(step, usage)));
                    yield Ok(AgentEvent::Message(Message::assistant(format!("**Final answer:** {}", answer))));
                    return;
                }

                match parsed.code.filter(|code| !code.trim().is_empty()) {
                    Some(code) => {
                        yield Ok(AgentEvent::Message(
                            Message::assistant(format!("```python\n{}\n```", code.trim_end()))
                                .with_title(TOOL_CALL_TITLE),
                        ));
                        let (messages, observation) = self.run_code(&code).await;
                        for message in messages {
                            yield Ok(AgentEvent::Message(message));
                        }
                        self.memory.push(ChatMessage::user(observation));
                        yield Ok(AgentEvent::Message(self.step_footer(step, usage)));
                    }
                    None => {
                        // No code and no answer: the thought is all the model has to say
                        yield Ok(AgentEvent::Message(self.step_footer(step, usage)));
                        yield Ok(AgentEvent::Message(Message::assistant(format!("**Final answer:** {}", parsed.thought))));
                        return;
                    }
                }
            }

            warn!(max_steps = self.config.max_steps, "reached max steps");
            yield Ok(AgentEvent::Message(Message::assistant("Reached max steps.").with_title(ERROR_TITLE)));

            let request = match self.final_answer_request(&task) {
                Ok(Some(request)) => request,
                Ok(None) => return,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            let receiver = match self.provider.stream(request).await {
                Ok(receiver) => receiver,
                Err(e) => {
                    yield Err(provider_error(&provider_name, e).with_operation("agent::final_answer"));
                    return;
                }
            };
            match receiver.collect_text().await {
                Ok(answer) => {
                    self.memory.push(ChatMessage::assistant(answer.clone()));
                    yield Ok(AgentEvent::Message(Message::assistant(format!("**Final answer:** {}", answer.trim()))));
                }
                Err(e) => yield Err(provider_error(&provider_name, e).with_operation("agent::final_answer")),
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use forgent_core::{ErrorKind, ProviderError, StreamReceiver};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies, two chunks each
    pub(crate) struct ScriptedProvider {
        replies: Mutex<VecDeque<std::result::Result<String, String>>>,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".to_string()));
            let text = reply.map_err(ProviderError::Network)?;

            let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
            let chunks = vec![
                StreamChunk::Text(text[..mid].to_string()),
                StreamChunk::Text(text[mid..].to_string()),
                StreamChunk::Done {
                    finish_reason: forgent_core::FinishReason::Stop,
                    usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                },
            ];
            Ok(StreamReceiver::new(futures_util::stream::iter(chunks)))
        }
    }

    pub(crate) fn test_config() -> AgentConfig {
        AgentConfig {
            interface: "eth0".to_string(),
            max_steps: 3,
            executor: ExecutorSettings {
                command: vec!["sh".to_string(), "-c".to_string()],
                timeout_secs: 10,
            },
            ..AgentConfig::default()
        }
    }

    pub(crate) fn scripted_agent(replies: &[&str]) -> CodeAgent<ScriptedProvider> {
        let templates = PromptTemplates::defaults().unwrap();
        CodeAgent::new(Arc::new(ScriptedProvider::new(replies)), test_config(), templates).unwrap()
    }

    async fn run(agent: &mut CodeAgent<ScriptedProvider>, task: &str) -> Vec<Result<AgentEvent>> {
        agent.run_stream(task, false).collect().await
    }

    fn messages(events: &[Result<AgentEvent>]) -> Vec<Message> {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(AgentEvent::Message(m)) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_step_output() {
        let parsed = parse_step_output("```json\n{\"thought\": \"t\", \"code\": \"print(1)\"}\n```").unwrap();
        assert_eq!(parsed.thought, "t");
        assert_eq!(parsed.code.as_deref(), Some("print(1)"));
        assert!(parsed.final_answer.is_none());

        assert!(parse_step_output("no json here").is_err());
        assert_eq!(parse_step_output("{oops}").unwrap_err().kind(), ErrorKind::ParseFailed);
    }

    #[test]
    fn test_system_prompt_rendered() {
        let agent = scripted_agent(&[]);
        assert!(agent.system_prompt().contains("eth0"));
        assert!(agent.system_prompt().contains("scapy.all"));
        assert!(!agent.system_prompt().contains("{{"));
    }

    #[tokio::test]
    async fn test_final_answer_ends_turn() {
        let mut agent = scripted_agent(&[r#"{"thought": "easy", "code": null, "final_answer": "42"}"#]);
        let events = run(&mut agent, "what is the answer?").await;

        assert!(events.iter().all(|e| e.is_ok()));
        let deltas: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                Ok(AgentEvent::Delta(d)) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(deltas.len(), 2);
        assert!(deltas[1].starts_with(deltas[0].as_str()));

        let messages = messages(&events);
        assert_eq!(messages.last().unwrap().content, "**Final answer:** 42");
        assert_eq!(agent.usage().total_tokens(), 15);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_code_step_runs_snippet() {
        let mut agent = scripted_agent(&[
            r#"{"thought": "print it", "code": "echo result=5"}"#,
            r#"{"thought": "done", "final_answer": "result is 5"}"#,
        ]);
        let events = run(&mut agent, "compute").await;
        let messages = messages(&events);

        let tool = messages.iter().find(|m| m.title() == Some(TOOL_CALL_TITLE)).unwrap();
        assert!(tool.content.contains("echo result=5"));

        let logs = messages.iter().find(|m| m.title() == Some(EXECUTION_LOGS_TITLE)).unwrap();
        assert!(logs.content.contains("result=5"));
        assert!(logs.content.contains(LAST_OUTPUT_MARKER));

        assert!(agent
            .memory()
            .iter()
            .any(|m| m.content.starts_with("Observation:") && m.content.contains("result=5")));
        assert_eq!(messages.last().unwrap().content, "**Final answer:** result is 5");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_snippet_is_reported_and_loop_continues() {
        let mut agent = scripted_agent(&[
            r#"{"thought": "try", "code": "echo boom >&2; exit 1"}"#,
            r#"{"thought": "give up", "final_answer": "could not"}"#,
        ]);
        let events = run(&mut agent, "task").await;
        let messages = messages(&events);

        let error = messages.iter().find(|m| m.title() == Some(ERROR_TITLE)).unwrap();
        assert_eq!(error.content, "boom");
        assert!(agent.memory().iter().any(|m| m.content.contains("Now let's retry")));
        assert_eq!(messages.last().unwrap().content, "**Final answer:** could not");
    }

    #[tokio::test]
    async fn test_unauthorized_import_is_an_error_message() {
        let mut agent = scripted_agent(&[
            r#"{"thought": "shell out", "code": "import subprocess"}"#,
            r#"{"thought": "ok", "final_answer": "no"}"#,
        ]);
        let events = run(&mut agent, "task").await;
        let messages = messages(&events);

        let error = messages.iter().find(|m| m.title() == Some(ERROR_TITLE)).unwrap();
        assert!(error.content.contains("subprocess"));
    }

    #[tokio::test]
    async fn test_unparseable_output_is_fed_back() {
        let mut agent = scripted_agent(&["I refuse to use JSON", r#"{"thought": "fine", "final_answer": "ok"}"#]);
        let events = run(&mut agent, "task").await;
        let messages = messages(&events);

        assert!(messages.iter().any(|m| m.title() == Some(ERROR_TITLE)));
        assert_eq!(messages.last().unwrap().content, "**Final answer:** ok");
    }

    #[tokio::test]
    async fn test_thought_without_code_is_the_answer() {
        let mut agent = scripted_agent(&[r#"{"thought": "eth0 is up"}"#]);
        let events = run(&mut agent, "status?").await;
        assert_eq!(messages(&events).last().unwrap().content, "**Final answer:** eth0 is up");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_max_steps_asks_for_final_answer() {
        let step = r#"{"thought": "again", "code": "echo tick"}"#;
        let mut agent = scripted_agent(&[step, step, step, "best effort"]);
        let events = run(&mut agent, "loop forever").await;
        let messages = messages(&events);

        assert!(messages.iter().any(|m| m.content == "Reached max steps."));
        assert_eq!(messages.last().unwrap().content, "**Final answer:** best effort");

        let requests = agent.provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        let last = requests.last().unwrap();
        assert!(last.messages.last().unwrap().content.contains("loop forever"));
    }

    #[tokio::test]
    async fn test_provider_error_ends_stream() {
        let templates = PromptTemplates::defaults().unwrap();
        let provider = Arc::new(ScriptedProvider::failing("connection refused"));
        let mut agent = CodeAgent::new(provider, test_config(), templates).unwrap();

        let events: Vec<_> = agent.run_stream("task", false).collect().await;
        let err = events.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
    }

    #[tokio::test]
    async fn test_memory_spans_turns_unless_reset() {
        let answer = r#"{"thought": "t", "final_answer": "a"}"#;
        let mut agent = scripted_agent(&[answer, answer, answer]);

        run(&mut agent, "first").await;
        let after_first = agent.memory().len();
        run(&mut agent, "second").await;
        assert_eq!(agent.memory().len(), after_first * 2);

        let _: Vec<_> = agent.run_stream("third", true).collect().await;
        assert_eq!(agent.memory().len(), after_first);
    }
}
