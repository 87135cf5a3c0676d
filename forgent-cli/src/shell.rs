//! # Chat shell
//!
//! A line-oriented chat front end. Each prompt runs one agent turn; the
//! transcript snapshots it yields are drawn incrementally, so streamed text
//! appears as it arrives and finished messages are never printed twice.

use crate::theme::Palette;
use crossterm::style::Stylize;
use forgent_agent::{
    AgentFactory, Message, MessageRole, SessionId, SessionRegistry, Transcript, TranscriptRenderer,
};
use forgent_core::Result;
use futures_util::StreamExt;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// Prompts offered by `/examples`
pub const EXAMPLES: &[&str] = &[
    "What is the MAC address of my interface?",
    "Send an ethernet frame with random source and broadcast destination.",
];

const CREDITS: &[&str] = &["large language models", "scapy", "tokio", "crossterm"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Prompt(String),
    Help,
    Examples,
    Example(usize),
    Reset,
    Quit,
    Unknown(String),
    Empty,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Prompt(line.to_string());
    }

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("/help"), None) => Command::Help,
        (Some("/examples"), None) => Command::Examples,
        (Some("/example"), Some(n)) => match n.parse() {
            Ok(n) => Command::Example(n),
            Err(_) => Command::Unknown(line.to_string()),
        },
        (Some("/reset"), None) => Command::Reset,
        (Some("/quit" | "/exit"), None) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Draws transcript snapshots without repeating what is already on screen
pub struct Printer {
    palette: Palette,
    agent_name: String,
    /// Messages at least partly on screen
    printed: usize,
    /// Content shown so far for the last printed message, while it is pending
    partial: Option<String>,
}

impl Printer {
    pub fn new(palette: Palette, agent_name: impl Into<String>) -> Self {
        Self {
            palette,
            agent_name: agent_name.into(),
            printed: 0,
            partial: None,
        }
    }

    pub fn reset(&mut self) {
        self.printed = 0;
        self.partial = None;
    }

    pub fn draw<W: Write>(&mut self, transcript: &Transcript, out: &mut W) -> io::Result<()> {
        let messages = transcript.messages();

        if let Some(shown) = self.partial.take() {
            if let Some(message) = self.printed.checked_sub(1).and_then(|i| messages.get(i)) {
                match message.content.strip_prefix(shown.as_str()) {
                    Some(suffix) => write!(out, "{}", suffix)?,
                    None => {
                        writeln!(out)?;
                        self.print_message(message, out)?;
                    }
                }
                self.settle(message, out)?;
            }
        }

        for message in messages.iter().skip(self.printed) {
            self.print_message(message, out)?;
            self.printed += 1;
            self.settle(message, out)?;
        }
        out.flush()
    }

    pub fn error<W: Write>(&mut self, message: &str, out: &mut W) -> io::Result<()> {
        if self.partial.take().is_some() {
            writeln!(out)?;
        }
        writeln!(out, "{}", message.with(self.palette.error).bold())?;
        out.flush()
    }

    fn print_message<W: Write>(&self, message: &Message, out: &mut W) -> io::Result<()> {
        match message.role {
            MessageRole::User => write!(out, "{}", "You".with(self.palette.user).bold())?,
            MessageRole::Assistant => {
                write!(out, "{}", self.agent_name.as_str().with(self.palette.assistant).bold())?
            }
        }
        if let Some(title) = message.title() {
            write!(out, " {}", format!("[{}]", title).with(self.palette.title))?;
        }
        writeln!(out)?;
        write!(out, "{}", message.content)
    }

    /// End a finished message, or remember what a pending one shows
    fn settle<W: Write>(&mut self, message: &Message, out: &mut W) -> io::Result<()> {
        if message.is_pending() {
            self.partial = Some(message.content.clone());
            return Ok(());
        }
        writeln!(out)?;
        for _ in 0..self.palette.blank_lines {
            writeln!(out)?;
        }
        Ok(())
    }
}

pub struct Shell<F: AgentFactory> {
    renderer: TranscriptRenderer<F>,
    sessions: SessionRegistry<F::Agent>,
    session: SessionId,
    transcript: Transcript,
    printer: Printer,
    palette: Palette,
    name: String,
    description: String,
}

impl<F: AgentFactory> Shell<F> {
    pub fn new(
        renderer: TranscriptRenderer<F>,
        palette: Palette,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let mut sessions = SessionRegistry::new();
        let session = sessions.open();
        Self {
            renderer,
            sessions,
            session,
            transcript: Transcript::new(),
            printer: Printer::new(palette, name.clone()),
            palette,
            name,
            description: description.into(),
        }
    }

    /// Read prompts until `/quit` or end of input
    pub async fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> Result<()> {
        self.print_banner(&mut out)?;

        loop {
            write!(out, "{} ", ">".with(self.palette.user).bold())?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }

            match parse_command(&line) {
                Command::Empty => {}
                Command::Prompt(prompt) => self.submit(&prompt, &mut out).await?,
                Command::Help => self.print_help(&mut out)?,
                Command::Examples => self.print_examples(&mut out)?,
                Command::Example(n) => match n.checked_sub(1).and_then(|i| EXAMPLES.get(i)) {
                    Some(prompt) => {
                        writeln!(out, "{}", prompt)?;
                        self.submit(prompt, &mut out).await?;
                    }
                    None => writeln!(out, "There is no example {}. Try /examples.", n)?,
                },
                Command::Reset => {
                    self.reset()?;
                    writeln!(out, "Started a new session.")?;
                }
                Command::Quit => break,
                Command::Unknown(command) => {
                    writeln!(out, "Unknown command '{}'. Type /help for the list.", command)?
                }
            }
        }

        self.sessions.close(&self.session)
    }

    async fn submit<W: Write>(&mut self, prompt: &str, out: &mut W) -> Result<()> {
        let session = self.sessions.get_mut(&self.session)?;
        let transcript = std::mem::take(&mut self.transcript);
        let mut snapshots = std::pin::pin!(self.renderer.render_turn(prompt.to_string(), transcript, session));

        while let Some(item) = snapshots.next().await {
            match item {
                Ok(snapshot) => {
                    self.printer.draw(&snapshot, out)?;
                    self.transcript = snapshot;
                }
                Err(err) => {
                    debug!(%err, retryable = err.is_retryable(), "turn ended with an error");
                    self.printer.error(err.message(), out)?;
                }
            }
        }
        Ok(())
    }

    /// Drop the current session and its agent, then start a fresh one
    fn reset(&mut self) -> Result<()> {
        self.sessions.close(&self.session)?;
        self.session = self.sessions.open();
        self.transcript = Transcript::new();
        self.printer.reset();
        Ok(())
    }

    fn print_banner<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.name.replace('_', " ").with(self.palette.title).bold())?;
        writeln!(out, "{}", self.description)?;
        writeln!(out)?;
        writeln!(out, "{}", "Powered by".with(self.palette.title))?;
        for credit in CREDITS {
            writeln!(out, "  - {}", credit)?;
        }
        writeln!(out)?;
        self.print_examples(out)?;
        writeln!(out, "Type a prompt, or /help for commands.")?;
        writeln!(out)
    }

    fn print_examples<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", "Examples".with(self.palette.title))?;
        for (i, example) in EXAMPLES.iter().enumerate() {
            writeln!(out, "  {}. {}", i + 1, example)?;
        }
        Ok(())
    }

    fn print_help<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "/help         show this help")?;
        writeln!(out, "/examples     list example prompts")?;
        writeln!(out, "/example <n>  submit example n")?;
        writeln!(out, "/reset        forget the conversation and start over")?;
        writeln!(out, "/quit         leave")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgent_agent::{AgentEvent, AgentFacade, EventStream};
    use forgent_core::Error;
    use std::io::Cursor;

    struct EchoAgent {
        turns: usize,
    }

    impl AgentFacade for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "repeats the task"
        }

        fn run_stream(&mut self, task: &str, _reset_memory: bool) -> EventStream<'_> {
            self.turns += 1;
            let events: Vec<Result<AgentEvent>> = if task == "fail" {
                vec![Err(Error::inference_failed("model unavailable"))]
            } else {
                vec![
                    Ok(AgentEvent::Delta("thinking".into())),
                    Ok(AgentEvent::Delta("thinking hard".into())),
                    Ok(AgentEvent::Message(Message::assistant(format!(
                        "**Final answer:** {} (turn {})",
                        task, self.turns
                    )))),
                ]
            };
            Box::pin(futures_util::stream::iter(events))
        }
    }

    fn shell() -> Shell<impl AgentFactory<Agent = EchoAgent>> {
        let renderer = TranscriptRenderer::new(|| -> Result<EchoAgent> { Ok(EchoAgent { turns: 0 }) });
        Shell::new(renderer, Palette::default(), "Forgent", "forges packets")
    }

    async fn run(input: &str) -> String {
        let mut out = Vec::new();
        shell().run(Cursor::new(input.to_string()), &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  hello there \n"), Command::Prompt("hello there".into()));
        assert_eq!(parse_command("\n"), Command::Empty);
        assert_eq!(parse_command("/help"), Command::Help);
        assert_eq!(parse_command("/example 2"), Command::Example(2));
        assert_eq!(parse_command("/example two"), Command::Unknown("/example two".into()));
        assert_eq!(parse_command("/exit"), Command::Quit);
        assert_eq!(parse_command("/reset now"), Command::Unknown("/reset now".into()));
    }

    #[test]
    fn test_printer_streams_suffix_only() {
        let mut printer = Printer::new(Palette::default(), "Forgent");
        let mut out = Vec::new();
        let mut transcript = Transcript::new();

        transcript.push_user("hi");
        printer.draw(&transcript, &mut out).unwrap();
        transcript.apply_delta("Hel");
        printer.draw(&transcript, &mut out).unwrap();
        transcript.apply_delta("Hello");
        printer.draw(&transcript, &mut out).unwrap();
        transcript.push_message(Message::assistant("bye"));
        printer.draw(&transcript, &mut out).unwrap();
        printer.draw(&transcript, &mut out).unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("Hello").count(), 1);
        assert_eq!(printed.matches("Hel").count(), 1);
        assert_eq!(printed.matches("bye").count(), 1);
        assert_eq!(printed.matches("hi").count(), 1);
    }

    #[test]
    fn test_printer_reprints_rewritten_pending() {
        let mut printer = Printer::new(Palette::default(), "Forgent");
        let mut out = Vec::new();
        let mut transcript = Transcript::new();

        transcript.apply_delta("draft one");
        printer.draw(&transcript, &mut out).unwrap();
        transcript.apply_delta("second draft");
        printer.draw(&transcript, &mut out).unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("draft one"));
        assert!(printed.contains("second draft"));
    }

    #[tokio::test]
    async fn test_shell_turns_and_examples() {
        let printed = run("/example 2\nagain\n/quit\n").await;

        assert!(printed.contains("Powered by"));
        assert!(printed.contains(EXAMPLES[0]));
        assert!(printed.contains(&format!("**Final answer:** {} (turn 1)", EXAMPLES[1])));
        assert!(printed.contains("**Final answer:** again (turn 2)"));
        assert_eq!(printed.matches("thinking hard").count(), 2);
    }

    #[tokio::test]
    async fn test_reset_starts_new_agent() {
        let printed = run("one\n/reset\ntwo\n").await;
        assert!(printed.contains("**Final answer:** one (turn 1)"));
        assert!(printed.contains("Started a new session."));
        assert!(printed.contains("**Final answer:** two (turn 1)"));
    }

    #[tokio::test]
    async fn test_turn_error_keeps_shell_running() {
        let printed = run("fail\nok\n").await;
        assert!(printed.contains("Error in interaction:"));
        assert!(printed.contains("model unavailable"));
        assert!(printed.contains("**Final answer:** ok (turn 2)"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let printed = run("/nope\n/example 9\n").await;
        assert!(printed.contains("Unknown command '/nope'"));
        assert!(printed.contains("There is no example 9"));
    }
}
