//! Chat messages and the transcript they are collected in

use serde::{Deserialize, Serialize};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Whether a message is still being streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Category shown above the content, e.g. "📝 Execution Logs"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: MessageStatus,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: MessageMetadata { title: None, status },
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, MessageStatus::Done)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content, MessageStatus::Done)
    }

    /// An assistant message that is still streaming
    pub fn pending(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content, MessageStatus::Pending)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.title.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.metadata.status == MessageStatus::Pending
    }
}

/// Ordered conversation history.
///
/// At most one message is pending, and while it is pending it is the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the user's prompt
    pub fn push_user(&mut self, prompt: impl Into<String>) {
        self.push_message(Message::user(prompt));
    }

    /// Finish the last message and append `message` after it.
    ///
    /// Whole messages are final, so `message` is stored as done whatever
    /// status it arrived with.
    pub fn push_message(&mut self, mut message: Message) {
        message.metadata.status = MessageStatus::Done;
        self.append(message);
    }

    fn append(&mut self, message: Message) {
        if let Some(last) = self.messages.last_mut() {
            last.metadata.status = MessageStatus::Done;
        }
        self.messages.push(message);
    }

    /// Apply a streamed snapshot of the in-progress assistant output.
    ///
    /// A pending last message has its content replaced; otherwise a new
    /// pending message is appended.
    pub fn apply_delta(&mut self, content: impl Into<String>) {
        match self.messages.last_mut() {
            Some(last) if last.is_pending() => last.content = content.into(),
            _ => self.messages.push(Message::pending(content)),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        let mut transcript = Transcript::new();
        for message in messages {
            transcript.append(message);
        }
        transcript
    }
}
