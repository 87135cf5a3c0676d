//! Events streamed by an agent during a turn

use crate::message::Message;

/// One item of an agent's output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A complete message
    Message(Message),
    /// Snapshot of the assistant output produced so far in the current step.
    /// Each delta carries the whole text, not an increment.
    Delta(String),
}

impl From<Message> for AgentEvent {
    fn from(message: Message) -> Self {
        AgentEvent::Message(message)
    }
}
