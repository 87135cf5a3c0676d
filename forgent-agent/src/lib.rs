//! # Forgent Agent
//!
//! The agent side of a chat turn:
//! 1. The shell hands the renderer a prompt and the session's transcript
//! 2. The renderer binds the session's agent on first use
//! 3. The agent streams deltas and complete messages while it works
//! 4. Each model step either runs a code snippet or answers
//! 5. The renderer folds every event into a transcript snapshot
//!
//! Every session owns its agent, so conversations never share memory.

mod agent;
mod event;
mod executor;
mod message;
mod session;
mod transcript;

pub use agent::{
    AgentConfig, AgentFacade, CodeAgent, EventStream, ERROR_TITLE, EXECUTION_LOGS_TITLE,
    LAST_OUTPUT_MARKER, TOOL_CALL_TITLE,
};
pub use event::AgentEvent;
pub use executor::{ExecutionOutput, PythonExecutor, BASE_BUILTIN_MODULES};
pub use message::{Message, MessageMetadata, MessageRole, MessageStatus, Transcript};
pub use session::{SessionId, SessionRegistry, SessionState};
pub use transcript::{escape_markup, post_process, AgentFactory, TranscriptRenderer, OUTPUT_TITLE};
