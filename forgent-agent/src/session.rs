//! Per-session state: each chat session owns its own agent

use forgent_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State scoped to one session; the agent is bound on first use
pub struct SessionState<A> {
    agent: Option<A>,
}

impl<A> Default for SessionState<A> {
    fn default() -> Self {
        Self { agent: None }
    }
}

impl<A> SessionState<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.agent.is_some()
    }

    pub fn agent(&self) -> Option<&A> {
        self.agent.as_ref()
    }

    /// The bound agent, creating it with `create` if there is none yet
    pub fn bind_with(&mut self, create: impl FnOnce() -> Result<A>) -> Result<&mut A> {
        if self.agent.is_none() {
            self.agent = Some(create()?);
        }
        self.agent
            .as_mut()
            .ok_or_else(|| Error::unexpected("session agent missing after bind"))
    }
}

/// All live sessions of the process
pub struct SessionRegistry<A> {
    sessions: HashMap<SessionId, SessionState<A>>,
}

impl<A> Default for SessionRegistry<A> {
    fn default() -> Self {
        Self { sessions: HashMap::new() }
    }
}

impl<A> SessionRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with empty state
    pub fn open(&mut self) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(id.clone(), SessionState::new());
        debug!(session = %id, "session opened");
        id
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Result<&mut SessionState<A>> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| Error::session_not_found(id.as_str()).with_operation("session::get"))
    }

    /// End a session, dropping its agent and memory
    pub fn close(&mut self, id: &SessionId) -> Result<()> {
        match self.sessions.remove(id) {
            Some(_) => {
                debug!(session = %id, "session closed");
                Ok(())
            }
            None => Err(Error::session_not_found(id.as_str()).with_operation("session::close")),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
