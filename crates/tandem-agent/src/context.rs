use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tandem_core::state::SessionState;
use tandem_core::traits::Capabilities;
use tandem_core::types::{Payload, SessionId, ToolContext};

/// Default capacity of the channel between a composite step and its consumer.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Everything a step needs for one invocation.
///
/// Cloning shares the session state and the cancellation token. Use
/// [`InvocationContext::fork`] for an isolated parallel branch.
#[derive(Clone)]
pub struct InvocationContext {
    pub invocation_id: String,
    pub session_id: SessionId,
    pub input: Payload,
    pub state: SessionState,
    pub cancel: CancellationToken,
    pub capabilities: Capabilities,
    pub event_buffer: usize,
}

impl InvocationContext {
    pub fn new(session_id: SessionId, state: SessionState, capabilities: Capabilities) -> Self {
        Self {
            invocation_id: Uuid::new_v4().to_string(),
            session_id,
            input: Payload::empty(),
            state,
            cancel: CancellationToken::new(),
            capabilities,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_input(mut self, input: impl Into<Payload>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer.max(1);
        self
    }

    /// Same session and state, different input.
    pub fn for_child(&self, input: Payload) -> Self {
        let mut ctx = self.clone();
        ctx.input = input;
        ctx
    }

    /// Isolated branch: a snapshot copy of the state and the given token.
    pub fn fork(&self, cancel: CancellationToken) -> Self {
        let mut ctx = self.clone();
        ctx.state = self.state.fork();
        ctx.cancel = cancel;
        ctx
    }

    /// View handed to a tool.
    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            session_id: self.session_id.clone(),
            state: self.state.snapshot(),
            capabilities: self.capabilities.clone(),
        }
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("session_id", &self.session_id)
            .field("input", &self.input)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
