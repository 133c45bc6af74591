use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, TandemError};
use crate::state::StateDelta;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content carried by an event or passed as step input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Data(serde_json::Value),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Data(_) => None,
        }
    }

    /// Look up a field of a structured payload, falling back to parsing text
    /// as JSON.
    pub fn field(&self, key: &str) -> Option<serde_json::Value> {
        match self {
            Self::Data(v) => v.get(key).cloned(),
            Self::Text(s) => serde_json::from_str::<serde_json::Value>(s)
                .ok()
                .and_then(|v| v.get(key).cloned()),
        }
    }

    /// Render for humans or for a model prompt.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Data(v) => v.to_string(),
        }
    }

    /// Convert to a JSON value (text becomes a JSON string).
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Data(v) => v.clone(),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Self::Data(v)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Immutable unit of observable output from a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    id: String,
    author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_delta: Option<StateDelta>,
    timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(author: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: author.into(),
            branch: None,
            payload: payload.into(),
            state_delta: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a state delta. Empty deltas are dropped.
    pub fn with_delta(mut self, delta: StateDelta) -> Self {
        self.state_delta = if delta.is_empty() { None } else { Some(delta) };
        self
    }

    /// A copy of this event labelled with the parallel branch it came from.
    /// Nested labels accumulate outermost-first: `outer/inner`.
    pub fn in_branch(&self, label: &str) -> Self {
        let mut event = self.clone();
        event.branch = Some(match &self.branch {
            Some(inner) => format!("{}/{}", label, inner),
            None => label.to_string(),
        });
        event
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn state_delta(&self) -> Option<&StateDelta> {
        self.state_delta.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Terminal failure signal ending a step's event sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Failures of child branches that caused this one (parallel groups).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StepFailure>,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            kind,
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn from_error(step: impl Into<String>, err: &TandemError) -> Self {
        Self::new(step, err.kind(), err.to_string())
    }

    pub fn cancelled(step: impl Into<String>) -> Self {
        Self::new(step, ErrorKind::Cancelled, "cancelled")
    }

    pub fn with_causes(mut self, causes: Vec<StepFailure>) -> Self {
        self.causes = causes;
        self
    }

    /// The step where the failure originated (first cause, depth-first).
    pub fn origin(&self) -> &StepFailure {
        match self.causes.first() {
            Some(cause) => cause.origin(),
            None => self,
        }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed ({}): {}", self.step, self.kind, self.message)
    }
}

impl std::error::Error for StepFailure {}

/// External collaborators a leaf step may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Inference,
    Catalog,
    Rates,
    Orders,
    Inventory,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inference => "inference",
            Self::Catalog => "catalog",
            Self::Rates => "rates",
            Self::Orders => "orders",
            Self::Inventory => "inventory",
        };
        f.write_str(s)
    }
}

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
}

/// Request to the inference capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub instruction: String,
    pub input: String,
    /// JSON Schema the result must conform to, if structured output is wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<serde_json::Value>,
}

/// Result from the inference capability.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    Text(String),
    Structured(serde_json::Value),
}

impl From<InferenceResult> for Payload {
    fn from(r: InferenceResult) -> Self {
        match r {
            InferenceResult::Text(s) => Payload::Text(s),
            InferenceResult::Structured(v) => Payload::Data(v),
        }
    }
}

/// Output of a tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: serde_json::Value,
    /// State the tool wants written to the session.
    pub state_delta: StateDelta,
}

impl ToolOutput {
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            content,
            state_delta: StateDelta::new(),
        }
    }

    pub fn with_state(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.state_delta.set(key, value);
        self
    }
}

/// Tool definition, e.g. for handing to a model or listing in the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    /// Session state as seen when the tool was invoked.
    pub state: crate::state::StateMap,
    pub capabilities: crate::traits::Capabilities,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("state_keys", &self.state.keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Run-level notification broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A run started.
    RunStarted { session_id: SessionId, step: String },
    /// A step emitted an event.
    Step(Event),
    /// The run finished without failure.
    RunCompleted { session_id: SessionId, events: usize },
    /// The run ended with a failure.
    RunFailed { session_id: SessionId, failure: StepFailure },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_field_from_data_and_text() {
        let data = Payload::Data(json!({"order_id": "ORDER_1"}));
        assert_eq!(data.field("order_id"), Some(json!("ORDER_1")));

        let text = Payload::text(r#"{"order_id": "ORDER_2"}"#);
        assert_eq!(text.field("order_id"), Some(json!("ORDER_2")));

        assert_eq!(Payload::text("plain").field("order_id"), None);
    }

    #[test]
    fn test_branch_labels_nest() {
        let event = Event::new("leaf", "x");
        let inner = event.in_branch("inner");
        let outer = inner.in_branch("outer");
        assert_eq!(event.branch(), None);
        assert_eq!(inner.branch(), Some("inner"));
        assert_eq!(outer.branch(), Some("outer/inner"));
        assert_eq!(outer.id(), event.id());
    }

    #[test]
    fn test_empty_delta_dropped() {
        let event = Event::new("a", "b").with_delta(StateDelta::new());
        assert!(event.state_delta().is_none());
    }

    #[test]
    fn test_failure_origin() {
        let leaf = StepFailure::new("taxes", ErrorKind::NotFound, "Order not found");
        let group = StepFailure::new("costs", ErrorKind::NotFound, "1 of 2 branches failed")
            .with_causes(vec![leaf.clone()]);
        assert_eq!(group.origin(), &leaf);
        assert_eq!(leaf.origin(), &leaf);
        assert_eq!(
            group.to_string(),
            "costs failed (not_found): 1 of 2 branches failed"
        );
    }
}
