//! Provided leaf steps: tool-backed, model-backed and closure-backed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use tandem_core::error::Result;
use tandem_core::state::{StateDelta, StateMap};
use tandem_core::traits::Tool;
use tandem_core::types::{Capability, Event, InferenceRequest, Payload, StepFailure};
use tandem_tools::{execute_with_timeout, ToolRegistry};

use crate::context::InvocationContext;
use crate::step::LeafStep;

/// Derives tool arguments from the step input and current state.
pub type ArgsFn = Arc<dyn Fn(&Payload, &StateMap) -> Result<serde_json::Value> + Send + Sync>;

type StepFn = Arc<dyn Fn(InvocationContext) -> BoxFuture<'static, Result<Vec<Event>>> + Send + Sync>;

/// Turn a one-shot result into a leaf event stream.
fn once<'a, F>(name: String, fut: F) -> BoxStream<'a, std::result::Result<Event, StepFailure>>
where
    F: Future<Output = Result<Vec<Event>>> + Send + 'a,
{
    stream::once(fut)
        .flat_map(move |result| {
            let items: Vec<_> = match result {
                Ok(events) => events.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(StepFailure::from_error(&name, &e))],
            };
            stream::iter(items)
        })
        .boxed()
}

// ── FnStep ──────────────────────────────────────────────────────

/// Leaf backed by an async closure returning zero or more events.
pub struct FnStep {
    name: String,
    requires: Vec<Capability>,
    f: StepFn,
}

impl FnStep {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Event>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            requires: Vec::new(),
            f: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    pub fn requiring(mut self, capabilities: &[Capability]) -> Self {
        self.requires = capabilities.to_vec();
        self
    }
}

impl LeafStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<Capability> {
        self.requires.clone()
    }

    fn run(&self, ctx: InvocationContext) -> BoxStream<'_, std::result::Result<Event, StepFailure>> {
        once(self.name.clone(), (self.f)(ctx))
    }
}

// ── ToolStep ────────────────────────────────────────────────────

/// Use the step input as the argument object. Text that is not a JSON object
/// yields `{}`.
pub fn input_args(input: &Payload, _state: &StateMap) -> Result<serde_json::Value> {
    let value = match input {
        Payload::Data(v) => v.clone(),
        Payload::Text(s) => serde_json::from_str(s).unwrap_or(serde_json::Value::Null),
    };
    Ok(if value.is_object() {
        value
    } else {
        serde_json::json!({})
    })
}

/// Ignore the input; the tool reads everything it needs from state.
pub fn no_args(_input: &Payload, _state: &StateMap) -> Result<serde_json::Value> {
    Ok(serde_json::json!({}))
}

/// Leaf that invokes one tool and reports its JSON result.
pub struct ToolStep {
    name: String,
    tool: Arc<dyn Tool>,
    args: ArgsFn,
    output_key: Option<String>,
    timeout: Duration,
}

impl ToolStep {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            timeout: Duration::from_secs(tool.timeout_secs()),
            tool,
            args: Arc::new(input_args),
            output_key: None,
        }
    }

    /// Look the tool up in a registry, taking the registry's timeout.
    pub fn from_registry(registry: &ToolRegistry, tool_name: &str) -> Result<Self> {
        let tool = registry.require(tool_name)?;
        let timeout = registry.timeout_for(tool.as_ref());
        Ok(Self::new(tool).with_timeout(timeout))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_args<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload, &StateMap) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.args = Arc::new(f);
        self
    }

    /// Also store the tool's result in session state under `key`.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn invoke(&self, ctx: InvocationContext) -> Result<Vec<Event>> {
        let tool_ctx = ctx.tool_context();
        let args = (self.args)(&ctx.input, &tool_ctx.state)?;
        debug!(step = %self.name, tool = %self.tool.name(), "Invoking tool");

        let output = execute_with_timeout(self.tool.as_ref(), args, tool_ctx, self.timeout).await?;
        let mut delta: StateDelta = output.state_delta;
        if let Some(key) = &self.output_key {
            delta.set(key.clone(), output.content.clone());
        }
        Ok(vec![Event::new(&self.name, Payload::Data(output.content)).with_delta(delta)])
    }
}

impl LeafStep for ToolStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<Capability> {
        self.tool.requires().to_vec()
    }

    fn run(&self, ctx: InvocationContext) -> BoxStream<'_, std::result::Result<Event, StepFailure>> {
        once(self.name.clone(), self.invoke(ctx))
    }
}

// ── ModelStep ───────────────────────────────────────────────────

/// Leaf that asks the inference capability to process its input.
pub struct ModelStep {
    name: String,
    instruction: String,
    state_keys: Vec<String>,
    output_shape: Option<serde_json::Value>,
    output_key: Option<String>,
}

impl ModelStep {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            state_keys: Vec::new(),
            output_shape: None,
            output_key: None,
        }
    }

    /// Include these session keys alongside the input.
    pub fn with_state_keys(mut self, keys: &[&str]) -> Self {
        self.state_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Constrain the result to a JSON Schema.
    pub fn with_output_shape(mut self, schema: serde_json::Value) -> Self {
        self.output_shape = Some(schema);
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    fn render_input(&self, ctx: &InvocationContext) -> String {
        if self.state_keys.is_empty() {
            return ctx.input.render();
        }
        let state: serde_json::Map<String, serde_json::Value> = self
            .state_keys
            .iter()
            .filter_map(|k| ctx.state.get(k).map(|v| (k.clone(), v)))
            .collect();
        serde_json::json!({
            "input": ctx.input.to_value(),
            "state": state,
        })
        .to_string()
    }

    async fn invoke(&self, ctx: InvocationContext) -> Result<Vec<Event>> {
        let client = ctx.capabilities.inference()?;
        let request = InferenceRequest {
            instruction: self.instruction.clone(),
            input: self.render_input(&ctx),
            output_shape: self.output_shape.clone(),
        };
        debug!(step = %self.name, structured = request.output_shape.is_some(), "Calling model");

        let payload: Payload = client.infer(request).await?.into();
        let mut delta = StateDelta::new();
        if let Some(key) = &self.output_key {
            delta.set(key.clone(), payload.to_value());
        }
        Ok(vec![Event::new(&self.name, payload).with_delta(delta)])
    }
}

impl LeafStep for ModelStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<Capability> {
        vec![Capability::Inference]
    }

    fn run(&self, ctx: InvocationContext) -> BoxStream<'_, std::result::Result<Event, StepFailure>> {
        once(self.name.clone(), self.invoke(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use crate::testing::{collect, ctx};
    use serde_json::json;
    use tandem_core::error::{ErrorKind, TandemError};
    use tandem_core::traits::Capabilities;
    use tandem_core::types::{InferenceResult, ToolContext, ToolOutput};
    use tandem_test_utils::MockInference;

    struct Echo;

    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo input"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn execute(&self, input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
            Box::pin(async move { Ok(ToolOutput::new(input).with_state("echoed", json!(true))) })
        }
    }

    #[test]
    fn test_input_args() {
        let state = StateMap::new();
        assert_eq!(
            input_args(&Payload::Data(json!({"a": 1})), &state).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            input_args(&Payload::text(r#"{"b": 2}"#), &state).unwrap(),
            json!({"b": 2})
        );
        assert_eq!(input_args(&Payload::text("hi"), &state).unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_tool_step_output_key() {
        let step = Step::leaf(ToolStep::new(Arc::new(Echo)).with_output_key("result"));
        let ctx = ctx().with_input(json!({"x": 1}));
        let (events, failure) = collect(step.run(ctx.clone())).await;
        assert!(failure.is_none());
        assert_eq!(events[0].author(), "echo");
        assert_eq!(events[0].payload(), &Payload::Data(json!({"x": 1})));
        assert_eq!(ctx.state.get("result"), Some(json!({"x": 1})));
        assert_eq!(ctx.state.get("echoed"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_tool_step_args_error_fails_step() {
        let step = Step::leaf(
            ToolStep::new(Arc::new(Echo))
                .named("strict")
                .with_args(|input, _| match input {
                    Payload::Data(v) => Ok(v.clone()),
                    Payload::Text(_) => Err(TandemError::ToolValidation("expected structured input".into())),
                }),
        );
        let (_, failure) = collect(step.run(ctx().with_input("plain text"))).await;
        let failure = failure.unwrap();
        assert_eq!(failure.step, "strict");
        assert_eq!(failure.kind, ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_model_step_without_capability() {
        let step = Step::leaf(ModelStep::new("summary", "Summarize"));
        let (_, failure) = collect(step.run(ctx())).await;
        assert_eq!(failure.unwrap().kind, ErrorKind::UnavailableDependency);
    }

    #[tokio::test]
    async fn test_model_step_structured_result() {
        let mock = Arc::new(MockInference::scripted(vec![Ok(InferenceResult::Structured(
            json!({"in_stock": true}),
        ))]));
        let mut ctx = ctx().with_input("P001");
        ctx.capabilities = Capabilities::new().with_inference(mock.clone());
        ctx.state.set("inventory", json!({"count": 50}));

        let step = Step::leaf(
            ModelStep::new("inventory_agent", "Report stock")
                .with_state_keys(&["inventory"])
                .with_output_shape(json!({"type": "object"}))
                .with_output_key("report"),
        );
        let (events, failure) = collect(step.run(ctx.clone())).await;
        assert!(failure.is_none());
        assert_eq!(events[0].payload(), &Payload::Data(json!({"in_stock": true})));
        assert_eq!(ctx.state.get("report"), Some(json!({"in_stock": true})));

        let sent = &mock.requests()[0];
        let input: serde_json::Value = serde_json::from_str(&sent.input).unwrap();
        assert_eq!(input["input"], "P001");
        assert_eq!(input["state"]["inventory"]["count"], 50);
        assert!(sent.output_shape.is_some());
    }

    #[tokio::test]
    async fn test_model_step_unreachable() {
        let mut ctx = ctx();
        ctx.capabilities = Capabilities::new().with_inference(Arc::new(MockInference::failing()));
        let (_, failure) = collect(Step::leaf(ModelStep::new("m", "i")).run(ctx)).await;
        assert_eq!(failure.unwrap().kind, ErrorKind::UnavailableDependency);
    }
}
