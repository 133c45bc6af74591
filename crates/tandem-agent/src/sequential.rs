use std::sync::Arc;

use futures::StreamExt;
use tracing::debug;

use tandem_core::types::{Payload, StepFailure};

use crate::context::InvocationContext;
use crate::step::{spawn_stream, EventStream, Step};

/// Runs children one after another against the same session.
///
/// Each child sees the state left by its predecessors and receives the last
/// payload emitted so far as its input. The first failure ends the sequence.
pub struct Sequential {
    name: String,
    children: Vec<Step>,
}

impl Sequential {
    pub fn new(name: impl Into<String>, children: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Step] {
        &self.children
    }

    pub(crate) fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        spawn_stream(ctx.event_buffer, move |out| async move {
            let mut input: Payload = ctx.input.clone();

            for child in &self.children {
                if ctx.cancel.is_cancelled() {
                    out.fail(StepFailure::cancelled(child.name())).await;
                    return;
                }
                debug!(sequence = %self.name, step = %child.name(), "Starting child");

                let mut events = child.run(ctx.for_child(input.clone()));
                while let Some(item) = events.next().await {
                    match item {
                        Ok(event) => {
                            input = event.payload().clone();
                            if !out.emit(event).await {
                                return;
                            }
                        }
                        Err(failure) => {
                            out.fail(failure).await;
                            return;
                        }
                    }
                }
            }
        })
    }
}
