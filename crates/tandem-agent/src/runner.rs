use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tandem_core::error::ErrorKind;
use tandem_core::event::EventBus;
use tandem_core::traits::Capabilities;
use tandem_core::types::{Capability, Event, Payload, RunEvent, SessionId, StepFailure};

use crate::context::{InvocationContext, DEFAULT_EVENT_BUFFER};
use crate::session::Session;
use crate::step::Step;

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub session_id: SessionId,
    pub events: Vec<Event>,
    pub failure: Option<StepFailure>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Payload of the final event, if any.
    pub fn last_payload(&self) -> Option<&Payload> {
        self.events.last().map(|e| e.payload())
    }

    /// Last event written by `author`.
    pub fn find(&self, author: &str) -> Option<&Event> {
        self.events.iter().rev().find(|e| e.author() == author)
    }

    pub fn into_result(self) -> Result<Vec<Event>, StepFailure> {
        match self.failure {
            None => Ok(self.events),
            Some(failure) => Err(failure),
        }
    }
}

/// Drives root steps within sessions and publishes what they emit.
pub struct Runner {
    capabilities: Capabilities,
    bus: Arc<EventBus>,
    event_buffer: usize,
}

impl Runner {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            bus: Arc::new(EventBus::default()),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer.max(1);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Refuse a step tree needing a capability this runner lacks.
    pub fn preflight(&self, step: &Step) -> Result<(), StepFailure> {
        let missing: Vec<Capability> = step
            .requirements()
            .into_iter()
            .filter(|c| !self.capabilities.provides(*c))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = missing.iter().map(|c| c.to_string()).collect();
        Err(StepFailure::new(
            step.name(),
            ErrorKind::UnavailableDependency,
            format!("missing capabilities: {}", names.join(", ")),
        ))
    }

    pub async fn run(&self, step: &Step, session: &Session, input: impl Into<Payload>) -> RunOutcome {
        self.run_with_cancel(step, session, input, CancellationToken::new())
            .await
    }

    /// Run `step` until it finishes or `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        step: &Step,
        session: &Session,
        input: impl Into<Payload>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let session_id = session.id.clone();
        let mut outcome = RunOutcome {
            session_id: session_id.clone(),
            events: Vec::new(),
            failure: None,
        };

        if let Err(failure) = self.preflight(step) {
            warn!(step = %step.name(), %failure, "Preflight failed");
            self.finish(&mut outcome, Some(failure));
            return outcome;
        }

        info!(session_id = %session_id, step = %step.name(), "Run started");
        self.bus.publish(RunEvent::RunStarted {
            session_id: session_id.clone(),
            step: step.name().to_string(),
        });

        let ctx = InvocationContext::new(session_id, session.state.clone(), self.capabilities.clone())
            .with_input(input)
            .with_cancel(cancel)
            .with_event_buffer(self.event_buffer);

        let mut events = step.run(ctx);
        let mut failure = None;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    self.bus.publish(RunEvent::Step(event.clone()));
                    outcome.events.push(event);
                }
                Err(f) => {
                    failure = Some(f);
                    break;
                }
            }
        }
        self.finish(&mut outcome, failure);
        outcome
    }

    fn finish(&self, outcome: &mut RunOutcome, failure: Option<StepFailure>) {
        let session_id = outcome.session_id.clone();
        match failure {
            None => {
                info!(session_id = %session_id, events = outcome.events.len(), "Run completed");
                self.bus.publish(RunEvent::RunCompleted {
                    session_id,
                    events: outcome.events.len(),
                });
            }
            Some(failure) => {
                warn!(
                    session_id = %session_id,
                    step = %failure.origin().step,
                    kind = %failure.kind,
                    "Run failed: {}",
                    failure.message
                );
                self.bus.publish(RunEvent::RunFailed {
                    session_id,
                    failure: failure.clone(),
                });
                outcome.failure = Some(failure);
            }
        }
    }
}
