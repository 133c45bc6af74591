use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use tandem_core::types::{Capability, Event, StepFailure};

use crate::context::InvocationContext;
use crate::parallel::Parallel;
use crate::router::Router;
use crate::sequential::Sequential;

/// Events of one step invocation. An `Err` item is terminal.
pub type EventStream = BoxStream<'static, Result<Event, StepFailure>>;

/// An atomic step: calls out to capabilities and reports events.
///
/// Implementors only produce events; the runtime applies each event's state
/// delta to the session and enforces cancellation.
pub trait LeafStep: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Capabilities this step needs.
    fn requires(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn run(&self, ctx: InvocationContext) -> BoxStream<'_, Result<Event, StepFailure>>;
}

/// A unit of orchestrated work.
#[derive(Clone)]
pub enum Step {
    Leaf(Arc<dyn LeafStep>),
    Sequential(Arc<Sequential>),
    Parallel(Arc<Parallel>),
    Router(Arc<Router>),
}

impl Step {
    pub fn leaf(step: impl LeafStep) -> Self {
        Self::Leaf(Arc::new(step))
    }

    /// Pass-through step that emits nothing.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::leaf(Noop { name: name.into() })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Leaf(s) => s.name(),
            Self::Sequential(s) => s.name(),
            Self::Parallel(s) => s.name(),
            Self::Router(s) => s.name(),
        }
    }

    /// Every capability any step in this tree may need.
    pub fn requirements(&self) -> BTreeSet<Capability> {
        let mut out = BTreeSet::new();
        self.collect_requirements(&mut out);
        out
    }

    fn collect_requirements(&self, out: &mut BTreeSet<Capability>) {
        match self {
            Self::Leaf(s) => out.extend(s.requires()),
            Self::Sequential(s) => s.children().iter().for_each(|c| c.collect_requirements(out)),
            Self::Parallel(s) => s.branches().iter().for_each(|c| c.collect_requirements(out)),
            Self::Router(s) => s.candidates().iter().for_each(|c| c.collect_requirements(out)),
        }
    }

    pub fn run(&self, ctx: InvocationContext) -> EventStream {
        match self {
            Self::Leaf(s) => run_leaf(s.clone(), ctx),
            Self::Sequential(s) => s.clone().run(ctx),
            Self::Parallel(s) => s.clone().run(ctx),
            Self::Router(s) => s.run(ctx),
        }
    }
}

impl From<Sequential> for Step {
    fn from(s: Sequential) -> Self {
        Self::Sequential(Arc::new(s))
    }
}

impl From<Parallel> for Step {
    fn from(s: Parallel) -> Self {
        Self::Parallel(Arc::new(s))
    }
}

impl From<Router> for Step {
    fn from(s: Router) -> Self {
        Self::Router(Arc::new(s))
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Leaf(_) => "Leaf",
            Self::Sequential(_) => "Sequential",
            Self::Parallel(_) => "Parallel",
            Self::Router(_) => "Router",
        };
        write!(f, "{}({})", kind, self.name())
    }
}

struct Noop {
    name: String,
}

impl LeafStep for Noop {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _ctx: InvocationContext) -> BoxStream<'_, Result<Event, StepFailure>> {
        futures::stream::empty().boxed()
    }
}

/// Sending half of a step's event stream.
#[derive(Clone)]
pub(crate) struct Emitter {
    tx: mpsc::Sender<Result<Event, StepFailure>>,
}

impl Emitter {
    /// Returns false once the consumer has gone away.
    pub(crate) async fn emit(&self, event: Event) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    pub(crate) async fn fail(&self, failure: StepFailure) {
        let _ = self.tx.send(Err(failure)).await;
    }
}

/// Run `producer` on its own task, streaming whatever it emits.
pub(crate) fn spawn_stream<F, Fut>(buffer: usize, producer: F) -> EventStream
where
    F: FnOnce(Emitter) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    tokio::spawn(producer(Emitter { tx }));
    ReceiverStream::new(rx).boxed()
}

/// Drive a leaf, applying each event's delta to the session as it passes and
/// stopping with `Cancelled` when the token fires.
fn run_leaf(leaf: Arc<dyn LeafStep>, ctx: InvocationContext) -> EventStream {
    spawn_stream(ctx.event_buffer, move |out| async move {
        let name = leaf.name().to_string();
        let cancel = ctx.cancel.clone();
        let state = ctx.state.clone();
        let mut inner = leaf.run(ctx);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    out.fail(StepFailure::cancelled(&name)).await;
                    return;
                }
                item = inner.next() => item,
            };

            match next {
                None => return,
                Some(Ok(event)) => {
                    if let Some(delta) = event.state_delta() {
                        state.apply(delta);
                    }
                    if !out.emit(event).await {
                        return;
                    }
                }
                Some(Err(failure)) => {
                    out.fail(failure).await;
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::FnStep;
    use crate::testing::{collect, ctx};
    use serde_json::json;
    use tandem_core::error::ErrorKind;
    use tandem_core::state::StateDelta;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_leaf_delta_applied_once() {
        let step = Step::leaf(FnStep::new("writer", |_ctx| async {
            Ok(vec![Event::new("writer", "done").with_delta(StateDelta::new().with("k", json!(1)))])
        }));
        let ctx = ctx();
        let (events, failure) = collect(step.run(ctx.clone())).await;
        assert!(failure.is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(ctx.state.get("k"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_noop_emits_nothing() {
        let (events, failure) = collect(Step::noop("skip").run(ctx())).await;
        assert!(events.is_empty());
        assert!(failure.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_leaf_stops() {
        let step = Step::leaf(FnStep::new("slow", |_ctx| async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(vec![])
        }));
        let token = CancellationToken::new();
        let ctx = ctx().with_cancel(token.clone());
        let stream = step.run(ctx);
        token.cancel();
        let (events, failure) = collect(stream).await;
        assert!(events.is_empty());
        assert_eq!(failure.unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_requirements_aggregate() {
        let a = Step::leaf(FnStep::new("a", |_| async { Ok(vec![]) }).requiring(&[Capability::Orders]));
        let b = Step::leaf(FnStep::new("b", |_| async { Ok(vec![]) }).requiring(&[Capability::Rates]));
        let seq: Step = Sequential::new("seq", vec![a, b]).into();
        let reqs: Vec<_> = seq.requirements().into_iter().collect();
        assert_eq!(reqs, vec![Capability::Rates, Capability::Orders]);
        assert_eq!(format!("{:?}", seq), "Sequential(seq)");
    }
}
