use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tandem_core::config::{FanOutPolicy, MergePolicy};
use tandem_core::error::{ErrorKind, Result, TandemError};
use tandem_core::state::StateDelta;
use tandem_core::types::{Event, Payload, StepFailure};

use crate::context::InvocationContext;
use crate::step::{spawn_stream, Emitter, EventStream, Step};

/// Runs branches concurrently, each against an isolated copy of the session
/// state, and merges their writes back once every branch has finished.
///
/// Events from a branch are relayed labelled with the branch name. Nothing is
/// merged unless all branches succeed.
pub struct Parallel {
    name: String,
    branches: Vec<Step>,
    fan_out: FanOutPolicy,
    merge: MergePolicy,
    max_concurrency: usize,
}

struct BranchOutcome {
    index: usize,
    delta: StateDelta,
    last: Option<Payload>,
    failure: Option<StepFailure>,
}

impl Parallel {
    pub fn new(name: impl Into<String>, branches: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            branches,
            fan_out: FanOutPolicy::default(),
            merge: MergePolicy::default(),
            max_concurrency: 0,
        }
    }

    pub fn with_fan_out(mut self, policy: FanOutPolicy) -> Self {
        self.fan_out = policy;
        self
    }

    pub fn with_merge(mut self, policy: MergePolicy) -> Self {
        self.merge = policy;
        self
    }

    /// Cap on branches running at once. 0 means no cap.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn branches(&self) -> &[Step] {
        &self.branches
    }

    pub(crate) fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        spawn_stream(ctx.event_buffer, move |out| async move {
            let group = ctx.cancel.child_token();
            let limit = match self.max_concurrency {
                0 => self.branches.len().max(1),
                n => n,
            };
            debug!(group = %self.name, branches = self.branches.len(), limit, "Fanning out");

            // Every branch sees the state as it was at fan-out, even when the
            // concurrency limit delays its start.
            let forks: Vec<InvocationContext> =
                self.branches.iter().map(|_| ctx.fork(group.clone())).collect();

            // Completion order.
            let outcomes: Vec<BranchOutcome> = stream::iter(forks.into_iter().enumerate())
                .map(|(index, branch_ctx)| self.run_branch(index, branch_ctx, &group, &out))
                .buffer_unordered(limit)
                .collect()
                .await;

            if outcomes.iter().any(|o| o.failure.is_some()) {
                out.fail(self.aggregate_failure(outcomes)).await;
                return;
            }

            let merged = match self.merge_deltas(&outcomes) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(group = %self.name, error = %e, "Branch writes collided");
                    out.fail(StepFailure::from_error(&self.name, &e)).await;
                    return;
                }
            };
            ctx.state.apply(&merged);

            let mut ordered: Vec<&BranchOutcome> = outcomes.iter().collect();
            ordered.sort_by_key(|o| o.index);
            let joined: serde_json::Map<String, serde_json::Value> = ordered
                .iter()
                .map(|o| {
                    let value = o.last.as_ref().map(Payload::to_value).unwrap_or(serde_json::Value::Null);
                    (self.branches[o.index].name().to_string(), value)
                })
                .collect();

            let join = Event::new(&self.name, serde_json::Value::Object(joined)).with_delta(merged);
            out.emit(join).await;
        })
    }

    async fn run_branch(
        &self,
        index: usize,
        ctx: InvocationContext,
        group: &CancellationToken,
        out: &Emitter,
    ) -> BranchOutcome {
        let branch = &self.branches[index];
        let mut outcome = BranchOutcome {
            index,
            delta: StateDelta::new(),
            last: None,
            failure: None,
        };

        // Not started before the group was cancelled.
        if group.is_cancelled() {
            outcome.failure = Some(StepFailure::cancelled(branch.name()));
            return outcome;
        }

        let mut events = branch.run(ctx);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(delta) = event.state_delta() {
                        outcome.delta.extend(delta);
                    }
                    outcome.last = Some(event.payload().clone());
                    if !out.emit(event.in_branch(branch.name())).await {
                        group.cancel();
                        outcome.failure = Some(StepFailure::cancelled(branch.name()));
                        break;
                    }
                }
                Err(failure) => {
                    if self.fan_out == FanOutPolicy::CancelOnFailure {
                        debug!(group = %self.name, branch = %branch.name(), "Cancelling siblings");
                        group.cancel();
                    }
                    outcome.failure = Some(failure);
                    break;
                }
            }
        }
        outcome
    }

    fn merge_deltas(&self, outcomes: &[BranchOutcome]) -> Result<StateDelta> {
        let mut merged = StateDelta::new();
        match self.merge {
            MergePolicy::FailOnConflict => {
                let mut ordered: Vec<&BranchOutcome> = outcomes.iter().collect();
                ordered.sort_by_key(|o| o.index);
                let mut writers: HashMap<&str, usize> = HashMap::new();
                for outcome in ordered {
                    for (key, value) in outcome.delta.iter() {
                        if let Some(&first) = writers.get(key.as_str()) {
                            return Err(TandemError::StateConflict {
                                key: key.clone(),
                                branches: vec![
                                    self.branches[first].name().to_string(),
                                    self.branches[outcome.index].name().to_string(),
                                ],
                            });
                        }
                        writers.insert(key.as_str(), outcome.index);
                        merged.set(key.clone(), value.clone());
                    }
                }
            }
            MergePolicy::LastWriterWins => {
                for outcome in outcomes {
                    for (key, value) in outcome.delta.iter() {
                        if merged.get(key).is_some() {
                            warn!(
                                group = %self.name,
                                key = %key,
                                branch = %self.branches[outcome.index].name(),
                                "Overwriting value written by an earlier branch"
                            );
                        }
                        merged.set(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(merged)
    }

    fn aggregate_failure(&self, outcomes: Vec<BranchOutcome>) -> StepFailure {
        let total = outcomes.len();
        let mut failed: Vec<(usize, StepFailure)> = outcomes
            .into_iter()
            .filter_map(|o| o.failure.map(|f| (o.index, f)))
            .collect();
        failed.sort_by_key(|(index, _)| *index);

        let kind = failed
            .iter()
            .map(|(_, f)| f.kind)
            .find(|k| *k != ErrorKind::Cancelled)
            .unwrap_or(ErrorKind::Cancelled);
        let names: Vec<&str> = failed.iter().map(|(i, _)| self.branches[*i].name()).collect();
        let message = format!("{} of {} branches failed: {}", failed.len(), total, names.join(", "));

        StepFailure::new(&self.name, kind, message)
            .with_causes(failed.into_iter().map(|(_, f)| f).collect())
    }
}
