use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use tandem_core::error::{Result, TandemError};
use tandem_core::state::StateMap;
use tandem_core::types::StepFailure;

use crate::context::InvocationContext;
use crate::step::{EventStream, Step};

/// Number a threshold route is decided on.
#[derive(Clone)]
pub enum Metric {
    /// A numeric session state key.
    Key(String),
    /// Computed from the session state.
    Fn(Arc<dyn Fn(&StateMap) -> Result<f64> + Send + Sync>),
}

impl Metric {
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&StateMap) -> Result<f64> + Send + Sync + 'static,
    {
        Self::Fn(Arc::new(f))
    }

    pub fn evaluate(&self, state: &StateMap) -> Result<f64> {
        match self {
            Self::Key(key) => state
                .get(key)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| TandemError::MissingState(key.clone())),
            Self::Fn(f) => f(state),
        }
    }
}

/// How a router picks between its two candidates.
pub enum RoutePolicy {
    /// Primary when the metric is at or above the threshold.
    Threshold { metric: Metric, threshold: f64 },
    /// Secondary with probability `rate_b`, sampled per call.
    WeightedRandom {
        rate_b: f64,
        rng: Option<Mutex<StdRng>>,
    },
}

/// Delegates the whole invocation to one of two steps. Emits nothing itself.
pub struct Router {
    name: String,
    policy: RoutePolicy,
    primary: Step,
    secondary: Step,
}

impl Router {
    pub fn threshold(
        name: impl Into<String>,
        metric: Metric,
        threshold: f64,
        primary: Step,
        secondary: Step,
    ) -> Self {
        Self {
            name: name.into(),
            policy: RoutePolicy::Threshold { metric, threshold },
            primary,
            secondary,
        }
    }

    /// A/B split; `rate_b` must lie in `[0, 1]`.
    pub fn weighted(name: impl Into<String>, rate_b: f64, a: Step, b: Step) -> Result<Self> {
        let name = name.into();
        if !(0.0..=1.0).contains(&rate_b) {
            return Err(TandemError::Config(format!(
                "router {}: rate_b must be within [0, 1], got {}",
                name, rate_b
            )));
        }
        Ok(Self {
            name,
            policy: RoutePolicy::WeightedRandom { rate_b, rng: None },
            primary: a,
            secondary: b,
        })
    }

    /// Make weighted draws reproducible. No effect on threshold routing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        if let RoutePolicy::WeightedRandom { rng, .. } = &mut self.policy {
            *rng = Some(Mutex::new(StdRng::seed_from_u64(seed)));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> [&Step; 2] {
        [&self.primary, &self.secondary]
    }

    /// Pick the step to delegate to for this state.
    pub fn decide(&self, state: &StateMap) -> Result<&Step> {
        let primary = match &self.policy {
            RoutePolicy::Threshold { metric, threshold } => metric.evaluate(state)? >= *threshold,
            RoutePolicy::WeightedRandom { rate_b, rng } => {
                let u: f64 = match rng {
                    Some(rng) => rng.lock().unwrap_or_else(|e| e.into_inner()).gen(),
                    None => rand::random(),
                };
                u < 1.0 - rate_b
            }
        };
        Ok(if primary { &self.primary } else { &self.secondary })
    }

    pub(crate) fn run(&self, ctx: InvocationContext) -> EventStream {
        if ctx.cancel.is_cancelled() {
            return failed(StepFailure::cancelled(&self.name));
        }
        match self.decide(&ctx.state.snapshot()) {
            Ok(chosen) => {
                info!(router = %self.name, chosen = %chosen.name(), "Routing");
                chosen.run(ctx)
            }
            Err(e) => failed(StepFailure::from_error(&self.name, &e)),
        }
    }
}

fn failed(failure: StepFailure) -> EventStream {
    stream::iter(std::iter::once(Err(failure))).boxed()
}
