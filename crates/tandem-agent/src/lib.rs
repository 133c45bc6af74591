pub mod context;
pub mod leaf;
pub mod parallel;
pub mod router;
pub mod runner;
pub mod sequential;
pub mod session;
pub mod step;
pub mod workflows;

pub use context::InvocationContext;
pub use leaf::{FnStep, ModelStep, ToolStep};
pub use parallel::Parallel;
pub use router::{Metric, RoutePolicy, Router};
pub use runner::{RunOutcome, Runner};
pub use sequential::Sequential;
pub use session::{Session, SessionManager};
pub use step::{EventStream, LeafStep, Step};
pub use workflows::Workflows;
