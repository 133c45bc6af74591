pub mod config;
pub mod error;
pub mod event;
pub mod order;
pub mod pricing;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ErrorKind, Result, TandemError};
pub use event::EventBus;
pub use order::{Address, Order, OrderStatus, Pricing};
pub use state::{SessionState, StateDelta, StateMap};
pub use traits::Capabilities;
pub use types::*;
