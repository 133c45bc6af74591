use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::OrderStatus;

/// Failure taxonomy shared by every step and capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown order, product, or other entity.
    NotFound,
    /// Illegal transition for the current state of an entity.
    InvalidState,
    /// An external capability could not be reached or a decision input is missing.
    UnavailableDependency,
    /// Concurrent writes collided (parallel merge or stale order version).
    Conflict,
    /// The run was stopped by its cancellation signal.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::UnavailableDependency => "unavailable_dependency",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum TandemError {
    // Order errors
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} cannot be modified as its status is already set to {status}")]
    OrderAlreadyFinalized { order_id: String, status: OrderStatus },

    #[error("Order {order_id} address cannot be changed as its status is already set to {status}")]
    AddressAlreadySet { order_id: String, status: OrderStatus },

    #[error("Order {0} has no shipping address")]
    AddressMissing(String),

    #[error("Order {order_id} cannot {action} while {status}")]
    InvalidTransition {
        order_id: String,
        action: String,
        status: OrderStatus,
    },

    #[error("Stale write for order {order_id}: expected version {expected}, found {found}")]
    VersionConflict {
        order_id: String,
        expected: u64,
        found: u64,
    },

    // Catalog errors
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    // Session state errors
    #[error("Session state key missing or malformed: {0}")]
    MissingState(String),

    #[error("State key '{key}' written by multiple branches: {}", branches.join(", "))]
    StateConflict { key: String, branches: Vec<String> },

    // Capability errors
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Inference request failed: {0}")]
    Inference(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TandemError {
    /// Classify this error into the step failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OrderNotFound(_) | Self::ProductNotFound(_) | Self::ToolNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::OrderAlreadyFinalized { .. }
            | Self::AddressAlreadySet { .. }
            | Self::AddressMissing(_)
            | Self::InvalidTransition { .. }
            | Self::ToolValidation(_)
            | Self::Config(_)
            | Self::ConfigNotFound(_)
            | Self::Json(_) => ErrorKind::InvalidState,
            Self::VersionConflict { .. } | Self::StateConflict { .. } => ErrorKind::Conflict,
            Self::MissingState(_)
            | Self::Unavailable(_)
            | Self::Inference(_)
            | Self::ToolTimeout { .. }
            | Self::Database(_)
            | Self::Io(_) => ErrorKind::UnavailableDependency,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, TandemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(TandemError::OrderNotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            TandemError::OrderAlreadyFinalized {
                order_id: "x".into(),
                status: OrderStatus::Pending,
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            TandemError::Unavailable("catalog".into()).kind(),
            ErrorKind::UnavailableDependency
        );
        assert_eq!(
            TandemError::StateConflict {
                key: "k".into(),
                branches: vec!["a".into(), "b".into()],
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(TandemError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_finalized_message_carries_status() {
        let err = TandemError::OrderAlreadyFinalized {
            order_id: "ORDER_1001".into(),
            status: OrderStatus::Placed,
        };
        assert!(err.to_string().contains("placed"));
    }

    #[test]
    fn test_conflict_message_lists_branches() {
        let err = TandemError::StateConflict {
            key: "total".into(),
            branches: vec!["left".into(), "right".into()],
        };
        assert_eq!(
            err.to_string(),
            "State key 'total' written by multiple branches: left, right"
        );
    }
}
