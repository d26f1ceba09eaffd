//! Engine error classes and their user-facing rendering.

use colony_core::{BuildingKind, OrderId, OrderStatus, ResourceKind, Shortfall, ValidationError};
use colony_econ::EconError;
use persistence::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Why a state change was refused.
#[derive(Debug, Error, PartialEq)]
pub enum Rejection {
    #[error("order {order_id} finishes in {remaining_secs}s")]
    NotYetFinished { order_id: OrderId, remaining_secs: i64 },
    #[error("{kind} is already at or queued to its max level {max_level}")]
    MaxLevel { kind: BuildingKind, max_level: u32 },
    #[error("{kind} requires {requires} level {level}")]
    PrerequisiteUnmet {
        kind: BuildingKind,
        requires: BuildingKind,
        level: u32,
    },
    #[error("order {order_id} is under construction and cannot be cancelled")]
    CancelForbidden { order_id: OrderId },
    #[error("order {order_id} is already {status}")]
    Terminal { order_id: OrderId, status: OrderStatus },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}


/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("not enough {resource}: {required} required, {available} available")]
    InsufficientResources {
        resource: ResourceKind,
        required: Decimal,
        available: Decimal,
    },
    /// Lost an optimistic write; the whole operation may be retried.
    #[error("{entity} {key} was modified concurrently")]
    ConcurrentModification { entity: &'static str, key: String },
    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] Rejection),
    /// Duplicate completion signal. Callers treat it as a no-op.
    #[error("order {0} was already processed")]
    AlreadyProcessed(OrderId),
    #[error("production model: {0}")]
    Model(#[from] EconError),
    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification { .. })
    }

    /// Text safe to show a player.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NotFound { entity, .. } => format!("That {entity} does not exist."),
            EngineError::InsufficientResources {
                resource,
                required,
                available,
            } => format!(
                "Not enough {resource}: {} required, {} available.",
                required.floor(),
                available.floor()
            ),
            EngineError::ConcurrentModification { .. } => {
                "Your settlement changed while the request was processed. Please try again.".into()
            }
            EngineError::InvalidTransition(r) => {
                let mut text = r.to_string();
                if let Some(first) = text.get(..1) {
                    let upper = first.to_uppercase();
                    text.replace_range(..1, &upper);
                }
                text.push('.');
                text
            }
            EngineError::AlreadyProcessed(_) => "This order was already processed.".into(),
            EngineError::Model(_) | EngineError::Storage(_) => {
                "Something went wrong. Please try again later.".into()
            }
        }
    }

    pub(crate) fn insufficient(short: Shortfall) -> Self {
        EngineError::InsufficientResources {
            resource: short.resource,
            required: short.required,
            available: short.available,
        }
    }

    pub(crate) fn order_not_found(id: OrderId) -> Self {
        EngineError::NotFound {
            entity: "order",
            key: id.to_string(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { entity, key } => EngineError::ConcurrentModification { entity, key },
            StoreError::NotFound { entity, key } => EngineError::NotFound { entity, key },
            StoreError::Invalid(v) => EngineError::InvalidTransition(Rejection::Invalid(v)),
            other => EngineError::Storage(other),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Storage(StoreError::Sqlx(e))
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::InvalidTransition(Rejection::Invalid(e))
    }
}
