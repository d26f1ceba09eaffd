#![deny(warnings)]

//! Core domain models and invariants for the colony progression engine.
//!
//! This crate defines the serializable types shared by the production model,
//! the store and the runtime: building and resource kinds, ledger rows,
//! construction orders with their queue rules, and engine configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod config;
pub mod kind;
pub mod ledger;
pub mod order;

pub use config::{CancelPolicies, CancelPolicy, EngineConfig, RetryConfig, StartingLayout};
pub use kind::{Bonus, BuildingKind, DurationCurve, KindProfile, OrderType, Production, ResourceKind, Storage};
pub use ledger::{validate_resource, Building, CostLine, Ledger, Resource, Shortfall, AMOUNT_SCALE};
pub use order::{
    check_partition, next_level, plan_enqueue, resync, ConstructionOrder, OrderDraft, OrderStatus,
};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Surrogate key of a settlement.
    SettlementId
);
id_type!(
    /// Surrogate key of a construction order.
    OrderId
);
id_type!(
    /// Player owning settlements. Authentication lives elsewhere.
    OwnerId
);

/// A settlement owning buildings, resources and construction orders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub owner_id: OwnerId,
    pub name: String,
    /// At most one capital per owner; it is the default production context.
    pub is_capital: bool,
    pub created_at: DateTime<Utc>,
}

/// Domain invariant violations.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Name that matches no known kind or status.
    #[error("unknown kind `{0}`")]
    UnknownKind(String),
    /// Amount below zero, or a debit larger than the balance.
    #[error("{0} amount would be negative")]
    NegativeAmount(ResourceKind),
    #[error("row version is negative")]
    NegativeVersion,
    /// Ledger without a row for this kind.
    #[error("missing {0} resource row")]
    MissingResource(ResourceKind),
    #[error("duplicate {0} resource row")]
    DuplicateResource(ResourceKind),
    /// Order status edge outside the lifecycle.
    #[error("illegal order transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("{0} orders in progress in one partition")]
    MultipleActive(usize),
    #[error("slot gap: expected {expected}, found {found}")]
    SlotGap { expected: u32, found: u32 },
    /// Non-terminal orders exist but none is in progress.
    #[error("queue has no active head")]
    MissingHead,
    /// Configuration that cannot be used.
    #[error("invalid config: {0}")]
    Config(String),
}

/// Validate a settlement before it is persisted.
pub fn validate_settlement(s: &Settlement) -> Result<(), ValidationError> {
    if s.name.trim().is_empty() {
        return Err(ValidationError::Config("settlement name is empty".into()));
    }
    Ok(())
}
