#![deny(warnings)]

//! Production model for the colony engine.
//!
//! Everything here is pure:
//! - Production rates from the schedule with closed-form fallbacks
//! - Storage capacity and facility bonuses
//! - Energy balance and the production gate
//! - Build durations and upgrade cost fallbacks
//! - The accrual fold that advances a ledger to a point in time

use thiserror::Error;

pub mod accrual;
pub mod production;
pub mod schedule;

pub use accrual::{accrue, Accrual};
pub use production::{
    capacity, energy_balance, fallback_rate_per_hour, output_per_hour, production_multiplier,
    production_runs, rate_per_hour, storage_multiplier, EnergyBalance, Levels, RateTable,
};
pub use schedule::{build_duration, fallback_cost};

/// Errors produced by the production model.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// A computed amount could not be represented as a decimal.
    #[error("non-finite numeric conversion")]
    NonFinite,
}
