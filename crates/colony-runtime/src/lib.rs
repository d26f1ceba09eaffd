#![deny(warnings)]

//! Progression engine runtime: accrual, construction orders, completion
//! signals and startup reconciliation over the SQLite store.

mod accrual;
mod clock;
mod construction;
mod engine;
mod error;
mod reconciler;
mod retry;
mod scheduler;
mod worker;

pub use accrual::{AccrualService, ResourceView, SweepReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use construction::{Applied, BuildingDetail, ConstructionService, SignalOutcome};
pub use engine::Engine;
pub use error::{EngineError, Rejection};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retry::with_retry;
pub use scheduler::{
    signal_key, ArmedSignal, CompletionScheduler, CompletionSignal, DelayedSignals, ManualSignals,
    TokioTimers,
};
pub use worker::{CompletionWorker, WorkerStats};
