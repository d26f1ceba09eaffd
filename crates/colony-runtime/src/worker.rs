//! Drains completion signals and runs the periodic accrual sweep, reloading
//! the production schedule before each sweep.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::construction::SignalOutcome;
use crate::engine::Engine;
use crate::scheduler::CompletionSignal;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub completed: usize,
    pub duplicates: usize,
    pub rearmed: usize,
    pub failed: usize,
    pub sweeps: usize,
}

pub struct CompletionWorker {
    engine: Engine,
    rx: mpsc::UnboundedReceiver<CompletionSignal>,
}

impl CompletionWorker {
    pub fn new(engine: Engine, rx: mpsc::UnboundedReceiver<CompletionSignal>) -> Self {
        Self { engine, rx }
    }

    async fn handle(&self, signal: CompletionSignal, stats: &mut WorkerStats) {
        match self.engine.complete_from_signal(signal).await {
            Ok(SignalOutcome::Completed(_)) => stats.completed += 1,
            Ok(SignalOutcome::Duplicate) => stats.duplicates += 1,
            Ok(SignalOutcome::Rearmed) => stats.rearmed += 1,
            Err(e) => {
                // the reconciler picks the order up on the next start
                error!(order_id = %signal.order_id, error = %e, "completion failed");
                stats.failed += 1;
            }
        }
    }

    /// Runs until `shutdown` resolves or every signal sender is gone.
    pub async fn run<S>(mut self, shutdown: S) -> WorkerStats
    where
        S: Future<Output = ()>,
    {
        let mut stats = WorkerStats::default();
        let period = Duration::from_secs(self.engine.config().sweep_interval_secs.max(1));
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                signal = self.rx.recv() => match signal {
                    Some(signal) => self.handle(signal, &mut stats).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    // picks up schedules seeded by another process
                    if let Err(e) = self.engine.reload_schedules().await {
                        error!(error = %e, "schedule reload failed");
                    }
                    if let Err(e) = self.engine.sweep().await {
                        error!(error = %e, "accrual sweep failed");
                    }
                    stats.sweeps += 1;
                }
            }
        }
        info!(
            completed = stats.completed,
            duplicates = stats.duplicates,
            rearmed = stats.rearmed,
            failed = stats.failed,
            "completion worker stopped"
        );
        stats
    }
}
