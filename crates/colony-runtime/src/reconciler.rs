//! Startup reconciliation.
//!
//! Signals live in memory and die with the process. On startup every
//! partition is repaired, expired orders are completed in queue order and
//! the rest get their signals armed again.

use colony_core::ConstructionOrder;
use persistence::orders;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::construction::ConstructionService;
use crate::engine::Context;
use crate::error::EngineError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Orders still running whose signal was armed again.
    pub synced: usize,
    /// Orders completed because their finish time had passed.
    pub expired: usize,
    /// Partitions that had no active head.
    pub repaired: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    ctx: Arc<Context>,
    construction: ConstructionService,
}

impl Reconciler {
    pub(crate) fn new(ctx: Arc<Context>, construction: ConstructionService) -> Self {
        Self { ctx, construction }
    }

    pub async fn run(&self) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::default();

        let headless = {
            let mut conn = self.ctx.pool.acquire().await?;
            orders::headless_partitions(&mut conn).await?
        };
        for (settlement, partition) in headless {
            match self.construction.repair_partition(settlement, partition).await {
                Ok(_) => {
                    warn!(settlement_id = %settlement, partition = %partition, "partition had no active order");
                    report.repaired += 1;
                }
                Err(e) => {
                    error!(settlement_id = %settlement, partition = %partition, error = %e, "repair failed");
                    report.failed += 1;
                }
            }
        }

        let active = {
            let mut conn = self.ctx.pool.acquire().await?;
            orders::in_progress_orders(&mut conn).await?
        };
        for order in active {
            if let Err(e) = self.settle(order.clone(), &mut report).await {
                error!(order_id = %order.id, settlement_id = %order.settlement_id, error = %e, "reconcile failed");
                report.failed += 1;
            }
        }

        info!(
            synced = report.synced,
            expired = report.expired,
            repaired = report.repaired,
            failed = report.failed,
            "startup reconcile"
        );
        Ok(report)
    }

    /// Completes `order` and every head after it that is also due, then
    /// leaves the first unfinished head armed.
    async fn settle(&self, order: ConstructionOrder, report: &mut ReconcileReport) -> Result<(), EngineError> {
        let mut next = Some(order);
        while let Some(order) = next.take() {
            if !order.is_ready(self.ctx.clock.now()) {
                self.ctx.scheduler.schedule(&order);
                report.synced += 1;
                break;
            }
            match self.construction.complete(order.settlement_id, order.id).await {
                Ok(applied) => {
                    report.expired += 1;
                    next = applied.head;
                }
                Err(EngineError::AlreadyProcessed(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
