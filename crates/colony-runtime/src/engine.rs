//! Engine facade wiring the services over one pool, clock and scheduler.

use colony_core::{
    BuildingKind, ConstructionOrder, CostLine, EngineConfig, OrderId, OwnerId, Settlement,
    SettlementId,
};
use colony_econ::RateTable;
use persistence::schedules::{self, ScheduleFile, SeedReport};
use persistence::settlements;
use sqlx::SqlitePool;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::accrual::{AccrualService, ResourceView, SweepReport};
use crate::clock::Clock;
use crate::construction::{BuildingDetail, ConstructionService, SignalOutcome};
use crate::error::EngineError;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::scheduler::{CompletionScheduler, CompletionSignal, DelayedSignals};

/// State shared by every service.
pub(crate) struct Context {
    pub(crate) pool: SqlitePool,
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) scheduler: CompletionScheduler,
    rates: RwLock<Arc<RateTable>>,
}

impl Context {
    /// Snapshot of the production schedule.
    pub(crate) fn rates(&self) -> Arc<RateTable> {
        self.rates.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn replace_rates(&self, table: RateTable) {
        *self.rates.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(table);
    }
}

#[derive(Clone)]
pub struct Engine {
    ctx: Arc<Context>,
    accrual: AccrualService,
    construction: ConstructionService,
    reconciler: Reconciler,
}

impl Engine {
    pub async fn new(
        pool: SqlitePool,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        signals: Arc<dyn DelayedSignals>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let rates = {
            let mut conn = pool.acquire().await?;
            schedules::load_rate_table(&mut conn).await?
        };
        let ctx = Arc::new(Context {
            pool,
            config,
            scheduler: CompletionScheduler::new(signals, clock.clone()),
            clock,
            rates: RwLock::new(Arc::new(rates)),
        });
        let construction = ConstructionService::new(ctx.clone());
        Ok(Self {
            accrual: AccrualService::new(ctx.clone()),
            reconciler: Reconciler::new(ctx.clone(), construction.clone()),
            construction,
            ctx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Writes a cost and production schedule and swaps the cached rates.
    pub async fn load_schedules(&self, file: &ScheduleFile) -> Result<SeedReport, EngineError> {
        let (report, table) = {
            let mut tx = self.ctx.pool.begin().await?;
            let report = schedules::seed_schedules(&mut tx, file).await?;
            let table = schedules::load_rate_table(&mut tx).await?;
            tx.commit().await?;
            (report, table)
        };
        self.ctx.replace_rates(table);
        Ok(report)
    }

    /// Re-reads the production schedule from the store.
    pub async fn reload_schedules(&self) -> Result<usize, EngineError> {
        let table = {
            let mut conn = self.ctx.pool.acquire().await?;
            schedules::load_rate_table(&mut conn).await?
        };
        let n = table.len();
        self.ctx.replace_rates(table);
        debug!(rates = n, "production schedule reloaded");
        Ok(n)
    }

    pub async fn found_settlement(&self, owner: OwnerId, name: &str) -> Result<Settlement, EngineError> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.pool.begin().await?;
        let settlement =
            settlements::found_settlement(&mut tx, owner, name, &self.ctx.config.starting, now).await?;
        tx.commit().await?;
        info!(
            settlement_id = %settlement.id,
            owner_id = %owner,
            capital = settlement.is_capital,
            "settlement founded"
        );
        Ok(settlement)
    }

    pub async fn capital_of(&self, owner: OwnerId) -> Result<Settlement, EngineError> {
        let mut conn = self.ctx.pool.acquire().await?;
        settlements::capital_of(&mut conn, owner)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "capital",
                key: owner.to_string(),
            })
    }

    pub async fn request_upgrade(
        &self,
        settlement: SettlementId,
        kind: BuildingKind,
    ) -> Result<ConstructionOrder, EngineError> {
        self.construction.request_upgrade(settlement, kind).await
    }

    pub async fn cancel_order(
        &self,
        settlement: SettlementId,
        order: OrderId,
    ) -> Result<ConstructionOrder, EngineError> {
        self.construction.cancel(settlement, order).await
    }

    /// Completes a finished order on the player's request.
    pub async fn collect_order(
        &self,
        settlement: SettlementId,
        order: OrderId,
    ) -> Result<colony_core::Building, EngineError> {
        self.construction.collect(settlement, order).await
    }

    pub async fn complete_from_signal(&self, signal: CompletionSignal) -> Result<SignalOutcome, EngineError> {
        self.construction.complete_from_signal(signal).await
    }

    pub async fn get_resources(&self, settlement: SettlementId) -> Result<Vec<ResourceView>, EngineError> {
        self.accrual.get_resources(settlement).await
    }

    pub async fn grant_resources(
        &self,
        settlement: SettlementId,
        lines: &[CostLine],
    ) -> Result<Vec<ResourceView>, EngineError> {
        self.accrual.grant(settlement, lines).await
    }

    pub async fn spend_resources(
        &self,
        settlement: SettlementId,
        lines: &[CostLine],
    ) -> Result<Vec<ResourceView>, EngineError> {
        self.accrual.spend(settlement, lines).await
    }

    pub async fn list_queue(&self, settlement: SettlementId) -> Result<Vec<ConstructionOrder>, EngineError> {
        self.construction.list_queue(settlement).await
    }

    pub async fn describe_building(
        &self,
        settlement: SettlementId,
        kind: BuildingKind,
    ) -> Result<BuildingDetail, EngineError> {
        self.construction.describe_building(settlement, kind).await
    }

    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        self.accrual.sweep().await
    }

    /// Brings every order in line with the clock and re-arms signals.
    /// Run once before serving traffic.
    pub async fn reconcile_on_startup(&self) -> Result<ReconcileReport, EngineError> {
        self.reconciler.run().await
    }
}
