//! Resource accrual service.
//!
//! Balances are brought up to date whenever they are read or spent, inside
//! the caller's transaction and after the settlement lock is held.

use chrono::{DateTime, Utc};
use colony_core::{CostLine, Ledger, ResourceKind, SettlementId, ValidationError};
use colony_econ::{accrue, capacity, output_per_hour, Levels, RateTable};
use persistence::{buildings, resources, settlements};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::engine::Context;
use crate::error::EngineError;
use crate::retry::with_retry;

/// One balance as shown to a player.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceView {
    pub kind: ResourceKind,
    pub amount: Decimal,
    pub capacity: Decimal,
    /// Net units per hour. For energy this is production minus draw.
    pub rate_per_hour: f64,
    /// Whether production is stalled by an empty energy store.
    pub gated: bool,
    pub last_observed_at: DateTime<Utc>,
}

/// A ledger folded up to `now` and persisted.
pub(crate) struct Observation {
    pub ledger: Ledger,
    pub levels: Levels,
    pub gated: bool,
    pub net_energy_per_hour: f64,
}

/// Folds and persists production for `settlement`. The settlement lock must
/// already be held on `conn`.
pub(crate) async fn observe(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    rates: &RateTable,
    now: DateTime<Utc>,
) -> Result<Observation, EngineError> {
    let before = resources::load_ledger(conn, settlement).await?;
    let levels: Levels = buildings::load_buildings(conn, settlement).await?.iter().collect();
    let folded = accrue(&before, &levels, rates, now)?;
    let ledger = resources::persist_ledger(conn, &before, folded.ledger).await?;
    if folded.gated {
        debug!(settlement_id = %settlement, net = folded.net_energy_per_hour, "production stalled by energy");
    }
    Ok(Observation {
        ledger,
        levels,
        gated: folded.gated,
        net_energy_per_hour: folded.net_energy_per_hour,
    })
}

fn capacity_of(kind: ResourceKind, levels: &Levels) -> Decimal {
    Decimal::from_f64(capacity(kind, levels)).unwrap_or(Decimal::MAX)
}

pub(crate) fn views(obs: &Observation, rates: &RateTable) -> Vec<ResourceView> {
    obs.ledger
        .rows()
        .map(|row| {
            let rate = match row.kind {
                ResourceKind::Energy => obs.net_energy_per_hour,
                _ if obs.gated => 0.0,
                kind => output_per_hour(kind, &obs.levels, rates),
            };
            ResourceView {
                kind: row.kind,
                amount: row.amount,
                capacity: capacity_of(row.kind, &obs.levels),
                rate_per_hour: rate,
                gated: obs.gated,
                last_observed_at: row.last_observed_at,
            }
        })
        .collect()
}

/// Outcome of a periodic sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

#[derive(Clone, Copy)]
enum Adjust {
    Grant,
    Spend,
}

#[derive(Clone)]
pub struct AccrualService {
    ctx: Arc<Context>,
}

impl AccrualService {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Current balances, accrued up to now.
    pub async fn get_resources(&self, settlement: SettlementId) -> Result<Vec<ResourceView>, EngineError> {
        with_retry(&self.ctx.config.retry, "get_resources", move || self.refresh(settlement)).await
    }

    async fn refresh(&self, settlement: SettlementId) -> Result<Vec<ResourceView>, EngineError> {
        let now = self.ctx.clock.now();
        let rates = self.ctx.rates();
        let mut tx = self.ctx.pool.begin().await?;
        settlements::lock_settlement(&mut tx, settlement).await?;
        let obs = observe(&mut tx, settlement, &rates, now).await?;
        tx.commit().await?;
        Ok(views(&obs, &rates))
    }

    /// Credits `lines` after accruing. Credits past the storage cap are lost.
    pub async fn grant(
        &self,
        settlement: SettlementId,
        lines: &[CostLine],
    ) -> Result<Vec<ResourceView>, EngineError> {
        with_retry(&self.ctx.config.retry, "grant_resources", move || {
            self.adjust(settlement, lines, Adjust::Grant)
        })
        .await
    }

    /// Debits `lines` after accruing; all or nothing.
    pub async fn spend(
        &self,
        settlement: SettlementId,
        lines: &[CostLine],
    ) -> Result<Vec<ResourceView>, EngineError> {
        with_retry(&self.ctx.config.retry, "spend_resources", move || {
            self.adjust(settlement, lines, Adjust::Spend)
        })
        .await
    }

    async fn adjust(
        &self,
        settlement: SettlementId,
        lines: &[CostLine],
        how: Adjust,
    ) -> Result<Vec<ResourceView>, EngineError> {
        if let Some(bad) = lines.iter().find(|l| l.amount < Decimal::ZERO) {
            return Err(ValidationError::NegativeAmount(bad.resource).into());
        }
        let now = self.ctx.clock.now();
        let rates = self.ctx.rates();
        let mut tx = self.ctx.pool.begin().await?;
        settlements::lock_settlement(&mut tx, settlement).await?;
        let mut obs = observe(&mut tx, settlement, &rates, now).await?;

        let mut next = obs.ledger.clone();
        match how {
            Adjust::Grant => {
                for line in lines {
                    let mut row = next.get(line.resource).credited(line.amount);
                    row.amount = row.amount.min(capacity_of(line.resource, &obs.levels));
                    next.set(row);
                }
            }
            Adjust::Spend => {
                if let Some(short) = obs.ledger.shortfall(lines) {
                    return Err(EngineError::insufficient(short));
                }
                for line in lines {
                    let row = next.get(line.resource).debited(line.amount)?;
                    next.set(row);
                }
            }
        }
        obs.ledger = resources::persist_ledger(&mut tx, &obs.ledger, next).await?;
        tx.commit().await?;
        Ok(views(&obs, &rates))
    }

    /// Refreshes every settlement's balances. Never completes orders.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let ids = {
            let mut conn = self.ctx.pool.acquire().await?;
            settlements::list_settlement_ids(&mut conn).await?
        };
        let mut report = SweepReport::default();
        for id in ids {
            match self.get_resources(id).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    error!(settlement_id = %id, error = %e, "accrual sweep failed");
                    report.failed += 1;
                }
            }
        }
        info!(refreshed = report.refreshed, failed = report.failed, "accrual sweep");
        Ok(report)
    }
}
