//! Construction order state machine over the store.
//!
//! Every operation runs in one transaction that starts by taking the
//! settlement lock, then touches resources, buildings and orders in that
//! order. Signals are armed only after commit.

use chrono::{DateTime, Utc};
use colony_core::{
    next_level, plan_enqueue, resync, Building, BuildingKind, CancelPolicy, ConstructionOrder,
    CostLine, OrderId, OrderStatus, OrderType, SettlementId,
};
use colony_econ::{build_duration, fallback_cost, rate_per_hour, RateTable};
use persistence::{buildings, orders, persist_versioned, schedules, settlements};
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info};

use crate::accrual::observe;
use crate::engine::Context;
use crate::error::{EngineError, Rejection};
use crate::retry::with_retry;
use crate::scheduler::CompletionSignal;

/// A completed order and the building it raised.
#[derive(Clone, Debug, PartialEq)]
pub struct Applied {
    pub order: ConstructionOrder,
    pub building: Building,
    /// Head of the partition after the completion, if any.
    pub head: Option<ConstructionOrder>,
}

/// What a delivered completion signal did.
#[derive(Clone, Debug, PartialEq)]
pub enum SignalOutcome {
    Completed(Applied),
    /// The order was already closed, or has not started yet.
    Duplicate,
    /// Fired before the finish time; armed again.
    Rearmed,
}

/// Upgrade outlook of one building.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BuildingDetail {
    pub kind: BuildingKind,
    pub level: u32,
    pub max_level: u32,
    pub rate_per_hour: f64,
    /// Level the next request would reach, `None` at max level.
    pub next_level: Option<u32>,
    pub next_rate_per_hour: Option<f64>,
    pub next_cost: Vec<CostLine>,
    pub next_duration_secs: Option<i64>,
    pub requires: Option<(BuildingKind, u32)>,
    pub prerequisite_met: bool,
    pub active: Option<ConstructionOrder>,
    pub remaining_secs: Option<i64>,
    pub queued: Vec<ConstructionOrder>,
}

fn head_of(queue: &[ConstructionOrder]) -> Option<ConstructionOrder> {
    queue
        .iter()
        .find(|o| o.status == OrderStatus::InProgress)
        .cloned()
}

/// Reloads a partition, resyncs it and writes what changed. Returns the
/// queue as stored, in slot order.
async fn resync_partition(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    partition: OrderType,
    now: DateTime<Utc>,
) -> Result<Vec<ConstructionOrder>, EngineError> {
    let mut queue = orders::partition_queue(conn, settlement, partition).await?;
    let changed = resync(&queue, now);
    orders::apply_resync(conn, &changed).await?;
    for next in changed {
        if let Some(slot) = queue.iter_mut().find(|o| o.id == next.id) {
            *slot = next;
        }
    }
    queue.sort_by_key(|o| o.slot);
    Ok(queue)
}

async fn scoped_order(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    id: OrderId,
) -> Result<ConstructionOrder, EngineError> {
    orders::get_order(conn, id)
        .await?
        .filter(|o| o.settlement_id == settlement)
        .ok_or_else(|| EngineError::order_not_found(id))
}

async fn cost_of(
    conn: &mut SqliteConnection,
    kind: BuildingKind,
    level: u32,
) -> Result<Vec<CostLine>, EngineError> {
    Ok(schedules::find_cost(conn, kind, level)
        .await?
        .unwrap_or_else(|| fallback_cost(kind, level)))
}

/// Applies a finished order: accrue at the old level, raise the building,
/// close the order, resync its partition.
async fn apply_completion(
    conn: &mut SqliteConnection,
    order: &ConstructionOrder,
    rates: &RateTable,
    now: DateTime<Utc>,
) -> Result<Applied, EngineError> {
    let sid = order.settlement_id;
    observe(conn, sid, rates, now).await?;
    let current = buildings::load_building(conn, sid, order.target)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            entity: "building",
            key: format!("{sid}/{}", order.target),
        })?;
    let building = persist_versioned(conn, &current, current.leveled_up()).await?;
    if !orders::transition_status(conn, order.id, OrderStatus::InProgress, OrderStatus::Completed).await? {
        return Err(EngineError::AlreadyProcessed(order.id));
    }
    let queue = resync_partition(conn, sid, order.order_type, now).await?;
    Ok(Applied {
        order: ConstructionOrder {
            status: OrderStatus::Completed,
            ..order.clone()
        },
        building,
        head: head_of(&queue),
    })
}

#[derive(Clone)]
pub struct ConstructionService {
    ctx: Arc<Context>,
}

impl ConstructionService {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn arm_after_commit(&self, closed: Option<OrderId>, head: Option<&ConstructionOrder>) {
        if let Some(id) = closed {
            self.ctx.scheduler.unschedule(id);
        }
        if let Some(head) = head {
            self.ctx.scheduler.schedule(head);
        }
    }

    /// Queues an upgrade of `kind` to the next level not yet queued.
    pub async fn request_upgrade(
        &self,
        settlement: SettlementId,
        kind: BuildingKind,
    ) -> Result<ConstructionOrder, EngineError> {
        with_retry(&self.ctx.config.retry, "request_upgrade", move || {
            self.try_enqueue(settlement, kind)
        })
        .await
    }

    async fn try_enqueue(
        &self,
        settlement: SettlementId,
        kind: BuildingKind,
    ) -> Result<ConstructionOrder, EngineError> {
        let now = self.ctx.clock.now();
        let rates = self.ctx.rates();
        let profile = kind.profile();
        let partition = kind.partition();

        let mut tx = self.ctx.pool.begin().await?;
        settlements::lock_settlement(&mut tx, settlement).await?;
        let obs = observe(&mut tx, settlement, &rates, now).await?;

        let pending = orders::count_pending(&mut tx, settlement, kind).await?;
        let level = next_level(obs.levels.level(kind), pending);
        if level > profile.max_level {
            return Err(Rejection::MaxLevel {
                kind,
                max_level: profile.max_level,
            }
            .into());
        }
        if let Some((requires, min)) = profile.requires {
            if obs.levels.level(requires) < min {
                return Err(Rejection::PrerequisiteUnmet {
                    kind,
                    requires,
                    level: min,
                }
                .into());
            }
        }

        let cost = cost_of(&mut tx, kind, level).await?;
        if let Some(short) = obs.ledger.shortfall(&cost) {
            return Err(EngineError::insufficient(short));
        }
        let mut debited = obs.ledger.clone();
        for line in &cost {
            let row = debited.get(line.resource).debited(line.amount)?;
            debited.set(row);
        }
        persistence::resources::persist_ledger(&mut tx, &obs.ledger, debited).await?;

        let tail = orders::tail_of(&mut tx, settlement, partition).await?;
        let draft = plan_enqueue(settlement, kind, tail.as_ref(), build_duration(kind, level), now);
        let inserted = orders::insert_order(&mut tx, &draft, now).await?;
        let queue = resync_partition(&mut tx, settlement, partition, now).await?;
        tx.commit().await?;

        let head = head_of(&queue);
        self.arm_after_commit(None, head.as_ref());
        let order = queue
            .into_iter()
            .find(|o| o.id == inserted.id)
            .unwrap_or(inserted);
        info!(
            order_id = %order.id,
            settlement_id = %settlement,
            target = %kind,
            level,
            slot = order.slot,
            status = %order.status,
            "upgrade queued"
        );
        Ok(order)
    }

    /// Completes an `in_progress` order whose finish time has passed.
    pub async fn complete(
        &self,
        settlement: SettlementId,
        order_id: OrderId,
    ) -> Result<Applied, EngineError> {
        with_retry(&self.ctx.config.retry, "complete_order", move || {
            self.try_complete(settlement, order_id)
        })
        .await
    }

    async fn try_complete(
        &self,
        settlement: SettlementId,
        order_id: OrderId,
    ) -> Result<Applied, EngineError> {
        let now = self.ctx.clock.now();
        let rates = self.ctx.rates();
        let mut tx = self.ctx.pool.begin().await?;
        settlements::lock_settlement(&mut tx, settlement).await?;
        let order = scoped_order(&mut tx, settlement, order_id).await?;
        match order.status {
            OrderStatus::InProgress if order.is_ready(now) => {}
            OrderStatus::InProgress | OrderStatus::Queued => {
                return Err(Rejection::NotYetFinished {
                    order_id: order.id,
                    remaining_secs: order.remaining_secs(now),
                }
                .into());
            }
            OrderStatus::Completed | OrderStatus::Cancelled => {
                return Err(EngineError::AlreadyProcessed(order.id));
            }
        }
        let applied = apply_completion(&mut tx, &order, &rates, now).await?;
        tx.commit().await?;

        self.arm_after_commit(Some(order.id), applied.head.as_ref());
        info!(
            order_id = %order.id,
            settlement_id = %settlement,
            target = %order.target,
            level = applied.building.level,
            "construction completed"
        );
        Ok(applied)
    }

    /// Handles a delivered completion signal. Duplicates and signals for
    /// queued orders are no-ops; an early signal is armed again.
    pub async fn complete_from_signal(
        &self,
        signal: CompletionSignal,
    ) -> Result<SignalOutcome, EngineError> {
        match self.complete(signal.settlement_id, signal.order_id).await {
            Ok(applied) => Ok(SignalOutcome::Completed(applied)),
            Err(EngineError::AlreadyProcessed(id)) => {
                debug!(order_id = %id, "duplicate completion signal");
                Ok(SignalOutcome::Duplicate)
            }
            Err(EngineError::InvalidTransition(Rejection::NotYetFinished { order_id, remaining_secs })) => {
                let order = {
                    let mut conn = self.ctx.pool.acquire().await?;
                    scoped_order(&mut conn, signal.settlement_id, order_id).await?
                };
                if order.status != OrderStatus::InProgress {
                    debug!(order_id = %order_id, status = %order.status, "signal for an order not yet started");
                    return Ok(SignalOutcome::Duplicate);
                }
                debug!(order_id = %order_id, remaining_secs, "early completion signal");
                self.ctx.scheduler.schedule(&order);
                Ok(SignalOutcome::Rearmed)
            }
            Err(e) => Err(e),
        }
    }

    /// Player-initiated completion. Collecting an order that is already
    /// completed returns the building as it stands.
    pub async fn collect(
        &self,
        settlement: SettlementId,
        order_id: OrderId,
    ) -> Result<Building, EngineError> {
        match self.complete(settlement, order_id).await {
            Ok(applied) => Ok(applied.building),
            Err(EngineError::AlreadyProcessed(_)) => {
                let mut conn = self.ctx.pool.acquire().await?;
                let order = scoped_order(&mut conn, settlement, order_id).await?;
                if order.status != OrderStatus::Completed {
                    return Err(Rejection::Terminal {
                        order_id,
                        status: order.status,
                    }
                    .into());
                }
                buildings::load_building(&mut conn, settlement, order.target)
                    .await?
                    .ok_or_else(|| EngineError::NotFound {
                        entity: "building",
                        key: format!("{settlement}/{}", order.target),
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Cancels a queued order, or handles an active one per the partition's
    /// cancel policy. Costs are not refunded.
    pub async fn cancel(
        &self,
        settlement: SettlementId,
        order_id: OrderId,
    ) -> Result<ConstructionOrder, EngineError> {
        with_retry(&self.ctx.config.retry, "cancel_order", move || {
            self.try_cancel(settlement, order_id)
        })
        .await
    }

    async fn try_cancel(
        &self,
        settlement: SettlementId,
        order_id: OrderId,
    ) -> Result<ConstructionOrder, EngineError> {
        let now = self.ctx.clock.now();
        let rates = self.ctx.rates();
        let mut tx = self.ctx.pool.begin().await?;
        settlements::lock_settlement(&mut tx, settlement).await?;
        let order = scoped_order(&mut tx, settlement, order_id).await?;

        let (closed, head) = match order.status {
            OrderStatus::Queued => {
                if !orders::transition_status(&mut tx, order.id, OrderStatus::Queued, OrderStatus::Cancelled)
                    .await?
                {
                    return Err(EngineError::ConcurrentModification {
                        entity: "order",
                        key: order.id.to_string(),
                    });
                }
                let queue = resync_partition(&mut tx, settlement, order.order_type, now).await?;
                let cancelled = ConstructionOrder {
                    status: OrderStatus::Cancelled,
                    ..order.clone()
                };
                (cancelled, head_of(&queue))
            }
            OrderStatus::InProgress => match self.ctx.config.cancel.for_partition(order.order_type) {
                CancelPolicy::Forbid => {
                    return Err(Rejection::CancelForbidden { order_id }.into());
                }
                CancelPolicy::Accelerate => {
                    let rushed = ConstructionOrder {
                        start_time: order.start_time.min(now),
                        finish_time: now,
                        ..order.clone()
                    };
                    orders::update_schedule(&mut tx, &rushed).await?;
                    let applied = apply_completion(&mut tx, &rushed, &rates, now).await?;
                    (applied.order, applied.head)
                }
            },
            status => {
                return Err(Rejection::Terminal { order_id, status }.into());
            }
        };
        tx.commit().await?;

        self.arm_after_commit(Some(order.id), head.as_ref());
        info!(
            order_id = %order.id,
            settlement_id = %settlement,
            from = %order.status,
            to = %closed.status,
            "order cancelled"
        );
        Ok(closed)
    }

    /// Resyncs one partition. Used to heal queues left without a head.
    pub(crate) async fn repair_partition(
        &self,
        settlement: SettlementId,
        partition: OrderType,
    ) -> Result<Option<ConstructionOrder>, EngineError> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.pool.begin().await?;
        settlements::lock_settlement(&mut tx, settlement).await?;
        let queue = resync_partition(&mut tx, settlement, partition, now).await?;
        tx.commit().await?;
        Ok(head_of(&queue))
    }

    /// Non-terminal orders of every partition.
    pub async fn list_queue(&self, settlement: SettlementId) -> Result<Vec<ConstructionOrder>, EngineError> {
        let mut conn = self.ctx.pool.acquire().await?;
        ensure_settlement(&mut conn, settlement).await?;
        Ok(orders::settlement_queue(&mut conn, settlement).await?)
    }

    pub async fn describe_building(
        &self,
        settlement: SettlementId,
        kind: BuildingKind,
    ) -> Result<BuildingDetail, EngineError> {
        let now = self.ctx.clock.now();
        let rates = self.ctx.rates();
        let mut conn = self.ctx.pool.acquire().await?;
        ensure_settlement(&mut conn, settlement).await?;
        let all = buildings::load_buildings(&mut conn, settlement).await?;
        let level_of = |k: BuildingKind| all.iter().find(|b| b.kind == k).map(|b| b.level).unwrap_or(0);
        let level = level_of(kind);
        let profile = kind.profile();

        let partition = orders::partition_queue(&mut conn, settlement, kind.partition()).await?;
        let mine: Vec<ConstructionOrder> = partition.into_iter().filter(|o| o.target == kind).collect();
        let next = next_level(level, mine.len() as u32);
        let next = (next <= profile.max_level).then_some(next);
        let next_cost = match next {
            Some(l) => cost_of(&mut conn, kind, l).await?,
            None => Vec::new(),
        };
        let active = mine.iter().find(|o| o.status == OrderStatus::InProgress).cloned();

        Ok(BuildingDetail {
            kind,
            level,
            max_level: profile.max_level,
            rate_per_hour: rate_per_hour(&rates, kind, level),
            next_level: next,
            next_rate_per_hour: next.map(|l| rate_per_hour(&rates, kind, l)),
            next_cost,
            next_duration_secs: next.map(|l| build_duration(kind, l).num_seconds()),
            requires: profile.requires,
            prerequisite_met: profile.requires.map_or(true, |(k, min)| level_of(k) >= min),
            remaining_secs: active.as_ref().map(|o| o.remaining_secs(now)),
            active,
            queued: mine
                .into_iter()
                .filter(|o| o.status == OrderStatus::Queued)
                .collect(),
        })
    }
}

async fn ensure_settlement(conn: &mut SqliteConnection, settlement: SettlementId) -> Result<(), EngineError> {
    match settlements::get_settlement(conn, settlement).await? {
        Some(_) => Ok(()),
        None => Err(EngineError::NotFound {
            entity: "settlement",
            key: settlement.to_string(),
        }),
    }
}
