//! Construction order state machine and queue resync.
//!
//! Orders of one settlement are split into partitions by [`OrderType`]. Within
//! a partition, non-terminal orders hold dense slots `1..=N`, the head is the
//! only `in_progress` order and every later order starts when its predecessor
//! finishes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::kind::{BuildingKind, OrderType};
use crate::{OrderId, SettlementId, ValidationError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Queued,
    InProgress,
    Cancelled,
    Completed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Queued => "queued",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Completed)
    }

    /// Legal edges: queued -> in_progress | cancelled,
    /// in_progress -> completed | cancelled.
    pub fn can_become(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Queued, InProgress) | (Queued, Cancelled) | (InProgress, Completed) | (InProgress, Cancelled)
        )
    }

    pub fn transition(self, next: OrderStatus) -> Result<OrderStatus, ValidationError> {
        if self.can_become(next) {
            Ok(next)
        } else {
            Err(ValidationError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(OrderStatus::Queued),
            "in_progress" => Ok(OrderStatus::InProgress),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "completed" => Ok(OrderStatus::Completed),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// A persisted construction order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionOrder {
    pub id: OrderId,
    pub settlement_id: SettlementId,
    pub target: BuildingKind,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub slot: u32,
    pub created_at: DateTime<Utc>,
}

impl ConstructionOrder {
    pub fn duration(&self) -> Duration {
        self.finish_time - self.start_time
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        now >= self.finish_time
    }

    /// Time left until `finish_time`, never negative.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.finish_time - now).max(Duration::zero())
    }

    /// Whole seconds left, rounded up so an unfinished order never reads 0.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.remaining(now).num_milliseconds() + 999) / 1_000
    }
}

/// An order about to be inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderDraft {
    pub settlement_id: SettlementId,
    pub target: BuildingKind,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub slot: u32,
}

/// Level an upgrade of `target` would reach given what is already queued.
pub fn next_level(current_level: u32, pending_same_target: u32) -> u32 {
    current_level + pending_same_target + 1
}

/// Plans a new order at the tail of its partition.
///
/// `tail` is the last non-terminal order of the same partition, if any.
pub fn plan_enqueue(
    settlement_id: SettlementId,
    target: BuildingKind,
    tail: Option<&ConstructionOrder>,
    duration: Duration,
    now: DateTime<Utc>,
) -> OrderDraft {
    let (status, start_time, slot) = match tail {
        Some(prev) => (OrderStatus::Queued, prev.finish_time, prev.slot + 1),
        None => (OrderStatus::InProgress, now, 1),
    };
    OrderDraft {
        settlement_id,
        target,
        order_type: target.partition(),
        status,
        start_time,
        finish_time: start_time + duration,
        slot,
    }
}

/// Recomputes slots, statuses and times of one partition.
///
/// `queue` holds the non-terminal orders of a single partition. The result
/// lists only the orders whose persisted fields changed.
pub fn resync(queue: &[ConstructionOrder], now: DateTime<Utc>) -> Vec<ConstructionOrder> {
    let mut ordered: Vec<&ConstructionOrder> =
        queue.iter().filter(|o| !o.status.is_terminal()).collect();
    ordered.sort_by_key(|o| (o.slot, o.id));

    let mut changed = Vec::new();
    let mut prev_finish: Option<DateTime<Utc>> = None;
    for (idx, order) in ordered.into_iter().enumerate() {
        let duration = order.duration().max(Duration::zero());
        let mut next = order.clone();
        next.slot = idx as u32 + 1;
        match prev_finish {
            None => {
                next.status = OrderStatus::InProgress;
                // a promoted head cannot start in the future
                if order.status == OrderStatus::Queued && next.start_time > now {
                    next.start_time = now;
                    next.finish_time = now + duration;
                }
            }
            Some(finish) => {
                next.status = OrderStatus::Queued;
                next.start_time = finish;
                next.finish_time = finish + duration;
            }
        }
        prev_finish = Some(next.finish_time);
        if &next != order {
            changed.push(next);
        }
    }
    changed
}

/// Checks the partition invariants over its non-terminal orders.
pub fn check_partition(queue: &[ConstructionOrder]) -> Result<(), ValidationError> {
    let mut live: Vec<&ConstructionOrder> =
        queue.iter().filter(|o| !o.status.is_terminal()).collect();
    live.sort_by_key(|o| o.slot);
    let active = live
        .iter()
        .filter(|o| o.status == OrderStatus::InProgress)
        .count();
    if active > 1 {
        return Err(ValidationError::MultipleActive(active));
    }
    for (idx, order) in live.iter().enumerate() {
        if order.slot != idx as u32 + 1 {
            return Err(ValidationError::SlotGap {
                expected: idx as u32 + 1,
                found: order.slot,
            });
        }
    }
    if let Some(head) = live.first() {
        if head.status != OrderStatus::InProgress {
            return Err(ValidationError::MissingHead);
        }
    }
    Ok(())
}
