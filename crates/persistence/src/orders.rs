//! Construction order rows.
//!
//! Partitions are `(settlement_id, order_type)`; within one, non-terminal
//! orders are read in `(slot, id)` order.

use chrono::{DateTime, Utc};
use colony_core::{
    BuildingKind, ConstructionOrder, OrderDraft, OrderId, OrderStatus, OrderType, SettlementId,
};
use sqlx::sqlite::SqliteConnection;
use sqlx::FromRow;

use crate::{corrupt, from_millis, to_millis, to_u32, StoreError};

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    settlement_id: i64,
    target: String,
    order_type: String,
    status: String,
    start_time: i64,
    finish_time: i64,
    slot: i64,
    created_at: i64,
}

impl TryFrom<OrderRow> for ConstructionOrder {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(ConstructionOrder {
            id: OrderId(r.id),
            settlement_id: SettlementId(r.settlement_id),
            target: r.target.parse::<BuildingKind>().map_err(corrupt)?,
            order_type: r.order_type.parse::<OrderType>().map_err(corrupt)?,
            status: r.status.parse::<OrderStatus>().map_err(corrupt)?,
            start_time: from_millis(r.start_time)?,
            finish_time: from_millis(r.finish_time)?,
            slot: to_u32(r.slot, "order slot")?,
            created_at: from_millis(r.created_at)?,
        })
    }
}

const SELECT: &str = "SELECT id, settlement_id, target, order_type, status, start_time, \
     finish_time, slot, created_at FROM construction_orders";

const LIVE: &str = "status IN ('queued', 'in_progress')";

fn decode(rows: Vec<OrderRow>) -> Result<Vec<ConstructionOrder>, StoreError> {
    rows.into_iter().map(ConstructionOrder::try_from).collect()
}

pub async fn insert_order(
    conn: &mut SqliteConnection,
    draft: &OrderDraft,
    now: DateTime<Utc>,
) -> Result<ConstructionOrder, StoreError> {
    let done = sqlx::query(
        "INSERT INTO construction_orders \
         (settlement_id, target, order_type, status, start_time, finish_time, slot, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(draft.settlement_id.0)
    .bind(draft.target.as_str())
    .bind(draft.order_type.as_str())
    .bind(draft.status.as_str())
    .bind(to_millis(draft.start_time))
    .bind(to_millis(draft.finish_time))
    .bind(draft.slot as i64)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(ConstructionOrder {
        id: OrderId(done.last_insert_rowid()),
        settlement_id: draft.settlement_id,
        target: draft.target,
        order_type: draft.order_type,
        status: draft.status,
        start_time: draft.start_time,
        finish_time: draft.finish_time,
        slot: draft.slot,
        created_at: from_millis(to_millis(now))?,
    })
}

pub async fn get_order(
    conn: &mut SqliteConnection,
    id: OrderId,
) -> Result<Option<ConstructionOrder>, StoreError> {
    let row: Option<OrderRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(ConstructionOrder::try_from).transpose()
}

/// Non-terminal orders of one partition, in queue order.
pub async fn partition_queue(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    order_type: OrderType,
) -> Result<Vec<ConstructionOrder>, StoreError> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
        "{SELECT} WHERE settlement_id = ? AND order_type = ? AND {LIVE} ORDER BY slot, id"
    ))
    .bind(settlement.0)
    .bind(order_type.as_str())
    .fetch_all(&mut *conn)
    .await?;
    decode(rows)
}

/// Non-terminal orders of every partition of a settlement.
pub async fn settlement_queue(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
) -> Result<Vec<ConstructionOrder>, StoreError> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
        "{SELECT} WHERE settlement_id = ? AND {LIVE} ORDER BY order_type, slot, id"
    ))
    .bind(settlement.0)
    .fetch_all(&mut *conn)
    .await?;
    decode(rows)
}

/// Last non-terminal order of a partition.
pub async fn tail_of(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    order_type: OrderType,
) -> Result<Option<ConstructionOrder>, StoreError> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "{SELECT} WHERE settlement_id = ? AND order_type = ? AND {LIVE} \
         ORDER BY slot DESC, id DESC LIMIT 1"
    ))
    .bind(settlement.0)
    .bind(order_type.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(ConstructionOrder::try_from).transpose()
}

/// Non-terminal orders already targeting `target`.
pub async fn count_pending(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    target: BuildingKind,
) -> Result<u32, StoreError> {
    let n: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM construction_orders WHERE settlement_id = ? AND target = ? AND {LIVE}"
    ))
    .bind(settlement.0)
    .bind(target.as_str())
    .fetch_one(&mut *conn)
    .await?;
    to_u32(n, "pending count")
}

/// Every `in_progress` order, earliest finish first.
pub async fn in_progress_orders(
    conn: &mut SqliteConnection,
) -> Result<Vec<ConstructionOrder>, StoreError> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
        "{SELECT} WHERE status = 'in_progress' ORDER BY finish_time, id"
    ))
    .fetch_all(&mut *conn)
    .await?;
    decode(rows)
}

/// Partitions holding non-terminal orders but no `in_progress` head.
pub async fn headless_partitions(
    conn: &mut SqliteConnection,
) -> Result<Vec<(SettlementId, OrderType)>, StoreError> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT settlement_id, order_type FROM construction_orders \
         WHERE status IN ('queued', 'in_progress') \
         GROUP BY settlement_id, order_type \
         HAVING SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END) = 0 \
         ORDER BY settlement_id, order_type",
    )
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter()
        .map(|(sid, kind)| {
            let order_type = kind.parse::<OrderType>().map_err(corrupt)?;
            Ok::<_, StoreError>((SettlementId(sid), order_type))
        })
        .collect()
}

/// Moves an order from `from` to `to` only if it still holds `from`.
/// Returns whether the row changed.
pub async fn transition_status(
    conn: &mut SqliteConnection,
    id: OrderId,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<bool, StoreError> {
    from.transition(to)?;
    let done = sqlx::query("UPDATE construction_orders SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(id.0)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected() == 1)
}

/// Persists the schedule fields of an order: status, times and slot.
pub async fn update_schedule(
    conn: &mut SqliteConnection,
    order: &ConstructionOrder,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE construction_orders SET status = ?, start_time = ?, finish_time = ?, slot = ? \
         WHERE id = ?",
    )
    .bind(order.status.as_str())
    .bind(to_millis(order.start_time))
    .bind(to_millis(order.finish_time))
    .bind(order.slot as i64)
    .bind(order.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Writes the rows produced by a resync pass. Demotions go first so a
/// partition never holds two active orders, even between statements.
pub async fn apply_resync(
    conn: &mut SqliteConnection,
    changed: &[ConstructionOrder],
) -> Result<(), StoreError> {
    let (demoted, rest): (Vec<_>, Vec<_>) = changed
        .iter()
        .partition(|o| o.status == OrderStatus::Queued);
    for order in demoted.into_iter().chain(rest) {
        update_schedule(conn, order).await?;
    }
    Ok(())
}
