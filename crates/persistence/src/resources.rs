//! Resource rows and the settlement ledger.

use chrono::{DateTime, Utc};
use colony_core::{Ledger, Resource, ResourceKind, SettlementId};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteConnection;
use sqlx::FromRow;

use crate::{corrupt, from_millis, parse_amount, persist_versioned, to_millis, StoreError};

#[derive(FromRow)]
struct ResourceRow {
    settlement_id: i64,
    kind: String,
    amount: String,
    last_observed_at: i64,
    version: i64,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = StoreError;

    fn try_from(r: ResourceRow) -> Result<Self, Self::Error> {
        Ok(Resource {
            settlement_id: SettlementId(r.settlement_id),
            kind: r.kind.parse::<ResourceKind>().map_err(corrupt)?,
            amount: parse_amount(&r.amount)?,
            last_observed_at: from_millis(r.last_observed_at)?,
            version: r.version,
        })
    }
}

pub async fn insert_resource(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    kind: ResourceKind,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO resources (settlement_id, kind, amount, last_observed_at, version) \
         VALUES (?, ?, ?, ?, 0)",
    )
    .bind(settlement.0)
    .bind(kind.as_str())
    .bind(amount.to_string())
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_resources(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
) -> Result<Vec<Resource>, StoreError> {
    let rows: Vec<ResourceRow> = sqlx::query_as(
        "SELECT settlement_id, kind, amount, last_observed_at, version \
         FROM resources WHERE settlement_id = ?",
    )
    .bind(settlement.0)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(Resource::try_from).collect()
}

/// Loads the full ledger. A settlement without its rows is not found; a
/// partial or invalid set is corrupt.
pub async fn load_ledger(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
) -> Result<Ledger, StoreError> {
    let rows = load_resources(conn, settlement).await?;
    if rows.is_empty() {
        return Err(StoreError::NotFound {
            entity: "settlement",
            key: settlement.to_string(),
        });
    }
    Ledger::from_rows(rows).map_err(corrupt)
}

/// Writes every row of `next` that differs from `current`, through the
/// optimistic mutator. Returns the ledger as stored.
pub async fn persist_ledger(
    conn: &mut SqliteConnection,
    current: &Ledger,
    next: Ledger,
) -> Result<Ledger, StoreError> {
    let mut stored = next.clone();
    for row in next.into_rows() {
        let before = current.get(row.kind);
        if *before == row {
            continue;
        }
        let written = persist_versioned(conn, before, row).await?;
        stored.set(written);
    }
    Ok(stored)
}
