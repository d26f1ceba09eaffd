//! Settlement rows, founding and the per-settlement write lock.

use chrono::{DateTime, Utc};
use colony_core::{
    validate_settlement, BuildingKind, OwnerId, ResourceKind, Settlement, SettlementId,
    StartingLayout,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteConnection;
use sqlx::FromRow;

use crate::{buildings, from_millis, resources, to_millis, StoreError};

#[derive(FromRow)]
struct SettlementRow {
    id: i64,
    owner_id: i64,
    name: String,
    is_capital: bool,
    created_at: i64,
}

impl TryFrom<SettlementRow> for Settlement {
    type Error = StoreError;

    fn try_from(r: SettlementRow) -> Result<Self, Self::Error> {
        Ok(Settlement {
            id: SettlementId(r.id),
            owner_id: OwnerId(r.owner_id),
            name: r.name,
            is_capital: r.is_capital,
            created_at: from_millis(r.created_at)?,
        })
    }
}

const SELECT: &str = "SELECT id, owner_id, name, is_capital, created_at FROM settlements";

/// Takes the settlement's write lock for the current transaction.
///
/// Must be the first statement of every write transaction on a settlement so
/// that concurrent writers serialize before reading any row.
pub async fn lock_settlement(conn: &mut SqliteConnection, id: SettlementId) -> Result<(), StoreError> {
    let done = sqlx::query("UPDATE settlements SET lock_epoch = lock_epoch + 1 WHERE id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    if done.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: "settlement",
            key: id.to_string(),
        });
    }
    Ok(())
}

pub async fn get_settlement(
    conn: &mut SqliteConnection,
    id: SettlementId,
) -> Result<Option<Settlement>, StoreError> {
    let row: Option<SettlementRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Settlement::try_from).transpose()
}

/// The owner's capital, if one was founded.
pub async fn capital_of(
    conn: &mut SqliteConnection,
    owner: OwnerId,
) -> Result<Option<Settlement>, StoreError> {
    let row: Option<SettlementRow> =
        sqlx::query_as(&format!("{SELECT} WHERE owner_id = ? AND is_capital = 1"))
            .bind(owner.0)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(Settlement::try_from).transpose()
}

pub async fn list_settlement_ids(conn: &mut SqliteConnection) -> Result<Vec<SettlementId>, StoreError> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM settlements ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids.into_iter().map(SettlementId).collect())
}

/// Creates a settlement with one building row per kind and one resource row
/// per kind. The owner's first settlement becomes the capital.
pub async fn found_settlement(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    name: &str,
    layout: &StartingLayout,
    now: DateTime<Utc>,
) -> Result<Settlement, StoreError> {
    let is_capital = capital_of(conn, owner).await?.is_none();
    let mut settlement = Settlement {
        id: SettlementId(0),
        owner_id: owner,
        name: name.trim().to_string(),
        is_capital,
        created_at: now,
    };
    validate_settlement(&settlement)?;

    let done = sqlx::query(
        "INSERT INTO settlements (owner_id, name, is_capital, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(owner.0)
    .bind(&settlement.name)
    .bind(is_capital)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    settlement.id = SettlementId(done.last_insert_rowid());

    for kind in BuildingKind::ALL {
        buildings::insert_building(conn, settlement.id, kind, layout.level_of(kind)).await?;
    }
    for kind in ResourceKind::ALL {
        let amount = Decimal::from(layout.amount_of(kind));
        resources::insert_resource(conn, settlement.id, kind, amount, now).await?;
    }
    tracing::info!(settlement_id = %settlement.id, owner_id = %owner, is_capital, "settlement founded");
    Ok(settlement)
}
