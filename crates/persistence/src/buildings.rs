//! Building rows. Levels change only through the optimistic mutator.

use colony_core::{Building, BuildingKind, SettlementId};
use sqlx::sqlite::SqliteConnection;
use sqlx::FromRow;

use crate::{corrupt, to_u32, StoreError};

#[derive(FromRow)]
struct BuildingRow {
    settlement_id: i64,
    kind: String,
    level: i64,
    version: i64,
}

impl TryFrom<BuildingRow> for Building {
    type Error = StoreError;

    fn try_from(r: BuildingRow) -> Result<Self, Self::Error> {
        Ok(Building {
            settlement_id: SettlementId(r.settlement_id),
            kind: r.kind.parse::<BuildingKind>().map_err(corrupt)?,
            level: to_u32(r.level, "building level")?,
            version: r.version,
        })
    }
}

pub async fn insert_building(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    kind: BuildingKind,
    level: u32,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO buildings (settlement_id, kind, level, version) VALUES (?, ?, ?, 0)")
        .bind(settlement.0)
        .bind(kind.as_str())
        .bind(level as i64)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn load_buildings(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
) -> Result<Vec<Building>, StoreError> {
    let rows: Vec<BuildingRow> = sqlx::query_as(
        "SELECT settlement_id, kind, level, version FROM buildings WHERE settlement_id = ? ORDER BY kind",
    )
    .bind(settlement.0)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(Building::try_from).collect()
}

pub async fn load_building(
    conn: &mut SqliteConnection,
    settlement: SettlementId,
    kind: BuildingKind,
) -> Result<Option<Building>, StoreError> {
    let row: Option<BuildingRow> = sqlx::query_as(
        "SELECT settlement_id, kind, level, version FROM buildings WHERE settlement_id = ? AND kind = ?",
    )
    .bind(settlement.0)
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(Building::try_from).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{init_memory_db, settlements};
    use chrono::{TimeZone, Utc};
    use colony_core::{OwnerId, StartingLayout};

    #[tokio::test]
    async fn founding_applies_the_starting_layout() {
        let pool = init_memory_db().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let s = settlements::found_settlement(&mut conn, OwnerId(1), "Alpha", &StartingLayout::default(), now)
            .await
            .unwrap();
        let mine = load_building(&mut conn, s.id, BuildingKind::GoldMine).await.unwrap().unwrap();
        assert_eq!(mine.level, 1);
        assert_eq!(mine.version, 0);
        let cc = load_building(&mut conn, s.id, BuildingKind::CommandCenter).await.unwrap().unwrap();
        assert_eq!(cc.level, 0);
        assert!(load_building(&mut conn, SettlementId(99), BuildingKind::GoldMine)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_kinds_are_reported_as_corrupt() {
        let pool = init_memory_db().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let s = settlements::found_settlement(&mut conn, OwnerId(1), "Alpha", &StartingLayout::default(), now)
            .await
            .unwrap();
        sqlx::query("UPDATE buildings SET kind = 'castle' WHERE settlement_id = ? AND kind = 'hangar'")
            .bind(s.id.0)
            .execute(&mut *conn)
            .await
            .unwrap();
        assert!(matches!(
            load_buildings(&mut conn, s.id).await,
            Err(StoreError::Corrupt(_))
        ));
    }
}
