//! Cost and production schedules: read-only lookups seeded by the operator.

use colony_core::{BuildingKind, CostLine, ResourceKind};
use colony_econ::RateTable;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeMap;

use crate::{corrupt, parse_amount, to_u32, StoreError};

/// Cost of one `(target, level)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub target: BuildingKind,
    pub level: u32,
    pub resources: BTreeMap<ResourceKind, u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub building: BuildingKind,
    pub level: u32,
    pub units_per_hour: f64,
}

/// Seed file layout, see `assets/schedules.yaml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleFile {
    pub costs: Vec<CostEntry>,
    pub rates: Vec<RateEntry>,
}

impl ScheduleFile {
    pub fn from_yaml_str(text: &str) -> Result<Self, StoreError> {
        serde_yaml::from_str(text).map_err(corrupt)
    }
}

/// Rows written by [`seed_schedules`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub cost_rows: usize,
    pub rate_rows: usize,
}

/// Upserts every row of `file`.
pub async fn seed_schedules(
    conn: &mut SqliteConnection,
    file: &ScheduleFile,
) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    for entry in &file.costs {
        for (resource, amount) in &entry.resources {
            sqlx::query(
                "INSERT OR REPLACE INTO upgrade_costs (target, level, resource, amount) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(entry.target.as_str())
            .bind(entry.level as i64)
            .bind(resource.as_str())
            .bind(amount.to_string())
            .execute(&mut *conn)
            .await?;
            report.cost_rows += 1;
        }
    }
    for entry in &file.rates {
        if !entry.units_per_hour.is_finite() || entry.units_per_hour < 0.0 {
            return Err(StoreError::Corrupt(format!(
                "rate of {} level {} is {}",
                entry.building, entry.level, entry.units_per_hour
            )));
        }
        sqlx::query(
            "INSERT OR REPLACE INTO production_rates (building, level, units_per_hour) VALUES (?, ?, ?)",
        )
        .bind(entry.building.as_str())
        .bind(entry.level as i64)
        .bind(entry.units_per_hour)
        .execute(&mut *conn)
        .await?;
        report.rate_rows += 1;
    }
    tracing::info!(cost_rows = report.cost_rows, rate_rows = report.rate_rows, "schedules seeded");
    Ok(report)
}

/// Scheduled cost of taking `target` to `level`, `None` when unscheduled.
pub async fn find_cost(
    conn: &mut SqliteConnection,
    target: BuildingKind,
    level: u32,
) -> Result<Option<Vec<CostLine>>, StoreError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT resource, amount FROM upgrade_costs WHERE target = ? AND level = ? ORDER BY resource",
    )
    .bind(target.as_str())
    .bind(level as i64)
    .fetch_all(&mut *conn)
    .await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let mut lines = Vec::with_capacity(rows.len());
    for (resource, amount) in rows {
        let amount: Decimal = parse_amount(&amount)?;
        lines.push(CostLine {
            resource: resource.parse::<ResourceKind>().map_err(corrupt)?,
            amount,
        });
    }
    Ok(Some(lines))
}

/// The whole production schedule, for accrual passes.
pub async fn load_rate_table(conn: &mut SqliteConnection) -> Result<RateTable, StoreError> {
    let rows: Vec<(String, i64, f64)> =
        sqlx::query_as("SELECT building, level, units_per_hour FROM production_rates")
            .fetch_all(&mut *conn)
            .await?;
    let mut table = RateTable::new();
    for (building, level, rate) in rows {
        let kind = building.parse::<BuildingKind>().map_err(corrupt)?;
        table.insert(kind, to_u32(level, "rate level")?, rate);
    }
    Ok(table)
}
