#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use colony_core::{
    BuildingKind, CostLine, EngineConfig, OwnerId, ResourceKind, SettlementId,
};
use colony_runtime::{Clock, Engine, ManualClock, ManualSignals, ResourceView, SignalOutcome};
use persistence::{init_db, init_memory_db};
use persistence::schedules::{CostEntry, ScheduleFile};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn dec(n: i64) -> Decimal {
    Decimal::from(n)
}

pub fn line(resource: ResourceKind, amount: i64) -> CostLine {
    CostLine {
        resource,
        amount: dec(amount),
    }
}

pub fn cost(target: BuildingKind, level: u32, resources: &[(ResourceKind, u64)]) -> CostEntry {
    CostEntry {
        target,
        level,
        resources: resources.iter().copied().collect(),
    }
}

pub fn amount_of(views: &[ResourceView], kind: ResourceKind) -> Decimal {
    views.iter().find(|v| v.kind == kind).unwrap().amount
}

/// An engine over an in-memory store with a hand-driven clock and signals.
pub struct Harness {
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub signals: Arc<ManualSignals>,
    pub engine: Engine,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        Self::over(init_memory_db().await.unwrap(), config).await
    }

    /// An engine over a WAL database file with a multi-connection pool.
    pub async fn on_file(path: &Path) -> Self {
        let url = format!("sqlite://{}", path.display());
        Self::over(init_db(&url).await.unwrap(), EngineConfig::default()).await
    }

    async fn over(pool: SqlitePool, config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let signals = Arc::new(ManualSignals::new(clock.clone()));
        let engine = Engine::new(pool.clone(), config, clock.clone(), signals.clone())
            .await
            .unwrap();
        Self {
            pool,
            clock,
            signals,
            engine,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    /// Drops every armed signal and builds a fresh engine over the same
    /// store, as a process restart would.
    pub async fn restart(&mut self) {
        self.signals.clear();
        self.engine = Engine::new(
            self.pool.clone(),
            self.engine.config().clone(),
            self.clock.clone(),
            self.signals.clone(),
        )
        .await
        .unwrap();
    }

    pub async fn found(&self, owner: i64, name: &str) -> SettlementId {
        self.engine.found_settlement(OwnerId(owner), name).await.unwrap().id
    }

    pub async fn seed_costs(&self, costs: Vec<CostEntry>) {
        let file = ScheduleFile {
            costs,
            rates: Vec::new(),
        };
        self.engine.load_schedules(&file).await.unwrap();
    }

    /// Sets a balance directly and marks it observed now.
    pub async fn set_amount(&self, sid: SettlementId, kind: ResourceKind, amount: i64) {
        sqlx::query(
            "UPDATE resources SET amount = ?, last_observed_at = ?, version = version + 1 \
             WHERE settlement_id = ? AND kind = ?",
        )
        .bind(amount.to_string())
        .bind(self.now().timestamp_millis())
        .bind(sid.0)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn set_level(&self, sid: SettlementId, kind: BuildingKind, level: u32) {
        sqlx::query(
            "UPDATE buildings SET level = ?, version = version + 1 WHERE settlement_id = ? AND kind = ?",
        )
        .bind(level as i64)
        .bind(sid.0)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn level(&self, sid: SettlementId, kind: BuildingKind) -> u32 {
        self.engine.describe_building(sid, kind).await.unwrap().level
    }

    pub async fn amount(&self, sid: SettlementId, kind: ResourceKind) -> Decimal {
        amount_of(&self.engine.get_resources(sid).await.unwrap(), kind)
    }

    /// Delivers due signals until none are left.
    pub async fn drain(&self) -> Vec<SignalOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let due = self.signals.fire_due(self.now());
            if due.is_empty() {
                return outcomes;
            }
            for signal in due {
                outcomes.push(self.engine.complete_from_signal(signal).await.unwrap());
            }
        }
    }
}
