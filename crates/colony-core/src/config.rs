//! Engine configuration loaded from YAML, every field defaulted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::kind::{BuildingKind, OrderType, ResourceKind};
use crate::ValidationError;

/// Environment variable overriding [`EngineConfig::database_url`].
pub const DATABASE_URL_ENV: &str = "COLONY_DATABASE_URL";

/// What cancelling an `in_progress` order does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Refused with an invalid transition.
    Forbid,
    /// Finish time is pulled to now and the order completes.
    Accelerate,
}

/// One cancel policy per queue partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelPolicies {
    pub building: CancelPolicy,
    pub facility: CancelPolicy,
}

impl Default for CancelPolicies {
    fn default() -> Self {
        Self {
            building: CancelPolicy::Forbid,
            facility: CancelPolicy::Accelerate,
        }
    }
}

impl CancelPolicies {
    pub fn for_partition(&self, partition: OrderType) -> CancelPolicy {
        match partition {
            OrderType::Building => self.building,
            OrderType::Facility => self.facility,
        }
    }
}

/// Bounded retry of whole operations on concurrent modification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Base backoff; each attempt waits `backoff_ms * attempt` plus jitter.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 25,
        }
    }
}

/// Buildings and balances a freshly founded settlement starts with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartingLayout {
    pub buildings: Vec<(BuildingKind, u32)>,
    pub resources: Vec<(ResourceKind, u64)>,
}

impl Default for StartingLayout {
    fn default() -> Self {
        Self {
            buildings: vec![
                (BuildingKind::GoldMine, 1),
                (BuildingKind::MetalMine, 1),
                (BuildingKind::FuelExtractor, 1),
                (BuildingKind::PowerPlant, 1),
                (BuildingKind::Hangar, 1),
                (BuildingKind::Reservoir, 1),
            ],
            resources: vec![
                (ResourceKind::Gold, 500),
                (ResourceKind::Metal, 500),
                (ResourceKind::Fuel, 300),
                (ResourceKind::Energy, 0),
            ],
        }
    }
}

impl StartingLayout {
    /// Starting level of `kind`, 0 when not listed.
    pub fn level_of(&self, kind: BuildingKind) -> u32 {
        self.buildings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    pub fn amount_of(&self, kind: ResourceKind) -> u64 {
        self.resources
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, a)| *a)
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_url: String,
    pub retry: RetryConfig,
    /// Period of the background accrual sweep.
    pub sweep_interval_secs: u64,
    pub cancel: CancelPolicies,
    pub starting: StartingLayout,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://colony.db".to_string(),
            retry: RetryConfig::default(),
            sweep_interval_secs: 60,
            cancel: CancelPolicies::default(),
            starting: StartingLayout::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ValidationError> {
        let cfg: EngineConfig =
            serde_yaml::from_str(text).map_err(|e| ValidationError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads `path` if given, else defaults, then applies the environment
    /// override.
    pub fn load(path: Option<&Path>) -> Result<Self, ValidationError> {
        let mut cfg = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .map_err(|e| ValidationError::Config(format!("{}: {e}", p.display())))?;
                Self::from_yaml_str(&text)?
            }
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                cfg.database_url = url;
            }
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retry.max_attempts == 0 {
            return Err(ValidationError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::Config("sweep_interval_secs must be >= 1".into()));
        }
        for (kind, level) in &self.starting.buildings {
            if *level > kind.profile().max_level {
                return Err(ValidationError::Config(format!(
                    "starting level {level} of {kind} exceeds max"
                )));
            }
        }
        Ok(())
    }
}
