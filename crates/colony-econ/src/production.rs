//! Production rates, storage capacity and the energy balance.

use colony_core::{Bonus, Building, BuildingKind, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Production schedule rows keyed by `(building, level)`, units per hour.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    rows: HashMap<(BuildingKind, u32), f64>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: BuildingKind, level: u32, units_per_hour: f64) {
        self.rows.insert((kind, level), units_per_hour);
    }

    pub fn find_rate(&self, kind: BuildingKind, level: u32) -> Option<f64> {
        self.rows.get(&(kind, level)).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FromIterator<(BuildingKind, u32, f64)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (BuildingKind, u32, f64)>>(iter: I) -> Self {
        let mut t = RateTable::new();
        for (kind, level, rate) in iter {
            t.insert(kind, level, rate);
        }
        t
    }
}

/// Current level of every building of a settlement; absent kinds are level 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Levels(BTreeMap<BuildingKind, u32>);

impl Levels {
    pub fn level(&self, kind: BuildingKind) -> u32 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn set(&mut self, kind: BuildingKind, level: u32) {
        self.0.insert(kind, level);
    }
}

impl<'a> FromIterator<&'a Building> for Levels {
    fn from_iter<I: IntoIterator<Item = &'a Building>>(iter: I) -> Self {
        Levels(iter.into_iter().map(|b| (b.kind, b.level)).collect())
    }
}

impl FromIterator<(BuildingKind, u32)> for Levels {
    fn from_iter<I: IntoIterator<Item = (BuildingKind, u32)>>(iter: I) -> Self {
        Levels(iter.into_iter().collect())
    }
}

/// Closed-form rate: `base * growth^(level - 1)`, zero at level 0 and for
/// kinds that produce nothing.
pub fn fallback_rate_per_hour(kind: BuildingKind, level: u32) -> f64 {
    match kind.profile().produces {
        Some(p) if level > 0 => p.base_per_hour * p.growth.powi(level as i32 - 1),
        _ => 0.0,
    }
}

/// Rate from the schedule, else the closed form.
pub fn rate_per_hour(rates: &RateTable, kind: BuildingKind, level: u32) -> f64 {
    if level == 0 {
        return 0.0;
    }
    rates
        .find_rate(kind, level)
        .unwrap_or_else(|| fallback_rate_per_hour(kind, level))
}

fn bonus_sum(levels: &Levels, pick: fn(Bonus) -> Option<f64>) -> f64 {
    BuildingKind::ALL
        .into_iter()
        .filter_map(|k| k.profile().bonus.and_then(pick).map(|b| b * levels.level(k) as f64))
        .sum()
}

/// Production multiplier from facility bonuses. Energy is never boosted.
pub fn production_multiplier(resource: ResourceKind, levels: &Levels) -> f64 {
    if resource == ResourceKind::Energy {
        return 1.0;
    }
    1.0 + bonus_sum(levels, |b| match b {
        Bonus::Production(p) => Some(p),
        Bonus::Storage(_) => None,
    })
}

pub fn storage_multiplier(levels: &Levels) -> f64 {
    1.0 + bonus_sum(levels, |b| match b {
        Bonus::Storage(s) => Some(s),
        Bonus::Production(_) => None,
    })
}

/// Effective hourly output of `resource`, bonuses included. Energy output is
/// the gross plant production; see [`energy_balance`] for the net.
pub fn output_per_hour(resource: ResourceKind, levels: &Levels, rates: &RateTable) -> f64 {
    let producer = BuildingKind::producer_of(resource);
    rate_per_hour(rates, producer, levels.level(producer)) * production_multiplier(resource, levels)
}

/// Storage cap of `resource`: `base * growth^max(level, floor)` of the
/// building storing it, times the storage bonus.
pub fn capacity(resource: ResourceKind, levels: &Levels) -> f64 {
    let store = BuildingKind::ALL.into_iter().find_map(|k| {
        k.profile()
            .storage
            .filter(|s| s.resources.contains(&resource))
            .map(|s| (k, s))
    });
    match store {
        Some((kind, s)) => {
            let level = levels.level(kind).max(s.floor_level);
            (s.base * s.growth.powi(level as i32) * storage_multiplier(levels)).floor()
        }
        None => f64::INFINITY,
    }
}

/// Hourly energy production and draw of a settlement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EnergyBalance {
    pub produced_per_hour: f64,
    pub consumed_per_hour: f64,
}

impl EnergyBalance {
    pub fn net_per_hour(&self) -> f64 {
        self.produced_per_hour - self.consumed_per_hour
    }
}

pub fn energy_balance(levels: &Levels, rates: &RateTable) -> EnergyBalance {
    let consumed_per_hour = BuildingKind::ALL
        .into_iter()
        .map(|k| k.profile().energy_draw_per_level * levels.level(k) as f64)
        .sum();
    EnergyBalance {
        produced_per_hour: output_per_hour(ResourceKind::Energy, levels, rates),
        consumed_per_hour,
    }
}

/// Energy gate: other kinds produce while the balance is non-negative or any
/// energy remains stored after the interval.
pub fn production_runs(net_per_hour: f64, energy_after: f64) -> bool {
    net_per_hour >= 0.0 || energy_after > 0.0
}
