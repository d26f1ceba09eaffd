//! Resource ledger rows, building rows and their invariants.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::kind::{BuildingKind, ResourceKind};
use crate::{SettlementId, ValidationError};

/// Fractional digits kept on stored amounts.
pub const AMOUNT_SCALE: u32 = 4;

/// A building row. `level` only grows through completed orders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub settlement_id: SettlementId,
    pub kind: BuildingKind,
    pub level: u32,
    /// Bumped by the optimistic mutator on every persisted write.
    pub version: i64,
}

impl Building {
    /// Same row one level higher. The version is left for the mutator to bump.
    pub fn leveled_up(&self) -> Building {
        Building {
            level: self.level + 1,
            ..self.clone()
        }
    }
}

/// One resource balance of a settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub settlement_id: SettlementId,
    pub kind: ResourceKind,
    pub amount: Decimal,
    pub last_observed_at: DateTime<Utc>,
    pub version: i64,
}

impl Resource {
    /// Row observed at `at` holding `amount`. The observation time never moves
    /// backward, even if the caller's clock does.
    pub fn observed(&self, amount: Decimal, at: DateTime<Utc>) -> Resource {
        Resource {
            amount: amount.max(Decimal::ZERO).round_dp(AMOUNT_SCALE),
            last_observed_at: at.max(self.last_observed_at),
            ..self.clone()
        }
    }

    pub fn debited(&self, amount: Decimal) -> Result<Resource, ValidationError> {
        if amount > self.amount {
            return Err(ValidationError::NegativeAmount(self.kind));
        }
        Ok(Resource {
            amount: self.amount - amount,
            ..self.clone()
        })
    }

    pub fn credited(&self, amount: Decimal) -> Resource {
        Resource {
            amount: (self.amount + amount).round_dp(AMOUNT_SCALE),
            ..self.clone()
        }
    }
}

/// One line of an upgrade cost or a grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLine {
    pub resource: ResourceKind,
    pub amount: Decimal,
}

/// What is missing to cover a cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shortfall {
    pub resource: ResourceKind,
    pub required: Decimal,
    pub available: Decimal,
}

/// Validate a single resource row.
pub fn validate_resource(r: &Resource) -> Result<(), ValidationError> {
    if r.amount < Decimal::ZERO {
        return Err(ValidationError::NegativeAmount(r.kind));
    }
    if r.version < 0 {
        return Err(ValidationError::NegativeVersion);
    }
    Ok(())
}

/// The complete set of balances of one settlement, one row per kind.
#[derive(Clone, Debug, PartialEq)]
pub struct Ledger {
    rows: BTreeMap<ResourceKind, Resource>,
}

impl Ledger {
    /// Builds a ledger, requiring exactly one valid row per resource kind.
    pub fn from_rows(rows: Vec<Resource>) -> Result<Ledger, ValidationError> {
        let mut map = BTreeMap::new();
        for row in rows {
            validate_resource(&row)?;
            let kind = row.kind;
            if map.insert(kind, row).is_some() {
                return Err(ValidationError::DuplicateResource(kind));
            }
        }
        for kind in ResourceKind::ALL {
            if !map.contains_key(&kind) {
                return Err(ValidationError::MissingResource(kind));
            }
        }
        Ok(Ledger { rows: map })
    }

    pub fn get(&self, kind: ResourceKind) -> &Resource {
        // from_rows guarantees every kind is present
        &self.rows[&kind]
    }

    pub fn amount(&self, kind: ResourceKind) -> Decimal {
        self.get(kind).amount
    }

    /// Replaces the row of the same kind.
    pub fn set(&mut self, row: Resource) {
        self.rows.insert(row.kind, row);
    }

    /// First cost line the ledger cannot cover, summing repeated kinds.
    pub fn shortfall(&self, cost: &[CostLine]) -> Option<Shortfall> {
        let mut required: BTreeMap<ResourceKind, Decimal> = BTreeMap::new();
        for line in cost {
            *required.entry(line.resource).or_insert(Decimal::ZERO) += line.amount;
        }
        required.into_iter().find_map(|(resource, required)| {
            let available = self.amount(resource);
            (available < required).then_some(Shortfall {
                resource,
                required,
                available,
            })
        })
    }

    /// Rows in accrual order (energy first).
    pub fn rows(&self) -> impl Iterator<Item = &Resource> {
        ResourceKind::ALL.into_iter().map(move |k| self.get(k))
    }

    pub fn into_rows(self) -> Vec<Resource> {
        let mut rows = self.rows;
        ResourceKind::ALL
            .into_iter()
            .filter_map(|k| rows.remove(&k))
            .collect()
    }
}
