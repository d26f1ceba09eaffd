//! Lazy accrual fold over a settlement ledger.
//!
//! Balances are advanced by the real time elapsed since each row was last
//! observed. Energy is folded first; its result decides whether the other
//! kinds produce during the interval.

use chrono::{DateTime, Utc};
use colony_core::{Ledger, Resource, ResourceKind, AMOUNT_SCALE};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::production::{capacity, energy_balance, output_per_hour, production_runs, Levels, RateTable};
use crate::EconError;

/// Result of folding one observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Accrual {
    pub ledger: Ledger,
    /// Whether gold, metal and fuel were stalled by the energy gate.
    pub gated: bool,
    pub net_energy_per_hour: f64,
}

fn elapsed_secs(row: &Resource, now: DateTime<Utc>) -> f64 {
    let ms = (now - row.last_observed_at).num_milliseconds().max(0);
    ms as f64 / 1_000.0
}

fn to_amount(x: f64) -> Result<Decimal, EconError> {
    Decimal::from_f64(x)
        .map(|d| d.round_dp(AMOUNT_SCALE))
        .ok_or(EconError::NonFinite)
}

/// Adds `delta` to `amount`, clamped to `[0, cap]`.
fn capped(amount: Decimal, delta: Decimal, cap: f64) -> Decimal {
    let cap = Decimal::from_f64(cap).unwrap_or(Decimal::MAX);
    (amount + delta).max(Decimal::ZERO).min(cap)
}

/// Folds production from each row's `last_observed_at` up to `now`.
pub fn accrue(
    ledger: &Ledger,
    levels: &Levels,
    rates: &RateTable,
    now: DateTime<Utc>,
) -> Result<Accrual, EconError> {
    let mut out = ledger.clone();
    let balance = energy_balance(levels, rates);
    let net = balance.net_per_hour();

    let energy = ledger.get(ResourceKind::Energy);
    let delta = to_amount(net * elapsed_secs(energy, now) / 3_600.0)?;
    let energy_after = capped(energy.amount, delta, capacity(ResourceKind::Energy, levels));
    out.set(energy.observed(energy_after, now));

    let runs = production_runs(net, energy_after.to_f64().unwrap_or(0.0));
    for kind in ResourceKind::ALL {
        if kind == ResourceKind::Energy {
            continue;
        }
        let row = ledger.get(kind);
        let produced = if runs {
            to_amount(output_per_hour(kind, levels, rates) * elapsed_secs(row, now) / 3_600.0)?
        } else {
            Decimal::ZERO
        };
        let next = capped(row.amount, produced, capacity(kind, levels));
        out.set(row.observed(next, now));
    }

    Ok(Accrual {
        ledger: out,
        gated: !runs,
        net_energy_per_hour: net,
    })
}
