//! Build durations and upgrade cost fallbacks.

use chrono::Duration;
use colony_core::{BuildingKind, CostLine, DurationCurve};
use rust_decimal::Decimal;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Seconds to reach levels 1..=50 of economy buildings.
const TIERED_SECS: [i64; 50] = [
    120,
    2 * MINUTE,
    3 * MINUTE,
    4 * MINUTE,
    6 * MINUTE,
    10 * MINUTE,
    15 * MINUTE,
    20 * MINUTE,
    30 * MINUTE,
    45 * MINUTE,
    2 * HOUR,
    3 * HOUR,
    4 * HOUR,
    6 * HOUR,
    8 * HOUR,
    10 * HOUR,
    12 * HOUR,
    16 * HOUR,
    18 * HOUR,
    20 * HOUR,
    DAY,
    2 * DAY,
    3 * DAY,
    4 * DAY,
    6 * DAY,
    8 * DAY,
    10 * DAY,
    12 * DAY,
    15 * DAY,
    18 * DAY,
    20 * DAY,
    25 * DAY,
    30 * DAY,
    35 * DAY,
    40 * DAY,
    45 * DAY,
    50 * DAY,
    55 * DAY,
    60 * DAY,
    70 * DAY,
    80 * DAY,
    90 * DAY,
    100 * DAY,
    110 * DAY,
    120 * DAY,
    130 * DAY,
    140 * DAY,
    150 * DAY,
    160 * DAY,
    180 * DAY,
];

/// Time needed to take `kind` to `level`.
///
/// Levels past the tiered table reuse its last entry; level 0 takes no time.
pub fn build_duration(kind: BuildingKind, level: u32) -> Duration {
    if level == 0 {
        return Duration::zero();
    }
    let secs = match kind.profile().duration {
        DurationCurve::Tiered => {
            let idx = (level as usize - 1).min(TIERED_SECS.len() - 1);
            TIERED_SECS[idx]
        }
        DurationCurve::Geometric { base_secs, growth } => {
            (base_secs as f64 * growth.powi(level as i32 - 1)).floor() as i64
        }
    };
    Duration::seconds(secs)
}

/// Cost of reaching `level` when the cost schedule has no rows:
/// `floor(base * cost_growth^(level - 1))` per resource.
pub fn fallback_cost(kind: BuildingKind, level: u32) -> Vec<CostLine> {
    let profile = kind.profile();
    let factor = profile.cost_growth.powi(level.max(1) as i32 - 1);
    profile
        .base_cost
        .iter()
        .map(|&(resource, base)| CostLine {
            resource,
            amount: Decimal::from((base as f64 * factor).floor() as i64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_core::ResourceKind;

    #[test]
    fn tiered_durations_match_the_table() {
        let mine = BuildingKind::MetalMine;
        assert_eq!(build_duration(mine, 1), Duration::seconds(120));
        assert_eq!(build_duration(mine, 2), Duration::minutes(2));
        assert_eq!(build_duration(mine, 5), Duration::minutes(6));
        assert_eq!(build_duration(mine, 10), Duration::minutes(45));
        assert_eq!(build_duration(mine, 11), Duration::hours(2));
        assert_eq!(build_duration(mine, 21), Duration::days(1));
        assert_eq!(build_duration(mine, 50), Duration::days(180));
        assert_eq!(build_duration(mine, 0), Duration::zero());
    }

    #[test]
    fn facility_durations_grow_geometrically() {
        let cc = BuildingKind::CommandCenter;
        assert_eq!(build_duration(cc, 1), Duration::seconds(900));
        assert_eq!(build_duration(cc, 2), Duration::seconds(1170));
        assert_eq!(build_duration(cc, 3), Duration::seconds(1521));
    }

    #[test]
    fn fallback_cost_scales_each_line() {
        let cost = fallback_cost(BuildingKind::MetalMine, 3);
        assert_eq!(
            cost,
            vec![
                CostLine {
                    resource: ResourceKind::Metal,
                    amount: Decimal::from(135),
                },
                CostLine {
                    resource: ResourceKind::Gold,
                    amount: Decimal::from(33),
                },
            ]
        );
        assert_eq!(fallback_cost(BuildingKind::Hangar, 1)[0].amount, Decimal::from(1000));
    }
}
