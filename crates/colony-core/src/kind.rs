//! Closed enumerations of resource and building kinds.
//!
//! Every [`BuildingKind`] resolves to a static [`KindProfile`] that carries its
//! queue partition, production, storage, duration and cost strategy. Callers
//! look the profile up once and never dispatch on building names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Stockpiled resource kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Gold,
    Metal,
    Fuel,
    Energy,
}

impl ResourceKind {
    /// All kinds, energy first: an accrual pass resolves energy before the
    /// kinds it gates.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Energy,
        ResourceKind::Metal,
        ResourceKind::Gold,
        ResourceKind::Fuel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Gold => "gold",
            ResourceKind::Metal => "metal",
            ResourceKind::Fuel => "fuel",
            ResourceKind::Energy => "energy",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}

/// Independent order queues within a settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Building,
    Facility,
}

impl OrderType {
    pub const ALL: [OrderType; 2] = [OrderType::Building, OrderType::Facility];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Building => "building",
            OrderType::Facility => "facility",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderType::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}

/// Resource output of an extraction building or the power plant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Production {
    pub resource: ResourceKind,
    /// Units per hour at level 1.
    pub base_per_hour: f64,
    /// Multiplier applied per level above 1.
    pub growth: f64,
}

/// Percentage bonuses granted per facility level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Bonus {
    /// Added to the production multiplier of gold, metal and fuel.
    Production(f64),
    /// Added to the storage capacity multiplier of every resource.
    Storage(f64),
}

/// Storage provided by a building for one or more resources.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Storage {
    pub resources: &'static [ResourceKind],
    /// Capacity at level 0.
    pub base: f64,
    pub growth: f64,
    /// Level used in place of anything lower.
    pub floor_level: u32,
}

/// How long reaching a level takes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DurationCurve {
    /// Hand-tuned table for economy buildings, see `colony-econ`.
    Tiered,
    /// `base_secs * growth^(level - 1)`.
    Geometric { base_secs: u32, growth: f64 },
}

/// Static balancing strategy of one building kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KindProfile {
    pub partition: OrderType,
    pub max_level: u32,
    pub produces: Option<Production>,
    /// Energy drawn per hour for each level of this building.
    pub energy_draw_per_level: f64,
    pub storage: Option<Storage>,
    pub bonus: Option<Bonus>,
    pub duration: DurationCurve,
    /// Cost of reaching level 1, scaled by `cost_growth^(level - 1)`.
    pub base_cost: &'static [(ResourceKind, u32)],
    pub cost_growth: f64,
    /// Building and minimum level required before upgrading.
    pub requires: Option<(BuildingKind, u32)>,
}

/// Every building and facility a settlement can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    GoldMine,
    MetalMine,
    FuelExtractor,
    PowerPlant,
    Hangar,
    Reservoir,
    CommandCenter,
    TrainingCenter,
    ResearchLab,
    TradingPost,
    ResourceCenter,
    Warehouse,
}

const EXTRACTION_DRAW: f64 = 10.0;

static GOLD_MINE: KindProfile = KindProfile {
    partition: OrderType::Building,
    max_level: 50,
    produces: Some(Production {
        resource: ResourceKind::Gold,
        base_per_hour: 100.0,
        growth: 1.15,
    }),
    energy_draw_per_level: EXTRACTION_DRAW,
    storage: None,
    bonus: None,
    duration: DurationCurve::Tiered,
    base_cost: &[(ResourceKind::Metal, 48), (ResourceKind::Gold, 24)],
    cost_growth: 1.5,
    requires: None,
};

static METAL_MINE: KindProfile = KindProfile {
    partition: OrderType::Building,
    max_level: 50,
    produces: Some(Production {
        resource: ResourceKind::Metal,
        base_per_hour: 200.0,
        growth: 1.15,
    }),
    energy_draw_per_level: EXTRACTION_DRAW,
    storage: None,
    bonus: None,
    duration: DurationCurve::Tiered,
    base_cost: &[(ResourceKind::Metal, 60), (ResourceKind::Gold, 15)],
    cost_growth: 1.5,
    requires: None,
};

static FUEL_EXTRACTOR: KindProfile = KindProfile {
    partition: OrderType::Building,
    max_level: 50,
    produces: Some(Production {
        resource: ResourceKind::Fuel,
        base_per_hour: 50.0,
        growth: 1.15,
    }),
    energy_draw_per_level: EXTRACTION_DRAW,
    storage: None,
    bonus: None,
    duration: DurationCurve::Tiered,
    base_cost: &[(ResourceKind::Metal, 225), (ResourceKind::Gold, 75)],
    cost_growth: 1.5,
    requires: None,
};

static POWER_PLANT: KindProfile = KindProfile {
    partition: OrderType::Building,
    max_level: 50,
    produces: Some(Production {
        resource: ResourceKind::Energy,
        base_per_hour: 60.0,
        growth: 1.10,
    }),
    energy_draw_per_level: 0.0,
    storage: Some(Storage {
        resources: &[ResourceKind::Energy],
        base: 1_000.0,
        growth: 1.5,
        floor_level: 1,
    }),
    bonus: None,
    duration: DurationCurve::Tiered,
    base_cost: &[(ResourceKind::Metal, 75), (ResourceKind::Gold, 30)],
    cost_growth: 1.5,
    requires: None,
};

static HANGAR: KindProfile = KindProfile {
    partition: OrderType::Building,
    max_level: 50,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: Some(Storage {
        resources: &[ResourceKind::Gold, ResourceKind::Metal],
        base: 10_000.0,
        growth: 1.5,
        floor_level: 0,
    }),
    bonus: None,
    duration: DurationCurve::Tiered,
    base_cost: &[(ResourceKind::Metal, 1_000)],
    cost_growth: 2.0,
    requires: None,
};

static RESERVOIR: KindProfile = KindProfile {
    partition: OrderType::Building,
    max_level: 50,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: Some(Storage {
        resources: &[ResourceKind::Fuel],
        base: 5_000.0,
        growth: 1.5,
        floor_level: 0,
    }),
    bonus: None,
    duration: DurationCurve::Tiered,
    base_cost: &[(ResourceKind::Metal, 1_000), (ResourceKind::Gold, 500)],
    cost_growth: 2.0,
    requires: None,
};

static COMMAND_CENTER: KindProfile = KindProfile {
    partition: OrderType::Facility,
    max_level: 10,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: None,
    bonus: Some(Bonus::Production(0.02)),
    duration: DurationCurve::Geometric {
        base_secs: 900,
        growth: 1.3,
    },
    base_cost: &[
        (ResourceKind::Gold, 2_000),
        (ResourceKind::Metal, 1_500),
        (ResourceKind::Fuel, 1_000),
    ],
    cost_growth: 2.0,
    requires: None,
};

static TRAINING_CENTER: KindProfile = KindProfile {
    partition: OrderType::Facility,
    max_level: 15,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: None,
    bonus: None,
    duration: DurationCurve::Geometric {
        base_secs: 300,
        growth: 1.3,
    },
    base_cost: &[
        (ResourceKind::Gold, 500),
        (ResourceKind::Metal, 300),
        (ResourceKind::Fuel, 100),
    ],
    cost_growth: 1.5,
    requires: Some((BuildingKind::CommandCenter, 1)),
};

static RESEARCH_LAB: KindProfile = KindProfile {
    partition: OrderType::Facility,
    max_level: 15,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: None,
    bonus: None,
    duration: DurationCurve::Geometric {
        base_secs: 480,
        growth: 1.3,
    },
    base_cost: &[
        (ResourceKind::Gold, 1_000),
        (ResourceKind::Metal, 800),
        (ResourceKind::Fuel, 400),
    ],
    cost_growth: 1.6,
    requires: Some((BuildingKind::CommandCenter, 3)),
};

static TRADING_POST: KindProfile = KindProfile {
    partition: OrderType::Facility,
    max_level: 10,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: None,
    bonus: None,
    duration: DurationCurve::Geometric {
        base_secs: 540,
        growth: 1.3,
    },
    base_cost: &[
        (ResourceKind::Gold, 1_500),
        (ResourceKind::Metal, 800),
        (ResourceKind::Fuel, 500),
    ],
    cost_growth: 1.5,
    requires: Some((BuildingKind::CommandCenter, 6)),
};

static RESOURCE_CENTER: KindProfile = KindProfile {
    partition: OrderType::Facility,
    max_level: 10,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: None,
    bonus: Some(Bonus::Production(0.05)),
    duration: DurationCurve::Geometric {
        base_secs: 600,
        growth: 1.3,
    },
    base_cost: &[
        (ResourceKind::Gold, 1_200),
        (ResourceKind::Metal, 1_000),
        (ResourceKind::Fuel, 300),
    ],
    cost_growth: 1.5,
    requires: Some((BuildingKind::CommandCenter, 2)),
};

static WAREHOUSE: KindProfile = KindProfile {
    partition: OrderType::Facility,
    max_level: 10,
    produces: None,
    energy_draw_per_level: 0.0,
    storage: None,
    bonus: Some(Bonus::Storage(0.10)),
    duration: DurationCurve::Geometric {
        base_secs: 480,
        growth: 1.3,
    },
    base_cost: &[(ResourceKind::Gold, 800), (ResourceKind::Metal, 1_200)],
    cost_growth: 1.5,
    requires: Some((BuildingKind::CommandCenter, 1)),
};

impl BuildingKind {
    pub const ALL: [BuildingKind; 12] = [
        BuildingKind::GoldMine,
        BuildingKind::MetalMine,
        BuildingKind::FuelExtractor,
        BuildingKind::PowerPlant,
        BuildingKind::Hangar,
        BuildingKind::Reservoir,
        BuildingKind::CommandCenter,
        BuildingKind::TrainingCenter,
        BuildingKind::ResearchLab,
        BuildingKind::TradingPost,
        BuildingKind::ResourceCenter,
        BuildingKind::Warehouse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildingKind::GoldMine => "gold_mine",
            BuildingKind::MetalMine => "metal_mine",
            BuildingKind::FuelExtractor => "fuel_extractor",
            BuildingKind::PowerPlant => "power_plant",
            BuildingKind::Hangar => "hangar",
            BuildingKind::Reservoir => "reservoir",
            BuildingKind::CommandCenter => "command_center",
            BuildingKind::TrainingCenter => "training_center",
            BuildingKind::ResearchLab => "research_lab",
            BuildingKind::TradingPost => "trading_post",
            BuildingKind::ResourceCenter => "resource_center",
            BuildingKind::Warehouse => "warehouse",
        }
    }

    pub fn profile(self) -> &'static KindProfile {
        match self {
            BuildingKind::GoldMine => &GOLD_MINE,
            BuildingKind::MetalMine => &METAL_MINE,
            BuildingKind::FuelExtractor => &FUEL_EXTRACTOR,
            BuildingKind::PowerPlant => &POWER_PLANT,
            BuildingKind::Hangar => &HANGAR,
            BuildingKind::Reservoir => &RESERVOIR,
            BuildingKind::CommandCenter => &COMMAND_CENTER,
            BuildingKind::TrainingCenter => &TRAINING_CENTER,
            BuildingKind::ResearchLab => &RESEARCH_LAB,
            BuildingKind::TradingPost => &TRADING_POST,
            BuildingKind::ResourceCenter => &RESOURCE_CENTER,
            BuildingKind::Warehouse => &WAREHOUSE,
        }
    }

    /// Queue partition upgrades of this kind are ordered in.
    pub fn partition(self) -> OrderType {
        self.profile().partition
    }

    /// Building whose level drives production of `resource`.
    pub fn producer_of(resource: ResourceKind) -> BuildingKind {
        match resource {
            ResourceKind::Gold => BuildingKind::GoldMine,
            ResourceKind::Metal => BuildingKind::MetalMine,
            ResourceKind::Fuel => BuildingKind::FuelExtractor,
            ResourceKind::Energy => BuildingKind::PowerPlant,
        }
    }
}

impl fmt::Display for BuildingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildingKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildingKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}
