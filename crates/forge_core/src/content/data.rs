//! RON authoring format for the content catalog.
//!
//! Data files refer to content by name; [`CatalogData::resolve`] assigns
//! dense ids in declaration order and rewrites every reference.
//!
//! # Example RON
//!
//! ```ron
//! CatalogData(
//!     items: [
//!         (name: "copper"),
//!         (name: "coal", flammability: 1.0),
//!     ],
//!     liquids: [
//!         (name: "water", heat_capacity: 0.4),
//!     ],
//!     units: [
//!         (name: "dagger", health: 130, speed: 0.5, hit_size: 4.0, damage: 9, range: 40.0, reload: 20.0),
//!     ],
//!     blocks: [
//!         (name: "core", kind: Core, health: 1100, solid: true, item_capacity: 1000),
//!         (name: "smelter", kind: Crafter(output: ("silicon", 1), craft_time: 40.0),
//!          item_capacity: 10, consumes: [Items(items: [("coal", 1)])]),
//!     ],
//!     spawn_groups: [
//!         (unit: "dagger", end: Some(10), unit_scaling: 2.0),
//!     ],
//! )
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{
    Block, BlockId, BlockKind, ContentCatalog, FloorProps, Item, ItemId, ItemStack, Liquid,
    LiquidId, Shot, SpawnGroup, TurretProps, UnitType, UnitTypeId,
};
use crate::consume::{
    ConsumeItemFilter, ConsumeItems, ConsumeKind, ConsumeLiquid, ConsumeLiquidFilter,
    ConsumePower, Consumer, Consumers, ItemFilter, LiquidFilter,
};
use crate::error::{GameError, Result};
use crate::math::{fixed_decimal, Fixed};

/// Name of the implicit block 0.
pub const AIR: &str = "air";

/// Item definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemData {
    /// Unique name.
    pub name: String,
    /// 0..1
    #[serde(default, with = "fixed_decimal")]
    pub flammability: Fixed,
    /// 0..1
    #[serde(default, with = "fixed_decimal")]
    pub explosiveness: Fixed,
    /// Hidden from players.
    #[serde(default)]
    pub hidden: bool,
}

fn neutral_temperature() -> Fixed {
    Fixed::from_num(0.5)
}

/// Liquid definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidData {
    /// Unique name.
    pub name: String,
    /// 0..1, 0.5 is neutral.
    #[serde(default = "neutral_temperature", with = "fixed_decimal")]
    pub temperature: Fixed,
    /// 0..1
    #[serde(default, with = "fixed_decimal")]
    pub flammability: Fixed,
    /// Coolant quality.
    #[serde(default, with = "fixed_decimal")]
    pub heat_capacity: Fixed,
    /// Hidden from players.
    #[serde(default)]
    pub hidden: bool,
}

/// Unit type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitData {
    /// Unique name.
    pub name: String,
    /// Starting health.
    pub health: i32,
    /// World units per tick.
    #[serde(with = "fixed_decimal")]
    pub speed: Fixed,
    /// Collision radius.
    #[serde(with = "fixed_decimal")]
    pub hit_size: Fixed,
    /// Damage per attack.
    pub damage: i32,
    /// Attack range.
    #[serde(with = "fixed_decimal")]
    pub range: Fixed,
    /// Ticks between attacks.
    #[serde(with = "fixed_decimal")]
    pub reload: Fixed,
}

/// Authored block capability. Names are resolved at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BlockKindData {
    /// Terrain.
    Floor {
        /// Movement speed multiplier.
        #[serde(default = "one", with = "fixed_decimal")]
        speed: Fixed,
        /// Impassable.
        #[serde(default)]
        deep: bool,
        /// Liquid name extracted by pumps.
        #[serde(default)]
        liquid_drop: Option<String>,
    },
    /// Passive obstacle.
    Wall,
    /// Team core.
    Core,
    /// Generic crafter.
    Crafter {
        /// `(item name, amount)` per craft.
        output: (String, i32),
        /// Ticks per craft.
        #[serde(with = "fixed_decimal")]
        craft_time: Fixed,
    },
    /// Liquid pump.
    Pump {
        /// Liquid per tick.
        #[serde(with = "fixed_decimal")]
        amount: Fixed,
        /// Fixed liquid name, or the floor's when absent.
        #[serde(default)]
        result: Option<String>,
    },
    /// Turret.
    Turret {
        /// Range in world units.
        #[serde(with = "fixed_decimal")]
        range: Fixed,
        /// Ticks between shots.
        #[serde(with = "fixed_decimal")]
        reload: Fixed,
        /// Projectile.
        shot: Shot,
        /// Ammunition item name.
        ammo: String,
        /// Ammunition per shot.
        #[serde(default = "one_i32")]
        ammo_per_shot: i32,
    },
    /// Item destroyer.
    Incinerator,
    /// Power generator.
    Generator {
        /// Power per running tick.
        #[serde(with = "fixed_decimal")]
        power_per_tick: Fixed,
        /// Ticks each on-craft draw lasts.
        #[serde(with = "fixed_decimal")]
        item_duration: Fixed,
    },
}

fn one() -> Fixed {
    Fixed::ONE
}

const fn one_i32() -> i32 {
    1
}

const fn default_health() -> i32 {
    40
}

/// Authored item predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ItemFilterData {
    /// Every item.
    Any,
    /// Minimum flammability.
    Flammable(#[serde(with = "fixed_decimal")] Fixed),
    /// Minimum explosiveness.
    Explosive(#[serde(with = "fixed_decimal")] Fixed),
    /// Item names.
    OneOf(Vec<String>),
}

/// Authored liquid predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LiquidFilterData {
    /// Every liquid.
    Any,
    /// Minimum flammability.
    Flammable(#[serde(with = "fixed_decimal")] Fixed),
    /// Cool, high heat capacity liquids.
    Coolant {
        /// Highest accepted temperature.
        #[serde(with = "fixed_decimal")]
        max_temperature: Fixed,
        /// Lowest accepted heat capacity.
        #[serde(with = "fixed_decimal")]
        min_heat_capacity: Fixed,
    },
    /// Liquid names.
    OneOf(Vec<String>),
}

/// Authored consume entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsumeData {
    /// Fixed stacks per craft.
    Items {
        /// `(item name, amount)` pairs.
        items: Vec<(String, i32)>,
        /// Booster.
        #[serde(default)]
        optional: bool,
    },
    /// Filtered item per craft.
    ItemFilter {
        /// Predicate.
        filter: ItemFilterData,
        /// Units per craft.
        #[serde(default = "one_i32")]
        amount: i32,
        /// Booster.
        #[serde(default)]
        optional: bool,
    },
    /// Fixed liquid per tick.
    Liquid {
        /// Liquid name.
        liquid: String,
        /// Units per tick.
        #[serde(with = "fixed_decimal")]
        amount: Fixed,
        /// Booster.
        #[serde(default)]
        optional: bool,
    },
    /// Filtered liquid per tick.
    LiquidFilter {
        /// Predicate.
        filter: LiquidFilterData,
        /// Units per tick.
        #[serde(with = "fixed_decimal")]
        amount: Fixed,
        /// Booster.
        #[serde(default)]
        optional: bool,
    },
    /// Power per tick.
    Power {
        /// Units per tick.
        #[serde(with = "fixed_decimal")]
        amount: Fixed,
        /// Booster.
        #[serde(default)]
        optional: bool,
    },
}

/// Block definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    /// Unique name.
    pub name: String,
    /// Capability.
    pub kind: BlockKindData,
    /// Maximum health.
    #[serde(default = "default_health")]
    pub health: i32,
    /// Blocks movement.
    #[serde(default)]
    pub solid: bool,
    /// Item storage.
    #[serde(default)]
    pub item_capacity: i32,
    /// Liquid storage.
    #[serde(default, with = "fixed_decimal")]
    pub liquid_capacity: Fixed,
    /// Power buffer.
    #[serde(default, with = "fixed_decimal")]
    pub power_capacity: Fixed,
    /// Consume list.
    #[serde(default)]
    pub consumes: Vec<ConsumeData>,
}

/// Spawn group definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnGroupData {
    /// Unit type name.
    pub unit: String,
    /// First wave.
    #[serde(default)]
    pub begin: u32,
    /// Last wave, unbounded when absent.
    #[serde(default)]
    pub end: Option<u32>,
    /// Wave spacing.
    #[serde(default = "one_u32")]
    pub spacing: u32,
    /// Waves per additional unit.
    #[serde(default = "default_scaling", with = "fixed_decimal")]
    pub unit_scaling: Fixed,
    /// Base unit count.
    #[serde(default = "one_u32")]
    pub unit_amount: u32,
    /// Cap per spawn point.
    #[serde(default = "default_max")]
    pub max: u32,
}

const fn one_u32() -> u32 {
    1
}

const fn default_max() -> u32 {
    100
}

fn default_scaling() -> Fixed {
    Fixed::from_num(9999)
}

/// A whole catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    /// Items in id order.
    #[serde(default)]
    pub items: Vec<ItemData>,
    /// Liquids in id order.
    #[serde(default)]
    pub liquids: Vec<LiquidData>,
    /// Unit types in id order.
    #[serde(default)]
    pub units: Vec<UnitData>,
    /// Blocks in id order, after the implicit air block.
    #[serde(default)]
    pub blocks: Vec<BlockData>,
    /// Wave spawn groups.
    #[serde(default)]
    pub spawn_groups: Vec<SpawnGroupData>,
}

struct Resolver<'a> {
    origin: &'a str,
    items: &'a [Item],
    liquids: &'a [Liquid],
    units: &'a [UnitType],
}

impl Resolver<'_> {
    fn error(&self, message: String) -> GameError {
        GameError::DataParseError {
            path: self.origin.to_string(),
            message,
        }
    }

    fn item(&self, name: &str) -> Result<ItemId> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.id)
            .ok_or_else(|| self.error(format!("unknown item '{name}'")))
    }

    fn liquid(&self, name: &str) -> Result<LiquidId> {
        self.liquids
            .iter()
            .find(|liquid| liquid.name == name)
            .map(|liquid| liquid.id)
            .ok_or_else(|| self.error(format!("unknown liquid '{name}'")))
    }

    fn unit(&self, name: &str) -> Result<UnitTypeId> {
        self.units
            .iter()
            .find(|unit| unit.name == name)
            .map(|unit| unit.id)
            .ok_or_else(|| self.error(format!("unknown unit type '{name}'")))
    }

    fn stack(&self, (name, amount): &(String, i32)) -> Result<ItemStack> {
        if *amount <= 0 {
            return Err(self.error(format!("stack of '{name}' must be positive, got {amount}")));
        }
        Ok(ItemStack::new(self.item(name)?, *amount))
    }

    fn item_filter(&self, data: &ItemFilterData) -> Result<ItemFilter> {
        Ok(match data {
            ItemFilterData::Any => ItemFilter::Any,
            ItemFilterData::Flammable(min) => ItemFilter::Flammable(*min),
            ItemFilterData::Explosive(min) => ItemFilter::Explosive(*min),
            ItemFilterData::OneOf(names) => ItemFilter::OneOf(
                names.iter().map(|name| self.item(name)).collect::<Result<_>>()?,
            ),
        })
    }

    fn liquid_filter(&self, data: &LiquidFilterData) -> Result<LiquidFilter> {
        Ok(match data {
            LiquidFilterData::Any => LiquidFilter::Any,
            LiquidFilterData::Flammable(min) => LiquidFilter::Flammable(*min),
            LiquidFilterData::Coolant {
                max_temperature,
                min_heat_capacity,
            } => LiquidFilter::Coolant {
                max_temperature: *max_temperature,
                min_heat_capacity: *min_heat_capacity,
            },
            LiquidFilterData::OneOf(names) => LiquidFilter::OneOf(
                names
                    .iter()
                    .map(|name| self.liquid(name))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    fn consumer(&self, data: &ConsumeData) -> Result<Consumer> {
        let (kind, optional) = match data {
            ConsumeData::Items { items, optional } => (
                ConsumeKind::Items(ConsumeItems {
                    items: items.iter().map(|s| self.stack(s)).collect::<Result<_>>()?,
                }),
                *optional,
            ),
            ConsumeData::ItemFilter {
                filter,
                amount,
                optional,
            } => {
                let filter = self.item_filter(filter)?;
                let accepts = filter.accepted(self.items);
                (
                    ConsumeKind::ItemFilter(ConsumeItemFilter {
                        filter,
                        accepts,
                        amount: *amount,
                    }),
                    *optional,
                )
            }
            ConsumeData::Liquid {
                liquid,
                amount,
                optional,
            } => (
                ConsumeKind::Liquid(ConsumeLiquid {
                    liquid: self.liquid(liquid)?,
                    amount: *amount,
                }),
                *optional,
            ),
            ConsumeData::LiquidFilter {
                filter,
                amount,
                optional,
            } => {
                let filter = self.liquid_filter(filter)?;
                let accepts = filter.accepted(self.liquids);
                (
                    ConsumeKind::LiquidFilter(ConsumeLiquidFilter {
                        filter,
                        accepts,
                        amount: *amount,
                    }),
                    *optional,
                )
            }
            ConsumeData::Power { amount, optional } => {
                (ConsumeKind::Power(ConsumePower { amount: *amount }), *optional)
            }
        };
        Ok(Consumer { kind, optional })
    }

    fn kind(&self, data: &BlockKindData) -> Result<BlockKind> {
        Ok(match data {
            BlockKindData::Floor {
                speed,
                deep,
                liquid_drop,
            } => BlockKind::Floor(FloorProps {
                speed_multiplier: *speed,
                deep: *deep,
                liquid_drop: liquid_drop.as_deref().map(|n| self.liquid(n)).transpose()?,
            }),
            BlockKindData::Wall => BlockKind::Wall,
            BlockKindData::Core => BlockKind::Core,
            BlockKindData::Crafter { output, craft_time } => BlockKind::Crafter {
                output: self.stack(output)?,
                craft_time: *craft_time,
            },
            BlockKindData::Pump { amount, result } => BlockKind::Pump {
                amount: *amount,
                result: result.as_deref().map(|n| self.liquid(n)).transpose()?,
            },
            BlockKindData::Turret {
                range,
                reload,
                shot,
                ammo,
                ammo_per_shot,
            } => BlockKind::Turret(TurretProps {
                range: *range,
                reload: *reload,
                shot: *shot,
                ammo: self.item(ammo)?,
                ammo_per_shot: *ammo_per_shot,
            }),
            BlockKindData::Incinerator => BlockKind::Incinerator,
            BlockKindData::Generator {
                power_per_tick,
                item_duration,
            } => BlockKind::Generator {
                power_per_tick: *power_per_tick,
                item_duration: *item_duration,
            },
        })
    }
}

fn check_unique<'a>(origin: &str, kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(GameError::DataParseError {
                path: origin.to_string(),
                message: format!("duplicate {kind} name '{name}'"),
            });
        }
    }
    Ok(())
}

impl CatalogData {
    /// Assign ids, resolve names and validate.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] on duplicate or unknown names,
    /// oversize tables, or a block that is declared as `air`.
    pub fn resolve(&self, origin: &str) -> Result<ContentCatalog> {
        check_unique(origin, "item", self.items.iter().map(|i| i.name.as_str()))?;
        check_unique(origin, "liquid", self.liquids.iter().map(|l| l.name.as_str()))?;
        check_unique(origin, "unit", self.units.iter().map(|u| u.name.as_str()))?;
        check_unique(origin, "block", self.blocks.iter().map(|b| b.name.as_str()))?;

        let items: Vec<Item> = self
            .items
            .iter()
            .enumerate()
            .map(|(index, data)| Item {
                id: ItemId::from_index(index),
                name: data.name.clone(),
                flammability: data.flammability,
                explosiveness: data.explosiveness,
                hidden: data.hidden,
            })
            .collect();
        let liquids: Vec<Liquid> = self
            .liquids
            .iter()
            .enumerate()
            .map(|(index, data)| Liquid {
                id: LiquidId::from_index(index),
                name: data.name.clone(),
                temperature: data.temperature,
                flammability: data.flammability,
                heat_capacity: data.heat_capacity,
                hidden: data.hidden,
            })
            .collect();
        let units: Vec<UnitType> = self
            .units
            .iter()
            .enumerate()
            .map(|(index, data)| UnitType {
                id: UnitTypeId::from_index(index),
                name: data.name.clone(),
                health: data.health,
                speed: data.speed,
                hit_size: data.hit_size,
                damage: data.damage,
                range: data.range,
                reload: data.reload,
            })
            .collect();

        if self.blocks.len() >= usize::from(u16::MAX) {
            return Err(GameError::DataParseError {
                path: origin.to_string(),
                message: format!("{} blocks exceed the block id range", self.blocks.len()),
            });
        }

        let resolver = Resolver {
            origin,
            items: &items,
            liquids: &liquids,
            units: &units,
        };

        let mut blocks = vec![Block {
            id: BlockId::AIR,
            name: AIR.to_string(),
            kind: BlockKind::Air,
            health: 0,
            solid: false,
            item_capacity: 0,
            liquid_capacity: Fixed::ZERO,
            power_capacity: Fixed::ZERO,
            consumes: Consumers::default(),
        }];
        for (index, data) in self.blocks.iter().enumerate() {
            if data.name == AIR {
                return Err(resolver.error("'air' is reserved for block 0".into()));
            }
            let consumes = data
                .consumes
                .iter()
                .map(|c| resolver.consumer(c))
                .collect::<Result<Vec<_>>>()?;
            blocks.push(Block {
                id: BlockId::from_index(index + 1),
                name: data.name.clone(),
                kind: resolver.kind(&data.kind)?,
                health: data.health,
                solid: data.solid,
                item_capacity: data.item_capacity,
                liquid_capacity: data.liquid_capacity,
                power_capacity: data.power_capacity,
                consumes: Consumers::new(consumes),
            });
        }

        let spawn_groups = self
            .spawn_groups
            .iter()
            .map(|data| {
                Ok(SpawnGroup {
                    unit: resolver.unit(&data.unit)?,
                    begin: data.begin,
                    end: data.end.unwrap_or(u32::MAX),
                    spacing: data.spacing.max(1),
                    unit_scaling: data.unit_scaling,
                    unit_amount: data.unit_amount,
                    max: data.max,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ContentCatalog::new(items, liquids, units, blocks, spawn_groups).map_err(|e| {
            GameError::DataParseError {
                path: origin.to_string(),
                message: e.to_string(),
            }
        })
    }
}
