//! Static content catalog.
//!
//! Items, liquids, unit types and blocks are loaded once (from RON, see
//! [`data`]) and assigned dense ids in declaration order. Ids are stable
//! for the session and index every resource module, so the catalog is the
//! single authority on table sizes.
//!
//! Simulation state never holds references into the catalog, only ids.

pub mod data;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consume::Consumers;
use crate::error::{GameError, Result};
use crate::math::{fixed_decimal, Fixed};

pub use data::CatalogData;

/// Largest number of items or liquids a catalog may declare.
///
/// Resource ids are a single byte on the wire.
pub const MAX_RESOURCES: usize = 255;

macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $repr);

        impl $name {
            /// Table index for this id.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[allow(clippy::cast_possible_truncation)]
            pub(crate) const fn from_index(index: usize) -> Self {
                Self(index as $repr)
            }
        }
    };
}

dense_id!(
    /// Dense item identifier.
    ItemId(u8)
);
dense_id!(
    /// Dense liquid identifier.
    LiquidId(u8)
);
dense_id!(
    /// Dense block identifier. `BlockId(0)` is always air.
    BlockId(u16)
);
dense_id!(
    /// Dense unit type identifier.
    UnitTypeId(u8)
);

impl BlockId {
    /// The empty block.
    pub const AIR: Self = Self(0);
}

/// Any piece of content, used for unlock and mission tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentRef {
    /// An item.
    Item(ItemId),
    /// A liquid.
    Liquid(LiquidId),
    /// A block.
    Block(BlockId),
    /// A unit type.
    Unit(UnitTypeId),
}

/// An amount of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item.
    pub item: ItemId,
    /// Count.
    pub amount: i32,
}

impl ItemStack {
    /// Create a stack.
    #[must_use]
    pub const fn new(item: ItemId, amount: i32) -> Self {
        Self { item, amount }
    }
}

/// A countable resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Dense id.
    pub id: ItemId,
    /// Unique name.
    pub name: String,
    /// How well it burns (0..1).
    pub flammability: Fixed,
    /// How violently it explodes (0..1).
    pub explosiveness: Fixed,
    /// Hidden from players.
    pub hidden: bool,
}

/// A fluid resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liquid {
    /// Dense id.
    pub id: LiquidId,
    /// Unique name.
    pub name: String,
    /// Temperature (0.5 is neutral).
    pub temperature: Fixed,
    /// How well it burns (0..1).
    pub flammability: Fixed,
    /// Heat capacity (coolant quality).
    pub heat_capacity: Fixed,
    /// Hidden from players.
    pub hidden: bool,
}

/// A mobile unit type spawned by waves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitType {
    /// Dense id.
    pub id: UnitTypeId,
    /// Unique name.
    pub name: String,
    /// Starting health.
    pub health: i32,
    /// World units moved per tick.
    pub speed: Fixed,
    /// Collision radius.
    pub hit_size: Fixed,
    /// Damage per attack.
    pub damage: i32,
    /// Attack range in world units.
    pub range: Fixed,
    /// Ticks between attacks.
    pub reload: Fixed,
}

/// Terrain properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorProps {
    /// Movement speed multiplier.
    pub speed_multiplier: Fixed,
    /// Impassable to ground units.
    pub deep: bool,
    /// Liquid a pump on this floor extracts.
    pub liquid_drop: Option<LiquidId>,
}

/// What a turret fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shot {
    /// A projectile entity in the bullet group.
    Bullet {
        /// Damage on hit.
        damage: i32,
        /// World units per tick.
        #[serde(with = "fixed_decimal")]
        speed: Fixed,
        /// Ticks before the bullet expires.
        #[serde(with = "fixed_decimal")]
        lifetime: Fixed,
    },
    /// Instant damage applied to the target.
    Laser {
        /// Damage per shot.
        damage: i32,
    },
}

/// Turret parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurretProps {
    /// Targeting range in world units.
    pub range: Fixed,
    /// Ticks between shots.
    pub reload: Fixed,
    /// Projectile kind.
    pub shot: Shot,
    /// Ammunition item.
    pub ammo: ItemId,
    /// Ammunition consumed per shot.
    pub ammo_per_shot: i32,
}

/// Block capability. The scheduler dispatches tile updates on this tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Nothing.
    Air,
    /// Terrain. Never has an entity.
    Floor(FloorProps),
    /// Passive obstacle.
    Wall,
    /// Team core: stores items, loss condition anchor.
    Core,
    /// Converts consumed resources into an output stack.
    Crafter {
        /// Produced per craft.
        output: ItemStack,
        /// Ticks per craft.
        craft_time: Fixed,
    },
    /// Produces liquid every tick.
    Pump {
        /// Liquid per tick.
        amount: Fixed,
        /// Fixed result, or the floor's liquid when `None`.
        result: Option<LiquidId>,
    },
    /// Shoots hostile units in range.
    Turret(TurretProps),
    /// Destroys one arbitrary item per tick.
    Incinerator,
    /// Burns consumed resources into power shared with neighbours.
    Generator {
        /// Power produced per tick while running.
        power_per_tick: Fixed,
        /// Ticks each on-craft consumption lasts.
        item_duration: Fixed,
    },
}

/// Static block descriptor.
#[derive(Debug, Clone)]
pub struct Block {
    /// Dense id.
    pub id: BlockId,
    /// Unique name.
    pub name: String,
    /// Capability.
    pub kind: BlockKind,
    /// Maximum health.
    pub health: i32,
    /// Blocks movement.
    pub solid: bool,
    /// Item storage per entity (0 = no item module).
    pub item_capacity: i32,
    /// Liquid storage per entity (0 = no liquid module).
    pub liquid_capacity: Fixed,
    /// Power buffer per entity (0 = no power module).
    pub power_capacity: Fixed,
    /// Resource requirements.
    pub consumes: Consumers,
}

impl Block {
    /// Whether tiles of this block carry a [`TileEntity`](crate::world::TileEntity).
    #[must_use]
    pub const fn has_entity(&self) -> bool {
        !matches!(self.kind, BlockKind::Air | BlockKind::Floor(_))
    }

    /// Whether entities get an item module.
    #[must_use]
    pub fn has_items(&self) -> bool {
        self.item_capacity > 0
    }

    /// Whether entities get a liquid module.
    #[must_use]
    pub fn has_liquids(&self) -> bool {
        self.liquid_capacity > Fixed::ZERO
    }

    /// Whether entities get a power module.
    #[must_use]
    pub fn has_power(&self) -> bool {
        self.power_capacity > Fixed::ZERO
    }

    /// Whether this is a core.
    #[must_use]
    pub const fn is_core(&self) -> bool {
        matches!(self.kind, BlockKind::Core)
    }

    /// Floor properties, if this is a floor.
    #[must_use]
    pub const fn floor(&self) -> Option<&FloorProps> {
        match &self.kind {
            BlockKind::Floor(props) => Some(props),
            _ => None,
        }
    }
}

/// A wave spawn rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnGroup {
    /// Unit type spawned.
    pub unit: UnitTypeId,
    /// First wave (inclusive).
    pub begin: u32,
    /// Last wave (inclusive).
    pub end: u32,
    /// Spawn every `spacing` waves.
    pub spacing: u32,
    /// Waves per additional unit.
    pub unit_scaling: Fixed,
    /// Base unit count.
    pub unit_amount: u32,
    /// Cap per spawn point.
    pub max: u32,
}

impl SpawnGroup {
    /// Units this group spawns per spawn point at `wave`.
    #[must_use]
    pub fn units_spawned(&self, wave: u32) -> u32 {
        if wave < self.begin || wave > self.end || (wave - self.begin) % self.spacing.max(1) != 0 {
            return 0;
        }
        let steps = Fixed::from_num((wave - self.begin) / self.spacing.max(1));
        let scaled = if self.unit_scaling > Fixed::ZERO {
            (steps / self.unit_scaling).to_num::<u32>()
        } else {
            0
        };
        (self.unit_amount.saturating_sub(1) + scaled.max(1)).min(self.max)
    }
}

/// The loaded content catalog.
#[derive(Debug, Clone)]
pub struct ContentCatalog {
    items: Vec<Item>,
    liquids: Vec<Liquid>,
    units: Vec<UnitType>,
    blocks: Vec<Block>,
    spawn_groups: Vec<SpawnGroup>,
    block_names: HashMap<String, BlockId>,
}

impl ContentCatalog {
    /// Build a catalog from already-resolved parts.
    ///
    /// # Errors
    ///
    /// Returns an error if names are duplicated, too many resources are
    /// declared, or `blocks[0]` is not air.
    pub fn new(
        items: Vec<Item>,
        liquids: Vec<Liquid>,
        units: Vec<UnitType>,
        blocks: Vec<Block>,
        spawn_groups: Vec<SpawnGroup>,
    ) -> Result<Self> {
        if items.len() > MAX_RESOURCES || liquids.len() > MAX_RESOURCES {
            return Err(GameError::InvalidState(format!(
                "catalog declares {} items / {} liquids, limit is {MAX_RESOURCES}",
                items.len(),
                liquids.len()
            )));
        }
        if !matches!(blocks.first().map(|b| &b.kind), Some(BlockKind::Air)) {
            return Err(GameError::InvalidState("block 0 must be air".into()));
        }

        let mut block_names = HashMap::new();
        for (index, block) in blocks.iter().enumerate() {
            if block.id.index() != index {
                return Err(GameError::InvalidState(format!(
                    "block '{}' has id {} at position {index}",
                    block.name, block.id.0
                )));
            }
            if block_names.insert(block.name.clone(), block.id).is_some() {
                return Err(GameError::InvalidState(format!(
                    "duplicate block name '{}'",
                    block.name
                )));
            }
        }

        Ok(Self {
            items,
            liquids,
            units,
            blocks,
            spawn_groups,
            block_names,
        })
    }

    /// Parse and resolve a RON catalog.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] if the text is not valid RON
    /// or references unknown content.
    pub fn from_ron_str(source: &str, origin: &str) -> Result<Self> {
        let data: CatalogData = ron::from_str(source).map_err(|e| GameError::DataParseError {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        data.resolve(origin)
    }

    /// Load a RON catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_ron_str(&source, &path.display().to_string())
    }

    /// All items in id order.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// All liquids in id order.
    #[must_use]
    pub fn liquids(&self) -> &[Liquid] {
        &self.liquids
    }

    /// All unit types in id order.
    #[must_use]
    pub fn units(&self) -> &[UnitType] {
        &self.units
    }

    /// All blocks in id order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Wave spawn groups.
    #[must_use]
    pub fn spawn_groups(&self) -> &[SpawnGroup] {
        &self.spawn_groups
    }

    /// Item by id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not issued by this catalog.
    #[must_use]
    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.index()]
    }

    /// Liquid by id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not issued by this catalog.
    #[must_use]
    pub fn liquid(&self, id: LiquidId) -> &Liquid {
        &self.liquids[id.index()]
    }

    /// Unit type by id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not issued by this catalog.
    #[must_use]
    pub fn unit(&self, id: UnitTypeId) -> &UnitType {
        &self.units[id.index()]
    }

    /// Block by id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not issued by this catalog.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Block by an id from an untrusted source.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownContent`] if out of range.
    pub fn try_block(&self, id: BlockId) -> Result<&Block> {
        self.blocks.get(id.index()).ok_or(GameError::UnknownContent {
            kind: "block",
            id: u32::from(id.0),
        })
    }

    /// Block id by name.
    #[must_use]
    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.block_names.get(name).copied()
    }

    /// Item id by name.
    #[must_use]
    pub fn item_by_name(&self, name: &str) -> Option<ItemId> {
        self.items.iter().find(|item| item.name == name).map(|item| item.id)
    }

    /// Liquid id by name.
    #[must_use]
    pub fn liquid_by_name(&self, name: &str) -> Option<LiquidId> {
        self.liquids
            .iter()
            .find(|liquid| liquid.name == name)
            .map(|liquid| liquid.id)
    }

    /// Unit type id by name.
    #[must_use]
    pub fn unit_by_name(&self, name: &str) -> Option<UnitTypeId> {
        self.units.iter().find(|unit| unit.name == name).map(|unit| unit.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(begin: u32, spacing: u32, scaling: i32, amount: u32, max: u32) -> SpawnGroup {
        SpawnGroup {
            unit: UnitTypeId(0),
            begin,
            end: u32::MAX,
            spacing,
            unit_scaling: Fixed::from_num(scaling),
            unit_amount: amount,
            max,
        }
    }

    #[test]
    fn test_units_spawned_respects_window() {
        let g = group(2, 2, 9999, 1, 100);
        assert_eq!(g.units_spawned(1), 0);
        assert_eq!(g.units_spawned(2), 1);
        assert_eq!(g.units_spawned(3), 0);
        assert_eq!(g.units_spawned(4), 1);
    }

    #[test]
    fn test_units_spawned_scales_and_caps() {
        let g = group(1, 1, 2, 2, 4);
        // (wave - begin) / scaling, at least 1, plus unit_amount - 1
        assert_eq!(g.units_spawned(1), 2);
        assert_eq!(g.units_spawned(5), 3);
        assert_eq!(g.units_spawned(7), 4);
        assert_eq!(g.units_spawned(50), 4);
    }

    #[test]
    fn test_catalog_requires_air_first() {
        let result = ContentCatalog::new(vec![], vec![], vec![], vec![], vec![]);
        assert!(result.is_err());
    }
}
