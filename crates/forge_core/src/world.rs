//! Tile arena.
//!
//! The map is a fixed-size grid of [`Tile`]s stored row-major and indexed
//! by [`TilePos`]. Tiles reference blocks by [`BlockId`] and own their
//! optional [`TileEntity`]; nothing points back at a tile.

use serde::{Deserialize, Serialize};

use crate::content::{Block, BlockId, ContentCatalog};
use crate::error::{GameError, Result};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::modules::{ItemModule, LiquidModule, PowerModule};
use crate::team::Team;

/// Grid position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TilePos {
    /// Column.
    pub x: u16,
    /// Row.
    pub y: u16,
}

impl TilePos {
    /// Create a position.
    #[must_use]
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Neighbour offsets in update order: right, up, left, down.
    pub const NEIGHBOURS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

    /// Offset position, if it stays non-negative and within `u16`.
    #[must_use]
    pub fn offset(self, dx: i32, dy: i32) -> Option<Self> {
        let x = u16::try_from(i32::from(self.x) + dx).ok()?;
        let y = u16::try_from(i32::from(self.y) + dy).ok()?;
        Some(Self { x, y })
    }

    /// World-space centre of this tile.
    #[must_use]
    pub fn world_center(self, tile_size: Fixed) -> Vec2Fixed {
        Vec2Fixed::new(
            Fixed::from_num(self.x) * tile_size,
            Fixed::from_num(self.y) * tile_size,
        )
    }

    /// Tile under a world position (rounded to the nearest tile centre).
    #[must_use]
    pub fn from_world(position: Vec2Fixed, tile_size: Fixed) -> Option<Self> {
        let half = tile_size / 2;
        let x = ((position.x + half) / tile_size).floor().to_num::<i64>();
        let y = ((position.y + half) / tile_size).floor().to_num::<i64>();
        Some(Self {
            x: u16::try_from(x).ok()?,
            y: u16::try_from(y).ok()?,
        })
    }

    /// Manhattan distance.
    #[must_use]
    pub fn manhattan(self, other: Self) -> u32 {
        u32::from(self.x.abs_diff(other.x)) + u32::from(self.y.abs_diff(other.y))
    }
}

/// Mutable per-tile simulation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileEntity {
    /// Owning tile.
    pub pos: TilePos,
    /// Owning team.
    pub team: Team,
    /// Current health.
    pub health: i32,
    /// Item inventory, if the block stores items.
    pub items: Option<ItemModule>,
    /// Liquid storage, if the block stores liquids.
    pub liquids: Option<LiquidModule>,
    /// Power buffer, if the block stores power.
    pub power: Option<PowerModule>,
    /// Craft or fuel progress (0..1).
    #[serde(with = "fixed_serde")]
    pub progress: Fixed,
    /// Reload / dump countdown.
    #[serde(with = "fixed_serde")]
    pub reload: Fixed,
    /// Multiplier applied to the tick delta (boosting, slowdown).
    #[serde(with = "fixed_serde")]
    pub time_scale: Fixed,
    /// Whether required consumes were satisfied on the last update.
    pub cons_valid: bool,
    #[serde(with = "fixed_serde")]
    delta: Fixed,
}

impl TileEntity {
    /// Bare entity with no modules.
    #[must_use]
    pub fn new(pos: TilePos, team: Team, health: i32) -> Self {
        Self {
            pos,
            team,
            health,
            items: None,
            liquids: None,
            power: None,
            progress: Fixed::ZERO,
            reload: Fixed::ZERO,
            time_scale: Fixed::ONE,
            cons_valid: false,
            delta: Fixed::ZERO,
        }
    }

    /// Entity for a freshly placed block, with modules sized to the catalog.
    #[must_use]
    pub fn for_block(block: &Block, pos: TilePos, team: Team, content: &ContentCatalog) -> Self {
        let mut entity = Self::new(pos, team, block.health);
        if block.has_items() || block.is_core() {
            entity.items = Some(ItemModule::new(content.items().len()));
        }
        if block.has_liquids() {
            entity.liquids = Some(LiquidModule::new(content.liquids().len()));
        }
        if block.has_power() {
            entity.power = Some(PowerModule::default());
        }
        entity
    }

    /// Elapsed time for this entity's current update, time scale applied.
    #[must_use]
    pub const fn delta(&self) -> Fixed {
        self.delta
    }

    /// Set the delta for the coming update.
    pub fn set_delta(&mut self, tick_delta: Fixed) {
        self.delta = tick_delta * self.time_scale;
    }

    /// Check module totals.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvariantViolation`] if any module's total
    /// diverges from its entries.
    pub fn verify_modules(&self) -> Result<()> {
        if let Some(items) = &self.items {
            items.verify_total()?;
        }
        if let Some(liquids) = &self.liquids {
            liquids.verify_total()?;
        }
        Ok(())
    }
}

/// One grid cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Terrain block.
    pub floor: BlockId,
    /// Building block ([`BlockId::AIR`] when empty).
    pub block: BlockId,
    /// Building team.
    pub team: Team,
    /// Building state.
    pub entity: Option<TileEntity>,
}

impl Tile {
    fn empty(floor: BlockId) -> Self {
        Self {
            floor,
            block: BlockId::AIR,
            team: Team::Derelict,
            entity: None,
        }
    }
}

/// The tile grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    width: u16,
    height: u16,
    tiles: Vec<Tile>,
    /// Tiles with entities, in placement order. Drives the tile group update.
    entity_order: Vec<TilePos>,
    spawns: Vec<TilePos>,
    invalid_map: bool,
}

impl World {
    /// A grid filled with one floor.
    #[must_use]
    pub fn new(width: u16, height: u16, floor: BlockId) -> Self {
        Self {
            width,
            height,
            tiles: vec![Tile::empty(floor); usize::from(width) * usize::from(height)],
            entity_order: Vec::new(),
            spawns: Vec::new(),
            invalid_map: false,
        }
    }

    /// An empty 0x0 world flagged invalid, used before a map is loaded.
    #[must_use]
    pub fn unloaded() -> Self {
        let mut world = Self::new(0, 0, BlockId::AIR);
        world.invalid_map = true;
        world
    }

    /// Width in tiles.
    #[must_use]
    pub const fn width(&self) -> u16 {
        self.width
    }

    /// Height in tiles.
    #[must_use]
    pub const fn height(&self) -> u16 {
        self.height
    }

    /// Whether the current map is playable.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.invalid_map
    }

    /// Flag the map unplayable.
    pub fn set_invalid(&mut self, invalid: bool) {
        self.invalid_map = invalid;
    }

    /// Wave spawn points.
    #[must_use]
    pub fn spawns(&self) -> &[TilePos] {
        &self.spawns
    }

    /// Add a wave spawn point.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] outside the grid.
    pub fn add_spawn(&mut self, pos: TilePos) -> Result<()> {
        self.index(pos)?;
        self.spawns.push(pos);
        Ok(())
    }

    /// Whether a position lies in the grid.
    #[must_use]
    pub const fn contains(&self, pos: TilePos) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    fn index(&self, pos: TilePos) -> Result<usize> {
        if self.contains(pos) {
            Ok(usize::from(pos.y) * usize::from(self.width) + usize::from(pos.x))
        } else {
            Err(GameError::OutOfBounds {
                x: i32::from(pos.x),
                y: i32::from(pos.y),
            })
        }
    }

    /// Position of a row-major index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn pos_of(&self, index: usize) -> TilePos {
        let width = usize::from(self.width.max(1));
        TilePos::new((index % width) as u16, (index / width) as u16)
    }

    /// Number of tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the grid is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Row-major index of a position inside the grid.
    #[must_use]
    pub fn index_of(&self, pos: TilePos) -> Option<usize> {
        self.index(pos).ok()
    }

    /// Tile at a position.
    #[must_use]
    pub fn tile(&self, pos: TilePos) -> Option<&Tile> {
        self.tiles.get(self.index(pos).ok()?)
    }

    /// Mutable tile at a position.
    pub fn tile_mut(&mut self, pos: TilePos) -> Option<&mut Tile> {
        let index = self.index(pos).ok()?;
        self.tiles.get_mut(index)
    }

    /// Entity at a position.
    #[must_use]
    pub fn entity(&self, pos: TilePos) -> Option<&TileEntity> {
        self.tile(pos)?.entity.as_ref()
    }

    /// Mutable entity at a position.
    pub fn entity_mut(&mut self, pos: TilePos) -> Option<&mut TileEntity> {
        self.tile_mut(pos)?.entity.as_mut()
    }

    /// Set the floor of a tile.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] outside the grid.
    pub fn set_floor(&mut self, pos: TilePos, floor: BlockId) -> Result<()> {
        let index = self.index(pos)?;
        self.tiles[index].floor = floor;
        Ok(())
    }

    /// Put a block on a tile, replacing whatever was there.
    ///
    /// Returns the previous block id.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] outside the grid.
    pub fn set_block(
        &mut self,
        pos: TilePos,
        block: &Block,
        team: Team,
        content: &ContentCatalog,
    ) -> Result<BlockId> {
        let index = self.index(pos)?;
        let tile = &mut self.tiles[index];
        let previous = tile.block;
        let had_entity = tile.entity.is_some();

        tile.block = block.id;
        tile.team = if block.has_entity() { team } else { Team::Derelict };
        tile.entity = block
            .has_entity()
            .then(|| TileEntity::for_block(block, pos, team, content));

        match (had_entity, tile.entity.is_some()) {
            (true, false) => self.entity_order.retain(|&p| p != pos),
            (false, true) => self.entity_order.push(pos),
            _ => {}
        }
        Ok(previous)
    }

    /// Clear a tile's block. Returns the removed entity.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] outside the grid.
    pub fn remove_block(&mut self, pos: TilePos) -> Result<Option<TileEntity>> {
        let index = self.index(pos)?;
        let tile = &mut self.tiles[index];
        tile.block = BlockId::AIR;
        tile.team = Team::Derelict;
        let entity = tile.entity.take();
        if entity.is_some() {
            self.entity_order.retain(|&p| p != pos);
        }
        Ok(entity)
    }

    /// Tiles with entities, in placement order.
    #[must_use]
    pub fn entity_positions(&self) -> &[TilePos] {
        &self.entity_order
    }

    /// Neighbouring positions inside the grid.
    pub fn neighbours(&self, pos: TilePos) -> impl Iterator<Item = TilePos> + '_ {
        TilePos::NEIGHBOURS
            .iter()
            .filter_map(move |&(dx, dy)| pos.offset(dx, dy))
            .filter(|&p| self.contains(p))
    }

    /// Remove every building, keeping floors and spawns.
    pub fn clear_buildings(&mut self) {
        for tile in &mut self.tiles {
            tile.block = BlockId::AIR;
            tile.team = Team::Derelict;
            tile.entity = None;
        }
        self.entity_order.clear();
    }

    /// Iterate every tile with its position.
    pub fn iter(&self) -> impl Iterator<Item = (TilePos, &Tile)> + '_ {
        self.tiles
            .iter()
            .enumerate()
            .map(|(index, tile)| (self.pos_of(index), tile))
    }
}
