//! Tile module chunk of save files and world snapshots.
//!
//! The chunk stores every building's resource modules in the module
//! binary format, in tile update order. Block layout is stored elsewhere;
//! reading replays the chunk into a world whose buildings already exist.
//!
//! ```text
//! i32  entity count
//! per entity:
//!   i32 x, i32 y
//!   u8  flags (1 = items, 2 = liquids, 4 = power)
//!   item module    (if flagged)
//!   liquid module  (if flagged)
//!   i64 power bits (if flagged)
//! ```

use std::io::{Read, Write};

use crate::error::{GameError, Result};
use crate::math::Fixed;
use crate::modules::{read_i32, read_i64, read_u8, write_i32, write_i64, write_u8, ItemModule, LiquidModule};
use crate::world::{TileEntity, TilePos, World};

const HAS_ITEMS: u8 = 1;
const HAS_LIQUIDS: u8 = 1 << 1;
const HAS_POWER: u8 = 1 << 2;

fn flags(entity: &TileEntity) -> u8 {
    let mut flags = 0;
    if entity.items.is_some() {
        flags |= HAS_ITEMS;
    }
    if entity.liquids.is_some() {
        flags |= HAS_LIQUIDS;
    }
    if entity.power.is_some() {
        flags |= HAS_POWER;
    }
    flags
}

/// Write the module chunk of every building in `world`.
///
/// # Errors
///
/// Returns an error if the writer fails or a module cannot be framed.
pub fn write_tile_modules(world: &World, writer: &mut impl Write) -> Result<()> {
    let positions = world.entity_positions();
    let count = i32::try_from(positions.len())
        .map_err(|_| GameError::InvariantViolation("too many buildings to save".into()))?;
    write_i32(writer, count)?;

    for &pos in positions {
        let Some(entity) = world.entity(pos) else {
            return Err(GameError::InvariantViolation(format!(
                "tile ({}, {}) is in update order without an entity",
                pos.x, pos.y
            )));
        };
        write_i32(writer, i32::from(pos.x))?;
        write_i32(writer, i32::from(pos.y))?;
        write_u8(writer, flags(entity))?;
        if let Some(items) = &entity.items {
            items.write(writer)?;
        }
        if let Some(liquids) = &entity.liquids {
            liquids.write(writer)?;
        }
        if let Some(power) = &entity.power {
            write_i64(writer, power.amount.to_bits())?;
        }
    }
    Ok(())
}

/// One building's modules as stored in a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Building tile.
    pub pos: TilePos,
    /// Item inventory, if stored.
    pub items: Option<ItemModule>,
    /// Liquid storage, if stored.
    pub liquids: Option<LiquidModule>,
    /// Buffered power, if stored.
    pub power: Option<Fixed>,
}

/// Decode a module chunk on its own, without a world to check it against.
///
/// Modules are sized for a catalog of `item_count` items and
/// `liquid_count` liquids.
///
/// # Errors
///
/// Returns [`GameError::Corruption`] on a negative count, an unknown flag
/// bit, a position outside the `u16` grid, a resource outside the catalog,
/// or truncation.
pub fn decode_tile_modules(
    reader: &mut impl Read,
    item_count: usize,
    liquid_count: usize,
) -> Result<Vec<ModuleRecord>> {
    let count = read_i32(reader)?;
    let count = usize::try_from(count)
        .map_err(|_| GameError::Corruption(format!("negative building count {count}")))?;

    let mut records = Vec::new();
    for _ in 0..count {
        let (x, y) = (read_i32(reader)?, read_i32(reader)?);
        let pos = match (u16::try_from(x), u16::try_from(y)) {
            (Ok(x), Ok(y)) => TilePos::new(x, y),
            _ => {
                return Err(GameError::Corruption(format!(
                    "module chunk record at ({x}, {y}) is off the grid"
                )))
            }
        };
        let flags = read_u8(reader)?;
        if flags & !(HAS_ITEMS | HAS_LIQUIDS | HAS_POWER) != 0 {
            return Err(GameError::Corruption(format!(
                "unknown module flags {flags:#05b} at ({x}, {y})"
            )));
        }
        let items = if flags & HAS_ITEMS == 0 {
            None
        } else {
            Some(ItemModule::read_new(reader, item_count)?)
        };
        let liquids = if flags & HAS_LIQUIDS == 0 {
            None
        } else {
            let mut module = LiquidModule::new(liquid_count);
            module.read(reader)?;
            Some(module)
        };
        let power = if flags & HAS_POWER == 0 {
            None
        } else {
            Some(Fixed::from_bits(read_i64(reader)?))
        };
        records.push(ModuleRecord {
            pos,
            items,
            liquids,
            power,
        });
    }
    Ok(records)
}

/// Replay a module chunk into the buildings of `world`.
///
/// The whole chunk is decoded before anything is applied, so a corrupt
/// chunk leaves the world untouched.
///
/// # Errors
///
/// Returns [`GameError::Corruption`] if the chunk does not match the
/// world's buildings (count, position, or module layout), names a
/// resource outside the catalog, or is truncated.
pub fn read_tile_modules(world: &mut World, reader: &mut impl Read) -> Result<()> {
    let count = read_i32(reader)?;
    let expected = world.entity_positions().len();
    if usize::try_from(count).ok() != Some(expected) {
        return Err(GameError::Corruption(format!(
            "module chunk has {count} buildings, world has {expected}"
        )));
    }

    let mut records = Vec::with_capacity(expected);
    for &pos in world.entity_positions() {
        let (x, y) = (read_i32(reader)?, read_i32(reader)?);
        if x != i32::from(pos.x) || y != i32::from(pos.y) {
            return Err(GameError::Corruption(format!(
                "module chunk record at ({x}, {y}), expected ({}, {})",
                pos.x, pos.y
            )));
        }
        let Some(entity) = world.entity(pos) else {
            return Err(GameError::InvariantViolation(format!(
                "tile ({x}, {y}) is in update order without an entity"
            )));
        };
        let stored = read_u8(reader)?;
        if stored != flags(entity) {
            return Err(GameError::Corruption(format!(
                "module layout {stored:#05b} at ({x}, {y}) does not match the block"
            )));
        }

        let items = match &entity.items {
            Some(current) => {
                let mut module = current.clone();
                module.read(reader)?;
                Some(module)
            }
            None => None,
        };
        let liquids = match &entity.liquids {
            Some(current) => {
                let mut module = current.clone();
                module.read(reader)?;
                Some(module)
            }
            None => None,
        };
        let power = match entity.power {
            Some(_) => Some(Fixed::from_bits(read_i64(reader)?)),
            None => None,
        };
        records.push(ModuleRecord {
            pos,
            items,
            liquids,
            power,
        });
    }

    for record in records {
        if let Some(entity) = world.entity_mut(record.pos) {
            if record.items.is_some() {
                entity.items = record.items;
            }
            if record.liquids.is_some() {
                entity.liquids = record.liquids;
            }
            if let (Some(power), Some(amount)) = (entity.power.as_mut(), record.power) {
                power.amount = amount;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentCatalog, ItemId, LiquidId};
    use crate::team::Team;

    const CATALOG: &str = r#"(
        items: [(name: "copper"), (name: "lead")],
        liquids: [(name: "water")],
        blocks: [
            (name: "stone", kind: Floor(deep: false)),
            (name: "core", kind: Core, item_capacity: 100),
            (name: "tank", kind: Wall, liquid_capacity: 50.0, power_capacity: 10.0),
        ],
    )"#;

    fn world() -> (ContentCatalog, World) {
        let content = ContentCatalog::from_ron_str(CATALOG, "inline").unwrap();
        let mut world = World::new(4, 4, content.block_by_name("stone").unwrap());
        let core = content.block(content.block_by_name("core").unwrap()).clone();
        let tank = content.block(content.block_by_name("tank").unwrap()).clone();
        world.set_block(TilePos::new(0, 0), &core, Team::DEFAULT, &content).unwrap();
        world.set_block(TilePos::new(2, 1), &tank, Team::DEFAULT, &content).unwrap();
        (content, world)
    }

    #[test]
    fn test_chunk_restores_modules() {
        let (_content, mut world) = world();
        let core = TilePos::new(0, 0);
        let tank = TilePos::new(2, 1);
        world.entity_mut(core).unwrap().items.as_mut().unwrap().add(ItemId(1), 12);
        {
            let entity = world.entity_mut(tank).unwrap();
            entity.liquids.as_mut().unwrap().add(LiquidId(0), Fixed::from_num(7.5));
            entity.power.as_mut().unwrap().amount = Fixed::from_num(3);
        }
        let mut bytes = Vec::new();
        write_tile_modules(&world, &mut bytes).unwrap();

        let (_content, mut fresh) = self::world();
        read_tile_modules(&mut fresh, &mut bytes.as_slice()).unwrap();

        let items = fresh.entity(core).unwrap().items.as_ref().unwrap();
        assert_eq!(items.get(ItemId(1)), 12);
        assert_eq!(items.total(), 12);
        let entity = fresh.entity(tank).unwrap();
        assert_eq!(entity.liquids.as_ref().unwrap().total(), Fixed::from_num(7.5));
        assert_eq!(entity.power.as_ref().unwrap().amount, Fixed::from_num(3));
    }

    #[test]
    fn test_building_count_mismatch_is_corruption() {
        let (_content, world) = world();
        let mut bytes = Vec::new();
        write_tile_modules(&world, &mut bytes).unwrap();

        let (_content, mut other) = self::world();
        other.remove_block(TilePos::new(2, 1)).unwrap();
        let err = read_tile_modules(&mut other, &mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, GameError::Corruption(_)));
    }

    #[test]
    fn test_unknown_item_leaves_world_untouched() {
        let (_content, mut world) = world();
        let core = TilePos::new(0, 0);
        world.entity_mut(core).unwrap().items.as_mut().unwrap().add(ItemId(0), 5);
        let mut bytes = Vec::new();
        write_tile_modules(&world, &mut bytes).unwrap();
        // count, x, y, flags, module id, entry count, then the item id.
        bytes[4 + 4 + 4 + 1 + 4 + 1] = 9;

        let err = read_tile_modules(&mut world, &mut bytes.as_slice()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(world.entity(core).unwrap().items.as_ref().unwrap().get(ItemId(0)), 5);
    }

    #[test]
    fn test_decode_without_world() {
        let (content, mut world) = world();
        world.entity_mut(TilePos::new(0, 0)).unwrap().items.as_mut().unwrap().add(ItemId(0), 3);
        let mut bytes = Vec::new();
        write_tile_modules(&world, &mut bytes).unwrap();

        let records =
            decode_tile_modules(&mut bytes.as_slice(), content.items().len(), content.liquids().len()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pos, TilePos::new(0, 0));
        assert_eq!(records[0].items.as_ref().unwrap().get(ItemId(0)), 3);
        assert!(records[0].liquids.is_none());
        assert_eq!(records[1].power, Some(Fixed::ZERO));
    }

    #[test]
    fn test_decode_rejects_unknown_flags() {
        let mut bytes = Vec::new();
        write_i32(&mut bytes, 1).unwrap();
        write_i32(&mut bytes, 0).unwrap();
        write_i32(&mut bytes, 0).unwrap();
        write_u8(&mut bytes, 0b1000).unwrap();
        let err = decode_tile_modules(&mut bytes.as_slice(), 2, 1).unwrap_err();
        assert!(matches!(err, GameError::Corruption(_)));
    }

    #[test]
    fn test_truncated_chunk_is_corruption() {
        let (_content, mut world) = world();
        let mut bytes = Vec::new();
        write_tile_modules(&world, &mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        let err = read_tile_modules(&mut world, &mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, GameError::Corruption(_)));
    }
}
