//! Wave spawning.

use crate::content::ContentCatalog;
use crate::entities::{Actor, ActorKind, Entities, GroupKind};
use crate::error::Result;
use crate::math::{Fixed, Vec2Fixed};
use crate::team::Team;
use crate::world::World;

/// Offsets (in tiles) for successive units at one spawn point.
const SPREAD: [(i32, i32); 9] = [
    (0, 0),
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
    (1, -1),
];

/// Spawn every group's units for `wave` at every spawn point.
///
/// Units join the wave team's unit group. Returns the number spawned.
///
/// # Errors
///
/// Propagates [`Entities::add`] failures.
pub fn spawn_wave(
    content: &ContentCatalog,
    world: &World,
    entities: &mut Entities,
    wave: u32,
    tile_size: Fixed,
) -> Result<u32> {
    let mut spawned = 0;
    for &spawn in world.spawns() {
        let center = spawn.world_center(tile_size);
        let mut slot = 0usize;
        for group in content.spawn_groups() {
            let unit = content.unit(group.unit);
            for _ in 0..group.units_spawned(wave) {
                let (dx, dy) = SPREAD[slot % SPREAD.len()];
                slot += 1;
                let offset = Vec2Fixed::new(
                    Fixed::from_num(dx) * tile_size / 2,
                    Fixed::from_num(dy) * tile_size / 2,
                );
                let actor = Actor::new(
                    ActorKind::Unit {
                        unit: unit.id,
                        reload: Fixed::ZERO,
                    },
                    Team::WAVE,
                    center + offset,
                )
                .with_health(unit.health)
                .with_hit_size(unit.hit_size);
                entities.add(GroupKind::Units(Team::WAVE), actor)?;
                spawned += 1;
            }
        }
    }
    Ok(spawned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::UnitTypeId;
    use crate::world::TilePos;

    const CATALOG: &str = r#"(
        units: [(name: "dagger", health: 130, speed: 0.5, hit_size: 4.0, damage: 9, range: 12.0, reload: 20.0)],
        blocks: [(name: "stone", kind: Floor(deep: false))],
        spawn_groups: [(unit: "dagger", unit_amount: 2)],
    )"#;

    #[test]
    fn test_spawns_at_each_spawn_point() {
        let content = ContentCatalog::from_ron_str(CATALOG, "inline").unwrap();
        let mut world = World::new(10, 10, content.block_by_name("stone").unwrap());
        world.add_spawn(TilePos::new(1, 1)).unwrap();
        world.add_spawn(TilePos::new(8, 8)).unwrap();
        let mut entities = Entities::new();

        let spawned = spawn_wave(&content, &world, &mut entities, 1, Fixed::from_num(8)).unwrap();

        assert_eq!(spawned, 4);
        let group = entities.group(GroupKind::Units(Team::WAVE));
        assert_eq!(group.len(), 4);
        assert!(group.actors().iter().all(|a| a.health == 130));
        assert!(matches!(
            group.actors()[0].kind,
            ActorKind::Unit { unit: UnitTypeId(0), .. }
        ));
        assert_ne!(group.actors()[0].position, group.actors()[1].position);
    }

    #[test]
    fn test_no_spawns_no_units() {
        let content = ContentCatalog::from_ron_str(CATALOG, "inline").unwrap();
        let world = World::new(4, 4, content.block_by_name("stone").unwrap());
        let mut entities = Entities::new();
        assert_eq!(spawn_wave(&content, &world, &mut entities, 1, Fixed::ONE).unwrap(), 0);
        assert!(entities.is_empty());
    }
}
