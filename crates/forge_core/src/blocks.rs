//! Tile group update, dispatched on [`BlockKind`].
//!
//! Each entity is taken out of its tile for the duration of its update, so
//! a block may freely read and mutate its neighbours through the [`World`].
//! Tiles update in placement order.

use crate::consume::ConsumeTiming;
use crate::content::{Block, BlockKind, ContentCatalog, ItemId, ItemStack, LiquidId, Shot, TurretProps};
use crate::entities::{Actor, ActorId, ActorKind, Entities, GroupKind, ItemTransfer};
use crate::error::Result;
use crate::math::{Fixed, Vec2Fixed};
use crate::team::Team;
use crate::world::{TileEntity, TilePos, World};

/// Ticks between item dumps from a producer.
pub const DUMP_INTERVAL: i32 = 5;

/// What the tile update needs besides the world.
#[derive(Debug)]
pub struct TileContext<'a> {
    /// Content catalog.
    pub content: &'a ContentCatalog,
    /// Actor groups (transfers and bullets are spawned here).
    pub entities: &'a mut Entities,
    /// World units per tile.
    pub tile_size: Fixed,
    /// Lifetime of item transfer effects.
    pub transfer_ticks: Fixed,
}

/// Update every tile entity once.
///
/// # Errors
///
/// Propagates failures from spawning actors.
pub fn update_tiles(world: &mut World, ctx: &mut TileContext<'_>, delta: Fixed) -> Result<()> {
    let order = world.entity_positions().to_vec();
    for pos in order {
        let Some(tile) = world.tile_mut(pos) else {
            continue;
        };
        let Some(mut entity) = tile.entity.take() else {
            continue;
        };
        let block = ctx.content.block(tile.block);
        let result = update_entity(world, ctx, block, &mut entity, delta);
        if let Some(tile) = world.tile_mut(pos) {
            tile.entity = Some(entity);
        }
        result?;
    }
    Ok(())
}

fn update_entity(
    world: &mut World,
    ctx: &mut TileContext<'_>,
    block: &Block,
    entity: &mut TileEntity,
    delta: Fixed,
) -> Result<()> {
    entity.set_delta(delta);
    entity.cons_valid = block.consumes.valid(block, entity);

    match &block.kind {
        BlockKind::Crafter { output, craft_time } => {
            update_crafter(block, entity, *output, *craft_time);
            dump_to_core(world, ctx, entity, output.item)?;
            return Ok(());
        }
        BlockKind::Pump { amount, result } => update_pump(world, ctx.content, block, entity, *amount, *result),
        BlockKind::Turret(props) => update_turret(ctx, entity, props)?,
        BlockKind::Incinerator => {
            if entity.cons_valid {
                if let Some(items) = entity.items.as_mut() {
                    items.take();
                }
            }
        }
        BlockKind::Generator {
            power_per_tick,
            item_duration,
        } => {
            update_generator(world, ctx.content, block, entity, *power_per_tick, *item_duration);
            return Ok(());
        }
        BlockKind::Air | BlockKind::Floor(_) | BlockKind::Wall | BlockKind::Core => {}
    }

    if entity.cons_valid {
        block.consumes.trigger(ConsumeTiming::PerTick, block, entity);
    }
    Ok(())
}

fn update_crafter(block: &Block, entity: &mut TileEntity, output: ItemStack, craft_time: Fixed) {
    let full = entity
        .items
        .as_ref()
        .map_or(true, |items| items.get(output.item) + output.amount > block.item_capacity);
    if !entity.cons_valid || full {
        return;
    }

    entity.progress += entity.delta() / craft_time.max(Fixed::ONE);
    block.consumes.trigger(ConsumeTiming::PerTick, block, entity);

    if entity.progress >= Fixed::ONE {
        block.consumes.trigger(ConsumeTiming::OnCraft, block, entity);
        if let Some(items) = entity.items.as_mut() {
            items.add_stack(output);
        }
        entity.progress = Fixed::ZERO;
    }
}

/// Offload one unit of `item` to an adjacent same-team core every
/// [`DUMP_INTERVAL`] ticks, as an item transfer effect.
fn dump_to_core(world: &World, ctx: &mut TileContext<'_>, entity: &mut TileEntity, item: ItemId) -> Result<()> {
    entity.reload += entity.delta();
    if entity.reload < Fixed::from_num(DUMP_INTERVAL) {
        return Ok(());
    }
    let Some(items) = entity.items.as_mut() else {
        return Ok(());
    };
    if !items.has_any(item) {
        return Ok(());
    }
    let core = world.neighbours(entity.pos).find(|&next| {
        world.tile(next).is_some_and(|tile| {
            tile.team == entity.team && ctx.content.block(tile.block).is_core() && tile.entity.is_some()
        })
    });
    let Some(core) = core else {
        return Ok(());
    };

    entity.reload = Fixed::ZERO;
    items.remove(item, 1);
    let from = entity.pos.world_center(ctx.tile_size);
    let to = core.world_center(ctx.tile_size);
    let velocity = (to - from).scale(Fixed::ONE / ctx.transfer_ticks.max(Fixed::ONE));
    let effect = Actor::new(
        ActorKind::Effect {
            transfer: Some(ItemTransfer {
                item,
                amount: 1,
                to: core,
            }),
        },
        entity.team,
        from,
    )
    .with_velocity(velocity)
    .with_lifetime(ctx.transfer_ticks);
    ctx.entities.add(GroupKind::Effect, effect)?;
    Ok(())
}

fn update_pump(
    world: &World,
    content: &ContentCatalog,
    block: &Block,
    entity: &mut TileEntity,
    amount: Fixed,
    result: Option<LiquidId>,
) {
    let liquid = result.or_else(|| {
        world
            .tile(entity.pos)
            .and_then(|tile| content.block(tile.floor).floor())
            .and_then(|floor| floor.liquid_drop)
    });
    let delta = entity.delta();
    let (Some(liquid), Some(liquids)) = (liquid, entity.liquids.as_mut()) else {
        return;
    };
    let space = block.liquid_capacity - liquids.total();
    let pumped = (amount * delta).min(space);
    if pumped > Fixed::ZERO {
        liquids.add(liquid, pumped);
    }
}

fn nearest_enemy(entities: &Entities, team: Team, from: Vec2Fixed, range: Fixed) -> Option<(Team, ActorId, Vec2Fixed)> {
    let mut best: Option<(Fixed, Team, ActorId, Vec2Fixed)> = None;
    for enemy in Team::ALL.into_iter().filter(|&other| team.is_enemy(other)) {
        for actor in entities.group(GroupKind::Units(enemy)).actors() {
            if actor.removed || !actor.position.within(from, range) {
                continue;
            }
            let dist = actor.position.distance_squared(from);
            if best.as_ref().map_or(true, |(d, ..)| dist < *d) {
                best = Some((dist, enemy, actor.id, actor.position));
            }
        }
    }
    best.map(|(_, team, id, position)| (team, id, position))
}

fn update_turret(ctx: &mut TileContext<'_>, entity: &mut TileEntity, props: &TurretProps) -> Result<()> {
    if entity.reload < props.reload {
        entity.reload += entity.delta();
        return Ok(());
    }
    let has_ammo = entity
        .items
        .as_ref()
        .is_some_and(|items| items.has(props.ammo, props.ammo_per_shot));
    if !has_ammo {
        return Ok(());
    }
    let origin = entity.pos.world_center(ctx.tile_size);
    let Some((target_team, target, position)) = nearest_enemy(ctx.entities, entity.team, origin, props.range) else {
        return Ok(());
    };

    if let Some(items) = entity.items.as_mut() {
        items.remove(props.ammo, props.ammo_per_shot);
    }
    entity.reload = Fixed::ZERO;

    match props.shot {
        Shot::Bullet {
            damage,
            speed,
            lifetime,
        } => {
            let direction = (position - origin).normalize();
            let bullet = Actor::new(ActorKind::Bullet { damage }, entity.team, origin)
                .with_velocity(direction.scale(speed))
                .with_lifetime(lifetime);
            ctx.entities.add(GroupKind::Bullet, bullet)?;
        }
        Shot::Laser { damage } => {
            if let Some(actor) = ctx.entities.group_mut(GroupKind::Units(target_team)).get_mut(target) {
                actor.health -= damage;
            }
        }
    }
    Ok(())
}

fn update_generator(
    world: &mut World,
    content: &ContentCatalog,
    block: &Block,
    entity: &mut TileEntity,
    power_per_tick: Fixed,
    item_duration: Fixed,
) {
    if entity.progress <= Fixed::ZERO && block.consumes.valid(block, entity) {
        block.consumes.trigger(ConsumeTiming::OnCraft, block, entity);
        entity.progress = Fixed::ONE;
    }
    if entity.progress <= Fixed::ZERO {
        return;
    }

    let delta = entity.delta();
    entity.progress -= delta / item_duration.max(Fixed::ONE);
    block.consumes.trigger(ConsumeTiming::PerTick, block, entity);
    let Some(power) = entity.power.as_mut() else {
        return;
    };
    power.charge(power_per_tick * delta, block.power_capacity);

    for next in TilePos::NEIGHBOURS.iter().filter_map(|&(dx, dy)| entity.pos.offset(dx, dy)) {
        let Some(tile) = world.tile_mut(next) else {
            continue;
        };
        let neighbour_block = content.block(tile.block);
        if tile.team != entity.team || matches!(neighbour_block.kind, BlockKind::Generator { .. }) {
            continue;
        }
        let Some(other) = tile.entity.as_mut().and_then(|e| e.power.as_mut()) else {
            continue;
        };
        let accepted = other.charge(power.amount, neighbour_block.power_capacity);
        power.remove(accepted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{BlockId, UnitTypeId};

    const CATALOG: &str = r#"(
        items: [(name: "copper"), (name: "coal", flammability: 1.0), (name: "graphite")],
        liquids: [(name: "water")],
        units: [(name: "dagger", health: 50, speed: 0.5, hit_size: 4.0, damage: 9, range: 12.0, reload: 20.0)],
        blocks: [
            (name: "sand", kind: Floor(liquid_drop: Some("water"))),
            (name: "core", kind: Core, health: 1100, solid: true, item_capacity: 1000),
            (name: "press", kind: Crafter(output: ("graphite", 1), craft_time: 2.0), solid: true,
             item_capacity: 10, consumes: [Items(items: [("coal", 2)])]),
            (name: "pump", kind: Pump(amount: 7.0), liquid_capacity: 10.0),
            (name: "laser", kind: Turret(range: 40.0, reload: 1.0, shot: Laser(damage: 20), ammo: "copper"),
             solid: true, item_capacity: 10),
            (name: "incinerator", kind: Incinerator, item_capacity: 10),
            (name: "burner", kind: Generator(power_per_tick: 2.0, item_duration: 4.0), item_capacity: 5,
             power_capacity: 10.0, consumes: [ItemFilter(filter: Flammable(0.5))]),
            (name: "battery", kind: Wall, power_capacity: 100.0),
        ],
    )"#;

    fn setup() -> (ContentCatalog, World, Entities) {
        let content = ContentCatalog::from_ron_str(CATALOG, "inline").unwrap();
        let world = World::new(8, 8, content.block_by_name("sand").unwrap());
        (content, world, Entities::new())
    }

    fn place(world: &mut World, content: &ContentCatalog, name: &str, pos: TilePos) {
        let block = content.block(content.block_by_name(name).unwrap());
        world.set_block(pos, block, Team::Blue, content).unwrap();
    }

    fn tick(world: &mut World, content: &ContentCatalog, entities: &mut Entities) {
        let mut ctx = TileContext {
            content,
            entities,
            tile_size: Fixed::from_num(8),
            transfer_ticks: Fixed::from_num(4),
        };
        update_tiles(world, &mut ctx, Fixed::ONE).unwrap();
    }

    #[test]
    fn test_crafter_consumes_on_craft_and_dumps_to_core() {
        let (content, mut world, mut entities) = setup();
        let press = TilePos::new(2, 2);
        place(&mut world, &content, "press", press);
        place(&mut world, &content, "core", TilePos::new(3, 2));
        world.entity_mut(press).unwrap().items.as_mut().unwrap().add(ItemId(1), 4);

        tick(&mut world, &content, &mut entities);
        assert_eq!(world.entity(press).unwrap().items.as_ref().unwrap().get(ItemId(1)), 4);
        tick(&mut world, &content, &mut entities);
        let items = world.entity(press).unwrap().items.as_ref().unwrap();
        assert_eq!(items.get(ItemId(1)), 2);
        assert_eq!(items.get(ItemId(2)), 1);

        for _ in 0..3 {
            tick(&mut world, &content, &mut entities);
        }
        let effects = entities.group(GroupKind::Effect);
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            effects.actors()[0].kind,
            ActorKind::Effect { transfer: Some(ItemTransfer { to, .. }) } if to == TilePos::new(3, 2)
        ));
    }

    #[test]
    fn test_crafter_idles_without_input() {
        let (content, mut world, mut entities) = setup();
        let press = TilePos::new(2, 2);
        place(&mut world, &content, "press", press);
        tick(&mut world, &content, &mut entities);
        let entity = world.entity(press).unwrap();
        assert!(!entity.cons_valid);
        assert_eq!(entity.progress, Fixed::ZERO);
    }

    #[test]
    fn test_pump_fills_to_capacity_from_floor() {
        let (content, mut world, mut entities) = setup();
        let pump = TilePos::new(1, 1);
        place(&mut world, &content, "pump", pump);
        tick(&mut world, &content, &mut entities);
        tick(&mut world, &content, &mut entities);
        let liquids = world.entity(pump).unwrap().liquids.as_ref().unwrap();
        assert_eq!(liquids.get(LiquidId(0)), Fixed::from_num(10));
        assert_eq!(liquids.total(), Fixed::from_num(10));
    }

    #[test]
    fn test_laser_turret_damages_nearest_enemy() {
        let (content, mut world, mut entities) = setup();
        let turret = TilePos::new(4, 4);
        place(&mut world, &content, "laser", turret);
        world.entity_mut(turret).unwrap().items.as_mut().unwrap().add(ItemId(0), 3);
        let near = Actor::new(
            ActorKind::Unit { unit: UnitTypeId(0), reload: Fixed::ZERO },
            Team::Red,
            TilePos::new(5, 4).world_center(Fixed::from_num(8)),
        )
        .with_health(50);
        let mut far = near.clone();
        let near_id = entities.add(GroupKind::Units(Team::Red), near).unwrap();
        far.position = TilePos::new(7, 7).world_center(Fixed::from_num(8));
        entities.add(GroupKind::Units(Team::Red), far).unwrap();

        tick(&mut world, &content, &mut entities);
        tick(&mut world, &content, &mut entities);

        let units = entities.group(GroupKind::Units(Team::Red));
        assert_eq!(units.get(near_id).unwrap().health, 30);
        assert_eq!(units.actors()[1].health, 50);
        assert_eq!(world.entity(turret).unwrap().items.as_ref().unwrap().get(ItemId(0)), 2);
    }

    #[test]
    fn test_incinerator_takes_one_item_per_tick() {
        let (content, mut world, mut entities) = setup();
        let pos = TilePos::new(0, 0);
        place(&mut world, &content, "incinerator", pos);
        world.entity_mut(pos).unwrap().items.as_mut().unwrap().add(ItemId(0), 2);
        tick(&mut world, &content, &mut entities);
        assert_eq!(world.entity(pos).unwrap().items.as_ref().unwrap().total(), 1);
    }

    #[test]
    fn test_generator_burns_fuel_and_shares_power() {
        let (content, mut world, mut entities) = setup();
        let burner = TilePos::new(2, 2);
        let battery = TilePos::new(2, 3);
        place(&mut world, &content, "burner", burner);
        place(&mut world, &content, "battery", battery);
        world.entity_mut(burner).unwrap().items.as_mut().unwrap().add(ItemId(1), 1);

        tick(&mut world, &content, &mut entities);

        assert_eq!(world.entity(burner).unwrap().items.as_ref().unwrap().total(), 0);
        let stored = world.entity(battery).unwrap().power.unwrap().amount;
        assert_eq!(stored, Fixed::from_num(2));
        assert_eq!(world.entity(burner).unwrap().power.unwrap().amount, Fixed::ZERO);
    }

    #[test]
    fn test_air_never_updates() {
        let (content, mut world, mut entities) = setup();
        assert_eq!(content.block(BlockId::AIR).kind, BlockKind::Air);
        tick(&mut world, &content, &mut entities);
        assert!(entities.is_empty());
    }
}
