//! Actor group systems.
//!
//! One function per group, called by the scheduler in its fixed order,
//! followed by the collision passes. Systems mark actors `removed`; the
//! scheduler prunes groups once collisions have run so hit detection never
//! sees half-removed state.
//!
//! Buildings damaged to zero health are reported back as positions; the
//! scheduler owns block removal because it also maintains team cores and
//! the pathfinder.

use crate::content::ContentCatalog;
use crate::entities::{ActorKind, Entities, GroupKind};
use crate::events::GameEvent;
use crate::math::{Fixed, Vec2Fixed};
use crate::pathfinding::Pathfinder;
use crate::team::Team;
use crate::world::{TilePos, World};

/// Puddle amount lost per tick.
pub fn puddle_evaporation() -> Fixed {
    Fixed::from_num(0.05)
}

/// Shield radius lost per tick.
pub fn shield_decay() -> Fixed {
    Fixed::from_num(0.1)
}

/// Ticks between fire damage pulses.
pub const FIRE_PULSE: i32 = 40;

/// Damage per fire pulse.
pub const FIRE_DAMAGE: i32 = 4;

fn damage_building(world: &mut World, pos: TilePos, damage: i32, destroyed: &mut Vec<TilePos>) {
    if let Some(entity) = world.entity_mut(pos) {
        let was_alive = entity.health > 0;
        entity.health -= damage;
        if was_alive && entity.health <= 0 {
            destroyed.push(pos);
        }
    }
}

/// Age effects and deliver item transfers that arrive.
///
/// A transfer whose destination no longer holds items is lost.
pub fn effect_system(entities: &mut Entities, world: &mut World, group: GroupKind, delta: Fixed) {
    for actor in entities.group_mut(group).actors_mut() {
        actor.step(delta);
        if !actor.age(delta) {
            continue;
        }
        if let ActorKind::Effect {
            transfer: Some(transfer),
        } = &actor.kind
        {
            if let Some(items) = world.entity_mut(transfer.to).and_then(|e| e.items.as_mut()) {
                items.add(transfer.item, transfer.amount);
            }
        }
    }
    entities.group_mut(group).prune();
}

/// Move one team's units along its flow field and attack enemy buildings
/// in their way. Returns buildings destroyed.
pub fn unit_system(
    entities: &mut Entities,
    team: Team,
    world: &mut World,
    content: &ContentCatalog,
    pathfinder: &Pathfinder,
    tile_size: Fixed,
    delta: Fixed,
) -> Vec<TilePos> {
    let mut destroyed = Vec::new();
    for actor in entities.group_mut(GroupKind::Units(team)).actors_mut() {
        let ActorKind::Unit { unit, reload } = &mut actor.kind else {
            continue;
        };
        let unit = content.unit(*unit);
        *reload = (*reload - delta).max(Fixed::ZERO);

        let Some(here) = TilePos::from_world(actor.position, tile_size) else {
            actor.velocity = Vec2Fixed::ZERO;
            continue;
        };
        let Some(next) = pathfinder.next_tile(world, team, here) else {
            actor.velocity = Vec2Fixed::ZERO;
            continue;
        };
        let target = next.world_center(tile_size);
        let hostile = world
            .tile(next)
            .is_some_and(|tile| tile.entity.is_some() && tile.team.is_enemy(team));

        if hostile && actor.position.within(target, unit.range.max(tile_size)) {
            actor.velocity = Vec2Fixed::ZERO;
            if *reload == Fixed::ZERO {
                damage_building(world, next, unit.damage, &mut destroyed);
                *reload = unit.reload;
            }
            continue;
        }

        let speed_multiplier = world
            .tile(here)
            .and_then(|tile| content.block(tile.floor).floor())
            .map_or(Fixed::ONE, |floor| floor.speed_multiplier);
        let step = unit.speed * speed_multiplier * delta;
        let offset = target - actor.position;
        if offset.length() <= step {
            actor.velocity = Vec2Fixed::ZERO;
            actor.position = target;
        } else {
            actor.velocity = offset.normalize().scale(unit.speed * speed_multiplier);
            actor.step(delta);
        }
    }
    destroyed
}

/// Evaporate puddles.
pub fn puddle_system(entities: &mut Entities, delta: Fixed) {
    for actor in entities.group_mut(GroupKind::Puddle).actors_mut() {
        if let ActorKind::Puddle { amount, .. } = &mut actor.kind {
            *amount -= puddle_evaporation() * delta;
            if *amount <= Fixed::ZERO {
                actor.removed = true;
            }
        }
    }
    entities.group_mut(GroupKind::Puddle).prune();
}

/// Shrink shields.
pub fn shield_system(entities: &mut Entities, delta: Fixed) {
    for actor in entities.group_mut(GroupKind::Shield).actors_mut() {
        actor.age(delta);
        if let ActorKind::Shield { radius } = &mut actor.kind {
            *radius -= shield_decay() * delta;
            if *radius <= Fixed::ZERO {
                actor.removed = true;
            }
        }
    }
    entities.group_mut(GroupKind::Shield).prune();
}

/// Fly bullets. Bullets leaving the map expire; bullets entering a solid
/// hostile building damage it and are consumed. Returns buildings destroyed.
pub fn bullet_system(
    entities: &mut Entities,
    world: &mut World,
    content: &ContentCatalog,
    tile_size: Fixed,
    delta: Fixed,
) -> Vec<TilePos> {
    let mut destroyed = Vec::new();
    for actor in entities.group_mut(GroupKind::Bullet).actors_mut() {
        if actor.removed {
            continue;
        }
        actor.step(delta);
        actor.age(delta);
        let Some(pos) = TilePos::from_world(actor.position, tile_size).filter(|&p| world.contains(p)) else {
            actor.removed = true;
            continue;
        };
        let ActorKind::Bullet { damage } = actor.kind else {
            continue;
        };
        let hit = world.tile(pos).is_some_and(|tile| {
            tile.entity.is_some() && tile.team.is_enemy(actor.team) && content.block(tile.block).solid
        });
        if hit {
            damage_building(world, pos, damage, &mut destroyed);
            actor.removed = true;
        }
    }
    destroyed
}

/// Burn the building under each fire. Returns buildings destroyed.
pub fn fire_system(entities: &mut Entities, world: &mut World, tile_size: Fixed, delta: Fixed) -> Vec<TilePos> {
    let mut destroyed = Vec::new();
    for actor in entities.group_mut(GroupKind::Fire).actors_mut() {
        actor.age(delta);
        let ActorKind::Fire { pulse } = &mut actor.kind else {
            continue;
        };
        *pulse -= delta;
        if *pulse > Fixed::ZERO {
            continue;
        }
        *pulse = Fixed::from_num(FIRE_PULSE);
        if let Some(pos) = TilePos::from_world(actor.position, tile_size) {
            damage_building(world, pos, FIRE_DAMAGE, &mut destroyed);
        }
    }
    entities.group_mut(GroupKind::Fire).prune();
    destroyed
}

/// Move players, keeping them inside the map.
pub fn player_system(entities: &mut Entities, world: &World, tile_size: Fixed, delta: Fixed) {
    let max_x = Fixed::from_num(world.width().saturating_sub(1)) * tile_size;
    let max_y = Fixed::from_num(world.height().saturating_sub(1)) * tile_size;
    for actor in entities.group_mut(GroupKind::Player).actors_mut() {
        actor.step(delta);
        actor.position.x = actor.position.x.clamp(Fixed::ZERO, max_x.max(Fixed::ZERO));
        actor.position.y = actor.position.y.clamp(Fixed::ZERO, max_y.max(Fixed::ZERO));
    }
}

/// Resolve bullets against one target group: a hostile bullet overlapping
/// a target damages it and is consumed.
pub fn collide_bullets(entities: &mut Entities, target: GroupKind) {
    if entities.group(target).is_empty() {
        return;
    }
    let mut bullets = entities.group_mut(GroupKind::Bullet).take();
    let targets = entities.group_mut(target);
    for bullet in bullets.iter_mut().filter(|b| !b.removed) {
        let ActorKind::Bullet { damage } = bullet.kind else {
            continue;
        };
        let hit = targets
            .actors_mut()
            .iter_mut()
            .find(|t| !t.removed && t.health > 0 && t.team.is_enemy(bullet.team) && bullet.overlaps(t));
        if let Some(hit) = hit {
            hit.health -= damage;
            bullet.removed = true;
        }
    }
    entities.group_mut(GroupKind::Bullet).restore(bullets);
}

/// Push overlapping players apart.
pub fn separate_players(entities: &mut Entities) {
    let players = entities.group_mut(GroupKind::Player).actors_mut();
    for i in 0..players.len() {
        for j in (i + 1)..players.len() {
            let (left, right) = players.split_at_mut(j);
            let (a, b) = (&mut left[i], &mut right[0]);
            if !a.overlaps(b) {
                continue;
            }
            let offset = b.position - a.position;
            let distance = offset.length();
            let direction = if distance == Fixed::ZERO {
                Vec2Fixed::new(Fixed::ONE, Fixed::ZERO)
            } else {
                offset.normalize()
            };
            let push = (a.hit_size + b.hit_size - distance) / 2;
            b.position += direction.scale(push);
            a.position = a.position - direction.scale(push);
        }
    }
}

/// Remove dead units and spent bullets. Returns a death event per unit.
pub fn reap(entities: &mut Entities) -> Vec<GameEvent> {
    let mut events = Vec::new();
    for team in Team::ALL {
        let group = entities.group_mut(GroupKind::Units(team));
        for actor in group.actors_mut() {
            if actor.health <= 0 {
                actor.removed = true;
            }
        }
        for actor in group.prune() {
            if let ActorKind::Unit { unit, .. } = actor.kind {
                events.push(GameEvent::UnitDeath { unit, team });
            }
        }
    }
    entities.group_mut(GroupKind::Bullet).prune();
    let players = entities.group_mut(GroupKind::Player);
    for actor in players.actors_mut() {
        actor.health = actor.health.max(0);
    }
    players.prune();
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ItemId, UnitTypeId};
    use crate::entities::{Actor, ItemTransfer};
    use crate::team::Teams;

    const CATALOG: &str = r#"(
        items: [(name: "copper")],
        units: [(name: "dagger", health: 20, speed: 1.0, hit_size: 2.0, damage: 15, range: 4.0, reload: 10.0)],
        blocks: [
            (name: "stone", kind: Floor(deep: false)),
            (name: "core", kind: Core, health: 100, solid: true, item_capacity: 100),
            (name: "wall", kind: Wall, health: 30, solid: true),
        ],
    )"#;

    fn tile_size() -> Fixed {
        Fixed::from_num(8)
    }

    fn setup() -> (ContentCatalog, World) {
        let content = ContentCatalog::from_ron_str(CATALOG, "inline").unwrap();
        let world = World::new(6, 3, content.block_by_name("stone").unwrap());
        (content, world)
    }

    fn place(world: &mut World, content: &ContentCatalog, name: &str, pos: TilePos, team: Team) {
        let block = content.block(content.block_by_name(name).unwrap());
        world.set_block(pos, block, team, content).unwrap();
    }

    fn unit_at(pos: TilePos, team: Team) -> Actor {
        Actor::new(
            ActorKind::Unit {
                unit: UnitTypeId(0),
                reload: Fixed::ZERO,
            },
            team,
            pos.world_center(tile_size()),
        )
        .with_health(20)
        .with_hit_size(Fixed::from_num(2))
    }

    #[test]
    fn test_transfer_delivered_on_expiry() {
        let (content, mut world) = setup();
        let core = TilePos::new(1, 1);
        place(&mut world, &content, "core", core, Team::Blue);
        let mut entities = Entities::new();
        let transfer = ItemTransfer {
            item: ItemId(0),
            amount: 3,
            to: core,
        };
        let effect = Actor::new(ActorKind::Effect { transfer: Some(transfer) }, Team::Blue, Vec2Fixed::ZERO)
            .with_lifetime(Fixed::from_num(2));
        entities.add(GroupKind::Effect, effect).unwrap();

        effect_system(&mut entities, &mut world, GroupKind::Effect, Fixed::ONE);
        assert_eq!(world.entity(core).unwrap().items.as_ref().unwrap().total(), 0);
        effect_system(&mut entities, &mut world, GroupKind::Effect, Fixed::ONE);
        assert_eq!(world.entity(core).unwrap().items.as_ref().unwrap().get(ItemId(0)), 3);
        assert!(entities.group(GroupKind::Effect).is_empty());
    }

    #[test]
    fn test_units_walk_to_and_attack_core() {
        let (content, mut world) = setup();
        let core = TilePos::new(5, 1);
        place(&mut world, &content, "core", core, Team::Blue);
        let mut teams = Teams::new();
        teams.add_core(Team::Blue, core);
        let mut pathfinder = Pathfinder::new();
        pathfinder.update(&world, &content, &teams, [Team::Red], 1000);

        let mut entities = Entities::new();
        entities.add(GroupKind::Units(Team::Red), unit_at(TilePos::new(0, 1), Team::Red)).unwrap();

        let mut destroyed = Vec::new();
        for _ in 0..200 {
            destroyed.extend(unit_system(
                &mut entities,
                Team::Red,
                &mut world,
                &content,
                &pathfinder,
                tile_size(),
                Fixed::ONE,
            ));
        }

        assert_eq!(destroyed, vec![core]);
        let unit = &entities.group(GroupKind::Units(Team::Red)).actors()[0];
        assert_eq!(TilePos::from_world(unit.position, tile_size()), Some(TilePos::new(4, 1)));
    }

    #[test]
    fn test_bullet_hits_enemy_wall_and_leaves_map() {
        let (content, mut world) = setup();
        let wall = TilePos::new(2, 1);
        place(&mut world, &content, "wall", wall, Team::Red);
        let mut entities = Entities::new();
        let speed = Vec2Fixed::new(Fixed::from_num(8), Fixed::ZERO);
        let towards_wall = Actor::new(ActorKind::Bullet { damage: 10 }, Team::Blue, TilePos::new(1, 1).world_center(tile_size()))
            .with_velocity(speed);
        let outward = Actor::new(ActorKind::Bullet { damage: 10 }, Team::Blue, TilePos::new(5, 0).world_center(tile_size()))
            .with_velocity(speed);
        entities.add(GroupKind::Bullet, towards_wall).unwrap();
        entities.add(GroupKind::Bullet, outward).unwrap();

        bullet_system(&mut entities, &mut world, &content, tile_size(), Fixed::ONE);
        assert_eq!(world.entity(wall).unwrap().health, 20);
        assert!(entities.group(GroupKind::Bullet).actors().iter().all(|b| b.removed));
        reap(&mut entities);
        assert!(entities.group(GroupKind::Bullet).is_empty());
    }

    #[test]
    fn test_collision_consumes_bullet_and_reaps_unit() {
        let mut entities = Entities::new();
        let pos = TilePos::new(1, 1);
        entities.add(GroupKind::Units(Team::Red), unit_at(pos, Team::Red)).unwrap();
        for _ in 0..3 {
            let bullet = Actor::new(ActorKind::Bullet { damage: 10 }, Team::Blue, pos.world_center(tile_size()));
            entities.add(GroupKind::Bullet, bullet).unwrap();
        }
        let friendly = Actor::new(ActorKind::Bullet { damage: 10 }, Team::Red, pos.world_center(tile_size()));
        entities.add(GroupKind::Bullet, friendly).unwrap();

        collide_bullets(&mut entities, GroupKind::Units(Team::Red));
        let events = reap(&mut entities);

        assert_eq!(
            events,
            vec![GameEvent::UnitDeath {
                unit: UnitTypeId(0),
                team: Team::Red
            }]
        );
        // Two bullets kill the unit; the third and the friendly one remain.
        assert_eq!(entities.group(GroupKind::Bullet).len(), 2);
    }

    #[test]
    fn test_fire_pulses_damage() {
        let (content, mut world) = setup();
        let wall = TilePos::new(3, 1);
        place(&mut world, &content, "wall", wall, Team::Blue);
        let mut entities = Entities::new();
        let fire = Actor::new(ActorKind::Fire { pulse: Fixed::ONE }, Team::Derelict, wall.world_center(tile_size()))
            .with_lifetime(Fixed::from_num(100));
        entities.add(GroupKind::Fire, fire).unwrap();

        fire_system(&mut entities, &mut world, tile_size(), Fixed::ONE);
        assert_eq!(world.entity(wall).unwrap().health, 30 - FIRE_DAMAGE);
        fire_system(&mut entities, &mut world, tile_size(), Fixed::ONE);
        assert_eq!(world.entity(wall).unwrap().health, 30 - FIRE_DAMAGE);
    }

    #[test]
    fn test_puddles_evaporate_and_players_separate() {
        let (_, world) = setup();
        let mut entities = Entities::new();
        let puddle = Actor::new(
            ActorKind::Puddle {
                liquid: crate::content::LiquidId(0),
                amount: Fixed::from_num(0.1),
            },
            Team::Derelict,
            Vec2Fixed::ZERO,
        );
        entities.add(GroupKind::Puddle, puddle).unwrap();
        puddle_system(&mut entities, Fixed::ONE);
        assert_eq!(entities.group(GroupKind::Puddle).len(), 1);
        puddle_system(&mut entities, Fixed::ONE);
        assert!(entities.group(GroupKind::Puddle).is_empty());

        let center = TilePos::new(2, 1).world_center(tile_size());
        for _ in 0..2 {
            let player = Actor::new(ActorKind::Player { name: "p".into() }, Team::Blue, center)
                .with_hit_size(Fixed::from_num(2));
            entities.add(GroupKind::Player, player).unwrap();
        }
        separate_players(&mut entities);
        player_system(&mut entities, &world, tile_size(), Fixed::ONE);
        let players = entities.group(GroupKind::Player).actors();
        assert_eq!(players[1].position.x - players[0].position.x, Fixed::from_num(4));
    }
}
