//! Mobile actors and the groups they are updated in.
//!
//! Every actor lives in exactly one [`EntityGroup`]. Groups are updated in
//! a fixed order each tick (see [`crate::simulation`]); within a group
//! actors update in insertion order.

use serde::{Deserialize, Serialize};

use crate::content::{ItemId, LiquidId, UnitTypeId};
use crate::error::{GameError, Result};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::team::Team;
use crate::world::TilePos;

/// Actor identifier, unique within a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u32);

/// Items in flight toward a tile. Delivered when the carrying effect expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTransfer {
    /// Item.
    pub item: ItemId,
    /// Count.
    pub amount: i32,
    /// Destination tile.
    pub to: TilePos,
}

/// Per-kind actor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorKind {
    /// Short-lived effect, optionally carrying an item transfer.
    Effect {
        /// Payload.
        transfer: Option<ItemTransfer>,
    },
    /// Decal on the ground.
    GroundEffect,
    /// Combat unit.
    Unit {
        /// Unit type.
        unit: UnitTypeId,
        /// Ticks until the next attack.
        #[serde(with = "fixed_serde")]
        reload: Fixed,
    },
    /// Spilled liquid.
    Puddle {
        /// Liquid.
        liquid: LiquidId,
        /// Remaining amount.
        #[serde(with = "fixed_serde")]
        amount: Fixed,
    },
    /// Protective bubble.
    Shield {
        /// Current radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
    },
    /// Projectile.
    Bullet {
        /// Damage on hit.
        damage: i32,
    },
    /// Fire burning on a tile.
    Fire {
        /// Ticks until the next damage pulse.
        #[serde(with = "fixed_serde")]
        pulse: Fixed,
    },
    /// Connected player.
    Player {
        /// Display name.
        name: String,
    },
}

/// A mobile simulated actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Identifier, assigned on insertion.
    pub id: ActorId,
    /// Owning team.
    pub team: Team,
    /// World position.
    pub position: Vec2Fixed,
    /// World units per tick.
    pub velocity: Vec2Fixed,
    /// Collision radius.
    #[serde(with = "fixed_serde")]
    pub hit_size: Fixed,
    /// Health (ignored for actors that cannot be hit).
    pub health: i32,
    /// Ticks before expiry; zero means unbounded.
    #[serde(with = "fixed_serde")]
    pub lifetime: Fixed,
    /// Ticks alive.
    #[serde(with = "fixed_serde")]
    pub time: Fixed,
    /// Kind-specific state.
    pub kind: ActorKind,
    /// Marked for removal at the end of the current pass.
    pub removed: bool,
}

impl Actor {
    /// New actor at rest.
    #[must_use]
    pub fn new(kind: ActorKind, team: Team, position: Vec2Fixed) -> Self {
        Self {
            id: ActorId(0),
            team,
            position,
            velocity: Vec2Fixed::ZERO,
            hit_size: Fixed::ONE,
            health: 1,
            lifetime: Fixed::ZERO,
            time: Fixed::ZERO,
            kind,
            removed: false,
        }
    }

    /// Set velocity.
    #[must_use]
    pub fn with_velocity(mut self, velocity: Vec2Fixed) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set lifetime.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Fixed) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set health.
    #[must_use]
    pub fn with_health(mut self, health: i32) -> Self {
        self.health = health;
        self
    }

    /// Set collision radius.
    #[must_use]
    pub fn with_hit_size(mut self, hit_size: Fixed) -> Self {
        self.hit_size = hit_size;
        self
    }

    /// Advance age; marks the actor removed when its lifetime runs out.
    /// Returns whether it expired this call.
    pub fn age(&mut self, delta: Fixed) -> bool {
        self.time += delta;
        if self.lifetime > Fixed::ZERO && self.time >= self.lifetime && !self.removed {
            self.removed = true;
            return true;
        }
        false
    }

    /// Move by velocity.
    pub fn step(&mut self, delta: Fixed) {
        self.position += self.velocity.scale(delta);
    }

    /// Whether two actors' collision circles overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.position.within(other.position, self.hit_size + other.hit_size)
    }
}

/// Group identity. Update order is fixed by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    /// Catch-all group. Must stay empty.
    Default,
    /// Visual effects and item transfers.
    Effect,
    /// Ground decals.
    GroundEffect,
    /// Units of one team.
    Units(Team),
    /// Puddles.
    Puddle,
    /// Shields.
    Shield,
    /// Bullets.
    Bullet,
    /// Fires.
    Fire,
    /// Players.
    Player,
}

/// An ordered homogeneous actor collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGroup {
    kind: GroupKind,
    actors: Vec<Actor>,
}

impl EntityGroup {
    fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            actors: Vec::new(),
        }
    }

    /// Which group this is.
    #[must_use]
    pub const fn kind(&self) -> GroupKind {
        self.kind
    }

    /// Number of actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Whether the group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Actors in update order.
    #[must_use]
    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    /// Mutable actors in update order.
    pub fn actors_mut(&mut self) -> &mut [Actor] {
        &mut self.actors
    }

    /// Find an actor.
    #[must_use]
    pub fn get(&self, id: ActorId) -> Option<&Actor> {
        self.actors.iter().find(|actor| actor.id == id)
    }

    /// Find an actor mutably.
    pub fn get_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.iter_mut().find(|actor| actor.id == id)
    }

    /// Drop actors marked removed, returning them in order.
    pub fn prune(&mut self) -> Vec<Actor> {
        let (removed, kept) = std::mem::take(&mut self.actors)
            .into_iter()
            .partition(|actor| actor.removed);
        self.actors = kept;
        removed
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.actors.clear();
    }

    /// Move the actors out for an update pass.
    pub fn take(&mut self) -> Vec<Actor> {
        std::mem::take(&mut self.actors)
    }

    /// Put actors back after an update pass. Actors added during the pass
    /// stay after the original ones.
    pub fn restore(&mut self, mut actors: Vec<Actor>) {
        actors.append(&mut self.actors);
        self.actors = actors;
    }
}

/// Every actor group of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    next_id: u32,
    default: EntityGroup,
    effect: EntityGroup,
    ground_effect: EntityGroup,
    units: Vec<EntityGroup>,
    puddle: EntityGroup,
    shield: EntityGroup,
    bullet: EntityGroup,
    fire: EntityGroup,
    player: EntityGroup,
}

impl Default for Entities {
    fn default() -> Self {
        Self::new()
    }
}

impl Entities {
    /// Empty groups, one unit group per team in registration order.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            default: EntityGroup::new(GroupKind::Default),
            effect: EntityGroup::new(GroupKind::Effect),
            ground_effect: EntityGroup::new(GroupKind::GroundEffect),
            units: Team::ALL
                .into_iter()
                .map(|team| EntityGroup::new(GroupKind::Units(team)))
                .collect(),
            puddle: EntityGroup::new(GroupKind::Puddle),
            shield: EntityGroup::new(GroupKind::Shield),
            bullet: EntityGroup::new(GroupKind::Bullet),
            fire: EntityGroup::new(GroupKind::Fire),
            player: EntityGroup::new(GroupKind::Player),
        }
    }

    /// Insert an actor, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvariantViolation`] for [`GroupKind::Default`].
    pub fn add(&mut self, group: GroupKind, mut actor: Actor) -> Result<ActorId> {
        if group == GroupKind::Default {
            return Err(GameError::InvariantViolation(
                "actors must never be added to the default group".into(),
            ));
        }
        let id = ActorId(self.next_id);
        self.next_id += 1;
        actor.id = id;
        self.group_mut(group).actors.push(actor);
        Ok(id)
    }

    /// A group.
    #[must_use]
    pub fn group(&self, kind: GroupKind) -> &EntityGroup {
        match kind {
            GroupKind::Default => &self.default,
            GroupKind::Effect => &self.effect,
            GroupKind::GroundEffect => &self.ground_effect,
            GroupKind::Units(team) => &self.units[team.index()],
            GroupKind::Puddle => &self.puddle,
            GroupKind::Shield => &self.shield,
            GroupKind::Bullet => &self.bullet,
            GroupKind::Fire => &self.fire,
            GroupKind::Player => &self.player,
        }
    }

    /// A group, mutably.
    pub fn group_mut(&mut self, kind: GroupKind) -> &mut EntityGroup {
        match kind {
            GroupKind::Default => &mut self.default,
            GroupKind::Effect => &mut self.effect,
            GroupKind::GroundEffect => &mut self.ground_effect,
            GroupKind::Units(team) => &mut self.units[team.index()],
            GroupKind::Puddle => &mut self.puddle,
            GroupKind::Shield => &mut self.shield,
            GroupKind::Bullet => &mut self.bullet,
            GroupKind::Fire => &mut self.fire,
            GroupKind::Player => &mut self.player,
        }
    }

    /// Unit groups in registration order.
    pub fn unit_groups(&self) -> impl Iterator<Item = &EntityGroup> {
        self.units.iter()
    }

    /// Teams that currently have units.
    pub fn teams_with_units(&self) -> impl Iterator<Item = Team> + '_ {
        Team::ALL
            .into_iter()
            .filter(|team| !self.units[team.index()].is_empty())
    }

    /// Total actors across every group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.all_groups().map(EntityGroup::len).sum()
    }

    /// Whether there are no actors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn all_groups(&self) -> impl Iterator<Item = &EntityGroup> {
        [
            &self.default,
            &self.effect,
            &self.ground_effect,
            &self.puddle,
            &self.shield,
            &self.bullet,
            &self.fire,
            &self.player,
        ]
        .into_iter()
        .chain(self.units.iter())
    }

    /// Fail if anything reached the default group.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvariantViolation`] if it is not empty.
    pub fn verify(&self) -> Result<()> {
        if self.default.is_empty() {
            Ok(())
        } else {
            Err(GameError::InvariantViolation(format!(
                "{} actors found in the default group",
                self.default.len()
            )))
        }
    }

    /// Remove every actor (reset).
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
