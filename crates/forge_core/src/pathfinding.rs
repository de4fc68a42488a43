//! Per-team flow fields over the tile arena.
//!
//! Each team that has units gets a Dijkstra distance field seeded from
//! every enemy core. Fields are rebuilt incrementally: each tick relaxes at
//! most `budget` cells in total, so a large map settles over several ticks
//! instead of stalling one. Any tile change invalidates every field.
//!
//! Costs:
//! - deep floor, or a solid building of the moving team: impassable
//! - enemy building: [`ENEMY_BUILDING_COST`] (units path into it and attack)
//! - anything else: 1
//!
//! All arithmetic is integer, and ties are broken by tile index, so every
//! peer computes identical fields.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use serde::{Deserialize, Serialize};

use crate::content::ContentCatalog;
use crate::team::{Team, Teams};
use crate::world::{TilePos, World};

/// Cost of moving through an enemy building.
pub const ENEMY_BUILDING_COST: u32 = 70;

/// Marker for cells not yet reached.
const UNREACHED: u32 = u32::MAX;

/// Cost of entering a tile for `team`, or `None` if impassable.
#[must_use]
pub fn tile_cost(world: &World, content: &ContentCatalog, team: Team, pos: TilePos) -> Option<u32> {
    let tile = world.tile(pos)?;
    if content.block(tile.floor).floor().is_some_and(|floor| floor.deep) {
        return None;
    }
    let block = content.block(tile.block);
    if !block.has_entity() {
        return Some(1);
    }
    if tile.team.is_enemy(team) {
        Some(ENEMY_BUILDING_COST)
    } else if block.solid {
        None
    } else {
        Some(1)
    }
}

/// Frontier entry. Min-heap on cost, then tile index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FrontierNode {
    cost: u32,
    index: u32,
}

impl Ord for FrontierNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for lowest cost first.
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for FrontierNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Distance field toward one team's targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowField {
    weights: Vec<u32>,
    frontier: Vec<FrontierNode>,
    complete: bool,
}

impl FlowField {
    fn seeded(world: &World, teams: &Teams, team: Team) -> Self {
        let mut weights = vec![UNREACHED; world.len()];
        let mut frontier = BinaryHeap::new();
        for enemy in Team::ALL.into_iter().filter(|&other| team.is_enemy(other)) {
            for &core in &teams.get(enemy).cores {
                if let Some(index) = world.index_of(core) {
                    weights[index] = 0;
                    frontier.push(FrontierNode {
                        cost: 0,
                        index: index_u32(index),
                    });
                }
            }
        }
        Self {
            weights,
            frontier: frontier.into_vec(),
            complete: false,
        }
    }

    /// Whether the field has fully settled.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Distance from a tile to the nearest target, if reached yet.
    #[must_use]
    pub fn weight(&self, world: &World, pos: TilePos) -> Option<u32> {
        let weight = *self.weights.get(world.index_of(pos)?)?;
        (weight != UNREACHED).then_some(weight)
    }

    /// Relax up to `budget` cells. Returns the number relaxed.
    fn relax(&mut self, world: &World, content: &ContentCatalog, team: Team, budget: usize) -> usize {
        let mut frontier = BinaryHeap::from(std::mem::take(&mut self.frontier));
        let mut relaxed = 0;
        while relaxed < budget {
            let Some(node) = frontier.pop() else {
                self.complete = true;
                break;
            };
            relaxed += 1;
            if node.cost > self.weights[node.index as usize] {
                continue;
            }
            let pos = world.pos_of(node.index as usize);
            for next in world.neighbours(pos) {
                let Some(step) = tile_cost(world, content, team, next) else {
                    continue;
                };
                let Some(index) = world.index_of(next) else {
                    continue;
                };
                let cost = node.cost.saturating_add(step);
                if cost < self.weights[index] {
                    self.weights[index] = cost;
                    frontier.push(FrontierNode {
                        cost,
                        index: index_u32(index),
                    });
                }
            }
        }
        if frontier.is_empty() {
            self.complete = true;
        }
        self.frontier = frontier.into_vec();
        relaxed
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn index_u32(index: usize) -> u32 {
    index as u32
}

/// Flow fields for every team that needs one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pathfinder {
    fields: BTreeMap<Team, FlowField>,
    dirty: bool,
}

impl Pathfinder {
    /// No fields yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every field; they are reseeded on the next update.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Forget everything (reset).
    pub fn clear(&mut self) {
        self.fields.clear();
        self.dirty = false;
    }

    /// Per-tick maintenance: reseed invalidated fields, ensure a field for
    /// each team in `teams_needing`, and relax within `budget`.
    pub fn update(
        &mut self,
        world: &World,
        content: &ContentCatalog,
        teams: &Teams,
        teams_needing: impl IntoIterator<Item = Team>,
        budget: usize,
    ) {
        if self.dirty {
            for (team, field) in &mut self.fields {
                *field = FlowField::seeded(world, teams, *team);
            }
            self.dirty = false;
        }
        for team in teams_needing {
            self.fields
                .entry(team)
                .or_insert_with(|| FlowField::seeded(world, teams, team));
        }

        let mut remaining = budget;
        for (team, field) in &mut self.fields {
            if remaining == 0 {
                break;
            }
            if !field.complete {
                remaining -= field.relax(world, content, *team, remaining);
            }
        }
    }

    /// Field of one team.
    #[must_use]
    pub fn field(&self, team: Team) -> Option<&FlowField> {
        self.fields.get(&team)
    }

    /// Next tile to step onto from `pos`, or `None` if no neighbour is
    /// closer to a target (or no field exists yet).
    #[must_use]
    pub fn next_tile(&self, world: &World, team: Team, pos: TilePos) -> Option<TilePos> {
        let field = self.fields.get(&team)?;
        let here = field.weight(world, pos).unwrap_or(UNREACHED);
        let mut best: Option<(u32, TilePos)> = None;
        for next in world.neighbours(pos) {
            let Some(weight) = field.weight(world, next) else {
                continue;
            };
            if weight < here && best.map_or(true, |(w, _)| weight < w) {
                best = Some((weight, next));
            }
        }
        best.map(|(_, next)| next)
    }
}
