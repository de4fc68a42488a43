//! Test fixtures and helpers.
//!
//! Pre-built catalogs, maps and simulations for consistent testing.

use std::sync::Arc;

use fixed::types::I32F32;
use forge_core::config::SimConfig;
use forge_core::content::{BlockId, ContentCatalog, ItemId, ItemStack};
use forge_core::sector::{Mission, MissionKind, Sector};
use forge_core::simulation::Simulation;
use forge_core::state::GameMode;
use forge_core::team::Team;
use forge_core::world::{TilePos, World};

/// The default catalog shipped with the workspace.
pub const CONTENT_RON: &str = include_str!("../../../data/content.ron");

/// Width of the battle map.
pub const MAP_WIDTH: u16 = 32;

/// Height of the battle map.
pub const MAP_HEIGHT: u16 = 16;

/// Default team core on the battle map.
pub const PLAYER_CORE: TilePos = TilePos::new(4, 8);

/// Wave spawn on the battle map.
pub const ENEMY_SPAWN: TilePos = TilePos::new(28, 8);

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// The default catalog.
///
/// # Panics
///
/// Panics if the shipped catalog does not parse.
#[must_use]
pub fn content() -> Arc<ContentCatalog> {
    Arc::new(ContentCatalog::from_ron_str(CONTENT_RON, "data/content.ron").expect("default catalog parses"))
}

/// Look up a block by name.
///
/// # Panics
///
/// Panics if the block is not in the catalog.
#[must_use]
pub fn block(content: &ContentCatalog, name: &str) -> BlockId {
    content
        .block_by_name(name)
        .unwrap_or_else(|| panic!("block '{name}' missing from catalog"))
}

/// Look up an item by name.
///
/// # Panics
///
/// Panics if the item is not in the catalog.
#[must_use]
pub fn item(content: &ContentCatalog, name: &str) -> ItemId {
    content
        .item_by_name(name)
        .unwrap_or_else(|| panic!("item '{name}' missing from catalog"))
}

/// An empty stone map with a single enemy spawn and a strip of shallow
/// water for pumps.
///
/// # Panics
///
/// Panics if the catalog lacks the floors.
#[must_use]
pub fn battle_world(content: &ContentCatalog) -> World {
    let mut world = World::new(MAP_WIDTH, MAP_HEIGHT, block(content, "stone"));
    let water = block(content, "shallow-water");
    for y in 0..MAP_HEIGHT {
        world.set_floor(TilePos::new(10, y), water).expect("in bounds");
    }
    world.add_spawn(ENEMY_SPAWN).expect("in bounds");
    world
}

/// A simulation on the battle map with a player base:
///
/// - core at [`PLAYER_CORE`]
/// - silicon smelter next to the core, powered by a combustion generator
/// - a duo turret
/// - a pump on the water strip
///
/// Events fired while building are drained.
///
/// # Panics
///
/// Panics if the base cannot be built.
#[must_use]
pub fn battle_sim(config: SimConfig) -> Simulation {
    let content = content();
    let mut sim = Simulation::new(config, Arc::clone(&content)).expect("core calls register");
    sim.load_world(battle_world(&content));

    let base = [
        (PLAYER_CORE, "core-shard"),
        (TilePos::new(5, 8), "silicon-smelter"),
        (TilePos::new(5, 9), "combustion-generator"),
        (TilePos::new(6, 7), "duo"),
        (TilePos::new(10, 8), "mechanical-pump"),
    ];
    for (pos, name) in base {
        sim.place_block(pos, block(&content, name), Team::DEFAULT)
            .unwrap_or_else(|e| panic!("placing {name}: {e}"));
    }
    sim.drain_events();
    sim
}

/// Items the sector adds to the core on play.
#[must_use]
pub fn starting_items(content: &ContentCatalog) -> Vec<ItemStack> {
    vec![
        ItemStack::new(item(content, "copper"), 200),
        ItemStack::new(item(content, "coal"), 50),
    ]
}

/// A sector asking to survive to wave 3, then build a copper wall.
#[must_use]
pub fn campaign_sector(content: &ContentCatalog) -> Sector {
    let mut sector = Sector::new(
        2,
        -1,
        vec![
            Mission::new(MissionKind::Waves { target: 3 }, GameMode::Waves),
            Mission::new(
                MissionKind::Block {
                    block: block(content, "copper-wall"),
                },
                GameMode::Waves,
            ),
        ],
    );
    sector.starting_items = starting_items(content);
    sector
}
