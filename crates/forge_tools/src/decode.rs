//! Human-readable dumps of snapshots and module chunks.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use forge_core::config::SimConfig;
use forge_core::content::ContentCatalog;
use forge_core::error::Result;
use forge_core::math::Fixed;
use forge_core::modules::{ItemModule, LiquidModule};
use forge_core::save::{decode_tile_modules, ModuleRecord};
use forge_core::simulation::Simulation;
use forge_core::state::{GameMode, State};
use forge_core::team::Team;
use forge_core::world::TilePos;
use serde::Serialize;

/// One building's stored resources, by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingDump {
    /// Tile x.
    pub x: u16,
    /// Tile y.
    pub y: u16,
    /// Block name, when the layout is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    /// Item counts.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub items: BTreeMap<String, i32>,
    /// Liquid amounts.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub liquids: BTreeMap<String, f64>,
    /// Buffered power.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
}

/// Summary of a full simulation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDump {
    /// Tick the snapshot was taken at.
    pub tick: u64,
    /// Match phase.
    pub state: State,
    /// Rules preset.
    pub mode: GameMode,
    /// Next wave.
    pub wave: u32,
    /// Ticks until the next wave.
    pub wavetime: f64,
    /// Whether the match ended.
    pub game_over: bool,
    /// Winner, if ended.
    pub winner: Option<Team>,
    /// Map size.
    pub size: (u16, u16),
    /// Live actors (units, bullets, fires, ...).
    pub actors: usize,
    /// Buildings in update order.
    pub buildings: Vec<BuildingDump>,
}

fn item_names(content: &ContentCatalog, items: Option<&ItemModule>) -> BTreeMap<String, i32> {
    items
        .map(|module| {
            module
                .iter()
                .map(|(item, amount)| (content.item(item).name.clone(), amount))
                .collect()
        })
        .unwrap_or_default()
}

fn liquid_names(content: &ContentCatalog, liquids: Option<&LiquidModule>) -> BTreeMap<String, f64> {
    liquids
        .map(|module| {
            module
                .iter()
                .map(|(liquid, amount)| (content.liquid(liquid).name.clone(), amount.to_num::<f64>()))
                .collect()
        })
        .unwrap_or_default()
}

fn building(
    content: &ContentCatalog,
    pos: TilePos,
    block: Option<String>,
    items: Option<&ItemModule>,
    liquids: Option<&LiquidModule>,
    power: Option<Fixed>,
) -> BuildingDump {
    BuildingDump {
        x: pos.x,
        y: pos.y,
        block,
        items: item_names(content, items),
        liquids: liquid_names(content, liquids),
        power: power.map(Fixed::to_num::<f64>),
    }
}

/// Decode a module chunk against a catalog.
///
/// # Errors
///
/// Returns [`forge_core::error::GameError::Corruption`] on a malformed chunk.
pub fn decode_modules(bytes: &[u8], content: &ContentCatalog) -> Result<Vec<BuildingDump>> {
    let records = decode_tile_modules(&mut &bytes[..], content.items().len(), content.liquids().len())?;
    Ok(records
        .iter()
        .map(|ModuleRecord { pos, items, liquids, power }| {
            building(content, *pos, None, items.as_ref(), liquids.as_ref(), *power)
        })
        .collect())
}

/// Decode a full snapshot against a catalog.
///
/// # Errors
///
/// Returns [`forge_core::error::GameError::Corruption`] on a malformed
/// snapshot.
pub fn decode_snapshot(bytes: &[u8], content: Arc<ContentCatalog>) -> Result<SnapshotDump> {
    let mut sim = Simulation::new(SimConfig::default(), Arc::clone(&content))?;
    sim.restore(bytes)?;

    let world = sim.world();
    let buildings = world
        .entity_positions()
        .iter()
        .filter_map(|&pos| {
            let tile = world.tile(pos)?;
            let entity = tile.entity.as_ref()?;
            Some(building(
                &content,
                pos,
                Some(content.block(tile.block).name.clone()),
                entity.items.as_ref(),
                entity.liquids.as_ref(),
                entity.power.map(|power| power.amount),
            ))
        })
        .collect();

    let state = sim.state();
    Ok(SnapshotDump {
        tick: sim.tick(),
        state: state.state(),
        mode: state.mode,
        wave: state.wave,
        wavetime: state.wavetime.to_num::<f64>(),
        game_over: state.game_over,
        winner: state.winner,
        size: (world.width(), world.height()),
        actors: sim.entities().len(),
        buildings,
    })
}

/// Read a file and decode it as a snapshot or a module chunk.
///
/// # Errors
///
/// Returns an error if either file cannot be read or parsed.
pub fn decode_file(path: &Path, catalog: &Path, modules_only: bool) -> Result<serde_json::Value> {
    let content = Arc::new(ContentCatalog::load(catalog)?);
    let bytes = std::fs::read(path)?;
    let value = if modules_only {
        serde_json::to_value(decode_modules(&bytes, &content)?)
    } else {
        serde_json::to_value(decode_snapshot(&bytes, content)?)
    };
    value.map_err(|e| forge_core::error::GameError::InvariantViolation(format!("dump not serializable: {e}")))
}
