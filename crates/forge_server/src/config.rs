//! Server configuration.
//!
//! Loaded from a RON file; every field has a default so a partial file
//! (or none at all) is valid.

use std::path::{Path, PathBuf};

use forge_core::config::SimConfig;
use forge_core::content::ContentCatalog;
use forge_core::simulation::TICK_RATE;
use forge_core::team::Team;
use forge_core::world::{TilePos, World};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

fn default_address() -> String {
    "0.0.0.0".into()
}

const fn default_port() -> u16 {
    7777
}

const fn default_max_players() -> u8 {
    8
}

const fn default_tick_rate() -> u32 {
    TICK_RATE
}

fn default_content() -> PathBuf {
    PathBuf::from("data/content.ron")
}

/// Dedicated server settings.
///
/// # Example RON
///
/// ```ron
/// ServerConfig(
///     port: 7777,
///     max_players: 4,
///     content: "data/content.ron",
///     map: (width: 64, height: 32, floor: "stone", spawns: [(60, 16)]),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_address")]
    pub address: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum connected players.
    #[serde(default = "default_max_players")]
    pub max_players: u8,
    /// Ticks per second (should match clients).
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// Content catalog file.
    #[serde(default = "default_content")]
    pub content: PathBuf,
    /// Simulation settings. `net_mode` is forced to `Server`.
    #[serde(default = "SimConfig::server")]
    pub sim: SimConfig,
    /// Map to host.
    #[serde(default)]
    pub map: MapConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            max_players: default_max_players(),
            tick_rate: default_tick_rate(),
            content: default_content(),
            sim: SimConfig::server(),
            map: MapConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse RON.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] on malformed input.
    pub fn from_ron_str(source: &str, origin: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| ServerError::Config {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Load a RON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_ron_str(&source, &path.display().to_string())
    }

    /// `address:port`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A block placed when the map loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedBlock {
    /// Tile x.
    pub x: u16,
    /// Tile y.
    pub y: u16,
    /// Block name.
    pub block: String,
    /// Owner.
    #[serde(default)]
    pub team: Team,
}

/// Map description: a flat floor, wave spawns and starting buildings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Width in tiles.
    pub width: u16,
    /// Height in tiles.
    pub height: u16,
    /// Floor name covering the whole map.
    pub floor: String,
    /// Wave spawn tiles.
    #[serde(default)]
    pub spawns: Vec<(u16, u16)>,
    /// Buildings present at load.
    #[serde(default)]
    pub blocks: Vec<PlacedBlock>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 32,
            floor: "stone".into(),
            spawns: vec![(60, 16)],
            blocks: vec![PlacedBlock {
                x: 4,
                y: 16,
                block: "core-shard".into(),
                team: Team::DEFAULT,
            }],
        }
    }
}

impl MapConfig {
    /// Build the world against a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownMapContent`] for names missing from
    /// the catalog, or a game error for positions outside the map.
    pub fn build(&self, content: &ContentCatalog) -> Result<World> {
        let floor = content
            .block_by_name(&self.floor)
            .filter(|&id| content.block(id).floor().is_some())
            .ok_or_else(|| ServerError::UnknownMapContent {
                kind: "floor",
                name: self.floor.clone(),
            })?;

        let mut world = World::new(self.width, self.height, floor);
        for &(x, y) in &self.spawns {
            world.add_spawn(TilePos::new(x, y))?;
        }
        for placed in &self.blocks {
            let id = content
                .block_by_name(&placed.block)
                .filter(|&id| content.block(id).floor().is_none())
                .ok_or_else(|| ServerError::UnknownMapContent {
                    kind: "block",
                    name: placed.block.clone(),
                })?;
            world.set_block(
                TilePos::new(placed.x, placed.y),
                content.block(id),
                placed.team,
                content,
            )?;
        }
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::config::NetMode;
    use forge_test_utils::fixtures::content;

    #[test]
    fn test_empty_ron_uses_defaults() {
        let config = ServerConfig::from_ron_str("()", "inline").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 7777);
        assert_eq!(config.tick_rate, TICK_RATE);
        assert_eq!(config.sim.net_mode, NetMode::Server);
        assert_eq!(config.bind_address(), "0.0.0.0:7777");
    }

    #[test]
    fn test_partial_ron() {
        let source = r#"(
            port: 9000,
            max_players: 2,
            map: (width: 16, height: 8, floor: "sand", spawns: [(15, 4)]),
        )"#;
        let config = ServerConfig::from_ron_str(source, "inline").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_players, 2);
        assert_eq!(config.map.floor, "sand");
        assert!(config.map.blocks.is_empty());
    }

    #[test]
    fn test_malformed_ron_is_config_error() {
        let err = ServerConfig::from_ron_str("(port: \"x\")", "bad.ron").unwrap_err();
        assert!(matches!(err, ServerError::Config { ref path, .. } if path == "bad.ron"));
    }

    #[test]
    fn test_default_map_builds() {
        let content = content();
        let world = MapConfig::default().build(&content).unwrap();
        assert_eq!(world.width(), 64);
        assert_eq!(world.spawns().len(), 1);
        let core = world.tile(TilePos::new(4, 16)).unwrap();
        assert_eq!(core.team, Team::DEFAULT);
        assert!(content.block(core.block).is_core());
    }

    #[test]
    fn test_unknown_block_is_rejected() {
        let map = MapConfig {
            blocks: vec![PlacedBlock {
                x: 1,
                y: 1,
                block: "mass-driver".into(),
                team: Team::DEFAULT,
            }],
            ..MapConfig::default()
        };
        let err = map.build(&content()).unwrap_err();
        assert!(matches!(err, ServerError::UnknownMapContent { kind: "block", .. }));
    }

    #[test]
    fn test_block_used_as_floor_is_rejected() {
        let map = MapConfig {
            floor: "copper-wall".into(),
            ..MapConfig::default()
        };
        assert!(matches!(
            map.build(&content()),
            Err(ServerError::UnknownMapContent { kind: "floor", .. })
        ));
    }
}
