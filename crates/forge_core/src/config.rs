//! Simulation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::{fixed_decimal, Fixed};
use crate::state::Difficulty;

/// Which side of the network this instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetMode {
    /// Single player. Authoritative.
    #[default]
    Offline,
    /// Dedicated or listen server. Authoritative.
    Server,
    /// Connected client. Never authoritative.
    Client,
}

impl NetMode {
    /// Whether this instance decides waves and progression.
    #[must_use]
    pub const fn is_authoritative(self) -> bool {
        !matches!(self, Self::Client)
    }
}

fn default_wave_spacing() -> Fixed {
    Fixed::from_num(60 * 60 * 2)
}

fn default_tile_size() -> Fixed {
    Fixed::from_num(8)
}

const fn default_pathfinder_budget() -> usize {
    2048
}

fn default_item_transfer_ticks() -> Fixed {
    Fixed::from_num(20)
}

/// Tunables for one simulation instance.
///
/// # Example RON
///
/// ```ron
/// SimConfig(
///     headless: true,
///     net_mode: Server,
///     wave_spacing: 7200.0,
///     difficulty: Normal,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// No presentation layer is attached.
    #[serde(default)]
    pub headless: bool,
    /// Network role.
    #[serde(default)]
    pub net_mode: NetMode,
    /// Base ticks between waves.
    #[serde(default = "default_wave_spacing", with = "fixed_decimal")]
    pub wave_spacing: Fixed,
    /// Difficulty preset.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// World units per tile.
    #[serde(default = "default_tile_size", with = "fixed_decimal")]
    pub tile_size: Fixed,
    /// Flow field cells relaxed per tick.
    #[serde(default = "default_pathfinder_budget")]
    pub pathfinder_budget: usize,
    /// Lifetime of item transfer effects.
    #[serde(default = "default_item_transfer_ticks", with = "fixed_decimal")]
    pub item_transfer_ticks: Fixed,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            headless: false,
            net_mode: NetMode::Offline,
            wave_spacing: default_wave_spacing(),
            difficulty: Difficulty::Normal,
            tile_size: default_tile_size(),
            pathfinder_budget: default_pathfinder_budget(),
            item_transfer_ticks: default_item_transfer_ticks(),
        }
    }
}

impl SimConfig {
    /// Headless authoritative server defaults.
    #[must_use]
    pub fn server() -> Self {
        Self {
            headless: true,
            net_mode: NetMode::Server,
            ..Self::default()
        }
    }

    /// Client defaults.
    #[must_use]
    pub fn client() -> Self {
        Self {
            net_mode: NetMode::Client,
            ..Self::default()
        }
    }

    /// Parse RON.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] on malformed input.
    pub fn from_ron_str(source: &str, origin: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| GameError::DataParseError {
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
}
