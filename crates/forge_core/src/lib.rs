//! # Forge Core
//!
//! Deterministic simulation and replication core of a tile-based factory
//! and defense game.
//!
//! This crate contains **only** simulation logic:
//! - No rendering
//! - No network IO (peers exchange [`remote::RemoteMessage`] values)
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - Authoritative headless servers
//! - Clients replaying server calls
//! - Save files and state snapshots
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`modules`] - Per-tile item, liquid and power storage
//! - [`consume`] - Resource consumption contracts
//! - [`content`] - Content catalog loaded from RON
//! - [`world`] - Tile arena and building entities
//! - [`entities`] - Actor groups (units, bullets, effects, ...)
//! - [`simulation`] - Core simulation loop
//! - [`remote`] - Remote operation registry and routing
//! - [`sector`] - Campaign missions and sector persistence
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod blocks;
pub mod calls;
pub mod config;
pub mod consume;
pub mod content;
pub mod entities;
pub mod error;
pub mod events;
pub mod math;
pub mod modules;
pub mod pathfinding;
pub mod remote;
pub mod save;
pub mod sector;
pub mod simulation;
pub mod spawner;
pub mod state;
pub mod systems;
pub mod team;
pub mod version;
pub mod world;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{NetMode, SimConfig};
    pub use crate::consume::{Consume, ConsumeTiming, Consumers};
    pub use crate::content::{BlockId, ContentCatalog, ContentRef, ItemId, ItemStack, LiquidId};
    pub use crate::entities::{Actor, ActorKind, GroupKind};
    pub use crate::error::{GameError, ProtocolError, Result};
    pub use crate::events::{EventKind, GameEvent, TickEvents};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::modules::{ItemModule, LiquidModule, PowerModule};
    pub use crate::remote::{Arg, ConnectionId, Locality, RemoteMessage};
    pub use crate::sector::{Mission, MissionKind, Sector, SectorStore};
    pub use crate::simulation::Simulation;
    pub use crate::state::{GameMode, State};
    pub use crate::team::Team;
    pub use crate::world::{TilePos, World};
}
