//! # Forge Dedicated Server
//!
//! Headless dedicated server for multiplayer games.
//!
//! Hosts the authoritative simulation without rendering. Clients connect
//! over TCP, pass a version and registry handshake, receive a snapshot,
//! and then exchange remote calls as length-prefixed bincode frames.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod server;
pub mod session;

pub use config::{MapConfig, PlacedBlock, ServerConfig};
pub use error::{Result, ServerError};
pub use server::Server;
