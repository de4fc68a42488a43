//! Remote operations of the core.
//!
//! Registration order defines operation ids, so it must never depend on
//! runtime state. Handlers receive arguments already checked against the
//! declared signature.

use crate::content::BlockId;
use crate::error::{GameError, Result};
use crate::remote::{Arg, ArgKind, Locality, RemoteRegistry};
use crate::simulation::Simulation;
use crate::team::Team;
use crate::world::TilePos;

/// Ids of the core operations in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreCalls {
    /// `game_over(winner)`, both.
    pub game_over: u16,
    /// `mission_finish(index)`, host only.
    pub mission_finish: u16,
    /// `sector_complete()`, host only.
    pub sector_complete: u16,
    /// `place_block(x, y, block, team)`, server.
    pub place_block: u16,
    /// `remove_block(x, y)`, server.
    pub remove_block: u16,
}

/// Register every core operation.
///
/// # Errors
///
/// Returns [`GameError::InvalidState`] if a name is already taken.
pub fn register(registry: &mut RemoteRegistry<Simulation>) -> Result<CoreCalls> {
    Ok(CoreCalls {
        game_over: registry.register("game_over", Locality::Both, &[ArgKind::Team], game_over)?,
        mission_finish: registry.register_host("mission_finish", &[ArgKind::Int], mission_finish)?,
        sector_complete: registry.register_host("sector_complete", &[], sector_complete)?,
        place_block: registry.register(
            "place_block",
            Locality::Server,
            &[ArgKind::Int, ArgKind::Int, ArgKind::Block, ArgKind::Team],
            place_block,
        )?,
        remove_block: registry.register(
            "remove_block",
            Locality::Server,
            &[ArgKind::Int, ArgKind::Int],
            remove_block,
        )?,
    })
}

fn int(args: &[Arg], index: usize) -> Result<i32> {
    args.get(index)
        .and_then(Arg::as_int)
        .ok_or_else(|| GameError::InvalidState(format!("argument {index} is not an int")))
}

fn team(args: &[Arg], index: usize) -> Result<Team> {
    args.get(index)
        .and_then(Arg::as_team)
        .ok_or_else(|| GameError::InvalidState(format!("argument {index} is not a team")))
}

fn block(args: &[Arg], index: usize) -> Result<BlockId> {
    match args.get(index) {
        Some(Arg::Block(block)) => Ok(*block),
        _ => Err(GameError::InvalidState(format!("argument {index} is not a block"))),
    }
}

fn pos(args: &[Arg]) -> Result<TilePos> {
    let (x, y) = (int(args, 0)?, int(args, 1)?);
    match (u16::try_from(x), u16::try_from(y)) {
        (Ok(px), Ok(py)) => Ok(TilePos::new(px, py)),
        _ => Err(GameError::OutOfBounds { x, y }),
    }
}

fn game_over(sim: &mut Simulation, args: &[Arg]) -> Result<()> {
    sim.apply_game_over(team(args, 0)?);
    Ok(())
}

fn mission_finish(sim: &mut Simulation, args: &[Arg]) -> Result<()> {
    let index = int(args, 0)?;
    let index = usize::try_from(index)
        .map_err(|_| GameError::InvalidState(format!("negative mission index {index}")))?;
    sim.apply_mission_finish(index)
}

fn sector_complete(sim: &mut Simulation, _args: &[Arg]) -> Result<()> {
    sim.apply_sector_complete()
}

fn place_block(sim: &mut Simulation, args: &[Arg]) -> Result<()> {
    sim.place_block(pos(args)?, block(args, 2)?, team(args, 3)?)
}

fn remove_block(sim: &mut Simulation, args: &[Arg]) -> Result<()> {
    sim.remove_block(pos(args)?)
}
