//! Core simulation loop.
//!
//! [`Simulation`] is the explicit context object of one match: content,
//! world, actor groups, game state, remote router and event bus. It is
//! created at match start and torn down by [`Simulation::reset`].
//!
//! # Tick order
//!
//! 1. Drain inbound remote calls (always, even when paused).
//! 2. Stop here in `Menu` or `Paused`.
//! 3. Advance the global timer.
//! 4. Authoritative only: count down the wave timer and spawn waves.
//! 5. Update groups: effects, ground effects, units of each team in
//!    registration order, puddles, shields, bullets, tiles, fire, players.
//!    Headless instances skip ground effects and update effects after
//!    players instead, since the item transfers they carry are gameplay
//!    there.
//! 6. Collisions: bullets against each unit group, bullets against
//!    players, players against players.
//! 7. Pathfinding maintenance.
//! 8. Authoritative only, on a valid map: sector progression, then
//!    game-over evaluation.
//!
//! # Determinism
//!
//! - No floating-point math (uses fixed-point via [`Fixed`])
//! - No system randomness
//! - Groups and tiles update in insertion order
//! - Same inputs always produce same outputs
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use forge_core::config::SimConfig;
//! use forge_core::content::ContentCatalog;
//! use forge_core::math::Fixed;
//! use forge_core::simulation::Simulation;
//!
//! let content = ContentCatalog::from_ron_str("(blocks: [(name: \"stone\", kind: Floor(deep: false))])", "inline").unwrap();
//! let mut sim = Simulation::new(SimConfig::default(), Arc::new(content)).unwrap();
//! sim.play().unwrap();
//! let events = sim.update(Fixed::ONE).unwrap();
//! assert_eq!(sim.tick(), 1);
//! # let _ = events;
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::blocks::{update_tiles, TileContext};
use crate::calls::{self, CoreCalls};
use crate::config::{NetMode, SimConfig};
use crate::content::{BlockId, ContentCatalog, ContentRef, ItemId};
use crate::entities::{Actor, ActorId, ActorKind, Entities, GroupKind};
use crate::error::{GameError, ProtocolError, Result};
use crate::events::{EventBus, EventKind, GameEvent, TickEvents};
use crate::math::Fixed;
use crate::pathfinding::Pathfinder;
use crate::remote::{Arg, ConnectionId, Outbound, RemoteMessage, RemoteRegistry, RemoteRouter};
use crate::save;
use crate::sector::{Advance, Mission, MissionProgress, Sector, SectorStore};
use crate::spawner::spawn_wave;
use crate::state::{GameMode, GameState, State};
use crate::systems;
use crate::team::{Team, Teams};
use crate::world::{TilePos, World};

/// Ticks per second for the simulation.
pub const TICK_RATE: u32 = 60;

/// Duration of one tick in milliseconds.
pub const TICK_DURATION_MS: u32 = 1000 / TICK_RATE;

/// Lifetime of a fire started by a destroyed building.
const FIRE_LIFETIME: i32 = 600;

/// Serialized match state, used for save files and to bring joining
/// clients up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Game state.
    pub state: GameState,
    /// Tile arena.
    pub world: World,
    /// Actor groups.
    pub entities: Entities,
    /// Flow fields, mid-relaxation included. Units steer by them before
    /// maintenance runs, so a joining peer needs the exact fields.
    pub pathfinder: Pathfinder,
    /// Raw bits of the global timer.
    pub time_bits: i64,
    /// Tick counter.
    pub tick: u64,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    state: &'a GameState,
    world: &'a World,
    entities: &'a Entities,
    pathfinder: &'a Pathfinder,
    time_bits: i64,
    tick: u64,
}

/// The simulation context of one match.
pub struct Simulation {
    config: SimConfig,
    content: Arc<ContentCatalog>,
    state: GameState,
    world: World,
    entities: Entities,
    pathfinder: Pathfinder,
    remote: RemoteRouter<Simulation>,
    calls: CoreCalls,
    events: EventBus,
    sector_store: Option<Box<dyn SectorStore>>,
    unlocks: BTreeSet<ContentRef>,
    time: Fixed,
    tick: u64,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("entities", &self.entities.len())
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Create a simulation in the menu state with an unloaded world.
    ///
    /// # Errors
    ///
    /// Returns an error if the core remote operations cannot be registered.
    pub fn new(config: SimConfig, content: Arc<ContentCatalog>) -> Result<Self> {
        let mut registry = RemoteRegistry::default();
        let calls = calls::register(&mut registry)?;
        let remote = RemoteRouter::new(registry, config.net_mode);
        let state = GameState::new(config.difficulty, config.wave_spacing, None);

        Ok(Self {
            config,
            content,
            state,
            world: World::unloaded(),
            entities: Entities::new(),
            pathfinder: Pathfinder::new(),
            remote,
            calls,
            events: EventBus::default(),
            sector_store: None,
            unlocks: BTreeSet::new(),
            time: Fixed::ZERO,
            tick: 0,
        })
    }

    /// Attach campaign persistence.
    pub fn set_sector_store(&mut self, store: Box<dyn SectorStore>) {
        self.sector_store = Some(store);
    }

    /// The attached campaign persistence, if any.
    #[must_use]
    pub fn sector_store(&self) -> Option<&dyn SectorStore> {
        self.sector_store.as_deref()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Install a map. Team cores are rebuilt from the tiles.
    pub fn load_world(&mut self, world: World) {
        let mut teams = Teams::new();
        for (pos, tile) in world.iter() {
            if tile.entity.is_some() && self.content.block(tile.block).is_core() {
                teams.add_core(tile.team, pos);
            }
        }
        self.state.teams = teams;
        self.world = world;
        self.pathfinder.clear();
        info!(
            width = self.world.width(),
            height = self.world.height(),
            "World loaded"
        );
    }

    /// Make `sector` the active sector, resuming stored progress.
    pub fn set_sector(&mut self, sector: Sector) {
        let stored = self
            .sector_store
            .as_ref()
            .and_then(|store| store.progress(sector.x, sector.y));
        let mut sector = sector;
        if let Some(saved) = stored {
            sector = sector.with_progress(saved.completed_missions);
            if saved.complete {
                sector.mark_complete();
            }
        }
        if let Some(mission) = sector.current_mission() {
            if !sector.all_missions_done() {
                self.state.mode = mission.mode;
            }
        }
        self.state.sector = Some(sector);
    }

    /// Start the match.
    ///
    /// The first wave gets double the usual countdown. The sector's
    /// starting items are added to every default-team core.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] unless in the menu or paused.
    /// Calling it while already playing does nothing.
    pub fn play(&mut self) -> Result<()> {
        if self.state.is(State::Playing) {
            debug!("Already playing");
            return Ok(());
        }
        self.state.set(State::Playing)?;
        self.state.wavetime = self.state.wave_spacing(self.config.wave_spacing) * 2;

        if let Some(sector) = &self.state.sector {
            if let Some(mission) = sector.current_mission().filter(|_| !sector.all_missions_done()) {
                self.state.mode = mission.mode;
            }
            let cores: Vec<TilePos> = self.state.teams.get(Team::DEFAULT).cores.iter().copied().collect();
            for pos in cores {
                if let Some(items) = self.world.entity_mut(pos).and_then(|e| e.items.as_mut()) {
                    for stack in &sector.starting_items {
                        items.add_stack(*stack);
                    }
                }
            }
        }

        info!(mode = ?self.state.mode, wave = self.state.wave, "Match started");
        self.events.fire(GameEvent::Play);
        Ok(())
    }

    /// Pause gameplay. Inbound calls keep draining.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] unless playing.
    pub fn pause(&mut self) -> Result<()> {
        self.state.set(State::Paused)
    }

    /// Resume from pause.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] unless paused.
    pub fn resume(&mut self) -> Result<()> {
        if !self.state.is(State::Paused) {
            return Err(GameError::InvalidState("resume while not paused".into()));
        }
        self.state.set(State::Playing)
    }

    /// Tear the match down: wave 1, fresh wave timer, game over cleared,
    /// fresh team registry, every actor group and the world discarded, and
    /// the tick counter back to zero.
    ///
    /// The loaded sector and the unlock set survive; unlocks are progress
    /// of the player, not of the match.
    pub fn reset(&mut self) {
        let sector = self.state.sector.take();
        self.state = GameState::new(self.config.difficulty, self.config.wave_spacing, sector);
        self.entities.clear();
        self.pathfinder.clear();
        self.world = World::unloaded();
        self.time = Fixed::ZERO;
        self.tick = 0;
        info!("Simulation reset");
        self.events.fire(GameEvent::Reset);
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance one tick by `delta` ticks of game time.
    ///
    /// Returns every event fired since the previous call.
    ///
    /// # Errors
    ///
    /// Fatal faults (invariant violations, corruption) abort the tick.
    /// Protocol faults from peers never do: they are reported as
    /// [`GameEvent::ProtocolFault`] and the connection is marked desynced.
    pub fn update(&mut self, delta: Fixed) -> Result<TickEvents> {
        self.apply_inbound()?;

        if !self.state.is_running() {
            return Ok(self.events.drain());
        }

        self.time += delta;
        self.tick += 1;
        let authoritative = self.config.net_mode.is_authoritative();

        let mode = self.state.mode;
        if authoritative && !mode.disable_waves() && !mode.disable_wave_timer() && !self.state.game_over {
            self.state.wavetime -= delta;
            if self.state.wavetime <= Fixed::ZERO {
                self.run_wave()?;
            }
        }

        self.entities.verify()?;
        let destroyed = self.update_groups(delta)?;
        self.resolve_collisions();
        for event in systems::reap(&mut self.entities) {
            self.events.fire(event);
        }
        for pos in destroyed {
            self.destroy_block(pos)?;
        }

        let needing: Vec<Team> = self.entities.teams_with_units().collect();
        self.pathfinder.update(
            &self.world,
            &self.content,
            &self.state.teams,
            needing,
            self.config.pathfinder_budget,
        );

        if authoritative && self.world.is_valid() {
            self.update_sectors()?;
            self.check_game_over()?;
        }

        #[cfg(feature = "debug-validation")]
        self.verify_modules()?;

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash()?;
            debug!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        Ok(self.events.drain())
    }

    fn update_groups(&mut self, delta: Fixed) -> Result<Vec<TilePos>> {
        let tile_size = self.config.tile_size;
        let headless = self.config.headless;
        let mut destroyed = Vec::new();

        if !headless {
            systems::effect_system(&mut self.entities, &mut self.world, GroupKind::Effect, delta);
            systems::effect_system(&mut self.entities, &mut self.world, GroupKind::GroundEffect, delta);
        }
        for team in Team::ALL {
            if self.entities.group(GroupKind::Units(team)).is_empty() {
                continue;
            }
            destroyed.extend(systems::unit_system(
                &mut self.entities,
                team,
                &mut self.world,
                &self.content,
                &self.pathfinder,
                tile_size,
                delta,
            ));
        }
        systems::puddle_system(&mut self.entities, delta);
        systems::shield_system(&mut self.entities, delta);
        destroyed.extend(systems::bullet_system(
            &mut self.entities,
            &mut self.world,
            &self.content,
            tile_size,
            delta,
        ));
        let mut ctx = TileContext {
            content: &self.content,
            entities: &mut self.entities,
            tile_size,
            transfer_ticks: self.config.item_transfer_ticks,
        };
        update_tiles(&mut self.world, &mut ctx, delta)?;
        destroyed.extend(systems::fire_system(&mut self.entities, &mut self.world, tile_size, delta));
        systems::player_system(&mut self.entities, &self.world, tile_size, delta);
        // Headless peers skip ground effects entirely; item transfers land
        // after players have moved.
        if headless {
            systems::effect_system(&mut self.entities, &mut self.world, GroupKind::Effect, delta);
        }
        Ok(destroyed)
    }

    fn resolve_collisions(&mut self) {
        for team in Team::ALL {
            systems::collide_bullets(&mut self.entities, GroupKind::Units(team));
        }
        systems::collide_bullets(&mut self.entities, GroupKind::Player);
        systems::separate_players(&mut self.entities);
    }

    /// Spawn the next wave now and restart the countdown.
    ///
    /// # Errors
    ///
    /// Propagates spawning failures.
    pub fn run_wave(&mut self) -> Result<()> {
        let wave = self.state.wave;
        let units = spawn_wave(
            &self.content,
            &self.world,
            &mut self.entities,
            wave,
            self.config.tile_size,
        )?;
        self.state.wave += 1;
        self.state.wavetime = self.state.wave_spacing(self.config.wave_spacing);
        info!(wave, units, "Wave spawned");
        self.events.fire(GameEvent::Wave { wave, units });
        Ok(())
    }

    fn mission_progress(&self) -> MissionProgress {
        let mut core_items = vec![0; self.content.items().len()];
        for &pos in &self.state.teams.get(Team::DEFAULT).cores {
            if let Some(items) = self.world.entity(pos).and_then(|e| e.items.as_ref()) {
                for (item, amount) in items.iter() {
                    core_items[item.index()] += amount;
                }
            }
        }
        let enemy_cores = Team::ALL
            .into_iter()
            .filter(|&team| Team::DEFAULT.is_enemy(team))
            .map(|team| self.state.teams.core_count(team))
            .sum();
        MissionProgress {
            wave: self.state.wave,
            core_items,
            enemy_cores,
        }
    }

    fn update_sectors(&mut self) -> Result<()> {
        if self.state.game_over {
            return Ok(());
        }
        let progress = self.mission_progress();
        loop {
            let Some(sector) = self.state.sector.as_mut() else {
                return Ok(());
            };
            if sector.is_complete() || sector.all_missions_done() {
                break;
            }
            let completed = sector.completed_missions();
            let Some(mission) = sector.current_mission_mut() else {
                break;
            };
            mission.update(&progress);
            if !mission.is_complete() {
                break;
            }

            let index = i32::try_from(completed)
                .map_err(|_| GameError::InvariantViolation("mission index overflow".into()))?;
            self.invoke(self.calls.mission_finish, &[Arg::Int(index)])?;
            if self.state.sector.as_ref().map(Sector::completed_missions) == Some(completed) {
                break;
            }
        }

        let finished = self
            .state
            .sector
            .as_ref()
            .is_some_and(|s| !s.is_complete() && s.all_missions_done());
        if finished {
            self.invoke(self.calls.sector_complete, &[])?;
        }
        Ok(())
    }

    fn check_game_over(&mut self) -> Result<()> {
        if self.state.game_over || !self.world.is_valid() {
            return Ok(());
        }
        let winner = if self.state.mode.is_pvp() {
            let mut alive = self.state.teams.active();
            match (alive.next(), alive.next()) {
                (Some(team), None) => Some(team),
                _ => None,
            }
        } else if self.state.teams.core_count(Team::DEFAULT) == 0 {
            Some(Team::WAVE)
        } else {
            None
        };
        if let Some(winner) = winner {
            self.invoke(self.calls.game_over, &[Arg::Team(winner)])?;
        }
        Ok(())
    }

    #[cfg(feature = "debug-validation")]
    fn verify_modules(&self) -> Result<()> {
        for &pos in self.world.entity_positions() {
            if let Some(entity) = self.world.entity(pos) {
                entity.verify_modules()?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remote operations
    // ------------------------------------------------------------------

    /// Ids of the core remote operations.
    #[must_use]
    pub const fn calls(&self) -> &CoreCalls {
        &self.calls
    }

    /// The operation registry (for the handshake fingerprint).
    #[must_use]
    pub fn registry(&self) -> &RemoteRegistry<Simulation> {
        self.remote.registry()
    }

    /// Invoke a remote operation from this instance.
    ///
    /// Executes locally when the locality allows it, and queues whatever
    /// must be sent to peers.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for unknown operations or bad arguments,
    /// or the handler's error.
    pub fn invoke(&mut self, op: u16, args: &[Arg]) -> Result<()> {
        let route = self.remote.route_invoke(op, args)?;
        if route.execute {
            let handler = self.remote.handler(op)?;
            handler(self, args)?;
        }
        if let Some(outbound) = route.send {
            self.remote.push_outbound(outbound);
        }
        Ok(())
    }

    /// Queue a message from a peer. Applied at the start of the next tick.
    pub fn receive(&mut self, from: ConnectionId, message: RemoteMessage) {
        self.remote.enqueue(from, message);
    }

    /// Take every message queued for peers.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        self.remote.drain_outbound()
    }

    /// Whether calls from a connection are being dropped.
    #[must_use]
    pub fn is_desynced(&self, connection: ConnectionId) -> bool {
        self.remote.is_desynced(connection)
    }

    /// Forget a disconnected peer.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.remote.forget(connection);
    }

    /// Switch network role, e.g. when hosting a running local game.
    pub fn set_net_mode(&mut self, net_mode: NetMode) {
        self.config.net_mode = net_mode;
        self.remote.set_net_mode(net_mode);
    }

    fn apply_inbound(&mut self) -> Result<()> {
        while let Some((from, message)) = self.remote.next_inbound() {
            match self.apply_message(from, &message) {
                Ok(()) => {}
                Err(GameError::Protocol(fault)) => self.report_fault(from, fault),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    let operation = self
                        .remote
                        .registry()
                        .get(message.op)
                        .map_or("unknown", |spec| spec.name);
                    self.report_fault(
                        from,
                        ProtocolError::Rejected {
                            operation,
                            message: err.to_string(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn apply_message(&mut self, from: ConnectionId, message: &RemoteMessage) -> Result<()> {
        let route = self.remote.route_receive(from, message)?;
        if route.execute {
            let handler = self.remote.handler(message.op)?;
            handler(self, &message.args)?;
        }
        if let Some(outbound) = route.send {
            self.remote.push_outbound(outbound);
        }
        Ok(())
    }

    fn report_fault(&mut self, connection: ConnectionId, fault: ProtocolError) {
        error!(connection = connection.0, error = %fault, "Remote call rejected, marking connection desynced");
        self.remote.mark_desynced(connection);
        self.events.fire(GameEvent::ProtocolFault {
            connection,
            error: fault,
        });
    }

    /// Game-over handler. A no-op once the match is already over.
    pub(crate) fn apply_game_over(&mut self, winner: Team) {
        if self.state.game_over {
            debug!(?winner, "Ignoring repeated game over");
            return;
        }
        self.state.game_over = true;
        self.state.winner = Some(winner);
        info!(?winner, wave = self.state.wave, "Game over");
        self.events.fire(GameEvent::GameOver { winner });
    }

    /// Mission-finish handler.
    pub(crate) fn apply_mission_finish(&mut self, index: usize) -> Result<()> {
        let Some(sector) = self.state.sector.as_mut() else {
            return Err(GameError::InvalidState("mission finished without an active sector".into()));
        };
        // Clients apply whatever the host decided.
        let authoritative = self.config.net_mode.is_authoritative();
        if authoritative
            && index == sector.completed_missions()
            && !sector.current_mission().is_some_and(Mission::is_complete)
        {
            return Err(GameError::InvalidState(format!("mission {index} is not complete")));
        }
        if sector.finish_mission(index)? == Advance::Stale {
            warn!(index, completed = sector.completed_missions(), "Ignoring stale mission finish");
            return Ok(());
        }
        let (x, y, completed) = (sector.x, sector.y, sector.completed_missions());
        if !sector.all_missions_done() {
            if let Some(mission) = sector.current_mission() {
                self.state.mode = mission.mode;
            }
        }
        info!(index, completed, mode = ?self.state.mode, "Mission finished");

        if authoritative {
            if let Some(store) = self.sector_store.as_mut() {
                store.record_progress(x, y, completed);
                store.save()?;
            }
        }
        self.events.fire(GameEvent::MissionFinish { index });
        Ok(())
    }

    /// Sector-complete handler. Fires at most once per sector, and only
    /// after every mission is done.
    pub(crate) fn apply_sector_complete(&mut self) -> Result<()> {
        let Some(sector) = self.state.sector.as_mut() else {
            return Err(GameError::InvalidState("sector completed without an active sector".into()));
        };
        if self.config.net_mode.is_authoritative() && !sector.all_missions_done() {
            return Err(GameError::InvalidState(format!(
                "sector {},{} still has missions left",
                sector.x, sector.y
            )));
        }
        if !sector.mark_complete() {
            debug!(x = sector.x, y = sector.y, "Sector already complete");
            return Ok(());
        }
        let (x, y) = (sector.x, sector.y);
        self.state.mode = GameMode::Victory;
        info!(x, y, "Sector complete");

        if self.config.net_mode.is_authoritative() {
            if let Some(store) = self.sector_store.as_mut() {
                store.complete_sector(x, y);
                store.save()?;
            }
        }
        if !self.config.headless && self.config.net_mode != NetMode::Client {
            self.events.fire(GameEvent::ShowSectorCompletion);
        }
        self.events.fire(GameEvent::SectorComplete { x, y });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tiles
    // ------------------------------------------------------------------

    /// Place a block locally, without replication.
    ///
    /// Use the `place_block` remote operation for replicated placement.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownContent`] for an unknown block,
    /// [`GameError::InvalidState`] for floors, and
    /// [`GameError::OutOfBounds`] outside the map.
    pub fn place_block(&mut self, pos: TilePos, block: BlockId, team: Team) -> Result<()> {
        let content = Arc::clone(&self.content);
        let descriptor = content.try_block(block)?;
        if descriptor.floor().is_some() {
            return Err(GameError::InvalidState(format!(
                "'{}' is a floor and cannot be placed as a block",
                descriptor.name
            )));
        }
        self.world.set_block(pos, descriptor, team, &content)?;
        self.state.teams.remove_core(pos);
        if descriptor.is_core() {
            self.state.teams.add_core(team, pos);
        }
        self.pathfinder.invalidate();
        self.events.fire(GameEvent::TileChange { pos, block, team });
        if team == Team::DEFAULT && descriptor.has_entity() {
            self.handle_content(ContentRef::Block(block));
        }
        Ok(())
    }

    /// Remove a block locally, without replication.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] outside the map.
    pub fn remove_block(&mut self, pos: TilePos) -> Result<()> {
        self.world.remove_block(pos)?;
        self.state.teams.remove_core(pos);
        self.pathfinder.invalidate();
        self.events.fire(GameEvent::TileChange {
            pos,
            block: BlockId::AIR,
            team: Team::Derelict,
        });
        Ok(())
    }

    /// Destroy a building: remove it, spill flammable items as fire and
    /// liquids as a puddle.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] outside the map.
    pub fn destroy_block(&mut self, pos: TilePos) -> Result<()> {
        let Some(tile) = self.world.tile(pos) else {
            return Err(GameError::OutOfBounds {
                x: i32::from(pos.x),
                y: i32::from(pos.y),
            });
        };
        let (block, team) = (tile.block, tile.team);
        let Some(entity) = self.world.remove_block(pos)? else {
            return Ok(());
        };
        self.state.teams.remove_core(pos);
        self.pathfinder.invalidate();

        let center = pos.world_center(self.config.tile_size);
        let flammable = entity.items.as_ref().is_some_and(|items| {
            items
                .iter()
                .any(|(item, _)| self.content.item(item).flammability > Fixed::ZERO)
        });
        if flammable {
            let fire = Actor::new(ActorKind::Fire { pulse: Fixed::ZERO }, Team::Derelict, center)
                .with_lifetime(Fixed::from_num(FIRE_LIFETIME));
            self.entities.add(GroupKind::Fire, fire)?;
        }
        if let Some(liquids) = entity.liquids.as_ref().filter(|l| l.total() > Fixed::ZERO) {
            let puddle = Actor::new(
                ActorKind::Puddle {
                    liquid: liquids.current(),
                    amount: liquids.total(),
                },
                Team::Derelict,
                center,
            );
            self.entities.add(GroupKind::Puddle, puddle)?;
        }

        debug!(x = pos.x, y = pos.y, block = block.0, ?team, "Block destroyed");
        self.events.fire(GameEvent::BlockDestroyed { pos, block, team });
        self.events.fire(GameEvent::TileChange {
            pos,
            block: BlockId::AIR,
            team: Team::Derelict,
        });
        Ok(())
    }

    /// Record that the default team used a piece of content.
    ///
    /// Feeds the active mission; non-headless instances also unlock it.
    pub fn handle_content(&mut self, content: ContentRef) {
        if let Some(mission) = self
            .state
            .sector
            .as_mut()
            .filter(|s| !s.all_missions_done())
            .and_then(Sector::current_mission_mut)
        {
            mission.on_content_used(content);
        }
        if !self.config.headless && self.unlocks.insert(content) {
            self.events.fire(GameEvent::ContentUsed(content));
        }
    }

    /// Change a floor.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] outside the map.
    pub fn set_floor(&mut self, pos: TilePos, floor: BlockId) -> Result<()> {
        self.world.set_floor(pos, floor)?;
        self.pathfinder.invalidate();
        Ok(())
    }

    /// Insert an actor into a group.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvariantViolation`] for the default group.
    pub fn add_actor(&mut self, group: GroupKind, actor: Actor) -> Result<ActorId> {
        self.entities.add(group, actor)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Subscribe to an event kind.
    pub fn subscribe(&mut self, kind: EventKind, listener: impl FnMut(&GameEvent) + Send + 'static) {
        self.events.subscribe(kind, listener);
    }

    /// Take events fired outside [`update`](Self::update) (play, reset,
    /// direct invocations).
    pub fn drain_events(&mut self) -> TickEvents {
        self.events.drain()
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Content catalog.
    #[must_use]
    pub fn content(&self) -> &ContentCatalog {
        &self.content
    }

    /// Game state.
    #[must_use]
    pub const fn state(&self) -> &GameState {
        &self.state
    }

    /// Change the rules preset.
    pub fn set_mode(&mut self, mode: GameMode) {
        self.state.mode = mode;
    }

    /// Tile arena.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// Actor groups.
    #[must_use]
    pub const fn entities(&self) -> &Entities {
        &self.entities
    }

    /// Flow fields.
    #[must_use]
    pub const fn pathfinder(&self) -> &Pathfinder {
        &self.pathfinder
    }

    /// Ticks run.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Global timer.
    #[must_use]
    pub const fn time(&self) -> Fixed {
        self.time
    }

    /// Next wave number.
    #[must_use]
    pub const fn wave(&self) -> u32 {
        self.state.wave
    }

    /// Ticks until the next wave.
    #[must_use]
    pub const fn wavetime(&self) -> Fixed {
        self.state.wavetime
    }

    /// Core tiles held by a team.
    #[must_use]
    pub fn core_count(&self, team: Team) -> usize {
        self.state.teams.core_count(team)
    }

    /// Active mission, if a sector is loaded.
    #[must_use]
    pub fn current_mission(&self) -> Option<&Mission> {
        self.state.sector.as_ref()?.current_mission()
    }

    /// Items of one kind across a team's cores.
    #[must_use]
    pub fn core_items(&self, team: Team, item: ItemId) -> i32 {
        self.state
            .teams
            .get(team)
            .cores
            .iter()
            .filter_map(|&pos| self.world.entity(pos)?.items.as_ref())
            .map(|items| items.get(item))
            .sum()
    }

    /// Content unlocked so far.
    #[must_use]
    pub fn unlocks(&self) -> &BTreeSet<ContentRef> {
        &self.unlocks
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serialize match state.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let snapshot = SnapshotRef {
            state: &self.state,
            world: &self.world,
            entities: &self.entities,
            pathfinder: &self.pathfinder,
            time_bits: self.time.to_bits(),
            tick: self.tick,
        };
        bincode::serialize(&snapshot)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize simulation: {e}")))
    }

    /// Replace match state with a snapshot (client join, save load).
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Corruption`] if the bytes do not decode.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let snapshot: Snapshot = bincode::deserialize(bytes)
            .map_err(|e| GameError::Corruption(format!("Failed to deserialize simulation: {e}")))?;
        self.state = snapshot.state;
        self.world = snapshot.world;
        self.entities = snapshot.entities;
        self.time = Fixed::from_bits(snapshot.time_bits);
        self.tick = snapshot.tick;
        self.pathfinder = snapshot.pathfinder;
        Ok(())
    }

    /// Write the building module chunk of a save file.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    pub fn write_modules(&self, writer: &mut impl Write) -> Result<()> {
        save::write_tile_modules(&self.world, writer)
    }

    /// Replay a building module chunk into the loaded world.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Corruption`] if the chunk does not match the
    /// loaded buildings.
    pub fn read_modules(&mut self, reader: &mut impl Read) -> Result<()> {
        save::read_tile_modules(&mut self.world, reader)
    }

    /// Hash of the match state, for desync detection.
    ///
    /// Two simulations with identical state produce identical hashes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn state_hash(&self) -> Result<u64> {
        let bytes = self.snapshot()?;
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Ok(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ItemStack;
    use crate::math::Vec2Fixed;
    use crate::sector::{MemorySectorStore, MissionKind};

    const CATALOG: &str = r#"(
        items: [(name: "copper"), (name: "coal", flammability: 1.0)],
        units: [(name: "dagger", health: 20, speed: 1.0, hit_size: 2.0, damage: 15, range: 4.0, reload: 10.0)],
        blocks: [
            (name: "stone", kind: Floor(deep: false)),
            (name: "core", kind: Core, health: 100, solid: true, item_capacity: 100),
            (name: "wall", kind: Wall, health: 30, solid: true),
        ],
        spawn_groups: [(unit: "dagger")],
    )"#;

    fn content() -> Arc<ContentCatalog> {
        Arc::new(ContentCatalog::from_ron_str(CATALOG, "inline").unwrap())
    }

    fn sim(config: SimConfig) -> Simulation {
        let content = content();
        let stone = content.block_by_name("stone").unwrap();
        let core = content.block_by_name("core").unwrap();
        let mut sim = Simulation::new(config, content).unwrap();
        sim.load_world(World::new(8, 8, stone));
        sim.place_block(TilePos::new(6, 4), core, Team::DEFAULT).unwrap();
        sim
    }

    fn core_id(sim: &Simulation) -> BlockId {
        sim.content().block_by_name("core").unwrap()
    }

    #[test]
    fn test_menu_does_not_tick() {
        let mut sim = sim(SimConfig::default());
        sim.update(Fixed::ONE).unwrap();
        assert_eq!(sim.tick(), 0);
        sim.play().unwrap();
        sim.update(Fixed::ONE).unwrap();
        assert_eq!(sim.tick(), 1);
        sim.pause().unwrap();
        sim.update(Fixed::ONE).unwrap();
        assert_eq!(sim.tick(), 1);
        sim.resume().unwrap();
        sim.update(Fixed::ONE).unwrap();
        assert_eq!(sim.tick(), 2);
    }

    #[test]
    fn test_play_doubles_first_countdown() {
        let mut sim = sim(SimConfig {
            wave_spacing: Fixed::from_num(100),
            ..SimConfig::default()
        });
        sim.play().unwrap();
        assert_eq!(sim.wavetime(), Fixed::from_num(200));

        sim.update(Fixed::ONE).unwrap();
        sim.play().unwrap();
        assert_eq!(sim.wavetime(), Fixed::from_num(199));
    }

    #[test]
    fn test_wave_spawns_when_timer_runs_out() {
        let mut sim = sim(SimConfig {
            wave_spacing: Fixed::from_num(2),
            ..SimConfig::default()
        });
        sim.load_world({
            let mut world = sim.world().clone();
            world.add_spawn(TilePos::new(0, 0)).unwrap();
            world
        });
        sim.play().unwrap();

        let mut waves = 0;
        for _ in 0..4 {
            waves += sim.update(Fixed::ONE).unwrap().count(EventKind::Wave);
        }
        assert_eq!(waves, 1);
        assert_eq!(sim.wave(), 2);
        assert_eq!(sim.wavetime(), Fixed::from_num(2));
        assert_eq!(sim.entities().group(GroupKind::Units(Team::WAVE)).len(), 1);
    }

    #[test]
    fn test_sandbox_freezes_wave_timer() {
        let mut sim = sim(SimConfig::default());
        sim.set_mode(GameMode::Sandbox);
        sim.play().unwrap();
        let before = sim.wavetime();
        sim.update(Fixed::ONE).unwrap();
        assert_eq!(sim.wavetime(), before);
    }

    #[test]
    fn test_starting_items_land_in_default_cores() {
        let mut sim = sim(SimConfig::default());
        let mut sector = Sector::new(0, 0, vec![Mission::new(MissionKind::Battle, GameMode::Attack)]);
        sector.starting_items = vec![ItemStack::new(ItemId(0), 30)];
        sim.set_sector(sector);
        sim.play().unwrap();
        assert_eq!(sim.core_items(Team::DEFAULT, ItemId(0)), 30);
        assert_eq!(sim.state().mode, GameMode::Attack);
    }

    #[test]
    fn test_destroyed_core_with_coal_starts_fire() {
        let mut sim = sim(SimConfig::default());
        let pos = TilePos::new(6, 4);
        sim.world.entity_mut(pos).unwrap().items.as_mut().unwrap().add(ItemId(1), 5);
        sim.destroy_block(pos).unwrap();
        assert_eq!(sim.core_count(Team::DEFAULT), 0);
        assert_eq!(sim.entities().group(GroupKind::Fire).len(), 1);
        let events = sim.drain_events();
        assert_eq!(events.count(EventKind::BlockDestroyed), 1);
    }

    #[test]
    fn test_placing_default_block_unlocks_once() {
        let mut sim = sim(SimConfig::default());
        let core = core_id(&sim);
        sim.drain_events();
        sim.place_block(TilePos::new(1, 1), core, Team::DEFAULT).unwrap();
        let events = sim.drain_events();
        assert_eq!(events.count(EventKind::ContentUsed), 0);
        assert!(sim.unlocks().contains(&ContentRef::Block(core)));
        assert_eq!(sim.core_count(Team::DEFAULT), 2);
    }

    #[test]
    fn test_headless_skips_unlocks() {
        let mut sim = sim(SimConfig {
            headless: true,
            ..SimConfig::default()
        });
        assert!(sim.unlocks().is_empty());
        sim.handle_content(ContentRef::Item(ItemId(0)));
        assert!(sim.unlocks().is_empty());
    }

    #[test]
    fn test_headless_leaves_ground_effects_alone() {
        let decal = || {
            Actor::new(ActorKind::GroundEffect, Team::DEFAULT, Vec2Fixed::new(Fixed::ONE, Fixed::ONE))
                .with_lifetime(Fixed::from_num(5))
        };
        let mut shown = sim(SimConfig::default());
        let mut headless = sim(SimConfig {
            headless: true,
            ..SimConfig::default()
        });
        let shown_id = shown.add_actor(GroupKind::GroundEffect, decal()).unwrap();
        let headless_id = headless.add_actor(GroupKind::GroundEffect, decal()).unwrap();
        for sim in [&mut shown, &mut headless] {
            sim.play().unwrap();
            sim.update(Fixed::ONE).unwrap();
        }

        let age = |sim: &Simulation, id| sim.entities().group(GroupKind::GroundEffect).get(id).unwrap().time;
        assert_eq!(age(&shown, shown_id), Fixed::ONE);
        assert_eq!(age(&headless, headless_id), Fixed::ZERO);
    }

    #[test]
    fn test_floor_cannot_be_placed() {
        let mut sim = sim(SimConfig::default());
        let stone = sim.content().block_by_name("stone").unwrap();
        assert!(sim.place_block(TilePos::new(0, 0), stone, Team::DEFAULT).is_err());
    }

    #[test]
    fn test_mission_finish_saves_once_per_advance() {
        let mut sim = sim(SimConfig::default());
        sim.set_sector_store(Box::new(MemorySectorStore::default()));
        sim.set_sector(Sector::new(
            1,
            2,
            vec![
                Mission::new(MissionKind::Waves { target: 1 }, GameMode::Waves),
                Mission::new(MissionKind::Battle, GameMode::Attack),
            ],
        ));
        sim.play().unwrap();
        let events = sim.update(Fixed::ONE).unwrap();

        // Wave 1 is reached immediately, and no enemy cores exist.
        assert_eq!(events.count(EventKind::MissionFinish), 2);
        assert_eq!(events.count(EventKind::SectorComplete), 1);
        assert_eq!(events.count(EventKind::ShowSectorCompletion), 1);
        assert_eq!(sim.state().mode, GameMode::Victory);
        let saved = sim.sector_store().unwrap().progress(1, 2).unwrap();
        assert_eq!(saved.completed_missions, 2);
        assert!(saved.complete);
    }

    #[test]
    fn test_snapshot_restores_state() {
        let mut sim = sim(SimConfig::default());
        sim.play().unwrap();
        sim.update(Fixed::ONE).unwrap();
        let bytes = sim.snapshot().unwrap();
        let hash = sim.state_hash().unwrap();

        let mut other = Simulation::new(SimConfig::default(), content()).unwrap();
        other.restore(&bytes).unwrap();
        assert_eq!(other.state_hash().unwrap(), hash);
        assert_eq!(other.tick(), 1);
        assert_eq!(other.core_count(Team::DEFAULT), 1);
    }

    #[test]
    fn test_corrupt_snapshot_is_fatal() {
        let mut sim = sim(SimConfig::default());
        let err = sim.restore(&[1, 2, 3]).unwrap_err();
        assert!(err.is_fatal());
    }
}
