//! Campaign sectors and missions.
//!
//! A sector is an ordered list of missions. The authoritative instance
//! updates the current mission every tick; when it reports complete the
//! mission-finish call advances `completed_missions`, and once every
//! mission is done the sector-complete call fires exactly once.
//!
//! Persistence goes through [`SectorStore`] so the core never decides the
//! on-disk format of the wider save system.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::content::{BlockId, ContentCatalog, ContentRef, ItemId, ItemStack};
use crate::error::{GameError, Result};
use crate::state::GameMode;

/// What a mission asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionKind {
    /// Survive until this wave number is reached.
    Waves {
        /// Target wave.
        target: u32,
    },
    /// Destroy every enemy core.
    Battle,
    /// Build one of this block.
    Block {
        /// Block to build.
        block: BlockId,
    },
    /// Stockpile items in the default team's cores.
    Items {
        /// Item.
        item: ItemId,
        /// Total across all cores.
        amount: i32,
    },
    /// Use a piece of content.
    Content {
        /// Content.
        content: ContentRef,
    },
}

/// Read-only snapshot mission predicates are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissionProgress {
    /// Current wave number.
    pub wave: u32,
    /// Items across the default team's cores, indexed by item id.
    pub core_items: Vec<i32>,
    /// Cores held by teams hostile to the default team.
    pub enemy_cores: usize,
}

/// A single campaign objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    /// Objective.
    pub kind: MissionKind,
    /// Mode that applies while this mission is active.
    pub mode: GameMode,
    done: bool,
}

impl Mission {
    /// New incomplete mission.
    #[must_use]
    pub const fn new(kind: MissionKind, mode: GameMode) -> Self {
        Self {
            kind,
            mode,
            done: false,
        }
    }

    /// Reset progress when the mission becomes active.
    pub fn begin(&mut self) {
        self.done = false;
    }

    /// Re-evaluate the predicate. Completion latches.
    pub fn update(&mut self, progress: &MissionProgress) {
        if self.done {
            return;
        }
        self.done = match &self.kind {
            MissionKind::Waves { target } => progress.wave >= *target,
            MissionKind::Battle => progress.enemy_cores == 0,
            MissionKind::Items { item, amount } => progress
                .core_items
                .get(item.index())
                .is_some_and(|have| have >= amount),
            MissionKind::Block { .. } | MissionKind::Content { .. } => false,
        };
    }

    /// Record that the default team used a piece of content.
    pub fn on_content_used(&mut self, content: ContentRef) {
        let hit = match &self.kind {
            MissionKind::Block { block } => content == ContentRef::Block(*block),
            MissionKind::Content { content: wanted } => content == *wanted,
            _ => false,
        };
        self.done |= hit;
    }

    /// Whether the objective has been met.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.done
    }

    /// Human-readable objective.
    #[must_use]
    pub fn describe(&self, content: &ContentCatalog) -> String {
        match &self.kind {
            MissionKind::Waves { target } => format!("survive {target} waves"),
            MissionKind::Battle => "destroy the enemy cores".to_string(),
            MissionKind::Block { block } => format!("build {}", content.block(*block).name),
            MissionKind::Items { item, amount } => {
                format!("collect {amount} {}", content.item(*item).name)
            }
            MissionKind::Content { content: used } => match used {
                ContentRef::Item(id) => format!("use {}", content.item(*id).name),
                ContentRef::Liquid(id) => format!("use {}", content.liquid(*id).name),
                ContentRef::Block(id) => format!("use {}", content.block(*id).name),
                ContentRef::Unit(id) => format!("use {}", content.unit(*id).name),
            },
        }
    }
}

/// Result of a mission-finish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// `completed_missions` moved forward by one.
    Advanced,
    /// The index was already finished; nothing changed.
    Stale,
}

/// A campaign sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    /// Sector grid x.
    pub x: i16,
    /// Sector grid y.
    pub y: i16,
    /// Missions in order.
    pub missions: Vec<Mission>,
    /// Added to every default-team core on play.
    pub starting_items: Vec<ItemStack>,
    completed_missions: usize,
    complete: bool,
}

impl Sector {
    /// Fresh sector with no missions finished.
    #[must_use]
    pub fn new(x: i16, y: i16, missions: Vec<Mission>) -> Self {
        Self {
            x,
            y,
            missions,
            starting_items: Vec::new(),
            completed_missions: 0,
            complete: false,
        }
    }

    /// Resume from persisted progress.
    #[must_use]
    pub fn with_progress(mut self, completed_missions: usize) -> Self {
        self.completed_missions = completed_missions.min(self.missions.len());
        self
    }

    /// Missions finished so far.
    #[must_use]
    pub const fn completed_missions(&self) -> usize {
        self.completed_missions
    }

    /// Whether the sector-complete transition has happened.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether every mission is finished.
    #[must_use]
    pub fn all_missions_done(&self) -> bool {
        self.completed_missions >= self.missions.len()
    }

    /// Index of the active mission, clamped to the last one.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        if self.missions.is_empty() {
            None
        } else {
            Some(self.completed_missions.min(self.missions.len() - 1))
        }
    }

    /// The active mission.
    #[must_use]
    pub fn current_mission(&self) -> Option<&Mission> {
        self.missions.get(self.current_index()?)
    }

    /// The active mission, mutably.
    pub fn current_mission_mut(&mut self) -> Option<&mut Mission> {
        let index = self.current_index()?;
        self.missions.get_mut(index)
    }

    /// Finish mission `index`.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if `index` skips ahead of the
    /// next unfinished mission or every mission is already done.
    pub fn finish_mission(&mut self, index: usize) -> Result<Advance> {
        if index < self.completed_missions {
            return Ok(Advance::Stale);
        }
        if index > self.completed_missions || self.all_missions_done() {
            return Err(GameError::InvalidState(format!(
                "mission {index} finished out of order ({} of {} done)",
                self.completed_missions,
                self.missions.len()
            )));
        }
        self.completed_missions += 1;
        if let Some(next) = self.missions.get_mut(self.completed_missions) {
            next.begin();
        }
        Ok(Advance::Advanced)
    }

    /// Flag the sector complete. Returns `false` if it already was.
    pub fn mark_complete(&mut self) -> bool {
        !std::mem::replace(&mut self.complete, true)
    }
}

/// Persisted progress of one sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSector {
    /// Sector x.
    pub x: i16,
    /// Sector y.
    pub y: i16,
    /// Missions finished.
    pub completed_missions: usize,
    /// Whether completed.
    pub complete: bool,
}

/// Persisted progress of every visited sector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorSaveData {
    sectors: BTreeMap<(i16, i16), SavedSector>,
}

impl SectorSaveData {
    fn entry(&mut self, x: i16, y: i16) -> &mut SavedSector {
        self.sectors.entry((x, y)).or_insert(SavedSector {
            x,
            y,
            completed_missions: 0,
            complete: false,
        })
    }

    /// Progress of one sector.
    #[must_use]
    pub fn get(&self, x: i16, y: i16) -> Option<&SavedSector> {
        self.sectors.get(&(x, y))
    }
}

/// Persistence backend for campaign progress.
///
/// Callers record changes, then call [`save`](SectorStore::save) exactly
/// once per state-advancing transition.
pub trait SectorStore: Send {
    /// Record how many missions of a sector are finished.
    fn record_progress(&mut self, x: i16, y: i16, completed_missions: usize);

    /// Record that a sector is complete.
    fn complete_sector(&mut self, x: i16, y: i16);

    /// Stored progress of one sector.
    fn progress(&self, x: i16, y: i16) -> Option<SavedSector>;

    /// Flush recorded changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot write.
    fn save(&mut self) -> Result<()>;
}

/// In-memory store. Counts saves.
#[derive(Debug, Clone, Default)]
pub struct MemorySectorStore {
    data: SectorSaveData,
    saves: usize,
}

impl MemorySectorStore {
    /// Number of `save` calls so far.
    #[must_use]
    pub const fn saves(&self) -> usize {
        self.saves
    }
}

impl SectorStore for MemorySectorStore {
    fn record_progress(&mut self, x: i16, y: i16, completed_missions: usize) {
        self.data.entry(x, y).completed_missions = completed_missions;
    }

    fn complete_sector(&mut self, x: i16, y: i16) {
        self.data.entry(x, y).complete = true;
    }

    fn progress(&self, x: i16, y: i16) -> Option<SavedSector> {
        self.data.get(x, y).copied()
    }

    fn save(&mut self) -> Result<()> {
        self.saves += 1;
        Ok(())
    }
}

/// Store backed by a RON file.
#[derive(Debug, Clone)]
pub struct RonSectorStore {
    path: PathBuf,
    data: SectorSaveData,
}

impl RonSectorStore {
    /// Open a store, reading existing progress if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let source = std::fs::read_to_string(&path)?;
            ron::from_str(&source).map_err(|e| GameError::DataParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            SectorSaveData::default()
        };
        Ok(Self { path, data })
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SectorStore for RonSectorStore {
    fn record_progress(&mut self, x: i16, y: i16, completed_missions: usize) {
        self.data.entry(x, y).completed_missions = completed_missions;
    }

    fn complete_sector(&mut self, x: i16, y: i16) {
        self.data.entry(x, y).complete = true;
    }

    fn progress(&self, x: i16, y: i16) -> Option<SavedSector> {
        self.data.get(x, y).copied()
    }

    fn save(&mut self) -> Result<()> {
        let text = ron::ser::to_string_pretty(&self.data, ron::ser::PrettyConfig::default())
            .map_err(|e| GameError::InvalidState(format!("cannot encode sector save: {e}")))?;
        std::fs::write(&self.path, text)?;
        tracing::debug!(path = %self.path.display(), "Saved sector progress");
        Ok(())
    }
}
