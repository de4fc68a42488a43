//! Typed game event bus.
//!
//! Collaborators outside the core (UI, audio, persistence, the server's
//! broadcast layer) subscribe to an [`EventKind`]. Every fired event is
//! also appended to the [`TickEvents`] returned from the tick.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::content::{BlockId, ContentRef, UnitTypeId};
use crate::error::ProtocolError;
use crate::remote::ConnectionId;
use crate::team::Team;
use crate::world::TilePos;

/// Something that happened during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Match started.
    Play,
    /// Match torn down.
    Reset,
    /// A wave spawned.
    Wave {
        /// Wave number that spawned.
        wave: u32,
        /// Units spawned across all spawn points.
        units: u32,
    },
    /// A tile's block changed.
    TileChange {
        /// Position.
        pos: TilePos,
        /// New block.
        block: BlockId,
        /// Owning team.
        team: Team,
    },
    /// Content was used for the first time by the default team.
    ContentUsed(ContentRef),
    /// A mission finished.
    MissionFinish {
        /// Index of the finished mission.
        index: usize,
    },
    /// The active sector completed.
    SectorComplete {
        /// Sector x.
        x: i16,
        /// Sector y.
        y: i16,
    },
    /// Ask the presentation layer to show the completion view.
    ShowSectorCompletion,
    /// The match ended.
    GameOver {
        /// Winning team.
        winner: Team,
    },
    /// A unit died.
    UnitDeath {
        /// Unit type.
        unit: UnitTypeId,
        /// Team it belonged to.
        team: Team,
    },
    /// A building was destroyed.
    BlockDestroyed {
        /// Position.
        pos: TilePos,
        /// Destroyed block.
        block: BlockId,
        /// Owning team.
        team: Team,
    },
    /// A remote call from a connection was rejected.
    ProtocolFault {
        /// Offending connection.
        connection: ConnectionId,
        /// What went wrong.
        error: ProtocolError,
    },
}

impl GameEvent {
    /// Discriminant used for subscriptions.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Play => EventKind::Play,
            Self::Reset => EventKind::Reset,
            Self::Wave { .. } => EventKind::Wave,
            Self::TileChange { .. } => EventKind::TileChange,
            Self::ContentUsed(_) => EventKind::ContentUsed,
            Self::MissionFinish { .. } => EventKind::MissionFinish,
            Self::SectorComplete { .. } => EventKind::SectorComplete,
            Self::ShowSectorCompletion => EventKind::ShowSectorCompletion,
            Self::GameOver { .. } => EventKind::GameOver,
            Self::UnitDeath { .. } => EventKind::UnitDeath,
            Self::BlockDestroyed { .. } => EventKind::BlockDestroyed,
            Self::ProtocolFault { .. } => EventKind::ProtocolFault,
        }
    }
}

/// Event discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum EventKind {
    Play,
    Reset,
    Wave,
    TileChange,
    ContentUsed,
    MissionFinish,
    SectorComplete,
    ShowSectorCompletion,
    GameOver,
    UnitDeath,
    BlockDestroyed,
    ProtocolFault,
}

/// Events fired during one tick, in firing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// Fired events.
    pub events: Vec<GameEvent>,
}

impl TickEvents {
    /// Count events of one kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    /// Whether nothing fired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

type Listener = Box<dyn FnMut(&GameEvent) + Send>;

/// Subscriber registry plus the pending per-tick log.
#[derive(Default)]
pub struct EventBus {
    listeners: BTreeMap<EventKind, Vec<Listener>>,
    pending: Vec<GameEvent>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.values().map(Vec::len).sum::<usize>())
            .field("pending", &self.pending)
            .finish()
    }
}

impl EventBus {
    /// Register a listener. Listeners run in subscription order.
    pub fn subscribe(&mut self, kind: EventKind, listener: impl FnMut(&GameEvent) + Send + 'static) {
        self.listeners.entry(kind).or_default().push(Box::new(listener));
    }

    /// Deliver an event to its listeners and log it for the tick.
    pub fn fire(&mut self, event: GameEvent) {
        if let Some(listeners) = self.listeners.get_mut(&event.kind()) {
            for listener in listeners {
                listener(&event);
            }
        }
        self.pending.push(event);
    }

    /// Take everything fired since the last drain.
    pub fn drain(&mut self) -> TickEvents {
        TickEvents {
            events: std::mem::take(&mut self.pending),
        }
    }
}
