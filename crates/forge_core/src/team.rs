//! Teams and their core registry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::world::TilePos;

/// A team.
///
/// The enumeration is fixed; every team always has a [`TeamState`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Team {
    /// Unowned wreckage.
    Derelict,
    /// The default (player) team.
    #[default]
    Blue,
    /// The wave team.
    Red,
    /// Third PvP team.
    Green,
    /// Fourth PvP team.
    Purple,
    /// Fifth PvP team.
    Orange,
}

impl Team {
    /// Every team in registration order.
    pub const ALL: [Self; 6] = [
        Self::Derelict,
        Self::Blue,
        Self::Red,
        Self::Green,
        Self::Purple,
        Self::Orange,
    ];

    /// The player team outside PvP.
    pub const DEFAULT: Self = Self::Blue;

    /// The team waves spawn on.
    pub const WAVE: Self = Self::Red;

    /// Position in [`Team::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether `other` is an enemy. Derelict is nobody's enemy.
    #[must_use]
    pub fn is_enemy(self, other: Self) -> bool {
        self != other && self != Self::Derelict && other != Self::Derelict
    }
}

/// Per-team state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamState {
    /// Core tiles. Losing the last one loses the team.
    pub cores: BTreeSet<TilePos>,
}

impl TeamState {
    /// Whether the team still holds a core.
    #[must_use]
    pub fn active(&self) -> bool {
        !self.cores.is_empty()
    }
}

/// Registry of every team's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teams {
    states: Vec<TeamState>,
}

impl Default for Teams {
    fn default() -> Self {
        Self::new()
    }
}

impl Teams {
    /// Fresh registry with no cores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: vec![TeamState::default(); Team::ALL.len()],
        }
    }

    /// State of one team.
    #[must_use]
    pub fn get(&self, team: Team) -> &TeamState {
        &self.states[team.index()]
    }

    /// Mutable state of one team.
    pub fn get_mut(&mut self, team: Team) -> &mut TeamState {
        &mut self.states[team.index()]
    }

    /// Number of core tiles a team holds.
    #[must_use]
    pub fn core_count(&self, team: Team) -> usize {
        self.get(team).cores.len()
    }

    /// Teams holding at least one core, in registration order.
    pub fn active(&self) -> impl Iterator<Item = Team> + '_ {
        Team::ALL
            .into_iter()
            .filter(|&team| self.get(team).active())
    }

    /// Record a core tile.
    pub fn add_core(&mut self, team: Team, pos: TilePos) {
        self.get_mut(team).cores.insert(pos);
    }

    /// Forget a core tile from whichever team held it.
    pub fn remove_core(&mut self, pos: TilePos) {
        for state in &mut self.states {
            state.cores.remove(&pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_teams_follow_cores() {
        let mut teams = Teams::new();
        assert_eq!(teams.active().count(), 0);

        teams.add_core(Team::Blue, TilePos::new(1, 1));
        teams.add_core(Team::Red, TilePos::new(5, 5));
        assert_eq!(teams.active().collect::<Vec<_>>(), vec![Team::Blue, Team::Red]);

        teams.remove_core(TilePos::new(5, 5));
        assert_eq!(teams.active().collect::<Vec<_>>(), vec![Team::Blue]);
        assert_eq!(teams.core_count(Team::Blue), 1);
    }

    #[test]
    fn test_derelict_has_no_enemies() {
        assert!(Team::Blue.is_enemy(Team::Red));
        assert!(!Team::Blue.is_enemy(Team::Blue));
        assert!(!Team::Derelict.is_enemy(Team::Red));
    }
}
