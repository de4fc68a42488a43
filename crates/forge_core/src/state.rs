//! Process-wide match state.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::{fixed_serde, Fixed};
use crate::sector::Sector;
use crate::team::{Team, Teams};

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum State {
    /// No match running.
    #[default]
    Menu,
    /// Ticking.
    Playing,
    /// Match loaded but frozen.
    Paused,
}

/// Rules preset for the current match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameMode {
    /// Survive timed waves.
    #[default]
    Waves,
    /// Unlimited resources, waves on demand only.
    Sandbox,
    /// Waves on demand only.
    Freebuild,
    /// Destroy the enemy cores; no waves.
    Attack,
    /// Teams fight each other; no waves.
    Pvp,
    /// Terminal mode after a sector is completed.
    Victory,
}

impl GameMode {
    /// Waves never spawn.
    #[must_use]
    pub const fn disable_waves(self) -> bool {
        matches!(self, Self::Attack | Self::Pvp | Self::Victory)
    }

    /// The wave timer does not count down.
    #[must_use]
    pub const fn disable_wave_timer(self) -> bool {
        matches!(self, Self::Sandbox | Self::Freebuild)
    }

    /// Team-versus-team game over rules apply.
    #[must_use]
    pub const fn is_pvp(self) -> bool {
        matches!(self, Self::Pvp)
    }

    /// Cores never run out of items.
    #[must_use]
    pub const fn infinite_resources(self) -> bool {
        matches!(self, Self::Sandbox)
    }
}

/// Difficulty preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Difficulty {
    /// Very slow waves.
    Training,
    /// Slow waves.
    Easy,
    /// Baseline.
    #[default]
    Normal,
    /// Fast waves.
    Hard,
    /// Very fast waves.
    Insane,
}

impl Difficulty {
    /// Multiplier on wave spacing.
    #[must_use]
    pub fn time_scaling(self) -> Fixed {
        match self {
            Self::Training => Fixed::from_num(3),
            Self::Easy => Fixed::from_num(1.5),
            Self::Normal => Fixed::ONE,
            Self::Hard => Fixed::from_num(0.75),
            Self::Insane => Fixed::from_num(0.5),
        }
    }
}

/// Match state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    state: State,
    /// Next wave number. Starts at 1.
    pub wave: u32,
    /// Ticks until the next wave.
    #[serde(with = "fixed_serde")]
    pub wavetime: Fixed,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Rules preset.
    pub mode: GameMode,
    /// Per-team state.
    pub teams: Teams,
    /// Set once per match.
    pub game_over: bool,
    /// Winner reported with game over, if any.
    pub winner: Option<Team>,
    /// Active campaign sector.
    pub sector: Option<Sector>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            state: State::Menu,
            wave: 1,
            wavetime: Fixed::ZERO,
            difficulty: Difficulty::Normal,
            mode: GameMode::Waves,
            teams: Teams::new(),
            game_over: false,
            winner: None,
            sector: None,
        }
    }
}

impl GameState {
    /// Fresh state in the menu, with the first wave timer for `difficulty`.
    #[must_use]
    pub fn new(difficulty: Difficulty, wave_spacing: Fixed, sector: Option<Sector>) -> Self {
        let mut state = Self {
            difficulty,
            sector,
            ..Self::default()
        };
        state.wavetime = state.wave_spacing(wave_spacing);
        state
    }

    /// Current phase.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Whether the phase is `state`.
    #[must_use]
    pub fn is(&self, state: State) -> bool {
        self.state == state
    }

    /// Move to another phase.
    ///
    /// Allowed: menu to playing, playing and paused to each other, and any
    /// phase back to menu.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] for any other transition.
    pub fn set(&mut self, next: State) -> Result<()> {
        let allowed = matches!(
            (self.state, next),
            (State::Menu | State::Paused, State::Playing)
                | (State::Playing, State::Paused)
                | (_, State::Menu)
        ) || self.state == next;
        if !allowed {
            return Err(GameError::InvalidState(format!(
                "cannot go from {:?} to {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Whether the match is ticking gameplay this frame.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == State::Playing
    }

    /// Fresh wave timer for the current difficulty.
    #[must_use]
    pub fn wave_spacing(&self, spacing: Fixed) -> Fixed {
        spacing * self.difficulty.time_scaling()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut state = GameState::default();
        assert!(state.set(State::Paused).is_err());
        state.set(State::Playing).unwrap();
        state.set(State::Paused).unwrap();
        state.set(State::Playing).unwrap();
        state.set(State::Menu).unwrap();
        assert!(state.is(State::Menu));
    }

    #[test]
    fn test_mode_flags() {
        assert!(!GameMode::Waves.disable_waves());
        assert!(GameMode::Victory.disable_waves());
        assert!(GameMode::Sandbox.disable_wave_timer());
        assert!(GameMode::Pvp.is_pvp());
    }

    #[test]
    fn test_time_scaling() {
        let state = GameState::new(Difficulty::Hard, Fixed::from_num(100), None);
        assert_eq!(state.wave_spacing(Fixed::from_num(100)), Fixed::from_num(75));
        assert_eq!(state.wavetime, Fixed::from_num(75));
        assert!(state.is(State::Menu));
        assert_eq!(state.wave, 1);
    }
}
