//! Match state and the rules that move it between phases

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::score::{CellPosition, ScoreCard, ScoreCellValue};

/// Blank slots offered on a fresh setup screen
const DEFAULT_SETUP_SLOTS: usize = 2;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPhase {
    /// Collecting player names
    #[default]
    Setup,
    /// Cells are being scored
    Playing,
    /// No further cell updates
    Finished,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Playing => "playing",
            Self::Finished => "finished",
        })
    }
}

/// A player's sheet and running total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub name: String,
    pub score: ScoreCard,
    /// Always equal to `score.total()`
    pub total: u32,
}

impl PlayerEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: ScoreCard::new(),
            total: 0,
        }
    }
}

/// One entry of the append-only move log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Player name at the time of the move
    pub player: String,
    pub label: String,
    /// Absent on the wire when the move cleared a cell
    #[serde(default)]
    pub value: ScoreCellValue,
    pub timestamp: DateTime<Utc>,
}

/// Ranked row for the results screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub place: usize,
    pub name: String,
    pub total: u32,
}

/// Match state machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("At least one non-blank player name is required")]
    Validation,

    #[error("Invalid cell value: {0}")]
    InvalidCellValue(#[from] CellRejection),

    #[error("Expected {expected} phase, match is {actual}")]
    WrongPhase {
        expected: MatchPhase,
        actual: MatchPhase,
    },

    #[error("No player at index {0}")]
    UnknownPlayer(usize),
}

/// Why a cell update was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CellRejection {
    #[error("{value} is not legal for {position}")]
    NotAllowed {
        position: CellPosition,
        value: ScoreCellValue,
    },

    #[error("cells can only change while playing, match is {0}")]
    OutsidePlaying(MatchPhase),
}

/// The authoritative match aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    pub phase: MatchPhase,
    pub players: Vec<PlayerEntry>,
    /// Selected player; `< players.len()` whenever players is non-empty
    pub active_index: usize,
    /// Set iff some cell holds the instant-win marker
    pub instant_winner: Option<String>,
    pub move_log: Vec<MoveRecord>,
    /// Names seeding the setup screen
    pub setup_names: Vec<String>,
}

impl Default for MatchState {
    fn default() -> Self {
        Self {
            phase: MatchPhase::Setup,
            players: Vec::new(),
            active_index: 0,
            instant_winner: None,
            move_log: Vec::new(),
            setup_names: vec![String::new(); DEFAULT_SETUP_SLOTS],
        }
    }
}

impl MatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Setup -> Playing with one fresh sheet per non-blank name
    pub fn start<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), GameError> {
        if self.phase != MatchPhase::Setup {
            return Err(GameError::WrongPhase {
                expected: MatchPhase::Setup,
                actual: self.phase,
            });
        }

        let players: Vec<PlayerEntry> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|n| !n.trim().is_empty())
            .map(PlayerEntry::new)
            .collect();

        if players.is_empty() {
            return Err(GameError::Validation);
        }

        info!(player_count = players.len(), "Match started");

        self.players = players;
        self.phase = MatchPhase::Playing;
        self.active_index = 0;
        self.instant_winner = None;
        self.move_log.clear();
        Ok(())
    }

    /// Whether `set_cell` would accept this write, without performing it
    pub fn check_cell(
        &self,
        player_index: usize,
        position: CellPosition,
        value: ScoreCellValue,
    ) -> Result<(), GameError> {
        if self.phase != MatchPhase::Playing {
            return Err(CellRejection::OutsidePlaying(self.phase).into());
        }
        if !position.category().allows(value) {
            return Err(CellRejection::NotAllowed { position, value }.into());
        }
        if player_index >= self.players.len() {
            return Err(GameError::UnknownPlayer(player_index));
        }
        Ok(())
    }

    /// Write `value` into a player's cell, log the move and recompute the total.
    ///
    /// Writing `InstantWin` also names the winner and finishes the match in the
    /// same step, regardless of totals.
    pub fn set_cell(
        &mut self,
        player_index: usize,
        position: CellPosition,
        value: ScoreCellValue,
    ) -> Result<MoveRecord, GameError> {
        self.check_cell(player_index, position, value)?;
        let player = self
            .players
            .get_mut(player_index)
            .ok_or(GameError::UnknownPlayer(player_index))?;

        player.score.set(position, value);
        player.total = player.score.total();

        let record = MoveRecord {
            player: player.name.clone(),
            label: position.label().to_string(),
            value,
            timestamp: Utc::now(),
        };

        debug!(
            player = %record.player,
            cell = position.key(),
            value = %value,
            total = player.total,
            "Cell updated"
        );

        if value == ScoreCellValue::InstantWin {
            info!(winner = %player.name, "Instant win declared");
            self.instant_winner = Some(player.name.clone());
            self.phase = MatchPhase::Finished;
        }

        self.move_log.push(record.clone());
        Ok(record)
    }

    /// Playing -> Finished without an instant winner
    pub fn finish_manually(&mut self) -> Result<(), GameError> {
        if self.phase != MatchPhase::Playing {
            return Err(GameError::WrongPhase {
                expected: MatchPhase::Playing,
                actual: self.phase,
            });
        }
        self.phase = MatchPhase::Finished;
        info!(moves = self.move_log.len(), "Match finished manually");
        Ok(())
    }

    /// Back to Setup, dropping players, winner and log
    pub fn hard_reset(&mut self, preserve_names: bool) {
        let setup_names = if preserve_names && !self.players.is_empty() {
            self.players.iter().map(|p| p.name.clone()).collect()
        } else {
            vec![String::new(); DEFAULT_SETUP_SLOTS]
        };

        *self = Self {
            setup_names,
            ..Self::default()
        };
        info!(preserve_names, "Match reset");
    }

    pub fn set_active_index(&mut self, index: usize) -> Result<(), GameError> {
        if index >= self.players.len() {
            return Err(GameError::UnknownPlayer(index));
        }
        self.active_index = index;
        Ok(())
    }

    /// Players by total, highest first; ties keep seating order
    pub fn standings(&self) -> Vec<Standing> {
        let mut ranked: Vec<&PlayerEntry> = self.players.iter().collect();
        ranked.sort_by(|a, b| b.total.cmp(&a.total));
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, p)| Standing {
                place: i + 1,
                name: p.name.clone(),
                total: p.total,
            })
            .collect()
    }

    /// Declared winner once the match is over
    pub fn winner(&self) -> Option<String> {
        if self.phase != MatchPhase::Finished {
            return None;
        }
        self.instant_winner
            .clone()
            .or_else(|| self.standings().into_iter().next().map(|s| s.name))
    }

    pub fn has_players(&self) -> bool {
        !self.players.is_empty()
    }
}
