//! Snapshot building for persistence and replication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::r#match::{MatchPhase, MatchState, MoveRecord, PlayerEntry};

/// Serialized match: what is persisted locally and nested in room snapshots.
///
/// Every field defaults so records written by the cloud database (which
/// drops empty arrays and nulls) still decode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    #[serde(default)]
    pub players: Vec<PlayerEntry>,
    #[serde(default)]
    pub phase: MatchPhase,
    #[serde(default)]
    pub instant_winner: Option<String>,
    #[serde(default)]
    pub move_log: Vec<MoveRecord>,
}

impl MatchSnapshot {
    pub fn capture(state: &MatchState) -> Self {
        Self {
            players: state.players.clone(),
            phase: state.phase,
            instant_winner: state.instant_winner.clone(),
            move_log: state.move_log.clone(),
        }
    }

    /// Rebuild a match, re-deriving totals from the cells. An instant win
    /// marker decides `instant_winner` and finishes the match.
    pub fn restore(self) -> MatchState {
        let players: Vec<PlayerEntry> = self
            .players
            .into_iter()
            .map(|mut p| {
                let total = p.score.total();
                if p.total != total {
                    warn!(player = %p.name, stored = p.total, computed = total, "Stored total out of date");
                    p.total = total;
                }
                p
            })
            .collect();

        let marked = players
            .iter()
            .find(|p| p.score.has_instant_win())
            .map(|p| p.name.clone());
        let instant_winner = match (self.instant_winner, marked) {
            (Some(stored), Some(marked)) if stored == marked => Some(stored),
            (stored, Some(marked)) => {
                warn!(stored = ?stored, player = %marked, "Instant win cell without matching winner");
                Some(marked)
            }
            (Some(stored), None) => {
                warn!(stored = %stored, "Instant winner without an instant win cell, clearing");
                None
            }
            (None, None) => None,
        };

        let mut phase = self.phase;
        if instant_winner.is_some() && phase != MatchPhase::Finished {
            warn!(phase = %phase, "Instant win recorded on an open match, finishing it");
            phase = MatchPhase::Finished;
        }

        MatchState {
            phase,
            players,
            active_index: 0,
            instant_winner,
            move_log: self.move_log,
            ..MatchState::default()
        }
    }
}

/// Match snapshot plus room metadata, exchanged wholesale between devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    #[serde(flatten)]
    pub game: MatchSnapshot,
    #[serde(default)]
    pub active_index: usize,
    pub last_updated: DateTime<Utc>,
}

impl RoomSnapshot {
    pub fn capture(state: &MatchState) -> Self {
        Self {
            game: MatchSnapshot::capture(state),
            active_index: state.active_index,
            last_updated: Utc::now(),
        }
    }

    pub fn into_state(self) -> MatchState {
        let active_index = self.active_index;
        let mut state = self.game.restore();
        if active_index < state.players.len() {
            state.active_index = active_index;
        }
        state
    }

    pub fn player_count(&self) -> usize {
        self.game.players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::score::{CellPosition, ScoreCellValue};

    fn sample() -> MatchState {
        let mut state = MatchState::new();
        state.start(&["P1", "P2"]).unwrap();
        state
            .set_cell(0, CellPosition::Balas, ScoreCellValue::Numeric(3))
            .unwrap();
        state
            .set_cell(1, CellPosition::Full, ScoreCellValue::Numeric(30))
            .unwrap();
        state.set_active_index(1).unwrap();
        state
    }

    #[test]
    fn room_snapshot_has_the_documented_shape() {
        let snapshot = RoomSnapshot::capture(&sample());
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["phase"], "playing");
        assert!(json["instantWinner"].is_null());
        assert_eq!(json["activeIndex"], 1);
        assert!(json["lastUpdated"].is_string());
        assert_eq!(json["players"][1]["name"], "P2");
        assert_eq!(json["players"][1]["total"], 30);
        assert_eq!(json["players"][0]["score"]["1-1"], 3);
        assert_eq!(json["moveLog"][1]["label"], "Full");
        assert_eq!(json["moveLog"][1]["value"], 30);
        assert!(json["moveLog"][0]["timestamp"].is_string());
    }

    #[test]
    fn replica_matches_the_captured_state() {
        let state = sample();
        let wire = serde_json::to_string(&RoomSnapshot::capture(&state)).unwrap();
        let replica = serde_json::from_str::<RoomSnapshot>(&wire)
            .unwrap()
            .into_state();

        assert_eq!(replica.players, state.players);
        assert_eq!(replica.phase, state.phase);
        assert_eq!(replica.instant_winner, state.instant_winner);
        assert_eq!(replica.move_log, state.move_log);
        assert_eq!(replica.active_index, 1);
    }

    #[test]
    fn sparse_cloud_record_decodes() {
        let raw = r#"{
            "players": [{"name": "Ana", "score": {"1-1": 2}, "total": 99}],
            "phase": "playing",
            "moveLog": [{"player": "Ana", "label": "Balas", "timestamp": "2024-05-01T10:00:00Z"}],
            "activeIndex": 4,
            "lastUpdated": "2024-05-01T10:00:01Z"
        }"#;
        let state = serde_json::from_str::<RoomSnapshot>(raw)
            .unwrap()
            .into_state();

        assert_eq!(state.players[0].total, 2);
        assert_eq!(state.move_log[0].value, ScoreCellValue::Empty);
        assert_eq!(state.active_index, 0);
        assert!(state.instant_winner.is_none());
    }

    #[test]
    fn instant_win_cell_finishes_the_match_on_restore() {
        let mut state = sample();
        state
            .set_cell(1, CellPosition::FirstGrande, ScoreCellValue::InstantWin)
            .unwrap();
        let mut snapshot = MatchSnapshot::capture(&state);
        snapshot.phase = MatchPhase::Playing;
        snapshot.instant_winner = None;

        let restored = snapshot.restore();
        assert_eq!(restored.phase, MatchPhase::Finished);
        assert_eq!(restored.instant_winner.as_deref(), Some("P2"));
    }

    #[test]
    fn instant_winner_without_a_marked_cell_is_cleared() {
        let mut snapshot = MatchSnapshot::capture(&sample());
        snapshot.instant_winner = Some("P1".to_string());

        let restored = snapshot.restore();
        assert!(restored.instant_winner.is_none());
        assert_eq!(restored.phase, MatchPhase::Playing);
    }

    #[test]
    fn consistent_instant_win_restores_unchanged() {
        let mut state = sample();
        state
            .set_cell(0, CellPosition::FirstGrande, ScoreCellValue::InstantWin)
            .unwrap();
        let restored = MatchSnapshot::capture(&state).restore();
        assert_eq!(restored.phase, MatchPhase::Finished);
        assert_eq!(restored.instant_winner, state.instant_winner);
        assert_eq!(restored.players, state.players);
    }

    #[test]
    fn empty_match_snapshot_restores_setup() {
        let state = MatchSnapshot::default().restore();
        assert_eq!(state, MatchState::new());
    }
}
