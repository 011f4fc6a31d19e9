//! Match rules and wire snapshots

pub mod confirm;
pub mod r#match;
pub mod score;
pub mod snapshot;

pub use confirm::{ConfirmError, ConfirmationGate, PendingAction, PendingPrompt};
pub use r#match::{GameError, MatchPhase, MatchState, MoveRecord, PlayerEntry, Standing};
pub use score::{CellPosition, ScoreCellValue};
pub use snapshot::{MatchSnapshot, RoomSnapshot};
