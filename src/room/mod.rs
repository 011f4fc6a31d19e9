//! Room identity and the host/spectator session

pub mod id;
pub mod session;

pub use id::RoomId;
pub use session::{CommandOutcome, RoomSession, SessionError, SessionView, SyncStatus};
