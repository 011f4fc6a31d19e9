//! Local and cloud record stores

pub mod firebase;
pub mod local;
pub mod persistence;

pub use firebase::{RealtimeDbClient, RealtimeDbError};
pub use local::{LocalStore, StoreError};
pub use persistence::{DisplayPreference, PersistenceStore, Role, RoomIdentity};
