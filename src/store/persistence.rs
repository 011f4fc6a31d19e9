//! Durable session state: match snapshot, room identity, display preference

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::game::{MatchSnapshot, MatchState};
use crate::room::RoomId;

use super::local::{LocalStore, StoreError};

const MATCH_KEY: &str = "cacho_classic_v2";
const ROOM_KEY: &str = "cacho_room";
const SETTINGS_KEY: &str = "cacho_settings";

/// Role held in a shared room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authors the match and pushes snapshots
    Host,
    /// Read-only replica
    Spectator,
}

/// Room id and role, always stored together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomIdentity {
    pub room_id: RoomId,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotationStyle {
    #[default]
    Modern,
    Traditional,
    Emoji,
}

/// How the UI renders scores. Stored and returned, never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPreference {
    #[serde(default)]
    pub notation_style: NotationStyle,
}

/// Persistence for one device
#[derive(Clone, Debug)]
pub struct PersistenceStore {
    local: LocalStore,
}

impl PersistenceStore {
    pub fn new(local: LocalStore) -> Self {
        Self { local }
    }

    /// Read a record, discarding it if it no longer decodes
    fn read_or_discard<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.local.get(key) {
            Ok(value) => value,
            Err(e @ StoreError::Corrupt { .. }) => {
                warn!(key, error = %e, "Discarding unreadable record");
                if let Err(e) = self.local.remove(key) {
                    warn!(key, error = %e, "Failed to remove unreadable record");
                }
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to read record");
                None
            }
        }
    }

    /// Saved match, or a fresh setup when nothing usable is stored
    pub fn load_match(&self) -> MatchState {
        self.read_or_discard::<MatchSnapshot>(MATCH_KEY)
            .map(MatchSnapshot::restore)
            .unwrap_or_default()
    }

    pub fn save_match(&self, state: &MatchState) -> Result<(), StoreError> {
        self.local.put(MATCH_KEY, &MatchSnapshot::capture(state))
    }

    pub fn load_room(&self) -> Option<RoomIdentity> {
        self.read_or_discard(ROOM_KEY)
    }

    pub fn save_room(&self, identity: &RoomIdentity) -> Result<(), StoreError> {
        self.local.put(ROOM_KEY, identity)
    }

    pub fn clear_room(&self) -> Result<(), StoreError> {
        self.local.remove(ROOM_KEY)
    }

    pub fn load_preference(&self) -> DisplayPreference {
        self.read_or_discard(SETTINGS_KEY).unwrap_or_default()
    }

    pub fn save_preference(&self, preference: &DisplayPreference) -> Result<(), StoreError> {
        self.local.put(SETTINGS_KEY, preference)
    }

    /// Drop match and room records; the display preference survives
    pub fn clear_session(&self) -> Result<(), StoreError> {
        self.local.remove(MATCH_KEY)?;
        self.local.remove(ROOM_KEY)?;
        debug!("Session records cleared");
        Ok(())
    }
}
