//! WebSocket protocol message definitions
//! These are the wire types between the session and a connected UI

use serde::{Deserialize, Serialize};

use crate::room::SessionView;

/// Messages sent from the UI to the session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Ask for the current view again
    Refresh,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages pushed from the session to the UI
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { server_time: u64 },

    /// Full view after any change (local mutation, received snapshot, prompt)
    View { view: Box<SessionView> },

    /// Non-fatal problem the UI may surface
    Warning { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn view(view: SessionView) -> Self {
        Self::View {
            view: Box::new(view),
        }
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self::Warning {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
