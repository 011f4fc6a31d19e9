//! Two-step confirmation for destructive actions

use serde::Serialize;
use uuid::Uuid;

use super::score::CellPosition;

/// An action held back until the user accepts it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    DeclareInstantWin {
        player_index: usize,
        position: CellPosition,
    },
    FinishManually,
    HardReset {
        preserve_names: bool,
    },
    LeaveRoom,
}

/// What the UI shows while an action waits for an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPrompt {
    pub id: Uuid,
    pub description: String,
    pub action: PendingAction,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmError {
    #[error("No pending action with id {0}")]
    NotPending(Uuid),
}

/// Holds at most one pending action. Nothing runs until `accept`.
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    pending: Option<PendingPrompt>,
}

impl ConfirmationGate {
    /// Queue an action, replacing any prompt still open
    pub fn submit(&mut self, action: PendingAction, description: impl Into<String>) -> PendingPrompt {
        let prompt = PendingPrompt {
            id: Uuid::new_v4(),
            description: description.into(),
            action,
        };
        self.pending = Some(prompt.clone());
        prompt
    }

    /// Hand the action back for execution
    pub fn accept(&mut self, id: Uuid) -> Result<PendingAction, ConfirmError> {
        match self.pending.take() {
            Some(prompt) if prompt.id == id => Ok(prompt.action),
            other => {
                self.pending = other;
                Err(ConfirmError::NotPending(id))
            }
        }
    }

    pub fn reject(&mut self, id: Uuid) -> Result<PendingAction, ConfirmError> {
        self.accept(id)
    }

    pub fn pending(&self) -> Option<&PendingPrompt> {
        self.pending.as_ref()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
