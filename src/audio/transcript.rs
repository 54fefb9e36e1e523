//! Per-turn transcription buffers.
//!
//! User and model transcription fragments arrive independently and are
//! appended to separate buffers. A turn-complete signal flushes both as one
//! immutable pair and empties the buffers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One completed turn as shown in the transcript log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnTranscript {
    pub user: String,
    pub model: String,
}

#[derive(Debug, Default)]
pub struct TurnAccumulator {
    user: String,
    model: String,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. A fragment without a role has nowhere to go and
    /// is dropped; returns whether it was kept.
    pub fn push(&mut self, role: Option<Role>, text: &str) -> bool {
        match role {
            Some(Role::User) => self.user.push_str(text),
            Some(Role::Model) => self.model.push_str(text),
            None => {
                tracing::debug!(fragment = %text, "Dropping transcription fragment without a role");
                return false;
            }
        }
        true
    }

    /// Close the turn: emit both sides (even if one is empty) and reset.
    pub fn flush(&mut self) -> TurnTranscript {
        TurnTranscript {
            user: std::mem::take(&mut self.user),
            model: std::mem::take(&mut self.model),
        }
    }

    #[cfg(test)]
    pub fn pending(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user,
            Role::Model => &self.model,
        }
    }

    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
    }
}
