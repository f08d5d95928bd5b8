//! Domain events the simulation asks to send to clients.
//!
//! Each variant maps to a fixed packet sequence per protocol version. Variants
//! that describe the recipient itself (login acceptance, spawn, teleport) can
//! only be encoded with that recipient's [`PlayerSnapshot`] in the context.
//!
//! [`PlayerSnapshot`]: crate::context::PlayerSnapshot

use uuid::Uuid;

use crate::chunk::ChunkData;
use crate::context::{PlayerSnapshot, Position};

pub const REFUSAL_NO_REASON: &str = "disconnectionScreen.noReason";
pub const REFUSAL_SERVER_FULL: &str = "disconnectionScreen.serverFull";

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Login(LoginOutcome),
    Disconnect { reason: String, notify_client: bool },
    Chunk(ChunkData),
    Spawn,
    Teleport { position: Position, on_ground: bool },
    Chat(ChatMessage),
    AddPlayer(Box<PlayerSnapshot>),
    Popup { message: String },
    RemovePlayer { entity_id: i64, client_id: i64, uuid: Uuid },
    PlayerMove {
        entity_id: i64,
        position: Position,
        head_yaw: f32,
        mode: MoveMode,
        on_ground: bool,
    },
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::Login(_) => "Login",
            Response::Disconnect { .. } => "Disconnect",
            Response::Chunk(_) => "Chunk",
            Response::Spawn => "Spawn",
            Response::Teleport { .. } => "Teleport",
            Response::Chat(_) => "Chat",
            Response::AddPlayer(_) => "AddPlayer",
            Response::Popup { .. } => "Popup",
            Response::RemovePlayer { .. } => "RemovePlayer",
            Response::PlayerMove { .. } => "PlayerMove",
        }
    }

    /// True when encoding needs the recipient's own snapshot
    pub fn needs_player_context(&self) -> bool {
        matches!(
            self,
            Response::Login(LoginOutcome::Accepted) | Response::Spawn | Response::Teleport { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted,
    Refused(RefusalReason),
    OutdatedClient,
    OutdatedServer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefusalReason {
    Unspecified,
    ServerFull,
    Other(String),
}

impl RefusalReason {
    /// Text shown on the client's disconnection screen
    pub fn message(&self) -> &str {
        match self {
            RefusalReason::Unspecified => REFUSAL_NO_REASON,
            RefusalReason::ServerFull => REFUSAL_SERVER_FULL,
            RefusalReason::Other(reason) => reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    Normal,
    Reset,
}

impl MoveMode {
    pub fn id(self) -> u8 {
        match self {
            MoveMode::Normal => 0,
            MoveMode::Reset => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    Raw(String),
    Chat { source: String, message: String },
    Translation { key: String, params: Vec<String> },
    Tip(String),
    System(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_messages() {
        assert_eq!(RefusalReason::Unspecified.message(), "disconnectionScreen.noReason");
        assert_eq!(RefusalReason::ServerFull.message(), "disconnectionScreen.serverFull");
        assert_eq!(
            RefusalReason::Other("Banned".to_string()).message(),
            "Banned"
        );
    }

    #[test]
    fn test_player_context_requirements() {
        assert!(Response::Login(LoginOutcome::Accepted).needs_player_context());
        assert!(Response::Spawn.needs_player_context());
        assert!(!Response::Login(LoginOutcome::OutdatedClient).needs_player_context());
        assert!(!Response::Popup {
            message: "hi".to_string()
        }
        .needs_player_context());
    }
}
