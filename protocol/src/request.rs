//! Typed events decoded from client packets.

use bytes::Bytes;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::context::Position;

/// One decoded client event, tagged with the address it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub peer: SocketAddr,
    pub kind: RequestKind,
}

impl Request {
    pub fn new(peer: SocketAddr, kind: RequestKind) -> Self {
        Self { peer, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Login(LoginRequest),
    Chat { message: String },
    PlayerMove(PlayerMove),
    Disconnect { reason: String },
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::Login(_) => "Login",
            RequestKind::Chat { .. } => "Chat",
            RequestKind::PlayerMove(_) => "PlayerMove",
            RequestKind::Disconnect { .. } => "Disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub protocol: i32,
    pub client_id: i64,
    /// Sent by newer clients; older ones get one derived from the client id
    pub uuid: Uuid,
    pub slim: bool,
    pub skin: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerMove {
    pub entity_id: i64,
    pub position: Position,
    pub head_yaw: f32,
    pub on_ground: bool,
}
