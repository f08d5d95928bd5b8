//! Tick-side simulation: players, chat and movement.
//!
//! Requests decoded by the network receiver are applied here, one tick at a
//! time. Every change produces [`Outbound`] responses addressed to the peers
//! that should see it; the network layer turns those into packets with each
//! recipient's codec.

use indexmap::IndexMap;
use log::{debug, error, info};
use protocol::{
    ChatMessage, ChunkData, ChunkPosition, LoginOutcome, LoginRequest, MoveMode, PlayerMove,
    PlayerSnapshot, RefusalReason, Request, RequestKind, Response, WorldInfo,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::outgoing::RecipientSet;
use crate::world::{chunks_around, ChunkProvider};

pub const JOIN_MESSAGE: &str = "%multiplayer.player.joined";
pub const LEAVE_MESSAGE: &str = "%multiplayer.player.left";

/// A response and the peers it is meant for
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipients: RecipientSet,
    pub response: Response,
}

impl Outbound {
    pub fn new(recipients: RecipientSet, response: Response) -> Self {
        Self {
            recipients,
            response,
        }
    }

    pub fn to(addr: SocketAddr, response: Response) -> Self {
        Self::new(RecipientSet::single(addr), response)
    }
}

pub struct GameState {
    pub tick: u64,
    players: IndexMap<SocketAddr, PlayerSnapshot>,
    world: WorldInfo,
    chunks: Arc<dyn ChunkProvider>,
    max_players: usize,
    view_radius: i32,
    next_entity_id: i64,
}

impl GameState {
    pub fn new(
        world: WorldInfo,
        chunks: Arc<dyn ChunkProvider>,
        max_players: usize,
        view_radius: i32,
    ) -> Self {
        Self {
            tick: 0,
            players: IndexMap::new(),
            world,
            chunks,
            max_players,
            view_radius,
            next_entity_id: 1,
        }
    }

    pub fn world(&self) -> &WorldInfo {
        &self.world
    }

    pub fn player(&self, addr: SocketAddr) -> Option<&PlayerSnapshot> {
        self.players.get(&addr)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Applies one decoded request
    pub fn apply(&mut self, request: Request) -> Vec<Outbound> {
        let peer = request.peer;
        match request.kind {
            RequestKind::Login(login) => self.login(peer, login),
            RequestKind::Chat { message } => self.chat(peer, message),
            RequestKind::PlayerMove(movement) => self.move_player(peer, movement),
            RequestKind::Disconnect { reason } => {
                debug!("{} disconnected: {}", peer, reason);
                self.remove_player(peer)
            }
        }
    }

    fn everyone(&self) -> RecipientSet {
        self.players.keys().copied().collect()
    }

    fn everyone_but(&self, addr: SocketAddr) -> RecipientSet {
        self.players.keys().copied().filter(|a| *a != addr).collect()
    }

    fn login(&mut self, peer: SocketAddr, login: LoginRequest) -> Vec<Outbound> {
        if self.players.contains_key(&peer) {
            debug!("Ignoring repeated login from {}", peer);
            return Vec::new();
        }
        if self.players.len() >= self.max_players {
            info!("Refusing {} ({}): server full", login.username, peer);
            return vec![Outbound::to(
                peer,
                Response::Login(LoginOutcome::Refused(RefusalReason::ServerFull)),
            )];
        }
        if self
            .players
            .values()
            .any(|p| p.username.eq_ignore_ascii_case(&login.username))
        {
            info!("Refusing {} ({}): name in use", login.username, peer);
            return vec![Outbound::to(
                peer,
                Response::Login(LoginOutcome::Refused(RefusalReason::Other(
                    "Already logged in".to_string(),
                ))),
            )];
        }

        let entity_id = self.next_entity_id;
        self.next_entity_id += 1;
        let player = PlayerSnapshot {
            entity_id,
            client_id: login.client_id,
            uuid: login.uuid,
            nametag: login.username.clone(),
            username: login.username,
            position: self.world.spawn.to_position(),
            gamemode: self.world.gamemode,
            skin: login.skin,
            slim: login.slim,
        };
        info!(
            "{} joined as entity {} at ({}, {}, {})",
            player.username, entity_id, player.position.x, player.position.y, player.position.z
        );

        let mut out = vec![Outbound::to(peer, Response::Login(LoginOutcome::Accepted))];

        let spawn = self.world.spawn;
        let center = ChunkPosition::containing(spawn.x, spawn.z);
        for position in chunks_around(center, self.view_radius) {
            match self.chunks.load_chunk(position) {
                Ok(layers) => out.push(Outbound::to(
                    peer,
                    Response::Chunk(ChunkData::new(position, &layers)),
                )),
                Err(e) => error!("Failed to load chunk ({}, {}): {}", position.x, position.z, e),
            }
        }
        out.push(Outbound::to(peer, Response::Spawn));

        // Existing players appear to the newcomer and vice versa
        for other in self.players.values() {
            out.push(Outbound::to(peer, Response::AddPlayer(Box::new(other.clone()))));
        }
        let others = self.everyone_but(peer);
        out.push(Outbound::new(others, Response::AddPlayer(Box::new(player.clone()))));

        let username = player.username.clone();
        self.players.insert(peer, player);
        out.push(Outbound::new(
            self.everyone(),
            Response::Chat(ChatMessage::Translation {
                key: JOIN_MESSAGE.to_string(),
                params: vec![username],
            }),
        ));
        out
    }

    fn chat(&mut self, peer: SocketAddr, message: String) -> Vec<Outbound> {
        let Some(player) = self.players.get(&peer) else {
            debug!("Chat from {} before login", peer);
            return Vec::new();
        };
        info!("<{}> {}", player.username, message);
        let source = player.username.clone();
        vec![Outbound::new(
            self.everyone(),
            Response::Chat(ChatMessage::Chat { source, message }),
        )]
    }

    fn move_player(&mut self, peer: SocketAddr, movement: PlayerMove) -> Vec<Outbound> {
        let Some(player) = self.players.get_mut(&peer) else {
            debug!("Movement from {} before login", peer);
            return Vec::new();
        };
        player.position = movement.position;
        let entity_id = player.entity_id;

        vec![Outbound::new(
            self.everyone_but(peer),
            Response::PlayerMove {
                entity_id,
                position: movement.position,
                head_yaw: movement.head_yaw,
                mode: MoveMode::Normal,
                on_ground: movement.on_ground,
            },
        )]
    }

    /// Takes the player at `addr` out of the world and tells everyone else
    pub fn remove_player(&mut self, addr: SocketAddr) -> Vec<Outbound> {
        let Some(player) = self.players.shift_remove(&addr) else {
            return Vec::new();
        };
        info!("{} left the game", player.username);

        let others = self.everyone();
        vec![
            Outbound::new(
                others.clone(),
                Response::RemovePlayer {
                    entity_id: player.entity_id,
                    client_id: player.client_id,
                    uuid: player.uuid,
                },
            ),
            Outbound::new(
                others,
                Response::Chat(ChatMessage::Translation {
                    key: LEAVE_MESSAGE.to_string(),
                    params: vec![player.username],
                }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::FlatChunkProvider;
    use assert_approx_eq::assert_approx_eq;
    use bytes::Bytes;
    use protocol::Position;
    use uuid::Uuid;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:19132".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:19133".parse().unwrap()
    }

    fn game(max_players: usize) -> GameState {
        let chunks = Arc::new(FlatChunkProvider::new().unwrap());
        GameState::new(WorldInfo::default(), chunks, max_players, 1)
    }

    fn login(addr: SocketAddr, username: &str) -> Request {
        Request::new(
            addr,
            RequestKind::Login(LoginRequest {
                username: username.to_string(),
                protocol: 27,
                client_id: 42,
                uuid: Uuid::from_u64_pair(0, 42),
                slim: false,
                skin: Bytes::from_static(&[0; 8]),
            }),
        )
    }

    #[test]
    fn test_login_sequence() {
        let mut game = game(4);
        let out = game.apply(login(test_addr(), "Steve"));

        assert_eq!(out[0].response, Response::Login(LoginOutcome::Accepted));
        let chunks = out
            .iter()
            .filter(|o| matches!(o.response, Response::Chunk(_)))
            .count();
        assert_eq!(chunks, 9);
        assert_eq!(out[10].response, Response::Spawn);
        // Nobody else to tell about the newcomer
        assert!(out[11].recipients.is_empty());
        assert!(matches!(
            out.last().unwrap().response,
            Response::Chat(ChatMessage::Translation { .. })
        ));

        let player = game.player(test_addr()).unwrap();
        assert_eq!(player.entity_id, 1);
        assert_approx_eq!(player.position.x, 128.5);
        assert_approx_eq!(player.position.z, 128.5);
    }

    #[test]
    fn test_second_player_sees_first() {
        let mut game = game(4);
        game.apply(login(test_addr(), "Steve"));
        let out = game.apply(login(test_addr2(), "Alex"));

        let add_for_newcomer = out
            .iter()
            .find(|o| matches!(&o.response, Response::AddPlayer(p) if p.username == "Steve"))
            .unwrap();
        assert_eq!(add_for_newcomer.recipients, RecipientSet::single(test_addr2()));

        let add_for_existing = out
            .iter()
            .find(|o| matches!(&o.response, Response::AddPlayer(p) if p.username == "Alex"))
            .unwrap();
        assert_eq!(add_for_existing.recipients, RecipientSet::single(test_addr()));
        assert_eq!(game.player(test_addr2()).unwrap().entity_id, 2);
    }

    #[test]
    fn test_login_refused_when_full() {
        let mut game = game(1);
        game.apply(login(test_addr(), "Steve"));
        let out = game.apply(login(test_addr2(), "Alex"));

        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].response,
            Response::Login(LoginOutcome::Refused(RefusalReason::ServerFull))
        );
        assert_eq!(game.player_count(), 1);
    }

    #[test]
    fn test_duplicate_username_refused() {
        let mut game = game(4);
        game.apply(login(test_addr(), "Steve"));
        let out = game.apply(login(test_addr2(), "steve"));

        assert!(matches!(
            &out[0].response,
            Response::Login(LoginOutcome::Refused(RefusalReason::Other(_)))
        ));
        assert!(game.player(test_addr2()).is_none());
    }

    #[test]
    fn test_chat_broadcast() {
        let mut game = game(4);
        game.apply(login(test_addr(), "Steve"));
        game.apply(login(test_addr2(), "Alex"));

        let out = game.apply(Request::new(
            test_addr(),
            RequestKind::Chat {
                message: "hello".to_string(),
            },
        ));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipients.len(), 2);
        assert_eq!(
            out[0].response,
            Response::Chat(ChatMessage::Chat {
                source: "Steve".to_string(),
                message: "hello".to_string()
            })
        );
    }

    #[test]
    fn test_requests_before_login_are_ignored() {
        let mut game = game(4);
        let out = game.apply(Request::new(
            test_addr(),
            RequestKind::Chat {
                message: "hello".to_string(),
            },
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_move_updates_position() {
        let mut game = game(4);
        game.apply(login(test_addr(), "Steve"));
        game.apply(login(test_addr2(), "Alex"));

        let out = game.apply(Request::new(
            test_addr(),
            RequestKind::PlayerMove(PlayerMove {
                entity_id: 99,
                position: Position::new(130.0, 5.0, 127.0),
                head_yaw: 90.0,
                on_ground: true,
            }),
        ));

        assert_eq!(out[0].recipients, RecipientSet::single(test_addr2()));
        match &out[0].response {
            Response::PlayerMove {
                entity_id, mode, ..
            } => {
                assert_eq!(*entity_id, 1);
                assert_eq!(*mode, MoveMode::Normal);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_approx_eq!(game.player(test_addr()).unwrap().position.x, 130.0);
    }

    #[test]
    fn test_disconnect_notifies_others() {
        let mut game = game(4);
        game.apply(login(test_addr(), "Steve"));
        game.apply(login(test_addr2(), "Alex"));

        let out = game.apply(Request::new(
            test_addr(),
            RequestKind::Disconnect {
                reason: "quit".to_string(),
            },
        ));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].recipients, RecipientSet::single(test_addr2()));
        assert!(matches!(
            out[0].response,
            Response::RemovePlayer { entity_id: 1, .. }
        ));
        assert!(game.player(test_addr()).is_none());
        assert!(game.remove_player(test_addr()).is_empty());
    }
}
