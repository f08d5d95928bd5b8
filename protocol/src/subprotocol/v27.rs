//! Protocol 27, game version 0.11.1.
//!
//! Batches are unframed: sub-packets sit back to back and each one's length is
//! whatever decoding it consumes.

use uuid::Uuid;

use super::{
    read_move_body, read_text, write_move_body, write_popup, write_text, Decoded, Handshake,
    Subprotocol, STATUS_LOGIN_SUCCESS, STATUS_OUTDATED_CLIENT, STATUS_OUTDATED_SERVER,
    STATUS_PLAYER_SPAWN,
};
use crate::batch::{BatchEnvelope, BatchFraming};
use crate::buffer::{PacketReader, PacketWriter};
use crate::context::EncodeContext;
use crate::error::ProtocolError;
use crate::packet::RawPacket;
use crate::request::{LoginRequest, PlayerMove, RequestKind};
use crate::response::{LoginOutcome, MoveMode, Response};

pub const PROTOCOL: i32 = 27;
pub const GAME_VERSION: &str = "0.11.1";

pub const LOGIN: u8 = 0x82;
pub const PLAY_STATUS: u8 = 0x83;
pub const DISCONNECT: u8 = 0x84;
pub const BATCH: u8 = 0x92;
pub const TEXT: u8 = 0x85;
pub const SET_TIME: u8 = 0x86;
pub const START_GAME: u8 = 0x87;
pub const ADD_PLAYER: u8 = 0x88;
pub const REMOVE_PLAYER: u8 = 0x89;
pub const MOVE_PLAYER: u8 = 0x8f;
pub const SET_HEALTH: u8 = 0xa2;
pub const SET_SPAWN_POSITION: u8 = 0xa3;
pub const RESPAWN: u8 = 0xa5;
pub const ADVENTURE_SETTINGS: u8 = 0xae;
pub const FULL_CHUNK_DATA: u8 = 0xaf;
pub const SET_DIFFICULTY: u8 = 0xb0;

const ENVELOPE: BatchEnvelope = BatchEnvelope::new(BATCH, BatchFraming::Unframed);

const FULL_HEALTH: i32 = 20;
const FLAG_DEFAULT: i32 = 0x20;
const FLAG_WORLD_IMMUTABLE: i32 = 0x01;

#[derive(Debug, Default, Clone, Copy)]
pub struct SubprotocolV27;

impl SubprotocolV27 {
    pub fn new() -> Self {
        Self
    }

    fn writer(&self, opcode: u8) -> PacketWriter {
        PacketWriter::with_opcode(opcode, self.byte_order())
    }

    fn play_status(&self, status: i32, ctx: &EncodeContext<'_>) -> RawPacket {
        let mut w = self.writer(PLAY_STATUS);
        w.write_i32(status);
        w.into_packet(ctx.peer)
    }

    fn disconnect(&self, message: &str, ctx: &EncodeContext<'_>) -> Result<RawPacket, ProtocolError> {
        let mut w = self.writer(DISCONNECT);
        w.write_string(message)?;
        Ok(w.into_packet(ctx.peer))
    }

    fn read_login(&self, reader: &mut PacketReader<'_>) -> Result<LoginRequest, ProtocolError> {
        let username = reader.read_string()?;
        let protocol = reader.read_i32()?;
        let _protocol2 = reader.read_i32()?;
        let client_id = i64::from(reader.read_i32()?);
        let slim = reader.read_bool()?;
        let skin = reader.read_short_bytes()?;
        Ok(LoginRequest {
            username,
            protocol,
            client_id,
            // No uuid on this version, derive a stable one
            uuid: Uuid::from_u64_pair(0, client_id as u64),
            slim,
            skin: bytes::Bytes::copy_from_slice(skin),
        })
    }

    fn encode_login_accepted(&self, ctx: &EncodeContext<'_>) -> Result<Vec<RawPacket>, ProtocolError> {
        let player = ctx.require_player("Login")?;
        let world = ctx.world;
        let mut packets = Vec::with_capacity(6);

        packets.push(self.play_status(STATUS_LOGIN_SUCCESS, ctx));

        let mut w = self.writer(START_GAME);
        w.write_i32(world.seed);
        w.write_i32(world.generator);
        w.write_i32(player.gamemode.id());
        w.write_i64(player.entity_id);
        w.write_i32(world.spawn.x);
        w.write_i32(world.spawn.y);
        w.write_i32(world.spawn.z);
        w.write_f32(player.position.x);
        w.write_f32(player.position.y);
        w.write_f32(player.position.z);
        packets.push(w.into_packet(ctx.peer));

        let mut w = self.writer(SET_TIME);
        w.write_i32(world.time);
        w.write_bool(true);
        packets.push(w.into_packet(ctx.peer));

        let mut w = self.writer(SET_SPAWN_POSITION);
        w.write_i32(world.spawn.x);
        w.write_i32(world.spawn.y);
        w.write_i32(world.spawn.z);
        packets.push(w.into_packet(ctx.peer));

        let mut w = self.writer(SET_HEALTH);
        w.write_i32(FULL_HEALTH);
        packets.push(w.into_packet(ctx.peer));

        let mut w = self.writer(SET_DIFFICULTY);
        w.write_i32(world.difficulty.id());
        packets.push(w.into_packet(ctx.peer));

        Ok(packets)
    }

    fn encode_spawn(&self, ctx: &EncodeContext<'_>) -> Result<Vec<RawPacket>, ProtocolError> {
        let player = ctx.require_player("Spawn")?;

        let mut w = self.writer(ADVENTURE_SETTINGS);
        w.write_i32(if player.gamemode.world_immutable() {
            FLAG_WORLD_IMMUTABLE
        } else {
            FLAG_DEFAULT
        });
        let settings = w.into_packet(ctx.peer);

        let mut w = self.writer(RESPAWN);
        w.write_f32(player.position.x);
        w.write_f32(player.position.y);
        w.write_f32(player.position.z);
        let respawn = w.into_packet(ctx.peer);

        Ok(vec![
            settings,
            respawn,
            self.play_status(STATUS_PLAYER_SPAWN, ctx),
        ])
    }
}

impl Subprotocol for SubprotocolV27 {
    fn protocol_version(&self) -> i32 {
        PROTOCOL
    }

    fn game_version(&self) -> &'static str {
        GAME_VERSION
    }

    fn envelope(&self) -> BatchEnvelope {
        ENVELOPE
    }

    fn read_handshake(&self, packet: &RawPacket) -> Option<Handshake> {
        let mut reader = packet.reader();
        if reader.read_u8().ok()? != LOGIN {
            return None;
        }
        let username = reader.read_string().ok()?;
        let protocol = reader.read_i32().ok()?;
        Some(Handshake { protocol, username })
    }

    fn decode_packet(&self, reader: &mut PacketReader<'_>) -> Result<Decoded, ProtocolError> {
        let opcode = reader.read_u8()?;
        let kind = match opcode {
            LOGIN => RequestKind::Login(self.read_login(reader)?),
            TEXT => return read_text(reader, opcode),
            MOVE_PLAYER => {
                let entity_id = reader.read_i64()?;
                let (position, head_yaw) = read_move_body(reader)?;
                let _mode = reader.read_u8()?;
                let on_ground = reader.read_bool()?;
                RequestKind::PlayerMove(PlayerMove {
                    entity_id,
                    position,
                    head_yaw,
                    on_ground,
                })
            }
            DISCONNECT => RequestKind::Disconnect {
                reason: reader.read_string()?,
            },
            _ => return Ok(Decoded::Unknown(opcode)),
        };
        Ok(Decoded::Request(kind))
    }

    fn encode(&self, response: &Response, ctx: &EncodeContext<'_>) -> Result<Vec<RawPacket>, ProtocolError> {
        let packets = match response {
            Response::Login(LoginOutcome::Accepted) => return self.encode_login_accepted(ctx),
            Response::Login(LoginOutcome::Refused(reason)) => {
                vec![self.disconnect(reason.message(), ctx)?]
            }
            Response::Login(LoginOutcome::OutdatedClient) => {
                vec![self.play_status(STATUS_OUTDATED_CLIENT, ctx)]
            }
            Response::Login(LoginOutcome::OutdatedServer) => {
                vec![self.play_status(STATUS_OUTDATED_SERVER, ctx)]
            }
            Response::Disconnect {
                reason,
                notify_client,
            } => {
                if *notify_client {
                    vec![self.disconnect(reason, ctx)?]
                } else {
                    Vec::new()
                }
            }
            Response::Chunk(chunk) => {
                let mut w = self.writer(FULL_CHUNK_DATA);
                w.write_i32(chunk.position.x);
                w.write_i32(chunk.position.z);
                w.write_i32(chunk.payload.len() as i32);
                w.write_bytes(&chunk.payload);
                vec![w.into_packet(ctx.peer)]
            }
            Response::Spawn => return self.encode_spawn(ctx),
            Response::Teleport {
                position,
                on_ground,
            } => {
                let player = ctx.require_player("Teleport")?;
                let mut w = self.writer(MOVE_PLAYER);
                w.write_i64(player.entity_id);
                write_move_body(&mut w, position, position.yaw);
                w.write_u8(MoveMode::Reset.id());
                w.write_bool(*on_ground);
                vec![w.into_packet(ctx.peer)]
            }
            Response::Chat(message) => {
                let mut w = self.writer(TEXT);
                write_text(&mut w, message)?;
                vec![w.into_packet(ctx.peer)]
            }
            Response::Popup { message } => {
                let mut w = self.writer(TEXT);
                write_popup(&mut w, message)?;
                vec![w.into_packet(ctx.peer)]
            }
            Response::AddPlayer(player) => {
                let mut w = self.writer(ADD_PLAYER);
                w.write_i64(player.client_id);
                w.write_string(&player.username)?;
                w.write_i64(player.entity_id);
                w.write_f32(player.position.x);
                w.write_f32(player.position.y);
                w.write_f32(player.position.z);
                // speed
                w.write_f32(0.0);
                w.write_f32(0.0);
                w.write_f32(0.0);
                w.write_f32(player.position.yaw);
                w.write_f32(player.position.yaw);
                w.write_f32(player.position.pitch);
                // held item id, meta
                w.write_i16(0);
                w.write_i16(0);
                w.write_bool(player.slim);
                w.write_short_bytes(&player.skin)?;
                player.metadata()?.write_to(&mut w)?;
                vec![w.into_packet(ctx.peer)]
            }
            Response::RemovePlayer {
                entity_id,
                client_id,
                ..
            } => {
                let mut w = self.writer(REMOVE_PLAYER);
                w.write_i64(*entity_id);
                w.write_i64(*client_id);
                vec![w.into_packet(ctx.peer)]
            }
            Response::PlayerMove {
                entity_id,
                position,
                head_yaw,
                mode,
                on_ground,
            } => {
                let mut w = self.writer(MOVE_PLAYER);
                w.write_i64(*entity_id);
                write_move_body(&mut w, position, *head_yaw);
                w.write_u8(mode.id());
                w.write_bool(*on_ground);
                vec![w.into_packet(ctx.peer)]
            }
        };
        Ok(packets)
    }
}
