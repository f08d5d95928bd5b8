//! Protocol 34, game version 0.12.1.
//!
//! Clients identify themselves by uuid from this version on, and every
//! sub-packet inside a batch carries its own u32 length.

use bytes::Bytes;
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

pub const PROTOCOL: i32 = 34;
pub const GAME_VERSION: &str = "0.12.1";

pub const LOGIN: u8 = 0x8f;
pub const PLAY_STATUS: u8 = 0x90;
pub const DISCONNECT: u8 = 0x91;
pub const BATCH: u8 = 0x92;
pub const TEXT: u8 = 0x93;
pub const SET_TIME: u8 = 0x94;
pub const START_GAME: u8 = 0x95;
pub const ADD_PLAYER: u8 = 0x96;
pub const REMOVE_PLAYER: u8 = 0x97;
pub const MOVE_PLAYER: u8 = 0x9d;
pub const SET_HEALTH: u8 = 0xb0;
pub const SET_SPAWN_POSITION: u8 = 0xb1;
pub const RESPAWN: u8 = 0xb3;
pub const ADVENTURE_SETTINGS: u8 = 0xbc;
pub const SET_DIFFICULTY: u8 = 0xbe;
pub const FULL_CHUNK_DATA: u8 = 0xbf;

const ENVELOPE: BatchEnvelope = BatchEnvelope::new(BATCH, BatchFraming::LengthPrefixed);

const FULL_HEALTH: i32 = 20;
const FLAG_DEFAULT: i32 = 0x20;
const FLAG_WORLD_IMMUTABLE: i32 = 0x01;
const PERMISSION_USER: i32 = 2;
const CHUNK_ORDER_LAYERED: u8 = 1;

fn read_uuid(reader: &mut PacketReader<'_>) -> Result<Uuid, ProtocolError> {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(reader.read_bytes(16)?);
    Ok(Uuid::from_bytes(raw))
}

fn write_uuid(writer: &mut PacketWriter, uuid: &Uuid) {
    writer.write_bytes(uuid.as_bytes());
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SubprotocolV34;

impl SubprotocolV34 {
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
        let client_id = reader.read_i64()?;
        let uuid = read_uuid(reader)?;
        let _server_address = reader.read_string()?;
        let _client_secret = reader.read_string()?;
        let skin_name = reader.read_string()?;
        let skin = reader.read_short_bytes()?;
        Ok(LoginRequest {
            username,
            protocol,
            client_id,
            uuid,
            slim: skin_name.ends_with("Slim"),
            skin: Bytes::copy_from_slice(skin),
        })
    }

    fn encode_login_accepted(&self, ctx: &EncodeContext<'_>) -> Result<Vec<RawPacket>, ProtocolError> {
        let player = ctx.require_player("Login")?;
        let world = ctx.world;
        let mut packets = Vec::with_capacity(6);

        packets.push(self.play_status(STATUS_LOGIN_SUCCESS, ctx));

        let mut w = self.writer(START_GAME);
        w.write_i32(world.seed);
        w.write_u8(world.dimension);
        w.write_i32(world.generator);
        w.write_i32(player.gamemode.id());
        w.write_i64(player.entity_id);
        w.write_i32(world.spawn.x);
        w.write_i32(world.spawn.y);
        w.write_i32(world.spawn.z);
        w.write_f32(player.position.x);
        w.write_f32(player.position.y);
        w.write_f32(player.position.z);
        w.write_u8(0);
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
        w.write_i32(PERMISSION_USER);
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

impl Subprotocol for SubprotocolV34 {
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
                notify_client: true,
            } => vec![self.disconnect(reason, ctx)?],
            Response::Disconnect { .. } => Vec::new(),
            Response::Chunk(chunk) => {
                let mut w = self.writer(FULL_CHUNK_DATA);
                w.write_i32(chunk.position.x);
                w.write_i32(chunk.position.z);
                w.write_u8(CHUNK_ORDER_LAYERED);
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
                write_uuid(&mut w, &player.uuid);
                w.write_string(&player.username)?;
                w.write_i64(player.entity_id);
                w.write_f32(player.position.x);
                w.write_f32(player.position.y);
                w.write_f32(player.position.z);
                w.write_f32(0.0);
                w.write_f32(0.0);
                w.write_f32(0.0);
                w.write_f32(player.position.yaw);
                w.write_f32(player.position.yaw);
                w.write_f32(player.position.pitch);
                // empty hand: id, count, meta
                w.write_i16(0);
                w.write_u8(0);
                w.write_i16(0);
                player.metadata()?.write_to(&mut w)?;
                vec![w.into_packet(ctx.peer)]
            }
            Response::RemovePlayer {
                entity_id, uuid, ..
            } => {
                let mut w = self.writer(REMOVE_PLAYER);
                w.write_i64(*entity_id);
                write_uuid(&mut w, uuid);
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
