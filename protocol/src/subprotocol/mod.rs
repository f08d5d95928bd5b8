//! Per-version packet codecs.
//!
//! Every supported protocol version gets its own [`Subprotocol`] implementation
//! with its own opcode table and field layouts. Versions never share layouts
//! through inheritance; common field helpers live in this module instead.

use log::{trace, warn};

use crate::batch::{BatchEnvelope, BatchFraming};
use crate::buffer::{ByteOrder, PacketReader, PacketWriter};
use crate::context::{EncodeContext, Position};
use crate::error::{FailureScope, ProtocolError};
use crate::packet::RawPacket;
use crate::request::{Request, RequestKind};
use crate::response::{ChatMessage, Response};

pub mod v27;
pub mod v34;

pub use v27::SubprotocolV27;
pub use v34::SubprotocolV34;

// TEXT packet types, shared by every version so far
pub(crate) const TEXT_RAW: u8 = 0;
pub(crate) const TEXT_CHAT: u8 = 1;
pub(crate) const TEXT_TRANSLATION: u8 = 2;
pub(crate) const TEXT_POPUP: u8 = 3;
pub(crate) const TEXT_TIP: u8 = 4;
pub(crate) const TEXT_SYSTEM: u8 = 5;

// PLAY_STATUS values
pub(crate) const STATUS_LOGIN_SUCCESS: i32 = 0;
pub(crate) const STATUS_OUTDATED_CLIENT: i32 = 1;
pub(crate) const STATUS_OUTDATED_SERVER: i32 = 2;
pub(crate) const STATUS_PLAYER_SPAWN: i32 = 3;

/// Result of decoding a single packet
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Request(RequestKind),
    /// Well-formed packet that carries nothing for the simulation
    Nothing,
    /// Opcode (or sub-type) this version does not understand
    Unknown(u8),
}

/// What a client declares in its first packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: i32,
    pub username: String,
}

/// Codec for one protocol version.
///
/// Implementations provide the per-opcode pieces; [`Subprotocol::decode`]
/// ties them to the batch envelope. All methods take `&self` and keep no
/// per-connection state, so one instance serves every session on that
/// version.
pub trait Subprotocol: Send + Sync {
    fn protocol_version(&self) -> i32;

    /// Human readable game version, e.g. `0.11.1`
    fn game_version(&self) -> &'static str;

    fn envelope(&self) -> BatchEnvelope;

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::BigEndian
    }

    /// Recognizes this version's LOGIN frame without decoding all of it
    fn read_handshake(&self, packet: &RawPacket) -> Option<Handshake>;

    /// Decodes one packet starting at its opcode.
    ///
    /// Unless the result is [`Decoded::Unknown`], the reader ends up right
    /// after the packet's last field.
    fn decode_packet(&self, reader: &mut PacketReader<'_>) -> Result<Decoded, ProtocolError>;

    fn encode(&self, response: &Response, ctx: &EncodeContext<'_>) -> Result<Vec<RawPacket>, ProtocolError>;

    /// Decodes a packet into zero or more requests, unpacking batches.
    ///
    /// Errors on a plain packet are returned as is. Inside a batch, sub-packets
    /// failing with packet scope are logged and skipped while connection scope
    /// errors void the whole envelope.
    fn decode(&self, packet: &RawPacket) -> Result<Vec<Request>, ProtocolError> {
        let envelope = self.envelope();
        if !envelope.is_batch(packet) {
            return decode_single(self, packet);
        }

        let peer = packet.peer();
        let mut requests = Vec::new();
        match envelope.framing() {
            BatchFraming::Unframed => {
                // Decoding a sub-packet is the only way to learn its length
                envelope.unbatch(packet, |buf| {
                    let mut reader = PacketReader::new(buf, packet.order());
                    match self.decode_packet(&mut reader)? {
                        Decoded::Request(kind) => requests.push(Request::new(peer, kind)),
                        Decoded::Nothing => {}
                        Decoded::Unknown(_) => return Ok(None),
                    }
                    Ok(Some(reader.position()))
                })?;
            }
            BatchFraming::LengthPrefixed => {
                for sub in envelope.unbatch(packet, |_| Ok(None))? {
                    match decode_single(self, &sub) {
                        Ok(decoded) => requests.extend(decoded),
                        Err(e) if e.scope() == FailureScope::Packet => {
                            warn!("Skipping bad packet inside batch from {}: {}", peer, e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(requests)
    }
}

fn decode_single<S: Subprotocol + ?Sized>(
    codec: &S,
    packet: &RawPacket,
) -> Result<Vec<Request>, ProtocolError> {
    let mut reader = packet.reader();
    match codec.decode_packet(&mut reader)? {
        Decoded::Request(kind) => {
            if !reader.is_empty() {
                trace!(
                    "{} trailing bytes after {} packet from {}",
                    reader.remaining(),
                    kind.name(),
                    packet.peer()
                );
            }
            Ok(vec![Request::new(packet.peer(), kind)])
        }
        Decoded::Nothing => Ok(Vec::new()),
        Decoded::Unknown(opcode) => {
            trace!(
                "Ignoring unknown opcode 0x{:02x} from {} (protocol {})",
                opcode,
                packet.peer(),
                codec.protocol_version()
            );
            Ok(Vec::new())
        }
    }
}

/// Reads a TEXT body after the opcode. Only chat lines become requests.
pub(crate) fn read_text(reader: &mut PacketReader<'_>, opcode: u8) -> Result<Decoded, ProtocolError> {
    let kind = reader.read_u8()?;
    match kind {
        TEXT_CHAT => {
            let _source = reader.read_string()?;
            let message = reader.read_string()?;
            Ok(Decoded::Request(RequestKind::Chat { message }))
        }
        TEXT_POPUP => {
            reader.read_string()?;
            reader.read_string()?;
            Ok(Decoded::Nothing)
        }
        TEXT_RAW | TEXT_TIP | TEXT_SYSTEM => {
            reader.read_string()?;
            Ok(Decoded::Nothing)
        }
        TEXT_TRANSLATION => {
            reader.read_string()?;
            let count = reader.read_u8()?;
            for _ in 0..count {
                reader.read_string()?;
            }
            Ok(Decoded::Nothing)
        }
        // Body length depends on the type
        _ => Ok(Decoded::Unknown(opcode)),
    }
}

pub(crate) fn write_text(writer: &mut PacketWriter, message: &ChatMessage) -> Result<(), ProtocolError> {
    match message {
        ChatMessage::Raw(text) => {
            writer.write_u8(TEXT_RAW);
            writer.write_string(text)?;
        }
        ChatMessage::Chat { source, message } => {
            writer.write_u8(TEXT_CHAT);
            writer.write_string(source)?;
            writer.write_string(message)?;
        }
        ChatMessage::Translation { key, params } => {
            writer.write_u8(TEXT_TRANSLATION);
            writer.write_string(key)?;
            writer.write_u8(params.len().min(u8::MAX as usize) as u8);
            for param in params.iter().take(u8::MAX as usize) {
                writer.write_string(param)?;
            }
        }
        ChatMessage::Tip(text) => {
            writer.write_u8(TEXT_TIP);
            writer.write_string(text)?;
        }
        ChatMessage::System(text) => {
            writer.write_u8(TEXT_SYSTEM);
            writer.write_string(text)?;
        }
    }
    Ok(())
}

pub(crate) fn write_popup(writer: &mut PacketWriter, message: &str) -> Result<(), ProtocolError> {
    writer.write_u8(TEXT_POPUP);
    writer.write_string("")?;
    writer.write_string(message)
}

/// x, y, z, yaw, head yaw, pitch
pub(crate) fn read_move_body(reader: &mut PacketReader<'_>) -> Result<(Position, f32), ProtocolError> {
    let x = reader.read_f32()?;
    let y = reader.read_f32()?;
    let z = reader.read_f32()?;
    let yaw = reader.read_f32()?;
    let head_yaw = reader.read_f32()?;
    let pitch = reader.read_f32()?;
    Ok((Position { x, y, z, yaw, pitch }, head_yaw))
}

pub(crate) fn write_move_body(writer: &mut PacketWriter, position: &Position, head_yaw: f32) {
    writer.write_f32(position.x);
    writer.write_f32(position.y);
    writer.write_f32(position.z);
    writer.write_f32(position.yaw);
    writer.write_f32(head_yaw);
    writer.write_f32(position.pitch);
}
