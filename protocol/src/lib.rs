//! # Pocket Edition Protocol Library
//!
//! Wire codecs shared by the server binary and its tests. Nothing in this
//! crate performs I/O or spawns tasks: every function turns bytes into typed
//! values or typed values into bytes, so the server decides where the work
//! runs.
//!
//! ## Layers
//!
//! - [`buffer`] and [`packet`]: bounds-checked cursors over a [`RawPacket`]
//! - [`metadata`]: the tag-value dictionary carried by entity packets
//! - [`batch`]: the zlib envelope that bundles several packets into one
//! - [`subprotocol`]: one codec per protocol version, turning packets into
//!   [`Request`]s and [`Response`]s into packets
//! - [`manager`]: picks a codec from the version a client declares at login
//!
//! ## Example
//!
//! ```rust
//! use protocol::{ByteOrder, PacketWriter, Negotiation, SubprotocolManager};
//!
//! let mut login = PacketWriter::with_opcode(0x82, ByteOrder::BigEndian);
//! login.write_string("Steve").unwrap();
//! login.write_i32(27);
//! login.write_i32(27);
//! let packet = login.into_packet("127.0.0.1:19132".parse().unwrap());
//!
//! let manager = SubprotocolManager::with_defaults();
//! match manager.negotiate(&packet) {
//!     Negotiation::Accepted { codec, .. } => assert_eq!(codec.game_version(), "0.11.1"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod batch;
pub mod buffer;
pub mod chunk;
pub mod context;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod packet;
pub mod request;
pub mod response;
pub mod subprotocol;

pub use batch::{BatchEnvelope, BatchFraming, COMPRESSION_LEVEL, COMPRESSION_THRESHOLD, MAX_INFLATED_BATCH};
pub use buffer::{ByteOrder, PacketReader, PacketWriter};
pub use chunk::{ChunkData, ChunkLayers, ChunkPosition};
pub use context::{BlockPosition, Difficulty, EncodeContext, Gamemode, PlayerSnapshot, Position, WorldInfo};
pub use error::{FailureScope, ProtocolError};
pub use manager::{Negotiation, SubprotocolManager};
pub use metadata::{MetadataDictionary, MetadataValue};
pub use packet::RawPacket;
pub use request::{LoginRequest, PlayerMove, Request, RequestKind};
pub use response::{ChatMessage, LoginOutcome, MoveMode, RefusalReason, Response};
pub use subprotocol::{Decoded, Handshake, Subprotocol, SubprotocolV27, SubprotocolV34};
