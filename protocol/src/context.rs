//! Read-only snapshots handed to the codecs by the simulation.

use bytes::Bytes;
use serde::Deserialize;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::metadata::{MetadataDictionary, MetadataValue};

/// Entity position with facing, in world units and degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    pub pitch: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

/// Integer block coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct BlockPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Standing position on top of this block
    pub fn to_position(self) -> Position {
        Position::new(self.x as f32 + 0.5, self.y as f32, self.z as f32 + 0.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gamemode {
    #[default]
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl Gamemode {
    pub fn id(self) -> i32 {
        match self {
            Gamemode::Survival => 0,
            Gamemode::Creative => 1,
            Gamemode::Adventure => 2,
            Gamemode::Spectator => 3,
        }
    }

    /// Adventure and spectator players cannot modify the world
    pub fn world_immutable(self) -> bool {
        matches!(self, Gamemode::Adventure | Gamemode::Spectator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Peaceful,
    #[default]
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub fn id(self) -> i32 {
        match self {
            Difficulty::Peaceful => 0,
            Difficulty::Easy => 1,
            Difficulty::Normal => 2,
            Difficulty::Hard => 3,
        }
    }
}

// Player metadata slots
const DATA_FLAGS: u8 = 0;
const DATA_AIR: u8 = 1;
const DATA_NAMETAG: u8 = 2;
const DATA_SHOW_NAMETAG: u8 = 3;
const DATA_SILENT: u8 = 4;
const DATA_NO_AI: u8 = 15;
const DATA_LEAD_HOLDER: u8 = 17;

const FULL_AIR: i16 = 300;

/// What the codecs are allowed to know about a player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub entity_id: i64,
    pub client_id: i64,
    pub uuid: Uuid,
    pub username: String,
    pub nametag: String,
    pub position: Position,
    pub gamemode: Gamemode,
    pub skin: Bytes,
    pub slim: bool,
}

impl PlayerSnapshot {
    /// Entity metadata sent along with ADD_PLAYER
    pub fn metadata(&self) -> Result<MetadataDictionary, ProtocolError> {
        let mut meta = MetadataDictionary::new();
        meta.insert(DATA_FLAGS, MetadataValue::Byte(0))?;
        meta.insert(DATA_AIR, MetadataValue::Short(FULL_AIR))?;
        meta.insert(DATA_NAMETAG, MetadataValue::String(self.nametag.clone()))?;
        meta.insert(DATA_SHOW_NAMETAG, MetadataValue::Byte(1))?;
        meta.insert(DATA_SILENT, MetadataValue::Byte(0))?;
        meta.insert(DATA_NO_AI, MetadataValue::Byte(0))?;
        meta.insert(DATA_LEAD_HOLDER, MetadataValue::Long(-1))?;
        Ok(meta)
    }
}

/// World properties every codec may read
#[derive(Debug, Clone, PartialEq)]
pub struct WorldInfo {
    pub seed: i32,
    pub generator: i32,
    pub dimension: u8,
    pub gamemode: Gamemode,
    pub spawn: BlockPosition,
    pub time: i32,
    pub difficulty: Difficulty,
}

impl Default for WorldInfo {
    fn default() -> Self {
        Self {
            seed: 0,
            // Flat
            generator: 2,
            dimension: 0,
            gamemode: Gamemode::Survival,
            spawn: BlockPosition::new(128, 4, 128),
            time: 0,
            difficulty: Difficulty::Easy,
        }
    }
}

/// Everything `encode` may look at besides the response itself
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub peer: SocketAddr,
    pub player: Option<&'a PlayerSnapshot>,
    pub world: &'a WorldInfo,
}

impl<'a> EncodeContext<'a> {
    pub fn new(peer: SocketAddr, world: &'a WorldInfo) -> Self {
        Self {
            peer,
            player: None,
            world,
        }
    }

    pub fn with_player(mut self, player: &'a PlayerSnapshot) -> Self {
        self.player = Some(player);
        self
    }

    /// The recipient's snapshot, or an error naming the response that needed it
    pub fn require_player(&self, response: &'static str) -> Result<&'a PlayerSnapshot, ProtocolError> {
        self.player.ok_or(ProtocolError::MissingPlayerContext(response))
    }
}
