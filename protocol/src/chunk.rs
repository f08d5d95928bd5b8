//! Column layers as handed over by the world collaborator.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;

pub const BLOCK_IDS_LEN: usize = 16 * 16 * 128;
pub const BLOCK_META_LEN: usize = BLOCK_IDS_LEN / 2;
pub const SKYLIGHT_LEN: usize = BLOCK_IDS_LEN / 2;
pub const BLOCKLIGHT_LEN: usize = BLOCK_IDS_LEN / 2;
pub const HEIGHTMAP_LEN: usize = 16 * 16;
pub const BIOME_COLORS_LEN: usize = 16 * 16 * 4;

/// Size of a serialized column
pub const CHUNK_PAYLOAD_LEN: usize = BLOCK_IDS_LEN
    + BLOCK_META_LEN
    + SKYLIGHT_LEN
    + BLOCKLIGHT_LEN
    + HEIGHTMAP_LEN
    + BIOME_COLORS_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPosition {
    pub x: i32,
    pub z: i32,
}

impl ChunkPosition {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Column containing the given block coordinates
    pub fn containing(block_x: i32, block_z: i32) -> Self {
        Self::new(block_x >> 4, block_z >> 4)
    }
}

/// Raw column layers, validated to their fixed sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLayers {
    block_ids: Bytes,
    block_meta: Bytes,
    skylight: Bytes,
    blocklight: Bytes,
    heightmap: Bytes,
    biome_colors: Bytes,
}

fn check(layer: &'static str, bytes: &Bytes, expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() != expected {
        return Err(ProtocolError::ChunkLayerSize {
            layer,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

impl ChunkLayers {
    pub fn from_layers(
        block_ids: Bytes,
        block_meta: Bytes,
        skylight: Bytes,
        blocklight: Bytes,
        heightmap: Bytes,
        biome_colors: Bytes,
    ) -> Result<Self, ProtocolError> {
        check("block ids", &block_ids, BLOCK_IDS_LEN)?;
        check("block metadata", &block_meta, BLOCK_META_LEN)?;
        check("skylight", &skylight, SKYLIGHT_LEN)?;
        check("blocklight", &blocklight, BLOCKLIGHT_LEN)?;
        check("heightmap", &heightmap, HEIGHTMAP_LEN)?;
        check("biome colors", &biome_colors, BIOME_COLORS_LEN)?;
        Ok(Self {
            block_ids,
            block_meta,
            skylight,
            blocklight,
            heightmap,
            biome_colors,
        })
    }

    /// Concatenates the layers in wire order
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHUNK_PAYLOAD_LEN);
        buf.extend_from_slice(&self.block_ids);
        buf.extend_from_slice(&self.block_meta);
        buf.extend_from_slice(&self.skylight);
        buf.extend_from_slice(&self.blocklight);
        buf.extend_from_slice(&self.heightmap);
        buf.extend_from_slice(&self.biome_colors);
        buf.freeze()
    }
}

/// A column ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pub position: ChunkPosition,
    pub payload: Bytes,
}

impl ChunkData {
    pub fn new(position: ChunkPosition, layers: &ChunkLayers) -> Self {
        Self {
            position,
            payload: layers.to_payload(),
        }
    }
}
