//! World collaborator: hands raw chunk layers to the protocol layer.

use bytes::Bytes;
use protocol::chunk::{
    BIOME_COLORS_LEN, BLOCKLIGHT_LEN, BLOCK_IDS_LEN, BLOCK_META_LEN, HEIGHTMAP_LEN, SKYLIGHT_LEN,
};
use protocol::{ChunkLayers, ChunkPosition, ProtocolError};

/// Source of chunk columns
pub trait ChunkProvider: Send + Sync {
    fn load_chunk(&self, position: ChunkPosition) -> Result<ChunkLayers, ProtocolError>;
}

const BEDROCK: u8 = 7;
const DIRT: u8 = 3;
const GRASS: u8 = 2;

const PLAINS: u8 = 1;
const GRASS_COLOR: [u8; 3] = [0x85, 0xb2, 0x4a];

/// Bedrock, two layers of dirt and grass on top, everywhere
#[derive(Debug, Clone)]
pub struct FlatChunkProvider {
    layers: ChunkLayers,
}

impl FlatChunkProvider {
    pub fn new() -> Result<Self, ProtocolError> {
        let column = [BEDROCK, DIRT, DIRT, GRASS];

        // Blocks are stored x, then z, then y with 128 blocks per column
        let mut block_ids = vec![0u8; BLOCK_IDS_LEN];
        for blocks in block_ids.chunks_mut(128) {
            blocks[..column.len()].copy_from_slice(&column);
        }

        let mut biome_colors = Vec::with_capacity(BIOME_COLORS_LEN);
        for _ in 0..HEIGHTMAP_LEN {
            biome_colors.push(PLAINS);
            biome_colors.extend_from_slice(&GRASS_COLOR);
        }

        let layers = ChunkLayers::from_layers(
            Bytes::from(block_ids),
            Bytes::from(vec![0u8; BLOCK_META_LEN]),
            Bytes::from(vec![0xffu8; SKYLIGHT_LEN]),
            Bytes::from(vec![0u8; BLOCKLIGHT_LEN]),
            Bytes::from(vec![column.len() as u8; HEIGHTMAP_LEN]),
            Bytes::from(biome_colors),
        )?;
        Ok(Self { layers })
    }
}

impl ChunkProvider for FlatChunkProvider {
    fn load_chunk(&self, _position: ChunkPosition) -> Result<ChunkLayers, ProtocolError> {
        Ok(self.layers.clone())
    }
}

/// Columns within `radius` of `center`, nearest first
pub fn chunks_around(center: ChunkPosition, radius: i32) -> Vec<ChunkPosition> {
    let mut positions = Vec::new();
    for dx in -radius..=radius {
        for dz in -radius..=radius {
            positions.push(ChunkPosition::new(center.x + dx, center.z + dz));
        }
    }
    positions.sort_by_key(|p| {
        let dx = p.x - center.x;
        let dz = p.z - center.z;
        (dx * dx + dz * dz, p.x, p.z)
    });
    positions
}
