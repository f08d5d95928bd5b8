//! Batch envelope: a packet whose body is a zlib-compressed run of packets.
//!
//! ```text
//! [0]      BATCH opcode
//! [1..5]   compressed length (u32, connection byte order)
//! [5..]    zlib stream of exactly that many bytes
//! ```
//!
//! Inside the inflated stream sub-packets are either laid end to end
//! ([`BatchFraming::Unframed`], their length is whatever decoding them
//! consumes) or each preceded by a u32 length ([`BatchFraming::LengthPrefixed`]).
//! The stream is walked with a single cursor; a sub-packet that is itself a
//! batch is a protocol violation and voids the whole envelope.

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use log::{debug, warn};
use std::io::Write;

use crate::buffer::{PacketReader, PacketWriter};
use crate::error::ProtocolError;
use crate::packet::RawPacket;

/// Packets at least this long are sent inside a batch
pub const COMPRESSION_THRESHOLD: usize = 512;
pub const COMPRESSION_LEVEL: u32 = 7;
/// Upper bound on an inflated batch
pub const MAX_INFLATED_BATCH: usize = 2 * 1024 * 1024;

const INFLATE_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFraming {
    Unframed,
    LengthPrefixed,
}

/// Per-protocol batch settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEnvelope {
    opcode: u8,
    framing: BatchFraming,
    level: u32,
}

impl BatchEnvelope {
    pub const fn new(opcode: u8, framing: BatchFraming) -> Self {
        Self {
            opcode,
            framing,
            level: COMPRESSION_LEVEL,
        }
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn framing(&self) -> BatchFraming {
        self.framing
    }

    pub fn is_batch(&self, packet: &RawPacket) -> bool {
        packet.opcode() == Some(self.opcode)
    }

    /// Compression policy for a single outgoing packet
    pub fn needs_compression(&self, packet: &RawPacket) -> bool {
        packet.len() >= COMPRESSION_THRESHOLD && !self.is_batch(packet)
    }

    /// Compresses `packets` into one envelope addressed like the first packet
    pub fn batch(&self, packets: &[RawPacket]) -> Result<RawPacket, ProtocolError> {
        let first = packets.first().ok_or(ProtocolError::EmptyBatch)?;
        let order = first.order();

        let mut body = PacketWriter::new(order);
        for packet in packets {
            if self.is_batch(packet) {
                return Err(ProtocolError::NestedBatch);
            }
            if self.framing == BatchFraming::LengthPrefixed {
                body.write_u32(packet.len() as u32);
            }
            body.write_bytes(packet.bytes());
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(&body.finish())
            .map_err(|e| ProtocolError::Compression(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| ProtocolError::Compression(e.to_string()))?;

        let mut writer = PacketWriter::with_opcode(self.opcode, order);
        writer.write_u32(compressed.len() as u32);
        writer.write_bytes(&compressed);
        Ok(writer.into_packet(first.peer()))
    }

    /// Splits an envelope back into its sub-packets.
    ///
    /// `measure` is only consulted for unframed batches: given the inflated
    /// bytes starting at a sub-packet it returns that packet's length, or
    /// `None` if the opcode is unknown. Since nothing after an unmeasurable
    /// sub-packet can be located, the walk ends there and the packets
    /// extracted so far are kept.
    pub fn unbatch<F>(&self, packet: &RawPacket, mut measure: F) -> Result<Vec<RawPacket>, ProtocolError>
    where
        F: FnMut(&[u8]) -> Result<Option<usize>, ProtocolError>,
    {
        let inflated = bytes::Bytes::from(self.inflate(packet)?);
        let order = packet.order();
        let mut packets = Vec::new();
        let mut cursor = 0;

        while cursor < inflated.len() {
            let start = match self.framing {
                BatchFraming::Unframed => cursor,
                BatchFraming::LengthPrefixed => cursor + 4,
            };
            if inflated.get(start) == Some(&self.opcode) {
                return Err(ProtocolError::NestedBatch);
            }

            let len = match self.framing {
                BatchFraming::LengthPrefixed => {
                    let mut reader = PacketReader::new(&inflated[cursor..], order);
                    match reader.read_u32() {
                        Ok(len) if len > 0 && len as usize <= inflated.len() - start => len as usize,
                        _ => {
                            warn!(
                                "Bad sub-packet frame at offset {} in batch from {}, dropping the rest",
                                cursor,
                                packet.peer()
                            );
                            break;
                        }
                    }
                }
                BatchFraming::Unframed => match measure(&inflated[cursor..]) {
                    Ok(Some(len)) if len > 0 => len,
                    Ok(_) => {
                        debug!(
                            "Unknown opcode 0x{:02x} inside batch from {}, dropping the rest",
                            inflated[cursor],
                            packet.peer()
                        );
                        break;
                    }
                    Err(e) => {
                        warn!(
                            "Malformed sub-packet inside batch from {}: {}, dropping the rest",
                            packet.peer(),
                            e
                        );
                        break;
                    }
                },
            };

            packets.push(RawPacket::new(
                inflated.slice(start..start + len),
                order,
                packet.peer(),
            ));
            cursor = start + len;
        }

        Ok(packets)
    }

    /// Reads the length prefix and inflates exactly that many bytes
    fn inflate(&self, packet: &RawPacket) -> Result<Vec<u8>, ProtocolError> {
        let mut reader = packet.reader();
        reader.read_u8()?;
        let declared = reader.read_u32()? as usize;
        let compressed = reader.read_bytes(declared)?;

        let mut inflater = Decompress::new(true);
        let mut out = Vec::with_capacity(INFLATE_CHUNK);

        loop {
            if out.len() > MAX_INFLATED_BATCH {
                return Err(ProtocolError::BatchTooLarge {
                    limit: MAX_INFLATED_BATCH,
                });
            }
            if out.len() == out.capacity() {
                // One byte past the limit is enough to tell an oversized batch apart
                out.reserve_exact(INFLATE_CHUNK.min(MAX_INFLATED_BATCH + 1 - out.len()));
            }

            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress_vec(
                    &compressed[before_in as usize..],
                    &mut out,
                    FlushDecompress::None,
                )
                .map_err(|e| ProtocolError::Decompression(e.to_string()))?;

            if status == Status::StreamEnd {
                break;
            }

            let stalled = inflater.total_in() == before_in && inflater.total_out() == before_out;
            if stalled && out.len() < out.capacity() {
                return Err(ProtocolError::Decompression(
                    "zlib stream ends before its terminator".to_string(),
                ));
            }
        }

        if out.len() > MAX_INFLATED_BATCH {
            return Err(ProtocolError::BatchTooLarge {
                limit: MAX_INFLATED_BATCH,
            });
        }

        let consumed = inflater.total_in() as usize;
        if consumed != declared {
            return Err(ProtocolError::BatchLengthMismatch { declared, consumed });
        }

        Ok(out)
    }
}
