use bytes::Bytes;
use std::net::SocketAddr;

use crate::buffer::{ByteOrder, PacketReader};

/// A wire packet exchanged with the network layer.
///
/// The payload is immutable and cheap to clone; cursors are created per call
/// through [`RawPacket::reader`] and never shared. For inbound packets `peer`
/// is the sender, for outbound packets it is the first intended recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    payload: Bytes,
    order: ByteOrder,
    peer: SocketAddr,
}

impl RawPacket {
    pub fn new(payload: impl Into<Bytes>, order: ByteOrder, peer: SocketAddr) -> Self {
        Self {
            payload: payload.into(),
            order,
            peer,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// First byte of the payload, if any
    pub fn opcode(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(&self.payload, self.order)
    }
}
