//! Read and write cursors over a single packet.
//!
//! A cursor only lives for the duration of one encode or decode call. Every
//! read is bounds-checked up front so a truncated packet surfaces as
//! [`ProtocolError::Malformed`] instead of a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

use crate::error::ProtocolError;
use crate::packet::RawPacket;

/// Byte order of multi-byte integers and floats on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// Bounds-checked read cursor
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        Self { buf, pos: 0, order }
    }

    /// Number of bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Takes the next `len` bytes, failing without moving the cursor if
    /// fewer remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::Malformed {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Takes everything left in the packet
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let mut bytes = self.read_bytes(1)?;
        Ok(bytes.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? > 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let mut bytes = self.read_bytes(2)?;
        Ok(match self.order {
            ByteOrder::BigEndian => bytes.get_u16(),
            ByteOrder::LittleEndian => bytes.get_u16_le(),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let mut bytes = self.read_bytes(4)?;
        Ok(match self.order {
            ByteOrder::BigEndian => bytes.get_u32(),
            ByteOrder::LittleEndian => bytes.get_u32_le(),
        })
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let mut bytes = self.read_bytes(8)?;
        Ok(match self.order {
            ByteOrder::BigEndian => bytes.get_i64(),
            ByteOrder::LittleEndian => bytes.get_i64_le(),
        })
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads a u16 length prefix followed by that many raw bytes
    pub fn read_short_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    /// Reads a length-prefixed string. Invalid UTF-8 is replaced rather than
    /// rejected; clients send usernames in whatever encoding they like.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_short_bytes()?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Growable write cursor
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
    order: ByteOrder,
}

impl PacketWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            buf: BytesMut::new(),
            order,
        }
    }

    /// Starts a packet with its opcode already written
    pub fn with_opcode(opcode: u8, order: ByteOrder) -> Self {
        let mut writer = Self::new(order);
        writer.write_u8(opcode);
        writer
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        match self.order {
            ByteOrder::BigEndian => self.buf.put_u16(value),
            ByteOrder::LittleEndian => self.buf.put_u16_le(value),
        }
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::BigEndian => self.buf.put_u32(value),
            ByteOrder::LittleEndian => self.buf.put_u32_le(value),
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_i64(&mut self, value: i64) {
        match self.order {
            ByteOrder::BigEndian => self.buf.put_i64(value),
            ByteOrder::LittleEndian => self.buf.put_i64_le(value),
        }
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes a u16 length prefix followed by the raw bytes
    pub fn write_short_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::StringTooLong(bytes.len()))?;
        self.write_u16(len);
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.write_short_bytes(value.as_bytes())
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Freezes the buffer into a packet addressed to `peer`
    pub fn into_packet(self, peer: SocketAddr) -> RawPacket {
        let order = self.order;
        RawPacket::new(self.finish(), order, peer)
    }
}
