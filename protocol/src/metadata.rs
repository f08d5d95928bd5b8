//! Compact tag-value dictionary describing entity state.
//!
//! Each entry is a header byte followed by a typed payload. The header packs
//! the type tag into bits 7-5 and the entry index into bits 4-0. Decoding stops
//! at the terminator header `0x81` or at the end of the buffer; encoding never
//! writes the terminator, so callers embed the dictionary at the tail of a
//! packet whose total length they already know.
//!
//! Index 17 is always carried as a long regardless of the header's type tag.
//! The whole dictionary is little-endian, independent of the packet around it.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::buffer::{ByteOrder, PacketReader, PacketWriter};
use crate::error::ProtocolError;

pub const METADATA_TERMINATOR: u8 = 0x81;
pub const MAX_METADATA_INDEX: u8 = 31;
/// Legacy slot whose payload is a long no matter what the header says
pub const LONG_ONLY_INDEX: u8 = 17;

const TAG_BYTE: u8 = 0;
const TAG_SHORT: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_STRING: u8 = 4;
const TAG_LONG: u8 = 7;

const METADATA_ORDER: ByteOrder = ByteOrder::LittleEndian;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    String(String),
    Long(i64),
}

impl MetadataValue {
    pub fn type_tag(&self) -> u8 {
        match self {
            MetadataValue::Byte(_) => TAG_BYTE,
            MetadataValue::Short(_) => TAG_SHORT,
            MetadataValue::Int(_) => TAG_INT,
            MetadataValue::String(_) => TAG_STRING,
            MetadataValue::Long(_) => TAG_LONG,
        }
    }

    fn as_long(&self) -> Option<i64> {
        match self {
            MetadataValue::Byte(v) => Some(i64::from(*v)),
            MetadataValue::Short(v) => Some(i64::from(*v)),
            MetadataValue::Int(v) => Some(i64::from(*v)),
            MetadataValue::Long(v) => Some(*v),
            MetadataValue::String(_) => None,
        }
    }

    fn read(tag: u8, index: u8, reader: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(match tag {
            TAG_BYTE => MetadataValue::Byte(reader.read_u8()? as i8),
            TAG_SHORT => MetadataValue::Short(reader.read_i16()?),
            TAG_INT => MetadataValue::Int(reader.read_i32()?),
            TAG_STRING => MetadataValue::String(reader.read_string()?),
            TAG_LONG => MetadataValue::Long(reader.read_i64()?),
            // Width is unknown, nothing after this header can be located
            _ => return Err(ProtocolError::UnknownMetadataType { tag, index }),
        })
    }

    fn write(&self, writer: &mut PacketWriter) -> Result<(), ProtocolError> {
        match self {
            MetadataValue::Byte(v) => writer.write_u8(*v as u8),
            MetadataValue::Short(v) => writer.write_i16(*v),
            MetadataValue::Int(v) => writer.write_i32(*v),
            MetadataValue::String(v) => writer.write_string(v)?,
            MetadataValue::Long(v) => writer.write_i64(*v),
        }
        Ok(())
    }
}

fn header(tag: u8, index: u8) -> u8 {
    (tag << 5) | (index & 0x1f)
}

/// Ordered index → value map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDictionary {
    entries: BTreeMap<u8, MetadataValue>,
}

impl MetadataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, returning the value it replaced.
    ///
    /// Rejects entries that could not survive a round trip: indices above 31,
    /// non-numeric values at index 17 (numeric ones are widened to a long) and
    /// a string at index 1, whose header equals the terminator.
    pub fn insert(
        &mut self,
        index: u8,
        value: MetadataValue,
    ) -> Result<Option<MetadataValue>, ProtocolError> {
        if index > MAX_METADATA_INDEX {
            return Err(ProtocolError::MetadataIndexOutOfRange(index));
        }
        let value = if index == LONG_ONLY_INDEX {
            MetadataValue::Long(value.as_long().ok_or(ProtocolError::MetadataLongIndex)?)
        } else {
            value
        };
        if header(value.type_tag(), index) == METADATA_TERMINATOR {
            return Err(ProtocolError::MetadataTerminatorCollision);
        }
        if let MetadataValue::String(s) = &value {
            if s.len() > u16::MAX as usize {
                return Err(ProtocolError::StringTooLong(s.len()));
            }
        }
        Ok(self.entries.insert(index, value))
    }

    pub fn get(&self, index: u8) -> Option<&MetadataValue> {
        self.entries.get(&index)
    }

    pub fn remove(&mut self, index: u8) -> Option<MetadataValue> {
        self.entries.remove(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order
    pub fn iter(&self) -> impl Iterator<Item = (u8, &MetadataValue)> {
        self.entries.iter().map(|(index, value)| (*index, value))
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut writer = PacketWriter::new(METADATA_ORDER);
        for (index, value) in self.iter() {
            if index == LONG_ONLY_INDEX {
                writer.write_u8(header(TAG_LONG, index));
                writer.write_i64(value.as_long().ok_or(ProtocolError::MetadataLongIndex)?);
            } else {
                writer.write_u8(header(value.type_tag(), index));
                value.write(&mut writer)?;
            }
        }
        Ok(writer.finish())
    }

    /// Appends the encoded dictionary to a packet being built
    pub fn write_to(&self, writer: &mut PacketWriter) -> Result<(), ProtocolError> {
        writer.write_bytes(&self.encode()?);
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = PacketReader::new(buf, METADATA_ORDER);
        let mut entries = BTreeMap::new();

        while !reader.is_empty() {
            let header = reader.read_u8()?;
            if header == METADATA_TERMINATOR {
                break;
            }

            let tag = header >> 5;
            let index = header & 0x1f;
            let value = if index == LONG_ONLY_INDEX {
                MetadataValue::Long(reader.read_i64()?)
            } else {
                MetadataValue::read(tag, index, &mut reader)?
            };
            entries.insert(index, value);
        }

        Ok(Self { entries })
    }

    /// Decodes the dictionary occupying the rest of a packet
    pub fn read_from(reader: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Self::decode(reader.read_rest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetadataDictionary {
        let mut dict = MetadataDictionary::new();
        dict.insert(0, MetadataValue::Byte(-3)).unwrap();
        dict.insert(1, MetadataValue::Short(300)).unwrap();
        dict.insert(2, MetadataValue::String("Steve".to_string())).unwrap();
        dict.insert(7, MetadataValue::Int(-123_456)).unwrap();
        dict.insert(31, MetadataValue::Long(i64::MIN)).unwrap();
        dict
    }

    #[test]
    fn test_round_trip() {
        let dict = sample();
        let encoded = dict.encode().unwrap();
        assert_eq!(MetadataDictionary::decode(&encoded).unwrap(), dict);
    }

    #[test]
    fn test_round_trip_every_index() {
        let mut dict = MetadataDictionary::new();
        for index in 0..=MAX_METADATA_INDEX {
            let value = match index % 4 {
                0 => MetadataValue::Byte(index as i8),
                1 => MetadataValue::Short(-(index as i16)),
                2 => MetadataValue::Int(index as i32 * 1000),
                _ => MetadataValue::Long(index as i64 * -77),
            };
            dict.insert(index, value).unwrap();
        }
        let decoded = MetadataDictionary::decode(&dict.encode().unwrap()).unwrap();
        assert_eq!(decoded, dict);
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_entries_written_in_index_order() {
        let mut dict = MetadataDictionary::new();
        dict.insert(4, MetadataValue::Byte(1)).unwrap();
        dict.insert(0, MetadataValue::Byte(2)).unwrap();
        let encoded = dict.encode().unwrap();
        assert_eq!(&encoded[..], &[0x00, 2, 0x04, 1]);
    }

    #[test]
    fn test_header_layout() {
        let mut dict = MetadataDictionary::new();
        dict.insert(3, MetadataValue::Short(0x0102)).unwrap();
        let encoded = dict.encode().unwrap();
        // tag 1 in bits 7-5, index 3 in bits 4-0, little-endian payload
        assert_eq!(&encoded[..], &[0x23, 0x02, 0x01]);
    }

    #[test]
    fn test_encode_writes_no_terminator() {
        let encoded = sample().encode().unwrap();
        assert_ne!(encoded.last(), Some(&METADATA_TERMINATOR));
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        let mut bytes = vec![0x00, 9, METADATA_TERMINATOR];
        // Anything past the terminator belongs to someone else
        bytes.extend_from_slice(&[0xff, 0xff]);
        let dict = MetadataDictionary::decode(&bytes).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(0), Some(&MetadataValue::Byte(9)));
    }

    #[test]
    fn test_index_17_always_long() {
        // Header claims a byte, payload is still eight bytes
        let mut bytes = vec![header(TAG_BYTE, LONG_ONLY_INDEX)];
        bytes.extend_from_slice(&(-1i64).to_le_bytes());
        let dict = MetadataDictionary::decode(&bytes).unwrap();
        assert_eq!(dict.get(17), Some(&MetadataValue::Long(-1)));
    }

    #[test]
    fn test_index_17_widened_on_insert() {
        let mut dict = MetadataDictionary::new();
        dict.insert(17, MetadataValue::Int(5)).unwrap();
        assert_eq!(dict.get(17), Some(&MetadataValue::Long(5)));

        let encoded = dict.encode().unwrap();
        assert_eq!(encoded.len(), 9);
        assert_eq!(encoded[0], header(TAG_LONG, 17));
    }

    #[test]
    fn test_index_17_rejects_strings() {
        let mut dict = MetadataDictionary::new();
        assert!(matches!(
            dict.insert(17, MetadataValue::String("lead".to_string())),
            Err(ProtocolError::MetadataLongIndex)
        ));
    }

    #[test]
    fn test_unknown_type_tag_is_fatal() {
        let bytes = [header(3, 5), 0, 0, 0, 0];
        assert!(matches!(
            MetadataDictionary::decode(&bytes),
            Err(ProtocolError::UnknownMetadataType { tag: 3, index: 5 })
        ));
    }

    #[test]
    fn test_truncated_entry_is_malformed() {
        let bytes = [header(TAG_INT, 2), 1, 2];
        assert!(matches!(
            MetadataDictionary::decode(&bytes),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut dict = MetadataDictionary::new();
        assert!(matches!(
            dict.insert(32, MetadataValue::Byte(0)),
            Err(ProtocolError::MetadataIndexOutOfRange(32))
        ));
    }

    #[test]
    fn test_string_at_index_one_collides_with_terminator() {
        let mut dict = MetadataDictionary::new();
        assert!(matches!(
            dict.insert(1, MetadataValue::String("x".to_string())),
            Err(ProtocolError::MetadataTerminatorCollision)
        ));
    }

    #[test]
    fn test_empty_buffer_decodes_empty() {
        assert!(MetadataDictionary::decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_read_from_packet_tail() {
        let mut writer = PacketWriter::new(ByteOrder::BigEndian);
        writer.write_i64(99);
        sample().write_to(&mut writer).unwrap();
        let bytes = writer.finish();

        let mut reader = PacketReader::new(&bytes, ByteOrder::BigEndian);
        assert_eq!(reader.read_i64().unwrap(), 99);
        assert_eq!(MetadataDictionary::read_from(&mut reader).unwrap(), sample());
        assert!(reader.is_empty());
    }
}
