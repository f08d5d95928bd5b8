//! Error type shared by every codec in this crate.
//!
//! Each error knows how far its damage reaches: a [`FailureScope::Packet`]
//! error only costs the packet being decoded, while a
//! [`FailureScope::Connection`] error means the peer can no longer be trusted
//! and its session should be dropped. Nothing here is ever fatal for the
//! server as a whole.

use thiserror::Error;

/// How much of the peer's traffic an error invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// Drop the offending packet, keep the connection open
    Packet,
    /// Drop the whole connection
    Connection,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A field read ran past the end of the packet
    #[error("packet truncated: needed {needed} bytes but only {remaining} remain")]
    Malformed { needed: usize, remaining: usize },

    #[error("failed to inflate batch: {0}")]
    Decompression(String),

    #[error("batch declares {declared} compressed bytes but the zlib stream used {consumed}")]
    BatchLengthMismatch { declared: usize, consumed: usize },

    #[error("batch inflates past the {limit} byte limit")]
    BatchTooLarge { limit: usize },

    #[error("batch packet found inside batch packet")]
    NestedBatch,

    #[error("cannot build a batch from zero packets")]
    EmptyBatch,

    #[error("failed to compress batch: {0}")]
    Compression(String),

    #[error("unknown metadata type tag {tag} at index {index}")]
    UnknownMetadataType { tag: u8, index: u8 },

    #[error("metadata index {0} is outside 0..=31")]
    MetadataIndexOutOfRange(u8),

    #[error("metadata index 17 only holds numeric values")]
    MetadataLongIndex,

    #[error("metadata string at index 1 would encode as the 0x81 terminator")]
    MetadataTerminatorCollision,

    #[error("string of {0} bytes does not fit a u16 length prefix")]
    StringTooLong(usize),

    #[error("chunk layer {layer} has {actual} bytes, expected {expected}")]
    ChunkLayerSize {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported protocol version {0}")]
    UnsupportedProtocol(i32),

    #[error("{0} response needs the recipient's player snapshot")]
    MissingPlayerContext(&'static str),
}

impl ProtocolError {
    /// Returns how far the failure reaches
    pub fn scope(&self) -> FailureScope {
        match self {
            ProtocolError::Decompression(_)
            | ProtocolError::BatchLengthMismatch { .. }
            | ProtocolError::BatchTooLarge { .. }
            | ProtocolError::NestedBatch
            | ProtocolError::UnsupportedProtocol(_) => FailureScope::Connection,
            _ => FailureScope::Packet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_errors_drop_the_connection() {
        assert_eq!(ProtocolError::NestedBatch.scope(), FailureScope::Connection);
        assert_eq!(
            ProtocolError::Decompression("bad header".to_string()).scope(),
            FailureScope::Connection
        );
        assert_eq!(
            ProtocolError::BatchLengthMismatch {
                declared: 10,
                consumed: 8
            }
            .scope(),
            FailureScope::Connection
        );
    }

    #[test]
    fn test_field_errors_only_drop_the_packet() {
        let underflow = ProtocolError::Malformed {
            needed: 4,
            remaining: 1,
        };
        assert_eq!(underflow.scope(), FailureScope::Packet);
        assert_eq!(
            ProtocolError::UnknownMetadataType { tag: 3, index: 0 }.scope(),
            FailureScope::Packet
        );
    }

    #[test]
    fn test_error_message_formatting() {
        let err = ProtocolError::Malformed {
            needed: 4,
            remaining: 1,
        };
        assert_eq!(
            err.to_string(),
            "packet truncated: needed 4 bytes but only 1 remain"
        );
    }
}
