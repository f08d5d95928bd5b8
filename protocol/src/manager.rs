//! Protocol negotiation.
//!
//! The manager is built once at startup from the enabled codecs and never
//! changes afterwards, so it can be shared freely behind an `Arc`.

use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::packet::RawPacket;
use crate::response::LoginOutcome;
use crate::subprotocol::{Handshake, Subprotocol, SubprotocolV27, SubprotocolV34};

/// Result of inspecting a packet from a peer without a session
pub enum Negotiation {
    /// The declared protocol is served by this codec
    Accepted {
        codec: Arc<dyn Subprotocol>,
        handshake: Handshake,
    },
    /// A login frame was recognized by `codec` but no codec serves the
    /// declared protocol. The rejection is encoded with `codec`.
    Unsupported {
        protocol: i32,
        codec: Arc<dyn Subprotocol>,
    },
    NotHandshake,
}

impl std::fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Negotiation::Accepted { codec, handshake } => f
                .debug_struct("Accepted")
                .field("protocol", &codec.protocol_version())
                .field("handshake", handshake)
                .finish(),
            Negotiation::Unsupported { protocol, codec } => f
                .debug_struct("Unsupported")
                .field("protocol", protocol)
                .field("codec", &codec.protocol_version())
                .finish(),
            Negotiation::NotHandshake => f.write_str("NotHandshake"),
        }
    }
}

pub struct SubprotocolManager {
    codecs: BTreeMap<i32, Arc<dyn Subprotocol>>,
}

impl SubprotocolManager {
    pub fn new() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Every version this crate implements
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(SubprotocolV27::new()));
        manager.register(Arc::new(SubprotocolV34::new()));
        manager
    }

    /// Builds a manager limited to the listed versions, ignoring unknown ones
    pub fn with_versions(versions: &[i32]) -> Self {
        let all = Self::with_defaults();
        let mut manager = Self::new();
        for version in versions {
            match all.get(*version) {
                Some(codec) => manager.register(codec),
                None => debug!("No codec for protocol {}, skipping", version),
            }
        }
        manager
    }

    pub fn register(&mut self, codec: Arc<dyn Subprotocol>) {
        self.codecs.insert(codec.protocol_version(), codec);
    }

    pub fn get(&self, protocol: i32) -> Option<Arc<dyn Subprotocol>> {
        self.codecs.get(&protocol).cloned()
    }

    pub fn versions(&self) -> Vec<i32> {
        self.codecs.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Picks the codec for a new peer from its first packet
    pub fn negotiate(&self, packet: &RawPacket) -> Negotiation {
        // Newest first: a later version's login opcode can collide with an
        // older version's gameplay opcode
        for codec in self.codecs.values().rev() {
            let Some(handshake) = codec.read_handshake(packet) else {
                continue;
            };
            if let Some(serving) = self.get(handshake.protocol) {
                if serving.read_handshake(packet).is_some() {
                    return Negotiation::Accepted {
                        codec: serving,
                        handshake,
                    };
                }
            }
            return Negotiation::Unsupported {
                protocol: handshake.protocol,
                codec: Arc::clone(codec),
            };
        }

        debug!(
            "Ignoring {} byte packet from {} without a session",
            packet.len(),
            packet.peer()
        );
        Negotiation::NotHandshake
    }

    /// Login outcome telling a client with `protocol` who has to upgrade
    pub fn rejection(&self, protocol: i32) -> LoginOutcome {
        match self.codecs.keys().next() {
            Some(oldest) if protocol < *oldest => LoginOutcome::OutdatedClient,
            _ => LoginOutcome::OutdatedServer,
        }
    }
}

impl Default for SubprotocolManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ByteOrder, PacketWriter};
    use crate::subprotocol::{v27, v34};

    fn login(opcode: u8, protocol: i32) -> RawPacket {
        let mut w = PacketWriter::with_opcode(opcode, ByteOrder::BigEndian);
        w.write_string("Steve").unwrap();
        w.write_i32(protocol);
        w.write_i32(protocol);
        w.into_packet("127.0.0.1:19132".parse().unwrap())
    }

    #[test]
    fn test_accepts_supported_versions() {
        let manager = SubprotocolManager::with_defaults();
        assert_eq!(manager.versions(), vec![27, 34]);

        match manager.negotiate(&login(v27::LOGIN, 27)) {
            Negotiation::Accepted { codec, handshake } => {
                assert_eq!(codec.protocol_version(), 27);
                assert_eq!(handshake.username, "Steve");
            }
            other => panic!("Expected acceptance, got {:?}", other),
        }
        match manager.negotiate(&login(v34::LOGIN, 34)) {
            Negotiation::Accepted { codec, .. } => assert_eq!(codec.game_version(), "0.12.1"),
            other => panic!("Expected acceptance, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_versions_are_rejected() {
        let manager = SubprotocolManager::with_defaults();

        match manager.negotiate(&login(v27::LOGIN, 20)) {
            Negotiation::Unsupported { protocol, codec } => {
                assert_eq!(protocol, 20);
                assert_eq!(codec.protocol_version(), 27);
                assert_eq!(manager.rejection(protocol), LoginOutcome::OutdatedClient);
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
        match manager.negotiate(&login(v34::LOGIN, 45)) {
            Negotiation::Unsupported { protocol, .. } => {
                assert_eq!(manager.rejection(protocol), LoginOutcome::OutdatedServer);
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_other_packets_are_not_handshakes() {
        let manager = SubprotocolManager::with_defaults();
        let packet = RawPacket::new(vec![0x01, 0x00], ByteOrder::BigEndian, "127.0.0.1:1".parse().unwrap());
        assert!(matches!(manager.negotiate(&packet), Negotiation::NotHandshake));
        let empty = RawPacket::new(Vec::new(), ByteOrder::BigEndian, "127.0.0.1:1".parse().unwrap());
        assert!(matches!(manager.negotiate(&empty), Negotiation::NotHandshake));
    }

    #[test]
    fn test_disabled_version_is_rejected() {
        let manager = SubprotocolManager::with_versions(&[34, 99]);
        assert_eq!(manager.versions(), vec![34]);
        // Older than every enabled version
        assert!(matches!(
            manager.negotiate(&login(v34::LOGIN, 27)),
            Negotiation::Unsupported { protocol: 27, .. }
        ));
        assert_eq!(manager.rejection(27), LoginOutcome::OutdatedClient);
        // v27 frame is unknown once its codec is disabled
        assert!(matches!(
            manager.negotiate(&login(v27::LOGIN, 27)),
            Negotiation::NotHandshake
        ));
    }
}
