//! Session tracking for connected peers
//!
//! This module keeps one session per remote address, created when a login
//! frame negotiates a protocol version. It handles:
//! - Session lifecycle (handshake, disconnect, timeout)
//! - The negotiated codec each peer's packets are decoded with
//! - Capacity limits and address lookups
//!
//! Sessions only know about transport concerns. Whether a session has a
//! player in the world is decided by the simulation in [`crate::game`].

use log::info;
use protocol::Subprotocol;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A peer that completed the protocol handshake
///
/// Each client holds:
/// - Connection metadata (ID, address, last activity)
/// - The codec negotiated at login, shared with every other peer on that version
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Name declared in the login frame
    pub username: String,
    /// Codec for this peer's protocol version
    pub codec: Arc<dyn Subprotocol>,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("username", &self.username)
            .field("protocol", &self.codec.protocol_version())
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

impl Client {
    /// Creates a session that counts as active right away
    pub fn new(id: u32, addr: SocketAddr, username: String, codec: Arc<dyn Subprotocol>) -> Self {
        Self {
            id,
            addr,
            username,
            codec,
            last_seen: Instant::now(),
        }
    }

    /// Records activity from this peer
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if no packets have been received from this client
    /// within the specified timeout duration, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all sessions
///
/// Enforces the session cap and maps addresses to sessions. The network
/// receiver reads it to pick a codec for every datagram, so lookups by address
/// are the hot path.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Address to client ID
    by_addr: HashMap<SocketAddr, u32>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    /// Silence after which a session is dropped
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            by_addr: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to open a session for `addr`
    ///
    /// Returns Some(client_id) if successful, None if the server is at
    /// capacity. A peer that logs in again from the same address replaces its
    /// old session.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        username: String,
        codec: Arc<dyn Subprotocol>,
    ) -> Option<u32> {
        self.remove_by_addr(addr);

        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!(
            "Client {} ({}) connected from {} on protocol {} ({})",
            client_id,
            username,
            addr,
            codec.protocol_version(),
            codec.game_version()
        );
        self.clients
            .insert(client_id, Client::new(client_id, addr, username, codec));
        self.by_addr.insert(addr, client_id);

        Some(client_id)
    }

    /// Removes a session, returning it if it existed
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        self.by_addr.remove(&client.addr);
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    pub fn remove_by_addr(&mut self, addr: SocketAddr) -> Option<Client> {
        let client_id = self.find_client_by_addr(addr)?;
        self.remove_client(&client_id)
    }

    /// Finds a client ID by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.by_addr.get(&addr).copied()
    }

    /// Codec negotiated by the peer at `addr`
    pub fn codec_for(&self, addr: SocketAddr) -> Option<Arc<dyn Subprotocol>> {
        let client_id = self.find_client_by_addr(addr)?;
        self.clients.get(&client_id).map(|c| Arc::clone(&c.codec))
    }

    /// Marks the peer as active, returning false for unknown peers
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self
            .find_client_by_addr(addr)
            .and_then(|id| self.clients.get_mut(&id))
        {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed sessions so the simulation can drop their players.
    pub fn check_timeouts(&mut self) -> Vec<Client> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(self.timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .iter()
            .filter_map(|client_id| self.remove_client(client_id))
            .collect()
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    /// Returns the number of open sessions
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{SubprotocolV27, SubprotocolV34};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:19132".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:19133".parse().unwrap()
    }

    fn v27() -> Arc<dyn Subprotocol> {
        Arc::new(SubprotocolV27::new())
    }

    fn manager(max_clients: usize) -> ClientManager {
        ClientManager::new(max_clients, Duration::from_secs(10))
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(1, test_addr(), "Steve".to_string(), v27());

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, test_addr());
        assert_eq!(client.codec.protocol_version(), 27);
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr(), "Steve".to_string(), v27());
        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));

        client.touch();
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = manager(3);
        let id1 = manager
            .add_client(test_addr(), "Steve".to_string(), v27())
            .unwrap();
        let id2 = manager
            .add_client(test_addr2(), "Alex".to_string(), Arc::new(SubprotocolV34::new()))
            .unwrap();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.codec_for(test_addr2()).unwrap().protocol_version(), 34);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = manager(1);
        assert!(manager
            .add_client(test_addr(), "Steve".to_string(), v27())
            .is_some());
        assert!(manager.is_full());
        assert!(manager
            .add_client(test_addr2(), "Alex".to_string(), v27())
            .is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_relogin_replaces_session() {
        let mut manager = manager(1);
        let first = manager
            .add_client(test_addr(), "Steve".to_string(), v27())
            .unwrap();
        let second = manager
            .add_client(test_addr(), "Steve".to_string(), v27())
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.find_client_by_addr(test_addr()), Some(second));
    }

    #[test]
    fn test_remove_client() {
        let mut manager = manager(2);
        let client_id = manager
            .add_client(test_addr(), "Steve".to_string(), v27())
            .unwrap();

        let removed = manager.remove_client(&client_id).unwrap();
        assert_eq!(removed.username, "Steve");
        assert!(manager.is_empty());
        assert!(manager.codec_for(test_addr()).is_none());
        assert!(manager.remove_client(&client_id).is_none());
    }

    #[test]
    fn test_touch_unknown_peer() {
        let mut manager = manager(2);
        assert!(!manager.touch(test_addr()));
        manager.add_client(test_addr(), "Steve".to_string(), v27());
        assert!(manager.touch(test_addr()));
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = ClientManager::new(2, Duration::from_millis(1));
        manager.add_client(test_addr(), "Steve".to_string(), v27());
        std::thread::sleep(Duration::from_millis(5));

        let timed_out = manager.check_timeouts();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].addr, test_addr());
        assert!(manager.is_empty());
    }
}
