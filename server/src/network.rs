//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::game::{GameState, Outbound};
use crate::outgoing::{Delivery, OutgoingQueue, RecipientSet};
use crate::workers::WorkerPool;
use crate::world::ChunkProvider;
use log::{debug, error, info, trace, warn};
use protocol::{
    ByteOrder, EncodeContext, FailureScope, LoginOutcome, Negotiation, ProtocolError, RawPacket,
    RefusalReason, Request, Response, Subprotocol, SubprotocolManager,
};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 65_535;
/// A peer's decoder exits after this long without packets
const DECODER_IDLE: Duration = Duration::from_secs(10);
/// Most chunks packed into one outgoing batch
const CHUNKS_PER_BATCH: usize = 16;

/// Messages sent from network tasks to main server loop
pub enum ServerMessage {
    /// Requests decoded from one datagram, in wire order
    Requests {
        addr: SocketAddr,
        requests: Vec<Request>,
    },
    /// A packet failed in a way that ends the session
    ConnectionFailed {
        addr: SocketAddr,
        error: ProtocolError,
    },
    /// Handshake that must be answered without opening a session
    Reject {
        addr: SocketAddr,
        codec: Arc<dyn Subprotocol>,
        outcome: LoginOutcome,
    },
    ClientTimeout {
        addr: SocketAddr,
    },
    Shutdown,
}

/// Where the receiver sends a datagram
enum Route {
    Decode(Arc<dyn Subprotocol>),
    Reply(ServerMessage),
    Ignore,
}

/// Inbound queue of one peer, drained by its own task
struct PeerDecoder {
    tx: mpsc::UnboundedSender<(Arc<dyn Subprotocol>, RawPacket)>,
    task: JoinHandle<()>,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    Deliver(Vec<Delivery>),
}

/// Stops a running [`Server`] from another task
#[derive(Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    codecs: Arc<SubprotocolManager>,
    game_state: GameState,
    outgoing: OutgoingQueue,
    pool: WorkerPool,
    tick_duration: Duration,

    /// Requests waiting for the next tick
    inbox: Vec<Request>,
    /// Responses produced between ticks (disconnects, timeouts)
    outbox: Vec<Outbound>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(config: &ServerConfig, chunks: Arc<dyn ChunkProvider>) -> io::Result<Self> {
        let codecs = SubprotocolManager::with_versions(&config.protocols);
        if codecs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("none of the protocols {:?} are supported", config.protocols),
            ));
        }

        let socket = Arc::new(UdpSocket::bind(config.bind_addr()).await?);
        let pool = WorkerPool::new(config.workers);
        info!(
            "Server listening on {} (protocols {:?}, {} codec workers)",
            socket.local_addr()?,
            codecs.versions(),
            pool.size()
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_players,
                config.session_timeout(),
            ))),
            codecs: Arc::new(codecs),
            game_state: GameState::new(
                config.world_info(),
                chunks,
                config.max_players,
                config.view_radius,
            ),
            outgoing: OutgoingQueue::new(pool.clone()),
            pool,
            tick_duration: config.tick_duration(),
            inbox: Vec::new(),
            outbox: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let codecs = Arc::clone(&self.codecs);
        let pool = self.pool.clone();
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];
            let mut decoders: HashMap<SocketAddr, PeerDecoder> = HashMap::new();

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let packet = RawPacket::new(buffer[..len].to_vec(), ByteOrder::BigEndian, addr);
                        match Self::route_packet(&clients, &codecs, &packet).await {
                            Route::Decode(codec) => {
                                Self::forward(&mut decoders, codec, packet, &pool, &server_tx)
                            }
                            Route::Reply(message) => {
                                if let Err(e) = server_tx.send(message) {
                                    error!("Failed to send packet to main loop: {}", e);
                                    break;
                                }
                            }
                            Route::Ignore => {}
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Finds the peer's codec, negotiating a session first if needed
    async fn route_packet(
        clients: &RwLock<ClientManager>,
        codecs: &SubprotocolManager,
        packet: &RawPacket,
    ) -> Route {
        let addr = packet.peer();
        let codec = {
            let mut clients_guard = clients.write().await;
            clients_guard.touch(addr);
            clients_guard.codec_for(addr)
        };
        if let Some(codec) = codec {
            return Route::Decode(codec);
        }

        match codecs.negotiate(packet) {
            Negotiation::Accepted { codec, handshake } => {
                let added = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.add_client(addr, handshake.username, Arc::clone(&codec))
                };
                if added.is_none() {
                    info!("Rejecting {}: session limit reached", addr);
                    return Route::Reply(ServerMessage::Reject {
                        addr,
                        codec,
                        outcome: LoginOutcome::Refused(RefusalReason::ServerFull),
                    });
                }
                Route::Decode(codec)
            }
            Negotiation::Unsupported { protocol, codec } => {
                let outcome = codecs.rejection(protocol);
                info!("Rejecting {} with protocol {}: {:?}", addr, protocol, outcome);
                Route::Reply(ServerMessage::Reject {
                    addr,
                    codec,
                    outcome,
                })
            }
            Negotiation::NotHandshake => Route::Ignore,
        }
    }

    /// Hands a packet to its peer's decoder, starting a new one if the old one retired
    fn forward(
        decoders: &mut HashMap<SocketAddr, PeerDecoder>,
        codec: Arc<dyn Subprotocol>,
        packet: RawPacket,
        pool: &WorkerPool,
        server_tx: &mpsc::UnboundedSender<ServerMessage>,
    ) {
        let addr = packet.peer();
        let mut item = (codec, packet);
        if let Some(decoder) = decoders.get(&addr) {
            match decoder.tx.send(item) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => item = returned,
            }
        }

        let previous = decoders.remove(&addr).map(|decoder| decoder.task);
        decoders.retain(|_, decoder| !decoder.task.is_finished());

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(item).is_err() {
            error!("Decoder queue for {} closed before start", addr);
            return;
        }
        let task = tokio::spawn(Self::decode_peer(
            addr,
            rx,
            previous,
            pool.clone(),
            server_tx.clone(),
        ));
        decoders.insert(addr, PeerDecoder { tx, task });
    }

    /// Decodes one peer's packets in arrival order until the peer goes quiet
    async fn decode_peer(
        addr: SocketAddr,
        mut rx: mpsc::UnboundedReceiver<(Arc<dyn Subprotocol>, RawPacket)>,
        previous: Option<JoinHandle<()>>,
        pool: WorkerPool,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        // Whatever the retired decoder still holds goes first
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                error!("Previous decoder for {} failed: {}", addr, e);
            }
        }

        loop {
            let (codec, packet) = match tokio::time::timeout(DECODER_IDLE, rx.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(_) => {
                    // Later packets start a fresh decoder; drain what was already sent
                    rx.close();
                    trace!("Decoder for {} idle", addr);
                    continue;
                }
            };

            if let Some(message) = Self::decode_packet(&pool, codec, packet).await {
                if server_tx.send(message).is_err() {
                    return;
                }
            }
        }
    }

    async fn decode_packet(
        pool: &WorkerPool,
        codec: Arc<dyn Subprotocol>,
        packet: RawPacket,
    ) -> Option<ServerMessage> {
        let addr = packet.peer();
        // Batches are inflated off the runtime
        let result = if codec.envelope().is_batch(&packet) {
            let len = packet.len();
            match pool.run(move || codec.decode(&packet)).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Decoding {} byte batch from {} panicked: {}", len, addr, e);
                    return None;
                }
            }
        } else {
            codec.decode(&packet)
        };

        match result {
            Ok(requests) if requests.is_empty() => None,
            Ok(requests) => Some(ServerMessage::Requests { addr, requests }),
            Err(error) => match error.scope() {
                FailureScope::Packet => {
                    warn!("Dropping packet from {}: {}", addr, error);
                    None
                }
                FailureScope::Connection => Some(ServerMessage::ConnectionFailed { addr, error }),
            },
        }
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::Deliver(deliveries) => {
                        for delivery in deliveries {
                            if let Err(e) = socket.send_to(delivery.packet.bytes(), delivery.addr).await {
                                error!("Failed to send packet to {}: {}", delivery.addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client in timed_out {
                    info!("Client {} ({}) timed out", client.id, client.addr);
                    if server_tx
                        .send(ServerMessage::ClientTimeout { addr: client.addr })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    fn send(&self, deliveries: Vec<Delivery>) {
        if deliveries.is_empty() {
            return;
        }
        if let Err(e) = self.game_tx.send(GameMessage::Deliver(deliveries)) {
            error!("Failed to queue packets for sending: {}", e);
        }
    }

    /// Answers a handshake that did not get a session
    fn reject(&self, addr: SocketAddr, codec: &dyn Subprotocol, outcome: LoginOutcome) {
        let response = Response::Login(outcome);
        let ctx = EncodeContext::new(addr, self.game_state.world());
        match codec.encode(&response, &ctx) {
            Ok(packets) => self.send(
                packets
                    .into_iter()
                    .map(|packet| Delivery { addr, packet })
                    .collect(),
            ),
            Err(e) => error!("Failed to encode rejection for {}: {}", addr, e),
        }
    }

    async fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Requests { addr, requests } => {
                trace!("{} requests from {}", requests.len(), addr);
                self.inbox.extend(requests);
            }
            ServerMessage::ConnectionFailed { addr, error } => {
                warn!("Dropping session {}: {}", addr, error);
                self.drop_session(addr).await;
            }
            ServerMessage::Reject {
                addr,
                codec,
                outcome,
            } => self.reject(addr, codec.as_ref(), outcome),
            ServerMessage::ClientTimeout { addr } => {
                let removed = self.game_state.remove_player(addr);
                self.outbox.extend(removed);
            }
            ServerMessage::Shutdown => {}
        }
    }

    async fn drop_session(&mut self, addr: SocketAddr) {
        // Requests still queued from this peer die with the session
        self.inbox.retain(|r| r.peer != addr);
        self.clients.write().await.remove_by_addr(addr);
        let removed = self.game_state.remove_player(addr);
        self.outbox.extend(removed);
    }

    /// Recipients that still have a session, grouped by protocol version
    async fn codec_groups(
        &self,
        recipients: &RecipientSet,
        what: &str,
    ) -> Vec<(Arc<dyn Subprotocol>, Vec<SocketAddr>)> {
        let mut groups: BTreeMap<i32, (Arc<dyn Subprotocol>, Vec<SocketAddr>)> = BTreeMap::new();
        let clients = self.clients.read().await;
        for addr in recipients.iter() {
            match clients.codec_for(*addr) {
                Some(codec) => groups
                    .entry(codec.protocol_version())
                    .or_insert_with(|| (codec, Vec::new()))
                    .1
                    .push(*addr),
                None => debug!("No session for {}, skipping {}", addr, what),
            }
        }
        groups.into_values().collect()
    }

    /// Encodes one outbound response per codec and queues the packets
    async fn dispatch(&self, outbound: &Outbound) {
        let response = &outbound.response;
        let world = self.game_state.world();
        for (codec, addrs) in self.codec_groups(&outbound.recipients, response.name()).await {
            if response.needs_player_context() {
                for addr in addrs {
                    let Some(player) = self.game_state.player(addr) else {
                        error!("No player for {}, cannot encode {}", addr, response.name());
                        continue;
                    };
                    let ctx = EncodeContext::new(addr, world).with_player(player);
                    self.encode_into_queue(codec.as_ref(), response, &ctx, RecipientSet::single(addr));
                }
            } else if let Some(first) = addrs.first() {
                let ctx = EncodeContext::new(*first, world);
                let recipients = addrs.iter().copied().collect();
                self.encode_into_queue(codec.as_ref(), response, &ctx, recipients);
            }
        }
    }

    /// Packs a run of chunks bound for the same peers into shared batches
    async fn dispatch_chunks(&self, run: &[Outbound]) {
        let Some(first) = run.first() else {
            return;
        };
        let world = self.game_state.world();
        for (codec, addrs) in self.codec_groups(&first.recipients, "chunks").await {
            let Some(peer) = addrs.first() else {
                continue;
            };
            let ctx = EncodeContext::new(*peer, world);
            let mut packets = Vec::with_capacity(run.len());
            for out in run {
                match codec.encode(&out.response, &ctx) {
                    Ok(encoded) => packets.extend(encoded),
                    Err(e) => error!(
                        "Failed to encode {} for {} peers: {}",
                        out.response.name(),
                        addrs.len(),
                        e
                    ),
                }
            }

            let recipients: RecipientSet = addrs.iter().copied().collect();
            for batch in packets.chunks(CHUNKS_PER_BATCH) {
                self.outgoing
                    .enqueue_batch(recipients.clone(), batch.to_vec(), codec.envelope());
            }
        }
    }

    fn encode_into_queue(
        &self,
        codec: &dyn Subprotocol,
        response: &Response,
        ctx: &EncodeContext<'_>,
        recipients: RecipientSet,
    ) {
        match codec.encode(response, ctx) {
            Ok(packets) => {
                for packet in packets {
                    self.outgoing
                        .enqueue(recipients.clone(), packet, codec.envelope());
                }
            }
            Err(e) => error!(
                "Failed to encode {} for {} peers: {}",
                response.name(),
                recipients.len(),
                e
            ),
        }
    }

    /// Applies queued requests, then encodes and sends everything they produced
    async fn tick(&mut self) {
        let mut outbound = std::mem::take(&mut self.outbox);
        for request in std::mem::take(&mut self.inbox) {
            outbound.extend(self.game_state.apply(request));
        }

        let is_chunk = |out: &Outbound| matches!(out.response, Response::Chunk(_));
        let mut refused = Vec::new();
        for run in outbound.chunk_by(|a, b| is_chunk(a) && is_chunk(b) && a.recipients == b.recipients) {
            if run.len() > 1 {
                self.dispatch_chunks(run).await;
                continue;
            }
            for out in run {
                self.dispatch(out).await;
                if let Response::Login(LoginOutcome::Refused(_)) = out.response {
                    refused.extend(out.recipients.iter().copied());
                }
            }
        }
        if !refused.is_empty() {
            let mut clients = self.clients.write().await;
            for addr in refused {
                clients.remove_by_addr(addr);
            }
        }

        let deliveries = self.outgoing.flush().await;
        self.send(deliveries);
        self.game_state.tick += 1;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> io::Result<()> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message).await,
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let started = Instant::now();
                    self.tick().await;

                    let elapsed = started.elapsed();
                    if elapsed > self.tick_duration {
                        warn!(
                            "Can't keep up! Tick {} took {}ms, is the server overloaded?",
                            self.game_state.tick,
                            elapsed.as_millis()
                        );
                    }

                    // Periodic performance monitoring
                    if self.game_state.tick % 600 == 0 {
                        let sessions = self.clients.read().await.len();
                        if sessions > 0 {
                            debug!(
                                "Tick {}: {} sessions, {} players, {:?} per tick",
                                self.game_state.tick,
                                sessions,
                                self.game_state.player_count(),
                                elapsed
                            );
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
