//! Performance benchmarks for the codec hot paths

use protocol::{
    ByteOrder, ChunkData, ChunkPosition, EncodeContext, LoginOutcome, MetadataDictionary,
    MetadataValue, RawPacket, Response, Subprotocol, SubprotocolV27, SubprotocolV34, WorldInfo,
};
use server::outgoing::{OutgoingQueue, RecipientSet};
use server::workers::WorkerPool;
use server::world::{ChunkProvider, FlatChunkProvider};
use std::net::SocketAddr;
use std::time::Instant;

fn peer() -> SocketAddr {
    "127.0.0.1:19132".parse().unwrap()
}

fn chunk_packet(codec: &dyn Subprotocol) -> RawPacket {
    let provider = FlatChunkProvider::new().unwrap();
    let position = ChunkPosition::new(0, 0);
    let layers = provider.load_chunk(position).unwrap();
    let world = WorldInfo::default();
    codec
        .encode(
            &Response::Chunk(ChunkData::new(position, &layers)),
            &EncodeContext::new(peer(), &world),
        )
        .unwrap()
        .remove(0)
}

/// Benchmarks chunk compression, the biggest outgoing cost per login
#[test]
fn benchmark_chunk_batching() {
    let codec = SubprotocolV34::new();
    let packet = chunk_packet(&codec);
    let envelope = codec.envelope();

    let iterations = 20;
    let start = Instant::now();

    let mut compressed_len = 0;
    for _ in 0..iterations {
        compressed_len = envelope.batch(std::slice::from_ref(&packet)).unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Chunk batching: {} iterations in {:?} ({:.2} ms/iter, {} -> {} bytes)",
        iterations,
        duration,
        duration.as_secs_f64() * 1000.0 / iterations as f64,
        packet.len(),
        compressed_len
    );

    assert!(compressed_len < packet.len());
    // Generous bound, unoptimized builds included
    assert!(duration.as_secs() < 10);
}

/// Benchmarks decoding a batch of small client packets
#[test]
fn benchmark_batch_decoding() {
    let codec = SubprotocolV27::new();
    let mut moves = Vec::new();
    for i in 0..100 {
        let mut w = protocol::PacketWriter::with_opcode(
            protocol::subprotocol::v27::MOVE_PLAYER,
            ByteOrder::BigEndian,
        );
        w.write_i64(1);
        for value in [i as f32, 4.0, 128.5, 90.0, 90.0, 0.0] {
            w.write_f32(value);
        }
        w.write_u8(0);
        w.write_bool(true);
        moves.push(w.into_packet(peer()));
    }
    let batch = codec.envelope().batch(&moves).unwrap();

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let requests = codec.decode(&batch).unwrap();
        assert_eq!(requests.len(), 100);
    }

    let duration = start.elapsed();
    println!(
        "Batch decoding: {} iterations in {:?} ({:.2} us/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 10);
}

/// Benchmarks metadata encoding and decoding
#[test]
fn benchmark_metadata() {
    let mut meta = MetadataDictionary::new();
    meta.insert(0, MetadataValue::Byte(0)).unwrap();
    meta.insert(1, MetadataValue::Short(300)).unwrap();
    meta.insert(2, MetadataValue::String("Steve".to_string())).unwrap();
    meta.insert(3, MetadataValue::Byte(1)).unwrap();
    meta.insert(17, MetadataValue::Long(-1)).unwrap();

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let encoded = meta.encode().unwrap();
        let decoded = MetadataDictionary::decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 5);
    }

    let duration = start.elapsed();
    println!(
        "Metadata: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 10);
}

/// Benchmarks encoding the login acceptance sequence
#[test]
fn benchmark_login_encoding() {
    let codec = SubprotocolV27::new();
    let world = WorldInfo::default();
    let player = protocol::PlayerSnapshot {
        entity_id: 1,
        client_id: 42,
        uuid: uuid::Uuid::from_u64_pair(0, 42),
        username: "Steve".to_string(),
        nametag: "Steve".to_string(),
        position: world.spawn.to_position(),
        gamemode: world.gamemode,
        skin: bytes::Bytes::from(vec![0u8; 8192]),
        slim: false,
    };
    let ctx = EncodeContext::new(peer(), &world).with_player(&player);

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let packets = codec
            .encode(&Response::Login(LoginOutcome::Accepted), &ctx)
            .unwrap();
        assert_eq!(packets.len(), 6);
    }

    let duration = start.elapsed();
    println!(
        "Login encoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 10);
}

/// Benchmarks a full outgoing flush with parallel compression
#[test]
fn benchmark_outgoing_flush() {
    let codec = SubprotocolV27::new();
    let packet = chunk_packet(&codec);
    let recipients: RecipientSet = (0..4u16)
        .map(|i| SocketAddr::from(([127, 0, 0, 1], 20_000 + i)))
        .collect();

    let start = Instant::now();

    let deliveries = tokio_test::block_on(async {
        let queue = OutgoingQueue::new(WorkerPool::new(4));
        for _ in 0..16 {
            queue.enqueue(recipients.clone(), packet.clone(), codec.envelope());
        }
        queue.flush().await
    });

    let duration = start.elapsed();
    println!(
        "Outgoing flush: {} deliveries in {:?}",
        deliveries.len(),
        duration
    );

    assert_eq!(deliveries.len(), 64);
    assert!(duration.as_secs() < 10);
}
