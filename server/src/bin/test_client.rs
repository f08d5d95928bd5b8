//! Logs in over UDP with protocol 27 and prints what the server sends back.

use protocol::subprotocol::v27;
use protocol::{
    BatchEnvelope, BatchFraming, ByteOrder, PacketReader, PacketWriter, ProtocolError, RawPacket,
};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const SKIN_LEN: usize = 64 * 32 * 4;

fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        v27::PLAY_STATUS => "PLAY_STATUS",
        v27::DISCONNECT => "DISCONNECT",
        v27::BATCH => "BATCH",
        v27::TEXT => "TEXT",
        v27::SET_TIME => "SET_TIME",
        v27::START_GAME => "START_GAME",
        v27::ADD_PLAYER => "ADD_PLAYER",
        v27::REMOVE_PLAYER => "REMOVE_PLAYER",
        v27::MOVE_PLAYER => "MOVE_PLAYER",
        v27::SET_HEALTH => "SET_HEALTH",
        v27::SET_SPAWN_POSITION => "SET_SPAWN_POSITION",
        v27::RESPAWN => "RESPAWN",
        v27::ADVENTURE_SETTINGS => "ADVENTURE_SETTINGS",
        v27::FULL_CHUNK_DATA => "FULL_CHUNK_DATA",
        v27::SET_DIFFICULTY => "SET_DIFFICULTY",
        _ => "UNKNOWN",
    }
}

/// Server batches carry chunks back to back, or one other packet alone
fn measure(bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let mut reader = PacketReader::new(bytes, ByteOrder::BigEndian);
    if reader.read_u8()? != v27::FULL_CHUNK_DATA {
        return Ok(Some(bytes.len()));
    }
    reader.read_i32()?;
    reader.read_i32()?;
    let len = reader.read_i32()? as usize;
    reader.skip(len)?;
    Ok(Some(reader.position()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:19132".to_string())
        .parse::<SocketAddr>()?;
    let username = std::env::args().nth(2).unwrap_or_else(|| "Steve".to_string());

    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let client_id: i32 = rand::thread_rng().gen();
    let mut login = PacketWriter::with_opcode(v27::LOGIN, ByteOrder::BigEndian);
    login.write_string(&username)?;
    login.write_i32(v27::PROTOCOL);
    login.write_i32(v27::PROTOCOL);
    login.write_i32(client_id);
    login.write_bool(false);
    login.write_short_bytes(&vec![0xffu8; SKIN_LEN])?;
    let login = login.into_packet(server_addr);

    println!(
        "Logging in as {} (client id {}) to {}",
        username, client_id, server_addr
    );
    socket.send_to(login.bytes(), server_addr).await?;

    let envelope = BatchEnvelope::new(v27::BATCH, BatchFraming::Unframed);
    let mut buf = vec![0u8; 65_535];

    loop {
        let (len, addr) = match timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => {
                println!("No more packets, exiting");
                break;
            }
        };
        let packet = RawPacket::new(buf[..len].to_vec(), ByteOrder::BigEndian, addr);
        let Some(opcode) = packet.opcode() else {
            continue;
        };

        if envelope.is_batch(&packet) {
            let inner = envelope.unbatch(&packet, measure)?;
            for sub in inner {
                let sub_opcode = sub.opcode().unwrap_or_default();
                println!("  BATCH -> {} ({} bytes)", opcode_name(sub_opcode), sub.len());
            }
        } else {
            println!("{} ({} bytes)", opcode_name(opcode), len);
        }
    }

    Ok(())
}
