use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use server::world::FlatChunkProvider;
use std::path::PathBuf;
use std::sync::Arc;

/// Pocket edition server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file (TOML); flags below override its values
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
    /// Maximum number of players
    #[clap(short, long)]
    max_players: Option<usize>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config()?;
    info!(
        "Starting server on {} at {} ticks per second, {} players max",
        config.bind_addr(),
        config.tick_rate,
        config.max_players
    );

    let chunks = Arc::new(FlatChunkProvider::new()?);
    let mut server = Server::new(&config, chunks).await?;
    let handle = server.handle();

    let server_task = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
        }
    }

    Ok(())
}
