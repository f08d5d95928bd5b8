//! Server configuration
//!
//! Values come from an optional TOML file; command line flags applied by the
//! binary take precedence. Every field has a default so a partial file (or
//! no file at all) is valid.

use protocol::{BlockPosition, Difficulty, Gamemode, WorldInfo};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Simulation ticks per second
    pub tick_rate: u32,
    pub max_players: usize,
    /// Seconds of silence before a session is dropped
    pub session_timeout: u64,
    /// Chunks sent around the spawn point on login, in chunks
    pub view_radius: i32,
    /// Concurrent compression/decompression jobs
    pub workers: usize,
    /// Enabled protocol versions
    pub protocols: Vec<i32>,
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 19132,
            tick_rate: 20,
            max_players: 20,
            session_timeout: 10,
            view_radius: 2,
            workers: 4,
            protocols: vec![27, 34],
            world: WorldConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub seed: i32,
    pub gamemode: Gamemode,
    pub difficulty: Difficulty,
    pub spawn: BlockPosition,
    pub time: i32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let world = WorldInfo::default();
        Self {
            seed: world.seed,
            gamemode: world.gamemode,
            difficulty: world.difficulty,
            spawn: world.spawn,
            time: world.time,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate must be within 1..=1000, got {}",
                self.tick_rate
            )));
        }
        if self.max_players == 0 {
            return Err(ConfigError::Invalid("max_players must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.protocols.is_empty() {
            return Err(ConfigError::Invalid("no protocol versions enabled".to_string()));
        }
        if self.view_radius < 0 {
            return Err(ConfigError::Invalid("view_radius cannot be negative".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    pub fn world_info(&self) -> WorldInfo {
        WorldInfo {
            seed: self.world.seed,
            gamemode: self.world.gamemode,
            difficulty: self.world.difficulty,
            spawn: self.world.spawn,
            time: self.world.time,
            ..WorldInfo::default()
        }
    }
}
