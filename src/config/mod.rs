use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIN_CHUNK_SIZE: usize = 8 * 1024;
const MAX_CHUNK_SIZE: usize = 32 * 1024;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub extractor: ExtractorConfig,
    pub upstream: UpstreamConfig,
    pub transcoder: TranscoderConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractorConfig {
    pub binary: String,
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout_secs: 60,
        }
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
    pub chunk_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            read_timeout_secs: 30,
            user_agent: BROWSER_USER_AGENT.to_string(),
            chunk_size: 16 * 1024,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Chunk size kept within 8 KiB..=32 KiB whatever the file says.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TranscoderConfig {
    pub binary: String,
    pub bitrate_kbps: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            bitrate_kbps: 192,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        Ok(config)
    }

    pub fn get_logging_format(&self) -> &str {
        match self.logging.format.as_str() {
            "pretty" => "pretty",
            _ => "json",
        }
    }
}
