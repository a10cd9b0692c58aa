//! Application configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or
//! no file at all) yields a working configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Display name used in discovery announcements. Empty means "use the
    /// host name".
    pub identifier: String,

    /// Frame stream settings
    pub stream: StreamConfig,

    /// Discovery announcer settings
    pub discovery: DiscoveryConfig,
}

/// Frame stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Address the control listener binds to
    pub bind_address: IpAddr,

    /// Listening port (0 picks an ephemeral port)
    pub port: u16,

    /// Initial JPEG quality, replaced by viewer options
    pub quality: u8,

    /// Maximum number of video frames in flight
    pub max_in_flight: usize,

    /// Socket write timeout in milliseconds (0 disables)
    pub write_timeout_ms: u64,

    /// Socket read timeout for the options message in milliseconds (0 disables)
    pub read_timeout_ms: u64,

    /// Largest options payload accepted from a viewer
    pub max_options_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            quality: DEFAULT_JPEG_QUALITY,
            max_in_flight: MAX_IN_FLIGHT_FRAMES,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_options_size: MAX_OPTIONS_SIZE,
        }
    }
}

impl StreamConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }
}

/// Discovery announcer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Whether to announce at all
    pub enabled: bool,

    /// Destination address, normally a multicast group
    pub address: IpAddr,

    /// Destination UDP port
    pub port: u16,

    /// Interval between announcements in milliseconds
    pub interval_ms: u64,

    /// Multicast TTL
    pub ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: IpAddr::V4(DISCOVERY_MULTICAST_ADDR),
            port: DISCOVERY_PORT,
            interval_ms: DISCOVERY_INTERVAL_MS,
            ttl: 1,
        }
    }
}

impl DiscoveryConfig {
    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            stream: StreamConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing file is not an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/lan-av-streamer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-av-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.stream.quality) {
            return Err(Error::Config(format!(
                "stream.quality must be 1-100, got {}",
                self.stream.quality
            )));
        }
        if self.stream.max_in_flight == 0 {
            return Err(Error::Config("stream.max_in_flight must be at least 1".into()));
        }
        if self.discovery.interval_ms == 0 {
            return Err(Error::Config("discovery.interval_ms must be positive".into()));
        }
        Ok(())
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
