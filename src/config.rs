//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so an absent file or a
//! partial file is fine:
//!
//! ```toml
//! [network]
//! port = 47213
//!
//! [audio]
//! pool_capacity = 8
//! stale_frames = 4
//!
//! [codec]
//! kind = "opus"
//! bitrate = 96000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub codec: CodecConfig,
    pub jitter: JitterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port to listen on (server) or send to (client)
    pub port: u16,
    /// Requested socket receive buffer on the server
    pub recv_buffer_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; default device when unset
    pub input_device: Option<String>,
    /// Output device name; default device when unset
    pub output_device: Option<String>,
    /// Slots in each capture pool
    pub pool_capacity: usize,
    /// Frame periods without a packet before the receiver plays silence
    pub stale_frames: u32,
}

impl AudioConfig {
    pub fn stale_window(&self) -> Duration {
        Duration::from_millis(u64::from(FRAME_MS) * u64::from(self.stale_frames))
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            stale_frames: DEFAULT_STALE_FRAMES,
        }
    }
}

/// Payload encoding; both ends must agree since the wire carries no tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Opus-compressed frames
    Opus,
    /// Uncompressed 16-bit little-endian PCM
    Pcm,
}

/// Opus application profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    Voip,
    Audio,
    LowDelay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub kind: CodecKind,
    pub application: OpusApplication,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Variable bitrate
    pub vbr: bool,
    /// Constrained VBR (only with `vbr`)
    pub cvbr: bool,
    /// In-band forward error correction
    pub fec: bool,
    /// Expected packet loss, tunes FEC
    pub packet_loss_perc: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            kind: CodecKind::Opus,
            application: OpusApplication::Audio,
            bitrate: DEFAULT_BITRATE,
            vbr: true,
            cvbr: true,
            fec: false,
            packet_loss_perc: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Reorder window in frames, power of two
    pub capacity: usize,
    /// Frames to buffer before playout starts
    pub min_delay: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            min_delay: 2,
        }
    }
}

impl AppConfig {
    /// Platform config file location, e.g. `~/.config/sndlink/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sndlink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from [`default_path`](Self::default_path) if it exists
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.audio.pool_capacity == 0 {
            return Err(Error::Config("audio.pool_capacity must be at least 1".into()));
        }
        if self.audio.stale_frames == 0 {
            return Err(Error::Config("audio.stale_frames must be at least 1".into()));
        }
        if !self.jitter.capacity.is_power_of_two() {
            return Err(Error::Config(format!(
                "jitter.capacity must be a power of two, got {}",
                self.jitter.capacity
            )));
        }
        if self.jitter.min_delay > self.jitter.capacity {
            return Err(Error::Config(
                "jitter.min_delay cannot exceed jitter.capacity".into(),
            ));
        }
        if !(6_000..=510_000).contains(&self.codec.bitrate) {
            return Err(Error::Config(format!(
                "codec.bitrate {} outside 6000..=510000",
                self.codec.bitrate
            )));
        }
        if self.codec.packet_loss_perc > 100 {
            return Err(Error::Config("codec.packet_loss_perc must be 0..=100".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network.port, 47213);
        assert_eq!(config.audio.pool_capacity, 8);
        assert_eq!(config.audio.stale_window(), Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config = AppConfig::from_toml(
            r#"
            [audio]
            stale_frames = 10

            [codec]
            kind = "pcm"
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.stale_window(), Duration::from_millis(50));
        assert_eq!(config.audio.pool_capacity, 8);
        assert_eq!(config.codec.kind, CodecKind::Pcm);
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml("[jitter]\ncapacity = 12").is_err());
        assert!(AppConfig::from_toml("[audio]\npool_capacity = 0").is_err());
        assert!(AppConfig::from_toml("[codec]\nbitrate = 1").is_err());
        assert!(AppConfig::from_toml("[codec]\nkind = \"mp3\"").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.audio.input_device = Some("USB Mic".into());
        let text = toml::to_string(&config).unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/sndlink.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
