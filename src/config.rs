//! Configuration types for vizenc
//!
//! A [`BridgeConfig`] can be built in code with the `with_*` methods or
//! loaded from TOML:
//!
//! ```toml
//! progress_interval = 60
//! finalize = "forward"
//!
//! [encoder]
//! module = "/opt/vizenc/libGlCudaNvEncoder.so"
//! device_index = 0
//!
//! [output]
//! path = "nvenc_output.mp4"
//! codec = "h264"
//! framerate = { num = 60, den = 1 }
//! log_file = "ffmpeg_nvenc_log.txt"
//! ```

use crate::encode::Codec;
use crate::error::{Error, Result};
use crate::output::Container;
use crate::types::{Framerate, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// What to do with the encoder's trailing packet after a failed loop
    pub finalize: TrailingPacketPolicy,
    /// Log progress every N frames (0 disables)
    pub progress_interval: u64,
    /// Encoder module and session parameters
    pub encoder: EncoderModuleConfig,
    /// Muxer subprocess parameters
    pub output: SinkConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            finalize: TrailingPacketPolicy::Forward,
            progress_interval: 60,
            encoder: EncoderModuleConfig::default(),
            output: SinkConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values the muxer or encoder cannot work with
    pub fn validate(&self) -> Result<()> {
        let rate = self.output.framerate;
        if rate.num == 0 || rate.den == 0 {
            return Err(Error::Config(format!(
                "framerate must be positive, got {}/{}",
                rate.num, rate.den
            )));
        }
        if let Some(res) = self.encoder.resolution {
            if res.width == 0 || res.height == 0 {
                return Err(Error::Config(format!("invalid resolution {}", res)));
            }
        }
        if self.output.path.as_os_str().is_empty() {
            return Err(Error::Config("output path is empty".into()));
        }
        Ok(())
    }

    pub fn with_module(mut self, module: impl Into<PathBuf>) -> Self {
        self.encoder.module = Some(module.into());
        self
    }

    pub fn with_device_index(mut self, device_index: u32) -> Self {
        self.encoder.device_index = device_index;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.encoder.resolution = Some(Resolution::new(width, height));
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output.path = path.into();
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.output.codec = codec;
        self
    }

    pub fn with_framerate(mut self, fps: u32) -> Self {
        self.output.framerate = Framerate::new(fps, 1);
        self
    }

    pub fn with_trailing_policy(mut self, policy: TrailingPacketPolicy) -> Self {
        self.finalize = policy;
        self
    }

    pub fn with_progress_interval(mut self, frames: u64) -> Self {
        self.progress_interval = frames;
        self
    }
}

/// Encoder module configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderModuleConfig {
    /// Module path (None = platform default `GlCudaNvEncoder` name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<PathBuf>,
    /// Accelerator the session is created on
    pub device_index: u32,
    /// Encoder size (None = the frame source's resolution)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

/// Muxer subprocess configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// FFmpeg executable
    pub ffmpeg: PathBuf,
    /// Elementary stream the encoder module emits
    pub codec: Codec,
    /// Output file
    pub path: PathBuf,
    /// Container override (None = inferred by FFmpeg from the extension)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    /// File receiving FFmpeg's stderr (None = discarded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// FFmpeg `-loglevel`
    pub log_level: String,
    /// Pass `-stats`
    pub stats: bool,
    /// Overwrite an existing output (`-y`)
    pub overwrite: bool,
    /// Output frame rate
    pub framerate: Framerate,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            codec: Codec::H264,
            path: PathBuf::from("nvenc_output.mp4"),
            container: None,
            log_file: Some(PathBuf::from("ffmpeg_nvenc_log.txt")),
            log_level: "error".into(),
            stats: true,
            overwrite: true,
            framerate: Framerate::FPS_60,
        }
    }
}

/// Handling of the packet returned by encoder destroy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrailingPacketPolicy {
    /// Always write the trailing packet
    #[default]
    Forward,
    /// Drop it when the frame loop stopped on an encode or render error
    DiscardOnError,
}
