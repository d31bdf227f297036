//! vizenc - GPU render target to hardware encoder bridge
//!
//! Encodes frames rendered into a GPU texture with an NVENC-backed encoder
//! module loaded at runtime, and streams the compressed packets into an
//! FFmpeg muxer subprocess.
//!
//! # Features
//!
//! - **Load**: bind the five-entry-point encoder module (`GlCudaNvEncoder`)
//! - **Encode**: session lifecycle with exactly-once packet release
//! - **Pump**: present, encode, forward; one frame in flight
//! - **Output**: FFmpeg stdin pipe muxing into MP4/MKV/MOV/TS
//!
//! # Example
//!
//! ```rust,no_run
//! use vizenc::render::{ExternalTexture, FrameCounter};
//! use vizenc::{BridgeConfig, CapabilityTable, FfmpegPipe, Pipeline, Resolution, TextureId};
//!
//! fn main() -> anyhow::Result<()> {
//!     let module = CapabilityTable::load_default()?;
//!     let config = BridgeConfig::default().with_output_path("capture.mkv");
//!
//!     let report = Pipeline::new(&module, config.clone()).run(
//!         FrameCounter::new(Resolution::FHD_1080P, 600),
//!         ExternalTexture::new(TextureId(1)),
//!         || FfmpegPipe::open(&config.output),
//!     )?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod encode;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod types;

// Re-exports for convenience
pub use config::{BridgeConfig, EncoderModuleConfig, SinkConfig, TrailingPacketPolicy};
pub use encode::{CapabilityTable, Codec, EncoderModule, EncoderSession, ModuleProbe};
pub use error::{Error, LoadError, Result};
pub use output::{Container, FfmpegPipe, MemorySink, PacketSink};
pub use pipeline::{Pipeline, RunReport, StopReason};
pub use types::{Framerate, Resolution, TextureId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Load the encoder module named in `config`, or the platform default
pub fn load_module(
    config: &EncoderModuleConfig,
) -> std::result::Result<CapabilityTable, LoadError> {
    match &config.module {
        Some(path) => CapabilityTable::load(path),
        None => CapabilityTable::load_default(),
    }
}

/// Check which encoder entry points a module exports
pub fn probe_module(config: &EncoderModuleConfig) -> std::result::Result<ModuleProbe, LoadError> {
    match &config.module {
        Some(path) => CapabilityTable::probe(path),
        None => CapabilityTable::probe(libloading::library_filename(
            encode::ffi::DEFAULT_MODULE_NAME,
        )),
    }
}
