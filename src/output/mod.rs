//! Output module
//!
//! Packet sinks receiving the raw compressed bitstream:
//! - FFmpeg muxer subprocess fed through its stdin
//! - In-memory buffer (headless runs, tests)

mod ffmpeg;
mod memory;

pub use ffmpeg::FfmpegPipe;
pub use memory::MemorySink;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Container format for the muxed output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// MP4 (.mp4) - Wide compatibility
    Mp4,
    /// Matroska (.mkv) - Survives an interrupted run
    Matroska,
    /// QuickTime (.mov)
    Mov,
    /// Transport Stream (.ts) - Streaming-friendly
    Ts,
}

impl Container {
    /// Get file extension
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Matroska => "mkv",
            Container::Mov => "mov",
            Container::Ts => "ts",
        }
    }

    /// Get FFmpeg muxer name
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Matroska => "matroska",
            Container::Mov => "mov",
            Container::Ts => "mpegts",
        }
    }

    /// Guess the container from an output path's extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "mp4" | "m4v" => Some(Container::Mp4),
            "mkv" => Some(Container::Matroska),
            "mov" => Some(Container::Mov),
            "ts" | "m2ts" => Some(Container::Ts),
            _ => None,
        }
    }
}

/// Consumer of the compressed bitstream.
///
/// One writer, strictly sequential: `write_packet`/`flush` per packet, then
/// `finish` once at end of stream.
pub trait PacketSink {
    /// Write all of `data`
    fn write_packet(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered bytes through to the consumer
    fn flush(&mut self) -> Result<()>;

    /// Signal end of stream and release the consumer
    fn finish(&mut self) -> Result<()>;

    /// Get bytes written
    fn bytes_written(&self) -> u64;
}

impl<S: PacketSink + ?Sized> PacketSink for &mut S {
    fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_packet(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }

    fn bytes_written(&self) -> u64 {
        (**self).bytes_written()
    }
}

impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_packet(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }

    fn bytes_written(&self) -> u64 {
        (**self).bytes_written()
    }
}
