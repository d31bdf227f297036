//! Value types shared by the encoder, sink and config layers

use serde::{Deserialize, Serialize};

/// Encoder input size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const FHD_1080P: Self = Self::new(1920, 1080);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WIDTHxHEIGHT` string (e.g. `1920x1080`)
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse().ok()?;
        let height = h.trim().parse().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::new(width, height))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Muxer frame rate as a rational `num/den`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub den: u32,
}

impl Framerate {
    pub const FPS_60: Self = Self::new(60, 1);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Rate as FFmpeg expects it on the command line (`60` or `30000/1001`)
    pub fn to_ffmpeg_arg(&self) -> String {
        if self.den <= 1 {
            self.num.to_string()
        } else {
            format!("{}/{}", self.num, self.den)
        }
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} fps", self.to_ffmpeg_arg())
    }
}

/// Native GPU texture name the encoder reads from (e.g. a GL texture id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureId(pub u32);

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}
