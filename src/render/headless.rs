//! Headless render stand-ins
//!
//! Used by `vizenc bench` to drive the encoder against a texture that
//! something else keeps filled, and by the tests.

use super::{FrameSource, PresentationSurface};
use crate::error::{Error, Result};
use crate::types::{Resolution, TextureId};

/// Yields frame numbers `1..=total`
#[derive(Debug, Clone)]
pub struct FrameCounter {
    resolution: Resolution,
    total: u64,
    next: u64,
}

impl FrameCounter {
    pub fn new(resolution: Resolution, total: u64) -> Self {
        Self {
            resolution,
            total,
            next: 1,
        }
    }

    /// Frames handed out so far
    pub fn produced(&self) -> u64 {
        self.next - 1
    }
}

impl FrameSource for FrameCounter {
    type Frame = u64;

    fn next_frame(&mut self) -> Option<u64> {
        if self.next > self.total {
            return None;
        }
        let frame = self.next;
        self.next += 1;
        Some(frame)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

/// A texture owned and filled outside this process's render loop.
///
/// Presenting is a no-op apart from bookkeeping; optionally fails on a given
/// frame to exercise the render-error path.
#[derive(Debug, Clone)]
pub struct ExternalTexture {
    texture: TextureId,
    presented: Vec<u64>,
    fail_on: Option<u64>,
}

impl ExternalTexture {
    pub fn new(texture: TextureId) -> Self {
        Self {
            texture,
            presented: Vec::new(),
            fail_on: None,
        }
    }

    /// Fail when asked to present frame `frame`
    pub fn failing_on(mut self, frame: u64) -> Self {
        self.fail_on = Some(frame);
        self
    }

    /// Frames presented, in order
    pub fn presented(&self) -> &[u64] {
        &self.presented
    }
}

impl PresentationSurface<u64> for ExternalTexture {
    fn present(&mut self, frame: &u64) -> Result<()> {
        if self.fail_on == Some(*frame) {
            return Err(Error::Render(format!("{} lost", self.texture)));
        }
        self.presented.push(*frame);
        Ok(())
    }

    fn native_handle(&self) -> TextureId {
        self.texture
    }
}
