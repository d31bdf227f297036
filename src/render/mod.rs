//! Render-side interfaces
//!
//! The renderer is an external collaborator. The pipeline only needs two
//! things from it:
//! - a [`FrameSource`] that advances to the next frame or reports exhaustion
//! - a [`PresentationSurface`] that draws a frame into the GPU texture the
//!   encoder is bound to
//!
//! Windowed rendering (draw to a window, display, copy into a texture) and
//! offscreen rendering (draw to a render texture) are two surface
//! implementations driven by the same frame pump.

mod headless;

pub use headless::{ExternalTexture, FrameCounter};

use crate::error::Result;
use crate::types::{Resolution, TextureId};

/// Producer of frames
pub trait FrameSource {
    /// Whatever the surface needs to draw one frame
    type Frame;

    /// Advance to the next frame; `None` once the source is exhausted
    fn next_frame(&mut self) -> Option<Self::Frame>;

    /// Size of the frames this source produces
    fn resolution(&self) -> Resolution;

    /// Total frame count, if known up front
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }
}

/// Render target the encoder reads from
pub trait PresentationSurface<F> {
    /// Draw `frame` and make it fully visible in the bound texture.
    ///
    /// Must not return before the texture holds the frame; the encoder reads
    /// it right after.
    fn present(&mut self, frame: &F) -> Result<()>;

    /// Stable native handle of the texture, registered with the encoder once
    fn native_handle(&self) -> TextureId;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    type Frame = S::Frame;

    fn next_frame(&mut self) -> Option<Self::Frame> {
        (**self).next_frame()
    }

    fn resolution(&self) -> Resolution {
        (**self).resolution()
    }

    fn frame_count_hint(&self) -> Option<u64> {
        (**self).frame_count_hint()
    }
}

impl<F, P: PresentationSurface<F> + ?Sized> PresentationSurface<F> for &mut P {
    fn present(&mut self, frame: &F) -> Result<()> {
        (**self).present(frame)
    }

    fn native_handle(&self) -> TextureId {
        (**self).native_handle()
    }
}
