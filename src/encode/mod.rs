//! Hardware encoder module binding
//!
//! The encoder itself lives in a dynamically loaded module that encodes
//! straight from a GPU texture. This module defines the five-call interface
//! the rest of the crate programs against, the loader that binds it, and the
//! safe session/packet wrappers around it.

pub mod ffi;
pub mod loader;
pub mod packet;
pub mod scripted;
pub mod session;

pub use loader::{CapabilityTable, ModuleProbe};
pub use packet::EncodedPacket;
pub use scripted::{ModuleCall, ScriptedEncode, ScriptedModule};
pub use session::{EncoderSession, SessionState};

use crate::types::TextureId;
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;

/// Status code returned by the module (`0` = success)
pub type Status = c_int;

/// Elementary stream formats the encoder module can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264/AVC Annex B
    #[default]
    H264,
    /// H.265/HEVC Annex B
    Hevc,
    /// AV1 low-overhead bitstream (OBU)
    Av1,
}

impl Codec {
    /// FFmpeg demuxer that reads this raw stream from a pipe
    pub fn ffmpeg_demuxer(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
            Codec::Av1 => "obu",
        }
    }

    /// Get human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Codec::H264 => "H.264 (AVC)",
            Codec::Hevc => "H.265 (HEVC)",
            Codec::Av1 => "AV1",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Codec {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h264" | "avc" => Ok(Codec::H264),
            "h265" | "hevc" => Ok(Codec::Hevc),
            "av1" => Ok(Codec::Av1),
            other => Err(crate::error::Error::Config(format!("unknown codec: {}", other))),
        }
    }
}

/// Opaque handle to one live encoder instance inside the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle(NonNull<c_void>);

impl SessionHandle {
    /// Wrap a raw `EncoderState*`; `None` for a null pointer
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// A packet span as returned by the module, before ownership is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPacket {
    ptr: *mut u8,
    len: usize,
    // Non-null buffer reported with a negative size
    malformed: bool,
}

impl RawPacket {
    /// The "no packet this call" value
    pub const EMPTY: RawPacket = RawPacket {
        ptr: std::ptr::null_mut(),
        len: 0,
        malformed: false,
    };

    /// Build from the module's out-parameters.
    ///
    /// A negative size counts as empty. If the pointer is non-null the
    /// buffer is still handed back to the module.
    pub fn new(ptr: *mut u8, len: c_int) -> Self {
        let malformed = len < 0 && !ptr.is_null();
        if malformed {
            tracing::warn!(
                "Encoder module returned a buffer with size {}; releasing it unwritten",
                len
            );
        }
        Self {
            ptr,
            len: usize::try_from(len).unwrap_or(0),
            malformed,
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Null pointer or zero length: nothing to write
    pub fn is_empty(&self) -> bool {
        self.ptr.is_null() || self.len == 0
    }

    /// The buffer must go back through `free_packet`
    pub fn needs_free(&self) -> bool {
        !self.is_empty() || self.malformed
    }
}

/// The five entry points of an encoder module.
///
/// [`CapabilityTable`] implements this over a loaded shared library;
/// [`ScriptedModule`] implements it in-process for headless runs and tests.
/// Callers go through [`EncoderSession`] and [`EncodedPacket`], which uphold
/// the calling contract.
///
/// # Safety
///
/// Implementors guarantee that every non-empty [`RawPacket`] returned from
/// `encode_frame` or `destroy_encoder` points to `len` readable bytes that
/// stay valid and unaliased until it is passed to `free_packet`.
pub unsafe trait EncoderModule {
    /// Create an encoder sized to `width`x`height` on accelerator `device_index`
    fn create_encoder(&self, width: u32, height: u32, device_index: u32) -> Option<SessionHandle>;

    /// Bind the encoder input to a native texture.
    ///
    /// # Safety
    ///
    /// `session` must come from `create_encoder` and not yet be destroyed.
    unsafe fn register_texture(&self, session: SessionHandle, texture: TextureId) -> Status;

    /// Encode the bound texture's current contents.
    ///
    /// # Safety
    ///
    /// `session` must be live and have a registered texture.
    unsafe fn encode_frame(&self, session: SessionHandle) -> (Status, RawPacket);

    /// Tear the encoder down, returning any packet still buffered.
    ///
    /// # Safety
    ///
    /// `session` must be live; it is invalid after this call.
    unsafe fn destroy_encoder(&self, session: SessionHandle) -> (Status, RawPacket);

    /// Hand a packet back to the module.
    ///
    /// # Safety
    ///
    /// `packet` must come from this module, satisfy
    /// [`RawPacket::needs_free`], and not have been freed yet.
    unsafe fn free_packet(&self, packet: RawPacket);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_demuxers() {
        assert_eq!(Codec::H264.ffmpeg_demuxer(), "h264");
        assert_eq!(Codec::Hevc.ffmpeg_demuxer(), "hevc");
        assert_eq!(Codec::Av1.ffmpeg_demuxer(), "obu");
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("AVC".parse::<Codec>().unwrap(), Codec::H264);
        assert_eq!("h265".parse::<Codec>().unwrap(), Codec::Hevc);
        assert!("vp9".parse::<Codec>().is_err());
    }

    #[test]
    fn test_raw_packet_emptiness() {
        assert!(RawPacket::EMPTY.is_empty());

        let mut byte = 0u8;
        let ptr = &mut byte as *mut u8;
        assert!(RawPacket::new(ptr, 0).is_empty());
        assert!(RawPacket::new(ptr, -5).is_empty());
        assert!(RawPacket::new(std::ptr::null_mut(), 64).is_empty());
        assert!(!RawPacket::new(ptr, 1).is_empty());
    }

    #[test]
    fn test_raw_packet_release_rules() {
        let mut byte = 0u8;
        let ptr = &mut byte as *mut u8;
        assert!(RawPacket::new(ptr, 1).needs_free());
        assert!(!RawPacket::new(ptr, 0).needs_free());
        assert!(!RawPacket::EMPTY.needs_free());
        assert!(!RawPacket::new(std::ptr::null_mut(), -1).needs_free());
        // Negative size on a real buffer: nothing to write, still released
        assert!(RawPacket::new(ptr, -1).needs_free());
    }

    #[test]
    fn test_null_session_handle() {
        assert!(SessionHandle::from_raw(std::ptr::null_mut()).is_none());
    }
}
