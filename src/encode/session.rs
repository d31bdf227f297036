//! Encoder session lifecycle
//!
//! One [`EncoderSession`] per run: created against a bound module, bound to a
//! single render target, encoded from zero or more times, and destroyed
//! exactly once. `destroy` consumes the session, so the handle cannot be used
//! afterwards; a session dropped without `destroy` (early error exit) is torn
//! down on drop and its trailing packet released unwritten.

use super::ffi::STATUS_OK;
use super::{EncodedPacket, EncoderModule, SessionHandle};
use crate::error::{Error, Result};
use crate::types::{Resolution, TextureId};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Encoder created, no render target yet
    Created,
    /// Render target registered, nothing encoded yet
    TargetBound,
    /// At least one encode call issued
    Encoding,
    /// Torn down
    Destroyed,
}

/// A live hardware encoder instance
pub struct EncoderSession<'m, M: EncoderModule + ?Sized> {
    module: &'m M,
    handle: SessionHandle,
    state: SessionState,
    resolution: Resolution,
    device_index: u32,
    target: Option<TextureId>,
    frames_submitted: u64,
    frames_encoded: u64,
}

impl<'m, M: EncoderModule + ?Sized> EncoderSession<'m, M> {
    /// Create an encoder sized to `resolution` on accelerator `device_index`
    pub fn create(module: &'m M, resolution: Resolution, device_index: u32) -> Result<Self> {
        let handle = module
            .create_encoder(resolution.width, resolution.height, device_index)
            .ok_or(Error::SessionCreate {
                width: resolution.width,
                height: resolution.height,
                device_index,
            })?;

        tracing::info!(
            "Encoder session created: {} on device {}",
            resolution,
            device_index
        );

        Ok(Self {
            module,
            handle,
            state: SessionState::Created,
            resolution,
            device_index,
            target: None,
            frames_submitted: 0,
            frames_encoded: 0,
        })
    }

    /// Bind the encoder input to `texture`. Allowed once, before any encode.
    pub fn register_target(&mut self, texture: TextureId) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(Error::SessionState(format!(
                "cannot register {} in state {:?}",
                texture, self.state
            )));
        }

        tracing::info!("Registering render target {}", texture);
        // SAFETY: the handle is live until `teardown`, which needs `&mut self`.
        let status = unsafe { self.module.register_texture(self.handle, texture) };
        if status != STATUS_OK {
            return Err(Error::TargetBind { texture, status });
        }

        self.target = Some(texture);
        self.state = SessionState::TargetBound;
        Ok(())
    }

    /// Encode the bound texture's current contents.
    ///
    /// The returned packet may be empty. On failure any packet the module
    /// returned alongside the error status is freed.
    pub fn encode(&mut self) -> Result<EncodedPacket<'m, M>> {
        if !matches!(self.state, SessionState::TargetBound | SessionState::Encoding) {
            return Err(Error::SessionState(format!(
                "cannot encode in state {:?}",
                self.state
            )));
        }

        self.state = SessionState::Encoding;
        self.frames_submitted += 1;

        // SAFETY: live handle with a registered target (checked above).
        let (status, raw) = unsafe { self.module.encode_frame(self.handle) };
        // SAFETY: `raw` was just returned by the module and has no other owner.
        let packet = unsafe { EncodedPacket::from_raw(self.module, raw) };

        if status != STATUS_OK {
            drop(packet);
            return Err(Error::EncodeFrame {
                frame: self.frames_submitted,
                status,
            });
        }

        self.frames_encoded += 1;
        Ok(packet)
    }

    /// Tear the session down, returning the packet the encoder flushed
    pub fn destroy(mut self) -> EncodedPacket<'m, M> {
        self.teardown()
    }

    /// Tear the session down and drop whatever it flushed
    pub fn abort(mut self) {
        let tail = self.teardown();
        if !tail.is_empty() {
            tracing::debug!("Discarding {} byte trailing packet on abort", tail.len());
        }
    }

    fn teardown(&mut self) -> EncodedPacket<'m, M> {
        debug_assert_ne!(self.state, SessionState::Destroyed);

        tracing::info!(
            "Destroying encoder session ({} frames encoded)",
            self.frames_encoded
        );
        // SAFETY: first and only destroy; the state flips before anything
        // else can observe the handle.
        let (status, raw) = unsafe { self.module.destroy_encoder(self.handle) };
        self.state = SessionState::Destroyed;

        if status != STATUS_OK {
            tracing::warn!("Encoder destroy returned status {}", status);
        }

        // SAFETY: `raw` was just returned by the module and has no other owner.
        unsafe { EncodedPacket::from_raw(self.module, raw) }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    /// Registered render target, if any
    pub fn target(&self) -> Option<TextureId> {
        self.target
    }

    /// Successful encode calls so far
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl<M: EncoderModule + ?Sized> Drop for EncoderSession<'_, M> {
    fn drop(&mut self) {
        if self.state != SessionState::Destroyed {
            tracing::warn!("Encoder session dropped without destroy; tearing down");
            drop(self.teardown());
        }
    }
}

impl<M: EncoderModule + ?Sized> std::fmt::Debug for EncoderSession<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("state", &self.state)
            .field("resolution", &self.resolution)
            .field("device_index", &self.device_index)
            .field("target", &self.target)
            .field("frames_encoded", &self.frames_encoded)
            .finish()
    }
}
