//! Encoder-owned packet buffers
//!
//! A packet stays owned by the encoder module until it is handed back
//! through `free_packet`. [`EncodedPacket`] wraps that span and frees it
//! exactly once: explicitly via [`EncodedPacket::release`] after the bytes
//! reached the sink, or on drop on any other exit path. Empty packets are
//! never written, and never freed unless the module handed out a real
//! buffer with a negative size.

use super::{EncoderModule, RawPacket};
use crate::error::Result;
use crate::output::PacketSink;

/// One compressed packet borrowed from the encoder module
pub struct EncodedPacket<'m, M: EncoderModule + ?Sized> {
    module: &'m M,
    raw: RawPacket,
    released: bool,
}

impl<'m, M: EncoderModule + ?Sized> EncodedPacket<'m, M> {
    /// Take ownership of a packet the module just returned.
    ///
    /// # Safety
    ///
    /// `raw` must have come from `module` and must not be owned by any other
    /// `EncodedPacket`.
    pub(crate) unsafe fn from_raw(module: &'m M, raw: RawPacket) -> Self {
        Self {
            module,
            raw,
            released: false,
        }
    }

    /// No bytes this call
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.raw.len()
        }
    }

    /// The compressed bytes (empty slice for an empty packet)
    pub fn bytes(&self) -> &[u8] {
        if self.is_empty() {
            return &[];
        }
        // SAFETY: non-empty and not yet released, so the module guarantees
        // `len` readable bytes at `ptr`.
        unsafe { std::slice::from_raw_parts(self.raw.as_ptr(), self.raw.len()) }
    }

    /// Write the packet to `sink`, flush it, then free it.
    ///
    /// Empty packets are skipped without touching the sink. Returns the
    /// number of bytes written. On a sink error the packet is still freed.
    pub fn forward_to<S: PacketSink + ?Sized>(self, sink: &mut S) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let len = self.len();
        sink.write_packet(self.bytes())?;
        sink.flush()?;
        self.release();
        Ok(len)
    }

    /// Hand the buffer back to the module
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.raw.needs_free() {
            // SAFETY: packet from this module, freed only here and guarded
            // by `released`.
            unsafe { self.module.free_packet(self.raw) };
        }
    }
}

impl<M: EncoderModule + ?Sized> Drop for EncodedPacket<'_, M> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl<M: EncoderModule + ?Sized> std::fmt::Debug for EncodedPacket<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("len", &self.len())
            .field("released", &self.released)
            .finish()
    }
}
