//! In-process scripted encoder module
//!
//! Implements [`EncoderModule`] without a GPU: each encode call plays the
//! next step of a script, and every call is recorded. Packets are real heap
//! allocations handed out by raw pointer and reclaimed on free, so ownership
//! mistakes (leaks, double frees) show up in [`ScriptedModule::outstanding_packets`]
//! and [`ScriptedModule::invalid_frees`]. Used by `vizenc bench --scripted`,
//! the pump benchmark, and the test suite.

use super::{EncoderModule, RawPacket, SessionHandle, Status};
use crate::types::TextureId;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::c_int;
use std::ptr::NonNull;

/// Outcome of one scripted encode call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedEncode {
    /// Emit a packet with these bytes
    Packet(Vec<u8>),
    /// Null pointer, no packet
    Empty,
    /// Non-null pointer with zero length
    ZeroLength,
    /// Return a non-zero status
    Fail(Status),
    /// Return a non-zero status together with a packet
    FailWithPacket(Status, Vec<u8>),
    /// Hand out a real buffer but report its size as -1
    NegativeLength(Vec<u8>),
}

impl ScriptedEncode {
    pub fn packet(bytes: impl AsRef<[u8]>) -> Self {
        ScriptedEncode::Packet(bytes.as_ref().to_vec())
    }
}

/// A call observed by the scripted module, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleCall {
    CreateEncoder {
        width: u32,
        height: u32,
        device_index: u32,
    },
    RegisterTexture(TextureId),
    EncodeFrame,
    DestroyEncoder,
    /// Contents of the freed packet
    FreePacket(Vec<u8>),
}

/// Scripted stand-in for the hardware encoder module
pub struct ScriptedModule {
    fail_create: bool,
    register_status: Status,
    destroy_status: Status,
    encodes: RefCell<VecDeque<ScriptedEncode>>,
    synthetic_size: Option<usize>,
    final_packet: RefCell<Option<Vec<u8>>>,
    calls: RefCell<Vec<ModuleCall>>,
    live: RefCell<HashMap<usize, usize>>,
    invalid_frees: Cell<usize>,
    frames: Cell<u64>,
    destroyed: Cell<bool>,
}

impl Default for ScriptedModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModule {
    /// A module that succeeds everywhere and emits no packets
    pub fn new() -> Self {
        Self {
            fail_create: false,
            register_status: 0,
            destroy_status: 0,
            encodes: RefCell::new(VecDeque::new()),
            synthetic_size: None,
            final_packet: RefCell::new(None),
            calls: RefCell::new(Vec::new()),
            live: RefCell::new(HashMap::new()),
            invalid_frees: Cell::new(0),
            frames: Cell::new(0),
            destroyed: Cell::new(false),
        }
    }

    /// Queue encode outcomes, played one per encode call
    pub fn with_encodes(self, encodes: impl IntoIterator<Item = ScriptedEncode>) -> Self {
        self.encodes.borrow_mut().extend(encodes);
        self
    }

    /// Once the script is exhausted, emit a `size`-byte packet per frame
    pub fn with_synthetic_packets(mut self, size: usize) -> Self {
        self.synthetic_size = Some(size);
        self
    }

    /// Packet returned by destroy (the flushed tail of the stream)
    pub fn with_final_packet(self, bytes: impl AsRef<[u8]>) -> Self {
        *self.final_packet.borrow_mut() = Some(bytes.as_ref().to_vec());
        self
    }

    /// Make create return null
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Status returned by register
    pub fn with_register_status(mut self, status: Status) -> Self {
        self.register_status = status;
        self
    }

    /// Status returned by destroy
    pub fn with_destroy_status(mut self, status: Status) -> Self {
        self.destroy_status = status;
        self
    }

    /// Every call seen so far
    pub fn calls(&self) -> Vec<ModuleCall> {
        self.calls.borrow().clone()
    }

    /// Number of recorded calls matching `pred`
    pub fn count_calls(&self, pred: impl Fn(&ModuleCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    /// Contents of every freed packet, in free order
    pub fn frees(&self) -> Vec<Vec<u8>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ModuleCall::FreePacket(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Packets handed out and not yet freed
    pub fn outstanding_packets(&self) -> usize {
        self.live.borrow().len()
    }

    /// Frees of pointers that were not outstanding
    pub fn invalid_frees(&self) -> usize {
        self.invalid_frees.get()
    }

    fn record(&self, call: ModuleCall) {
        self.calls.borrow_mut().push(call);
    }

    fn hand_out(&self, bytes: Vec<u8>) -> RawPacket {
        if bytes.is_empty() {
            return Self::zero_length();
        }
        let len = bytes.len() as c_int;
        self.hand_out_with_size(bytes, len)
    }

    fn hand_out_with_size(&self, mut bytes: Vec<u8>, reported: c_int) -> RawPacket {
        if bytes.is_empty() {
            bytes.push(0);
        }
        let len = bytes.len();
        let ptr = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        self.live.borrow_mut().insert(ptr as usize, len);
        RawPacket::new(ptr, reported)
    }

    fn zero_length() -> RawPacket {
        RawPacket::new(NonNull::<u8>::dangling().as_ptr(), 0)
    }

    fn synthetic_packet(frame: u64, size: usize) -> Vec<u8> {
        // Annex B start code followed by the frame number
        let mut bytes = vec![0, 0, 0, 1];
        bytes.extend_from_slice(&frame.to_be_bytes());
        bytes.resize(size.max(1), 0xAB);
        bytes
    }
}

// SAFETY: packets are boxed slices tracked in `live` until freed.
unsafe impl EncoderModule for ScriptedModule {
    fn create_encoder(&self, width: u32, height: u32, device_index: u32) -> Option<SessionHandle> {
        self.record(ModuleCall::CreateEncoder {
            width,
            height,
            device_index,
        });
        if self.fail_create {
            return None;
        }
        self.destroyed.set(false);
        SessionHandle::from_raw(NonNull::<u8>::dangling().as_ptr().cast())
    }

    unsafe fn register_texture(&self, _session: SessionHandle, texture: TextureId) -> Status {
        self.record(ModuleCall::RegisterTexture(texture));
        self.register_status
    }

    unsafe fn encode_frame(&self, _session: SessionHandle) -> (Status, RawPacket) {
        self.record(ModuleCall::EncodeFrame);
        if self.destroyed.get() {
            tracing::error!("Scripted module: encode after destroy");
            return (-1, RawPacket::EMPTY);
        }

        let frame = self.frames.get() + 1;
        self.frames.set(frame);

        let step = self.encodes.borrow_mut().pop_front();
        match step {
            Some(ScriptedEncode::Packet(bytes)) => (0, self.hand_out(bytes)),
            Some(ScriptedEncode::Empty) => (0, RawPacket::EMPTY),
            Some(ScriptedEncode::ZeroLength) => (0, Self::zero_length()),
            Some(ScriptedEncode::Fail(status)) => (status, RawPacket::EMPTY),
            Some(ScriptedEncode::FailWithPacket(status, bytes)) => (status, self.hand_out(bytes)),
            Some(ScriptedEncode::NegativeLength(bytes)) => (0, self.hand_out_with_size(bytes, -1)),
            None => match self.synthetic_size {
                Some(size) => (0, self.hand_out(Self::synthetic_packet(frame, size))),
                None => (0, RawPacket::EMPTY),
            },
        }
    }

    unsafe fn destroy_encoder(&self, _session: SessionHandle) -> (Status, RawPacket) {
        self.record(ModuleCall::DestroyEncoder);
        self.destroyed.set(true);

        let tail = self.final_packet.borrow_mut().take();
        let packet = match tail {
            Some(bytes) => self.hand_out(bytes),
            None => RawPacket::EMPTY,
        };
        (self.destroy_status, packet)
    }

    unsafe fn free_packet(&self, packet: RawPacket) {
        let len = self.live.borrow_mut().remove(&(packet.as_ptr() as usize));
        match len {
            Some(len) => {
                let boxed = Box::from_raw(std::ptr::slice_from_raw_parts_mut(packet.as_ptr(), len));
                self.record(ModuleCall::FreePacket(boxed.into_vec()));
            }
            None => {
                tracing::error!("Scripted module: free of unknown packet {:p}", packet.as_ptr());
                self.invalid_frees.set(self.invalid_frees.get() + 1);
            }
        }
    }
}

impl Drop for ScriptedModule {
    fn drop(&mut self) {
        for (ptr, len) in self.live.get_mut().drain() {
            // SAFETY: still-live entries are boxed slices we allocated.
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr as *mut u8, len)));
            }
        }
    }
}
