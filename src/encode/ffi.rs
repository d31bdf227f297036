//! Raw C ABI of the GL/CUDA NVENC encoder module.
//!
//! The module exports five plain C functions. Status-returning calls use `0`
//! for success. Packet buffers handed out through the `unsigned char**` /
//! `int*` out-parameters belong to the module until passed back to
//! `gcne_free_packet`.

use std::ffi::{c_int, c_uchar, c_uint, c_void};

/// Opaque `EncoderState*` owned by the module
pub type EncoderState = c_void;

/// `EncoderState* gcne_create_encoder(int width, int height, int gpu_id)`
pub type CreateEncoderFn = unsafe extern "C" fn(c_int, c_int, c_int) -> *mut EncoderState;

/// `int gcne_register_texture(EncoderState*, unsigned int texture_id)`
pub type RegisterTextureFn = unsafe extern "C" fn(*mut EncoderState, c_uint) -> c_int;

/// `int gcne_encode_frame(EncoderState*, unsigned char** data, int* size)`
pub type EncodeFrameFn =
    unsafe extern "C" fn(*mut EncoderState, *mut *mut c_uchar, *mut c_int) -> c_int;

/// `int gcne_destroy_encoder(EncoderState*, unsigned char** data, int* size)`
pub type DestroyEncoderFn =
    unsafe extern "C" fn(*mut EncoderState, *mut *mut c_uchar, *mut c_int) -> c_int;

/// `void gcne_free_packet(unsigned char*)`
pub type FreePacketFn = unsafe extern "C" fn(*mut c_uchar);

/// Success status
pub const STATUS_OK: c_int = 0;

pub const SYM_CREATE_ENCODER: &str = "gcne_create_encoder";
pub const SYM_REGISTER_TEXTURE: &str = "gcne_register_texture";
pub const SYM_ENCODE_FRAME: &str = "gcne_encode_frame";
pub const SYM_DESTROY_ENCODER: &str = "gcne_destroy_encoder";
pub const SYM_FREE_PACKET: &str = "gcne_free_packet";

/// Every entry point the module must export, in resolution order
pub const REQUIRED_SYMBOLS: [&str; 5] = [
    SYM_CREATE_ENCODER,
    SYM_REGISTER_TEXTURE,
    SYM_ENCODE_FRAME,
    SYM_DESTROY_ENCODER,
    SYM_FREE_PACKET,
];

/// Base name of the module; the platform prefix/suffix is added at load time
pub const DEFAULT_MODULE_NAME: &str = "GlCudaNvEncoder";
