//! Encoder module loader
//!
//! Binds the five entry points of the encoder module into a
//! [`CapabilityTable`]. Binding is all-or-nothing: a table only exists when
//! every symbol resolved, so no session can be created against a partially
//! loaded module.

use super::ffi::{self, REQUIRED_SYMBOLS};
use super::{EncoderModule, RawPacket, SessionHandle, Status};
use crate::error::LoadError;
use crate::types::TextureId;

use libloading::Library;
use std::ffi::{c_int, OsStr};
use std::path::Path;

/// Resolved entry points of a loaded encoder module
pub struct CapabilityTable {
    create_encoder: ffi::CreateEncoderFn,
    register_texture: ffi::RegisterTextureFn,
    encode_frame: ffi::EncodeFrameFn,
    destroy_encoder: ffi::DestroyEncoderFn,
    free_packet: ffi::FreePacketFn,
    module: String,
    // Keeps the function pointers above valid
    _library: Library,
}

impl CapabilityTable {
    /// Load the module under its platform default name
    /// (`GlCudaNvEncoder.dll`, `libGlCudaNvEncoder.so`, ...)
    pub fn load_default() -> Result<Self, LoadError> {
        Self::load(libloading::library_filename(ffi::DEFAULT_MODULE_NAME))
    }

    /// Load a module by name or path and bind all five entry points
    pub fn load(module: impl AsRef<OsStr>) -> Result<Self, LoadError> {
        let library = open(module.as_ref())?;
        let name = module_name(module.as_ref());

        // Attempt every symbol so the error names all of the missing ones
        let mut missing = Vec::new();
        let create_encoder =
            resolve::<ffi::CreateEncoderFn>(&library, ffi::SYM_CREATE_ENCODER, &mut missing);
        let register_texture =
            resolve::<ffi::RegisterTextureFn>(&library, ffi::SYM_REGISTER_TEXTURE, &mut missing);
        let encode_frame =
            resolve::<ffi::EncodeFrameFn>(&library, ffi::SYM_ENCODE_FRAME, &mut missing);
        let destroy_encoder =
            resolve::<ffi::DestroyEncoderFn>(&library, ffi::SYM_DESTROY_ENCODER, &mut missing);
        let free_packet =
            resolve::<ffi::FreePacketFn>(&library, ffi::SYM_FREE_PACKET, &mut missing);

        match (create_encoder, register_texture, encode_frame, destroy_encoder, free_packet) {
            (
                Some(create_encoder),
                Some(register_texture),
                Some(encode_frame),
                Some(destroy_encoder),
                Some(free_packet),
            ) => {
                tracing::info!("Encoder module loaded: {}", name);
                Ok(Self {
                    create_encoder,
                    register_texture,
                    encode_frame,
                    destroy_encoder,
                    free_packet,
                    module: name,
                    _library: library,
                })
            }
            _ => {
                drop(library);
                Err(LoadError::SymbolMissing {
                    module: name,
                    missing,
                })
            }
        }
    }

    /// Report which entry points a module exports without binding it
    pub fn probe(module: impl AsRef<OsStr>) -> Result<ModuleProbe, LoadError> {
        let library = open(module.as_ref())?;

        let symbols = REQUIRED_SYMBOLS
            .iter()
            .map(|&symbol| {
                // SAFETY: the symbol is only looked up, never called.
                let found =
                    unsafe { library.get::<unsafe extern "C" fn()>(symbol.as_bytes()) }.is_ok();
                (symbol, found)
            })
            .collect();

        Ok(ModuleProbe {
            module: module_name(module.as_ref()),
            symbols,
        })
    }

    /// Name or path the module was loaded from
    pub fn module(&self) -> &str {
        &self.module
    }
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

fn open(module: &OsStr) -> Result<Library, LoadError> {
    tracing::debug!("Opening encoder module {}", module_name(module));

    // SAFETY: loading runs the module's initialisers; the module is a plain
    // C library with no load-time requirements beyond a GPU driver.
    unsafe { Library::new(module) }.map_err(|source| LoadError::ModuleNotFound {
        module: module_name(module),
        source,
    })
}

fn resolve<T: Copy>(library: &Library, symbol: &str, missing: &mut Vec<String>) -> Option<T> {
    // SAFETY: `T` is the ffi function pointer type matching the exported C
    // signature of `symbol`.
    match unsafe { library.get::<T>(symbol.as_bytes()) } {
        Ok(resolved) => Some(*resolved),
        Err(e) => {
            tracing::error!("Failed to resolve {}: {}", symbol, e);
            missing.push(symbol.to_string());
            None
        }
    }
}

fn module_name(module: &OsStr) -> String {
    Path::new(module).display().to_string()
}

// SAFETY: the packet contract is the module's documented one: packets from
// encode/destroy stay valid until handed to `gcne_free_packet`.
unsafe impl EncoderModule for CapabilityTable {
    fn create_encoder(&self, width: u32, height: u32, device_index: u32) -> Option<SessionHandle> {
        let (Ok(w), Ok(h), Ok(gpu)) = (
            c_int::try_from(width),
            c_int::try_from(height),
            c_int::try_from(device_index),
        ) else {
            tracing::error!(
                "Encoder parameters out of range: {}x{} on device {}",
                width,
                height,
                device_index
            );
            return None;
        };

        // SAFETY: plain constructor call; a null return is handled by the caller.
        let state = unsafe { (self.create_encoder)(w, h, gpu) };
        SessionHandle::from_raw(state)
    }

    unsafe fn register_texture(&self, session: SessionHandle, texture: TextureId) -> Status {
        (self.register_texture)(session.as_ptr(), texture.0)
    }

    unsafe fn encode_frame(&self, session: SessionHandle) -> (Status, RawPacket) {
        let mut data = std::ptr::null_mut();
        let mut size: c_int = 0;
        let status = (self.encode_frame)(session.as_ptr(), &mut data, &mut size);
        (status, RawPacket::new(data, size))
    }

    unsafe fn destroy_encoder(&self, session: SessionHandle) -> (Status, RawPacket) {
        let mut data = std::ptr::null_mut();
        let mut size: c_int = 0;
        let status = (self.destroy_encoder)(session.as_ptr(), &mut data, &mut size);
        (status, RawPacket::new(data, size))
    }

    unsafe fn free_packet(&self, packet: RawPacket) {
        (self.free_packet)(packet.as_ptr())
    }
}

/// Per-symbol resolution report for a module
#[derive(Debug, Clone)]
pub struct ModuleProbe {
    /// Module name or path
    pub module: String,
    /// Each required symbol and whether it resolved
    pub symbols: Vec<(&'static str, bool)>,
}

impl ModuleProbe {
    /// All five entry points are present
    pub fn is_complete(&self) -> bool {
        self.symbols.iter().all(|(_, found)| *found)
    }

    /// Symbols that did not resolve
    pub fn missing(&self) -> Vec<&'static str> {
        self.symbols
            .iter()
            .filter(|(_, found)| !*found)
            .map(|(symbol, _)| *symbol)
            .collect()
    }
}
