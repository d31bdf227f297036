//! Error types for vizenc

use crate::types::TextureId;
use thiserror::Error;

/// Result type alias for vizenc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while binding the encoder module.
///
/// Nothing on the GPU or in the encoder has been touched when one of these
/// is returned.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Encoder module not found: {module}: {source}")]
    ModuleNotFound {
        module: String,
        #[source]
        source: libloading::Error,
    },

    #[error("Encoder module {module} is missing symbols: {}", .missing.join(", "))]
    SymbolMissing {
        module: String,
        missing: Vec<String>,
    },
}

impl LoadError {
    /// Symbol names that failed to resolve (empty when the module itself is missing)
    pub fn missing_symbols(&self) -> &[String] {
        match self {
            LoadError::ModuleNotFound { .. } => &[],
            LoadError::SymbolMissing { missing, .. } => missing,
        }
    }
}

/// vizenc error type
#[derive(Error, Debug)]
pub enum Error {
    // Pre-flight errors
    #[error(transparent)]
    ModuleLoad(#[from] LoadError),

    #[error("Encoder session creation failed ({width}x{height}, device {device_index})")]
    SessionCreate {
        width: u32,
        height: u32,
        device_index: u32,
    },

    #[error("Failed to register render target {texture} (status {status})")]
    TargetBind { texture: TextureId, status: i32 },

    #[error("Failed to open packet sink: {0}")]
    SinkOpen(String),

    // Per-frame errors
    #[error("Encoding frame {frame} failed (status {status})")]
    EncodeFrame { frame: u64, status: i32 },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid encoder session state: {0}")]
    SessionState(String),

    // Output errors
    #[error("Packet sink error: {0}")]
    Sink(String),

    #[error("Muxer error: {0}")]
    Muxer(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is recoverable at pipeline level
    ///
    /// Recoverable errors stop the frame loop but still run drain/finalize.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::EncodeFrame { .. } | Error::Render(_))
    }

    /// Check if this error aborts the run before any frame is processed
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::ModuleLoad(_)
                | Error::SessionCreate { .. }
                | Error::TargetBind { .. }
                | Error::SinkOpen(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_missing_lists_every_name() {
        let err = LoadError::SymbolMissing {
            module: "libGlCudaNvEncoder.so".into(),
            missing: vec!["gcne_encode_frame".into(), "gcne_free_packet".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("libGlCudaNvEncoder.so"));
        assert!(msg.contains("gcne_encode_frame, gcne_free_packet"));
        assert_eq!(err.missing_symbols().len(), 2);
    }

    #[test]
    fn test_target_bind_carries_status() {
        let err = Error::TargetBind {
            texture: TextureId(7),
            status: -3,
        };
        let msg = err.to_string();
        assert!(msg.contains("7"));
        assert!(msg.contains("-3"));
        assert!(err.is_preflight());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_encode_frame_is_recoverable() {
        let err = Error::EncodeFrame { frame: 12, status: 1 };
        assert!(err.is_recoverable());
        assert!(!err.is_preflight());
        assert_eq!(err.to_string(), "Encoding frame 12 failed (status 1)");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = Error::from(io);
        assert!(err.to_string().contains("pipe closed"));
    }
}
