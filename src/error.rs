//! Unified error type for the wit-bridge library.
//!
//! Each layer has its own error enum. [`Error`] wraps all of them so that
//! application code can use one type and `?` throughout.

use thiserror::Error;

use crate::abi::CanonicalAbiError;
#[cfg(feature = "config")]
use crate::config::ConfigError;
use crate::resource::ResourceError;
#[cfg(feature = "wasm")]
use crate::wasm::WasmError;

/// Unified error type for all wit-bridge operations.
///
/// # Example
///
/// ```ignore
/// use wit_bridge::{CanonicalAbi, Result, load_wit_type_from_string};
///
/// fn layout_of_point() -> Result<u32> {
///     let (resolve, id, _) = load_wit_type_from_string(WIT, Some("point"))?;
///     let shape = TypeShape::from_wit_id(&resolve, id)?;
///     Ok(CanonicalAbi::new().layout(&shape)?.size)
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Error from canonical ABI layout or marshaling.
    #[error(transparent)]
    Abi(#[from] CanonicalAbiError),

    /// Error from a resource handle table.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Error from guest setup or execution.
    #[cfg(feature = "wasm")]
    #[error(transparent)]
    Wasm(#[from] WasmError),

    /// Error loading host configuration.
    #[cfg(feature = "config")]
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WIT parsing error.
    #[error("WIT parsing error: {0}")]
    WitParse(#[from] anyhow::Error),

    /// WAVE parsing error.
    #[error("WAVE parsing error: {0}")]
    WaveParse(String),
}

/// A [`Result`] type alias using the unified [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a WAVE parsing error from a string message.
    pub fn wave_parse(msg: impl Into<String>) -> Self {
        Self::WaveParse(msg.into())
    }

    /// Returns `true` if this is an ABI error.
    pub fn is_abi(&self) -> bool {
        matches!(self, Self::Abi(_))
    }

    /// Returns `true` if a guest trapped or an access fell outside its memory.
    pub fn is_boundary_violation(&self) -> bool {
        match self {
            Self::Abi(e) => e.is_boundary_violation(),
            #[cfg(feature = "wasm")]
            Self::Wasm(e) => e.is_trap(),
            _ => false,
        }
    }

    /// Returns `true` if this is a WASM setup or execution error.
    #[cfg(feature = "wasm")]
    pub fn is_wasm(&self) -> bool {
        matches!(self, Self::Wasm(_))
    }

    /// Returns `true` if this is an I/O error.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
