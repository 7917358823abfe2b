//! Convenient re-exports for common usage patterns.
//!
//! # Example
//!
//! ```ignore
//! use wit_bridge::prelude::*;
//!
//! let abi = CanonicalAbi::new();
//! let mut memory = LinearMemory::new();
//! let ptr = abi.lift_typed(&mut memory, ("hi".to_string(), 7u32))?;
//! let back: (String, u32) = abi.lower_typed(memory.as_bytes(), ptr)?;
//! ```

// Unified error handling
pub use crate::error::{Error, Result};

// ABI types
pub use crate::abi::{
    CanonicalAbi, CanonicalAbiError, GuestMemory, LinearMemory, ReturnStrategy, Signature,
    TypeShape, Value, WitType,
};

pub use crate::config::{AllocatorProtocol, HostConfig};
pub use crate::resource::{Resource, ResourceManager};

// WASM integration types (requires "wasm" feature)
#[cfg(feature = "wasm")]
pub use crate::wasm::{AbiState, Exporter, GuestContext, GuestInstance, WasmError};

// Dependency re-exports
pub use crate::{find_first_named_type, find_type_by_name, load_wit_type_from_string};
pub use crate::{Resolve, TypeId, WaveType};
pub use crate::{wit_enum, wit_flags, wit_record};
