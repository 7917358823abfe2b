//! Error types for guest instances and host trampolines.

use thiserror::Error;

use crate::abi::CanonicalAbiError;

/// Errors that can occur while setting up or calling into a guest module.
#[derive(Error, Debug)]
pub enum WasmError {
    /// Wasmtime engine, linker or execution error.
    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),

    /// Required function not found in the module exports.
    #[error("Function not found in module: {0}")]
    FunctionNotFound(String),

    /// The guest does not export its linear memory under the configured name.
    #[error("Memory export '{0}' not found")]
    MemoryNotFound(String),

    /// None of the supported allocation protocols is exported.
    #[error("Guest exports no allocator (expected {0})")]
    AllocatorNotFound(String),

    /// An allocator export has the right name but the wrong core signature.
    #[error("Allocator export '{name}' has the wrong signature: {reason}")]
    AllocatorSignature { name: String, reason: String },

    /// Core function signature does not match the planned call.
    #[error("Invalid function signature for '{name}': expected {expected}, got {actual}")]
    InvalidSignature {
        name: String,
        expected: String,
        actual: String,
    },

    /// Wrong number of arguments for a call.
    #[error("Function '{name}' takes {expected} arguments, got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A host function reported a failure.
    #[error("Host function failed: {0}")]
    Host(String),

    /// WebAssembly execution trapped (runtime error).
    #[error("Wasm execution trapped: {0}")]
    Trap(String),

    /// Canonical ABI error.
    #[error("Canonical ABI error: {0}")]
    CanonicalAbi(#[from] CanonicalAbiError),
}

impl WasmError {
    /// Returns `true` if the guest trapped or violated the memory boundary.
    pub fn is_trap(&self) -> bool {
        match self {
            Self::Trap(_) => true,
            Self::CanonicalAbi(e) => e.is_boundary_violation(),
            _ => false,
        }
    }
}
