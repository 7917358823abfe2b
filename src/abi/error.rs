//! Error types for canonical ABI operations.

use thiserror::Error;

/// Errors that can occur while building layouts or moving values across the
/// guest boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalAbiError {
    #[error("Out of bounds access: {len} bytes at {ptr} exceeds memory size {memory_size}")]
    OutOfBounds {
        ptr: u32,
        len: u32,
        memory_size: usize,
    },

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Invalid discriminant {discriminant} for variant with {num_cases} cases")]
    InvalidDiscriminant { discriminant: u32, num_cases: usize },

    #[error("Invalid flags value {bits:#x}: only {num_flags} flags declared")]
    InvalidFlags { bits: u32, num_flags: usize },

    #[error("Invalid bool value: {0}")]
    InvalidBool(u8),

    #[error("Invalid char value: {0}")]
    InvalidChar(u32),

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Invalid type shape: {0}")]
    InvalidShape(String),

    #[error("Not enough flat values: needed at least {needed}, got {available}")]
    NotEnoughScalars { needed: usize, available: usize },

    #[error("Size overflow while computing {0}")]
    SizeOverflow(&'static str),

    #[error("Pointer {ptr} is not aligned to {align}")]
    Misaligned { ptr: u32, align: u32 },

    #[error("WAVE conversion failed: {0}")]
    Wave(String),

    #[error("Guest allocation of {size} bytes (align {align}) failed: {reason}")]
    AllocationFailed {
        size: u32,
        align: u32,
        reason: String,
    },
}

impl CanonicalAbiError {
    pub(crate) fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Returns `true` for errors raised while reading or writing guest memory
    /// or decoding a malformed bit pattern.
    ///
    /// These should be surfaced to the guest as a trap rather than retried.
    /// Everything else is a registration or host-side usage error.
    pub fn is_boundary_violation(&self) -> bool {
        matches!(
            self,
            Self::OutOfBounds { .. }
                | Self::InvalidUtf8
                | Self::InvalidDiscriminant { .. }
                | Self::InvalidFlags { .. }
                | Self::InvalidBool(_)
                | Self::InvalidChar(_)
                | Self::NotEnoughScalars { .. }
                | Self::Misaligned { .. }
                | Self::AllocationFailed { .. }
        )
    }
}
