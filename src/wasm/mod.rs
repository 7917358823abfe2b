//! Core WebAssembly integration through wasmtime.
//!
//! Guests here are plain core modules: they exchange structured values with
//! the host only through scalars and linear memory, so every boundary
//! crossing goes through the canonical ABI codec in [`crate::abi`].
//!
//! - [`Exporter`] registers Rust functions as guest imports.
//! - [`GuestInstance`] calls guest exports with [`Value`](crate::abi::Value)s.
//! - [`GuestAllocator`] finds and drives the guest's allocator.

mod alloc;
mod error;
mod export;
mod func;
mod host;

pub use alloc::GuestAllocator;
pub use error::WasmError;
pub use export::{AbiState, Exporter, GuestContext, HostFunction, StatefulHostFunction};
pub use func::{WasmGuest, val_bits, val_from_bits};
pub use host::GuestInstance;
