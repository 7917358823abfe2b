//! Canonical ABI marshaling between Rust hosts and core WebAssembly guests.
//!
//! Structured WIT values (records, variants, lists, strings, flags and
//! resource handles) cross a core module boundary as scalars plus bytes in
//! the guest's linear memory. This crate computes the layouts for that
//! encoding and moves values across it in both directions.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wit_bridge::prelude::*;
//! use wasmtime::{Engine, Linker, Module, Store};
//!
//! let abi = Arc::new(CanonicalAbi::new());
//! let exporter = Exporter::new(Arc::clone(&abi));
//!
//! let mut linker = Linker::<GuestContext>::new(&engine);
//! exporter.export(&mut linker, "greet", |name: String| format!("hello {name}"))?;
//!
//! let mut store = Store::new(&engine, GuestContext::new());
//! let instance = linker.instantiate(&mut store, &module)?;
//! let guest = GuestInstance::new(&mut store, instance, abi, exporter.config())?;
//! let sum: u32 = guest.call_typed(&mut store, "add", (1u32, 2u32))?;
//! ```
//!
//! # Modules
//!
//! - [`abi`] - Layouts, lift/lower, flatten/unflatten and call plans (always available)
//! - [`resource`] - Handle tables for host-owned resources (always available)
//! - [`config`] - Host configuration, TOML loading with the `config` feature
//! - [`wasm`] - Export trampolines and guest calls through wasmtime (requires `wasm` feature)
//!
//! # Feature Flags
//!
//! - `wasm` - Enable the wasmtime integration (enabled by default)
//! - `config` - Enable loading [`HostConfig`] from TOML (enabled by default)
//! - `logging` - Enable library-level tracing (consumers provide their own subscriber)
//! - `cli` - Enable the `wit-bridge` inspection binary
//! - `full` - Enable all features

pub mod abi;
pub mod config;
mod logging;
pub mod prelude;
pub mod resource;
#[cfg(feature = "wasm")]
pub mod wasm;

mod error;

// Re-export the unified error type
pub use error::{Error, Result};

// Re-export ABI types
pub use abi::{
    CanonicalAbi, CanonicalAbiError, GuestMemory, LinearMemory, ReturnStrategy, Signature,
    TypeLayout, TypeShape, Value, WitType,
};

pub use config::{AllocatorProtocol, HostConfig};
pub use resource::{Resource, ResourceError, ResourceManager};

// Re-export WASM types at crate root for convenience
#[cfg(feature = "wasm")]
pub use wasm::{Exporter, GuestContext, GuestInstance, WasmError};

// Re-export commonly used types from dependencies for convenience
pub use wasm_wave::value::{Type as WaveType, Value as WaveValue, resolve_wit_type};
pub use wit_parser::{Resolve, Type, TypeId};

/// Find a type by name in a WIT Resolve.
/// Returns the TypeId if found, None otherwise.
pub fn find_type_by_name(resolve: &Resolve, name: &str) -> Option<TypeId> {
    resolve
        .types
        .iter()
        .find(|(_, ty)| ty.name.as_deref() == Some(name))
        .map(|(id, _)| id)
}

/// Find the first named type in a WIT Resolve.
/// Returns the TypeId if found, None if no named types exist.
pub fn find_first_named_type(resolve: &Resolve) -> Option<TypeId> {
    resolve
        .types
        .iter()
        .find(|(_, ty)| ty.name.is_some())
        .map(|(id, _)| id)
}

/// A named WIT type resolved into everything the codec needs.
#[derive(Debug, Clone)]
pub struct LoadedType {
    pub resolve: Resolve,
    pub id: TypeId,
    pub wave: WaveType,
    pub shape: TypeShape,
}

/// Load a WIT type definition from a string.
///
/// If `type_name` is None, uses the first named type in the definition.
///
/// # Example
///
/// ```ignore
/// use wit_bridge::load_wit_type_from_string;
///
/// let wit_def = r#"
///     package test:types;
///     interface types {
///         record point { x: u32, y: u32 }
///     }
/// "#;
///
/// let point = load_wit_type_from_string(wit_def, Some("point"))?;
/// assert_eq!(point.shape.to_string(), "record { x: u32, y: u32 }");
/// ```
pub fn load_wit_type_from_string(wit_definition: &str, type_name: Option<&str>) -> Result<LoadedType> {
    let mut resolve = Resolve::new();
    resolve.push_str("input.wit", wit_definition)?;
    resolve_loaded(resolve, type_name)
}

/// Load a WIT type definition from a file or directory.
pub fn load_wit_type(path: impl AsRef<std::path::Path>, type_name: Option<&str>) -> Result<LoadedType> {
    let mut resolve = Resolve::new();
    resolve.push_path(path.as_ref())?;
    resolve_loaded(resolve, type_name)
}

fn resolve_loaded(resolve: Resolve, type_name: Option<&str>) -> Result<LoadedType> {
    let id = match type_name {
        Some(name) => find_type_by_name(&resolve, name)
            .ok_or_else(|| Error::WaveParse(format!("Type '{}' not found", name))),
        None => find_first_named_type(&resolve)
            .ok_or_else(|| Error::WaveParse("No named type found in WIT definition".to_string())),
    }?;

    let wave = resolve_wit_type(&resolve, id).map_err(|e| Error::WaveParse(e.to_string()))?;
    let shape = TypeShape::from_wit_id(&resolve, id)?;

    Ok(LoadedType {
        resolve,
        id,
        wave,
        shape,
    })
}
