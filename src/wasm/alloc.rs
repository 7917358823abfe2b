//! Guest allocator detection.
//!
//! Guests expose one of three allocation protocols. [`GuestAllocator`] finds
//! whichever one is exported and presents a uniform allocate/free pair.

use std::fmt;

use wasmtime::{AsContext, AsContextMut, Caller, Extern, Func, Instance, TypedFunc};

use super::WasmError;
use crate::config::AllocatorProtocol;
use crate::logging::{debug, warn};

const CABI_REALLOC: &str = "cabi_realloc";
const CANONICAL_ABI_REALLOC: &str = "canonical_abi_realloc";
const CANONICAL_ABI_FREE: &str = "canonical_abi_free";
const MALLOC: &str = "malloc";
const FREE: &str = "free";

type Realloc = TypedFunc<(i32, i32, i32, i32), i32>;

/// An allocation protocol exported by a guest instance.
#[derive(Clone)]
pub enum GuestAllocator {
    /// `cabi_realloc(old_ptr, old_size, align, new_size)`. Allocation passes
    /// a zero old pointer and size; freeing passes a zero new size.
    CabiRealloc(Realloc),
    /// `canonical_abi_realloc` with the same parameters, plus an optional
    /// `canonical_abi_free(ptr, size, align)`.
    CanonicalAbiRealloc {
        realloc: Realloc,
        free: Option<TypedFunc<(i32, i32, i32), ()>>,
    },
    /// `malloc(size)` / `free(ptr)`. Alignment is checked after the fact.
    Malloc {
        malloc: TypedFunc<i32, i32>,
        free: TypedFunc<i32, ()>,
    },
}

impl fmt::Debug for GuestAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GuestAllocator").field(&self.protocol()).finish()
    }
}

/// Allocation-related exports found on an instance, before signature checks.
#[derive(Default)]
struct Exports {
    cabi_realloc: Option<Func>,
    canonical_abi_realloc: Option<Func>,
    canonical_abi_free: Option<Func>,
    malloc: Option<Func>,
    free: Option<Func>,
}

impl Exports {
    fn collect(mut lookup: impl FnMut(&str) -> Option<Func>) -> Self {
        Self {
            cabi_realloc: lookup(CABI_REALLOC),
            canonical_abi_realloc: lookup(CANONICAL_ABI_REALLOC),
            canonical_abi_free: lookup(CANONICAL_ABI_FREE),
            malloc: lookup(MALLOC),
            free: lookup(FREE),
        }
    }
}

fn typed<P, R>(store: impl AsContext, func: Func, name: &str) -> Result<TypedFunc<P, R>, WasmError>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    func.typed::<P, R>(store)
        .map_err(|e| WasmError::AllocatorSignature {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn required(func: Option<Func>, name: &str) -> Result<Func, WasmError> {
    func.ok_or_else(|| WasmError::AllocatorNotFound(name.to_string()))
}

impl GuestAllocator {
    /// Detect the allocator of an instantiated module.
    pub fn from_instance(
        mut store: impl AsContextMut,
        instance: &Instance,
        protocol: AllocatorProtocol,
    ) -> Result<Self, WasmError> {
        let exports = Exports::collect(|name| instance.get_func(&mut store, name));
        Self::select(&store, exports, protocol)
    }

    /// Detect the allocator of the instance currently calling into the host.
    pub fn from_caller<T: 'static>(
        caller: &mut Caller<'_, T>,
        protocol: AllocatorProtocol,
    ) -> Result<Self, WasmError> {
        let exports =
            Exports::collect(|name| caller.get_export(name).and_then(Extern::into_func));
        Self::select(&*caller, exports, protocol)
    }

    fn select(
        store: impl AsContext,
        exports: Exports,
        protocol: AllocatorProtocol,
    ) -> Result<Self, WasmError> {
        let store = store.as_context();
        let allocator = match protocol {
            AllocatorProtocol::CabiRealloc => {
                Self::cabi_realloc(&store, required(exports.cabi_realloc, CABI_REALLOC)?)?
            }
            AllocatorProtocol::CanonicalAbiRealloc => Self::canonical_abi_realloc(
                &store,
                required(exports.canonical_abi_realloc, CANONICAL_ABI_REALLOC)?,
                exports.canonical_abi_free,
            )?,
            AllocatorProtocol::Malloc => Self::malloc(
                &store,
                required(exports.malloc, MALLOC)?,
                required(exports.free, FREE)?,
            )?,
            AllocatorProtocol::Auto => {
                if let Some(realloc) = exports.cabi_realloc {
                    Self::cabi_realloc(&store, realloc)?
                } else if let Some(realloc) = exports.canonical_abi_realloc {
                    Self::canonical_abi_realloc(&store, realloc, exports.canonical_abi_free)?
                } else if let (Some(malloc), Some(free)) = (exports.malloc, exports.free) {
                    Self::malloc(&store, malloc, free)?
                } else {
                    if exports.malloc.is_some() || exports.free.is_some() {
                        warn!("guest exports only one of {MALLOC}/{FREE}");
                    }
                    return Err(WasmError::AllocatorNotFound(format!(
                        "{CABI_REALLOC}, {CANONICAL_ABI_REALLOC} or {MALLOC}/{FREE}"
                    )));
                }
            }
        };
        debug!(protocol = %allocator.protocol(), "detected guest allocator");
        Ok(allocator)
    }

    fn cabi_realloc(store: impl AsContext, realloc: Func) -> Result<Self, WasmError> {
        Ok(Self::CabiRealloc(typed(store, realloc, CABI_REALLOC)?))
    }

    fn canonical_abi_realloc(
        store: impl AsContext,
        realloc: Func,
        free: Option<Func>,
    ) -> Result<Self, WasmError> {
        let store = store.as_context();
        Ok(Self::CanonicalAbiRealloc {
            realloc: typed(&store, realloc, CANONICAL_ABI_REALLOC)?,
            free: free
                .map(|f| typed(&store, f, CANONICAL_ABI_FREE))
                .transpose()?,
        })
    }

    fn malloc(store: impl AsContext, malloc: Func, free: Func) -> Result<Self, WasmError> {
        let store = store.as_context();
        Ok(Self::Malloc {
            malloc: typed(&store, malloc, MALLOC)?,
            free: typed(&store, free, FREE)?,
        })
    }

    /// The protocol this allocator speaks.
    pub fn protocol(&self) -> AllocatorProtocol {
        match self {
            GuestAllocator::CabiRealloc(_) => AllocatorProtocol::CabiRealloc,
            GuestAllocator::CanonicalAbiRealloc { .. } => AllocatorProtocol::CanonicalAbiRealloc,
            GuestAllocator::Malloc { .. } => AllocatorProtocol::Malloc,
        }
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Zero-sized requests do not reach the guest; they get a dangling but
    /// aligned pointer that must never be read through.
    pub fn allocate(
        &self,
        mut store: impl AsContextMut,
        size: u32,
        align: u32,
    ) -> Result<u32, WasmError> {
        if size == 0 {
            return Ok(align.max(1));
        }
        let ptr = match self {
            GuestAllocator::CabiRealloc(realloc)
            | GuestAllocator::CanonicalAbiRealloc { realloc, .. } => {
                realloc.call(&mut store, (0, 0, align as i32, size as i32))?
            }
            GuestAllocator::Malloc { malloc, .. } => malloc.call(&mut store, size as i32)?,
        };
        let ptr = ptr as u32;
        if ptr == 0 {
            return Err(allocation_failed(size, align, "guest allocator returned null"));
        }
        if align > 1 && ptr % align != 0 {
            return Err(allocation_failed(
                size,
                align,
                format!("pointer {ptr} is not aligned"),
            ));
        }
        Ok(ptr)
    }

    /// Release a block previously returned by [`allocate`](Self::allocate).
    pub fn free(
        &self,
        mut store: impl AsContextMut,
        ptr: u32,
        size: u32,
        align: u32,
    ) -> Result<(), WasmError> {
        if size == 0 {
            return Ok(());
        }
        match self {
            GuestAllocator::CabiRealloc(realloc)
            | GuestAllocator::CanonicalAbiRealloc {
                realloc,
                free: None,
            } => {
                realloc.call(&mut store, (ptr as i32, size as i32, align as i32, 0))?;
            }
            GuestAllocator::CanonicalAbiRealloc {
                free: Some(free), ..
            } => free.call(&mut store, (ptr as i32, size as i32, align as i32))?,
            GuestAllocator::Malloc { free, .. } => free.call(&mut store, ptr as i32)?,
        }
        Ok(())
    }
}

fn allocation_failed(size: u32, align: u32, reason: impl Into<String>) -> WasmError {
    WasmError::CanonicalAbi(crate::abi::CanonicalAbiError::AllocationFailed {
        size,
        align,
        reason: reason.into(),
    })
}
