//! Core-level plumbing shared by trampolines and the call driver.

use wasmtime::{AsContextMut, Memory, Val, ValType};

use super::alloc::GuestAllocator;
use crate::abi::{CanonicalAbiError, FlatType, GuestMemory};

/// Raw 64-bit pattern of a core value.
pub fn val_bits(val: &Val) -> Result<u64, CanonicalAbiError> {
    Ok(match val {
        Val::I32(v) => u64::from(*v as u32),
        Val::I64(v) => *v as u64,
        Val::F32(bits) => u64::from(*bits),
        Val::F64(bits) => *bits,
        _ => {
            return Err(CanonicalAbiError::UnsupportedType(
                "non-numeric core value".to_string(),
            ));
        }
    })
}

/// Build a core value of type `ty` from the low bits of `bits`.
pub fn val_from_bits(ty: &ValType, bits: u64) -> Result<Val, CanonicalAbiError> {
    Ok(match ty {
        ValType::I32 => Val::I32(bits as u32 as i32),
        ValType::I64 => Val::I64(bits as i64),
        ValType::F32 => Val::F32(bits as u32),
        ValType::F64 => Val::F64(bits),
        other => {
            return Err(CanonicalAbiError::UnsupportedType(format!(
                "core type {other}"
            )));
        }
    })
}

pub fn val_type(flat: FlatType) -> ValType {
    match flat {
        FlatType::I32 => ValType::I32,
        FlatType::I64 => ValType::I64,
        FlatType::F32 => ValType::F32,
        FlatType::F64 => ValType::F64,
    }
}

/// Whether `actual` carries values of flat kind `expected`.
pub fn is_flat(actual: &ValType, expected: FlatType) -> bool {
    matches!(
        (actual, expected),
        (ValType::I32, FlatType::I32)
            | (ValType::I64, FlatType::I64)
            | (ValType::F32, FlatType::F32)
            | (ValType::F64, FlatType::F64)
    )
}

/// Guest linear memory reached through a wasmtime store, allocating through
/// the guest's own allocator.
pub struct WasmGuest<S> {
    store: S,
    memory: Memory,
    allocator: GuestAllocator,
}

impl<S: AsContextMut> WasmGuest<S> {
    pub fn new(store: S, memory: Memory, allocator: GuestAllocator) -> Self {
        Self {
            store,
            memory,
            allocator,
        }
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

impl<S: AsContextMut> GuestMemory for WasmGuest<S> {
    fn data(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn allocate(&mut self, size: u32, align: u32) -> Result<u32, CanonicalAbiError> {
        self.allocator
            .allocate(&mut self.store, size, align)
            .map_err(|e| match e {
                super::WasmError::CanonicalAbi(abi) => abi,
                other => CanonicalAbiError::AllocationFailed {
                    size,
                    align,
                    reason: other.to_string(),
                },
            })
    }
}
