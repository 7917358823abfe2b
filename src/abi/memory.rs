//! Guest memory access and a simulated linear memory.

use super::buffer::{align_to, checked_align_to};
use super::CanonicalAbiError;

/// Byte-addressable guest memory with an allocator.
///
/// The codec only needs these three operations. [`LinearMemory`] implements
/// it with a bump allocator for tests and offline encoding; the `wasm`
/// feature adds an implementation backed by a live wasmtime instance.
///
/// Allocation may grow the memory, so implementations must not cache slices
/// across calls to [`allocate`](GuestMemory::allocate).
pub trait GuestMemory {
    fn data(&self) -> &[u8];

    fn data_mut(&mut self) -> &mut [u8];

    /// Allocate `size` bytes aligned to `align` and return the guest pointer.
    fn allocate(&mut self, size: u32, align: u32) -> Result<u32, CanonicalAbiError>;
}

impl<M: GuestMemory + ?Sized> GuestMemory for &mut M {
    fn data(&self) -> &[u8] {
        (**self).data()
    }

    fn data_mut(&mut self) -> &mut [u8] {
        (**self).data_mut()
    }

    fn allocate(&mut self, size: u32, align: u32) -> Result<u32, CanonicalAbiError> {
        (**self).allocate(size, align)
    }
}

/// Simulated linear memory.
///
/// A growable byte buffer with a bump allocator, used wherever a value needs
/// to be encoded without a running guest.
///
/// # Example
///
/// ```ignore
/// use wit_bridge::{CanonicalAbi, LinearMemory, TypeShape, Value};
///
/// let abi = CanonicalAbi::new();
/// let mut mem = LinearMemory::new();
/// let ptr = abi.lift(&mut mem, &Value::string("hi"), &TypeShape::String)?;
/// let back = abi.lower(&mem, ptr, &TypeShape::String)?;
/// ```
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct LinearMemory {
    data: Vec<u8>,
}

impl LinearMemory {
    /// Create a new empty linear memory.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a linear memory from existing bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Allocate space at the end of memory and return the pointer (offset).
    /// The allocation is zero-filled and aligned to `align`.
    pub fn alloc(&mut self, size: u32, align: u32) -> Result<u32, CanonicalAbiError> {
        let current = u32::try_from(self.data.len())
            .map_err(|_| CanonicalAbiError::SizeOverflow("linear memory"))?;
        let ptr = checked_align_to(current, align).ok_or(CanonicalAbiError::AllocationFailed {
            size,
            align,
            reason: "address space exhausted".to_string(),
        })?;
        let end = ptr
            .checked_add(size)
            .ok_or(CanonicalAbiError::AllocationFailed {
                size,
                align,
                reason: "address space exhausted".to_string(),
            })?;
        self.data.resize(end as usize, 0);
        Ok(ptr)
    }

    /// Get the raw bytes of the linear memory.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the linear memory and return the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Check if the memory is empty (no allocations made).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the length of the memory in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Offset the next allocation with the given alignment would return.
    pub fn next_offset(&self, align: u32) -> u32 {
        align_to(u32::try_from(self.data.len()).unwrap_or(u32::MAX), align)
    }
}

impl GuestMemory for LinearMemory {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn allocate(&mut self, size: u32, align: u32) -> Result<u32, CanonicalAbiError> {
        self.alloc(size, align)
    }
}

impl From<Vec<u8>> for LinearMemory {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for LinearMemory {
    fn from(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

impl From<LinearMemory> for Vec<u8> {
    fn from(memory: LinearMemory) -> Self {
        memory.data
    }
}

impl AsRef<[u8]> for LinearMemory {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl std::ops::Deref for LinearMemory {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_pads_to_alignment() {
        let mut mem = LinearMemory::new();
        assert_eq!(mem.alloc(3, 1).unwrap(), 0);
        assert_eq!(mem.next_offset(4), 4);
        assert_eq!(mem.alloc(8, 4).unwrap(), 4);
        assert_eq!(mem.len(), 12);
        assert_eq!(mem.alloc(0, 8).unwrap(), 16);
    }

    #[test]
    fn conversions_keep_bytes() {
        let mem = LinearMemory::from(vec![1, 2, 3]);
        assert_eq!(mem.as_bytes(), &[1u8, 2, 3][..]);
        assert_eq!(mem.get(1..), Some(&[2u8, 3][..]));
        let bytes: Vec<u8> = mem.into();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
