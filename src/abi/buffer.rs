//! Little-endian read/write helpers over guest memory slices.
//!
//! All offsets are 32-bit guest pointers. Every access is bounds checked and
//! reports [`CanonicalAbiError::OutOfBounds`] instead of panicking.

use super::CanonicalAbiError;

/// Align a value up to the nearest multiple of alignment.
#[inline]
pub fn align_to(val: u32, align: u32) -> u32 {
    let mask = align.max(1) - 1;
    (val.saturating_add(mask)) & !mask
}

/// Checked variant of [`align_to`] for sizes computed from guest input.
#[inline]
pub fn checked_align_to(val: u32, align: u32) -> Option<u32> {
    let mask = align.max(1) - 1;
    val.checked_add(mask).map(|v| v & !mask)
}

/// Checked `base + offset` for guest pointers.
#[inline]
pub fn offset(base: u32, offset: u32) -> Result<u32, CanonicalAbiError> {
    base.checked_add(offset)
        .ok_or(CanonicalAbiError::SizeOverflow("pointer offset"))
}

fn out_of_bounds(ptr: u32, len: u32, memory: &[u8]) -> CanonicalAbiError {
    CanonicalAbiError::OutOfBounds {
        ptr,
        len,
        memory_size: memory.len(),
    }
}

/// Borrow `len` bytes starting at `ptr`.
#[inline]
pub fn read_slice(memory: &[u8], ptr: u32, len: u32) -> Result<&[u8], CanonicalAbiError> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| out_of_bounds(ptr, len, memory))?;
    memory
        .get(start..end)
        .ok_or_else(|| out_of_bounds(ptr, len, memory))
}

/// Copy `data` into memory starting at `ptr`.
#[inline]
pub fn write_slice(memory: &mut [u8], ptr: u32, data: &[u8]) -> Result<(), CanonicalAbiError> {
    let len = u32::try_from(data.len()).map_err(|_| CanonicalAbiError::SizeOverflow("write"))?;
    let start = ptr as usize;
    let end = start
        .checked_add(data.len())
        .ok_or_else(|| out_of_bounds(ptr, len, memory))?;
    let memory_size = memory.len();
    memory
        .get_mut(start..end)
        .ok_or(CanonicalAbiError::OutOfBounds {
            ptr,
            len,
            memory_size,
        })?
        .copy_from_slice(data);
    Ok(())
}

#[inline]
fn read_array<const N: usize>(memory: &[u8], ptr: u32) -> Result<[u8; N], CanonicalAbiError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_slice(memory, ptr, N as u32)?);
    Ok(out)
}

#[inline]
pub fn read_u8(memory: &[u8], ptr: u32) -> Result<u8, CanonicalAbiError> {
    read_array::<1>(memory, ptr).map(|[b]| b)
}

#[inline]
pub fn read_u16(memory: &[u8], ptr: u32) -> Result<u16, CanonicalAbiError> {
    read_array(memory, ptr).map(u16::from_le_bytes)
}

#[inline]
pub fn read_u32(memory: &[u8], ptr: u32) -> Result<u32, CanonicalAbiError> {
    read_array(memory, ptr).map(u32::from_le_bytes)
}

#[inline]
pub fn read_u64(memory: &[u8], ptr: u32) -> Result<u64, CanonicalAbiError> {
    read_array(memory, ptr).map(u64::from_le_bytes)
}

/// Read an unsigned integer of `width` bytes (1, 2, 4 or 8), zero-extended.
pub fn read_uint(memory: &[u8], ptr: u32, width: u32) -> Result<u64, CanonicalAbiError> {
    match width {
        1 => read_u8(memory, ptr).map(u64::from),
        2 => read_u16(memory, ptr).map(u64::from),
        4 => read_u32(memory, ptr).map(u64::from),
        8 => read_u64(memory, ptr),
        other => Err(CanonicalAbiError::InvalidShape(format!(
            "integer width {other}"
        ))),
    }
}

/// Write the low `width` bytes (1, 2, 4 or 8) of `value`.
pub fn write_uint(
    memory: &mut [u8],
    ptr: u32,
    width: u32,
    value: u64,
) -> Result<(), CanonicalAbiError> {
    let bytes = value.to_le_bytes();
    let slice = bytes
        .get(..width as usize)
        .filter(|_| matches!(width, 1 | 2 | 4 | 8))
        .ok_or_else(|| CanonicalAbiError::InvalidShape(format!("integer width {width}")))?;
    write_slice(memory, ptr, slice)
}
