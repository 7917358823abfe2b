//! Lifting: host values into guest memory.

use super::buffer::{offset, write_slice, write_uint};
use super::layout::{ElementLayout, LayoutKind, Scalar, TypeLayout};
use super::memory::GuestMemory;
use super::{CanonicalAbiError, Value};

/// Allocate a slot for `value` and write it there, returning the slot pointer.
pub fn lift<M: GuestMemory + ?Sized>(
    mem: &mut M,
    value: &Value,
    layout: &TypeLayout,
) -> Result<u32, CanonicalAbiError> {
    let ptr = mem.allocate(layout.size, layout.align)?;
    lift_into(mem, value, layout, ptr)?;
    Ok(ptr)
}

/// Write `value` into the caller-owned slot at `ptr`.
///
/// Strings and lists allocate their contents through `mem`; only the
/// `{ptr, len}` header lands in the slot.
pub fn lift_into<M: GuestMemory + ?Sized>(
    mem: &mut M,
    value: &Value,
    layout: &TypeLayout,
    ptr: u32,
) -> Result<(), CanonicalAbiError> {
    match &layout.kind {
        LayoutKind::Scalar(scalar) => {
            let bits = scalar_bits(*scalar, value)?;
            write_uint(mem.data_mut(), ptr, scalar.size(), bits)
        }
        LayoutKind::String => {
            let Value::String(s) = value else {
                return Err(CanonicalAbiError::mismatch("string", value.kind_name()));
            };
            let (data, len) = store_string(mem, s)?;
            write_pointer_pair(mem, ptr, data, len)
        }
        LayoutKind::List(element) => {
            let Value::List(items) = value else {
                return Err(CanonicalAbiError::mismatch("list", value.kind_name()));
            };
            let (data, len) = store_list(mem, items, element)?;
            write_pointer_pair(mem, ptr, data, len)
        }
        LayoutKind::Array { element, len } => {
            let Value::List(items) = value else {
                return Err(CanonicalAbiError::mismatch("array", value.kind_name()));
            };
            if items.len() != *len as usize {
                return Err(CanonicalAbiError::mismatch(
                    format!("{len} elements"),
                    format!("{} elements", items.len()),
                ));
            }
            store_elements(mem, items, element, ptr)
        }
        LayoutKind::Record(fields) => {
            let Value::Record(values) = value else {
                return Err(CanonicalAbiError::mismatch("record", value.kind_name()));
            };
            if values.len() != fields.len() {
                return Err(CanonicalAbiError::mismatch(
                    format!("record with {} fields", fields.len()),
                    format!("{} fields", values.len()),
                ));
            }
            for (i, field) in fields.iter().enumerate() {
                let v = record_field(values, i, &field.name)?;
                lift_into(mem, v, &field.layout, offset(ptr, field.offset)?)?;
            }
            Ok(())
        }
        LayoutKind::Tuple(fields) => {
            let Value::Tuple(values) = value else {
                return Err(CanonicalAbiError::mismatch("tuple", value.kind_name()));
            };
            if values.len() != fields.len() {
                return Err(CanonicalAbiError::mismatch(
                    format!("tuple of {}", fields.len()),
                    format!("tuple of {}", values.len()),
                ));
            }
            for (field, v) in fields.iter().zip(values) {
                lift_into(mem, v, &field.layout, offset(ptr, field.offset)?)?;
            }
            Ok(())
        }
        LayoutKind::Variant(variant) => {
            let (discriminant, case, payload) = variant.select(value)?;
            write_uint(
                mem.data_mut(),
                ptr,
                variant.discriminant_size,
                u64::from(discriminant),
            )?;
            if let (Some(payload_layout), Some(payload)) = (&case.payload, payload) {
                let at = offset(ptr, variant.payload_offset)?;
                lift_into(mem, payload, payload_layout, at)?;
            }
            Ok(())
        }
        LayoutKind::Flags(flags) => {
            let Value::Flags(active) = value else {
                return Err(CanonicalAbiError::mismatch("flags", value.kind_name()));
            };
            if flags.width == 0 {
                return Ok(());
            }
            let bits = flags.pack(active.iter().map(String::as_str))?;
            write_uint(mem.data_mut(), ptr, flags.width, u64::from(bits))
        }
    }
}

/// Find a record field value, preferring the declared position.
pub(crate) fn record_field<'v>(
    values: &'v [(String, Value)],
    index: usize,
    name: &str,
) -> Result<&'v Value, CanonicalAbiError> {
    match values.get(index) {
        Some((n, v)) if n == name => Ok(v),
        _ => values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| CanonicalAbiError::mismatch(format!("field '{name}'"), "missing field")),
    }
}

fn write_pointer_pair<M: GuestMemory + ?Sized>(
    mem: &mut M,
    ptr: u32,
    data: u32,
    len: u32,
) -> Result<(), CanonicalAbiError> {
    let mut header = [0u8; 8];
    let (lo, hi) = header.split_at_mut(4);
    lo.copy_from_slice(&data.to_le_bytes());
    hi.copy_from_slice(&len.to_le_bytes());
    write_slice(mem.data_mut(), ptr, &header)
}

/// Copy string bytes into freshly allocated guest memory.
///
/// Empty strings are `{0, 0}` and never touch the allocator.
pub(crate) fn store_string<M: GuestMemory + ?Sized>(
    mem: &mut M,
    s: &str,
) -> Result<(u32, u32), CanonicalAbiError> {
    if s.is_empty() {
        return Ok((0, 0));
    }
    let len = u32::try_from(s.len()).map_err(|_| CanonicalAbiError::SizeOverflow("string"))?;
    let data = mem.allocate(len, 1)?;
    write_slice(mem.data_mut(), data, s.as_bytes())?;
    Ok((data, len))
}

/// Lift list elements into freshly allocated guest memory.
pub(crate) fn store_list<M: GuestMemory + ?Sized>(
    mem: &mut M,
    items: &[Value],
    element: &ElementLayout,
) -> Result<(u32, u32), CanonicalAbiError> {
    if items.is_empty() {
        return Ok((0, 0));
    }
    let len = u32::try_from(items.len()).map_err(|_| CanonicalAbiError::SizeOverflow("list"))?;
    let data = mem.allocate(element.byte_len(len)?, element.layout.align)?;
    store_elements(mem, items, element, data)?;
    Ok((data, len))
}

fn store_elements<M: GuestMemory + ?Sized>(
    mem: &mut M,
    items: &[Value],
    element: &ElementLayout,
    base: u32,
) -> Result<(), CanonicalAbiError> {
    let mut at = base;
    for item in items {
        lift_into(mem, item, &element.layout, at)?;
        at = offset(at, element.stride)?;
    }
    Ok(())
}

/// Raw little-endian bits of a scalar, as stored in its `size()` bytes.
pub(crate) fn scalar_bits(scalar: Scalar, value: &Value) -> Result<u64, CanonicalAbiError> {
    Ok(match (scalar, value) {
        (Scalar::Bool, Value::Bool(b)) => u64::from(*b),
        (Scalar::S8, Value::S8(v)) => u64::from(*v as u8),
        (Scalar::U8, Value::U8(v)) => u64::from(*v),
        (Scalar::S16, Value::S16(v)) => u64::from(*v as u16),
        (Scalar::U16, Value::U16(v)) => u64::from(*v),
        (Scalar::S32, Value::S32(v)) => u64::from(*v as u32),
        (Scalar::U32, Value::U32(v)) => u64::from(*v),
        (Scalar::S64, Value::S64(v)) => *v as u64,
        (Scalar::U64, Value::U64(v)) => *v,
        (Scalar::F32, Value::F32(v)) => u64::from(v.to_bits()),
        (Scalar::F64, Value::F64(v)) => v.to_bits(),
        (Scalar::Char, Value::Char(c)) => u64::from(u32::from(*c)),
        (Scalar::Handle, Value::Handle(h)) => u64::from(*h),
        (scalar, other) => {
            return Err(CanonicalAbiError::mismatch(
                format!("{scalar:?}").to_lowercase(),
                other.kind_name(),
            ));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{CanonicalAbi, LinearMemory, TypeShape};

    #[test]
    fn string_contents_are_allocated_separately() {
        let abi = CanonicalAbi::new();
        let mut mem = LinearMemory::new();
        let ptr = abi
            .lift(&mut mem, &Value::string("hello"), &TypeShape::String)
            .unwrap();
        assert_eq!(ptr, 0);
        let bytes = mem.as_bytes();
        assert_eq!(bytes.get(0..4), Some(&8u32.to_le_bytes()[..]));
        assert_eq!(bytes.get(4..8), Some(&5u32.to_le_bytes()[..]));
        assert_eq!(bytes.get(8..13), Some(&b"hello"[..]));
    }

    #[test]
    fn empty_list_does_not_allocate() {
        let abi = CanonicalAbi::new();
        let mut mem = LinearMemory::new();
        let shape = TypeShape::list(TypeShape::U64);
        abi.lift(&mut mem, &Value::List(vec![]), &shape).unwrap();
        assert_eq!(mem.len(), 8);
        assert!(mem.iter().all(|b| *b == 0));
    }

    #[test]
    fn variant_touches_only_active_case() {
        let abi = CanonicalAbi::new();
        let shape = TypeShape::variant([("small", Some(TypeShape::U8)), ("big", Some(TypeShape::U64))]);
        let mut mem = LinearMemory::from(vec![0xaa; 16]);
        let layout = abi.layout(&shape).unwrap();
        lift_into(&mut mem, &Value::variant("small", Some(Value::U8(7))), &layout, 0).unwrap();
        assert_eq!(mem.get(0), Some(&0));
        assert_eq!(mem.get(8), Some(&7));
        assert_eq!(mem.get(9), Some(&0xaa));
        assert_eq!(mem.get(1), Some(&0xaa));
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let abi = CanonicalAbi::new();
        let mut mem = LinearMemory::new();
        let err = abi
            .lift(&mut mem, &Value::U8(1), &TypeShape::U32)
            .unwrap_err();
        assert!(matches!(err, CanonicalAbiError::TypeMismatch { .. }));
        assert!(!err.is_boundary_violation());

        let shape = TypeShape::record([("a", TypeShape::U8)]);
        let value = Value::record([("b", Value::U8(1))]);
        assert!(abi.lift(&mut mem, &value, &shape).is_err());
    }

    #[test]
    fn writes_past_memory_end_fail() {
        let abi = CanonicalAbi::new();
        let layout = abi.layout(&TypeShape::U64).unwrap();
        let mut mem = LinearMemory::from(vec![0; 4]);
        let err = lift_into(&mut mem, &Value::U64(1), &layout, 0).unwrap_err();
        assert!(err.is_boundary_violation());
    }
}
