//! Lowering: guest memory back into host values.

use super::buffer::{offset, read_slice, read_u32, read_uint};
use super::layout::{ElementLayout, LayoutKind, Scalar, TypeLayout};
use super::{CanonicalAbiError, Value};

/// Read a value of the given layout from `memory` at `ptr`.
pub fn lower(memory: &[u8], ptr: u32, layout: &TypeLayout) -> Result<Value, CanonicalAbiError> {
    match &layout.kind {
        LayoutKind::Scalar(scalar) => {
            let bits = read_uint(memory, ptr, scalar.size())?;
            scalar_from_bits(*scalar, bits)
        }
        LayoutKind::String => {
            let (data, len) = read_pointer_pair(memory, ptr)?;
            load_string(memory, data, len).map(Value::String)
        }
        LayoutKind::List(element) => {
            let (data, len) = read_pointer_pair(memory, ptr)?;
            load_list(memory, data, len, element).map(Value::List)
        }
        LayoutKind::Array { element, len } => {
            load_elements(memory, ptr, *len, element).map(Value::List)
        }
        LayoutKind::Record(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for field in fields {
                let v = lower(memory, offset(ptr, field.offset)?, &field.layout)?;
                values.push((field.name.clone(), v));
            }
            Ok(Value::Record(values))
        }
        LayoutKind::Tuple(fields) => fields
            .iter()
            .map(|field| lower(memory, offset(ptr, field.offset)?, &field.layout))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Tuple),
        LayoutKind::Variant(variant) => {
            let discriminant = read_uint(memory, ptr, variant.discriminant_size)? as u32;
            let case = variant.case(discriminant)?;
            let payload = match &case.payload {
                Some(payload_layout) => Some(lower(
                    memory,
                    offset(ptr, variant.payload_offset)?,
                    payload_layout,
                )?),
                None => None,
            };
            variant.build(discriminant, payload)
        }
        LayoutKind::Flags(flags) => {
            if flags.width == 0 {
                return Ok(Value::Flags(Vec::new()));
            }
            let bits = read_uint(memory, ptr, flags.width)? as u32;
            flags.unpack(bits).map(Value::Flags)
        }
    }
}

fn read_pointer_pair(memory: &[u8], ptr: u32) -> Result<(u32, u32), CanonicalAbiError> {
    Ok((read_u32(memory, ptr)?, read_u32(memory, offset(ptr, 4)?)?))
}

/// Copy `len` UTF-8 bytes at `data` into a host string.
pub(crate) fn load_string(memory: &[u8], data: u32, len: u32) -> Result<String, CanonicalAbiError> {
    let bytes = read_slice(memory, data, len)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| CanonicalAbiError::InvalidUtf8)
}

/// Read `len` list elements starting at `data`.
pub(crate) fn load_list(
    memory: &[u8],
    data: u32,
    len: u32,
    element: &ElementLayout,
) -> Result<Vec<Value>, CanonicalAbiError> {
    // Reject impossible lengths before allocating the result vector.
    read_slice(memory, data, element.byte_len(len)?)?;
    load_elements(memory, data, len, element)
}

fn load_elements(
    memory: &[u8],
    base: u32,
    len: u32,
    element: &ElementLayout,
) -> Result<Vec<Value>, CanonicalAbiError> {
    let mut items = Vec::with_capacity((len as usize).min(memory.len()));
    let mut at = base;
    for _ in 0..len {
        items.push(lower(memory, at, &element.layout)?);
        at = offset(at, element.stride)?;
    }
    Ok(items)
}

/// Decode the stored bits of a scalar. Booleans must be exactly 0 or 1.
pub(crate) fn scalar_from_bits(scalar: Scalar, bits: u64) -> Result<Value, CanonicalAbiError> {
    Ok(match scalar {
        Scalar::Bool => match bits {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(CanonicalAbiError::InvalidBool(other as u8)),
        },
        Scalar::S8 => Value::S8(bits as u8 as i8),
        Scalar::U8 => Value::U8(bits as u8),
        Scalar::S16 => Value::S16(bits as u16 as i16),
        Scalar::U16 => Value::U16(bits as u16),
        Scalar::S32 => Value::S32(bits as u32 as i32),
        Scalar::U32 => Value::U32(bits as u32),
        Scalar::S64 => Value::S64(bits as i64),
        Scalar::U64 => Value::U64(bits),
        Scalar::F32 => Value::F32(f32::from_bits(bits as u32)),
        Scalar::F64 => Value::F64(f64::from_bits(bits)),
        Scalar::Char => {
            let code = bits as u32;
            Value::Char(char::from_u32(code).ok_or(CanonicalAbiError::InvalidChar(code))?)
        }
        Scalar::Handle => Value::Handle(bits as u32),
    })
}
