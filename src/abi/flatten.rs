//! Flattening: values to and from the ordered scalar sequence used as core
//! call arguments and results.
//!
//! Flat values are raw 64-bit patterns. A value narrower than its slot
//! occupies the low bits and the rest is zero, so the same sequence can be
//! turned into core values of the slot kinds by truncation.

use super::flat::truncate_bits;
use super::layout::{LayoutKind, Scalar, TypeLayout};
use super::lift::{record_field, scalar_bits, store_list, store_string};
use super::lower::{load_list, load_string, scalar_from_bits};
use super::memory::GuestMemory;
use super::{CanonicalAbiError, Value};

/// Append the flat representation of `value` to `out`.
///
/// Strings and lists are lifted into guest memory first and contribute their
/// `{ptr, len}` pair.
pub fn flatten<M: GuestMemory + ?Sized>(
    mem: &mut M,
    value: &Value,
    layout: &TypeLayout,
    out: &mut Vec<u64>,
) -> Result<(), CanonicalAbiError> {
    match &layout.kind {
        LayoutKind::Scalar(scalar) => {
            out.push(flat_bits(*scalar, value)?);
            Ok(())
        }
        LayoutKind::String => {
            let Value::String(s) = value else {
                return Err(CanonicalAbiError::mismatch("string", value.kind_name()));
            };
            let (data, len) = store_string(mem, s)?;
            out.extend([u64::from(data), u64::from(len)]);
            Ok(())
        }
        LayoutKind::List(element) => {
            let Value::List(items) = value else {
                return Err(CanonicalAbiError::mismatch("list", value.kind_name()));
            };
            let (data, len) = store_list(mem, items, element)?;
            out.extend([u64::from(data), u64::from(len)]);
            Ok(())
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
            items
                .iter()
                .try_for_each(|item| flatten(mem, item, &element.layout, out))
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
                flatten(mem, record_field(values, i, &field.name)?, &field.layout, out)?;
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
            fields
                .iter()
                .zip(values)
                .try_for_each(|(field, v)| flatten(mem, v, &field.layout, out))
        }
        LayoutKind::Variant(variant) => {
            let (discriminant, case, payload) = variant.select(value)?;
            out.push(u64::from(discriminant));
            let start = out.len();
            if let (Some(payload_layout), Some(payload)) = (&case.payload, payload) {
                flatten(mem, payload, payload_layout, out)?;
            }
            // Pad to the common width shared by every case.
            out.resize(start + variant.payload_flat.len(), 0);
            Ok(())
        }
        LayoutKind::Flags(flags) => {
            let Value::Flags(active) = value else {
                return Err(CanonicalAbiError::mismatch("flags", value.kind_name()));
            };
            if flags.width > 0 {
                out.push(u64::from(flags.pack(active.iter().map(String::as_str))?));
            }
            Ok(())
        }
    }
}

/// Flat bits of a scalar. `s8` and `s16` are sign-extended to 32 bits, the
/// way a core `i32` carries them.
fn flat_bits(scalar: Scalar, value: &Value) -> Result<u64, CanonicalAbiError> {
    Ok(match (scalar, value) {
        (Scalar::S8, Value::S8(v)) => u64::from(i32::from(*v) as u32),
        (Scalar::S16, Value::S16(v)) => u64::from(i32::from(*v) as u32),
        _ => scalar_bits(scalar, value)?,
    })
}

/// Forward-only reader over a flat scalar sequence.
#[derive(Debug)]
pub struct FlatCursor<'a> {
    values: &'a [u64],
    pos: usize,
}

impl<'a> FlatCursor<'a> {
    pub fn new(values: &'a [u64]) -> Self {
        Self { values, pos: 0 }
    }

    pub fn next_value(&mut self) -> Result<u64, CanonicalAbiError> {
        let value = self
            .values
            .get(self.pos)
            .copied()
            .ok_or(CanonicalAbiError::NotEnoughScalars {
                needed: self.pos + 1,
                available: self.values.len(),
            })?;
        self.pos += 1;
        Ok(value)
    }

    /// Skip `n` scalars.
    pub fn skip(&mut self, n: usize) -> Result<(), CanonicalAbiError> {
        let end = self.pos + n;
        if end > self.values.len() {
            return Err(CanonicalAbiError::NotEnoughScalars {
                needed: end,
                available: self.values.len(),
            });
        }
        self.pos = end;
        Ok(())
    }

    /// Number of scalars consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.values.len().saturating_sub(self.pos)
    }
}

/// Rebuild a value from the cursor, reading string and list contents
/// directly from `memory`.
pub fn unflatten(
    memory: &[u8],
    cursor: &mut FlatCursor<'_>,
    layout: &TypeLayout,
) -> Result<Value, CanonicalAbiError> {
    match &layout.kind {
        LayoutKind::Scalar(scalar) => {
            let bits = truncate_bits(scalar.flat(), cursor.next_value()?);
            match scalar {
                Scalar::Bool => Ok(Value::Bool(bits != 0)),
                _ => scalar_from_bits(*scalar, bits),
            }
        }
        LayoutKind::String => {
            let (data, len) = pointer_pair(cursor)?;
            load_string(memory, data, len).map(Value::String)
        }
        LayoutKind::List(element) => {
            let (data, len) = pointer_pair(cursor)?;
            load_list(memory, data, len, element).map(Value::List)
        }
        LayoutKind::Array { element, len } => (0..*len)
            .map(|_| unflatten(memory, cursor, &element.layout))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        LayoutKind::Record(fields) => fields
            .iter()
            .map(|field| Ok((field.name.clone(), unflatten(memory, cursor, &field.layout)?)))
            .collect::<Result<Vec<_>, CanonicalAbiError>>()
            .map(Value::Record),
        LayoutKind::Tuple(fields) => fields
            .iter()
            .map(|field| unflatten(memory, cursor, &field.layout))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Tuple),
        LayoutKind::Variant(variant) => {
            let discriminant = cursor.next_value()? as u32;
            let case = variant.case(discriminant)?;
            let start = cursor.position();
            let payload = match &case.payload {
                Some(payload_layout) => Some(unflatten(memory, cursor, payload_layout)?),
                None => None,
            };
            let consumed = cursor.position() - start;
            cursor.skip(variant.payload_flat.len().saturating_sub(consumed))?;
            variant.build(discriminant, payload)
        }
        LayoutKind::Flags(flags) => {
            if flags.width == 0 {
                return Ok(Value::Flags(Vec::new()));
            }
            flags.unpack(cursor.next_value()? as u32).map(Value::Flags)
        }
    }
}

fn pointer_pair(cursor: &mut FlatCursor<'_>) -> Result<(u32, u32), CanonicalAbiError> {
    Ok((cursor.next_value()? as u32, cursor.next_value()? as u32))
}
