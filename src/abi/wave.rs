//! Conversion between [`Value`] and `wasm_wave` values.
//!
//! WAVE is the text format used by the CLI and by tests to write values by
//! hand. Conversion into WAVE is driven by the WAVE type; conversion out of
//! WAVE is driven by the shape, so both directions check that the two agree.

use std::borrow::Cow;

use wasm_wave::value::{Type as WaveType, Value as WaveValue};
use wasm_wave::wasm::{WasmType, WasmTypeKind, WasmValue};

use super::shape::TypeShape;
use super::{CanonicalAbiError, Value};

/// Parse WAVE text into a value of the given shape.
pub fn parse(text: &str, ty: &WaveType, shape: &TypeShape) -> Result<Value, CanonicalAbiError> {
    let wave: WaveValue =
        wasm_wave::from_str(ty, text).map_err(|e| CanonicalAbiError::Wave(e.to_string()))?;
    from_wave(&wave, shape)
}

/// Render a value as WAVE text.
pub fn print(value: &Value, ty: &WaveType) -> Result<String, CanonicalAbiError> {
    let wave = to_wave(value, ty)?;
    wasm_wave::to_string(&wave).map_err(|e| CanonicalAbiError::Wave(e.to_string()))
}

fn expect_kind(wave: &WaveValue, kind: WasmTypeKind, shape: &TypeShape) -> Result<(), CanonicalAbiError> {
    if wave.kind() == kind {
        Ok(())
    } else {
        Err(CanonicalAbiError::mismatch(
            shape.to_string(),
            format!("{:?}", wave.kind()),
        ))
    }
}

fn built(what: &str, e: impl std::fmt::Display) -> CanonicalAbiError {
    CanonicalAbiError::Wave(format!("failed to construct {what}: {e}"))
}

fn payload_mismatch(what: &str) -> CanonicalAbiError {
    CanonicalAbiError::Wave(format!("{what} payload mismatch"))
}

/// Convert a WAVE value to a [`Value`] of the given shape.
pub fn from_wave(wave: &WaveValue, shape: &TypeShape) -> Result<Value, CanonicalAbiError> {
    use WasmTypeKind as K;

    macro_rules! scalar {
        ($kind:ident, $variant:ident, $unwrap:ident) => {{
            expect_kind(wave, K::$kind, shape)?;
            Value::$variant(wave.$unwrap())
        }};
    }

    Ok(match shape {
        TypeShape::Bool => scalar!(Bool, Bool, unwrap_bool),
        TypeShape::S8 => scalar!(S8, S8, unwrap_s8),
        TypeShape::U8 => scalar!(U8, U8, unwrap_u8),
        TypeShape::S16 => scalar!(S16, S16, unwrap_s16),
        TypeShape::U16 => scalar!(U16, U16, unwrap_u16),
        TypeShape::S32 => scalar!(S32, S32, unwrap_s32),
        TypeShape::U32 => scalar!(U32, U32, unwrap_u32),
        TypeShape::S64 => scalar!(S64, S64, unwrap_s64),
        TypeShape::U64 => scalar!(U64, U64, unwrap_u64),
        TypeShape::F32 => scalar!(F32, F32, unwrap_f32),
        TypeShape::F64 => scalar!(F64, F64, unwrap_f64),
        TypeShape::Char => scalar!(Char, Char, unwrap_char),
        TypeShape::String => {
            expect_kind(wave, K::String, shape)?;
            Value::String(wave.unwrap_string().into_owned())
        }
        TypeShape::Handle => {
            return Err(CanonicalAbiError::UnsupportedType(
                "resource handles have no WAVE form".to_string(),
            ));
        }
        TypeShape::List(element) | TypeShape::Array(element, _) => {
            expect_kind(wave, K::List, shape)?;
            let items = wave
                .unwrap_list()
                .map(|item| from_wave(&item, element))
                .collect::<Result<Vec<_>, _>>()?;
            if let TypeShape::Array(_, len) = shape
                && items.len() != *len as usize
            {
                return Err(CanonicalAbiError::mismatch(
                    format!("{len} elements"),
                    format!("{} elements", items.len()),
                ));
            }
            Value::List(items)
        }
        TypeShape::Record(fields) => {
            expect_kind(wave, K::Record, shape)?;
            let wave_fields: Vec<_> = wave.unwrap_record().collect();
            let values = fields
                .iter()
                .map(|field| {
                    let (_, wave_field) = wave_fields
                        .iter()
                        .find(|(name, _)| name.as_ref() == field.name)
                        .ok_or_else(|| {
                            CanonicalAbiError::Wave(format!("field '{}' not found", field.name))
                        })?;
                    Ok((field.name.clone(), from_wave(wave_field, &field.ty)?))
                })
                .collect::<Result<Vec<_>, CanonicalAbiError>>()?;
            Value::Record(values)
        }
        TypeShape::Tuple(types) => {
            expect_kind(wave, K::Tuple, shape)?;
            let elements: Vec<_> = wave.unwrap_tuple().collect();
            if elements.len() != types.len() {
                return Err(CanonicalAbiError::mismatch(
                    format!("tuple of {}", types.len()),
                    format!("tuple of {}", elements.len()),
                ));
            }
            Value::Tuple(
                elements
                    .iter()
                    .zip(types)
                    .map(|(e, ty)| from_wave(e, ty))
                    .collect::<Result<_, _>>()?,
            )
        }
        TypeShape::Variant(cases) => {
            expect_kind(wave, K::Variant, shape)?;
            let (name, payload) = wave.unwrap_variant();
            let case = cases
                .iter()
                .find(|c| c.name == name.as_ref())
                .ok_or_else(|| CanonicalAbiError::Wave(format!("variant case '{name}' not found")))?;
            let payload = match (payload, &case.ty) {
                (Some(p), Some(ty)) => Some(Box::new(from_wave(&p, ty)?)),
                (None, None) => None,
                _ => return Err(payload_mismatch("variant")),
            };
            Value::Variant(name.into_owned(), payload)
        }
        TypeShape::Enum(_) => {
            expect_kind(wave, K::Enum, shape)?;
            Value::Enum(wave.unwrap_enum().into_owned())
        }
        TypeShape::Option(inner) => {
            expect_kind(wave, K::Option, shape)?;
            Value::Option(
                wave.unwrap_option()
                    .map(|v| from_wave(&v, inner).map(Box::new))
                    .transpose()?,
            )
        }
        TypeShape::Result { ok, err } => {
            expect_kind(wave, K::Result, shape)?;
            let side = |payload: Option<Cow<WaveValue>>,
                        ty: &Option<Box<TypeShape>>|
             -> Result<Option<Box<Value>>, CanonicalAbiError> {
                match (payload, ty) {
                    (Some(p), Some(ty)) => Ok(Some(Box::new(from_wave(&p, ty)?))),
                    (None, None) => Ok(None),
                    _ => Err(payload_mismatch("result")),
                }
            };
            Value::Result(match wave.unwrap_result() {
                Ok(payload) => Ok(side(payload, ok)?),
                Err(payload) => Err(side(payload, err)?),
            })
        }
        TypeShape::Flags(_) => {
            expect_kind(wave, K::Flags, shape)?;
            Value::Flags(wave.unwrap_flags().map(Cow::into_owned).collect())
        }
    })
}

/// Convert a [`Value`] to a WAVE value of type `ty`.
pub fn to_wave(value: &Value, ty: &WaveType) -> Result<WaveValue, CanonicalAbiError> {
    let missing = |what: &str| CanonicalAbiError::mismatch(what, format!("{:?}", ty.kind()));

    match value {
        Value::Bool(v) => Ok(WaveValue::make_bool(*v)),
        Value::S8(v) => Ok(WaveValue::make_s8(*v)),
        Value::U8(v) => Ok(WaveValue::make_u8(*v)),
        Value::S16(v) => Ok(WaveValue::make_s16(*v)),
        Value::U16(v) => Ok(WaveValue::make_u16(*v)),
        Value::S32(v) => Ok(WaveValue::make_s32(*v)),
        Value::U32(v) => Ok(WaveValue::make_u32(*v)),
        Value::S64(v) => Ok(WaveValue::make_s64(*v)),
        Value::U64(v) => Ok(WaveValue::make_u64(*v)),
        Value::F32(v) => Ok(WaveValue::make_f32(*v)),
        Value::F64(v) => Ok(WaveValue::make_f64(*v)),
        Value::Char(c) => Ok(WaveValue::make_char(*c)),
        Value::String(s) => Ok(WaveValue::make_string(Cow::Borrowed(s))),
        Value::Handle(_) => Err(CanonicalAbiError::UnsupportedType(
            "resource handles have no WAVE form".to_string(),
        )),
        Value::List(items) => {
            let element = ty.list_element_type().ok_or_else(|| missing("list"))?;
            let items = items
                .iter()
                .map(|item| to_wave(item, &element))
                .collect::<Result<Vec<_>, _>>()?;
            WaveValue::make_list(ty, items).map_err(|e| built("list", e))
        }
        Value::Record(fields) => {
            let field_types: Vec<_> = ty.record_fields().collect();
            let fields = fields
                .iter()
                .map(|(name, v)| {
                    let (_, field_ty) = field_types
                        .iter()
                        .find(|(n, _)| n.as_ref() == name)
                        .ok_or_else(|| missing("record"))?;
                    Ok((name.as_str(), to_wave(v, field_ty)?))
                })
                .collect::<Result<Vec<_>, CanonicalAbiError>>()?;
            WaveValue::make_record(ty, fields).map_err(|e| built("record", e))
        }
        Value::Tuple(items) => {
            let types: Vec<_> = ty.tuple_element_types().collect();
            if types.len() != items.len() {
                return Err(missing("tuple"));
            }
            let items = items
                .iter()
                .zip(&types)
                .map(|(item, t)| to_wave(item, t))
                .collect::<Result<Vec<_>, _>>()?;
            WaveValue::make_tuple(ty, items).map_err(|e| built("tuple", e))
        }
        Value::Variant(name, payload) => {
            let payload = match payload {
                Some(p) => {
                    let case_ty = ty
                        .variant_cases()
                        .find(|(n, _)| n.as_ref() == name)
                        .and_then(|(_, t)| t)
                        .ok_or_else(|| payload_mismatch("variant"))?;
                    Some(to_wave(p, &case_ty)?)
                }
                None => None,
            };
            WaveValue::make_variant(ty, name, payload).map_err(|e| built("variant", e))
        }
        Value::Enum(name) => WaveValue::make_enum(ty, name).map_err(|e| built("enum", e)),
        Value::Option(inner) => {
            let inner = match inner {
                Some(v) => {
                    let some_ty = ty.option_some_type().ok_or_else(|| missing("option"))?;
                    Some(to_wave(v, &some_ty)?)
                }
                None => None,
            };
            WaveValue::make_option(ty, inner).map_err(|e| built("option", e))
        }
        Value::Result(result) => {
            let (ok_ty, err_ty) = ty.result_types().ok_or_else(|| missing("result"))?;
            let side = |payload: &Option<Box<Value>>,
                        t: Option<WaveType>|
             -> Result<Option<WaveValue>, CanonicalAbiError> {
                match (payload, t) {
                    (Some(v), Some(t)) => Ok(Some(to_wave(v, &t)?)),
                    (None, None) => Ok(None),
                    _ => Err(payload_mismatch("result")),
                }
            };
            let result = match result {
                Ok(payload) => Ok(side(payload, ok_ty)?),
                Err(payload) => Err(side(payload, err_ty)?),
            };
            WaveValue::make_result(ty, result).map_err(|e| built("result", e))
        }
        Value::Flags(active) => {
            WaveValue::make_flags(ty, active.iter().map(String::as_str))
                .map_err(|e| built("flags", e))
        }
    }
}
