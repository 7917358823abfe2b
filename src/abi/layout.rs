//! Memory layout calculation.
//!
//! A [`TypeLayout`] is computed once per [`TypeShape`] and then drives every
//! codec path: lifting, lowering, flattening and unflattening all walk the
//! layout tree rather than the shape. Nested layouts are shared through
//! `Arc` so a registry can hand out the same instance for every occurrence.

use std::collections::HashSet;
use std::sync::Arc;

use super::buffer::{align_to, checked_align_to};
use super::flat::{join_into, FlatType};
use super::shape::{Case, SumKind, TypeShape};
use super::{CanonicalAbiError, Value};

/// Most scalars a fixed-length array may flatten to.
pub const MAX_ARRAY_FLAT: usize = 1 << 16;

/// Fixed-width primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    F32,
    F64,
    Char,
    Handle,
}

impl Scalar {
    /// Size in bytes, which is also the alignment.
    pub fn size(self) -> u32 {
        match self {
            Scalar::Bool | Scalar::S8 | Scalar::U8 => 1,
            Scalar::S16 | Scalar::U16 => 2,
            Scalar::S32 | Scalar::U32 | Scalar::F32 | Scalar::Char | Scalar::Handle => 4,
            Scalar::S64 | Scalar::U64 | Scalar::F64 => 8,
        }
    }

    pub fn flat(self) -> FlatType {
        match self {
            Scalar::S64 | Scalar::U64 => FlatType::I64,
            Scalar::F32 => FlatType::F32,
            Scalar::F64 => FlatType::F64,
            _ => FlatType::I32,
        }
    }

    fn from_shape(shape: &TypeShape) -> Option<Scalar> {
        Some(match shape {
            TypeShape::Bool => Scalar::Bool,
            TypeShape::S8 => Scalar::S8,
            TypeShape::U8 => Scalar::U8,
            TypeShape::S16 => Scalar::S16,
            TypeShape::U16 => Scalar::U16,
            TypeShape::S32 => Scalar::S32,
            TypeShape::U32 => Scalar::U32,
            TypeShape::S64 => Scalar::S64,
            TypeShape::U64 => Scalar::U64,
            TypeShape::F32 => Scalar::F32,
            TypeShape::F64 => Scalar::F64,
            TypeShape::Char => Scalar::Char,
            TypeShape::Handle => Scalar::Handle,
            _ => return None,
        })
    }
}

/// Size, alignment and flat shape of a type, plus the nested layouts needed
/// to encode it.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeLayout {
    pub size: u32,
    pub align: u32,
    /// Core scalar kinds this type flattens to.
    pub flat: Vec<FlatType>,
    pub kind: LayoutKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutKind {
    Scalar(Scalar),
    /// `{ptr, len}` header pointing at UTF-8 bytes.
    String,
    /// `{ptr, len}` header pointing at `len` elements.
    List(ElementLayout),
    Array { element: ElementLayout, len: u32 },
    Record(Vec<FieldLayout>),
    /// Tuple elements are stored like record fields named by position.
    Tuple(Vec<FieldLayout>),
    Variant(VariantLayout),
    Flags(FlagsLayout),
}

/// Layout of list or array elements.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementLayout {
    pub layout: Arc<TypeLayout>,
    /// Element size rounded up to element alignment.
    pub stride: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub offset: u32,
    pub layout: Arc<TypeLayout>,
}

/// Layout shared by variants, enums, options and results.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantLayout {
    pub kind: SumKind,
    /// Discriminant width in bytes: 1, 2 or 4.
    pub discriminant_size: u32,
    pub payload_offset: u32,
    pub cases: Vec<CaseLayout>,
    /// Element-wise join of every case's flat shape. Excludes the
    /// discriminant.
    pub payload_flat: Vec<FlatType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseLayout {
    pub name: String,
    pub payload: Option<Arc<TypeLayout>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagsLayout {
    pub names: Vec<String>,
    /// Storage width in bytes: 0, 1, 2 or 4.
    pub width: u32,
}

impl TypeLayout {
    /// Field layouts of a record or tuple; empty for every other kind.
    pub fn fields(&self) -> &[FieldLayout] {
        match &self.kind {
            LayoutKind::Record(fields) | LayoutKind::Tuple(fields) => fields,
            _ => &[],
        }
    }

    /// Number of core scalars this type flattens to.
    pub fn flat_count(&self) -> usize {
        self.flat.len()
    }

    fn scalar(scalar: Scalar) -> Self {
        Self {
            size: scalar.size(),
            align: scalar.size(),
            flat: vec![scalar.flat()],
            kind: LayoutKind::Scalar(scalar),
        }
    }

    fn pointer_pair(kind: LayoutKind) -> Self {
        Self {
            size: 8,
            align: 4,
            flat: vec![FlatType::I32, FlatType::I32],
            kind,
        }
    }
}

impl ElementLayout {
    fn new(layout: Arc<TypeLayout>) -> Self {
        let stride = align_to(layout.size, layout.align);
        Self { layout, stride }
    }

    /// Total byte size of `count` elements.
    pub fn byte_len(&self, count: u32) -> Result<u32, CanonicalAbiError> {
        self.stride
            .checked_mul(count)
            .ok_or(CanonicalAbiError::SizeOverflow("list contents"))
    }
}

impl VariantLayout {
    /// Look up the case selected by a discriminant.
    pub fn case(&self, discriminant: u32) -> Result<&CaseLayout, CanonicalAbiError> {
        self.cases
            .get(discriminant as usize)
            .ok_or(CanonicalAbiError::InvalidDiscriminant {
                discriminant,
                num_cases: self.cases.len(),
            })
    }

    fn index_of(&self, name: &str) -> Result<u32, CanonicalAbiError> {
        self.cases
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| CanonicalAbiError::mismatch("known case", format!("case '{name}'")))
    }

    /// Resolve a value to its discriminant and payload, checking that the
    /// payload matches what the case declares.
    pub fn select<'v>(
        &self,
        value: &'v Value,
    ) -> Result<(u32, &CaseLayout, Option<&'v Value>), CanonicalAbiError> {
        let (index, payload) = match (self.kind, value) {
            (SumKind::Variant, Value::Variant(name, payload)) => {
                (self.index_of(name)?, payload.as_deref())
            }
            (SumKind::Enum, Value::Enum(name)) => (self.index_of(name)?, None),
            (SumKind::Option, Value::Option(None)) => (0, None),
            (SumKind::Option, Value::Option(Some(inner))) => (1, Some(inner.as_ref())),
            (SumKind::Result, Value::Result(Ok(payload))) => (0, payload.as_deref()),
            (SumKind::Result, Value::Result(Err(payload))) => (1, payload.as_deref()),
            (kind, other) => {
                return Err(CanonicalAbiError::mismatch(
                    format!("{kind:?}").to_lowercase(),
                    other.kind_name(),
                ));
            }
        };
        let case = self.case(index)?;
        match (&case.payload, payload) {
            (Some(_), Some(_)) | (None, None) => Ok((index, case, payload)),
            (Some(_), None) => Err(CanonicalAbiError::mismatch(
                format!("payload for case '{}'", case.name),
                "none",
            )),
            (None, Some(_)) => Err(CanonicalAbiError::mismatch(
                format!("no payload for case '{}'", case.name),
                "payload",
            )),
        }
    }

    /// Rebuild a value for the case at `index` with its decoded payload.
    pub fn build(&self, index: u32, payload: Option<Value>) -> Result<Value, CanonicalAbiError> {
        let case = self.case(index)?;
        let payload = payload.map(Box::new);
        Ok(match self.kind {
            SumKind::Variant => Value::Variant(case.name.clone(), payload),
            SumKind::Enum => Value::Enum(case.name.clone()),
            SumKind::Option if index == 0 => Value::Option(None),
            SumKind::Option => Value::Option(payload),
            SumKind::Result if index == 0 => Value::Result(Ok(payload)),
            SumKind::Result => Value::Result(Err(payload)),
        })
    }
}

impl FlagsLayout {
    /// Pack flag names into a bit set.
    pub fn pack<'a>(&self, active: impl IntoIterator<Item = &'a str>) -> Result<u32, CanonicalAbiError> {
        let mut bits = 0u32;
        for name in active {
            let index = self
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| CanonicalAbiError::mismatch("declared flag", format!("flag '{name}'")))?;
            bits |= 1 << index;
        }
        Ok(bits)
    }

    /// Unpack a bit set, rejecting bits beyond the declared flags.
    pub fn unpack(&self, bits: u32) -> Result<Vec<String>, CanonicalAbiError> {
        let declared = match self.names.len() {
            32 => u32::MAX,
            n => (1u32 << n) - 1,
        };
        if bits & !declared != 0 {
            return Err(CanonicalAbiError::InvalidFlags {
                bits,
                num_flags: self.names.len(),
            });
        }
        Ok(self
            .names
            .iter()
            .enumerate()
            .filter(|(i, _)| bits & (1 << i) != 0)
            .map(|(_, n)| n.clone())
            .collect())
    }
}

fn discriminant_size(num_cases: usize) -> u32 {
    match num_cases {
        0..=256 => 1,
        257..=65536 => 2,
        _ => 4,
    }
}

fn check_unique<'a>(what: &str, names: impl IntoIterator<Item = &'a str>) -> Result<(), CanonicalAbiError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(CanonicalAbiError::InvalidShape(format!(
                "duplicate {what} name '{name}'"
            )));
        }
    }
    Ok(())
}

/// Lay out a sequence of members one after another, each at its own
/// alignment. Returns the member offsets, total size and alignment.
fn sequential(members: &[Arc<TypeLayout>]) -> Result<(Vec<u32>, u32, u32), CanonicalAbiError> {
    let mut offset = 0u32;
    let mut align = 1u32;
    let mut offsets = Vec::with_capacity(members.len());
    for member in members {
        offset = checked_align_to(offset, member.align)
            .ok_or(CanonicalAbiError::SizeOverflow("record"))?;
        offsets.push(offset);
        offset = offset
            .checked_add(member.size)
            .ok_or(CanonicalAbiError::SizeOverflow("record"))?;
        align = align.max(member.align);
    }
    let size = checked_align_to(offset, align).ok_or(CanonicalAbiError::SizeOverflow("record"))?;
    Ok((offsets, size, align))
}

/// Compute the layout of `shape`.
///
/// Nested shapes are resolved through `child`, which lets a registry return
/// cached layouts for them.
pub fn compute(
    shape: &TypeShape,
    child: &mut dyn FnMut(&TypeShape) -> Result<Arc<TypeLayout>, CanonicalAbiError>,
) -> Result<TypeLayout, CanonicalAbiError> {
    if let Some(scalar) = Scalar::from_shape(shape) {
        return Ok(TypeLayout::scalar(scalar));
    }
    match shape {
        TypeShape::String => Ok(TypeLayout::pointer_pair(LayoutKind::String)),
        TypeShape::List(element) => Ok(TypeLayout::pointer_pair(LayoutKind::List(
            ElementLayout::new(child(element)?),
        ))),
        TypeShape::Array(element, len) => {
            let element = ElementLayout::new(child(element)?);
            let size = element.byte_len(*len)?;
            let flat_count = element.layout.flat.len().saturating_mul(*len as usize);
            if flat_count > MAX_ARRAY_FLAT {
                return Err(CanonicalAbiError::UnsupportedType(format!(
                    "{shape} flattens to {flat_count} scalars, more than {MAX_ARRAY_FLAT}"
                )));
            }
            let flat = element
                .layout
                .flat
                .iter()
                .copied()
                .cycle()
                .take(flat_count)
                .collect();
            Ok(TypeLayout {
                size,
                align: element.layout.align,
                flat,
                kind: LayoutKind::Array { element, len: *len },
            })
        }
        TypeShape::Record(fields) => {
            check_unique("field", fields.iter().map(|f| f.name.as_str()))?;
            let names = fields.iter().map(|f| f.name.clone());
            let layouts = fields
                .iter()
                .map(|f| child(&f.ty))
                .collect::<Result<Vec<_>, _>>()?;
            fields_layout(names, layouts, LayoutKind::Record)
        }
        TypeShape::Tuple(types) => {
            let names = (0..types.len()).map(|i| i.to_string());
            let layouts = types
                .iter()
                .map(|t| child(t))
                .collect::<Result<Vec<_>, _>>()?;
            fields_layout(names, layouts, LayoutKind::Tuple)
        }
        TypeShape::Flags(names) => {
            check_unique("flag", names.iter().map(String::as_str))?;
            let width = match names.len() {
                0 => 0,
                1..=8 => 1,
                9..=16 => 2,
                17..=32 => 4,
                n => {
                    return Err(CanonicalAbiError::UnsupportedType(format!(
                        "flags with {n} members (at most 32 supported)"
                    )));
                }
            };
            Ok(TypeLayout {
                size: width,
                align: width.max(1),
                flat: if width == 0 { Vec::new() } else { vec![FlatType::I32] },
                kind: LayoutKind::Flags(FlagsLayout {
                    names: names.clone(),
                    width,
                }),
            })
        }
        _ => match shape.sum_cases() {
            Some((kind, cases)) => variant_layout(kind, &cases, child),
            None => Err(CanonicalAbiError::UnsupportedType(shape.to_string())),
        },
    }
}

fn fields_layout(
    names: impl Iterator<Item = String>,
    layouts: Vec<Arc<TypeLayout>>,
    wrap: fn(Vec<FieldLayout>) -> LayoutKind,
) -> Result<TypeLayout, CanonicalAbiError> {
    let (offsets, size, align) = sequential(&layouts)?;
    let flat = layouts.iter().flat_map(|l| l.flat.iter().copied()).collect();
    let fields = names
        .zip(offsets)
        .zip(layouts)
        .map(|((name, offset), layout)| FieldLayout {
            name,
            offset,
            layout,
        })
        .collect();
    Ok(TypeLayout {
        size,
        align,
        flat,
        kind: wrap(fields),
    })
}

fn variant_layout(
    kind: SumKind,
    cases: &[Case],
    child: &mut dyn FnMut(&TypeShape) -> Result<Arc<TypeLayout>, CanonicalAbiError>,
) -> Result<TypeLayout, CanonicalAbiError> {
    if cases.is_empty() {
        return Err(CanonicalAbiError::InvalidShape(
            "variant must have at least one case".to_string(),
        ));
    }
    check_unique("case", cases.iter().map(|c| c.name.as_str()))?;

    let discriminant_size = discriminant_size(cases.len());
    let mut case_layouts = Vec::with_capacity(cases.len());
    let mut max_size = 0u32;
    let mut max_align = 1u32;
    let mut payload_flat = Vec::new();
    for case in cases {
        let payload = case.ty.as_ref().map(|t| child(t)).transpose()?;
        if let Some(layout) = &payload {
            max_size = max_size.max(layout.size);
            max_align = max_align.max(layout.align);
            join_into(&mut payload_flat, &layout.flat);
        }
        case_layouts.push(CaseLayout {
            name: case.name.clone(),
            payload,
        });
    }

    let payload_offset = align_to(discriminant_size, max_align);
    let align = discriminant_size.max(max_align);
    let end = payload_offset
        .checked_add(max_size)
        .ok_or(CanonicalAbiError::SizeOverflow("variant"))?;
    let mut flat = Vec::with_capacity(payload_flat.len() + 1);
    flat.push(FlatType::I32);
    flat.extend_from_slice(&payload_flat);

    Ok(TypeLayout {
        size: checked_align_to(end, align).ok_or(CanonicalAbiError::SizeOverflow("variant"))?,
        align,
        flat,
        kind: LayoutKind::Variant(VariantLayout {
            kind,
            discriminant_size,
            payload_offset,
            cases: case_layouts,
            payload_flat,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(shape: &TypeShape) -> TypeLayout {
        compute(shape, &mut |s| compute(s, &mut |_| unreachable_child()).map(Arc::new)).unwrap()
    }

    // Only used for shapes nested at most one level deep.
    fn unreachable_child() -> Result<Arc<TypeLayout>, CanonicalAbiError> {
        Err(CanonicalAbiError::UnsupportedType("nested".to_string()))
    }

    #[test]
    fn primitive_sizes() {
        for (shape, size) in [
            (TypeShape::Bool, 1),
            (TypeShape::S8, 1),
            (TypeShape::U16, 2),
            (TypeShape::F32, 4),
            (TypeShape::Char, 4),
            (TypeShape::U64, 8),
            (TypeShape::F64, 8),
        ] {
            let l = layout(&shape);
            assert_eq!((l.size, l.align), (size, size), "{shape}");
        }
        let s = layout(&TypeShape::String);
        assert_eq!((s.size, s.align, s.flat.len()), (8, 4, 2));
    }

    #[test]
    fn record_fields_are_padded() {
        let l = layout(&TypeShape::record([
            ("a", TypeShape::U8),
            ("b", TypeShape::U32),
            ("c", TypeShape::U16),
            ("d", TypeShape::U64),
        ]));
        let offsets: Vec<u32> = l.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 16]);
        assert_eq!((l.size, l.align), (24, 8));
    }

    #[test]
    fn variant_payload_follows_rounded_discriminant() {
        let l = layout(&TypeShape::variant([
            ("a", Some(TypeShape::U8)),
            ("b", Some(TypeShape::U64)),
            ("c", None),
        ]));
        let LayoutKind::Variant(v) = &l.kind else {
            panic!("expected variant layout");
        };
        assert_eq!(v.discriminant_size, 1);
        assert_eq!(v.payload_offset, 8);
        assert_eq!((l.size, l.align), (16, 8));
        assert_eq!(l.flat, vec![FlatType::I32, FlatType::I64]);
    }

    #[test]
    fn discriminant_width_grows_with_case_count() {
        assert_eq!(discriminant_size(2), 1);
        assert_eq!(discriminant_size(256), 1);
        assert_eq!(discriminant_size(257), 2);
        assert_eq!(discriminant_size(65536), 2);
        assert_eq!(discriminant_size(65537), 4);

        let names: Vec<String> = (0..300).map(|i| format!("c{i}")).collect();
        let l = layout(&TypeShape::Enum(names));
        assert_eq!((l.size, l.align), (2, 2));
    }

    #[test]
    fn flags_width() {
        let l = layout(&TypeShape::flags(["a", "b", "c"]));
        assert_eq!(l.size, 1);
        let many: Vec<String> = (0..20).map(|i| format!("f{i}")).collect();
        assert_eq!(layout(&TypeShape::Flags(many)).size, 4);
        let too_many: Vec<String> = (0..33).map(|i| format!("f{i}")).collect();
        assert!(compute(&TypeShape::Flags(too_many), &mut |_| unreachable_child()).is_err());
    }

    #[test]
    fn malformed_shapes_fail_at_registration() {
        assert!(compute(&TypeShape::Variant(vec![]), &mut |_| unreachable_child()).is_err());
        let dup = TypeShape::record([("x", TypeShape::U8), ("x", TypeShape::U8)]);
        assert!(matches!(
            compute(&dup, &mut |s| compute(s, &mut |_| unreachable_child()).map(Arc::new)),
            Err(CanonicalAbiError::InvalidShape(_))
        ));
    }

    #[test]
    fn huge_arrays_are_rejected_before_flattening() {
        let shape = TypeShape::array(TypeShape::U8, 1 << 28);
        assert!(matches!(
            compute(&shape, &mut |s| compute(s, &mut |_| unreachable_child()).map(Arc::new)),
            Err(CanonicalAbiError::UnsupportedType(_))
        ));

        let small = layout(&TypeShape::array(TypeShape::U16, 3));
        assert_eq!((small.size, small.align, small.flat.len()), (6, 2, 3));
    }

    #[test]
    fn record_size_near_address_limit_overflows() {
        let word = Arc::new(TypeLayout::scalar(Scalar::U32));
        let blob = Arc::new(TypeLayout {
            size: u32::MAX - 4,
            align: 1,
            flat: Vec::new(),
            kind: LayoutKind::Tuple(Vec::new()),
        });
        assert!(matches!(
            sequential(&[word, Arc::clone(&blob)]),
            Err(CanonicalAbiError::SizeOverflow(_))
        ));

        let byte = Arc::new(TypeLayout::scalar(Scalar::U8));
        let (offsets, size, align) = sequential(&[byte, blob]).unwrap();
        assert_eq!((offsets, size, align), (vec![0, 1], u32::MAX - 3, 1));
    }

    #[test]
    fn flags_pack_and_unpack() {
        let f = FlagsLayout {
            names: vec!["read".into(), "write".into(), "exec".into()],
            width: 1,
        };
        assert_eq!(f.pack(["read", "exec"]).unwrap(), 0b101);
        assert_eq!(f.unpack(0b011).unwrap(), vec!["read", "write"]);
        assert!(matches!(
            f.unpack(0b1000),
            Err(CanonicalAbiError::InvalidFlags { bits: 8, num_flags: 3 })
        ));
        assert!(f.pack(["delete"]).is_err());
    }
}
