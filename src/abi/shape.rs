//! Semantic type shapes.
//!
//! A [`TypeShape`] is the explicit type descriptor every codec path works
//! from. Shapes come from three places: hand-built with the constructors
//! below, derived from Rust types through [`WitType`](super::WitType), or
//! resolved from WIT definitions (see [`TypeShape::from_wit`]).

use std::fmt;

/// Structural classification of a value crossing the guest boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeShape {
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
    String,
    /// Resource handle, carried as a `u32`.
    Handle,
    List(Box<TypeShape>),
    /// Fixed-length list laid out inline.
    Array(Box<TypeShape>, u32),
    Record(Vec<Field>),
    Tuple(Vec<TypeShape>),
    Variant(Vec<Case>),
    Enum(Vec<String>),
    Option(Box<TypeShape>),
    Result {
        ok: Option<Box<TypeShape>>,
        err: Option<Box<TypeShape>>,
    },
    Flags(Vec<String>),
}

/// A named record field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub ty: TypeShape,
}

/// A named variant case with an optional payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Case {
    pub name: String,
    pub ty: Option<TypeShape>,
}

/// Which sum-type flavor a variant-like shape came from.
///
/// Options, results and enums share the variant code paths; the kind is only
/// needed to rebuild the right [`Value`](super::Value) when lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SumKind {
    Variant,
    Enum,
    Option,
    Result,
}

impl TypeShape {
    pub fn list(element: TypeShape) -> Self {
        Self::List(Box::new(element))
    }

    pub fn array(element: TypeShape, len: u32) -> Self {
        Self::Array(Box::new(element), len)
    }

    pub fn option(inner: TypeShape) -> Self {
        Self::Option(Box::new(inner))
    }

    pub fn result(ok: Option<TypeShape>, err: Option<TypeShape>) -> Self {
        Self::Result {
            ok: ok.map(Box::new),
            err: err.map(Box::new),
        }
    }

    /// Build a record shape from `(name, shape)` pairs in declaration order.
    pub fn record<N: Into<String>>(fields: impl IntoIterator<Item = (N, TypeShape)>) -> Self {
        Self::Record(
            fields
                .into_iter()
                .map(|(name, ty)| Field {
                    name: name.into(),
                    ty,
                })
                .collect(),
        )
    }

    pub fn tuple(elements: impl IntoIterator<Item = TypeShape>) -> Self {
        Self::Tuple(elements.into_iter().collect())
    }

    /// Build a variant shape from `(name, payload)` pairs.
    pub fn variant<N: Into<String>>(
        cases: impl IntoIterator<Item = (N, Option<TypeShape>)>,
    ) -> Self {
        Self::Variant(
            cases
                .into_iter()
                .map(|(name, ty)| Case {
                    name: name.into(),
                    ty,
                })
                .collect(),
        )
    }

    pub fn enumeration<N: Into<String>>(cases: impl IntoIterator<Item = N>) -> Self {
        Self::Enum(cases.into_iter().map(Into::into).collect())
    }

    pub fn flags<N: Into<String>>(names: impl IntoIterator<Item = N>) -> Self {
        Self::Flags(names.into_iter().map(Into::into).collect())
    }

    /// Returns the cases of a sum-type shape, normalized to plain variant
    /// cases, together with the flavor the shape was written as.
    ///
    /// `option<T>` becomes `none | some(T)`, `result<T, E>` becomes
    /// `ok(T) | err(E)` and an enum becomes payload-less cases.
    pub fn sum_cases(&self) -> Option<(SumKind, Vec<Case>)> {
        let case = |name: &str, ty: Option<&TypeShape>| Case {
            name: name.to_string(),
            ty: ty.cloned(),
        };
        match self {
            Self::Variant(cases) => Some((SumKind::Variant, cases.clone())),
            Self::Enum(names) => Some((
                SumKind::Enum,
                names.iter().map(|n| case(n, None)).collect(),
            )),
            Self::Option(inner) => Some((
                SumKind::Option,
                vec![case("none", None), case("some", Some(inner.as_ref()))],
            )),
            Self::Result { ok, err } => Some((
                SumKind::Result,
                vec![case("ok", ok.as_deref()), case("err", err.as_deref())],
            )),
            _ => None,
        }
    }

    /// Returns `true` for string and list shapes, whose contents live
    /// out-of-line in guest memory.
    pub fn is_indirect(&self) -> bool {
        matches!(self, Self::String | Self::List(_))
    }

    /// Returns `true` for single-scalar primitives.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::S8
                | Self::U8
                | Self::S16
                | Self::U16
                | Self::S32
                | Self::U32
                | Self::S64
                | Self::U64
                | Self::F32
                | Self::F64
                | Self::Char
                | Self::Handle
        )
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: impl IntoIterator<Item = T>) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::S8 => f.write_str("s8"),
            Self::U8 => f.write_str("u8"),
            Self::S16 => f.write_str("s16"),
            Self::U16 => f.write_str("u16"),
            Self::S32 => f.write_str("s32"),
            Self::U32 => f.write_str("u32"),
            Self::S64 => f.write_str("s64"),
            Self::U64 => f.write_str("u64"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::Char => f.write_str("char"),
            Self::String => f.write_str("string"),
            Self::Handle => f.write_str("handle"),
            Self::List(t) => write!(f, "list<{t}>"),
            Self::Array(t, n) => write!(f, "list<{t}, {n}>"),
            Self::Record(fields) => {
                f.write_str("record { ")?;
                join(f, fields.iter().map(|fd| format!("{}: {}", fd.name, fd.ty)))?;
                f.write_str(" }")
            }
            Self::Tuple(types) => {
                f.write_str("tuple<")?;
                join(f, types)?;
                f.write_str(">")
            }
            Self::Variant(cases) => {
                f.write_str("variant { ")?;
                join(
                    f,
                    cases.iter().map(|c| match &c.ty {
                        Some(t) => format!("{}({t})", c.name),
                        None => c.name.clone(),
                    }),
                )?;
                f.write_str(" }")
            }
            Self::Enum(names) => {
                f.write_str("enum { ")?;
                join(f, names)?;
                f.write_str(" }")
            }
            Self::Option(t) => write!(f, "option<{t}>"),
            Self::Result { ok, err } => match (ok, err) {
                (None, None) => f.write_str("result"),
                (Some(ok), None) => write!(f, "result<{ok}>"),
                (None, Some(err)) => write!(f, "result<_, {err}>"),
                (Some(ok), Some(err)) => write!(f, "result<{ok}, {err}>"),
            },
            Self::Flags(names) => {
                f.write_str("flags { ")?;
                join(f, names)?;
                f.write_str(" }")
            }
        }
    }
}
