//! Static type descriptors for Rust host types.
//!
//! [`WitType`] maps a Rust type to its [`TypeShape`] and converts values to
//! and from the dynamic [`Value`] form. Implementations are provided for
//! primitives, `String`, `Vec<T>`, `Option<T>`, `Result<T, E>`, tuples and
//! arrays. User structs get theirs from [`wit_record!`](crate::wit_record),
//! [`wit_flags!`](crate::wit_flags) and [`wit_enum!`](crate::wit_enum).

use super::shape::TypeShape;
use super::{CanonicalAbiError, Value};

/// A Rust type with a fixed boundary shape.
pub trait WitType: Sized + 'static {
    /// The shape of this type. Called once per registry and cached.
    fn shape() -> TypeShape;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self, CanonicalAbiError>;

    /// Shape used when this type is a `result` payload. `()` has none.
    #[doc(hidden)]
    fn payload_shape() -> Option<TypeShape> {
        Some(Self::shape())
    }

    #[doc(hidden)]
    fn into_payload(self) -> Option<Value> {
        Some(self.into_value())
    }

    #[doc(hidden)]
    fn from_payload(payload: Option<Value>) -> Result<Self, CanonicalAbiError> {
        match payload {
            Some(value) => Self::from_value(value),
            None => Err(CanonicalAbiError::mismatch(
                Self::shape().to_string(),
                "missing payload",
            )),
        }
    }
}

macro_rules! primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl WitType for $ty {
                fn shape() -> TypeShape {
                    TypeShape::$variant
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(CanonicalAbiError::mismatch(
                            TypeShape::$variant.to_string(),
                            other.kind_name(),
                        )),
                    }
                }
            }
        )*
    };
}

primitive!(
    bool => Bool,
    i8 => S8,
    u8 => U8,
    i16 => S16,
    u16 => U16,
    i32 => S32,
    u32 => U32,
    i64 => S64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => String,
);

impl WitType for () {
    fn shape() -> TypeShape {
        TypeShape::Tuple(Vec::new())
    }

    fn into_value(self) -> Value {
        Value::Tuple(Vec::new())
    }

    fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
        match value {
            Value::Tuple(items) if items.is_empty() => Ok(()),
            other => Err(CanonicalAbiError::mismatch("tuple<>", other.kind_name())),
        }
    }

    fn payload_shape() -> Option<TypeShape> {
        None
    }

    fn into_payload(self) -> Option<Value> {
        None
    }

    fn from_payload(payload: Option<Value>) -> Result<Self, CanonicalAbiError> {
        match payload {
            None => Ok(()),
            Some(value) => Self::from_value(value),
        }
    }
}

impl<T: WitType> WitType for Vec<T> {
    fn shape() -> TypeShape {
        TypeShape::list(T::shape())
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(WitType::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(CanonicalAbiError::mismatch("list", other.kind_name())),
        }
    }
}

impl<T: WitType, const N: usize> WitType for [T; N] {
    fn shape() -> TypeShape {
        TypeShape::array(T::shape(), N as u32)
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(WitType::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
        let items = Vec::<T>::from_value(value)?;
        let len = items.len();
        items.try_into().map_err(|_| {
            CanonicalAbiError::mismatch(format!("{N} elements"), format!("{len} elements"))
        })
    }
}

impl<T: WitType> WitType for Option<T> {
    fn shape() -> TypeShape {
        TypeShape::option(T::shape())
    }

    fn into_value(self) -> Value {
        Value::Option(self.map(|v| Box::new(v.into_value())))
    }

    fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
        match value {
            Value::Option(inner) => inner.map(|v| T::from_value(*v)).transpose(),
            other => Err(CanonicalAbiError::mismatch("option", other.kind_name())),
        }
    }
}

impl<T: WitType, E: WitType> WitType for Result<T, E> {
    fn shape() -> TypeShape {
        TypeShape::result(T::payload_shape(), E::payload_shape())
    }

    fn into_value(self) -> Value {
        match self {
            Ok(v) => Value::Result(Ok(v.into_payload().map(Box::new))),
            Err(e) => Value::Result(Err(e.into_payload().map(Box::new))),
        }
    }

    fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
        match value {
            Value::Result(Ok(payload)) => T::from_payload(payload.map(|v| *v)).map(Ok),
            Value::Result(Err(payload)) => E::from_payload(payload.map(|v| *v)).map(Err),
            other => Err(CanonicalAbiError::mismatch("result", other.kind_name())),
        }
    }
}

macro_rules! tuple {
    ($len:literal: $($t:ident),+) => {
        impl<$($t: WitType),+> WitType for ($($t,)+) {
            fn shape() -> TypeShape {
                TypeShape::Tuple(vec![$($t::shape()),+])
            }

            #[allow(non_snake_case)]
            fn into_value(self) -> Value {
                let ($($t,)+) = self;
                Value::Tuple(vec![$($t.into_value()),+])
            }

            fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
                let items = match value {
                    Value::Tuple(items) if items.len() == $len => items,
                    other => {
                        return Err(CanonicalAbiError::mismatch(
                            concat!("tuple of ", $len),
                            other.kind_name(),
                        ));
                    }
                };
                let mut items = items.into_iter();
                Ok(($(
                    $t::from_value(items.next().ok_or_else(|| {
                        CanonicalAbiError::mismatch(concat!("tuple of ", $len), "short tuple")
                    })?)?,
                )+))
            }
        }
    };
}

tuple!(1: A);
tuple!(2: A, B);
tuple!(3: A, B, C);
tuple!(4: A, B, C, D);
tuple!(5: A, B, C, D, E);
tuple!(6: A, B, C, D, E, F);

/// Convert a Rust identifier to a WIT name: `snake_case` and `CamelCase`
/// both become `kebab-case`.
pub fn kebab_case(ident: &str) -> String {
    let chars: Vec<char> = ident.trim_start_matches("r#").chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if *c == '_' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars.get(i - 1).copied().unwrap_or('_');
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_lower);
            if boundary && !out.ends_with('-') {
                out.push('-');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[doc(hidden)]
pub fn expect_record(value: Value, ty: &str) -> Result<Vec<(String, Value)>, CanonicalAbiError> {
    match value {
        Value::Record(fields) => Ok(fields),
        other => Err(CanonicalAbiError::mismatch(
            format!("record {ty}"),
            other.kind_name(),
        )),
    }
}

#[doc(hidden)]
pub fn take_field(
    fields: &mut Vec<(String, Value)>,
    ident: &str,
) -> Result<Value, CanonicalAbiError> {
    let name = kebab_case(ident);
    let pos = fields
        .iter()
        .position(|(n, _)| *n == name)
        .ok_or_else(|| CanonicalAbiError::mismatch(format!("field '{name}'"), "missing field"))?;
    Ok(fields.remove(pos).1)
}

#[doc(hidden)]
pub fn expect_flags(value: Value, ty: &str) -> Result<Vec<String>, CanonicalAbiError> {
    match value {
        Value::Flags(names) => Ok(names),
        other => Err(CanonicalAbiError::mismatch(
            format!("flags {ty}"),
            other.kind_name(),
        )),
    }
}

#[doc(hidden)]
pub fn expect_enum(value: Value, ty: &str) -> Result<String, CanonicalAbiError> {
    match value {
        Value::Enum(name) => Ok(name),
        other => Err(CanonicalAbiError::mismatch(
            format!("enum {ty}"),
            other.kind_name(),
        )),
    }
}

#[doc(hidden)]
pub fn unknown_case(ty: &str, case: &str) -> CanonicalAbiError {
    CanonicalAbiError::mismatch(format!("case of {ty}"), format!("'{case}'"))
}

/// Declare a struct that crosses the boundary as a WIT `record`.
///
/// Field names are converted to kebab-case.
///
/// ```ignore
/// wit_bridge::wit_record! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Point {
///         pub x: u32,
///         pub y: u32,
///     }
/// }
/// ```
#[macro_export]
macro_rules! wit_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($(#[$fmeta])* $fvis $field: $ty),*
        }

        impl $crate::abi::WitType for $name {
            fn shape() -> $crate::abi::TypeShape {
                $crate::abi::TypeShape::Record(vec![$(
                    $crate::abi::Field {
                        name: $crate::abi::kebab_case(stringify!($field)),
                        ty: <$ty as $crate::abi::WitType>::shape(),
                    }
                ),*])
            }

            fn into_value(self) -> $crate::abi::Value {
                $crate::abi::Value::Record(vec![$(
                    (
                        $crate::abi::kebab_case(stringify!($field)),
                        $crate::abi::WitType::into_value(self.$field),
                    )
                ),*])
            }

            #[allow(unused_mut)]
            fn from_value(
                value: $crate::abi::Value,
            ) -> ::std::result::Result<Self, $crate::abi::CanonicalAbiError> {
                let mut fields = $crate::abi::expect_record(value, stringify!($name))?;
                Ok(Self {
                    $($field: <$ty as $crate::abi::WitType>::from_value(
                        $crate::abi::take_field(&mut fields, stringify!($field))?,
                    )?),*
                })
            }
        }
    };
}

/// Declare a struct of booleans that crosses the boundary as WIT `flags`.
///
/// ```ignore
/// wit_bridge::wit_flags! {
///     #[derive(Debug, Default, Clone, Copy, PartialEq)]
///     pub struct Permissions { read, write, exec }
/// }
/// ```
#[macro_export]
macro_rules! wit_flags {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident { $($flag:ident),* $(,)? }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(pub $flag: bool),*
        }

        impl $crate::abi::WitType for $name {
            fn shape() -> $crate::abi::TypeShape {
                $crate::abi::TypeShape::Flags(vec![$($crate::abi::kebab_case(stringify!($flag))),*])
            }

            fn into_value(self) -> $crate::abi::Value {
                let mut active = Vec::new();
                $(
                    if self.$flag {
                        active.push($crate::abi::kebab_case(stringify!($flag)));
                    }
                )*
                $crate::abi::Value::Flags(active)
            }

            fn from_value(
                value: $crate::abi::Value,
            ) -> ::std::result::Result<Self, $crate::abi::CanonicalAbiError> {
                let active = $crate::abi::expect_flags(value, stringify!($name))?;
                Ok(Self {
                    $($flag: active
                        .iter()
                        .any(|n| *n == $crate::abi::kebab_case(stringify!($flag)))),*
                })
            }
        }
    };
}

/// Declare a fieldless Rust enum that crosses the boundary as a WIT `enum`.
#[macro_export]
macro_rules! wit_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($case:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($case),+
        }

        impl $crate::abi::WitType for $name {
            fn shape() -> $crate::abi::TypeShape {
                $crate::abi::TypeShape::Enum(vec![$($crate::abi::kebab_case(stringify!($case))),+])
            }

            fn into_value(self) -> $crate::abi::Value {
                match self {
                    $(Self::$case => $crate::abi::Value::Enum(
                        $crate::abi::kebab_case(stringify!($case)),
                    )),+
                }
            }

            fn from_value(
                value: $crate::abi::Value,
            ) -> ::std::result::Result<Self, $crate::abi::CanonicalAbiError> {
                let name = $crate::abi::expect_enum(value, stringify!($name))?;
                $(
                    if name == $crate::abi::kebab_case(stringify!($case)) {
                        return Ok(Self::$case);
                    }
                )+
                Err($crate::abi::unknown_case(stringify!($name), &name))
            }
        }
    };
}
