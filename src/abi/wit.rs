//! Deriving shapes from WIT definitions.

use wit_parser::{Resolve, Type, TypeDefKind, TypeId};

use super::shape::{Case, Field, TypeShape};
use super::CanonicalAbiError;

impl TypeShape {
    /// Resolve a WIT type to its shape, following aliases.
    ///
    /// Owned and borrowed resource handles both become [`TypeShape::Handle`].
    /// Futures, streams, maps and error contexts are not supported.
    pub fn from_wit(resolve: &Resolve, ty: &Type) -> Result<Self, CanonicalAbiError> {
        Ok(match ty {
            Type::Bool => TypeShape::Bool,
            Type::U8 => TypeShape::U8,
            Type::U16 => TypeShape::U16,
            Type::U32 => TypeShape::U32,
            Type::U64 => TypeShape::U64,
            Type::S8 => TypeShape::S8,
            Type::S16 => TypeShape::S16,
            Type::S32 => TypeShape::S32,
            Type::S64 => TypeShape::S64,
            Type::F32 => TypeShape::F32,
            Type::F64 => TypeShape::F64,
            Type::Char => TypeShape::Char,
            Type::String => TypeShape::String,
            Type::ErrorContext => {
                return Err(CanonicalAbiError::UnsupportedType(
                    "error-context".to_string(),
                ));
            }
            Type::Id(id) => Self::from_wit_id(resolve, *id)?,
        })
    }

    /// Resolve a WIT type definition by id.
    pub fn from_wit_id(resolve: &Resolve, id: TypeId) -> Result<Self, CanonicalAbiError> {
        let def = resolve.types.get(id).ok_or_else(|| {
            CanonicalAbiError::UnsupportedType(format!("Unknown type id: {:?}", id))
        })?;
        let shape = |ty: &Type| Self::from_wit(resolve, ty);
        let optional = |ty: &Option<Type>| ty.as_ref().map(shape).transpose();

        Ok(match &def.kind {
            TypeDefKind::Type(inner) => shape(inner)?,
            TypeDefKind::Record(record) => TypeShape::Record(
                record
                    .fields
                    .iter()
                    .map(|f| {
                        Ok(Field {
                            name: f.name.clone(),
                            ty: shape(&f.ty)?,
                        })
                    })
                    .collect::<Result<_, CanonicalAbiError>>()?,
            ),
            TypeDefKind::Tuple(tuple) => TypeShape::Tuple(
                tuple
                    .types
                    .iter()
                    .map(shape)
                    .collect::<Result<_, _>>()?,
            ),
            TypeDefKind::Flags(flags) => {
                TypeShape::Flags(flags.flags.iter().map(|f| f.name.clone()).collect())
            }
            TypeDefKind::Enum(e) => {
                TypeShape::Enum(e.cases.iter().map(|c| c.name.clone()).collect())
            }
            TypeDefKind::Variant(variant) => TypeShape::Variant(
                variant
                    .cases
                    .iter()
                    .map(|c| {
                        Ok(Case {
                            name: c.name.clone(),
                            ty: optional(&c.ty)?,
                        })
                    })
                    .collect::<Result<_, CanonicalAbiError>>()?,
            ),
            TypeDefKind::Option(inner) => TypeShape::option(shape(inner)?),
            TypeDefKind::Result(result) => {
                TypeShape::result(optional(&result.ok)?, optional(&result.err)?)
            }
            TypeDefKind::List(element) => TypeShape::list(shape(element)?),
            TypeDefKind::FixedSizeList(element, len) => TypeShape::array(shape(element)?, *len),
            TypeDefKind::Handle(_) => TypeShape::Handle,
            TypeDefKind::Resource => {
                return Err(CanonicalAbiError::UnsupportedType(
                    "resource (use a handle)".to_string(),
                ));
            }
            TypeDefKind::Future(_) => {
                return Err(CanonicalAbiError::UnsupportedType("future".to_string()));
            }
            TypeDefKind::Stream(_) => {
                return Err(CanonicalAbiError::UnsupportedType("stream".to_string()));
            }
            TypeDefKind::Map(_, _) => {
                return Err(CanonicalAbiError::UnsupportedType("map".to_string()));
            }
            TypeDefKind::Unknown => {
                return Err(CanonicalAbiError::UnsupportedType("unknown".to_string()));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(wit: &str) -> Resolve {
        let mut resolve = Resolve::new();
        resolve.push_str("test.wit", wit).unwrap();
        resolve
    }

    fn named(resolve: &Resolve, name: &str) -> TypeShape {
        let id = crate::find_type_by_name(resolve, name).unwrap();
        TypeShape::from_wit_id(resolve, id).unwrap()
    }

    #[test]
    fn records_variants_and_aliases_resolve() {
        let r = resolve(
            r#"
package test:shapes;
interface types {
    type id = u64;
    record item { key: id, tags: list<string>, weight: option<f32> }
    variant event { created(item), removed(id), cleared }
    flags mode { fast, safe }
    enum color { red, green }
}
"#,
        );
        assert_eq!(
            named(&r, "item"),
            TypeShape::record([
                ("key", TypeShape::U64),
                ("tags", TypeShape::list(TypeShape::String)),
                ("weight", TypeShape::option(TypeShape::F32)),
            ])
        );
        let TypeShape::Variant(cases) = named(&r, "event") else {
            panic!("expected variant");
        };
        assert_eq!(cases.len(), 3);
        assert_eq!(cases.get(1).and_then(|c| c.ty.clone()), Some(TypeShape::U64));
        assert_eq!(named(&r, "mode"), TypeShape::flags(["fast", "safe"]));
        assert_eq!(named(&r, "color"), TypeShape::enumeration(["red", "green"]));
    }

    #[test]
    fn resource_handles_become_handle_shapes() {
        let r = resolve(
            r#"
package test:res;
interface files {
    resource file;
    record opened { f: own<file>, size: u64 }
}
"#,
        );
        assert_eq!(
            named(&r, "opened"),
            TypeShape::record([("f", TypeShape::Handle), ("size", TypeShape::U64)])
        );
    }
}
