//! Property-based tests for canonical ABI roundtrip correctness.
//!
//! Shapes are generated recursively and values are generated to match them,
//! so these cover nesting the hand-written tests never reach.

use proptest::prelude::*;
use proptest::sample::subsequence;
use wit_bridge::abi::{LayoutKind, TypeLayout};
use wit_bridge::{CanonicalAbi, LinearMemory, TypeShape, Value};

fn names(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}")).collect()
}

fn leaf_shape() -> impl Strategy<Value = TypeShape> {
    prop_oneof![
        Just(TypeShape::Bool),
        Just(TypeShape::S8),
        Just(TypeShape::U8),
        Just(TypeShape::S16),
        Just(TypeShape::U16),
        Just(TypeShape::S32),
        Just(TypeShape::U32),
        Just(TypeShape::S64),
        Just(TypeShape::U64),
        Just(TypeShape::F32),
        Just(TypeShape::F64),
        Just(TypeShape::Char),
        Just(TypeShape::String),
        Just(TypeShape::Handle),
        (1usize..6).prop_map(|n| TypeShape::enumeration(names("e", n))),
        (1usize..=32).prop_map(|n| TypeShape::flags(names("f", n))),
    ]
}

fn shape() -> impl Strategy<Value = TypeShape> {
    leaf_shape().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(TypeShape::list),
            (inner.clone(), 1u32..4).prop_map(|(t, n)| TypeShape::array(t, n)),
            inner.clone().prop_map(TypeShape::option),
            (
                proptest::option::of(inner.clone()),
                proptest::option::of(inner.clone())
            )
                .prop_map(|(ok, err)| TypeShape::result(ok, err)),
            proptest::collection::vec(inner.clone(), 1..4).prop_map(|fields| {
                TypeShape::record(
                    fields
                        .into_iter()
                        .enumerate()
                        .map(|(i, t)| (format!("field{i}"), t)),
                )
            }),
            proptest::collection::vec(inner.clone(), 1..4).prop_map(TypeShape::tuple),
            proptest::collection::vec(proptest::option::of(inner), 1..5).prop_map(|cases| {
                TypeShape::variant(
                    cases
                        .into_iter()
                        .enumerate()
                        .map(|(i, t)| (format!("case{i}"), t)),
                )
            }),
        ]
    })
}

fn boxed(value: Option<Value>) -> Option<Box<Value>> {
    value.map(Box::new)
}

fn payload(ty: Option<&TypeShape>) -> BoxedStrategy<Option<Value>> {
    match ty {
        Some(ty) => value_for(ty).prop_map(Some).boxed(),
        None => Just(None).boxed(),
    }
}

fn value_for(shape: &TypeShape) -> BoxedStrategy<Value> {
    match shape {
        TypeShape::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        TypeShape::S8 => any::<i8>().prop_map(Value::S8).boxed(),
        TypeShape::U8 => any::<u8>().prop_map(Value::U8).boxed(),
        TypeShape::S16 => any::<i16>().prop_map(Value::S16).boxed(),
        TypeShape::U16 => any::<u16>().prop_map(Value::U16).boxed(),
        TypeShape::S32 => any::<i32>().prop_map(Value::S32).boxed(),
        TypeShape::U32 => any::<u32>().prop_map(Value::U32).boxed(),
        TypeShape::S64 => any::<i64>().prop_map(Value::S64).boxed(),
        TypeShape::U64 => any::<u64>().prop_map(Value::U64).boxed(),
        TypeShape::F32 => (-1.0e6f32..1.0e6).prop_map(Value::F32).boxed(),
        TypeShape::F64 => (-1.0e12f64..1.0e12).prop_map(Value::F64).boxed(),
        TypeShape::Char => any::<char>().prop_map(Value::Char).boxed(),
        TypeShape::String => ".{0,12}".prop_map(Value::String).boxed(),
        TypeShape::Handle => any::<u32>().prop_map(Value::Handle).boxed(),
        TypeShape::List(element) => proptest::collection::vec(value_for(element), 0..4)
            .prop_map(Value::List)
            .boxed(),
        TypeShape::Array(element, len) => {
            proptest::collection::vec(value_for(element), *len as usize)
                .prop_map(Value::List)
                .boxed()
        }
        TypeShape::Record(fields) => {
            let names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
            fields
                .iter()
                .map(|f| value_for(&f.ty))
                .collect::<Vec<_>>()
                .prop_map(move |values| Value::Record(names.iter().cloned().zip(values).collect()))
                .boxed()
        }
        TypeShape::Tuple(types) => types
            .iter()
            .map(value_for)
            .collect::<Vec<_>>()
            .prop_map(Value::Tuple)
            .boxed(),
        TypeShape::Variant(cases) => {
            let choices: Vec<BoxedStrategy<Value>> = cases
                .iter()
                .map(|case| {
                    let name = case.name.clone();
                    payload(case.ty.as_ref())
                        .prop_map(move |p| Value::Variant(name.clone(), boxed(p)))
                        .boxed()
                })
                .collect();
            proptest::strategy::Union::new(choices).boxed()
        }
        TypeShape::Enum(cases) => proptest::sample::select(cases.clone())
            .prop_map(Value::Enum)
            .boxed(),
        TypeShape::Option(inner) => proptest::option::of(value_for(inner))
            .prop_map(|v| Value::Option(boxed(v)))
            .boxed(),
        TypeShape::Result { ok, err } => prop_oneof![
            payload(ok.as_deref()).prop_map(|v| Value::Result(Ok(boxed(v)))),
            payload(err.as_deref()).prop_map(|v| Value::Result(Err(boxed(v)))),
        ]
        .boxed(),
        TypeShape::Flags(all) => {
            let count = all.len();
            subsequence(all.clone(), 0..=count)
                .prop_map(Value::Flags)
                .boxed()
        }
    }
}

fn shape_and_value() -> impl Strategy<Value = (TypeShape, Value)> {
    shape().prop_flat_map(|shape| {
        let values = value_for(&shape);
        (Just(shape), values)
    })
}

fn check_alignment(layout: &TypeLayout) -> Result<(), TestCaseError> {
    prop_assert!(layout.align.is_power_of_two() || layout.size == 0);
    if layout.align > 0 {
        prop_assert_eq!(layout.size % layout.align, 0);
    }
    match &layout.kind {
        LayoutKind::Record(fields) | LayoutKind::Tuple(fields) => {
            for field in fields {
                prop_assert_eq!(field.offset % field.layout.align.max(1), 0);
                prop_assert!(field.offset + field.layout.size <= layout.size);
                check_alignment(&field.layout)?;
            }
        }
        LayoutKind::Variant(variant) => {
            prop_assert_eq!(layout.flat.len(), 1 + variant.payload_flat.len());
            for case in &variant.cases {
                if let Some(payload) = &case.payload {
                    prop_assert!(payload.flat.len() <= variant.payload_flat.len());
                    prop_assert!(variant.payload_offset + payload.size <= layout.size);
                    check_alignment(payload)?;
                }
            }
        }
        LayoutKind::List(element) | LayoutKind::Array { element, .. } => {
            prop_assert_eq!(element.stride % element.layout.align.max(1), 0);
            check_alignment(&element.layout)?;
        }
        LayoutKind::Scalar(_) | LayoutKind::String | LayoutKind::Flags(_) => {}
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn lift_then_lower_roundtrips((shape, value) in shape_and_value()) {
        let abi = CanonicalAbi::new();
        let mut memory = LinearMemory::new();

        let ptr = abi.lift(&mut memory, &value, &shape).unwrap();
        let lowered = abi.lower(memory.as_bytes(), ptr, &shape).unwrap();

        prop_assert_eq!(lowered, value);
    }

    #[test]
    fn flatten_then_unflatten_roundtrips((shape, value) in shape_and_value()) {
        let abi = CanonicalAbi::new();
        let mut memory = LinearMemory::new();

        let flat = abi.flatten(&mut memory, &value, &shape).unwrap();
        prop_assert_eq!(flat.len(), abi.flat_types(&shape).unwrap().len());

        let rebuilt = abi.unflatten(memory.as_bytes(), &flat, &shape).unwrap();
        prop_assert_eq!(rebuilt, value);
    }

    #[test]
    fn layouts_are_aligned_and_stable(shape in shape()) {
        let abi = CanonicalAbi::new();
        let first = abi.layout(&shape).unwrap();
        check_alignment(&first)?;

        let fresh = CanonicalAbi::new().layout(&shape).unwrap();
        prop_assert_eq!(&*first, &*fresh);
    }

    #[test]
    fn lifted_slot_respects_alignment((shape, value) in shape_and_value()) {
        let abi = CanonicalAbi::new();
        let mut memory = LinearMemory::from_bytes(vec![0xaa; 3]);
        let layout = abi.layout(&shape).unwrap();

        let ptr = abi.lift(&mut memory, &value, &shape).unwrap();
        prop_assert_eq!(ptr % layout.align.max(1), 0);
    }
}
