//! Codec integration tests against simulated linear memory.

use wit_bridge::abi::FlatType;
use wit_bridge::{
    CanonicalAbi, CanonicalAbiError, LinearMemory, ReturnStrategy, Signature, TypeShape, Value,
    WitType,
};

wit_bridge::wit_enum! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Unit { Celsius, Kelvin }
}

wit_bridge::wit_flags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    pub struct Status { calibrated, degraded }
}

wit_bridge::wit_record! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Sample {
        pub at: u64,
        pub reading: Option<Result<f32, String>>,
    }
}

wit_bridge::wit_record! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Sensor {
        pub name: String,
        pub unit: Unit,
        pub status: Status,
        pub samples: Vec<Sample>,
        pub tags: Vec<(String, char)>,
    }
}

fn sensor() -> Sensor {
    Sensor {
        name: "boiler-2".to_string(),
        unit: Unit::Kelvin,
        status: Status {
            degraded: true,
            ..Default::default()
        },
        samples: vec![
            Sample {
                at: 1,
                reading: Some(Ok(273.5)),
            },
            Sample {
                at: u64::MAX,
                reading: Some(Err("sensor offline".to_string())),
            },
            Sample {
                at: 3,
                reading: None,
            },
        ],
        tags: vec![("zone".to_string(), 'ß'), (String::new(), '🦀')],
    }
}

#[test]
fn nested_records_roundtrip_through_memory() {
    let abi = CanonicalAbi::new();
    let mut memory = LinearMemory::new();

    let ptr = abi.lift_typed(&mut memory, sensor()).unwrap();
    let back: Sensor = abi.lower_typed(memory.as_bytes(), ptr).unwrap();

    assert_eq!(back, sensor());
}

#[test]
fn nested_records_roundtrip_through_scalars() {
    let abi = CanonicalAbi::new();
    let mut memory = LinearMemory::new();
    let shape = Sensor::shape();

    let flat = abi
        .flatten(&mut memory, &sensor().into_value(), &shape)
        .unwrap();
    let value = abi.unflatten(memory.as_bytes(), &flat, &shape).unwrap();

    assert_eq!(Sensor::from_value(value).unwrap(), sensor());
}

#[test]
fn variant_payloads_share_a_common_width() {
    let abi = CanonicalAbi::new();
    let u32s = |n: usize| TypeShape::tuple(std::iter::repeat_n(TypeShape::U32, n));
    let shape = TypeShape::variant([
        ("two", Some(u32s(2))),
        ("none", None),
        ("five", Some(u32s(5))),
    ]);

    assert_eq!(abi.flat_types(&shape).unwrap(), vec![FlatType::I32; 6]);

    let mut memory = LinearMemory::new();
    let flat = abi
        .flatten(&mut memory, &Value::Variant("none".to_string(), None), &shape)
        .unwrap();
    assert_eq!(flat, vec![1, 0, 0, 0, 0, 0]);

    let two = Value::Variant(
        "two".to_string(),
        Some(Box::new(Value::Tuple(vec![Value::U32(7), Value::U32(8)]))),
    );
    let flat = abi.flatten(&mut memory, &two, &shape).unwrap();
    assert_eq!(flat, vec![0, 7, 8, 0, 0, 0]);
    assert_eq!(abi.unflatten(&[], &flat, &shape).unwrap(), two);
}

#[test]
fn mixed_payloads_widen_to_a_shared_slot() {
    let abi = CanonicalAbi::new();
    let shape = TypeShape::variant([("f", Some(TypeShape::F32)), ("i", Some(TypeShape::U64))]);
    assert_eq!(
        abi.flat_types(&shape).unwrap(),
        vec![FlatType::I32, FlatType::F64]
    );

    let value = Value::Variant("f".to_string(), Some(Box::new(Value::F32(-1.25))));
    let flat = abi.flatten(&mut LinearMemory::new(), &value, &shape).unwrap();
    assert_eq!(flat, vec![0, u64::from((-1.25f32).to_bits())]);
    assert_eq!(abi.unflatten(&[], &flat, &shape).unwrap(), value);
}

#[test]
fn return_strategies() {
    let abi = CanonicalAbi::new();
    let strategy = |results: Vec<TypeShape>| {
        abi.plan(&Signature::new([], results))
            .unwrap()
            .strategy
            .clone()
    };

    assert_eq!(strategy(vec![]), ReturnStrategy::None);
    assert_eq!(
        strategy(vec![TypeShape::U32]),
        ReturnStrategy::Direct(vec![FlatType::I32])
    );
    assert_eq!(strategy(vec![TypeShape::String]), ReturnStrategy::Indirect);
    assert_eq!(
        strategy(vec![TypeShape::U32, TypeShape::U32]),
        ReturnStrategy::Direct(vec![FlatType::I32, FlatType::I32])
    );
    assert_eq!(
        strategy(vec![TypeShape::record([
            ("a", TypeShape::U32),
            ("b", TypeShape::U32)
        ])]),
        ReturnStrategy::Indirect
    );
    assert_eq!(
        strategy(vec![TypeShape::U32, TypeShape::U32, TypeShape::U32]),
        ReturnStrategy::Indirect
    );
}

#[test]
fn indirect_plan_appends_return_pointer() {
    let abi = CanonicalAbi::new();
    let plan = abi
        .plan(&Signature::new(
            [TypeShape::String],
            [TypeShape::list(TypeShape::U8)],
        ))
        .unwrap();

    assert_eq!(plan.core_params(), vec![FlatType::I32; 3]);
    assert!(plan.core_results().is_empty());
    let area = plan.result_area.as_ref().unwrap();
    assert_eq!((area.size, area.align), (8, 4));
}

#[test]
fn out_of_bounds_reads_are_boundary_violations() {
    let abi = CanonicalAbi::new();
    let memory = vec![0u8; 8];

    let err = abi.lower(&memory, 6, &TypeShape::U64).unwrap_err();
    assert!(err.is_boundary_violation());

    // A string header pointing past the end of memory.
    let mut header = LinearMemory::new();
    let pair = TypeShape::tuple([TypeShape::U32, TypeShape::U32]);
    let ptr = abi
        .lift(
            &mut header,
            &Value::Tuple(vec![Value::U32(1_000), Value::U32(4)]),
            &pair,
        )
        .unwrap();
    let err = abi
        .lower(header.as_bytes(), ptr, &TypeShape::String)
        .unwrap_err();
    assert!(err.is_boundary_violation());
}

#[test]
fn bad_discriminant_is_rejected() {
    let abi = CanonicalAbi::new();
    let shape = TypeShape::enumeration(["a", "b"]);
    let err = abi.lower(&[5], 0, &shape).unwrap_err();
    assert!(matches!(err, CanonicalAbiError::InvalidDiscriminant { .. }));
}

#[test]
fn too_many_flags_fail_registration() {
    let abi = CanonicalAbi::new();
    let shape = TypeShape::flags((0..33).map(|i| format!("f{i}")));
    let err = abi.layout(&shape).unwrap_err();
    assert!(!err.is_boundary_violation());
}
