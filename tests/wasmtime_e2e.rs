//! End-to-end tests running WAT guests under wasmtime.
//!
//! Values cross the boundary in both directions: guests call host functions
//! registered through [`Exporter`], and the host calls guest exports through
//! [`GuestInstance`].

#![cfg(feature = "wasm")]

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{Harness, calling_styles_guest};
use wit_bridge::wasm::Exporter;
use wit_bridge::{Signature, TypeShape, Value, WitType};

wit_bridge::wit_record! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Report {
        pub label: String,
        pub total: u32,
    }
}

wit_bridge::wit_record! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Point {
        pub x: u32,
        pub y: u32,
    }
}

fn describe(name: String, count: u32) -> Report {
    Report {
        label: format!("{name}!{count}"),
        total: count * 10,
    }
}

fn register_describe(
    exporter: &Exporter,
    linker: &mut wasmtime::Linker<wit_bridge::GuestContext>,
) -> anyhow::Result<()> {
    exporter.export(linker, "describe", describe)?;
    Ok(())
}

#[test]
fn guest_receives_indirect_record_from_host() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let report: Report = h.guest.call_typed(&mut h.store, "run", ()).unwrap();

    assert_eq!(
        report,
        Report {
            label: "hello!3".to_string(),
            total: 30,
        }
    );
    // The label was lifted through the guest's own allocator.
    let memory = h.guest.memory();
    let bytes = memory.data(&h.store);
    let label_ptr = bytes
        .get(256..260)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .unwrap();
    assert!(label_ptr >= 1024);
}

#[test]
fn host_function_observes_guest_string() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let mut h = Harness::new(&calling_styles_guest(), move |exporter, linker| {
        exporter.export(linker, "describe", move |name: String, count: u32| {
            log.lock().unwrap().push(name.clone());
            Report {
                label: name,
                total: count,
            }
        })?;
        Ok(())
    })
    .unwrap();

    let report: Report = h.guest.call_typed(&mut h.store, "run", ()).unwrap();
    assert_eq!(report.label, "hello");
    assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
}

#[test]
fn returned_pointer_string_roundtrip_and_post_return() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let echoed: String = h
        .guest
        .call_typed(&mut h.store, "echo", ("hi there, guest".to_string(),))
        .unwrap();
    assert_eq!(echoed, "hi there, guest");
    assert_eq!(h.global_i32("post-calls"), Some(1));
}

#[test]
fn flat_string_argument_with_direct_result() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let len: u32 = h
        .guest
        .call_typed(&mut h.store, "count-bytes", ("héllo".to_string(),))
        .unwrap();
    assert_eq!(len, 6);
}

#[test]
fn empty_string_argument_skips_allocation() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let len: u32 = h
        .guest
        .call_typed(&mut h.store, "count-bytes", (String::new(),))
        .unwrap();
    assert_eq!(len, 0);
}

#[test]
fn out_pointer_result_is_allocated_by_host() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let pair = TypeShape::record([("a", TypeShape::U32), ("b", TypeShape::U32)]);
    let signature = Signature::new([TypeShape::U32], [pair]);
    let results = h
        .guest
        .call(&mut h.store, "make-pair", &signature, &[Value::U32(21)])
        .unwrap();

    assert_eq!(
        results,
        vec![Value::Record(vec![
            ("a".to_string(), Value::U32(21)),
            ("b".to_string(), Value::U32(42)),
        ])]
    );
}

#[test]
fn single_record_param_can_be_spilled() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let total: u32 = h
        .guest
        .call_typed(&mut h.store, "sum-point", (Point { x: 3, y: 4 },))
        .unwrap();
    assert_eq!(total, 7);
}

#[test]
fn signature_mismatch_is_reported() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let signature = Signature::new([TypeShape::U64], [TypeShape::U32]);
    let err = h
        .guest
        .call(&mut h.store, "count-bytes", &signature, &[Value::U64(1)])
        .unwrap_err();
    assert!(matches!(err, wit_bridge::WasmError::InvalidSignature { .. }));
}

#[test]
fn missing_export_is_reported() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let err = h
        .guest
        .call_typed::<(), u32>(&mut h.store, "nope", ())
        .unwrap_err();
    assert!(matches!(err, wit_bridge::WasmError::FunctionNotFound(_)));
}

#[test]
fn guest_lift_and_lower_share_memory() {
    let mut h = Harness::new(&calling_styles_guest(), register_describe).unwrap();

    let report = Report {
        label: "stored".to_string(),
        total: 5,
    };
    let shape = Report::shape();
    let ptr = h
        .guest
        .lift(&mut h.store, &report.clone().into_value(), &shape)
        .unwrap();
    assert!(ptr >= 1024);

    let value = h.guest.lower(&h.store, ptr, &shape).unwrap();
    assert_eq!(Report::from_value(value).unwrap(), report);
}

#[test]
fn stateful_host_function_receives_store_data() {
    static CALLS: AtomicU32 = AtomicU32::new(0);

    let wat = format!(
        r#"(module
  (import "$root" "bump" (func $bump (param i32) (result i32)))
  {}
  (func (export "twice") (param $v i32) (result i32)
    (call $bump (call $bump (local.get $v))))
)"#,
        common::BUMP_ALLOCATOR
    );
    let mut h = Harness::new(&wat, |exporter, linker| {
        exporter.export_stateful(
            linker,
            "bump",
            |_ctx: &mut wit_bridge::GuestContext, v: u32| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                v + 1
            },
        )?;
        Ok(())
    })
    .unwrap();

    let result: u32 = h.guest.call_typed(&mut h.store, "twice", (40u32,)).unwrap();
    assert_eq!(result, 42);
    assert_eq!(CALLS.load(Ordering::SeqCst), 2);
}

#[test]
fn dynamic_host_function_traps_on_error() {
    let wat = format!(
        r#"(module
  (import "$root" "fail" (func $fail (param i32 i32)))
  {}
  (data (i32.const 16) "boom")
  (func (export "go") (call $fail (i32.const 16) (i32.const 4)))
)"#,
        common::BUMP_ALLOCATOR
    );
    let mut h = Harness::new(&wat, |exporter, linker| {
        exporter.export_dynamic(
            linker,
            "fail",
            Signature::new([TypeShape::String], []),
            |_ctx: &mut wit_bridge::GuestContext, args: Vec<Value>| {
                anyhow::bail!("refused {:?}", args.first())
            },
        )?;
        Ok(())
    })
    .unwrap();

    let err = h
        .guest
        .call(&mut h.store, "go", &Signature::new([], []), &[])
        .unwrap_err();
    assert!(err.is_trap());
}

#[test]
fn repeated_export_reuses_trampoline() {
    let h = Harness::new(&calling_styles_guest(), |exporter, linker| {
        exporter.export(linker, "describe", describe)?;
        linker.allow_shadowing(true);
        exporter.export(linker, "describe", describe)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(h.exporter.cached_trampolines(), 1);
}
