//! Common test utilities and fixtures.
//!
//! Guests are written in WAT and compiled on the fly, so each test can see
//! exactly which core signatures and allocator exports a module has.

#![cfg(feature = "wasm")]
#![allow(dead_code)]

use std::sync::Arc;

use wasmtime::{Engine, Instance, Linker, Module, Store, Val};
use wit_bridge::wasm::{Exporter, GuestContext, GuestInstance};
use wit_bridge::{CanonicalAbi, HostConfig};

// =============================================================================
// Guest Modules
// =============================================================================

/// Bump allocator shared by the guests below. Heap starts at 1024, and
/// `cabi_realloc` to size 0 counts frees in the exported `frees` global.
pub const BUMP_ALLOCATOR: &str = r#"
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (global $frees (export "frees") (mut i32) (i32.const 0))
  (func (export "cabi_realloc")
    (param $old i32) (param $old_size i32) (param $align i32) (param $new_size i32)
    (result i32)
    (local $ptr i32)
    (if (i32.eqz (local.get $new_size))
      (then
        (global.set $frees (i32.add (global.get $frees) (i32.const 1)))
        (return (i32.const 0))))
    (local.set $ptr
      (i32.and
        (i32.add (global.get $heap) (i32.sub (local.get $align) (i32.const 1)))
        (i32.sub (i32.const 0) (local.get $align))))
    (global.set $heap (i32.add (local.get $ptr) (local.get $new_size)))
    (local.get $ptr))
"#;

/// A guest with exports covering every calling style the driver supports.
///
/// - `echo(s: string) -> string`: returns a pointer to a static result area.
/// - `count-bytes(s: string) -> u32`: flat params, direct result.
/// - `make-pair(a: u32) -> pair`: writes through a trailing out-pointer.
/// - `sum-point(p: point) -> u32`: takes the record through one pointer.
/// - `run() -> report`: calls the host's `describe` import.
pub fn calling_styles_guest() -> String {
    format!(
        r#"(module
  (import "$root" "describe" (func $describe (param i32 i32 i32 i32)))
  {BUMP_ALLOCATOR}
  (global $posts (export "post-calls") (mut i32) (i32.const 0))
  (data (i32.const 16) "hello")

  (func (export "echo") (param $p i32) (param $l i32) (result i32)
    (i32.store (i32.const 512) (local.get $p))
    (i32.store (i32.const 516) (local.get $l))
    (i32.const 512))
  (func (export "cabi_post_echo") (param i32)
    (global.set $posts (i32.add (global.get $posts) (i32.const 1))))

  (func (export "count-bytes") (param $p i32) (param $l i32) (result i32)
    (local.get $l))

  (func (export "make-pair") (param $a i32) (param $out i32)
    (i32.store (local.get $out) (local.get $a))
    (i32.store offset=4 (local.get $out) (i32.mul (local.get $a) (i32.const 2))))

  (func (export "sum-point") (param $p i32) (result i32)
    (i32.add (i32.load (local.get $p)) (i32.load offset=4 (local.get $p))))

  (func (export "run") (result i32)
    (call $describe (i32.const 16) (i32.const 5) (i32.const 3) (i32.const 256))
    (i32.const 256))
)"#
    )
}

// =============================================================================
// Setup Helpers
// =============================================================================

pub struct Harness {
    pub store: Store<GuestContext>,
    pub instance: Instance,
    pub guest: GuestInstance,
    pub exporter: Exporter,
}

impl Harness {
    /// Compile `wat`, let `register` add host imports, then instantiate.
    pub fn new(
        wat: &str,
        register: impl FnOnce(&Exporter, &mut Linker<GuestContext>) -> anyhow::Result<()>,
    ) -> anyhow::Result<Self> {
        let engine = Engine::default();
        let module = Module::new(&engine, wat::parse_str(wat)?)?;
        let abi = Arc::new(CanonicalAbi::new());
        let exporter = Exporter::with_config(Arc::clone(&abi), HostConfig::default());

        let mut linker = Linker::new(&engine);
        register(&exporter, &mut linker)?;

        let mut store = Store::new(&engine, GuestContext::new());
        let instance = linker.instantiate(&mut store, &module)?;
        let guest = GuestInstance::new(&mut store, instance, abi, exporter.config())?;
        Ok(Self {
            store,
            instance,
            guest,
            exporter,
        })
    }

    /// Read an exported `i32` global.
    pub fn global_i32(&mut self, name: &str) -> Option<i32> {
        let global = self.instance.get_global(&mut self.store, name)?;
        match global.get(&mut self.store) {
            Val::I32(v) => Some(v),
            _ => None,
        }
    }
}
