//! Canonical ABI marshaling for WIT values.
//!
//! This module converts host [`Value`]s to and from their canonical ABI
//! representation: byte layouts in guest linear memory, and the flat scalar
//! sequences used as core call arguments and results.
//!
//! # Module Organization
//!
//! - [`error`]: Error types for ABI operations
//! - [`shape`]: Structural type shapes, the input to every other step
//! - [`typed`]: The [`WitType`] trait mapping Rust types to shapes
//! - [`layout`]: Size, alignment and field offsets per shape
//! - [`memory`]: The [`GuestMemory`] seam and simulated linear memory
//! - [`lift`] / [`lower`]: Values into and out of guest memory
//! - [`flat`] / [`flatten`]: Flat scalar shapes and the call codec
//! - [`signature`]: Function signatures and return-strategy selection
//! - [`wave`]: WAVE text conversion
//!
//! All entry points go through a [`CanonicalAbi`] registry, which memoizes
//! layouts and call plans so each shape is analysed once.

mod buffer;
mod error;
pub mod flat;
pub mod flatten;
pub mod layout;
pub mod lift;
pub mod lower;
pub mod memory;
pub mod shape;
pub mod signature;
pub mod typed;
mod value;
pub mod wave;
mod wit;

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use error::CanonicalAbiError;
pub use flat::FlatType;
pub use flatten::FlatCursor;
pub use layout::{LayoutKind, TypeLayout};
pub use memory::{GuestMemory, LinearMemory};
pub use shape::{Case, Field, SumKind, TypeShape};
pub use signature::{CallPlan, ReturnStrategy, Signature};
pub use typed::{WitType, kebab_case};
#[doc(hidden)]
pub use typed::{expect_enum, expect_flags, expect_record, take_field, unknown_case};
pub use value::Value;

use crate::logging::{debug, trace};

/// Memoizing registry for layouts, type shapes and call plans.
///
/// One registry is shared (usually behind an `Arc`) by everything that talks
/// to guests of one host. Entries are computed outside the lock and inserted
/// first-writer-wins, so racing threads may both compute a layout but all of
/// them observe the same cached `Arc`. Nothing is ever evicted.
///
/// # Example
///
/// ```ignore
/// use wit_bridge::abi::{CanonicalAbi, LinearMemory, TypeShape, Value};
///
/// let abi = CanonicalAbi::new();
/// let shape = TypeShape::record([("x", TypeShape::U32), ("name", TypeShape::String)]);
/// let mut mem = LinearMemory::new();
///
/// let ptr = abi.lift(&mut mem, &value, &shape)?;
/// let back = abi.lower(&mem, ptr, &shape)?;
/// ```
#[derive(Debug, Default)]
pub struct CanonicalAbi {
    layouts: RwLock<HashMap<TypeShape, Arc<TypeLayout>>>,
    plans: RwLock<HashMap<Signature, Arc<CallPlan>>>,
    shapes: RwLock<HashMap<TypeId, TypeShape>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl CanonicalAbi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout of `shape`, computed on first use.
    ///
    /// Nested shapes are cached too, so a record used as a field of many
    /// other types is only laid out once. Unsupported shapes fail here.
    pub fn layout(&self, shape: &TypeShape) -> Result<Arc<TypeLayout>, CanonicalAbiError> {
        if let Some(layout) = read(&self.layouts).get(shape) {
            return Ok(Arc::clone(layout));
        }
        let layout = Arc::new(layout::compute(shape, &mut |child| self.layout(child))?);
        debug!(
            shape = %shape,
            size = layout.size,
            align = layout.align,
            flat = layout.flat.len(),
            "computed layout"
        );
        Ok(Arc::clone(
            write(&self.layouts).entry(shape.clone()).or_insert(layout),
        ))
    }

    /// Flat scalar shape of `shape`.
    pub fn flat_types(&self, shape: &TypeShape) -> Result<Vec<FlatType>, CanonicalAbiError> {
        Ok(self.layout(shape)?.flat.clone())
    }

    /// Shape of a Rust type, derived once per `TypeId`.
    pub fn shape_of<T: WitType>(&self) -> TypeShape {
        let id = TypeId::of::<T>();
        if let Some(shape) = read(&self.shapes).get(&id) {
            return shape.clone();
        }
        let shape = T::shape();
        write(&self.shapes).entry(id).or_insert(shape).clone()
    }

    pub fn layout_of<T: WitType>(&self) -> Result<Arc<TypeLayout>, CanonicalAbiError> {
        self.layout(&self.shape_of::<T>())
    }

    /// Call plan for a signature: parameter and result layouts, flattened
    /// parameters and the return strategy.
    pub fn plan(&self, signature: &Signature) -> Result<Arc<CallPlan>, CanonicalAbiError> {
        if let Some(plan) = read(&self.plans).get(signature) {
            return Ok(Arc::clone(plan));
        }
        let layouts = |shapes: &[TypeShape]| {
            shapes
                .iter()
                .map(|s| self.layout(s))
                .collect::<Result<Vec<_>, _>>()
        };
        let params = layouts(&signature.params)?;
        let results = layouts(&signature.results)?;
        let strategy = ReturnStrategy::select(&signature.results, &results);
        let result_area = match (&strategy, signature.result_area_shape()) {
            (ReturnStrategy::Indirect, Some(area)) => Some(self.layout(&area)?),
            _ => None,
        };
        let flat_params = params
            .iter()
            .flat_map(|l| l.flat.iter().copied())
            .collect();
        let plan = Arc::new(CallPlan {
            signature: signature.clone(),
            params,
            results,
            result_area,
            strategy,
            flat_params,
        });
        debug!(signature = %signature, strategy = ?plan.strategy, "planned call");
        Ok(Arc::clone(
            write(&self.plans)
                .entry(signature.clone())
                .or_insert(plan),
        ))
    }

    /// Allocate a slot in `mem` and lift `value` into it.
    pub fn lift<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        value: &Value,
        shape: &TypeShape,
    ) -> Result<u32, CanonicalAbiError> {
        let layout = self.layout(shape)?;
        let ptr = lift::lift(mem, value, &layout)?;
        trace!(ptr, size = layout.size, "lifted value");
        Ok(ptr)
    }

    /// Lift `value` into the caller-owned slot at `ptr`.
    pub fn lift_into<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        value: &Value,
        shape: &TypeShape,
        ptr: u32,
    ) -> Result<(), CanonicalAbiError> {
        let layout = self.layout(shape)?;
        lift::lift_into(mem, value, &layout, ptr)
    }

    /// Lower the value of `shape` stored at `ptr`.
    pub fn lower(
        &self,
        memory: &[u8],
        ptr: u32,
        shape: &TypeShape,
    ) -> Result<Value, CanonicalAbiError> {
        let layout = self.layout(shape)?;
        lower::lower(memory, ptr, &layout)
    }

    /// Flatten `value` into raw scalar bits, lifting strings and lists into
    /// `mem` along the way.
    pub fn flatten<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        value: &Value,
        shape: &TypeShape,
    ) -> Result<Vec<u64>, CanonicalAbiError> {
        let layout = self.layout(shape)?;
        let mut out = Vec::with_capacity(layout.flat.len());
        flatten::flatten(mem, value, &layout, &mut out)?;
        Ok(out)
    }

    /// Rebuild a value of `shape` from the front of `flat`.
    pub fn unflatten(
        &self,
        memory: &[u8],
        flat: &[u64],
        shape: &TypeShape,
    ) -> Result<Value, CanonicalAbiError> {
        let layout = self.layout(shape)?;
        let mut cursor = FlatCursor::new(flat);
        flatten::unflatten(memory, &mut cursor, &layout)
    }

    pub fn lift_typed<T: WitType, M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        value: T,
    ) -> Result<u32, CanonicalAbiError> {
        self.lift(mem, &value.into_value(), &self.shape_of::<T>())
    }

    pub fn lower_typed<T: WitType>(&self, memory: &[u8], ptr: u32) -> Result<T, CanonicalAbiError> {
        T::from_value(self.lower(memory, ptr, &self.shape_of::<T>())?)
    }

    /// Number of cached layouts, nested shapes included.
    pub fn cached_layouts(&self) -> usize {
        read(&self.layouts).len()
    }

    pub fn cached_plans(&self) -> usize {
        read(&self.plans).len()
    }
}
