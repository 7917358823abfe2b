//! Host-to-guest calls.
//!
//! [`GuestInstance`] wraps an instantiated core module together with its
//! memory and allocator, and calls its exports through the same codec the
//! trampolines use, in the other direction.

use std::sync::Arc;

use wasmtime::{AsContextMut, Func, Instance, Memory, Val, ValType};

use super::alloc::GuestAllocator;
use super::export::into_area_value;
use super::func::{WasmGuest, is_flat, val_bits, val_from_bits, val_type};
use super::WasmError;
use crate::abi::{
    flatten, lift, lower, CallPlan, CanonicalAbi, FlatCursor, ReturnStrategy, Signature,
    TypeShape, Value, WitType,
};
use crate::config::HostConfig;
use crate::logging::{debug, trace};

/// How a guest export receives its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamPassing {
    /// One core parameter per flat scalar.
    Flat,
    /// A single pointer to the parameters lifted into guest memory.
    Spilled,
}

/// How a guest export hands back an indirect result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultPassing {
    None,
    Direct,
    /// The guest returns a pointer to its own result area.
    ReturnedPointer,
    /// The host allocates the area and passes its pointer as the last
    /// parameter.
    OutPointer,
}

/// An instantiated guest module ready to be called with structured values.
#[derive(Debug, Clone)]
pub struct GuestInstance {
    instance: Instance,
    memory: Memory,
    allocator: GuestAllocator,
    abi: Arc<CanonicalAbi>,
}

impl GuestInstance {
    /// Locate the memory and allocator exports of `instance`.
    ///
    /// Fails if either is missing or has the wrong signature.
    pub fn new(
        mut store: impl AsContextMut,
        instance: Instance,
        abi: Arc<CanonicalAbi>,
        config: &HostConfig,
    ) -> Result<Self, WasmError> {
        let memory = instance
            .get_memory(&mut store, &config.memory_export)
            .ok_or_else(|| WasmError::MemoryNotFound(config.memory_export.clone()))?;
        let allocator = GuestAllocator::from_instance(&mut store, &instance, config.allocator)?;
        Ok(Self {
            instance,
            memory,
            allocator,
            abi,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn memory(&self) -> Memory {
        self.memory
    }

    pub fn allocator(&self) -> &GuestAllocator {
        &self.allocator
    }

    pub fn abi(&self) -> &Arc<CanonicalAbi> {
        &self.abi
    }

    /// Call export `name` with `args`, returning one value per declared result.
    ///
    /// The core signature of the export decides the calling style: flat or
    /// spilled parameters, and for indirect results either a returned
    /// pointer or a host-allocated out pointer. If the guest exports
    /// `cabi_post_<name>`, it is called afterwards with the core results.
    pub fn call(
        &self,
        mut store: impl AsContextMut,
        name: &str,
        signature: &Signature,
        args: &[Value],
    ) -> Result<Vec<Value>, WasmError> {
        if args.len() != signature.params.len() {
            return Err(WasmError::ArgumentCount {
                name: name.to_string(),
                expected: signature.params.len(),
                actual: args.len(),
            });
        }
        let plan = self.abi.plan(signature)?;
        let func = self
            .instance
            .get_func(&mut store, name)
            .ok_or_else(|| WasmError::FunctionNotFound(name.to_string()))?;
        let ty = func.ty(&store);
        let core_params: Vec<ValType> = ty.params().collect();
        let core_results: Vec<ValType> = ty.results().collect();
        let (params_style, results_style) = classify(name, &plan, &core_params, &core_results)?;
        debug!(name, ?params_style, ?results_style, "calling guest export");

        let mut bits = self.pass_params(&mut store, &plan, params_style, args)?;
        let out_area = match (results_style, &plan.result_area) {
            (ResultPassing::OutPointer, Some(area)) => {
                let ptr = self.allocator.allocate(&mut store, area.size, area.align)?;
                bits.push(u64::from(ptr));
                Some(ptr)
            }
            _ => None,
        };

        let params = core_params
            .iter()
            .zip(&bits)
            .map(|(ty, bits)| val_from_bits(ty, *bits))
            .collect::<Result<Vec<_>, _>>()?;
        let mut results: Vec<Val> = core_results.iter().map(default_val).collect();
        func.call(&mut store, &params, &mut results)
            .map_err(|e| WasmError::Trap(format!("{name}: {e:#}")))?;
        trace!(name, results = results.len(), "guest export returned");

        let values = self.take_results(&store, &plan, results_style, out_area, &results)?;
        self.post_return(&mut store, name, &results)?;
        Ok(values)
    }

    /// Typed counterpart of [`call`](Self::call).
    ///
    /// `P` is the argument list as a tuple (`()` for none, `(x,)` for one);
    /// `R` is the single result, or `()` for none.
    pub fn call_typed<P: WitType, R: WitType>(
        &self,
        store: impl AsContextMut,
        name: &str,
        args: P,
    ) -> Result<R, WasmError> {
        let params = match self.abi.shape_of::<P>() {
            TypeShape::Tuple(params) => params,
            other => vec![other],
        };
        let args = match args.into_value() {
            Value::Tuple(args) if params.len() == args.len() => args,
            other => vec![other],
        };
        let signature = Signature::new(params, R::payload_shape());
        let values = self.call(store, name, &signature, &args)?;
        Ok(R::from_payload(values.into_iter().next())?)
    }

    /// Lift `value` into a freshly allocated slot in guest memory.
    pub fn lift(
        &self,
        mut store: impl AsContextMut,
        value: &Value,
        shape: &TypeShape,
    ) -> Result<u32, WasmError> {
        let mut guest = WasmGuest::new(&mut store, self.memory, self.allocator.clone());
        Ok(self.abi.lift(&mut guest, value, shape)?)
    }

    /// Lower the value of `shape` stored at `ptr`.
    pub fn lower(
        &self,
        store: impl wasmtime::AsContext,
        ptr: u32,
        shape: &TypeShape,
    ) -> Result<Value, WasmError> {
        Ok(self.abi.lower(self.memory.data(&store), ptr, shape)?)
    }

    /// Release a block obtained from the guest allocator.
    pub fn free(
        &self,
        store: impl AsContextMut,
        ptr: u32,
        size: u32,
        align: u32,
    ) -> Result<(), WasmError> {
        self.allocator.free(store, ptr, size, align)
    }

    fn pass_params(
        &self,
        mut store: impl AsContextMut,
        plan: &CallPlan,
        style: ParamPassing,
        args: &[Value],
    ) -> Result<Vec<u64>, WasmError> {
        let mut guest = WasmGuest::new(&mut store, self.memory, self.allocator.clone());
        match style {
            ParamPassing::Flat => {
                let mut bits = Vec::with_capacity(plan.flat_params.len() + 1);
                for (arg, layout) in args.iter().zip(&plan.params) {
                    flatten::flatten(&mut guest, arg, layout, &mut bits)?;
                }
                Ok(bits)
            }
            ParamPassing::Spilled => {
                let shape = match plan.signature.params.as_slice() {
                    [single] => single.clone(),
                    many => TypeShape::Tuple(many.to_vec()),
                };
                let value = into_area_value(args.to_vec());
                let layout = self.abi.layout(&shape)?;
                Ok(vec![u64::from(lift::lift(&mut guest, &value, &layout)?)])
            }
        }
    }

    fn take_results(
        &self,
        store: impl wasmtime::AsContext,
        plan: &CallPlan,
        style: ResultPassing,
        out_area: Option<u32>,
        results: &[Val],
    ) -> Result<Vec<Value>, WasmError> {
        let memory = self.memory.data(&store);
        match style {
            ResultPassing::None => Ok(Vec::new()),
            ResultPassing::Direct => {
                let bits = results.iter().map(val_bits).collect::<Result<Vec<_>, _>>()?;
                let mut cursor = FlatCursor::new(&bits);
                Ok(plan
                    .results
                    .iter()
                    .map(|layout| flatten::unflatten(memory, &mut cursor, layout))
                    .collect::<Result<Vec<_>, _>>()?)
            }
            ResultPassing::ReturnedPointer | ResultPassing::OutPointer => {
                let ptr = match (style, out_area) {
                    (ResultPassing::OutPointer, Some(ptr)) => ptr,
                    _ => {
                        let first = results.first().ok_or_else(|| WasmError::Trap(
                            "indirect result pointer missing".to_string(),
                        ))?;
                        val_bits(first)? as u32
                    }
                };
                let area = plan.result_area.as_ref().ok_or_else(|| {
                    WasmError::Trap(format!("no result area for {}", plan.signature))
                })?;
                let value = lower::lower(memory, ptr, area)?;
                Ok(match (plan.signature.results.len(), value) {
                    (1, value) => vec![value],
                    (_, Value::Tuple(values)) => values,
                    (_, other) => vec![other],
                })
            }
        }
    }

    fn post_return(
        &self,
        mut store: impl AsContextMut,
        name: &str,
        results: &[Val],
    ) -> Result<(), WasmError> {
        let post: Option<Func> = self
            .instance
            .get_func(&mut store, &format!("cabi_post_{name}"));
        if let Some(post) = post {
            post.call(&mut store, results, &mut [])
                .map_err(|e| WasmError::Trap(format!("cabi_post_{name}: {e:#}")))?;
        }
        Ok(())
    }
}

fn default_val(ty: &ValType) -> Val {
    match ty {
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        _ => Val::I32(0),
    }
}

fn describe(types: &[ValType]) -> String {
    let names: Vec<String> = types.iter().map(ToString::to_string).collect();
    format!("({})", names.join(", "))
}

/// Match a planned call against the export's actual core signature.
fn classify(
    name: &str,
    plan: &CallPlan,
    core_params: &[ValType],
    core_results: &[ValType],
) -> Result<(ParamPassing, ResultPassing), WasmError> {
    let mismatch = || WasmError::InvalidSignature {
        name: name.to_string(),
        expected: format!(
            "{} -> {}",
            describe(&plan.core_params().into_iter().map(val_type).collect::<Vec<_>>()),
            describe(&plan.core_results().into_iter().map(val_type).collect::<Vec<_>>()),
        ),
        actual: format!("{} -> {}", describe(core_params), describe(core_results)),
    };

    let results = match &plan.strategy {
        ReturnStrategy::None if core_results.is_empty() => ResultPassing::None,
        ReturnStrategy::Direct(flat)
            if core_results.len() == flat.len()
                && core_results.iter().zip(flat).all(|(ty, f)| is_flat(ty, *f)) =>
        {
            ResultPassing::Direct
        }
        ReturnStrategy::Indirect => match core_results {
            [ValType::I32] => ResultPassing::ReturnedPointer,
            [] => ResultPassing::OutPointer,
            _ => return Err(mismatch()),
        },
        _ => return Err(mismatch()),
    };

    let param_slots = match results {
        ResultPassing::OutPointer => core_params.len().checked_sub(1).ok_or_else(mismatch)?,
        _ => core_params.len(),
    };
    let params = if param_slots == plan.flat_params.len()
        && core_params
            .iter()
            .zip(&plan.flat_params)
            .all(|(ty, f)| is_flat(ty, *f))
    {
        ParamPassing::Flat
    } else if param_slots == 1
        && plan.flat_params.len() > 1
        && core_params.first().is_some_and(|ty| matches!(ty, ValType::I32))
    {
        ParamPassing::Spilled
    } else {
        return Err(mismatch());
    };
    Ok((params, results))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(params: Vec<TypeShape>, results: Vec<TypeShape>) -> Arc<CallPlan> {
        CanonicalAbi::new()
            .plan(&Signature::new(params, results))
            .unwrap()
    }

    #[test]
    fn flat_params_and_direct_result() {
        let p = plan(vec![TypeShape::U32, TypeShape::F64], vec![TypeShape::U64]);
        let styles = classify("f", &p, &[ValType::I32, ValType::F64], &[ValType::I64]).unwrap();
        assert_eq!(styles, (ParamPassing::Flat, ResultPassing::Direct));
    }

    #[test]
    fn indirect_results_either_style() {
        let p = plan(vec![TypeShape::String], vec![TypeShape::String]);
        let returned = classify("f", &p, &[ValType::I32, ValType::I32], &[ValType::I32]).unwrap();
        assert_eq!(returned, (ParamPassing::Flat, ResultPassing::ReturnedPointer));
        let out = classify("f", &p, &[ValType::I32, ValType::I32, ValType::I32], &[]).unwrap();
        assert_eq!(out, (ParamPassing::Flat, ResultPassing::OutPointer));
    }

    #[test]
    fn single_record_parameter_may_be_spilled() {
        let record = TypeShape::record([("a", TypeShape::U32), ("b", TypeShape::String)]);
        let p = plan(vec![record], vec![]);
        let styles = classify("f", &p, &[ValType::I32], &[]).unwrap();
        assert_eq!(styles, (ParamPassing::Spilled, ResultPassing::None));
    }

    #[test]
    fn mismatched_core_signature_is_rejected() {
        let p = plan(vec![TypeShape::U64], vec![TypeShape::U32]);
        let err = classify("f", &p, &[ValType::I32, ValType::I32], &[ValType::I32]).unwrap_err();
        assert!(matches!(err, WasmError::InvalidSignature { .. }));
    }
}
