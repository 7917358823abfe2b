//! Host functions as guest imports.
//!
//! [`Exporter`] registers Rust functions on a wasmtime [`Linker`] under
//! their flattened core signature. The generated trampoline unflattens the
//! incoming scalars, calls the function and hands the result back either as
//! core results or through the guest's return pointer.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use wasmtime::{Caller, Extern, FuncType, Linker, Val};

use super::alloc::GuestAllocator;
use super::func::{WasmGuest, val_bits, val_from_bits, val_type};
use super::WasmError;
use crate::abi::{
    flatten, lift, CallPlan, CanonicalAbi, CanonicalAbiError, FlatCursor, LinearMemory,
    ReturnStrategy, Signature, Value, WitType,
};
use crate::config::{AllocatorProtocol, HostConfig};
use crate::logging::{error, info};

/// Per-store state the trampolines need.
///
/// The detected guest allocator is cached here on first use, so a store is
/// expected to host a single guest instance.
#[derive(Debug, Default)]
pub struct GuestContext {
    allocator: Option<GuestAllocator>,
}

impl GuestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocator(&self) -> Option<&GuestAllocator> {
        self.allocator.as_ref()
    }
}

/// Store data that carries a [`GuestContext`].
pub trait AbiState {
    fn guest_context(&mut self) -> &mut GuestContext;
}

impl AbiState for GuestContext {
    fn guest_context(&mut self) -> &mut GuestContext {
        self
    }
}

/// A Rust function callable from a guest.
///
/// Implemented for `Fn(A1, .., An) -> R` with up to six [`WitType`]
/// arguments. A `()` return means no results.
pub trait HostFunction<Marker>: Send + Sync + 'static {
    fn signature(abi: &CanonicalAbi) -> Signature;

    fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, CanonicalAbiError>;
}

/// A Rust function callable from a guest that also receives the store data.
///
/// Implemented for `Fn(&mut T, A1, .., An) -> R`.
pub trait StatefulHostFunction<T, Marker>: Send + Sync + 'static {
    fn signature(abi: &CanonicalAbi) -> Signature;

    fn invoke(&self, state: &mut T, args: Vec<Value>) -> Result<Vec<Value>, CanonicalAbiError>;
}

fn next_arg(args: &mut impl Iterator<Item = Value>) -> Result<Value, CanonicalAbiError> {
    args.next()
        .ok_or_else(|| CanonicalAbiError::mismatch("another argument", "end of arguments"))
}

macro_rules! host_function {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> HostFunction<fn($($arg,)*) -> R> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: WitType,
            $($arg: WitType,)*
        {
            fn signature(abi: &CanonicalAbi) -> Signature {
                Signature::new([$(abi.shape_of::<$arg>()),*], R::payload_shape())
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, CanonicalAbiError> {
                let mut args = args.into_iter();
                $(let $arg = $arg::from_value(next_arg(&mut args)?)?;)*
                Ok((self)($($arg),*).into_payload().into_iter().collect())
            }
        }

        impl<T, F, R, $($arg,)*> StatefulHostFunction<T, fn($($arg,)*) -> R> for F
        where
            F: Fn(&mut T, $($arg),*) -> R + Send + Sync + 'static,
            R: WitType,
            $($arg: WitType,)*
        {
            fn signature(abi: &CanonicalAbi) -> Signature {
                Signature::new([$(abi.shape_of::<$arg>()),*], R::payload_shape())
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, state: &mut T, args: Vec<Value>) -> Result<Vec<Value>, CanonicalAbiError> {
                let mut args = args.into_iter();
                $(let $arg = $arg::from_value(next_arg(&mut args)?)?;)*
                Ok((self)(state, $($arg),*).into_payload().into_iter().collect())
            }
        }
    };
}

host_function!();
host_function!(A1);
host_function!(A1, A2);
host_function!(A1, A2, A3);
host_function!(A1, A2, A3, A4);
host_function!(A1, A2, A3, A4, A5);
host_function!(A1, A2, A3, A4, A5, A6);

type Invoke<T> = Arc<dyn Fn(&mut T, Vec<Value>) -> Result<Vec<Value>, WasmError> + Send + Sync>;

type Trampoline<T> =
    dyn Fn(Caller<'_, T>, &[Val], &mut [Val]) -> Result<(), WasmError> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TrampolineKey {
    func: TypeId,
    state: TypeId,
    signature: Signature,
}

/// Registers host functions as guest imports.
///
/// Trampolines are cached per exporter. Only stateless functions (function
/// items and closures capturing nothing) are cached: every value of such a
/// type behaves the same, so registering one again under another name reuses
/// the trampoline built the first time.
pub struct Exporter {
    abi: Arc<CanonicalAbi>,
    config: HostConfig,
    trampolines: RwLock<HashMap<TrampolineKey, Box<dyn Any + Send + Sync>>>,
}

impl Exporter {
    pub fn new(abi: Arc<CanonicalAbi>) -> Self {
        Self::with_config(abi, HostConfig::default())
    }

    pub fn with_config(abi: Arc<CanonicalAbi>, config: HostConfig) -> Self {
        Self {
            abi,
            config,
            trampolines: RwLock::new(HashMap::new()),
        }
    }

    pub fn abi(&self) -> &Arc<CanonicalAbi> {
        &self.abi
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Register `func` as `name` in the configured import module.
    ///
    /// Unsupported argument or result types fail here rather than at call
    /// time.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let exporter = Exporter::new(Arc::new(CanonicalAbi::new()));
    /// exporter.export(&mut linker, "greet", |name: String| format!("hello {name}"))?;
    /// ```
    pub fn export<T, M, F>(&self, linker: &mut Linker<T>, name: &str, func: F) -> Result<(), WasmError>
    where
        T: AbiState + 'static,
        F: HostFunction<M>,
    {
        let signature = F::signature(&self.abi);
        let key = self.key::<T, F>(&signature);
        let invoke: Invoke<T> = Arc::new(
            move |_: &mut T, args: Vec<Value>| -> Result<Vec<Value>, WasmError> {
                Ok(func.invoke(args)?)
            },
        );
        self.register(linker, name, signature, key, invoke)
    }

    /// Register a function that also receives the store data.
    pub fn export_stateful<T, M, F>(
        &self,
        linker: &mut Linker<T>,
        name: &str,
        func: F,
    ) -> Result<(), WasmError>
    where
        T: AbiState + 'static,
        F: StatefulHostFunction<T, M>,
    {
        let signature = F::signature(&self.abi);
        let key = self.key::<T, F>(&signature);
        let invoke: Invoke<T> = Arc::new(
            move |state: &mut T, args: Vec<Value>| -> Result<Vec<Value>, WasmError> {
                Ok(func.invoke(state, args)?)
            },
        );
        self.register(linker, name, signature, key, invoke)
    }

    /// Register a function described by a runtime signature.
    ///
    /// `func` receives one value per parameter and must return one value per
    /// declared result. An `Err` traps the guest.
    pub fn export_dynamic<T, F>(
        &self,
        linker: &mut Linker<T>,
        name: &str,
        signature: Signature,
        func: F,
    ) -> Result<(), WasmError>
    where
        T: AbiState + 'static,
        F: Fn(&mut T, Vec<Value>) -> anyhow::Result<Vec<Value>> + Send + Sync + 'static,
    {
        let key = self.key::<T, F>(&signature);
        let invoke: Invoke<T> = Arc::new(
            move |state: &mut T, args: Vec<Value>| -> Result<Vec<Value>, WasmError> {
                func(state, args).map_err(|e| WasmError::Host(format!("{e:#}")))
            },
        );
        self.register(linker, name, signature, key, invoke)
    }

    /// Number of cached trampolines.
    pub fn cached_trampolines(&self) -> usize {
        self.trampolines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn key<T: 'static, F: 'static>(&self, signature: &Signature) -> Option<TrampolineKey> {
        (std::mem::size_of::<F>() == 0).then(|| TrampolineKey {
            func: TypeId::of::<F>(),
            state: TypeId::of::<T>(),
            signature: signature.clone(),
        })
    }

    fn register<T>(
        &self,
        linker: &mut Linker<T>,
        name: &str,
        signature: Signature,
        key: Option<TrampolineKey>,
        invoke: Invoke<T>,
    ) -> Result<(), WasmError>
    where
        T: AbiState + 'static,
    {
        let plan = self.abi.plan(&signature)?;
        let trampoline = match key {
            Some(key) => self.cached(key, || self.trampoline(Arc::clone(&plan), invoke)),
            None => self.trampoline(Arc::clone(&plan), invoke),
        };
        let ty = FuncType::new(
            linker.engine(),
            plan.core_params().into_iter().map(val_type),
            plan.core_results().into_iter().map(val_type),
        );
        info!(
            module = %self.config.import_module,
            name,
            signature = %signature,
            "registering host function"
        );
        let func_name = name.to_string();
        linker.func_new(
            &self.config.import_module,
            name,
            ty,
            move |caller, params, results| {
                (*trampoline)(caller, params, results).map_err(|e| {
                    error!(name = %func_name, error = %e, "host function trapped");
                    wasmtime::Error::from(e).context(format!("in host function '{func_name}'"))
                })
            },
        )?;
        Ok(())
    }

    fn cached<T: 'static>(
        &self,
        key: TrampolineKey,
        build: impl FnOnce() -> Arc<Trampoline<T>>,
    ) -> Arc<Trampoline<T>> {
        let cached = self
            .trampolines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .and_then(|entry| entry.downcast_ref::<Arc<Trampoline<T>>>())
            .map(Arc::clone);
        if let Some(trampoline) = cached {
            return trampoline;
        }
        let trampoline = build();
        let mut trampolines = self
            .trampolines
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = trampolines
            .entry(key)
            .or_insert_with(|| Box::new(Arc::clone(&trampoline)));
        entry
            .downcast_ref::<Arc<Trampoline<T>>>()
            .map(Arc::clone)
            .unwrap_or(trampoline)
    }

    fn trampoline<T: AbiState + 'static>(
        &self,
        plan: Arc<CallPlan>,
        invoke: Invoke<T>,
    ) -> Arc<Trampoline<T>> {
        let memory_export = self.config.memory_export.clone();
        let protocol = self.config.allocator;
        Arc::new(move |mut caller: Caller<'_, T>, params: &[Val], results: &mut [Val]| {
            run(&plan, &memory_export, protocol, &invoke, &mut caller, params, results)
        })
    }
}

fn run<T: AbiState + 'static>(
    plan: &CallPlan,
    memory_export: &str,
    protocol: AllocatorProtocol,
    invoke: &Invoke<T>,
    caller: &mut Caller<'_, T>,
    params: &[Val],
    results: &mut [Val],
) -> Result<(), WasmError> {
    let bits = params.iter().map(val_bits).collect::<Result<Vec<_>, _>>()?;
    let memory = caller
        .get_export(memory_export)
        .and_then(Extern::into_memory);

    let args = {
        let data: &[u8] = match &memory {
            Some(memory) => memory.data(&*caller),
            None => &[],
        };
        let mut cursor = FlatCursor::new(&bits);
        plan.params
            .iter()
            .map(|layout| flatten::unflatten(data, &mut cursor, layout))
            .collect::<Result<Vec<_>, _>>()?
    };

    let values = invoke(caller.data_mut(), args)?;
    if values.len() != plan.results.len() {
        return Err(WasmError::Host(format!(
            "returned {} values for {}",
            values.len(),
            plan.signature
        )));
    }

    match &plan.strategy {
        ReturnStrategy::None => Ok(()),
        ReturnStrategy::Direct(flat) => {
            // Direct results hold no strings or lists, so nothing is allocated.
            let mut scratch = LinearMemory::new();
            let mut out = Vec::with_capacity(flat.len());
            for (value, layout) in values.iter().zip(&plan.results) {
                flatten::flatten(&mut scratch, value, layout, &mut out)?;
            }
            for ((slot, ty), bits) in results.iter_mut().zip(flat).zip(out) {
                *slot = val_from_bits(&val_type(*ty), bits)?;
            }
            Ok(())
        }
        ReturnStrategy::Indirect => {
            let memory =
                memory.ok_or_else(|| WasmError::MemoryNotFound(memory_export.to_string()))?;
            let area = plan.result_area.as_ref().ok_or_else(|| {
                CanonicalAbiError::InvalidShape(format!("no result area for {}", plan.signature))
            })?;
            let retptr = bits.last().copied().ok_or(CanonicalAbiError::NotEnoughScalars {
                needed: 1,
                available: 0,
            })? as u32;
            let allocator = cached_allocator(caller, protocol)?;
            let value = into_area_value(values);
            let mut guest = WasmGuest::new(&mut *caller, memory, allocator);
            lift::lift_into(&mut guest, &value, area, retptr)?;
            Ok(())
        }
    }
}

/// The value stored in an indirect return area: the only result, or a tuple
/// of all of them.
pub(crate) fn into_area_value(mut values: Vec<Value>) -> Value {
    if values.len() == 1
        && let Some(value) = values.pop()
    {
        return value;
    }
    Value::Tuple(values)
}

fn cached_allocator<T: AbiState + 'static>(
    caller: &mut Caller<'_, T>,
    protocol: AllocatorProtocol,
) -> Result<GuestAllocator, WasmError> {
    if let Some(allocator) = caller.data_mut().guest_context().allocator.as_ref() {
        return Ok(allocator.clone());
    }
    let allocator = GuestAllocator::from_caller(caller, protocol)?;
    caller.data_mut().guest_context().allocator = Some(allocator.clone());
    Ok(allocator)
}
