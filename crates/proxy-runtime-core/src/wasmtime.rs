//! Wasmtime engine adapter.
//!
//! Translates the engine capability traits onto `wasmtime`: dynamic
//! host-function linking driven by the signature table, bounds-checked
//! memory access through [`Caller`], guest-allocator calls from inside host
//! functions, and trap capture into [`RuntimeError::Trap`]. WASI preview 1
//! is linked into every instance so guests built against wasi-libc can
//! instantiate.

use std::sync::Arc;

use tracing::debug;
use wasmtime::{
    Caller, Config, Engine, Extern, Func, FuncType, Linker, Memory, Module, Store, Trap, Val,
    ValType,
};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

use proxy_runtime_common::{EngineConfig, InstanceConfig, RuntimeError};

use crate::engine::{
    CallContext, ContextData, HostFunctionDef, InstanceBackend, WasmEngine, WasmModule,
};
use crate::values::{ValueKind, WasmValue};

/// Process-wide Wasmtime engine.
pub struct WasmtimeEngine {
    engine: Engine,
}

impl WasmtimeEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();
        wasmtime_config.wasm_backtrace(config.wasm_backtrace);

        let engine = Engine::new(&wasmtime_config)
            .map_err(|e| RuntimeError::engine(format!("failed to create engine: {e}")))?;

        debug!("wasmtime engine initialized");

        Ok(Self { engine })
    }
}

impl WasmEngine for WasmtimeEngine {
    fn name(&self) -> &'static str {
        "wasmtime"
    }

    fn compile(&self, bytes: &[u8]) -> Result<Arc<dyn WasmModule>, RuntimeError> {
        if bytes.is_empty() {
            return Err(RuntimeError::engine("module was empty"));
        }

        let module = Module::new(&self.engine, bytes)
            .map_err(|e| RuntimeError::engine(format!("compilation failed: {e}")))?;

        Ok(Arc::new(WasmtimeModule {
            engine: self.engine.clone(),
            module,
        }))
    }
}

/// A compiled Wasmtime module.
pub struct WasmtimeModule {
    engine: Engine,
    module: Module,
}

impl WasmModule for WasmtimeModule {
    fn export_names(&self) -> Vec<String> {
        self.module
            .exports()
            .map(|export| export.name().to_string())
            .collect()
    }

    fn new_instance(
        &self,
        config: &InstanceConfig,
    ) -> Result<Box<dyn InstanceBackend>, RuntimeError> {
        let mut linker: Linker<StoreCtx> = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |ctx: &mut StoreCtx| &mut ctx.wasi)
            .map_err(|e| RuntimeError::engine(format!("failed to link WASI: {e}")))?;

        let mut wasi = WasiCtxBuilder::new();
        wasi.inherit_stdout().inherit_stderr();

        let store = Store::new(
            &self.engine,
            StoreCtx {
                wasi: wasi.build_p1(),
                memory: None,
                allocator: None,
                malloc_function_names: config.malloc_function_names.clone(),
                data: None,
            },
        );

        Ok(Box::new(WasmtimeBackend {
            store,
            linker,
            module: self.module.clone(),
            instance: None,
        }))
    }
}

/// Store-attached state reachable from host functions via [`Caller`].
struct StoreCtx {
    wasi: WasiP1Ctx,
    memory: Option<Memory>,
    allocator: Option<Func>,
    malloc_function_names: Vec<String>,
    data: Option<ContextData>,
}

/// Wasmtime half of one instance.
pub struct WasmtimeBackend {
    store: Store<StoreCtx>,
    linker: Linker<StoreCtx>,
    module: Module,
    instance: Option<wasmtime::Instance>,
}

impl InstanceBackend for WasmtimeBackend {
    fn register_host_function(
        &mut self,
        module: &str,
        def: HostFunctionDef,
    ) -> Result<(), RuntimeError> {
        let ty = FuncType::new(
            self.store.engine(),
            def.signature.params.iter().map(|kind| val_type(*kind)),
            def.signature.results.iter().map(|kind| val_type(*kind)),
        );
        let name = def.name;
        let func = def.func;

        self.linker
            .func_new(module, name, ty, move |mut caller, params, results| {
                let args = params
                    .iter()
                    .map(from_val)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(wasmtime::Error::new)?;

                let ret = func(&mut WasmtimeCallContext { caller: &mut caller }, &args);

                if let (Some(slot), Some(value)) = (results.first_mut(), ret) {
                    *slot = to_val(value);
                }
                Ok(())
            })
            .map_err(|e| {
                RuntimeError::engine(format!("failed to register host function {name}: {e}"))
            })?;

        Ok(())
    }

    fn instantiate(&mut self) -> Result<(), RuntimeError> {
        let instance = self
            .linker
            .instantiate(&mut self.store, &self.module)
            .map_err(trap_error)?;

        self.store.data_mut().memory = instance.get_memory(&mut self.store, "memory");
        self.instance = Some(instance);

        Ok(())
    }

    fn has_export(&mut self, name: &str) -> bool {
        match self.instance {
            Some(instance) => instance.get_func(&mut self.store, name).is_some(),
            None => false,
        }
    }

    fn call(&mut self, name: &str, args: &[WasmValue]) -> Result<Option<WasmValue>, RuntimeError> {
        let instance = self
            .instance
            .ok_or_else(|| RuntimeError::engine("instance not instantiated"))?;
        let func = instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| RuntimeError::func_not_exported(name))?;

        let params: Vec<Val> = args.iter().map(|value| to_val(*value)).collect();
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];

        func.call(&mut self.store, &params, &mut results)
            .map_err(trap_error)?;

        results.first().map(from_val).transpose()
    }

    fn memory(&mut self) -> Result<&[u8], RuntimeError> {
        let memory = exported_memory(self.store.data())?;
        Ok(memory.data(&self.store))
    }

    fn memory_mut(&mut self) -> Result<&mut [u8], RuntimeError> {
        let memory = exported_memory(self.store.data())?;
        Ok(memory.data_mut(&mut self.store))
    }

    fn set_context_data(&mut self, data: Option<ContextData>) {
        self.store.data_mut().data = data;
    }
}

fn exported_memory(ctx: &StoreCtx) -> Result<Memory, RuntimeError> {
    ctx.memory
        .ok_or_else(|| RuntimeError::engine("guest does not export memory"))
}

/// [`CallContext`] view over an in-flight guest call.
struct WasmtimeCallContext<'a, 'b> {
    caller: &'a mut Caller<'b, StoreCtx>,
}

impl CallContext for WasmtimeCallContext<'_, '_> {
    fn memory(&self) -> Result<&[u8], RuntimeError> {
        let memory = exported_memory(self.caller.data())?;
        Ok(memory.data(&*self.caller))
    }

    fn memory_mut(&mut self) -> Result<&mut [u8], RuntimeError> {
        let memory = exported_memory(self.caller.data())?;
        Ok(memory.data_mut(&mut *self.caller))
    }

    fn malloc(&mut self, size: i32) -> Result<u64, RuntimeError> {
        let func = match self.caller.data().allocator {
            Some(func) => func,
            None => {
                let names = self.caller.data().malloc_function_names.clone();
                let resolved = names.iter().find_map(|name| {
                    match self.caller.get_export(name) {
                        Some(Extern::Func(func)) => Some(func),
                        _ => None,
                    }
                });
                let func = resolved.ok_or(RuntimeError::MallocFunctionNotFound)?;
                self.caller.data_mut().allocator = Some(func);
                func
            }
        };

        let mut results = [Val::I32(0)];
        func.call(&mut *self.caller, &[Val::I32(size)], &mut results)
            .map_err(trap_error)?;

        match results[0] {
            Val::I32(addr) if addr > 0 => Ok(addr as u64),
            _ => Err(RuntimeError::InvalidReturnAddress),
        }
    }

    fn context_data(&self) -> Option<ContextData> {
        self.caller.data().data.clone()
    }
}

fn val_type(kind: ValueKind) -> ValType {
    match kind {
        ValueKind::I32 => ValType::I32,
        ValueKind::I64 => ValType::I64,
        ValueKind::F32 => ValType::F32,
        ValueKind::F64 => ValType::F64,
    }
}

fn to_val(value: WasmValue) -> Val {
    match value {
        WasmValue::I32(v) => Val::I32(v),
        WasmValue::I64(v) => Val::I64(v),
        WasmValue::F32(v) => Val::F32(v.to_bits()),
        WasmValue::F64(v) => Val::F64(v.to_bits()),
    }
}

fn from_val(val: &Val) -> Result<WasmValue, RuntimeError> {
    match val {
        Val::I32(v) => Ok(WasmValue::I32(*v)),
        Val::I64(v) => Ok(WasmValue::I64(*v)),
        Val::F32(bits) => Ok(WasmValue::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Ok(WasmValue::F64(f64::from_bits(*bits))),
        other => Err(RuntimeError::UnsupportedValueType {
            ty: format!("{other:?}"),
        }),
    }
}

/// Translate a Wasmtime call error into a structured trap.
fn trap_error(error: wasmtime::Error) -> RuntimeError {
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));
    RuntimeError::trap(error.to_string(), code)
}
