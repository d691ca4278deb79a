//! Deterministic in-memory engine for tests.
//!
//! [`MockModule`] scripts guest exports (fixed return values or traps) and
//! [`MockBackend`] backs them with a plain byte-vector linear memory and a
//! bump allocator. Because it implements the same capability traits as the
//! Wasmtime adapter, the layers above the engine can be exercised without
//! compiling any WebAssembly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use proxy_runtime_common::{sync, InstanceConfig, RuntimeError};

use crate::engine::{
    CallContext, ContextData, HostFunctionDef, InstanceBackend, WasmModule,
};
use crate::values::WasmValue;

pub const MOCK_ALLOCATOR_EXPORT: &str = "proxy_on_memory_allocate";

const DEFAULT_MEMORY_SIZE: usize = 64 * 1024;

/// Scripted behavior of one guest export.
#[derive(Clone)]
pub enum MockExport {
    /// Return this value.
    Return(Option<WasmValue>),
    /// Trap with this message.
    Trap(String),
}

/// Shared record of guest calls, `(export name, arguments)` per call.
pub type CallLog = Arc<Mutex<Vec<(String, Vec<WasmValue>)>>>;

/// A scripted module.
#[derive(Default, Clone)]
pub struct MockModule {
    exports: HashMap<String, MockExport>,
    markers: Vec<String>,
    allocator: bool,
    memory_size: usize,
    call_log: Option<CallLog>,
}

impl MockModule {
    pub fn new() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            ..Self::default()
        }
    }

    /// Script an export.
    pub fn export(mut self, name: &str, behavior: MockExport) -> Self {
        self.exports.insert(name.to_string(), behavior);
        self
    }

    /// Add a no-op `_start` export.
    pub fn with_start(self) -> Self {
        self.export("_start", MockExport::Return(None))
    }

    /// Expose a bump allocator under the conventional export name.
    pub fn with_allocator(mut self) -> Self {
        self.allocator = true;
        self
    }

    /// Add a marker export name (e.g. `proxy_abi_version_0_2_0`).
    pub fn marker(mut self, name: &str) -> Self {
        self.markers.push(name.to_string());
        self
    }

    /// Record every guest call into `log`.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.call_log = Some(log);
        self
    }
}

impl WasmModule for MockModule {
    fn export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.exports.keys().cloned().collect();
        names.extend(self.markers.iter().cloned());
        if self.allocator {
            names.push(MOCK_ALLOCATOR_EXPORT.to_string());
        }
        names
    }

    fn new_instance(
        &self,
        _config: &InstanceConfig,
    ) -> Result<Box<dyn InstanceBackend>, RuntimeError> {
        let mut backend = MockBackend::new(self.memory_size);
        backend.exports = self.exports.clone();
        backend.allocator = self.allocator;
        backend.call_log = self.call_log.clone();
        Ok(Box::new(backend))
    }
}

/// In-memory instance backend, also usable directly as a [`CallContext`]
/// in host-function tests.
pub struct MockBackend {
    exports: HashMap<String, MockExport>,
    allocator: bool,
    memory: Vec<u8>,
    heap: u64,
    data: Option<ContextData>,
    host_functions: Vec<(String, String)>,
    call_log: Option<CallLog>,
}

impl MockBackend {
    pub fn new(memory_size: usize) -> Self {
        Self {
            exports: HashMap::new(),
            allocator: true,
            memory: vec![0; memory_size],
            heap: (memory_size / 2) as u64,
            data: None,
            host_functions: Vec::new(),
            call_log: None,
        }
    }

    /// Names registered via `register_host_function`, as `(module, name)`.
    pub fn host_functions(&self) -> &[(String, String)] {
        &self.host_functions
    }

    fn bump_alloc(&mut self, size: i32) -> Result<u64, RuntimeError> {
        if !self.allocator {
            return Err(RuntimeError::MallocFunctionNotFound);
        }
        let size = size.max(0) as u64;
        let addr = self.heap;
        let end = addr
            .checked_add(size)
            .ok_or(RuntimeError::InvalidMemoryAccess { addr, size })?;
        if end > self.memory.len() as u64 {
            return Err(RuntimeError::InvalidMemoryAccess { addr, size });
        }
        self.heap = end;
        Ok(addr)
    }
}

impl InstanceBackend for MockBackend {
    fn register_host_function(
        &mut self,
        module: &str,
        def: HostFunctionDef,
    ) -> Result<(), RuntimeError> {
        self.host_functions
            .push((module.to_string(), def.name.to_string()));
        Ok(())
    }

    fn instantiate(&mut self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn has_export(&mut self, name: &str) -> bool {
        self.exports.contains_key(name) || (self.allocator && name == MOCK_ALLOCATOR_EXPORT)
    }

    fn call(&mut self, name: &str, args: &[WasmValue]) -> Result<Option<WasmValue>, RuntimeError> {
        if let Some(log) = &self.call_log {
            sync::lock(log).push((name.to_string(), args.to_vec()));
        }

        if self.allocator && name == MOCK_ALLOCATOR_EXPORT {
            let size = args.first().and_then(WasmValue::as_i32).unwrap_or(0);
            return self.bump_alloc(size).map(|addr| Some(WasmValue::I32(addr as i32)));
        }

        match self.exports.get(name) {
            Some(MockExport::Return(value)) => Ok(*value),
            Some(MockExport::Trap(message)) => Err(RuntimeError::trap(message.clone(), None)),
            None => Err(RuntimeError::func_not_exported(name)),
        }
    }

    fn memory(&mut self) -> Result<&[u8], RuntimeError> {
        Ok(&self.memory)
    }

    fn memory_mut(&mut self) -> Result<&mut [u8], RuntimeError> {
        Ok(&mut self.memory)
    }

    fn set_context_data(&mut self, data: Option<ContextData>) {
        self.data = data;
    }
}

impl CallContext for MockBackend {
    fn memory(&self) -> Result<&[u8], RuntimeError> {
        Ok(&self.memory)
    }

    fn memory_mut(&mut self) -> Result<&mut [u8], RuntimeError> {
        Ok(&mut self.memory)
    }

    fn malloc(&mut self, size: i32) -> Result<u64, RuntimeError> {
        self.bump_alloc(size)
    }

    fn context_data(&self) -> Option<ContextData> {
        self.data.clone()
    }
}
