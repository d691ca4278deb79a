//! The engine capability surface.
//!
//! Proxy-runtime drives WebAssembly through a narrow set of traits
//! (compile, instantiate, call, bounds-checked memory IO, host-function
//! registration, trap capture) so the rest of the workspace is engine
//! agnostic. [`crate::wasmtime::WasmtimeEngine`] is the production adapter;
//! [`crate::testing`] provides a deterministic in-memory one.

use std::any::Any;
use std::sync::Arc;

use proxy_runtime_common::{InstanceConfig, RuntimeError};

use crate::values::{checked_range, ValueKind, WasmValue};

/// Opaque per-instance data slot contents, set while an [`crate::Instance`]
/// is locked for a request. Host layers downcast this to their own type.
pub type ContextData = Arc<dyn Any + Send + Sync>;

/// A process-wide engine: compiles bytes into modules.
pub trait WasmEngine: Send + Sync {
    /// Short engine identifier, e.g. `"wasmtime"`.
    fn name(&self) -> &'static str;

    /// Compile WebAssembly bytes (binary, or text where the engine
    /// supports it) into a module.
    fn compile(&self, bytes: &[u8]) -> Result<Arc<dyn WasmModule>, RuntimeError>;
}

/// A compiled module: immutable code plus an enumerable export list.
pub trait WasmModule: Send + Sync {
    /// Names of all module exports.
    fn export_names(&self) -> Vec<String>;

    /// The `proxy_abi_*` marker exports, used to pick the ABI version.
    fn abi_versions(&self) -> Vec<String> {
        self.export_names()
            .into_iter()
            .filter(|name| name.starts_with("proxy_abi"))
            .collect()
    }

    /// Create a fresh, not-yet-instantiated backend for this module.
    fn new_instance(&self, config: &InstanceConfig) -> Result<Box<dyn InstanceBackend>, RuntimeError>;
}

/// Signature of a host function, drawn from the ABI's numeric vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [ValueKind],
    pub results: &'static [ValueKind],
}

/// A host-function closure. Receives the in-flight guest call's
/// [`CallContext`] and the decoded arguments; returns the (single) result
/// value, if the signature declares one.
pub type HostFunction =
    Box<dyn Fn(&mut dyn CallContext, &[WasmValue]) -> Option<WasmValue> + Send + Sync>;

/// One entry of a host-function registration table.
pub struct HostFunctionDef {
    pub name: &'static str,
    pub signature: Signature,
    pub func: HostFunction,
}

/// Engine-specific half of an instance. Only [`crate::Instance`] talks to
/// this directly; it layers the lock, refcount, and teardown discipline on
/// top.
pub trait InstanceBackend: Send {
    /// Queue a host function for linking under `(module, name)`.
    fn register_host_function(
        &mut self,
        module: &str,
        def: HostFunctionDef,
    ) -> Result<(), RuntimeError>;

    /// Link registered imports and instantiate the module.
    fn instantiate(&mut self) -> Result<(), RuntimeError>;

    /// Whether the instantiated guest exports a function of this name.
    fn has_export(&mut self, name: &str) -> bool;

    /// Call a guest export. Traps are translated into
    /// [`RuntimeError::Trap`]; an absent export yields
    /// [`RuntimeError::FuncNotExported`].
    fn call(&mut self, name: &str, args: &[WasmValue]) -> Result<Option<WasmValue>, RuntimeError>;

    /// The guest's linear memory.
    fn memory(&mut self) -> Result<&[u8], RuntimeError>;

    /// The guest's linear memory, writable.
    fn memory_mut(&mut self) -> Result<&mut [u8], RuntimeError>;

    /// Set or clear the per-instance data slot read back by host functions
    /// through [`CallContext::context_data`].
    fn set_context_data(&mut self, data: Option<ContextData>);
}

/// What a host function sees while the guest is suspended inside it:
/// bounds-checked linear-memory access, the guest allocator, and the data
/// slot of the instance lock.
///
/// The multi-byte helpers use little-endian encoding, per the ABI.
pub trait CallContext {
    /// The guest's linear memory.
    fn memory(&self) -> Result<&[u8], RuntimeError>;

    /// The guest's linear memory, writable.
    fn memory_mut(&mut self) -> Result<&mut [u8], RuntimeError>;

    /// Allocate `size` bytes inside the guest via its exported allocator.
    fn malloc(&mut self, size: i32) -> Result<u64, RuntimeError>;

    /// Contents of the instance's current-request data slot.
    fn context_data(&self) -> Option<ContextData>;

    /// Copy `size` bytes out of guest memory at `addr`.
    fn get_memory(&self, addr: u64, size: u64) -> Result<Vec<u8>, RuntimeError> {
        let mem = self.memory()?;
        let range = checked_range(addr, size, mem.len())?;
        Ok(mem[range].to_vec())
    }

    /// Write `min(size, content.len())` bytes into guest memory at `addr`.
    fn put_memory(&mut self, addr: u64, size: u64, content: &[u8]) -> Result<(), RuntimeError> {
        let n = size.min(content.len() as u64);
        let mem = self.memory_mut()?;
        let range = checked_range(addr, n, mem.len())?;
        mem[range].copy_from_slice(&content[..n as usize]);
        Ok(())
    }

    fn get_byte(&self, addr: u64) -> Result<u8, RuntimeError> {
        Ok(self.get_memory(addr, 1)?[0])
    }

    fn put_byte(&mut self, addr: u64, value: u8) -> Result<(), RuntimeError> {
        self.put_memory(addr, 1, &[value])
    }

    fn get_u32(&self, addr: u64) -> Result<u32, RuntimeError> {
        let bytes = self.get_memory(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn put_u32(&mut self, addr: u64, value: u32) -> Result<(), RuntimeError> {
        self.put_memory(addr, 4, &value.to_le_bytes())
    }

    /// Write a full 64-bit little-endian slot (used for nanosecond
    /// timestamps and metric values).
    fn put_u64(&mut self, addr: u64, value: u64) -> Result<(), RuntimeError> {
        self.put_memory(addr, 8, &value.to_le_bytes())
    }
}
