//! Instance lifecycle: exclusive locking, reference-counted teardown, and
//! the guest-facing memory/allocator surface.
//!
//! One [`Instance`] owns one engine backend. The ownership protocol per
//! request is:
//!
//! 1. `acquire()`, which fails fast if the instance is stopping
//! 2. `lock(data)`, taking the exclusive session and storing the request
//!    context
//! 3. drive guest callbacks via `call_export`
//! 4. drop the lock guard, then `release()`
//!
//! `stop()` returns immediately and clears the started flag only once all
//! outstanding acquires have been released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, error};

use proxy_runtime_common::{sync, InstanceConfig, RuntimeError};

use crate::engine::{ContextData, HostFunctionDef, InstanceBackend, WasmModule};
use crate::values::{checked_range, WasmValue};

/// One sandboxed guest instance.
pub struct Instance {
    module: Arc<dyn WasmModule>,
    config: InstanceConfig,
    backend: Mutex<Box<dyn InstanceBackend>>,
    session: Mutex<()>,
    lifecycle: Arc<Lifecycle>,
    /// Export name of the guest allocator, cached on first resolution.
    allocator: Mutex<Option<String>>,
}

struct Lifecycle {
    started: AtomicBool,
    refs: Mutex<u32>,
    drained: Condvar,
}

impl Instance {
    /// Create an instance of `module`. The guest is not instantiated until
    /// [`Instance::start`].
    pub fn new(module: Arc<dyn WasmModule>, config: InstanceConfig) -> Result<Self, RuntimeError> {
        let backend = module.new_instance(&config)?;

        Ok(Self {
            module,
            config,
            backend: Mutex::new(backend),
            session: Mutex::new(()),
            lifecycle: Arc::new(Lifecycle {
                started: AtomicBool::new(false),
                refs: Mutex::new(0),
                drained: Condvar::new(),
            }),
            allocator: Mutex::new(None),
        })
    }

    /// The module this instance was created from.
    pub fn module(&self) -> &Arc<dyn WasmModule> {
        &self.module
    }

    /// The `proxy_abi_*` marker exports of the underlying module.
    pub fn abi_versions(&self) -> Vec<String> {
        self.module.abi_versions()
    }

    /// Queue a host function for linking. Must be called before `start`.
    pub fn register_host_function(
        &self,
        module: &str,
        def: HostFunctionDef,
    ) -> Result<(), RuntimeError> {
        if self.started() {
            return Err(RuntimeError::AlreadyStarted);
        }
        sync::lock(&self.backend).register_host_function(module, def)
    }

    /// Link imports, instantiate the guest, and run its start function
    /// (the first exported name from the configured list).
    pub fn start(&self) -> Result<(), RuntimeError> {
        if self.started() {
            return Err(RuntimeError::AlreadyStarted);
        }

        let mut backend = sync::lock(&self.backend);
        backend.instantiate()?;

        for name in &self.config.start_function_names {
            if !backend.has_export(name) {
                continue;
            }

            return match backend.call(name, &[]) {
                Ok(_) => {
                    self.lifecycle.started.store(true, Ordering::Release);
                    debug!(start_function = %name, "instance started");
                    Ok(())
                }
                Err(err) => {
                    self.handle_error(&err);
                    Err(err)
                }
            };
        }

        Err(RuntimeError::start_function_not_found(
            &self.config.start_function_names,
        ))
    }

    /// Whether `start` has succeeded and `stop` has not yet completed.
    pub fn started(&self) -> bool {
        self.lifecycle.started.load(Ordering::Acquire)
    }

    /// Begin teardown. Returns immediately; the started flag is cleared by
    /// a background waiter once the refcount drains to zero.
    pub fn stop(&self) {
        let lifecycle = Arc::clone(&self.lifecycle);
        thread::spawn(move || {
            let mut refs = sync::lock(&lifecycle.refs);
            while *refs > 0 {
                refs = lifecycle
                    .drained
                    .wait(refs)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            lifecycle.started.store(false, Ordering::Release);
            debug!("instance stopped");
        });
    }

    /// Take a reference on the instance. Returns `false` (without touching
    /// the refcount) if the instance is not started.
    pub fn acquire(&self) -> bool {
        let mut refs = sync::lock(&self.lifecycle.refs);
        if !self.started() {
            return false;
        }
        *refs += 1;
        true
    }

    /// Drop a reference taken by [`Instance::acquire`]; wakes teardown
    /// waiters when the count reaches zero.
    pub fn release(&self) {
        let mut refs = sync::lock(&self.lifecycle.refs);
        if *refs > 0 {
            *refs -= 1;
        }
        if *refs == 0 {
            self.lifecycle.drained.notify_all();
        }
    }

    /// Take the exclusive instance lock for one logical request and store
    /// `data` in the current-request slot. Host functions invoked by the
    /// guest read the slot back for the duration of the guard; dropping the
    /// guard clears it and releases the lock.
    pub fn lock(&self, data: ContextData) -> InstanceLock<'_> {
        let guard = sync::lock(&self.session);
        sync::lock(&self.backend).set_context_data(Some(data));
        InstanceLock {
            instance: self,
            _session: guard,
        }
    }

    /// Call a guest export by name.
    pub fn call_export(
        &self,
        name: &str,
        args: &[WasmValue],
    ) -> Result<Option<WasmValue>, RuntimeError> {
        if !self.started() {
            return Err(RuntimeError::NotStarted);
        }
        sync::lock(&self.backend).call(name, args)
    }

    /// Whether the (instantiated) guest exports a function of this name.
    pub fn has_export(&self, name: &str) -> bool {
        sync::lock(&self.backend).has_export(name)
    }

    /// Allocate `size` bytes inside the guest via its exported allocator,
    /// resolved from the configured name list on first use.
    pub fn malloc(&self, size: i32) -> Result<u64, RuntimeError> {
        if !self.started() {
            return Err(RuntimeError::NotStarted);
        }

        let mut backend = sync::lock(&self.backend);
        let mut cached = sync::lock(&self.allocator);
        let name = match cached.as_ref() {
            Some(name) => name.clone(),
            None => {
                let resolved = self
                    .config
                    .malloc_function_names
                    .iter()
                    .find(|name| backend.has_export(name))
                    .cloned()
                    .ok_or(RuntimeError::MallocFunctionNotFound)?;
                *cached = Some(resolved.clone());
                resolved
            }
        };
        drop(cached);

        let result = backend.call(&name, &[WasmValue::I32(size)]).map_err(|err| {
            self.handle_error(&err);
            err
        })?;

        match result {
            Some(WasmValue::I32(addr)) if addr > 0 => Ok(addr as u64),
            _ => Err(RuntimeError::InvalidReturnAddress),
        }
    }

    /// Size of the guest's linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        sync::lock(&self.backend)
            .memory()
            .map(|memory| memory.len())
            .unwrap_or(0)
    }

    /// Copy `size` bytes out of guest memory at `addr`.
    pub fn get_memory(&self, addr: u64, size: u64) -> Result<Vec<u8>, RuntimeError> {
        let mut backend = sync::lock(&self.backend);
        let memory = backend.memory()?;
        let range = checked_range(addr, size, memory.len())?;
        Ok(memory[range].to_vec())
    }

    /// Write `min(size, content.len())` bytes into guest memory at `addr`.
    pub fn put_memory(&self, addr: u64, size: u64, content: &[u8]) -> Result<(), RuntimeError> {
        let n = size.min(content.len() as u64);
        let mut backend = sync::lock(&self.backend);
        let memory = backend.memory_mut()?;
        let range = checked_range(addr, n, memory.len())?;
        memory[range].copy_from_slice(&content[..n as usize]);
        Ok(())
    }

    pub fn get_byte(&self, addr: u64) -> Result<u8, RuntimeError> {
        Ok(self.get_memory(addr, 1)?[0])
    }

    pub fn put_byte(&self, addr: u64, value: u8) -> Result<(), RuntimeError> {
        self.put_memory(addr, 1, &[value])
    }

    pub fn get_u32(&self, addr: u64) -> Result<u32, RuntimeError> {
        let bytes = self.get_memory(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn put_u32(&self, addr: u64, value: u32) -> Result<(), RuntimeError> {
        self.put_memory(addr, 4, &value.to_le_bytes())
    }

    /// Report a guest error to the instance's error hook.
    pub fn handle_error(&self, err: &RuntimeError) {
        error!(error = %err, "guest error");
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("started", &self.started())
            .finish_non_exhaustive()
    }
}

/// RAII guard for the exclusive instance lock taken by [`Instance::lock`].
pub struct InstanceLock<'a> {
    instance: &'a Instance,
    _session: MutexGuard<'a, ()>,
}

impl Drop for InstanceLock<'_> {
    fn drop(&mut self) {
        sync::lock(&self.instance.backend).set_context_data(None);
    }
}
