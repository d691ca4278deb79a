//! Error types for proxy-runtime.
//!
//! [`RuntimeError`] covers the host-side error domains: engine failures,
//! guest traps, and protocol violations between host and guest. Host
//! function failures are *not* represented here; those are encoded as
//! [`crate::types::WasmResult`] status codes and returned to the guest.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// `start()` was called on an instance that is already running.
    #[error("instance has already started")]
    AlreadyStarted,

    /// An operation that requires a running instance was called before
    /// `start()` succeeded.
    #[error("instance has not started")]
    NotStarted,

    /// None of the configured start function names is exported by the guest.
    #[error("could not start instance: no start function exported (tried: {tried})")]
    StartFunctionNotFound {
        /// Comma-separated names that were tried.
        tried: String,
    },

    /// None of the configured allocator names is exported by the guest.
    #[error("could not find memory allocate function")]
    MallocFunctionNotFound,

    /// The guest allocator returned something other than a positive i32.
    #[error("guest allocator returned an invalid address")]
    InvalidReturnAddress,

    /// A guest export was looked up by name and does not exist.
    #[error("function not exported: {name}")]
    FuncNotExported {
        /// The export name that was requested.
        name: String,
    },

    /// A guest callback returned a value of an unexpected kind.
    #[error("invalid result from guest function: {func}")]
    InvalidResult {
        /// The guest function that misbehaved.
        func: String,
    },

    /// A guest pointer/length pair fell outside linear memory.
    #[error("invalid memory access: addr={addr} size={size}")]
    InvalidMemoryAccess {
        /// Offset into linear memory.
        addr: u64,
        /// Length of the access.
        size: u64,
    },

    /// An engine value could not be expressed in the four-kind numeric
    /// vocabulary ({i32, i64, f32, f64}).
    #[error("unsupported wasm value type: {ty}")]
    UnsupportedValueType {
        /// Engine-side description of the offending type.
        ty: String,
    },

    /// The guest trapped (unreachable, out-of-bounds access, ...).
    #[error("wasm trap: {message}")]
    Trap {
        /// Engine-provided trap description, including any backtrace.
        message: String,
        /// Trap code if the engine exposes one.
        code: Option<String>,
    },

    /// Compilation, linking, or instantiation failed inside the engine.
    #[error("engine error: {reason}")]
    Engine {
        /// Description of the engine failure.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `Engine` error.
    pub fn engine(reason: impl Into<String>) -> Self {
        Self::Engine {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code,
        }
    }

    /// Create a new `FuncNotExported` error.
    pub fn func_not_exported(name: impl Into<String>) -> Self {
        Self::FuncNotExported { name: name.into() }
    }

    /// Create a new `InvalidResult` error.
    pub fn invalid_result(func: impl Into<String>) -> Self {
        Self::InvalidResult { func: func.into() }
    }

    /// Create a new `StartFunctionNotFound` error from the tried name list.
    pub fn start_function_not_found(tried: &[String]) -> Self {
        Self::StartFunctionNotFound {
            tried: tried.join(", "),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is a guest trap.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Trap { .. })
    }

    /// Returns `true` if this error means a looked-up export is absent.
    pub fn is_not_exported(&self) -> bool {
        matches!(self, Self::FuncNotExported { .. })
    }
}
