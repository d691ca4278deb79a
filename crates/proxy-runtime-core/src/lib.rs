//! Core runtime for proxy-runtime: the engine capability surface, the
//! Wasmtime adapter, and the generic [`Instance`] lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            WasmEngine (compile bytes → module)          │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │    WasmModule (exports, ABI markers, new backend)       │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │  Instance (lock, refcount, start/stop, malloc, memory)  │
//! │        └─ InstanceBackend (engine-specific)             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above the backend speaks only the four-kind numeric
//! vocabulary of [`values::WasmValue`]; engine-native types never escape
//! their adapter.

pub mod engine;
pub mod instance;
pub mod testing;
pub mod values;
pub mod wasmtime;

pub use crate::engine::{
    CallContext, ContextData, HostFunction, HostFunctionDef, InstanceBackend, Signature,
    WasmEngine, WasmModule,
};
pub use crate::instance::{Instance, InstanceLock};
pub use crate::values::{ValueKind, WasmValue};
pub use crate::wasmtime::WasmtimeEngine;
