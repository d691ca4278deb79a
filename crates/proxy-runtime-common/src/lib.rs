//! Common types, errors, and configuration for proxy-runtime.
//!
//! This crate provides the vocabulary shared across the proxy-runtime
//! workspace:
//! - The Proxy-Wasm ABI enums and status codes ([`types`])
//! - Error types using `thiserror` for type-safe error handling ([`error`])
//! - Configuration structures for the engine and instances ([`config`])

pub mod config;
pub mod error;
pub mod sync;
pub mod types;

pub use config::{EngineConfig, InstanceConfig};
pub use error::RuntimeError;
pub use types::{
    AbiVersion, Action, BufferType, HostResult, LogLevel, MapType, MetricType, PeerType,
    StreamType, WasmResult,
};
