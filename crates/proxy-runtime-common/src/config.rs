//! Configuration structures for proxy-runtime.
//!
//! - [`EngineConfig`]: engine-wide settings
//! - [`InstanceConfig`]: per-instance settings, most importantly the export
//!   name lists used to resolve the guest's start function and allocator

use serde::{Deserialize, Serialize};

/// Engine-wide configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Capture wasm backtraces on guest traps.
    #[serde(default = "defaults::wasm_backtrace")]
    pub wasm_backtrace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wasm_backtrace: defaults::wasm_backtrace(),
        }
    }
}

/// Per-instance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Export names tried, in order, to run the guest's start function.
    #[serde(default = "defaults::start_function_names")]
    pub start_function_names: Vec<String>,

    /// Export names tried, in order, to resolve the guest's allocator.
    #[serde(default = "defaults::malloc_function_names")]
    pub malloc_function_names: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            start_function_names: defaults::start_function_names(),
            malloc_function_names: defaults::malloc_function_names(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn wasm_backtrace() -> bool {
        true
    }

    pub fn start_function_names() -> Vec<String> {
        vec!["_start".into(), "_initialize".into()]
    }

    pub fn malloc_function_names() -> Vec<String> {
        vec!["proxy_on_memory_allocate".into(), "malloc".into()]
    }
}
