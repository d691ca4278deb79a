//! Proxy-Wasm host layer: the import surface the guest calls into, the
//! [`ImportsHandler`] capability an embedding proxy implements, and the
//! [`AbiContext`] that drives guest lifecycle exports.
//!
//! # Typical flow
//!
//! ```ignore
//! let engine = WasmtimeEngine::new(&EngineConfig::default())?;
//! let module = engine.compile(&wasm_bytes)?;
//! let instance = Arc::new(Instance::new(module, InstanceConfig::default())?);
//!
//! imports::register_host_functions(&instance)?;
//! instance.start()?;
//!
//! let mut ctx = AbiContext::new(handler, Arc::clone(&instance));
//! ctx.on_context_create(1, 0)?;
//!
//! let _guard = instance.lock(ctx.current());
//! ctx.on_context_create(2, 1)?;
//! let action = ctx.on_request_headers(2, 0, 1)?;
//! ```

pub mod abi;
pub mod buffer;
pub mod handler;
pub mod header;
pub mod imports;
pub mod shared;

pub use abi::{AbiContext, CurrentContext};
pub use buffer::{BytesBuffer, IoBuffer};
pub use handler::{DefaultImportsHandler, ImportsHandler};
pub use header::{decode_pairs, encode_pairs, HeaderMap, PairMap};
pub use shared::{SharedDataStore, SharedQueueRegistry};
