//! The host functions the guest imports under module `"env"`.
//!
//! Every function follows the same translation pattern:
//!
//! 1. Validate enum/discriminant arguments, else `BadArgument`
//! 2. Read argument bytes from guest memory via pointer/size pairs, else
//!    `InvalidMemoryAccess`
//! 3. Reject empty keys where the ABI mandates a non-empty key
//! 4. Dispatch to the [`ImportsHandler`] resolved from the instance's
//!    current-request slot (falling back to the process default handler)
//! 5. Write by-reference results into a fresh guest `malloc` buffer and
//!    the caller-supplied return slots
//! 6. Return the handler's status as an `i32`
//!
//! Handler locks are always released before touching the guest allocator:
//! `malloc` runs guest code, which may re-enter another host function.

pub(crate) mod buffers;
pub(crate) mod grpc;
pub(crate) mod headers;
pub(crate) mod http;
pub(crate) mod metrics;
pub(crate) mod shared;

use std::sync::{Arc, Mutex, OnceLock};

use proxy_runtime_common::types::{LogLevel, StreamType, WasmResult};
use proxy_runtime_common::{sync, RuntimeError};
use proxy_runtime_core::engine::{CallContext, HostFunctionDef, Signature};
use proxy_runtime_core::{Instance, ValueKind, WasmValue};

use crate::abi::CurrentContext;
use crate::handler::{DefaultImportsHandler, ImportsHandler};
use crate::header::decode_pairs;

/// Module name the guest imports host functions from. Proxy-Wasm cannot
/// run multiple ABIs in one instance: they all use `"env"`.
pub const IMPORT_MODULE: &str = "env";

const I32: ValueKind = ValueKind::I32;
const I64: ValueKind = ValueKind::I64;

const P0: &[ValueKind] = &[];
const P1: &[ValueKind] = &[I32];
const P2: &[ValueKind] = &[I32; 2];
const P3: &[ValueKind] = &[I32; 3];
const P4: &[ValueKind] = &[I32; 4];
const P5: &[ValueKind] = &[I32; 5];
const P6: &[ValueKind] = &[I32; 6];
const P8: &[ValueKind] = &[I32; 8];
const P10: &[ValueKind] = &[I32; 10];
const P11: &[ValueKind] = &[I32; 11];
const P12: &[ValueKind] = &[I32; 12];
const P_ID_I64: &[ValueKind] = &[I32, I64];
const R_I32: &[ValueKind] = &[I32];

/// Register the full Proxy-Wasm import surface on an instance. Must run
/// before [`Instance::start`].
pub fn register_host_functions(instance: &Instance) -> Result<(), RuntimeError> {
    for def in host_functions() {
        instance.register_host_function(IMPORT_MODULE, def)?;
    }
    Ok(())
}

/// The import table: names, signatures, and dispatch closures.
pub fn host_functions() -> Vec<HostFunctionDef> {
    vec![
        def("proxy_log", P3, |ctx, a| {
            proxy_log(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_get_log_level", P1, |ctx, a| {
            proxy_get_log_level(ctx, i32_arg(a, 0))
        }),
        def("proxy_set_tick_period_milliseconds", P1, |ctx, a| {
            proxy_set_tick_period_milliseconds(ctx, i32_arg(a, 0))
        }),
        def("proxy_get_current_time_nanoseconds", P1, |ctx, a| {
            proxy_get_current_time_nanoseconds(ctx, i32_arg(a, 0))
        }),
        def("proxy_get_status", P3, |ctx, a| {
            proxy_get_status(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_get_property", P4, |ctx, a| {
            proxy_get_property(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2), i32_arg(a, 3))
        }),
        def("proxy_set_property", P4, |ctx, a| {
            proxy_set_property(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2), i32_arg(a, 3))
        }),
        def("proxy_continue_stream", P1, |ctx, a| {
            proxy_continue_stream(ctx, i32_arg(a, 0))
        }),
        def("proxy_close_stream", P1, |ctx, a| {
            proxy_close_stream(ctx, i32_arg(a, 0))
        }),
        def("proxy_send_local_response", P8, |ctx, a| {
            proxy_send_local_response(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
                i32_arg(a, 5),
                i32_arg(a, 6),
                i32_arg(a, 7),
            )
        }),
        def("proxy_add_header_map_value", P5, |ctx, a| {
            headers::proxy_add_header_map_value(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_get_header_map_value", P5, |ctx, a| {
            headers::proxy_get_header_map_value(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_get_header_map_pairs", P3, |ctx, a| {
            headers::proxy_get_header_map_pairs(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_set_header_map_pairs", P3, |ctx, a| {
            headers::proxy_set_header_map_pairs(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_replace_header_map_value", P5, |ctx, a| {
            headers::proxy_replace_header_map_value(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_remove_header_map_value", P3, |ctx, a| {
            headers::proxy_remove_header_map_value(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_get_header_map_size", P2, |ctx, a| {
            headers::proxy_get_header_map_size(ctx, i32_arg(a, 0), i32_arg(a, 1))
        }),
        def("proxy_get_shared_data", P5, |ctx, a| {
            shared::proxy_get_shared_data(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_set_shared_data", P5, |ctx, a| {
            shared::proxy_set_shared_data(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_register_shared_queue", P3, |ctx, a| {
            shared::proxy_register_shared_queue(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_resolve_shared_queue", P5, |ctx, a| {
            shared::proxy_resolve_shared_queue(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_enqueue_shared_queue", P3, |ctx, a| {
            shared::proxy_enqueue_shared_queue(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_dequeue_shared_queue", P3, |ctx, a| {
            shared::proxy_dequeue_shared_queue(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_get_buffer_bytes", P5, |ctx, a| {
            buffers::proxy_get_buffer_bytes(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_get_buffer_status", P3, |ctx, a| {
            buffers::proxy_get_buffer_status(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2))
        }),
        def("proxy_set_buffer_bytes", P5, |ctx, a| {
            buffers::proxy_set_buffer_bytes(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
            )
        }),
        def("proxy_http_call", P10, |ctx, a| {
            http::proxy_http_call(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
                i32_arg(a, 5),
                i32_arg(a, 6),
                i32_arg(a, 7),
                i32_arg(a, 8),
                i32_arg(a, 9),
            )
        }),
        def("proxy_define_metric", P4, |ctx, a| {
            metrics::proxy_define_metric(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2), i32_arg(a, 3))
        }),
        def("proxy_increment_metric", P_ID_I64, |ctx, a| {
            metrics::proxy_increment_metric(ctx, i32_arg(a, 0), i64_arg(a, 1))
        }),
        def("proxy_record_metric", P_ID_I64, |ctx, a| {
            metrics::proxy_record_metric(ctx, i32_arg(a, 0), i64_arg(a, 1))
        }),
        def("proxy_get_metric", P2, |ctx, a| {
            metrics::proxy_get_metric(ctx, i32_arg(a, 0), i32_arg(a, 1))
        }),
        def("proxy_grpc_call", P12, |ctx, a| {
            grpc::proxy_grpc_call(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
                i32_arg(a, 5),
                i32_arg(a, 6),
                i32_arg(a, 7),
                i32_arg(a, 8),
                i32_arg(a, 9),
                i32_arg(a, 10),
                i32_arg(a, 11),
            )
        }),
        def("proxy_grpc_stream", P11, |ctx, a| {
            grpc::proxy_grpc_stream(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
                i32_arg(a, 5),
                i32_arg(a, 6),
                i32_arg(a, 7),
                i32_arg(a, 8),
                i32_arg(a, 9),
                i32_arg(a, 10),
            )
        }),
        def("proxy_grpc_send", P4, |ctx, a| {
            grpc::proxy_grpc_send(ctx, i32_arg(a, 0), i32_arg(a, 1), i32_arg(a, 2), i32_arg(a, 3))
        }),
        def("proxy_grpc_cancel", P1, |ctx, a| {
            grpc::proxy_grpc_cancel(ctx, i32_arg(a, 0))
        }),
        def("proxy_grpc_close", P1, |ctx, a| {
            grpc::proxy_grpc_close(ctx, i32_arg(a, 0))
        }),
        def("proxy_set_effective_context", P1, |ctx, a| {
            proxy_set_effective_context(ctx, i32_arg(a, 0))
        }),
        def("proxy_done", P0, |ctx, _a| proxy_done(ctx)),
        def("proxy_call_foreign_function", P6, |ctx, a| {
            proxy_call_foreign_function(
                ctx,
                i32_arg(a, 0),
                i32_arg(a, 1),
                i32_arg(a, 2),
                i32_arg(a, 3),
                i32_arg(a, 4),
                i32_arg(a, 5),
            )
        }),
    ]
}

fn def(
    name: &'static str,
    params: &'static [ValueKind],
    f: impl Fn(&mut dyn CallContext, &[WasmValue]) -> WasmResult + Send + Sync + 'static,
) -> HostFunctionDef {
    HostFunctionDef {
        name,
        signature: Signature {
            params,
            results: R_I32,
        },
        func: Box::new(move |ctx, args| Some(WasmValue::I32(f(ctx, args).as_i32()))),
    }
}

fn i32_arg(args: &[WasmValue], index: usize) -> i32 {
    args.get(index).and_then(WasmValue::as_i32).unwrap_or(0)
}

fn i64_arg(args: &[WasmValue], index: usize) -> i64 {
    args.get(index).and_then(WasmValue::as_i64).unwrap_or(0)
}

/// Resolve the handler for the in-flight host call: the one stored by the
/// instance lock, or the process-wide default.
pub(crate) fn import_handler(ctx: &dyn CallContext) -> Arc<Mutex<dyn ImportsHandler>> {
    if let Some(data) = ctx.context_data() {
        if let Some(current) = data.downcast_ref::<CurrentContext>() {
            return Arc::clone(&current.imports);
        }
    }
    fallback_handler()
}

fn fallback_handler() -> Arc<Mutex<dyn ImportsHandler>> {
    static FALLBACK: OnceLock<Arc<Mutex<dyn ImportsHandler>>> = OnceLock::new();
    Arc::clone(FALLBACK.get_or_init(|| Arc::new(Mutex::new(DefaultImportsHandler::new()))))
}

/// Copy `value` into a fresh guest `malloc` buffer and write the
/// `(addr, size)` pair into the caller-supplied return slots.
pub(crate) fn copy_into_guest(
    ctx: &mut dyn CallContext,
    value: &[u8],
    return_ptr: i32,
    return_size: i32,
) -> WasmResult {
    let Ok(addr) = ctx.malloc(value.len() as i32) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if ctx.put_memory(addr, value.len() as u64, value).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    if ctx.put_u32(return_ptr as u64, addr as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    if ctx.put_u32(return_size as u64, value.len() as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

// Logging

pub(crate) fn proxy_log(
    ctx: &mut dyn CallContext,
    log_level: i32,
    message_ptr: i32,
    message_size: i32,
) -> WasmResult {
    let Ok(message) = ctx.get_memory(message_ptr as u64, message_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.log(
        LogLevel::from_i32(log_level),
        &String::from_utf8_lossy(&message),
    )
}

pub(crate) fn proxy_get_log_level(ctx: &mut dyn CallContext, log_level_ptr: i32) -> WasmResult {
    let level = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        handler.log_level()
    };

    if ctx.put_u32(log_level_ptr as u64, level.as_i32() as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

// Timer and time

pub(crate) fn proxy_set_tick_period_milliseconds(
    ctx: &mut dyn CallContext,
    tick_period_ms: i32,
) -> WasmResult {
    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.set_tick_period(tick_period_ms)
}

pub(crate) fn proxy_get_current_time_nanoseconds(
    ctx: &mut dyn CallContext,
    result_u64_ptr: i32,
) -> WasmResult {
    let nanos = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.current_time_nanoseconds() {
            Ok(nanos) => nanos,
            Err(result) => return result,
        }
    };

    // The caller's slot is 64 bits wide; write the full value.
    if ctx.put_u64(result_u64_ptr as u64, nanos).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

// Status of the most recent asynchronous call

pub(crate) fn proxy_get_status(
    ctx: &mut dyn CallContext,
    status_code_ptr: i32,
    return_detail_ptr: i32,
    return_detail_size: i32,
) -> WasmResult {
    let (code, detail) = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.status() {
            Ok(status) => status,
            Err(result) => return result,
        }
    };

    if ctx.put_u32(status_code_ptr as u64, code).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    copy_into_guest(ctx, detail.as_bytes(), return_detail_ptr, return_detail_size)
}

// System

pub(crate) fn proxy_set_effective_context(ctx: &mut dyn CallContext, context_id: i32) -> WasmResult {
    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.set_effective_context(context_id)
}

pub(crate) fn proxy_done(ctx: &mut dyn CallContext) -> WasmResult {
    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.done()
}

pub(crate) fn proxy_call_foreign_function(
    ctx: &mut dyn CallContext,
    func_name_ptr: i32,
    func_name_size: i32,
    param_ptr: i32,
    param_size: i32,
    return_data_ptr: i32,
    return_size_ptr: i32,
) -> WasmResult {
    let Ok(func_name) = ctx.get_memory(func_name_ptr as u64, func_name_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(param) = ctx.get_memory(param_ptr as u64, param_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let result = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.call_foreign_function(&String::from_utf8_lossy(&func_name), &param) {
            Ok(data) => data,
            Err(result) => return result,
        }
    };

    copy_into_guest(ctx, &result, return_data_ptr, return_size_ptr)
}

// Properties

pub(crate) fn proxy_get_property(
    ctx: &mut dyn CallContext,
    key_ptr: i32,
    key_size: i32,
    return_value_ptr: i32,
    return_value_size: i32,
) -> WasmResult {
    let Ok(key) = ctx.get_memory(key_ptr as u64, key_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if key.is_empty() {
        return WasmResult::BadArgument;
    }

    let value = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.property(&String::from_utf8_lossy(&key)) {
            Ok(value) => value,
            Err(result) => return result,
        }
    };

    copy_into_guest(ctx, value.as_bytes(), return_value_ptr, return_value_size)
}

pub(crate) fn proxy_set_property(
    ctx: &mut dyn CallContext,
    key_ptr: i32,
    key_size: i32,
    value_ptr: i32,
    value_size: i32,
) -> WasmResult {
    let Ok(key) = ctx.get_memory(key_ptr as u64, key_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if key.is_empty() {
        return WasmResult::BadArgument;
    }
    let Ok(value) = ctx.get_memory(value_ptr as u64, value_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.set_property(
        &String::from_utf8_lossy(&key),
        &String::from_utf8_lossy(&value),
    )
}

// Stream control

pub(crate) fn proxy_continue_stream(ctx: &mut dyn CallContext, stream_type: i32) -> WasmResult {
    let Some(stream_type) = StreamType::from_i32(stream_type) else {
        return WasmResult::BadArgument;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    match stream_type {
        StreamType::HttpRequest => handler.resume_http_request(),
        StreamType::HttpResponse => handler.resume_http_response(),
        StreamType::Downstream => handler.resume_downstream(),
        StreamType::Upstream => handler.resume_upstream(),
    }
}

pub(crate) fn proxy_close_stream(ctx: &mut dyn CallContext, stream_type: i32) -> WasmResult {
    let Some(stream_type) = StreamType::from_i32(stream_type) else {
        return WasmResult::BadArgument;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    match stream_type {
        StreamType::HttpRequest => handler.close_http_request(),
        StreamType::HttpResponse => handler.close_http_response(),
        StreamType::Downstream => handler.close_downstream(),
        StreamType::Upstream => handler.close_upstream(),
    }
}

// Local response

#[allow(clippy::too_many_arguments)]
pub(crate) fn proxy_send_local_response(
    ctx: &mut dyn CallContext,
    status_code: i32,
    details_ptr: i32,
    details_size: i32,
    body_ptr: i32,
    body_size: i32,
    headers_ptr: i32,
    headers_size: i32,
    grpc_status: i32,
) -> WasmResult {
    let Ok(details) = ctx.get_memory(details_ptr as u64, details_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(body) = ctx.get_memory(body_ptr as u64, body_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(headers) = ctx.get_memory(headers_ptr as u64, headers_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.send_http_response(status_code, &details, &body, decode_pairs(&headers), grpc_status)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use proxy_runtime_core::engine::InstanceBackend;
    use proxy_runtime_core::testing::MockBackend;

    use super::buffers::*;
    use super::headers::*;
    use super::metrics::*;
    use super::shared::*;
    use super::*;
    use crate::buffer::{BytesBuffer, IoBuffer};
    use crate::header::{encode_pairs, HeaderMap, PairMap};
    use crate::shared::{SharedDataStore, SharedQueueRegistry};

    const MEM: usize = 64 * 1024;

    fn attach(ctx: &mut MockBackend, handler: Arc<Mutex<dyn ImportsHandler>>) {
        InstanceBackend::set_context_data(ctx, Some(Arc::new(CurrentContext { imports: handler })));
    }

    fn fresh_default() -> Arc<Mutex<DefaultImportsHandler>> {
        Arc::new(Mutex::new(DefaultImportsHandler::with_stores(
            Arc::new(SharedDataStore::new()),
            Arc::new(SharedQueueRegistry::new()),
        )))
    }

    fn default_ctx() -> MockBackend {
        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, fresh_default());
        ctx
    }

    fn write(ctx: &mut MockBackend, addr: u64, bytes: &[u8]) {
        ctx.put_memory(addr, bytes.len() as u64, bytes).unwrap();
    }

    /// Read back a `(addr, size)` return-slot pair written by a host
    /// function.
    fn read_slot(ctx: &MockBackend, addr_slot: u64, size_slot: u64) -> Vec<u8> {
        let addr = ctx.get_u32(addr_slot).unwrap() as u64;
        let size = ctx.get_u32(size_slot).unwrap() as u64;
        ctx.get_memory(addr, size).unwrap()
    }

    #[test]
    fn test_table_shape() {
        let table = host_functions();
        assert_eq!(table.len(), 39);
        assert_eq!(IMPORT_MODULE, "env");

        let mut names: Vec<_> = table.iter().map(|def| def.name).collect();
        assert!(names.iter().all(|name| name.starts_with("proxy_")));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), table.len(), "duplicate import names");

        for def in &table {
            assert_eq!(def.signature.results, [ValueKind::I32].as_slice());
        }
    }

    #[test]
    fn test_proxy_log_captures_message() {
        struct LogCapture {
            entries: Vec<(LogLevel, String)>,
        }
        impl ImportsHandler for LogCapture {
            fn log(&mut self, level: LogLevel, message: &str) -> WasmResult {
                self.entries.push((level, message.to_string()));
                WasmResult::Ok
            }
        }

        let handler = Arc::new(Mutex::new(LogCapture { entries: Vec::new() }));
        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, handler.clone());

        write(&mut ctx, 100, b"hello");
        assert_eq!(proxy_log(&mut ctx, 2, 100, 5), WasmResult::Ok);

        // Out-of-bounds message pointer.
        assert_eq!(
            proxy_log(&mut ctx, 2, MEM as i32, 5),
            WasmResult::InvalidMemoryAccess
        );

        let guard = handler.lock().unwrap();
        assert_eq!(guard.entries, vec![(LogLevel::Info, "hello".to_string())]);
    }

    #[test]
    fn test_fallback_handler_serves_unlocked_instances() {
        // No context data attached: the process default handler answers.
        let mut ctx = MockBackend::new(MEM);
        write(&mut ctx, 0, b"orphan log line");
        assert_eq!(proxy_log(&mut ctx, 1, 0, 15), WasmResult::Ok);
    }

    #[test]
    fn test_get_log_level_writes_u32_slot() {
        let mut ctx = default_ctx();
        assert_eq!(proxy_get_log_level(&mut ctx, 200), WasmResult::Ok);
        assert_eq!(ctx.get_u32(200).unwrap(), LogLevel::Info.as_i32() as u32);
    }

    #[test]
    fn test_time_writes_full_64_bit_slot() {
        let mut ctx = default_ctx();
        assert_eq!(proxy_get_current_time_nanoseconds(&mut ctx, 200), WasmResult::Ok);

        let bytes = ctx.get_memory(200, 8).unwrap();
        let nanos = u64::from_le_bytes(bytes.try_into().unwrap());
        assert!(nanos > u32::MAX as u64, "full 64-bit time expected");
    }

    #[test]
    fn test_get_status_copies_detail() {
        let mut ctx = default_ctx();
        assert_eq!(proxy_get_status(&mut ctx, 200, 204, 208), WasmResult::Ok);
        assert_eq!(ctx.get_u32(200).unwrap(), 200);
        assert_eq!(read_slot(&ctx, 204, 208), b"OK");
    }

    #[test]
    fn test_tick_period_forwarded() {
        let handler = fresh_default();
        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, handler.clone());

        assert_eq!(proxy_set_tick_period_milliseconds(&mut ctx, 250), WasmResult::Ok);
        assert_eq!(handler.lock().unwrap().tick_period_ms(), 250);
    }

    #[test]
    fn test_properties_roundtrip() {
        let mut ctx = default_ctx();
        write(&mut ctx, 0, b"node.id");
        write(&mut ctx, 16, b"sidecar-1");

        // Empty key is rejected before dispatch.
        assert_eq!(proxy_get_property(&mut ctx, 0, 0, 200, 204), WasmResult::BadArgument);
        assert_eq!(proxy_set_property(&mut ctx, 0, 0, 16, 9), WasmResult::BadArgument);

        assert_eq!(proxy_get_property(&mut ctx, 0, 7, 200, 204), WasmResult::NotFound);
        assert_eq!(proxy_set_property(&mut ctx, 0, 7, 16, 9), WasmResult::Ok);
        assert_eq!(proxy_get_property(&mut ctx, 0, 7, 200, 204), WasmResult::Ok);
        assert_eq!(read_slot(&ctx, 200, 204), b"sidecar-1");
    }

    #[test]
    fn test_stream_dispatch() {
        let mut ctx = default_ctx();
        assert_eq!(proxy_continue_stream(&mut ctx, 4), WasmResult::BadArgument);
        assert_eq!(proxy_close_stream(&mut ctx, -1), WasmResult::BadArgument);
        // Known stream type on the default handler.
        assert_eq!(proxy_continue_stream(&mut ctx, 0), WasmResult::Unimplemented);
        assert_eq!(proxy_close_stream(&mut ctx, 3), WasmResult::Unimplemented);
    }

    #[derive(Default)]
    struct HttpHandler {
        request_headers: PairMap,
        request_body: BytesBuffer,
    }
    impl ImportsHandler for HttpHandler {
        fn http_request_headers(&mut self) -> Option<&mut dyn HeaderMap> {
            Some(&mut self.request_headers)
        }
        fn http_request_body(&mut self) -> Option<&mut dyn IoBuffer> {
            Some(&mut self.request_body)
        }
    }

    #[test]
    fn test_header_map_operations() {
        let handler = Arc::new(Mutex::new(HttpHandler::default()));
        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, handler.clone());

        write(&mut ctx, 0, b"k");
        write(&mut ctx, 8, b"v");

        // Enum validation precedes everything else.
        assert_eq!(
            proxy_add_header_map_value(&mut ctx, 8, 0, 1, 8, 1),
            WasmResult::BadArgument
        );
        // Absent map (request trailers) is NotFound.
        assert_eq!(
            proxy_add_header_map_value(&mut ctx, 1, 0, 1, 8, 1),
            WasmResult::NotFound
        );
        // Empty key.
        assert_eq!(
            proxy_add_header_map_value(&mut ctx, 0, 0, 0, 8, 1),
            WasmResult::BadArgument
        );

        assert_eq!(proxy_add_header_map_value(&mut ctx, 0, 0, 1, 8, 1), WasmResult::Ok);
        assert_eq!(
            handler.lock().unwrap().request_headers.get("k"),
            Some("v".to_string())
        );

        assert_eq!(
            proxy_get_header_map_value(&mut ctx, 0, 0, 1, 200, 204),
            WasmResult::Ok
        );
        assert_eq!(read_slot(&ctx, 200, 204), b"v");

        // Missing key.
        write(&mut ctx, 16, b"nope");
        assert_eq!(
            proxy_get_header_map_value(&mut ctx, 0, 16, 4, 200, 204),
            WasmResult::NotFound
        );

        // Replace requires a non-empty value.
        assert_eq!(
            proxy_replace_header_map_value(&mut ctx, 0, 0, 1, 8, 0),
            WasmResult::BadArgument
        );
        write(&mut ctx, 24, b"w");
        assert_eq!(
            proxy_replace_header_map_value(&mut ctx, 0, 0, 1, 24, 1),
            WasmResult::Ok
        );
        assert_eq!(
            handler.lock().unwrap().request_headers.get("k"),
            Some("w".to_string())
        );

        assert_eq!(proxy_get_header_map_size(&mut ctx, 0, 208), WasmResult::Ok);
        assert_eq!(ctx.get_u32(208).unwrap(), 2);

        assert_eq!(proxy_remove_header_map_value(&mut ctx, 0, 0, 1), WasmResult::Ok);
        assert_eq!(handler.lock().unwrap().request_headers.get("k"), None);
    }

    #[test]
    fn test_header_map_pairs_wire_format() {
        let handler = Arc::new(Mutex::new(HttpHandler::default()));
        handler.lock().unwrap().request_headers.set("host", "example.com");
        handler.lock().unwrap().request_headers.set("x-empty", "");

        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, handler.clone());

        assert_eq!(proxy_get_header_map_pairs(&mut ctx, 0, 200, 204), WasmResult::Ok);
        let encoded = read_slot(&ctx, 200, 204);
        assert_eq!(
            encoded,
            encode_pairs(&[
                ("host".to_string(), "example.com".to_string()),
                ("x-empty".to_string(), String::new()),
            ])
        );

        // Push a serialized map back through set_header_map_pairs.
        let update = encode_pairs(&[("host".to_string(), "other".to_string())]);
        write(&mut ctx, 1024, &update);
        assert_eq!(
            proxy_set_header_map_pairs(&mut ctx, 0, 1024, update.len() as i32),
            WasmResult::Ok
        );
        assert_eq!(
            handler.lock().unwrap().request_headers.get("host"),
            Some("other".to_string())
        );
    }

    #[test]
    fn test_shared_data_cas_through_imports() {
        let mut ctx = default_ctx();
        write(&mut ctx, 0, b"k");
        write(&mut ctx, 16, b"v1");
        write(&mut ctx, 24, b"v2");
        write(&mut ctx, 32, b"v3");

        assert_eq!(proxy_set_shared_data(&mut ctx, 0, 1, 16, 2, 0), WasmResult::Ok);

        assert_eq!(
            proxy_get_shared_data(&mut ctx, 0, 1, 200, 204, 208),
            WasmResult::Ok
        );
        assert_eq!(read_slot(&ctx, 200, 204), b"v1");
        assert_eq!(ctx.get_u32(208).unwrap(), 1);

        assert_eq!(proxy_set_shared_data(&mut ctx, 0, 1, 24, 2, 1), WasmResult::Ok);
        assert_eq!(
            proxy_set_shared_data(&mut ctx, 0, 1, 32, 2, 1),
            WasmResult::CasMismatch
        );

        assert_eq!(
            proxy_get_shared_data(&mut ctx, 0, 1, 200, 204, 208),
            WasmResult::Ok
        );
        assert_eq!(read_slot(&ctx, 200, 204), b"v2");
        assert_eq!(ctx.get_u32(208).unwrap(), 2);

        // Missing key and empty key.
        write(&mut ctx, 40, b"zz");
        assert_eq!(
            proxy_get_shared_data(&mut ctx, 40, 2, 200, 204, 208),
            WasmResult::NotFound
        );
        assert_eq!(
            proxy_set_shared_data(&mut ctx, 0, 0, 16, 2, 0),
            WasmResult::BadArgument
        );
    }

    #[test]
    fn test_shared_queue_through_imports() {
        let mut ctx = default_ctx();
        write(&mut ctx, 0, b"q");
        write(&mut ctx, 8, b"a");
        write(&mut ctx, 16, b"b");

        assert_eq!(proxy_register_shared_queue(&mut ctx, 0, 1, 200), WasmResult::Ok);
        let id = ctx.get_u32(200).unwrap();
        assert_eq!(id, 1);

        // Idempotent by name.
        assert_eq!(proxy_register_shared_queue(&mut ctx, 0, 1, 200), WasmResult::Ok);
        assert_eq!(ctx.get_u32(200).unwrap(), id);

        // Resolve ignores the vm id but validates its memory range.
        assert_eq!(
            proxy_resolve_shared_queue(&mut ctx, 0, 0, 0, 1, 204),
            WasmResult::Ok
        );
        assert_eq!(ctx.get_u32(204).unwrap(), id);

        assert_eq!(proxy_enqueue_shared_queue(&mut ctx, 1, 8, 1), WasmResult::Ok);
        assert_eq!(proxy_enqueue_shared_queue(&mut ctx, 1, 16, 1), WasmResult::Ok);

        assert_eq!(proxy_dequeue_shared_queue(&mut ctx, 1, 208, 212), WasmResult::Ok);
        assert_eq!(read_slot(&ctx, 208, 212), b"a");
        assert_eq!(proxy_dequeue_shared_queue(&mut ctx, 1, 208, 212), WasmResult::Ok);
        assert_eq!(read_slot(&ctx, 208, 212), b"b");
        assert_eq!(
            proxy_dequeue_shared_queue(&mut ctx, 1, 208, 212),
            WasmResult::Empty
        );
        assert_eq!(
            proxy_dequeue_shared_queue(&mut ctx, 2, 208, 212),
            WasmResult::NotFound
        );
        assert_eq!(proxy_enqueue_shared_queue(&mut ctx, 2, 8, 1), WasmResult::NotFound);

        // Unknown queue name resolves to NotFound; empty name is rejected.
        write(&mut ctx, 24, b"other");
        assert_eq!(
            proxy_resolve_shared_queue(&mut ctx, 0, 0, 24, 5, 204),
            WasmResult::NotFound
        );
        assert_eq!(
            proxy_register_shared_queue(&mut ctx, 0, 0, 200),
            WasmResult::BadArgument
        );
    }

    #[test]
    fn test_buffer_write_rules() {
        let handler = Arc::new(Mutex::new(HttpHandler::default()));
        handler.lock().unwrap().request_body.write(b"hello");

        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, handler.clone());

        write(&mut ctx, 0, b"WX");
        write(&mut ctx, 8, b"XYZ");
        write(&mut ctx, 16, b"AB");

        // Partial overwrite from the head is rejected.
        assert_eq!(
            proxy_set_buffer_bytes(&mut ctx, 0, 0, 3, 0, 2),
            WasmResult::BadArgument
        );
        // start == 0, length == 0 drains and overwrites.
        assert_eq!(proxy_set_buffer_bytes(&mut ctx, 0, 0, 0, 8, 3), WasmResult::Ok);
        assert_eq!(handler.lock().unwrap().request_body.bytes(), b"XYZ");
        // start >= len appends.
        assert_eq!(proxy_set_buffer_bytes(&mut ctx, 0, 3, 2, 16, 2), WasmResult::Ok);
        assert_eq!(handler.lock().unwrap().request_body.bytes(), b"XYZAB");
        // A write into the middle is rejected.
        assert_eq!(
            proxy_set_buffer_bytes(&mut ctx, 0, 2, 1, 16, 2),
            WasmResult::BadArgument
        );

        assert_eq!(
            proxy_set_buffer_bytes(&mut ctx, 9, 0, 0, 8, 3),
            WasmResult::BadArgument
        );
    }

    #[test]
    fn test_buffer_reads_truncate() {
        let handler = Arc::new(Mutex::new(HttpHandler::default()));
        handler.lock().unwrap().request_body.write(b"hello");

        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, handler.clone());

        // Window starting inside the buffer is clamped to its end.
        assert_eq!(
            proxy_get_buffer_bytes(&mut ctx, 0, 1, 100, 200, 204),
            WasmResult::Ok
        );
        assert_eq!(read_slot(&ctx, 200, 204), b"ello");

        // Window past the end reads empty.
        assert_eq!(
            proxy_get_buffer_bytes(&mut ctx, 0, 9, 4, 200, 204),
            WasmResult::Ok
        );
        assert_eq!(read_slot(&ctx, 200, 204), b"");

        assert_eq!(
            proxy_get_buffer_bytes(&mut ctx, 0, -1, 4, 200, 204),
            WasmResult::BadArgument
        );
        assert_eq!(
            proxy_get_buffer_bytes(&mut ctx, 9, 0, 4, 200, 204),
            WasmResult::BadArgument
        );
        // Absent buffer (response body) is NotFound.
        assert_eq!(
            proxy_get_buffer_bytes(&mut ctx, 1, 0, 4, 200, 204),
            WasmResult::NotFound
        );

        assert_eq!(proxy_get_buffer_status(&mut ctx, 0, 208, 212), WasmResult::Ok);
        assert_eq!(ctx.get_u32(208).unwrap(), 5);
        assert_eq!(ctx.get_u32(212).unwrap(), 0);
    }

    #[test]
    fn test_metrics_through_imports() {
        let mut ctx = default_ctx();
        write(&mut ctx, 0, b"hits");

        assert_eq!(proxy_define_metric(&mut ctx, 3, 0, 4, 200), WasmResult::BadArgument);
        assert_eq!(proxy_define_metric(&mut ctx, 0, 0, 0, 200), WasmResult::BadArgument);

        assert_eq!(proxy_define_metric(&mut ctx, 0, 0, 4, 200), WasmResult::Ok);
        let id = ctx.get_u32(200).unwrap() as i32;
        assert_eq!(id, 1);

        assert_eq!(proxy_increment_metric(&mut ctx, id, 5), WasmResult::Ok);
        assert_eq!(proxy_record_metric(&mut ctx, 99, 1), WasmResult::NotFound);

        assert_eq!(proxy_get_metric(&mut ctx, id, 208), WasmResult::Ok);
        let bytes = ctx.get_memory(208, 8).unwrap();
        assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), 5);
    }

    #[test]
    fn test_foreign_function_copies_result() {
        struct Reverser;
        impl ImportsHandler for Reverser {
            fn call_foreign_function(
                &mut self,
                name: &str,
                param: &[u8],
            ) -> proxy_runtime_common::HostResult<Vec<u8>> {
                assert_eq!(name, "rev");
                Ok(param.iter().rev().copied().collect())
            }
        }

        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, Arc::new(Mutex::new(Reverser)));

        write(&mut ctx, 0, b"rev");
        write(&mut ctx, 8, b"abc");
        assert_eq!(
            proxy_call_foreign_function(&mut ctx, 0, 3, 8, 3, 200, 204),
            WasmResult::Ok
        );
        assert_eq!(read_slot(&ctx, 200, 204), b"cba");
    }

    #[test]
    fn test_send_local_response_decodes_headers() {
        #[derive(Default)]
        struct Capture {
            response: Option<(i32, Vec<u8>, Vec<u8>, Vec<(String, String)>, i32)>,
        }
        impl ImportsHandler for Capture {
            fn send_http_response(
                &mut self,
                status_code: i32,
                details: &[u8],
                body: &[u8],
                headers: Vec<(String, String)>,
                grpc_status: i32,
            ) -> WasmResult {
                self.response =
                    Some((status_code, details.to_vec(), body.to_vec(), headers, grpc_status));
                WasmResult::Ok
            }
        }

        let handler = Arc::new(Mutex::new(Capture::default()));
        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, handler.clone());

        let headers = encode_pairs(&[("retry".to_string(), "no".to_string())]);
        write(&mut ctx, 0, b"denied");
        write(&mut ctx, 16, b"forbidden");
        write(&mut ctx, 64, &headers);

        assert_eq!(
            proxy_send_local_response(&mut ctx, 403, 0, 6, 16, 9, 64, headers.len() as i32, -1),
            WasmResult::Ok
        );

        let guard = handler.lock().unwrap();
        let (status, details, body, pairs, grpc) = guard.response.clone().unwrap();
        assert_eq!(status, 403);
        assert_eq!(details, b"denied");
        assert_eq!(body, b"forbidden");
        assert_eq!(pairs, vec![("retry".to_string(), "no".to_string())]);
        assert_eq!(grpc, -1);
    }

    #[test]
    fn test_callouts_return_tokens() {
        struct Callouts;
        impl ImportsHandler for Callouts {
            fn http_call(
                &mut self,
                url: &str,
                headers: Vec<(String, String)>,
                body: &[u8],
                _trailers: Vec<(String, String)>,
                timeout_ms: i32,
            ) -> proxy_runtime_common::HostResult<i32> {
                assert_eq!(url, "http://upstream/");
                assert_eq!(headers, vec![("a".to_string(), "1".to_string())]);
                assert_eq!(body, b"ping");
                assert_eq!(timeout_ms, 500);
                Ok(7)
            }
            fn grpc_call(
                &mut self,
                service: &str,
                service_name: &str,
                method: &str,
                _initial_metadata: Vec<(String, String)>,
                message: &[u8],
                timeout_ms: i32,
            ) -> proxy_runtime_common::HostResult<i32> {
                assert_eq!(service, "cluster");
                assert_eq!(service_name, "svc.Echo");
                assert_eq!(method, "Ping");
                assert_eq!(message, b"m");
                assert_eq!(timeout_ms, 100);
                Ok(9)
            }
            fn send_grpc_message(
                &mut self,
                stream_id: i32,
                message: &[u8],
                end_of_stream: bool,
            ) -> WasmResult {
                assert_eq!(stream_id, 9);
                assert_eq!(message, b"m2");
                assert!(end_of_stream);
                WasmResult::Ok
            }
        }

        let mut ctx = MockBackend::new(MEM);
        attach(&mut ctx, Arc::new(Mutex::new(Callouts)));

        let headers = encode_pairs(&[("a".to_string(), "1".to_string())]);
        write(&mut ctx, 0, b"http://upstream/");
        write(&mut ctx, 64, &headers);
        write(&mut ctx, 128, b"ping");

        assert_eq!(
            http::proxy_http_call(
                &mut ctx,
                0,
                16,
                64,
                headers.len() as i32,
                128,
                4,
                64,
                headers.len() as i32,
                500,
                200,
            ),
            WasmResult::Ok
        );
        assert_eq!(ctx.get_u32(200).unwrap(), 7);

        write(&mut ctx, 256, b"cluster");
        write(&mut ctx, 280, b"svc.Echo");
        write(&mut ctx, 300, b"Ping");
        write(&mut ctx, 320, b"m");
        assert_eq!(
            grpc::proxy_grpc_call(
                &mut ctx,
                256,
                7,
                280,
                8,
                300,
                4,
                64,
                headers.len() as i32,
                320,
                1,
                100,
                204,
            ),
            WasmResult::Ok
        );
        assert_eq!(ctx.get_u32(204).unwrap(), 9);

        write(&mut ctx, 340, b"m2");
        assert_eq!(grpc::proxy_grpc_send(&mut ctx, 9, 340, 2, 1), WasmResult::Ok);
        assert_eq!(grpc::proxy_grpc_cancel(&mut ctx, 9), WasmResult::Unimplemented);
        assert_eq!(grpc::proxy_grpc_close(&mut ctx, 9), WasmResult::Unimplemented);
    }
}
