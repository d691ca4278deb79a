//! gRPC callout host functions.

use proxy_runtime_common::sync;
use proxy_runtime_common::types::WasmResult;
use proxy_runtime_core::engine::CallContext;

use crate::header::decode_pairs;

use super::import_handler;

#[allow(clippy::too_many_arguments)]
pub(crate) fn proxy_grpc_call(
    ctx: &mut dyn CallContext,
    service_ptr: i32,
    service_size: i32,
    service_name_ptr: i32,
    service_name_size: i32,
    method_ptr: i32,
    method_size: i32,
    initial_metadata_ptr: i32,
    initial_metadata_size: i32,
    message_ptr: i32,
    message_size: i32,
    timeout_ms: i32,
    return_callout_id: i32,
) -> WasmResult {
    let Ok(service) = ctx.get_memory(service_ptr as u64, service_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(service_name) = ctx.get_memory(service_name_ptr as u64, service_name_size as u64)
    else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(method) = ctx.get_memory(method_ptr as u64, method_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(metadata) = ctx.get_memory(initial_metadata_ptr as u64, initial_metadata_size as u64)
    else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(message) = ctx.get_memory(message_ptr as u64, message_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let callout_id = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.grpc_call(
            &String::from_utf8_lossy(&service),
            &String::from_utf8_lossy(&service_name),
            &String::from_utf8_lossy(&method),
            decode_pairs(&metadata),
            &message,
            timeout_ms,
        ) {
            Ok(id) => id,
            Err(result) => return result,
        }
    };

    if ctx.put_u32(return_callout_id as u64, callout_id as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn proxy_grpc_stream(
    ctx: &mut dyn CallContext,
    service_ptr: i32,
    service_size: i32,
    service_name_ptr: i32,
    service_name_size: i32,
    method_ptr: i32,
    method_size: i32,
    initial_metadata_ptr: i32,
    initial_metadata_size: i32,
    _message_ptr: i32,
    _message_size: i32,
    return_stream_id: i32,
) -> WasmResult {
    let Ok(service) = ctx.get_memory(service_ptr as u64, service_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(service_name) = ctx.get_memory(service_name_ptr as u64, service_name_size as u64)
    else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(method) = ctx.get_memory(method_ptr as u64, method_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(metadata) = ctx.get_memory(initial_metadata_ptr as u64, initial_metadata_size as u64)
    else {
        return WasmResult::InvalidMemoryAccess;
    };

    let stream_id = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.open_grpc_stream(
            &String::from_utf8_lossy(&service),
            &String::from_utf8_lossy(&service_name),
            &String::from_utf8_lossy(&method),
            decode_pairs(&metadata),
        ) {
            Ok(id) => id,
            Err(result) => return result,
        }
    };

    if ctx.put_u32(return_stream_id as u64, stream_id as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

pub(crate) fn proxy_grpc_send(
    ctx: &mut dyn CallContext,
    stream_id: i32,
    message_ptr: i32,
    message_size: i32,
    end_of_stream: i32,
) -> WasmResult {
    let Ok(message) = ctx.get_memory(message_ptr as u64, message_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.send_grpc_message(stream_id, &message, end_of_stream != 0)
}

pub(crate) fn proxy_grpc_cancel(ctx: &mut dyn CallContext, callout_id: i32) -> WasmResult {
    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.cancel_grpc_call(callout_id)
}

pub(crate) fn proxy_grpc_close(ctx: &mut dyn CallContext, callout_id: i32) -> WasmResult {
    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.close_grpc_call(callout_id)
}
