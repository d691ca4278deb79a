//! Buffer host functions.
//!
//! `proxy_set_buffer_bytes` has three disjoint cases:
//! - `start == 0` with `length == 0` or `length >= buffer length`: drain
//!   and overwrite
//! - `start >= buffer length`: append
//! - anything else: `BadArgument`

use proxy_runtime_common::sync;
use proxy_runtime_common::types::{BufferType, WasmResult};
use proxy_runtime_core::engine::CallContext;

use crate::buffer::IoBuffer;
use crate::handler::ImportsHandler;

use super::{copy_into_guest, import_handler};

fn buffer_of(handler: &mut dyn ImportsHandler, buffer_type: BufferType) -> Option<&mut dyn IoBuffer> {
    match buffer_type {
        BufferType::HttpRequestBody => handler.http_request_body(),
        BufferType::HttpResponseBody => handler.http_response_body(),
        BufferType::DownstreamData => handler.downstream_data(),
        BufferType::UpstreamData => handler.upstream_data(),
        BufferType::HttpCallResponseBody => handler.http_call_response_body(),
        BufferType::GrpcReceiveBuffer => handler.grpc_receive_buffer(),
        BufferType::VmConfiguration => handler.vm_config(),
        BufferType::PluginConfiguration => handler.plugin_config(),
        BufferType::CallData => handler.foreign_call_data(),
    }
}

pub(crate) fn proxy_get_buffer_bytes(
    ctx: &mut dyn CallContext,
    buffer_type: i32,
    start: i32,
    length: i32,
    return_data_ptr: i32,
    return_data_size: i32,
) -> WasmResult {
    let Some(buffer_type) = BufferType::from_i32(buffer_type) else {
        return WasmResult::BadArgument;
    };
    if start < 0 || length < 0 {
        return WasmResult::BadArgument;
    }

    let slice = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        let Some(buffer) = buffer_of(&mut *handler, buffer_type) else {
            return WasmResult::NotFound;
        };

        let start = start as usize;
        let bytes = buffer.bytes();
        if start >= bytes.len() {
            Vec::new()
        } else {
            // Truncate the requested window to the buffer's end.
            let end = (start + length as usize).min(bytes.len());
            bytes[start..end].to_vec()
        }
    };

    copy_into_guest(ctx, &slice, return_data_ptr, return_data_size)
}

pub(crate) fn proxy_set_buffer_bytes(
    ctx: &mut dyn CallContext,
    buffer_type: i32,
    start: i32,
    length: i32,
    data_ptr: i32,
    data_size: i32,
) -> WasmResult {
    let Some(buffer_type) = BufferType::from_i32(buffer_type) else {
        return WasmResult::BadArgument;
    };
    let Ok(content) = ctx.get_memory(data_ptr as u64, data_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    let Some(buffer) = buffer_of(&mut *handler, buffer_type) else {
        return WasmResult::NotFound;
    };

    let buffered = buffer.len();
    if start == 0 {
        if length == 0 || (length >= 0 && length as usize >= buffered) {
            buffer.drain(buffered);
            buffer.write(&content);
            return WasmResult::Ok;
        }
        return WasmResult::BadArgument;
    }
    if start > 0 && start as usize >= buffered {
        buffer.write(&content);
        return WasmResult::Ok;
    }
    WasmResult::BadArgument
}

pub(crate) fn proxy_get_buffer_status(
    ctx: &mut dyn CallContext,
    buffer_type: i32,
    length_ptr: i32,
    flags_ptr: i32,
) -> WasmResult {
    let Some(buffer_type) = BufferType::from_i32(buffer_type) else {
        return WasmResult::BadArgument;
    };

    let length = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        let Some(buffer) = buffer_of(&mut *handler, buffer_type) else {
            return WasmResult::NotFound;
        };
        buffer.len()
    };

    if ctx.put_u32(length_ptr as u64, length as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    if ctx.put_u32(flags_ptr as u64, 0).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}
