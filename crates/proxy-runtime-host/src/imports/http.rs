//! HTTP callout host function.

use proxy_runtime_common::sync;
use proxy_runtime_common::types::WasmResult;
use proxy_runtime_core::engine::CallContext;

use crate::header::decode_pairs;

use super::import_handler;

#[allow(clippy::too_many_arguments)]
pub(crate) fn proxy_http_call(
    ctx: &mut dyn CallContext,
    uri_ptr: i32,
    uri_size: i32,
    header_pairs_ptr: i32,
    header_pairs_size: i32,
    body_ptr: i32,
    body_size: i32,
    trailer_pairs_ptr: i32,
    trailer_pairs_size: i32,
    timeout_ms: i32,
    callout_id_ptr: i32,
) -> WasmResult {
    let Ok(uri) = ctx.get_memory(uri_ptr as u64, uri_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(header_data) = ctx.get_memory(header_pairs_ptr as u64, header_pairs_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(body) = ctx.get_memory(body_ptr as u64, body_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(trailer_data) = ctx.get_memory(trailer_pairs_ptr as u64, trailer_pairs_size as u64)
    else {
        return WasmResult::InvalidMemoryAccess;
    };

    let callout_id = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.http_call(
            &String::from_utf8_lossy(&uri),
            decode_pairs(&header_data),
            &body,
            decode_pairs(&trailer_data),
            timeout_ms,
        ) {
            Ok(id) => id,
            Err(result) => return result,
        }
    };

    if ctx.put_u32(callout_id_ptr as u64, callout_id as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}
