//! Header/trailer/metadata map host functions.

use proxy_runtime_common::sync;
use proxy_runtime_common::types::{MapType, WasmResult};
use proxy_runtime_core::engine::CallContext;

use crate::handler::ImportsHandler;
use crate::header::{decode_pairs, encode_pairs, HeaderMap};

use super::{copy_into_guest, import_handler};

fn map_of(handler: &mut dyn ImportsHandler, map_type: MapType) -> Option<&mut dyn HeaderMap> {
    match map_type {
        MapType::HttpRequestHeaders => handler.http_request_headers(),
        MapType::HttpRequestTrailers => handler.http_request_trailers(),
        MapType::HttpResponseHeaders => handler.http_response_headers(),
        MapType::HttpResponseTrailers => handler.http_response_trailers(),
        MapType::GrpcReceiveInitialMetadata => handler.grpc_receive_initial_metadata(),
        MapType::GrpcReceiveTrailingMetadata => handler.grpc_receive_trailer_metadata(),
        MapType::HttpCallResponseHeaders => handler.http_call_response_headers(),
        MapType::HttpCallResponseTrailers => handler.http_call_response_trailers(),
    }
}

pub(crate) fn proxy_add_header_map_value(
    ctx: &mut dyn CallContext,
    map_type: i32,
    key_ptr: i32,
    key_size: i32,
    value_ptr: i32,
    value_size: i32,
) -> WasmResult {
    let Some(map_type) = MapType::from_i32(map_type) else {
        return WasmResult::BadArgument;
    };
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
    let Some(map) = map_of(&mut *handler, map_type) else {
        return WasmResult::NotFound;
    };

    map.add(
        &String::from_utf8_lossy(&key),
        &String::from_utf8_lossy(&value),
    );
    WasmResult::Ok
}

pub(crate) fn proxy_get_header_map_value(
    ctx: &mut dyn CallContext,
    map_type: i32,
    key_ptr: i32,
    key_size: i32,
    return_value_ptr: i32,
    return_value_size: i32,
) -> WasmResult {
    let Some(map_type) = MapType::from_i32(map_type) else {
        return WasmResult::BadArgument;
    };
    let Ok(key) = ctx.get_memory(key_ptr as u64, key_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if key.is_empty() {
        return WasmResult::BadArgument;
    }

    let value = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        let Some(map) = map_of(&mut *handler, map_type) else {
            return WasmResult::NotFound;
        };
        match map.get(&String::from_utf8_lossy(&key)) {
            Some(value) => value,
            None => return WasmResult::NotFound,
        }
    };

    copy_into_guest(ctx, value.as_bytes(), return_value_ptr, return_value_size)
}

pub(crate) fn proxy_get_header_map_pairs(
    ctx: &mut dyn CallContext,
    map_type: i32,
    return_data_ptr: i32,
    return_data_size: i32,
) -> WasmResult {
    let Some(map_type) = MapType::from_i32(map_type) else {
        return WasmResult::BadArgument;
    };

    let pairs = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        let Some(map) = map_of(&mut *handler, map_type) else {
            return WasmResult::NotFound;
        };
        map.pairs()
    };

    copy_into_guest(ctx, &encode_pairs(&pairs), return_data_ptr, return_data_size)
}

pub(crate) fn proxy_set_header_map_pairs(
    ctx: &mut dyn CallContext,
    map_type: i32,
    data_ptr: i32,
    data_size: i32,
) -> WasmResult {
    let Some(map_type) = MapType::from_i32(map_type) else {
        return WasmResult::BadArgument;
    };
    let Ok(data) = ctx.get_memory(data_ptr as u64, data_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    let Some(map) = map_of(&mut *handler, map_type) else {
        return WasmResult::NotFound;
    };

    for (key, value) in decode_pairs(&data) {
        map.set(&key, &value);
    }
    WasmResult::Ok
}

pub(crate) fn proxy_replace_header_map_value(
    ctx: &mut dyn CallContext,
    map_type: i32,
    key_ptr: i32,
    key_size: i32,
    value_ptr: i32,
    value_size: i32,
) -> WasmResult {
    let Some(map_type) = MapType::from_i32(map_type) else {
        return WasmResult::BadArgument;
    };
    let Ok(key) = ctx.get_memory(key_ptr as u64, key_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if key.is_empty() {
        return WasmResult::BadArgument;
    }
    let Ok(value) = ctx.get_memory(value_ptr as u64, value_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if value.is_empty() {
        return WasmResult::BadArgument;
    }

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    let Some(map) = map_of(&mut *handler, map_type) else {
        return WasmResult::NotFound;
    };

    map.set(
        &String::from_utf8_lossy(&key),
        &String::from_utf8_lossy(&value),
    );
    WasmResult::Ok
}

pub(crate) fn proxy_remove_header_map_value(
    ctx: &mut dyn CallContext,
    map_type: i32,
    key_ptr: i32,
    key_size: i32,
) -> WasmResult {
    let Some(map_type) = MapType::from_i32(map_type) else {
        return WasmResult::BadArgument;
    };
    let Ok(key) = ctx.get_memory(key_ptr as u64, key_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if key.is_empty() {
        return WasmResult::BadArgument;
    }

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    let Some(map) = map_of(&mut *handler, map_type) else {
        return WasmResult::NotFound;
    };

    map.remove(&String::from_utf8_lossy(&key));
    WasmResult::Ok
}

pub(crate) fn proxy_get_header_map_size(
    ctx: &mut dyn CallContext,
    map_type: i32,
    size_ptr: i32,
) -> WasmResult {
    let Some(map_type) = MapType::from_i32(map_type) else {
        return WasmResult::BadArgument;
    };

    let size = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        let Some(map) = map_of(&mut *handler, map_type) else {
            return WasmResult::NotFound;
        };
        map.byte_size()
    };

    if ctx.put_u32(size_ptr as u64, size as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}
