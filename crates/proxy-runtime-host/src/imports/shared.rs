//! Shared-data and shared-queue host functions.

use proxy_runtime_common::sync;
use proxy_runtime_common::types::WasmResult;
use proxy_runtime_core::engine::CallContext;

use super::{copy_into_guest, import_handler};

pub(crate) fn proxy_get_shared_data(
    ctx: &mut dyn CallContext,
    key_ptr: i32,
    key_size: i32,
    return_value_ptr: i32,
    return_value_size: i32,
    return_cas_ptr: i32,
) -> WasmResult {
    let Ok(key) = ctx.get_memory(key_ptr as u64, key_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if key.is_empty() {
        return WasmResult::BadArgument;
    }

    let (value, cas) = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.get_shared_data(&String::from_utf8_lossy(&key)) {
            Ok(found) => found,
            Err(result) => return result,
        }
    };

    let copied = copy_into_guest(ctx, &value, return_value_ptr, return_value_size);
    if copied != WasmResult::Ok {
        return copied;
    }

    if ctx.put_u32(return_cas_ptr as u64, cas).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

pub(crate) fn proxy_set_shared_data(
    ctx: &mut dyn CallContext,
    key_ptr: i32,
    key_size: i32,
    value_ptr: i32,
    value_size: i32,
    cas: i32,
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
    handler.set_shared_data(&String::from_utf8_lossy(&key), &value, cas as u32)
}

pub(crate) fn proxy_register_shared_queue(
    ctx: &mut dyn CallContext,
    queue_name_ptr: i32,
    queue_name_size: i32,
    token_id_ptr: i32,
) -> WasmResult {
    let Ok(queue_name) = ctx.get_memory(queue_name_ptr as u64, queue_name_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if queue_name.is_empty() {
        return WasmResult::BadArgument;
    }

    let queue_id = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.register_shared_queue(&String::from_utf8_lossy(&queue_name)) {
            Ok(id) => id,
            Err(result) => return result,
        }
    };

    if ctx.put_u32(token_id_ptr as u64, queue_id).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

pub(crate) fn proxy_resolve_shared_queue(
    ctx: &mut dyn CallContext,
    vm_id_ptr: i32,
    vm_id_size: i32,
    queue_name_ptr: i32,
    queue_name_size: i32,
    token_id_ptr: i32,
) -> WasmResult {
    // Queues are process-scoped: vm_id is validated but carries no
    // semantics.
    let Ok(_vm_id) = ctx.get_memory(vm_id_ptr as u64, vm_id_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    let Ok(queue_name) = ctx.get_memory(queue_name_ptr as u64, queue_name_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if queue_name.is_empty() {
        return WasmResult::BadArgument;
    }

    let queue_id = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.resolve_shared_queue(&String::from_utf8_lossy(&queue_name)) {
            Ok(id) => id,
            Err(result) => return result,
        }
    };

    if ctx.put_u32(token_id_ptr as u64, queue_id).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

pub(crate) fn proxy_enqueue_shared_queue(
    ctx: &mut dyn CallContext,
    token_id: i32,
    data_ptr: i32,
    data_size: i32,
) -> WasmResult {
    let Ok(data) = ctx.get_memory(data_ptr as u64, data_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };

    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.enqueue_shared_queue(token_id as u32, &data)
}

pub(crate) fn proxy_dequeue_shared_queue(
    ctx: &mut dyn CallContext,
    token_id: i32,
    return_value_ptr: i32,
    return_value_size: i32,
) -> WasmResult {
    let value = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.dequeue_shared_queue(token_id as u32) {
            Ok(value) => value,
            Err(result) => return result,
        }
    };

    copy_into_guest(ctx, &value, return_value_ptr, return_value_size)
}
