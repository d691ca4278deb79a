//! Metric host functions.

use proxy_runtime_common::sync;
use proxy_runtime_common::types::{MetricType, WasmResult};
use proxy_runtime_core::engine::CallContext;

use super::import_handler;

pub(crate) fn proxy_define_metric(
    ctx: &mut dyn CallContext,
    metric_type: i32,
    name_ptr: i32,
    name_size: i32,
    return_metric_id: i32,
) -> WasmResult {
    let Some(metric_type) = MetricType::from_i32(metric_type) else {
        return WasmResult::BadArgument;
    };
    let Ok(name) = ctx.get_memory(name_ptr as u64, name_size as u64) else {
        return WasmResult::InvalidMemoryAccess;
    };
    if name.is_empty() {
        return WasmResult::BadArgument;
    }

    let metric_id = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.define_metric(metric_type, &String::from_utf8_lossy(&name)) {
            Ok(id) => id,
            Err(result) => return result,
        }
    };

    if ctx.put_u32(return_metric_id as u64, metric_id as u32).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}

pub(crate) fn proxy_increment_metric(
    ctx: &mut dyn CallContext,
    metric_id: i32,
    offset: i64,
) -> WasmResult {
    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.increment_metric(metric_id, offset)
}

pub(crate) fn proxy_record_metric(
    ctx: &mut dyn CallContext,
    metric_id: i32,
    value: i64,
) -> WasmResult {
    let handler = import_handler(ctx);
    let mut handler = sync::lock(&handler);
    handler.record_metric(metric_id, value)
}

pub(crate) fn proxy_get_metric(
    ctx: &mut dyn CallContext,
    metric_id: i32,
    result_u64_ptr: i32,
) -> WasmResult {
    let value = {
        let handler = import_handler(ctx);
        let mut handler = sync::lock(&handler);
        match handler.metric(metric_id) {
            Ok(value) => value,
            Err(result) => return result,
        }
    };

    // Metric slots are 64 bits wide.
    if ctx.put_u64(result_u64_ptr as u64, value).is_err() {
        return WasmResult::InvalidMemoryAccess;
    }
    WasmResult::Ok
}
