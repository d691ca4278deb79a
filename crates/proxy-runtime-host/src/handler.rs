//! The host capability consumed by the import layer.
//!
//! [`ImportsHandler`] is what an embedding proxy implements to back the
//! guest-visible host functions. Every method has a default: absent maps
//! and buffers are `None`, operations the embedder has not wired up answer
//! `Unimplemented`, and `wait()` continues. A handler therefore only
//! overrides what its deployment actually supports.
//!
//! [`DefaultImportsHandler`] is the batteries-included implementation used
//! when no handler is installed: tracing-backed logging, the process-wide
//! shared-data store and queue registry, a property map, an in-memory
//! metric registry, and the tick-period slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, trace, warn};

use proxy_runtime_common::types::{Action, HostResult, LogLevel, MetricType, WasmResult};

use crate::buffer::IoBuffer;
use crate::header::HeaderMap;
use crate::shared::{global_shared_data, global_shared_queues, SharedDataStore, SharedQueueRegistry};

pub trait ImportsHandler: Send {
    // Logging

    fn log(&mut self, _level: LogLevel, _message: &str) -> WasmResult {
        WasmResult::Ok
    }

    fn log_level(&mut self) -> LogLevel {
        LogLevel::Info
    }

    // System

    fn set_effective_context(&mut self, _context_id: i32) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn done(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    // Timer and time

    /// Ask the host to schedule periodic `on_tick` dispatches. A period of
    /// zero disables ticks.
    fn set_tick_period(&mut self, _period_ms: i32) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn current_time_nanoseconds(&mut self) -> HostResult<u64> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| WasmResult::InternalFailure)?;
        Ok(now.as_nanos() as u64)
    }

    /// `(code, detail)` of the most recent asynchronous call.
    fn status(&mut self) -> HostResult<(u32, String)> {
        Ok((200, "OK".to_string()))
    }

    // Configuration buffers

    fn vm_config(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    fn plugin_config(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    // Properties

    fn property(&mut self, _key: &str) -> HostResult<String> {
        Ok(String::new())
    }

    fn set_property(&mut self, _key: &str, _value: &str) -> WasmResult {
        WasmResult::Unimplemented
    }

    // L4

    fn downstream_data(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    fn upstream_data(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    fn resume_downstream(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn resume_upstream(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn close_downstream(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn close_upstream(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    // HTTP request

    fn http_request_headers(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    fn http_request_body(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    fn http_request_trailers(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    fn resume_http_request(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn close_http_request(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    // HTTP response

    fn http_response_headers(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    fn http_response_body(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    fn http_response_trailers(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    fn resume_http_response(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn close_http_response(&mut self) -> WasmResult {
        WasmResult::Unimplemented
    }

    /// Serve a synthetic response for the current request.
    fn send_http_response(
        &mut self,
        _status_code: i32,
        _details: &[u8],
        _body: &[u8],
        _headers: Vec<(String, String)>,
        _grpc_status: i32,
    ) -> WasmResult {
        WasmResult::Unimplemented
    }

    // HTTP callout

    fn http_call(
        &mut self,
        _url: &str,
        _headers: Vec<(String, String)>,
        _body: &[u8],
        _trailers: Vec<(String, String)>,
        _timeout_ms: i32,
    ) -> HostResult<i32> {
        Err(WasmResult::Unimplemented)
    }

    fn http_call_response_headers(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    fn http_call_response_body(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    fn http_call_response_trailers(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    // gRPC

    fn grpc_call(
        &mut self,
        _service: &str,
        _service_name: &str,
        _method: &str,
        _initial_metadata: Vec<(String, String)>,
        _message: &[u8],
        _timeout_ms: i32,
    ) -> HostResult<i32> {
        Err(WasmResult::Unimplemented)
    }

    fn open_grpc_stream(
        &mut self,
        _service: &str,
        _service_name: &str,
        _method: &str,
        _initial_metadata: Vec<(String, String)>,
    ) -> HostResult<i32> {
        Err(WasmResult::Unimplemented)
    }

    fn send_grpc_message(
        &mut self,
        _stream_id: i32,
        _message: &[u8],
        _end_of_stream: bool,
    ) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn cancel_grpc_call(&mut self, _token: i32) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn close_grpc_call(&mut self, _token: i32) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn grpc_receive_initial_metadata(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    fn grpc_receive_buffer(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    fn grpc_receive_trailer_metadata(&mut self) -> Option<&mut dyn HeaderMap> {
        None
    }

    // Foreign functions

    fn call_foreign_function(&mut self, _name: &str, _param: &[u8]) -> HostResult<Vec<u8>> {
        Err(WasmResult::Unimplemented)
    }

    fn foreign_call_data(&mut self) -> Option<&mut dyn IoBuffer> {
        None
    }

    // Metrics

    fn define_metric(&mut self, _metric_type: MetricType, _name: &str) -> HostResult<i32> {
        Err(WasmResult::Unimplemented)
    }

    fn increment_metric(&mut self, _metric_id: i32, _offset: i64) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn record_metric(&mut self, _metric_id: i32, _value: i64) -> WasmResult {
        WasmResult::Unimplemented
    }

    fn metric(&mut self, _metric_id: i32) -> HostResult<u64> {
        Err(WasmResult::Unimplemented)
    }

    // Shared data

    fn get_shared_data(&mut self, _key: &str) -> HostResult<(Vec<u8>, u32)> {
        Err(WasmResult::NotFound)
    }

    fn set_shared_data(&mut self, _key: &str, _value: &[u8], _cas: u32) -> WasmResult {
        WasmResult::Unimplemented
    }

    // Shared queues

    fn register_shared_queue(&mut self, _name: &str) -> HostResult<u32> {
        Err(WasmResult::Unimplemented)
    }

    fn resolve_shared_queue(&mut self, _name: &str) -> HostResult<u32> {
        Err(WasmResult::NotFound)
    }

    fn enqueue_shared_queue(&mut self, _queue_id: u32, _data: &[u8]) -> WasmResult {
        WasmResult::NotFound
    }

    fn dequeue_shared_queue(&mut self, _queue_id: u32) -> HostResult<Vec<u8>> {
        Err(WasmResult::NotFound)
    }

    /// Consulted after each export invocation on ABI v0.1.0 contexts,
    /// where synchronous callouts suspend the guest. Later ABI versions
    /// derive the pause state from the callback's returned `Action`.
    fn wait(&mut self) -> Action {
        Action::Continue
    }
}

/// Default host capability, used when no handler is installed on the
/// instance.
pub struct DefaultImportsHandler {
    shared_data: Arc<SharedDataStore>,
    shared_queues: Arc<SharedQueueRegistry>,
    properties: HashMap<String, String>,
    metrics: MetricsRegistry,
    tick_period_ms: i32,
}

impl DefaultImportsHandler {
    /// Handler backed by the process-wide shared-data and queue singletons.
    pub fn new() -> Self {
        Self::with_stores(global_shared_data(), global_shared_queues())
    }

    /// Handler backed by caller-supplied stores; tests use this to get a
    /// fresh, isolated state.
    pub fn with_stores(
        shared_data: Arc<SharedDataStore>,
        shared_queues: Arc<SharedQueueRegistry>,
    ) -> Self {
        Self {
            shared_data,
            shared_queues,
            properties: HashMap::new(),
            metrics: MetricsRegistry::default(),
            tick_period_ms: 0,
        }
    }

    /// The last tick period requested by the guest, zero when disabled.
    pub fn tick_period_ms(&self) -> i32 {
        self.tick_period_ms
    }
}

impl Default for DefaultImportsHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportsHandler for DefaultImportsHandler {
    fn log(&mut self, level: LogLevel, message: &str) -> WasmResult {
        match level {
            LogLevel::Trace => trace!(guest_log = true, "{message}"),
            LogLevel::Debug => debug!(guest_log = true, "{message}"),
            LogLevel::Info => info!(guest_log = true, "{message}"),
            LogLevel::Warning => warn!(guest_log = true, "{message}"),
            LogLevel::Error | LogLevel::Critical => error!(guest_log = true, "{message}"),
        }
        WasmResult::Ok
    }

    fn set_tick_period(&mut self, period_ms: i32) -> WasmResult {
        self.tick_period_ms = period_ms;
        WasmResult::Ok
    }

    fn property(&mut self, key: &str) -> HostResult<String> {
        self.properties.get(key).cloned().ok_or(WasmResult::NotFound)
    }

    fn set_property(&mut self, key: &str, value: &str) -> WasmResult {
        self.properties.insert(key.to_string(), value.to_string());
        WasmResult::Ok
    }

    fn define_metric(&mut self, metric_type: MetricType, name: &str) -> HostResult<i32> {
        Ok(self.metrics.define(metric_type, name))
    }

    fn increment_metric(&mut self, metric_id: i32, offset: i64) -> WasmResult {
        self.metrics.increment(metric_id, offset)
    }

    fn record_metric(&mut self, metric_id: i32, value: i64) -> WasmResult {
        self.metrics.record(metric_id, value)
    }

    fn metric(&mut self, metric_id: i32) -> HostResult<u64> {
        self.metrics.get(metric_id)
    }

    fn get_shared_data(&mut self, key: &str) -> HostResult<(Vec<u8>, u32)> {
        self.shared_data.get(key)
    }

    fn set_shared_data(&mut self, key: &str, value: &[u8], cas: u32) -> WasmResult {
        self.shared_data.set(key, value, cas)
    }

    fn register_shared_queue(&mut self, name: &str) -> HostResult<u32> {
        self.shared_queues.register(name)
    }

    fn resolve_shared_queue(&mut self, name: &str) -> HostResult<u32> {
        self.shared_queues.resolve(name)
    }

    fn enqueue_shared_queue(&mut self, queue_id: u32, data: &[u8]) -> WasmResult {
        self.shared_queues.enqueue(queue_id, data)
    }

    fn dequeue_shared_queue(&mut self, queue_id: u32) -> HostResult<Vec<u8>> {
        self.shared_queues.dequeue(queue_id)
    }
}

/// In-memory metric registry: ids are handed out from 1 and stable per
/// `(type, name)` pair.
#[derive(Debug, Default)]
struct MetricsRegistry {
    cells: Vec<MetricCell>,
}

#[derive(Debug)]
struct MetricCell {
    kind: MetricType,
    name: String,
    value: i64,
}

impl MetricsRegistry {
    fn define(&mut self, kind: MetricType, name: &str) -> i32 {
        if let Some(index) = self
            .cells
            .iter()
            .position(|cell| cell.kind == kind && cell.name == name)
        {
            return index as i32 + 1;
        }

        self.cells.push(MetricCell {
            kind,
            name: name.to_string(),
            value: 0,
        });
        self.cells.len() as i32
    }

    fn increment(&mut self, id: i32, offset: i64) -> WasmResult {
        match self.cell_mut(id) {
            Some(cell) => {
                cell.value = cell.value.wrapping_add(offset);
                WasmResult::Ok
            }
            None => WasmResult::NotFound,
        }
    }

    fn record(&mut self, id: i32, value: i64) -> WasmResult {
        match self.cell_mut(id) {
            Some(cell) => {
                cell.value = value;
                WasmResult::Ok
            }
            None => WasmResult::NotFound,
        }
    }

    fn get(&self, id: i32) -> HostResult<u64> {
        if id < 1 {
            return Err(WasmResult::NotFound);
        }
        self.cells
            .get(id as usize - 1)
            .map(|cell| cell.value as u64)
            .ok_or(WasmResult::NotFound)
    }

    fn cell_mut(&mut self, id: i32) -> Option<&mut MetricCell> {
        if id < 1 {
            return None;
        }
        self.cells.get_mut(id as usize - 1)
    }
}
