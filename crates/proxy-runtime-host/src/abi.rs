//! The ABI context: typed wrappers over the guest's lifecycle exports.
//!
//! One [`AbiContext`] pairs one [`Instance`] with one handler. The ABI
//! variant is discovered from the module's `proxy_abi_*` marker export;
//! a module with no recognized marker is driven as v0.2.1.
//!
//! Decoding rules:
//! - `Action`-valued callbacks: `1` pauses, anything else continues. On
//!   ABI v0.1.0 the action instead comes from the handler's `wait()` hook,
//!   which models synchronous callouts suspending the guest.
//! - `bool`-valued callbacks: `1` is true, any other i32 is false, and a
//!   non-i32 return is an `InvalidResult` protocol violation.
//! - A trap is reported to the instance error hook and surfaced to the
//!   caller; for `Action`-valued callbacks the caller should treat it as
//!   `Pause`.
//! - An absent export surfaces as `FuncNotExported`; optional callbacks
//!   (gRPC, trailers, tick) are commonly absent and non-fatal.

use std::sync::{Arc, Mutex};

use proxy_runtime_common::{sync, AbiVersion, Action, PeerType, RuntimeError};
use proxy_runtime_core::engine::ContextData;
use proxy_runtime_core::{Instance, WasmValue};

use crate::handler::ImportsHandler;

/// Contents of the instance data slot while a request holds the lock.
/// Host functions downcast to this to reach the handler.
pub struct CurrentContext {
    pub imports: Arc<Mutex<dyn ImportsHandler>>,
}

/// Drives one guest instance through the Proxy-Wasm lifecycle.
pub struct AbiContext {
    instance: Arc<Instance>,
    imports: Arc<Mutex<dyn ImportsHandler>>,
    version: AbiVersion,
}

impl AbiContext {
    pub fn new(imports: Arc<Mutex<dyn ImportsHandler>>, instance: Arc<Instance>) -> Self {
        let version = instance
            .abi_versions()
            .iter()
            .find_map(|name| AbiVersion::from_export_name(name))
            .unwrap_or(AbiVersion::V0_2_1);

        Self {
            instance,
            imports,
            version,
        }
    }

    /// Convenience constructor wrapping a plain handler value.
    pub fn with_handler(handler: impl ImportsHandler + 'static, instance: Arc<Instance>) -> Self {
        Self::new(Arc::new(Mutex::new(handler)), instance)
    }

    pub fn version(&self) -> AbiVersion {
        self.version
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn imports(&self) -> Arc<Mutex<dyn ImportsHandler>> {
        Arc::clone(&self.imports)
    }

    /// Swap the handler used for subsequent callbacks.
    pub fn set_imports(&mut self, imports: Arc<Mutex<dyn ImportsHandler>>) {
        self.imports = imports;
    }

    /// Data-slot value for [`Instance::lock`]; host functions invoked by
    /// the guest resolve the current handler through it.
    pub fn current(&self) -> ContextData {
        Arc::new(CurrentContext {
            imports: Arc::clone(&self.imports),
        })
    }

    fn call(
        &self,
        name: &str,
        args: &[WasmValue],
    ) -> Result<(Option<WasmValue>, Action), RuntimeError> {
        let result = match self.instance.call_export(name, args) {
            Ok(result) => result,
            Err(err) => {
                if err.is_trap() {
                    self.instance.handle_error(&err);
                }
                return Err(err);
            }
        };

        let action = match self.version {
            AbiVersion::V0_1_0 => sync::lock(&self.imports).wait(),
            _ => match result {
                Some(WasmValue::I32(value)) => Action::from_i32(value),
                _ => Action::Continue,
            },
        };

        Ok((result, action))
    }

    fn call_void(&self, name: &str, args: &[WasmValue]) -> Result<(), RuntimeError> {
        self.call(name, args).map(|_| ())
    }

    fn call_action(&self, name: &str, args: &[WasmValue]) -> Result<Action, RuntimeError> {
        self.call(name, args).map(|(_, action)| action)
    }

    fn call_bool(&self, name: &str, args: &[WasmValue]) -> Result<bool, RuntimeError> {
        let (result, _) = self.call(name, args)?;
        match result {
            Some(WasmValue::I32(value)) => Ok(value == 1),
            _ => Err(RuntimeError::invalid_result(name)),
        }
    }

    // Configuration

    pub fn on_vm_start(&self, root_context_id: i32, vm_config_size: i32) -> Result<bool, RuntimeError> {
        self.call_bool(
            "proxy_on_vm_start",
            &[WasmValue::I32(root_context_id), WasmValue::I32(vm_config_size)],
        )
    }

    pub fn on_configure(
        &self,
        root_context_id: i32,
        plugin_config_size: i32,
    ) -> Result<bool, RuntimeError> {
        self.call_bool(
            "proxy_on_configure",
            &[
                WasmValue::I32(root_context_id),
                WasmValue::I32(plugin_config_size),
            ],
        )
    }

    // Misc

    pub fn on_log(&self, context_id: i32) -> Result<(), RuntimeError> {
        self.call_void("proxy_on_log", &[WasmValue::I32(context_id)])
    }

    pub fn on_tick(&self, root_context_id: i32) -> Result<(), RuntimeError> {
        self.call_void("proxy_on_tick", &[WasmValue::I32(root_context_id)])
    }

    pub fn on_queue_ready(&self, root_context_id: i32, queue_id: i32) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_queue_ready",
            &[WasmValue::I32(root_context_id), WasmValue::I32(queue_id)],
        )
    }

    pub fn on_http_call_response(
        &self,
        context_id: i32,
        token_id: i32,
        header_count: i32,
        body_size: i32,
        trailer_count: i32,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_http_call_response",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(token_id),
                WasmValue::I32(header_count),
                WasmValue::I32(body_size),
                WasmValue::I32(trailer_count),
            ],
        )
    }

    // Context

    pub fn on_context_create(
        &self,
        context_id: i32,
        root_context_id: i32,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_context_create",
            &[WasmValue::I32(context_id), WasmValue::I32(root_context_id)],
        )
    }

    pub fn on_done(&self, context_id: i32) -> Result<bool, RuntimeError> {
        self.call_bool("proxy_on_done", &[WasmValue::I32(context_id)])
    }

    pub fn on_delete(&self, context_id: i32) -> Result<(), RuntimeError> {
        self.call_void("proxy_on_delete", &[WasmValue::I32(context_id)])
    }

    // L4

    pub fn on_new_connection(&self, context_id: i32) -> Result<Action, RuntimeError> {
        self.call_action("proxy_on_new_connection", &[WasmValue::I32(context_id)])
    }

    pub fn on_downstream_data(
        &self,
        context_id: i32,
        data_size: i32,
        end_of_stream: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_downstream_data",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(data_size),
                WasmValue::I32(end_of_stream),
            ],
        )
    }

    pub fn on_downstream_connection_close(
        &self,
        context_id: i32,
        peer_type: PeerType,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_downstream_connection_close",
            &[WasmValue::I32(context_id), WasmValue::I32(peer_type.as_i32())],
        )
    }

    pub fn on_upstream_data(
        &self,
        context_id: i32,
        data_size: i32,
        end_of_stream: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_upstream_data",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(data_size),
                WasmValue::I32(end_of_stream),
            ],
        )
    }

    pub fn on_upstream_connection_close(
        &self,
        context_id: i32,
        peer_type: PeerType,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_upstream_connection_close",
            &[WasmValue::I32(context_id), WasmValue::I32(peer_type.as_i32())],
        )
    }

    // gRPC

    pub fn on_grpc_close(
        &self,
        context_id: i32,
        token_id: i32,
        status_code: i32,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_grpc_close",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(token_id),
                WasmValue::I32(status_code),
            ],
        )
    }

    pub fn on_grpc_receive_initial_metadata(
        &self,
        context_id: i32,
        token_id: i32,
        header_count: i32,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_grpc_receive_initial_metadata",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(token_id),
                WasmValue::I32(header_count),
            ],
        )
    }

    pub fn on_grpc_receive_trailing_metadata(
        &self,
        context_id: i32,
        token_id: i32,
        trailer_count: i32,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_grpc_receive_trailing_metadata",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(token_id),
                WasmValue::I32(trailer_count),
            ],
        )
    }

    pub fn on_grpc_receive(
        &self,
        context_id: i32,
        token_id: i32,
        response_size: i32,
    ) -> Result<(), RuntimeError> {
        self.call_void(
            "proxy_on_grpc_receive",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(token_id),
                WasmValue::I32(response_size),
            ],
        )
    }

    // HTTP request

    pub fn on_request_headers(
        &self,
        context_id: i32,
        header_count: i32,
        end_of_stream: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_request_headers",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(header_count),
                WasmValue::I32(end_of_stream),
            ],
        )
    }

    pub fn on_request_body(
        &self,
        context_id: i32,
        body_size: i32,
        end_of_stream: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_request_body",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(body_size),
                WasmValue::I32(end_of_stream),
            ],
        )
    }

    pub fn on_request_trailers(
        &self,
        context_id: i32,
        trailer_count: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_request_trailers",
            &[WasmValue::I32(context_id), WasmValue::I32(trailer_count)],
        )
    }

    // HTTP response

    pub fn on_response_headers(
        &self,
        context_id: i32,
        header_count: i32,
        end_of_stream: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_response_headers",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(header_count),
                WasmValue::I32(end_of_stream),
            ],
        )
    }

    pub fn on_response_body(
        &self,
        context_id: i32,
        body_size: i32,
        end_of_stream: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_response_body",
            &[
                WasmValue::I32(context_id),
                WasmValue::I32(body_size),
                WasmValue::I32(end_of_stream),
            ],
        )
    }

    pub fn on_response_trailers(
        &self,
        context_id: i32,
        trailer_count: i32,
    ) -> Result<Action, RuntimeError> {
        self.call_action(
            "proxy_on_response_trailers",
            &[WasmValue::I32(context_id), WasmValue::I32(trailer_count)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_runtime_common::InstanceConfig;
    use proxy_runtime_core::testing::{CallLog, MockExport, MockModule};

    use crate::handler::DefaultImportsHandler;
    use crate::shared::{SharedDataStore, SharedQueueRegistry};

    fn context_for(module: MockModule) -> AbiContext {
        let instance = Arc::new(Instance::new(Arc::new(module), InstanceConfig::default()).unwrap());
        instance.start().unwrap();
        let handler = DefaultImportsHandler::with_stores(
            Arc::new(SharedDataStore::new()),
            Arc::new(SharedQueueRegistry::new()),
        );
        AbiContext::with_handler(handler, instance)
    }

    #[test]
    fn test_version_discovery() {
        let ctx = context_for(
            MockModule::new()
                .with_start()
                .marker("proxy_abi_version_0_2_0"),
        );
        assert_eq!(ctx.version(), AbiVersion::V0_2_0);

        // No marker: driven as the newest supported ABI.
        let ctx = context_for(MockModule::new().with_start());
        assert_eq!(ctx.version(), AbiVersion::V0_2_1);
    }

    #[test]
    fn test_bool_decoding() {
        let ctx = context_for(
            MockModule::new()
                .with_start()
                .export(
                    "proxy_on_vm_start",
                    MockExport::Return(Some(WasmValue::I32(1))),
                )
                .export(
                    "proxy_on_configure",
                    MockExport::Return(Some(WasmValue::I32(0))),
                )
                .export("proxy_on_done", MockExport::Return(None)),
        );

        assert!(ctx.on_vm_start(1, 0).unwrap());
        assert!(!ctx.on_configure(1, 0).unwrap());
        // A bool callback with no return value is a protocol violation.
        assert!(matches!(
            ctx.on_done(1),
            Err(RuntimeError::InvalidResult { .. })
        ));
    }

    #[test]
    fn test_action_decoding() {
        for (returned, expected) in [
            (0, Action::Continue),
            (1, Action::Pause),
            (7, Action::Continue),
        ] {
            let ctx = context_for(MockModule::new().with_start().export(
                "proxy_on_request_headers",
                MockExport::Return(Some(WasmValue::I32(returned))),
            ));
            assert_eq!(ctx.on_request_headers(2, 0, 1).unwrap(), expected);
        }
    }

    #[test]
    fn test_v0_1_0_uses_wait_hook() {
        struct PausingHandler;
        impl ImportsHandler for PausingHandler {
            fn wait(&mut self) -> Action {
                Action::Pause
            }
        }

        let module = MockModule::new()
            .with_start()
            .marker("proxy_abi_version_0_1_0")
            .export(
                "proxy_on_request_headers",
                MockExport::Return(Some(WasmValue::I32(0))),
            );
        let instance = Arc::new(Instance::new(Arc::new(module), InstanceConfig::default()).unwrap());
        instance.start().unwrap();
        let ctx = AbiContext::with_handler(PausingHandler, instance);

        assert_eq!(ctx.version(), AbiVersion::V0_1_0);
        // The guest returned Continue, but the wait hook pauses.
        assert_eq!(ctx.on_request_headers(2, 0, 1).unwrap(), Action::Pause);
    }

    #[test]
    fn test_argument_layout() {
        let log: CallLog = Arc::default();
        let ctx = context_for(
            MockModule::new()
                .with_start()
                .export("proxy_on_context_create", MockExport::Return(None))
                .export(
                    "proxy_on_request_headers",
                    MockExport::Return(Some(WasmValue::I32(0))),
                )
                .with_call_log(Arc::clone(&log)),
        );

        ctx.on_context_create(2, 1).unwrap();
        ctx.on_request_headers(2, 3, 1).unwrap();

        let entries = log.lock().unwrap();
        assert_eq!(
            entries[1],
            (
                "proxy_on_context_create".to_string(),
                vec![WasmValue::I32(2), WasmValue::I32(1)]
            )
        );
        assert_eq!(
            entries[2],
            (
                "proxy_on_request_headers".to_string(),
                vec![WasmValue::I32(2), WasmValue::I32(3), WasmValue::I32(1)]
            )
        );
    }

    #[test]
    fn test_trap_and_missing_export() {
        let ctx = context_for(
            MockModule::new()
                .with_start()
                .export("proxy_on_new_connection", MockExport::Trap("boom".into())),
        );

        let err = ctx.on_new_connection(1).unwrap_err();
        assert!(err.is_trap());

        // Optional callbacks may be absent; the caller decides severity.
        let err = ctx.on_grpc_receive(1, 1, 0).unwrap_err();
        assert!(err.is_not_exported());
    }
}
