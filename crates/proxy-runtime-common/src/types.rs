//! Proxy-Wasm ABI enums and status codes.
//!
//! These values are part of the published ABI: they cross the host/guest
//! boundary as little-endian `i32`s and must never be renumbered.

/// Status code returned by every host function, as an `i32` in the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WasmResult {
    Ok = 0,
    /// The result could not be found, e.g. a provided key did not appear in
    /// a table.
    NotFound = 1,
    /// An argument was bad, e.g. did not conform to the required range.
    BadArgument = 2,
    SerializationFailure = 3,
    ParseFailure = 4,
    /// A provided expression was illegal or unrecognized.
    BadExpression = 5,
    /// A provided memory range was not legal.
    InvalidMemoryAccess = 6,
    /// Data was requested from an empty container.
    Empty = 7,
    /// The provided CAS did not match that of the stored data.
    CasMismatch = 8,
    /// Returned result was unexpected, e.g. of the incorrect size.
    ResultMismatch = 9,
    InternalFailure = 10,
    /// The connection/stream/pipe was broken/closed unexpectedly.
    BrokenConnection = 11,
    Unimplemented = 12,
}

impl WasmResult {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Result alias for host-capability operations: the error side carries the
/// ABI status code handed back to the guest.
pub type HostResult<T> = Result<T, WasmResult>;

/// Flow-control decision returned by stream-related guest callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum Action {
    #[default]
    Continue = 0,
    Pause = 1,
}

impl Action {
    /// Decodes a guest return value. `1` pauses; `0` and any out-of-range
    /// value continue, matching observed guest behavior.
    pub fn from_i32(value: i32) -> Self {
        if value == 1 {
            Action::Pause
        } else {
            Action::Continue
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// Unknown levels default to `Info`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            3 => LogLevel::Warning,
            4 => LogLevel::Error,
            5 => LogLevel::Critical,
            _ => LogLevel::Info,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Stream selector for `proxy_continue_stream` / `proxy_close_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StreamType {
    HttpRequest = 0,
    HttpResponse = 1,
    Downstream = 2,
    Upstream = 3,
}

impl StreamType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(StreamType::HttpRequest),
            1 => Some(StreamType::HttpResponse),
            2 => Some(StreamType::Downstream),
            3 => Some(StreamType::Upstream),
            _ => None,
        }
    }
}

/// Buffer selector for the `proxy_*_buffer_*` host functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BufferType {
    HttpRequestBody = 0,
    HttpResponseBody = 1,
    DownstreamData = 2,
    UpstreamData = 3,
    HttpCallResponseBody = 4,
    GrpcReceiveBuffer = 5,
    VmConfiguration = 6,
    PluginConfiguration = 7,
    CallData = 8,
}

impl BufferType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(BufferType::HttpRequestBody),
            1 => Some(BufferType::HttpResponseBody),
            2 => Some(BufferType::DownstreamData),
            3 => Some(BufferType::UpstreamData),
            4 => Some(BufferType::HttpCallResponseBody),
            5 => Some(BufferType::GrpcReceiveBuffer),
            6 => Some(BufferType::VmConfiguration),
            7 => Some(BufferType::PluginConfiguration),
            8 => Some(BufferType::CallData),
            _ => None,
        }
    }
}

/// Map selector for the `proxy_*_header_map_*` host functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MapType {
    HttpRequestHeaders = 0,
    HttpRequestTrailers = 1,
    HttpResponseHeaders = 2,
    HttpResponseTrailers = 3,
    GrpcReceiveInitialMetadata = 4,
    GrpcReceiveTrailingMetadata = 5,
    HttpCallResponseHeaders = 6,
    HttpCallResponseTrailers = 7,
}

impl MapType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(MapType::HttpRequestHeaders),
            1 => Some(MapType::HttpRequestTrailers),
            2 => Some(MapType::HttpResponseHeaders),
            3 => Some(MapType::HttpResponseTrailers),
            4 => Some(MapType::GrpcReceiveInitialMetadata),
            5 => Some(MapType::GrpcReceiveTrailingMetadata),
            6 => Some(MapType::HttpCallResponseHeaders),
            7 => Some(MapType::HttpCallResponseTrailers),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MetricType {
    Counter = 0,
    Gauge = 1,
    Histogram = 2,
}

impl MetricType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(MetricType::Counter),
            1 => Some(MetricType::Gauge),
            2 => Some(MetricType::Histogram),
            _ => None,
        }
    }
}

/// Which side closed an L4 connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PeerType {
    Unknown = 0,
    /// Close initiated by the proxy.
    Local = 1,
    /// Close initiated by the peer.
    Remote = 2,
}

impl PeerType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// ABI variants recognized from the guest's `proxy_abi_*` marker exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiVersion {
    V0_1_0,
    V0_2_0,
    V0_2_1,
}

impl AbiVersion {
    pub fn from_export_name(name: &str) -> Option<Self> {
        match name {
            "proxy_abi_version_0_1_0" => Some(AbiVersion::V0_1_0),
            "proxy_abi_version_0_2_0" => Some(AbiVersion::V0_2_0),
            "proxy_abi_version_0_2_1" => Some(AbiVersion::V0_2_1),
            _ => None,
        }
    }

    pub fn export_name(self) -> &'static str {
        match self {
            AbiVersion::V0_1_0 => "proxy_abi_version_0_1_0",
            AbiVersion::V0_2_0 => "proxy_abi_version_0_2_0",
            AbiVersion::V0_2_1 => "proxy_abi_version_0_2_1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasm_result_values() {
        assert_eq!(WasmResult::Ok.as_i32(), 0);
        assert_eq!(WasmResult::NotFound.as_i32(), 1);
        assert_eq!(WasmResult::BadArgument.as_i32(), 2);
        assert_eq!(WasmResult::InvalidMemoryAccess.as_i32(), 6);
        assert_eq!(WasmResult::Empty.as_i32(), 7);
        assert_eq!(WasmResult::CasMismatch.as_i32(), 8);
        assert_eq!(WasmResult::Unimplemented.as_i32(), 12);
    }

    #[test]
    fn test_action_decoding() {
        assert_eq!(Action::from_i32(0), Action::Continue);
        assert_eq!(Action::from_i32(1), Action::Pause);
        // Out-of-range values continue rather than erroring.
        assert_eq!(Action::from_i32(2), Action::Continue);
        assert_eq!(Action::from_i32(-1), Action::Continue);
    }

    #[test]
    fn test_log_level_from_i32() {
        assert_eq!(LogLevel::from_i32(0), LogLevel::Trace);
        assert_eq!(LogLevel::from_i32(4), LogLevel::Error);
        assert_eq!(LogLevel::from_i32(42), LogLevel::Info);
    }

    #[test]
    fn test_enum_range_validation() {
        assert_eq!(StreamType::from_i32(3), Some(StreamType::Upstream));
        assert_eq!(StreamType::from_i32(4), None);
        assert_eq!(BufferType::from_i32(8), Some(BufferType::CallData));
        assert_eq!(BufferType::from_i32(9), None);
        assert_eq!(MapType::from_i32(7), Some(MapType::HttpCallResponseTrailers));
        assert_eq!(MapType::from_i32(8), None);
        assert_eq!(MetricType::from_i32(2), Some(MetricType::Histogram));
        assert_eq!(MetricType::from_i32(3), None);
    }

    #[test]
    fn test_abi_version_parsing() {
        assert_eq!(
            AbiVersion::from_export_name("proxy_abi_version_0_2_0"),
            Some(AbiVersion::V0_2_0)
        );
        assert_eq!(AbiVersion::from_export_name("proxy_abi_version_9_9_9"), None);
        assert_eq!(
            AbiVersion::V0_1_0.export_name(),
            "proxy_abi_version_0_1_0"
        );
    }
}
