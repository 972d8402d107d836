//! Error types for the bridge.
//!
//! Errors never cross the C boundary as values. Every failure is collapsed
//! into a [`StatusCode`] return and recorded in thread-local storage so the
//! host can fetch the message after the fact.

use std::cell::RefCell;
use std::result;

use tonic::Status;

/// A specialized Result type for bridge operations.
pub type Result<T> = result::Result<T, BridgeError>;

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Integer status returned by every fallible boundary function.
///
/// `Ok` and `EndOfStream` are the only non-negative values; every error kind
/// is negative so a host can test `status < 0`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 0,
    EndOfStream = 1,
    InvalidParameter = -1,
    InvalidHandle = -2,
    StreamCreation = -3,
    Rpc = -4,
    MalformedPayload = -5,
    Cancelled = -6,
    StreamClosed = -7,
    Internal = -8,
}

impl StatusCode {
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        self.as_raw() < 0
    }
}

/// The error type for bridge operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// Null pointer, bad string, bad address or an unusable buffer
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Zero, stale or wrong-kind handle
    #[error("invalid {kind} handle {handle:#x}")]
    InvalidHandle { kind: &'static str, handle: u64 },

    /// The transport produced no stream object for a streaming call
    #[error("stream creation failed: {0}")]
    StreamCreation(String),

    /// The remote call finished with a non-OK status
    #[error("rpc failed ({code:?}): {message}")]
    Rpc { code: tonic::Code, message: String },

    /// Request bytes are not valid protobuf wire format
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The call context was cancelled by the host
    #[error("call cancelled")]
    Cancelled,

    /// Write or finish on a stream whose call already ended
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// Runtime, configuration or other bridge-internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        BridgeError::InvalidParameter(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::Internal(msg.into())
    }

    /// Boundary status for this error
    pub fn code(&self) -> StatusCode {
        match self {
            BridgeError::InvalidParameter(_) => StatusCode::InvalidParameter,
            BridgeError::InvalidHandle { .. } => StatusCode::InvalidHandle,
            BridgeError::StreamCreation(_) => StatusCode::StreamCreation,
            BridgeError::Rpc { .. } => StatusCode::Rpc,
            BridgeError::MalformedPayload(_) => StatusCode::MalformedPayload,
            BridgeError::Cancelled => StatusCode::Cancelled,
            BridgeError::StreamClosed(_) => StatusCode::StreamClosed,
            BridgeError::Internal(_) => StatusCode::Internal,
        }
    }
}

impl From<Status> for BridgeError {
    fn from(status: Status) -> Self {
        match status.code() {
            tonic::Code::Cancelled => BridgeError::Cancelled,
            code => BridgeError::Rpc {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

impl From<tonic::transport::Error> for BridgeError {
    fn from(err: tonic::transport::Error) -> Self {
        BridgeError::InvalidParameter(format!("transport: {}", err))
    }
}

impl From<prost::DecodeError> for BridgeError {
    fn from(err: prost::DecodeError) -> Self {
        BridgeError::MalformedPayload(err.to_string())
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::Internal(format!("configuration: {}", err))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Internal(format!("I/O: {}", err))
    }
}

/// Snapshot of the most recent failure on one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: StatusCode,
    pub message: String,
}

/// Record `error` as this thread's last error
pub(crate) fn set_last_error(error: &BridgeError) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(LastError {
            code: error.code(),
            message: error.to_string(),
        });
    });
}

/// Get the last error recorded on this thread
pub fn last_error() -> Option<LastError> {
    LAST_ERROR.with(|e| e.borrow().clone())
}

/// Clear the last error for this thread
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Log `error`, store it as the thread's last error and return its status
pub(crate) fn to_ffi_status(operation: &str, error: BridgeError) -> StatusCode {
    let code = error.code();
    match code {
        StatusCode::InvalidParameter | StatusCode::InvalidHandle => {
            tracing::warn!(operation, code = code.as_raw(), "{}", error)
        }
        _ => tracing::error!(operation, code = code.as_raw(), "{}", error),
    }
    set_last_error(&error);
    code
}

/// Extension trait collapsing a Result into a boundary status
pub trait FfiResult<T> {
    fn into_status(self, operation: &str) -> StatusCode;
}

impl<T> FfiResult<T> for Result<T> {
    fn into_status(self, operation: &str) -> StatusCode {
        match self {
            Ok(_) => StatusCode::Ok,
            Err(e) => to_ffi_status(operation, e),
        }
    }
}
