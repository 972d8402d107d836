//! C ABI surface
//!
//! Pure marshalling onto the process-wide [`Bridge`]. Every function clears
//! the calling thread's last error, runs its body under `catch_unwind` and
//! reports failures as a negative [`StatusCode`]; the message is available
//! from [`leapbrush_last_error_message`].
//!
//! Handles are `u64` and `0` is never valid. Response buffers are owned by
//! the host once a call returns and must be passed back to
//! [`leapbrush_proto_bytes_release`].

// Pointer arguments come from the host and are checked for null before use.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::any::Any;
use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use libc::c_char;

use crate::bridge::{self, Bridge};
use crate::buffer::{self, ProtoBytes};
use crate::error::{clear_last_error, last_error, to_ffi_status, BridgeError, Result, StatusCode};
use crate::payload::Payload;
use crate::stream::ReadOutcome;
use crate::transport::UnaryMethod;

static VERSION_CSTR: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Run `body` behind the boundary: no panic or error escapes as anything but
/// a status code.
fn guard<F>(operation: &'static str, body: F) -> i32
where
    F: FnOnce() -> Result<StatusCode>,
{
    clear_last_error();
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(status)) => status.as_raw(),
        Ok(Err(e)) => to_ffi_status(operation, e).as_raw(),
        Err(panic) => {
            let message = panic_message(&*panic);
            to_ffi_status(operation, BridgeError::internal(format!("panic: {}", message))).as_raw()
        }
    }
}

/// [`guard`] for functions with no status to return
fn guard_void<F>(operation: &'static str, body: F)
where
    F: FnOnce(),
{
    guard(operation, || {
        body();
        Ok(StatusCode::Ok)
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::invalid_parameter(format!("{} is null", what)));
    }
    // SAFETY: non-null and NUL-terminated per the C contract
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| BridgeError::invalid_parameter(format!("{} is not valid UTF-8", what)))
}

fn out_param<'a, T>(ptr: *mut T, what: &str) -> Result<&'a mut T> {
    // SAFETY: the host passes a writable location or null
    unsafe { ptr.as_mut() }.ok_or_else(|| BridgeError::invalid_parameter(format!("{} is null", what)))
}

/// Response buffer the bridge may fill: non-null and not holding a live
/// allocation.
fn response_param<'a>(ptr: *mut ProtoBytes) -> Result<&'a mut ProtoBytes> {
    let out = out_param(ptr, "response buffer")?;
    if !out.bytes.is_null() && buffer::is_live(out.bytes) {
        return Err(BridgeError::invalid_parameter(
            "response buffer still holds an unreleased response",
        ));
    }
    Ok(out)
}

fn request_param(bridge: &Bridge, ptr: *const ProtoBytes) -> Result<Payload> {
    // SAFETY: the host passes a readable buffer struct or null
    let request = unsafe { ptr.as_ref() }
        .ok_or_else(|| BridgeError::invalid_parameter("request buffer is null"))?;
    // SAFETY: request bytes stay valid for the duration of the call
    let bytes = unsafe { request.as_slice() }?;
    bridge.request(bytes)
}

fn unary(
    method: UnaryMethod,
    connection: u64,
    request: *const ProtoBytes,
    response: *mut ProtoBytes,
) -> i32 {
    guard(method.name(), || {
        let bridge = bridge::global()?;
        bridge.check_connection(connection)?;
        let out = response_param(response)?;
        let request = request_param(&bridge, request)?;

        let reply = bridge.unary(connection, method, request)?;
        buffer::fill(out, reply)?;
        Ok(StatusCode::Ok)
    })
}

/// Load configuration from `config_path` (nullable) and start the bridge
///
/// Optional; without it the first call initialises from defaults. Calling it
/// again is a no-op.
#[no_mangle]
pub extern "C" fn leapbrush_init(config_path: *const c_char) -> i32 {
    guard("init", || {
        let path = if config_path.is_null() {
            None
        } else {
            Some(Path::new(c_str(config_path, "config path")?))
        };
        bridge::init_global(path)?;
        Ok(StatusCode::Ok)
    })
}

/// Open a connection to `address`; `ssl://` selects TLS
#[no_mangle]
pub extern "C" fn leapbrush_client_connect(address: *const c_char, out_connection: *mut u64) -> i32 {
    guard("connect", || {
        let out = out_param(out_connection, "connection out-parameter")?;
        let address = c_str(address, "address")?;
        *out = bridge::global()?.connect(address)?;
        Ok(StatusCode::Ok)
    })
}

#[no_mangle]
pub extern "C" fn leapbrush_client_update_device(
    connection: u64,
    request: *const ProtoBytes,
    response: *mut ProtoBytes,
) -> i32 {
    unary(UnaryMethod::UpdateDevice, connection, request, response)
}

#[no_mangle]
pub extern "C" fn leapbrush_client_rpc(
    connection: u64,
    request: *const ProtoBytes,
    response: *mut ProtoBytes,
) -> i32 {
    unary(UnaryMethod::Rpc, connection, request, response)
}

/// Start an `UpdateDeviceStream` call
#[no_mangle]
pub extern "C" fn leapbrush_client_update_device_stream(connection: u64, out_stream: *mut u64) -> i32 {
    guard("update_device_stream", || {
        let out = out_param(out_stream, "stream out-parameter")?;
        *out = bridge::global()?.begin_write_stream(connection)?;
        Ok(StatusCode::Ok)
    })
}

#[no_mangle]
pub extern "C" fn leapbrush_update_device_stream_write(stream: u64, request: *const ProtoBytes) -> i32 {
    guard("update_device_stream_write", || {
        let bridge = bridge::global()?;
        bridge.check_write_stream(stream)?;
        let request = request_param(&bridge, request)?;
        bridge.write(stream, request)?;
        Ok(StatusCode::Ok)
    })
}

/// Half-close the stream and receive the server's response
#[no_mangle]
pub extern "C" fn leapbrush_update_device_stream_finish(stream: u64, response: *mut ProtoBytes) -> i32 {
    guard("update_device_stream_finish", || {
        let bridge = bridge::global()?;
        let out = response_param(response)?;
        let reply = bridge.finish(stream)?;
        buffer::fill(out, reply)?;
        Ok(StatusCode::Ok)
    })
}

#[no_mangle]
pub extern "C" fn leapbrush_update_device_stream_cancel(stream: u64) -> i32 {
    guard("update_device_stream_cancel", || {
        bridge::global()?.cancel_write_stream(stream)?;
        Ok(StatusCode::Ok)
    })
}

#[no_mangle]
pub extern "C" fn leapbrush_update_device_stream_destroy(stream: u64) {
    guard_void("update_device_stream_destroy", || {
        if let Ok(bridge) = bridge::global() {
            bridge.destroy_write_stream(stream);
        }
    })
}

/// Start a `RegisterAndListen` call with its initial request
#[no_mangle]
pub extern "C" fn leapbrush_client_register_and_listen(
    connection: u64,
    request: *const ProtoBytes,
    out_stream: *mut u64,
) -> i32 {
    guard("register_and_listen", || {
        let bridge = bridge::global()?;
        bridge.check_connection(connection)?;
        let out = out_param(out_stream, "stream out-parameter")?;
        let request = request_param(&bridge, request)?;
        *out = bridge.begin_read_stream(connection, request)?;
        Ok(StatusCode::Ok)
    })
}

/// Block for the next server message
///
/// Returns `0` with a message in `response`, `1` once the stream has ended
/// (forever after), or a negative error.
#[no_mangle]
pub extern "C" fn leapbrush_server_state_stream_next(stream: u64, response: *mut ProtoBytes) -> i32 {
    guard("server_state_stream_next", || {
        let bridge = bridge::global()?;
        let out = response_param(response)?;
        match bridge.read_next(stream)? {
            ReadOutcome::Message(payload) => {
                buffer::fill(out, payload)?;
                Ok(StatusCode::Ok)
            }
            ReadOutcome::EndOfStream => {
                *out = ProtoBytes::empty();
                Ok(StatusCode::EndOfStream)
            }
        }
    })
}

#[no_mangle]
pub extern "C" fn leapbrush_server_state_stream_cancel(stream: u64) -> i32 {
    guard("server_state_stream_cancel", || {
        bridge::global()?.cancel_read_stream(stream)?;
        Ok(StatusCode::Ok)
    })
}

#[no_mangle]
pub extern "C" fn leapbrush_server_state_stream_destroy(stream: u64) {
    guard_void("server_state_stream_destroy", || {
        if let Ok(bridge) = bridge::global() {
            bridge.destroy_read_stream(stream);
        }
    })
}

/// Close a connection after its in-flight calls return
#[no_mangle]
pub extern "C" fn leapbrush_client_close(connection: u64) {
    guard_void("client_close", || {
        if let Ok(bridge) = bridge::global() {
            bridge.close(connection);
        }
    })
}

/// Free a response buffer and zero it; unknown pointers are ignored
#[no_mangle]
pub extern "C" fn leapbrush_proto_bytes_release(buffer: *mut ProtoBytes) {
    guard_void("proto_bytes_release", || {
        // SAFETY: the host passes a buffer struct it owns or null
        if let Some(buffer) = unsafe { buffer.as_mut() } {
            buffer::release(buffer);
        }
    })
}

/// Number of response buffers not yet released
#[no_mangle]
pub extern "C" fn leapbrush_proto_bytes_live_count() -> u64 {
    buffer::live_count() as u64
}

/// Status of the last failed call on this thread, `0` if none
#[no_mangle]
pub extern "C" fn leapbrush_last_error_code() -> i32 {
    last_error().map_or(StatusCode::Ok.as_raw(), |e| e.code.as_raw())
}

/// Copy the last error message on this thread into `buf`
///
/// Writes at most `len` bytes including the terminating NUL and returns the
/// size needed to hold the whole message, or `0` if there is no error.
#[no_mangle]
pub extern "C" fn leapbrush_last_error_message(buf: *mut c_char, len: usize) -> usize {
    let Some(error) = last_error() else {
        if !buf.is_null() && len > 0 {
            // SAFETY: buf holds at least one writable byte
            unsafe { *buf = 0 };
        }
        return 0;
    };

    let message = error.message.as_bytes();
    if !buf.is_null() && len > 0 {
        let copied = message.len().min(len - 1);
        // SAFETY: buf holds len writable bytes and copied < len
        unsafe {
            std::ptr::copy_nonoverlapping(message.as_ptr(), buf as *mut u8, copied);
            *buf.add(copied) = 0;
        }
    }
    message.len() + 1
}

/// Static, NUL-terminated library version
#[no_mangle]
pub extern "C" fn leapbrush_version() -> *const c_char {
    VERSION_CSTR.as_ptr() as *const c_char
}
