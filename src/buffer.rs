//! Transfer buffers crossing the C boundary
//!
//! Request buffers belong to the host and are only borrowed for the length of
//! a call. Response buffers are allocated here, recorded in a process-wide
//! registry and owned by the host until it hands them back to
//! [`release`]. Only registered pointers are ever freed, always with the
//! length recorded at allocation time.

use std::collections::HashMap;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::error::{BridgeError, Result};
use crate::payload::Payload;

lazy_static! {
    /// Outstanding bridge allocations: pointer -> length
    static ref ALLOCATIONS: Mutex<HashMap<usize, usize>> = Mutex::new(HashMap::new());
}

/// Byte buffer shared with the host
#[repr(C)]
#[derive(Debug)]
pub struct ProtoBytes {
    pub bytes: *mut u8,
    pub size: i32,
}

impl ProtoBytes {
    pub const fn empty() -> Self {
        Self {
            bytes: std::ptr::null_mut(),
            size: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.bytes.is_null()
    }

    /// Borrow the host bytes described by this buffer
    ///
    /// # Safety
    ///
    /// When `bytes` is non-null it must point to `size` readable bytes that
    /// stay valid and unmodified for `'a`.
    pub unsafe fn as_slice<'a>(&self) -> Result<&'a [u8]> {
        let len = usize::try_from(self.size).map_err(|_| {
            BridgeError::invalid_parameter(format!("negative buffer size {}", self.size))
        })?;

        if self.bytes.is_null() {
            if len == 0 {
                return Ok(&[]);
            }
            return Err(BridgeError::invalid_parameter(format!(
                "null buffer with size {}",
                len
            )));
        }

        Ok(std::slice::from_raw_parts(self.bytes as *const u8, len))
    }

    /// Read a request payload out of this buffer
    ///
    /// Malformed bytes are an error when `strict`, otherwise they become the
    /// empty message.
    ///
    /// # Safety
    ///
    /// Same contract as [`as_slice`](Self::as_slice).
    pub unsafe fn to_payload(&self, strict: bool) -> Result<Payload> {
        let bytes = self.as_slice()?;
        if strict {
            Payload::parse(bytes)
        } else {
            Ok(Payload::parse_lenient(bytes))
        }
    }
}

impl Default for ProtoBytes {
    fn default() -> Self {
        Self::empty()
    }
}

/// Move `payload` into a fresh bridge allocation described by `out`
///
/// Fails if `out` still holds an unreleased bridge allocation, which would
/// otherwise leak. An empty payload is handed out as a null buffer and
/// allocates nothing.
pub fn fill(out: &mut ProtoBytes, payload: Payload) -> Result<()> {
    if !out.bytes.is_null() && is_live(out.bytes) {
        return Err(BridgeError::invalid_parameter(
            "output buffer still holds an unreleased response",
        ));
    }

    let len = payload.len();
    let size = i32::try_from(len)
        .map_err(|_| BridgeError::internal(format!("response of {} bytes exceeds buffer limit", len)))?;

    if len == 0 {
        *out = ProtoBytes::empty();
        return Ok(());
    }

    let storage: Box<[u8]> = payload.to_vec().into_boxed_slice();
    let ptr = Box::into_raw(storage) as *mut u8;
    ALLOCATIONS.lock().insert(ptr as usize, len);

    out.bytes = ptr;
    out.size = size;
    Ok(())
}

/// Free a buffer previously filled by the bridge and zero it
///
/// Null, already released and foreign pointers are left alone.
pub fn release(buffer: &mut ProtoBytes) {
    if buffer.bytes.is_null() {
        buffer.size = 0;
        return;
    }

    let ptr = buffer.bytes;
    let recorded = ALLOCATIONS.lock().remove(&(ptr as usize));
    match recorded {
        Some(len) => {
            // SAFETY: ptr came from Box::<[u8]>::into_raw with exactly len bytes
            // and was still registered, so it has not been freed yet.
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)));
            }
            *buffer = ProtoBytes::empty();
        }
        None => {
            tracing::warn!(ptr = ?ptr, "release of a buffer the bridge does not own; ignoring");
        }
    }
}

/// Whether `ptr` is an outstanding bridge allocation
pub fn is_live(ptr: *const u8) -> bool {
    ALLOCATIONS.lock().contains_key(&(ptr as usize))
}

/// Number of outstanding bridge allocations
pub fn live_count() -> usize {
    ALLOCATIONS.lock().len()
}
