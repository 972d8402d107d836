//! LeapBrush gRPC bridge
//!
//! Exposes the `leapbrush.LeapBrushApi` client (unary, client-streaming and
//! server-streaming calls) to hosts that can only reach native code through
//! a C ABI. Connections and streams are opaque `u64` handles; payloads cross
//! the boundary as [`ProtoBytes`] buffers.

pub mod address;
pub mod bridge;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod logging;
pub mod payload;
pub mod proto;
pub mod runtime;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use address::{ChannelTarget, SecurityMode};
pub use bridge::Bridge;
pub use buffer::ProtoBytes;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result, StatusCode};
pub use payload::Payload;
pub use stream::ReadOutcome;
pub use transport::UnaryMethod;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
