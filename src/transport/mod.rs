//! Transport seam between the bridge and the RPC stack
//!
//! The bridge only needs four things from the stack: open a channel to a
//! target, make a unary call, open a client-streaming writer and open a
//! server-streaming reader. All of them are blocking here; the gRPC
//! implementation drives tonic on the bridge runtime, and tests substitute
//! in-memory fakes.

pub mod grpc;

use std::sync::Arc;

use crate::address::ChannelTarget;
use crate::context::CallContext;
use crate::error::Result;
use crate::payload::Payload;

pub use grpc::GrpcTransport;

/// Unary methods of the LeapBrushApi service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryMethod {
    UpdateDevice,
    Rpc,
}

impl UnaryMethod {
    pub fn name(self) -> &'static str {
        match self {
            UnaryMethod::UpdateDevice => "UpdateDevice",
            UnaryMethod::Rpc => "Rpc",
        }
    }
}

/// Builds a channel and client stub for one target
pub trait Transport: Send + Sync {
    /// Open a channel without waiting for the network
    fn open(&self, target: &ChannelTarget) -> Result<Arc<dyn Stub>>;
}

/// Client stub bound to one channel
pub trait Stub: Send + Sync {
    /// One request, one response
    fn unary(&self, ctx: &CallContext, method: UnaryMethod, request: Payload) -> Result<Payload>;

    /// Start `UpdateDeviceStream`, returning its writer
    fn update_device_stream(&self, ctx: &CallContext) -> Result<Box<dyn PayloadWriter>>;

    /// Start `RegisterAndListen` with its initial request, returning its reader
    fn register_and_listen(
        &self,
        ctx: &CallContext,
        request: Payload,
    ) -> Result<Box<dyn PayloadReader>>;
}

/// Outbound half of a client-streaming call
pub trait PayloadWriter: Send {
    /// Send one message; fails once the call has ended
    fn write(&mut self, payload: Payload) -> Result<()>;

    /// Half-close and wait for the server's summary response
    fn finish(&mut self) -> Result<Payload>;
}

/// Inbound half of a server-streaming call
pub trait PayloadReader: Send {
    /// Next message, `None` once the server ended the stream
    fn read(&mut self) -> Result<Option<Payload>>;
}
