//! Client connection: one channel and its stub
//!
//! Calls share the stub under a read lock, so a connection serves any number
//! of concurrent unary calls and stream setups. Closing takes the write lock
//! and therefore waits for in-flight calls on this connection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::address::ChannelTarget;
use crate::config::ChannelSettings;
use crate::context::{CallContext, CallMetadata};
use crate::error::{BridgeError, Result};
use crate::payload::Payload;
use crate::stream::{ReadStream, WriteStream};
use crate::transport::{Stub, Transport, UnaryMethod};

pub struct Connection {
    target: ChannelTarget,
    stub: RwLock<Option<Arc<dyn Stub>>>,
    metadata: CallMetadata,
    request_timeout: Option<Duration>,
}

impl Connection {
    /// Open a lazily connected channel to `target`
    pub fn open(
        transport: &dyn Transport,
        target: ChannelTarget,
        settings: &ChannelSettings,
    ) -> Result<Self> {
        let metadata = CallMetadata::from_map(&settings.metadata)?;
        let stub = transport.open(&target)?;

        Ok(Self {
            target,
            stub: RwLock::new(Some(stub)),
            metadata,
            request_timeout: settings.request_timeout(),
        })
    }

    pub fn target(&self) -> &ChannelTarget {
        &self.target
    }

    pub fn is_closed(&self) -> bool {
        self.stub.read().is_none()
    }

    /// Blocking unary call bounded by the configured request timeout
    pub fn unary(&self, method: UnaryMethod, request: Payload) -> Result<Payload> {
        let stub = self.stub.read();
        let stub = stub.as_ref().ok_or_else(closed)?;

        let ctx = CallContext::new(self.request_timeout, self.metadata.clone());
        stub.unary(&ctx, method, request)
    }

    /// Start an `UpdateDeviceStream` call
    pub fn begin_write_stream(&self) -> Result<WriteStream> {
        let stub = self.stub.read();
        let stub = stub.as_ref().ok_or_else(closed)?;

        // streams are long-lived; only cancellation ends them early
        let ctx = CallContext::new(None, self.metadata.clone());
        let writer = stub.update_device_stream(&ctx).map_err(creation_failed)?;
        Ok(WriteStream::new(ctx, writer))
    }

    /// Start a `RegisterAndListen` call with its initial request
    pub fn begin_read_stream(&self, request: Payload) -> Result<ReadStream> {
        let stub = self.stub.read();
        let stub = stub.as_ref().ok_or_else(closed)?;

        let ctx = CallContext::new(None, self.metadata.clone());
        let reader = stub.register_and_listen(&ctx, request).map_err(creation_failed)?;
        Ok(ReadStream::new(ctx, reader))
    }

    /// Release the stub and channel once in-flight calls have returned
    pub fn close(&self) {
        let stub = self.stub.write().take();
        if stub.is_some() {
            tracing::debug!(address = %self.target, "connection closed");
        }
    }
}

/// Raised for calls that raced a close of their connection
fn closed() -> BridgeError {
    BridgeError::InvalidHandle {
        kind: "connection",
        handle: 0,
    }
}

fn creation_failed(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::StreamCreation(_) | BridgeError::Cancelled => err,
        other => BridgeError::StreamCreation(other.to_string()),
    }
}
