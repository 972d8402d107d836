//! The bridge registry and its safe Rust API
//!
//! A [`Bridge`] owns the runtime, the transport and one handle table per
//! resource kind. The C surface in [`crate::ffi`] marshals onto the process
//! wide instance returned by [`global`]; Rust callers and tests can build
//! their own with [`Bridge::with_transport`].

use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::address::ChannelTarget;
use crate::config::BridgeConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::handle::{HandleKind, HandleTable};
use crate::logging;
use crate::payload::Payload;
use crate::runtime::{BridgeRuntime, RuntimeBuilder};
use crate::stream::{ReadOutcome, ReadStream, WriteStream};
use crate::transport::{GrpcTransport, Transport, UnaryMethod};

lazy_static! {
    static ref GLOBAL: Mutex<Option<Arc<Bridge>>> = Mutex::new(None);
}

pub struct Bridge {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    connections: HandleTable<Connection>,
    write_streams: HandleTable<WriteStream>,
    read_streams: HandleTable<ReadStream>,
    // dropped last, after every stream and channel using it
    _runtime: Option<BridgeRuntime>,
}

impl Bridge {
    /// Bridge over the gRPC transport, with its own runtime
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let runtime = RuntimeBuilder::from_settings(&config.runtime).build()?;
        let transport = GrpcTransport::new(
            runtime.clone(),
            config.channel.clone(),
            config.stream.write_queue_depth,
        )?;

        let mut bridge = Self::with_transport(config, Arc::new(transport));
        bridge._runtime = Some(runtime);
        Ok(bridge)
    }

    /// Bridge over an arbitrary transport
    pub fn with_transport(config: BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            connections: HandleTable::new(HandleKind::Connection),
            write_streams: HandleTable::new(HandleKind::WriteStream),
            read_streams: HandleTable::new(HandleKind::ReadStream),
            _runtime: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Turn host request bytes into a payload, honouring `payload.strict`
    pub fn request(&self, bytes: &[u8]) -> Result<Payload> {
        if self.config.payload.strict {
            Payload::parse(bytes)
        } else {
            Ok(Payload::parse_lenient(bytes))
        }
    }

    /// Open a connection; never waits for the network
    pub fn connect(&self, address: &str) -> Result<u64> {
        let target = ChannelTarget::parse(address, &self.config.secure_prefix)?;
        let connection = Connection::open(self.transport.as_ref(), target, &self.config.channel)?;
        let security = connection.target().security;

        let handle = self.connections.insert(connection)?;
        tracing::debug!(handle, address, %security, "connection opened");
        Ok(handle)
    }

    /// Blocking unary call on `connection`
    pub fn unary(&self, connection: u64, method: UnaryMethod, request: Payload) -> Result<Payload> {
        let conn = self.connections.get(connection)?;
        conn.unary(method, request)
    }

    /// Fail with an invalid-handle error unless `connection` is live
    pub fn check_connection(&self, connection: u64) -> Result<()> {
        self.connections.get(connection).map(drop)
    }

    /// Fail with an invalid-handle error unless `stream` is a live write stream
    pub fn check_write_stream(&self, stream: u64) -> Result<()> {
        self.write_streams.get(stream).map(drop)
    }

    /// Close `connection`; returns false when the handle was not live
    pub fn close(&self, connection: u64) -> bool {
        match self.connections.remove(connection) {
            Ok(conn) => {
                conn.close();
                true
            }
            Err(_) => {
                tracing::debug!(handle = connection, "close of unknown connection ignored");
                false
            }
        }
    }

    pub fn begin_write_stream(&self, connection: u64) -> Result<u64> {
        let conn = self.connections.get(connection)?;
        let stream = conn.begin_write_stream()?;
        let handle = self.write_streams.insert(stream)?;
        tracing::debug!(handle, connection, "write stream opened");
        Ok(handle)
    }

    pub fn write(&self, stream: u64, request: Payload) -> Result<()> {
        self.write_streams.get(stream)?.write(request)
    }

    /// Half-close a write stream and return the server's response
    pub fn finish(&self, stream: u64) -> Result<Payload> {
        self.write_streams.get(stream)?.finish()
    }

    pub fn cancel_write_stream(&self, stream: u64) -> Result<()> {
        self.write_streams.get(stream)?.cancel();
        Ok(())
    }

    /// Destroy a write stream; returns false when the handle was not live
    pub fn destroy_write_stream(&self, stream: u64) -> bool {
        match self.write_streams.remove(stream) {
            Ok(entry) => {
                entry.shutdown();
                tracing::debug!(handle = stream, "write stream destroyed");
                true
            }
            Err(_) => {
                tracing::debug!(handle = stream, "destroy of unknown write stream ignored");
                false
            }
        }
    }

    pub fn begin_read_stream(&self, connection: u64, request: Payload) -> Result<u64> {
        let conn = self.connections.get(connection)?;
        let stream = conn.begin_read_stream(request)?;
        let handle = self.read_streams.insert(stream)?;
        tracing::debug!(handle, connection, "read stream opened");
        Ok(handle)
    }

    /// Block for the next message on a read stream
    pub fn read_next(&self, stream: u64) -> Result<ReadOutcome> {
        self.read_streams.get(stream)?.read_next()
    }

    pub fn cancel_read_stream(&self, stream: u64) -> Result<()> {
        self.read_streams.get(stream)?.cancel();
        Ok(())
    }

    /// Destroy a read stream; returns false when the handle was not live
    pub fn destroy_read_stream(&self, stream: u64) -> bool {
        match self.read_streams.remove(stream) {
            Ok(entry) => {
                entry.shutdown();
                tracing::debug!(handle = stream, "read stream destroyed");
                true
            }
            Err(_) => {
                tracing::debug!(handle = stream, "destroy of unknown read stream ignored");
                false
            }
        }
    }

    /// Live connection, write stream and read stream counts
    pub fn live_handles(&self) -> (usize, usize, usize) {
        (
            self.connections.len(),
            self.write_streams.len(),
            self.read_streams.len(),
        )
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for stream in self.write_streams.drain() {
            stream.shutdown();
        }
        for stream in self.read_streams.drain() {
            stream.shutdown();
        }
        for conn in self.connections.drain() {
            conn.close();
        }
    }
}

/// Create the process-wide bridge from `config_path`
///
/// Returns false, leaving the existing bridge untouched, when it was already
/// initialised.
pub fn init_global(config_path: Option<&Path>) -> Result<bool> {
    let mut global = GLOBAL.lock();
    if global.is_some() {
        tracing::warn!("bridge already initialised; ignoring init");
        return Ok(false);
    }

    let config = BridgeConfig::load(config_path)?;
    logging::init(&config.logging);
    *global = Some(Arc::new(Bridge::new(config)?));
    tracing::info!(version = crate::VERSION, "bridge initialised");
    Ok(true)
}

/// The process-wide bridge, initialised from defaults on first use
pub fn global() -> Result<Arc<Bridge>> {
    let mut global = GLOBAL.lock();
    if let Some(bridge) = global.as_ref() {
        return Ok(bridge.clone());
    }

    let config = BridgeConfig::load(None)?;
    logging::init(&config.logging);
    let bridge = Arc::new(Bridge::new(config)?);
    *global = Some(bridge.clone());
    tracing::info!(version = crate::VERSION, "bridge initialised with defaults");
    Ok(bridge)
}
