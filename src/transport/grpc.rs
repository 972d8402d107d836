//! gRPC transport backed by tonic
//!
//! Channels connect lazily, so opening a connection never touches the
//! network. Streaming calls run as tasks on the bridge runtime and are fed
//! or drained from host threads through blocking calls.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Streaming;

use super::{PayloadReader, PayloadWriter, Stub, Transport, UnaryMethod};
use crate::address::{ChannelTarget, SecurityMode};
use crate::config::ChannelSettings;
use crate::context::CallContext;
use crate::error::{BridgeError, Result};
use crate::payload::Payload;
use crate::proto::leap_brush_api_client::LeapBrushApiClient;
use crate::runtime::BridgeRuntime;

/// Transport creating tonic channels on the bridge runtime
pub struct GrpcTransport {
    runtime: BridgeRuntime,
    settings: ChannelSettings,
    write_queue_depth: usize,
    tls_ca: Option<Certificate>,
}

impl GrpcTransport {
    pub fn new(
        runtime: BridgeRuntime,
        settings: ChannelSettings,
        write_queue_depth: usize,
    ) -> Result<Self> {
        let tls_ca = match &settings.tls_ca_path {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    BridgeError::internal(format!("reading CA bundle {}: {}", path.display(), e))
                })?;
                Some(Certificate::from_pem(pem))
            }
            None => None,
        };

        Ok(Self {
            runtime,
            settings,
            write_queue_depth: write_queue_depth.max(1),
            tls_ca,
        })
    }

    fn endpoint(&self, target: &ChannelTarget) -> Result<Endpoint> {
        let mut endpoint = Endpoint::from(target.uri.clone())
            .connect_timeout(self.settings.connect_timeout())
            .tcp_keepalive(self.settings.tcp_keepalive());

        if target.security == SecurityMode::Tls {
            let domain = self
                .settings
                .tls_domain
                .clone()
                .unwrap_or_else(|| target.host().to_string());

            let mut tls = ClientTlsConfig::new().domain_name(domain);
            tls = match &self.tls_ca {
                Some(ca) => tls.ca_certificate(ca.clone()),
                None => tls.with_native_roots(),
            };
            endpoint = endpoint.tls_config(tls)?;
        }

        Ok(endpoint)
    }
}

impl Transport for GrpcTransport {
    fn open(&self, target: &ChannelTarget) -> Result<Arc<dyn Stub>> {
        let endpoint = self.endpoint(target)?;
        let channel = self.runtime.enter(|| endpoint.connect_lazy());

        tracing::debug!(endpoint = %target, "opened lazy channel");

        Ok(Arc::new(GrpcStub {
            client: LeapBrushApiClient::new(channel),
            runtime: self.runtime.clone(),
            write_queue_depth: self.write_queue_depth,
        }))
    }
}

/// LeapBrushApi client stub over one channel
pub struct GrpcStub {
    client: LeapBrushApiClient<Channel>,
    runtime: BridgeRuntime,
    write_queue_depth: usize,
}

impl Stub for GrpcStub {
    fn unary(&self, ctx: &CallContext, method: UnaryMethod, request: Payload) -> Result<Payload> {
        let mut client = self.client.clone();
        let request = ctx.request(request);

        self.runtime.block_on(ctx.run_with_deadline(async move {
            let response = match method {
                UnaryMethod::UpdateDevice => client.update_device(request).await?,
                UnaryMethod::Rpc => client.rpc(request).await?,
            };
            Ok(response.into_inner())
        }))?
    }

    fn update_device_stream(&self, ctx: &CallContext) -> Result<Box<dyn PayloadWriter>> {
        let (sender, receiver) = mpsc::channel(self.write_queue_depth);
        let half_closed = CancellationToken::new();
        let body = ReceiverStream::new(receiver).chain(end_on_half_close(half_closed.clone()));
        let mut client = self.client.clone();
        let request = ctx.request(body);
        let cancel = ctx.cancellation();
        let ended = CancellationToken::new();
        let ended_guard = ended.clone().drop_guard();

        let call = self.runtime.spawn(async move {
            let _ended = ended_guard;
            tokio::select! {
                _ = cancel.cancelled() => Err(BridgeError::Cancelled),
                response = client.update_device_stream(request) => {
                    response.map(|r| r.into_inner()).map_err(BridgeError::from)
                }
            }
        });

        Ok(Box::new(GrpcWriter {
            ctx: ctx.clone(),
            runtime: self.runtime.clone(),
            sender: Some(sender),
            half_closed,
            ended,
            call: Some(call),
        }))
    }

    fn register_and_listen(
        &self,
        ctx: &CallContext,
        request: Payload,
    ) -> Result<Box<dyn PayloadReader>> {
        let mut client = self.client.clone();
        let request = ctx.request(request);
        let cancel = ctx.cancellation();

        let call = self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(BridgeError::Cancelled),
                response = client.register_and_listen(request) => {
                    response.map(|r| r.into_inner()).map_err(BridgeError::from)
                }
            }
        });

        Ok(Box::new(GrpcReader {
            ctx: ctx.clone(),
            runtime: self.runtime.clone(),
            state: ReaderState::Pending(call),
        }))
    }
}

/// Writer feeding a running `UpdateDeviceStream` call
struct GrpcWriter {
    ctx: CallContext,
    runtime: BridgeRuntime,
    sender: Option<mpsc::Sender<Payload>>,
    /// Cancelled by `finish`; only then does the request stream end cleanly
    half_closed: CancellationToken,
    /// Cancelled when the call task returns
    ended: CancellationToken,
    call: Option<JoinHandle<Result<Payload>>>,
}

impl PayloadWriter for GrpcWriter {
    fn write(&mut self, payload: Payload) -> Result<()> {
        let sender = self
            .sender
            .clone()
            .ok_or_else(|| BridgeError::StreamClosed("stream already finished".into()))?;

        let ended = self.ended.clone();

        self.runtime.block_on(self.ctx.run(async move {
            tokio::select! {
                biased;
                _ = ended.cancelled() => Err(BridgeError::StreamClosed("call already ended".into())),
                sent = sender.send(payload) => {
                    sent.map_err(|_| BridgeError::StreamClosed("call ended by the server".into()))
                }
            }
        }))?
    }

    fn finish(&mut self) -> Result<Payload> {
        self.half_closed.cancel();
        // dropping the only sender ends the request stream
        self.sender.take();
        let call = self
            .call
            .take()
            .ok_or_else(|| BridgeError::StreamClosed("stream already finished".into()))?;

        self.runtime.block_on(self.ctx.run(async move {
            match call.await {
                Ok(result) => result,
                Err(e) => Err(BridgeError::internal(format!("update stream task failed: {}", e))),
            }
        }))?
    }
}

impl Drop for GrpcWriter {
    fn drop(&mut self) {
        // the request stream stays open, so the aborted call resets it
        if let Some(call) = self.call.take() {
            self.ctx.cancel();
            call.abort();
        }
        self.sender.take();
    }
}

/// Empty tail for the request stream, ending once `half_closed` fires
fn end_on_half_close(half_closed: CancellationToken) -> impl Stream<Item = Payload> + Send + 'static {
    futures::stream::once(half_closed.cancelled_owned()).filter_map(|()| futures::future::ready(None))
}

enum ReaderState {
    /// Waiting for response headers
    Pending(JoinHandle<Result<Streaming<Payload>>>),
    Open(Streaming<Payload>),
    Done,
}

/// Reader draining a running `RegisterAndListen` call
struct GrpcReader {
    ctx: CallContext,
    runtime: BridgeRuntime,
    state: ReaderState,
}

impl PayloadReader for GrpcReader {
    fn read(&mut self) -> Result<Option<Payload>> {
        loop {
            match std::mem::replace(&mut self.state, ReaderState::Done) {
                ReaderState::Pending(call) => {
                    let stream = self.runtime.block_on(self.ctx.run(async move {
                        match call.await {
                            Ok(result) => result,
                            Err(e) => Err(BridgeError::internal(format!(
                                "listen task failed: {}",
                                e
                            ))),
                        }
                    }))??;
                    self.state = ReaderState::Open(stream);
                }
                ReaderState::Open(mut stream) => {
                    let next = self.runtime.block_on(self.ctx.run(async {
                        stream.message().await.map_err(BridgeError::from)
                    }))??;
                    if next.is_some() {
                        self.state = ReaderState::Open(stream);
                    }
                    return Ok(next);
                }
                ReaderState::Done => return Ok(None),
            }
        }
    }
}

impl Drop for GrpcReader {
    fn drop(&mut self) {
        self.ctx.cancel();
        if let ReaderState::Pending(call) = std::mem::replace(&mut self.state, ReaderState::Done) {
            call.abort();
        }
    }
}
