//! Loopback LeapBrushApi server for integration tests
//!
//! Behaviour:
//! - `Rpc` echoes the request, after sleeping `x-delay-ms` when that
//!   metadata is present
//! - `UpdateDevice` echoes the request, failing with `UNAVAILABLE` when it
//!   is empty
//! - `UpdateDeviceStream` records every message and answers with a
//!   [`Summary`]; an empty message makes it fail with `ABORTED`, and an
//!   update from [`STALLED_DEVICE`] makes it stop reading for good. How each
//!   call's request stream ended is recorded as well
//! - `RegisterAndListen` decodes a [`Register`] and sends that many
//!   [`StateFrame`]s, then ends the stream or holds it open

#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{Stream, StreamExt};
use leapbrush_bridge::proto::leap_brush_api_server::{LeapBrushApi, LeapBrushApiServer};
use leapbrush_bridge::{Bridge, BridgeConfig, Payload};
use prost::Message;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status, Streaming};

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceUpdate {
    #[prost(string, tag = "1")]
    pub device_id: String,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub pose: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Summary {
    #[prost(uint32, tag = "1")]
    pub received: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Register {
    #[prost(uint32, tag = "1")]
    pub frames: u32,
    #[prost(bool, tag = "2")]
    pub hold_open: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StateFrame {
    #[prost(uint32, tag = "1")]
    pub seq: u32,
}

/// Device id that makes the server stop reading its update stream
pub const STALLED_DEVICE: &str = "stalled";

/// Encode a prost message as a payload
pub fn payload<M: Message>(message: &M) -> Payload {
    Payload::parse(&message.encode_to_vec()).expect("prost output is valid")
}

pub fn update(sequence: u64) -> DeviceUpdate {
    DeviceUpdate {
        device_id: "headset-1".to_string(),
        sequence,
        pose: vec![1, 2, 3, sequence as u8],
    }
}

/// What the server has observed
#[derive(Default)]
pub struct Observed {
    pub streamed: Mutex<Vec<Vec<u8>>>,
    /// `Ok` for a clean half-close, otherwise the error the read failed with
    pub stream_ends: Mutex<Vec<tonic::Code>>,
    pub unary_requests: Mutex<Vec<Vec<u8>>>,
}

struct EchoService {
    observed: Arc<Observed>,
}

type FrameStream = Pin<Box<dyn Stream<Item = Result<Payload, Status>> + Send + 'static>>;

#[async_trait::async_trait]
impl LeapBrushApi for EchoService {
    type RegisterAndListenStream = FrameStream;

    async fn register_and_listen(
        &self,
        request: Request<Payload>,
    ) -> Result<Response<Self::RegisterAndListenStream>, Status> {
        let register = Register::decode(request.into_inner().as_bytes())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let frames = futures::stream::iter(1..=register.frames)
            .map(|seq| Ok(payload(&StateFrame { seq })));

        let stream: FrameStream = if register.hold_open {
            Box::pin(frames.chain(futures::stream::pending()))
        } else {
            Box::pin(frames)
        };
        Ok(Response::new(stream))
    }

    async fn update_device(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        let request = request.into_inner();
        self.observed.unary_requests.lock().unwrap().push(request.to_vec());
        if request.is_empty() {
            return Err(Status::unavailable("device offline"));
        }
        Ok(Response::new(request))
    }

    async fn update_device_stream(
        &self,
        request: Request<Streaming<Payload>>,
    ) -> Result<Response<Payload>, Status> {
        let mut stream = request.into_inner();
        let mut received = 0u32;

        loop {
            let message = match stream.message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(status) => {
                    self.observed.stream_ends.lock().unwrap().push(status.code());
                    return Err(status);
                }
            };
            if message.is_empty() {
                return Err(Status::aborted("empty update rejected"));
            }
            self.observed.streamed.lock().unwrap().push(message.to_vec());
            received += 1;

            let stalled = DeviceUpdate::decode(message.as_bytes())
                .map(|update| update.device_id == STALLED_DEVICE)
                .unwrap_or(false);
            if stalled {
                futures::future::pending::<()>().await;
            }
        }

        self.observed.stream_ends.lock().unwrap().push(tonic::Code::Ok);
        Ok(Response::new(payload(&Summary { received })))
    }

    async fn rpc(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        let delay = request
            .metadata()
            .get("x-delay-ms")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(delay) = delay {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let request = request.into_inner();
        self.observed.unary_requests.lock().unwrap().push(request.to_vec());
        Ok(Response::new(request))
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub observed: Arc<Observed>,
    _runtime: tokio::runtime::Runtime,
}

impl TestServer {
    /// Start the server on its own runtime, bound to an ephemeral port
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();
        let observed = Arc::new(Observed::default());

        let service = LeapBrushApiServer::new(EchoService {
            observed: observed.clone(),
        });
        runtime.spawn(async move {
            if let Err(e) = tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
            {
                eprintln!("Test server failed: {}", e);
            }
        });

        Self {
            addr,
            observed,
            _runtime: runtime,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Wait up to five seconds for `condition` to hold on what was observed
    pub fn wait_for(&self, condition: impl Fn(&Observed) -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if condition(&self.observed) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        condition(&self.observed)
    }
}

/// Bridge over the real gRPC transport with a small runtime
pub fn bridge_with(configure: impl FnOnce(&mut BridgeConfig)) -> Bridge {
    let mut config = BridgeConfig::default();
    config.runtime.worker_threads = Some(2);
    config.channel.connect_timeout_ms = 2_000;
    configure(&mut config);
    Bridge::new(config).unwrap()
}

pub fn bridge() -> Bridge {
    bridge_with(|_| {})
}
