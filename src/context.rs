//! Per-call context: cancellation, deadline and metadata for one RPC
//!
//! Every unary call and every stream bridge owns exactly one context. The
//! cancellation token is the only part shared outside the call, so a host
//! can cancel a stream without waiting on the stream's lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};

use crate::error::{BridgeError, Result};

/// Validated metadata attached to every call made through one connection
#[derive(Debug, Clone, Default)]
pub struct CallMetadata {
    entries: Arc<Vec<(AsciiMetadataKey, AsciiMetadataValue)>>,
}

impl CallMetadata {
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let key = AsciiMetadataKey::from_bytes(key.to_ascii_lowercase().as_bytes()).map_err(|e| {
                BridgeError::invalid_parameter(format!("metadata key '{}': {}", key, e))
            })?;
            let value: AsciiMetadataValue = value.parse().map_err(|e| {
                BridgeError::invalid_parameter(format!("metadata value for '{}': {}", key.as_str(), e))
            })?;
            entries.push((key, value));
        }
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cancellation, deadline and metadata scope for one RPC
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Duration>,
    metadata: CallMetadata,
}

impl CallContext {
    pub fn new(deadline: Option<Duration>, metadata: CallMetadata) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline,
            metadata,
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Cancel the call; pending and future waits on this context fail
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wrap `message` in a request carrying this context's deadline and metadata
    pub fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        if let Some(deadline) = self.deadline {
            request.set_timeout(deadline);
        }
        let metadata = request.metadata_mut();
        for (key, value) in self.metadata.entries.iter() {
            metadata.insert(key.clone(), value.clone());
        }
        request
    }

    /// Await `future` unless the context is cancelled first
    pub async fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            result = future => result,
        }
    }

    /// Like [`run`](Self::run), additionally bounded by the deadline
    pub async fn run_with_deadline<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            Some(deadline) => {
                let bounded = async {
                    match tokio::time::timeout(deadline, future).await {
                        Ok(result) => result,
                        Err(_) => Err(BridgeError::Rpc {
                            code: tonic::Code::DeadlineExceeded,
                            message: format!("no response within {:?}", deadline),
                        }),
                    }
                };
                self.run(bounded).await
            }
            None => self.run(future).await,
        }
    }
}
