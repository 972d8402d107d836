//! Dedicated runtime driving the async RPC stack from blocking entry points
//!
//! Boundary calls arrive on host threads that know nothing about tokio. Each
//! call blocks its host thread on this runtime; spawned call tasks (stream
//! bodies, lazy channel workers) run on the runtime's own workers.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::config::RuntimeSettings;
use crate::error::{BridgeError, Result};

/// Runtime builder mirroring [`RuntimeSettings`]
pub struct RuntimeBuilder {
    settings: RuntimeSettings,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            settings: RuntimeSettings::default(),
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    pub fn worker_threads(mut self, count: usize) -> Self {
        self.settings.worker_threads = Some(count);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.settings.thread_name = name.into();
        self
    }

    pub fn build(self) -> Result<BridgeRuntime> {
        BridgeRuntime::with_settings(self.settings)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Multi-threaded runtime owned by the bridge
#[derive(Clone)]
pub struct BridgeRuntime {
    runtime: Arc<Runtime>,
}

impl BridgeRuntime {
    pub fn new() -> Result<Self> {
        Self::with_settings(RuntimeSettings::default())
    }

    pub fn with_settings(settings: RuntimeSettings) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();

        builder.enable_all().thread_name(&settings.thread_name);

        let workers = settings.worker_threads.unwrap_or_else(num_cpus::get).max(1);
        builder.worker_threads(workers);

        let runtime = builder
            .build()
            .map_err(|e| BridgeError::internal(format!("failed to build runtime: {}", e)))?;

        tracing::debug!(workers, thread_name = %settings.thread_name, "bridge runtime started");

        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Block the calling host thread on `future`
    ///
    /// Fails instead of panicking when called from inside an async context,
    /// where nested `block_on` is not allowed.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        if Handle::try_current().is_ok() {
            return Err(BridgeError::internal(
                "blocking bridge call made from inside an async runtime",
            ));
        }
        Ok(self.runtime.block_on(future))
    }

    /// Spawn a task onto the runtime's workers
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Run a synchronous closure inside the runtime context
    ///
    /// Needed for constructors that spawn background work, such as lazily
    /// connected channels.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.runtime.enter();
        f()
    }
}
