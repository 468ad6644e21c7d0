use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::{build_adapter, BackendAdapter};
use crate::config::{IsolationMode, WorkerConfig};
use crate::error::Result;
use crate::message::MessageStore;
use crate::rpc::{self, WorkerService};
use crate::scheduler::JobRegistry;
use crate::worker::{ProcessSpawner, Spawner, TaskSpawner};

/// Capacity of the channel between the HTTP handlers and the service loop.
const SERVICE_QUEUE_DEPTH: usize = 100;

/// A translation worker: one adapter, one job registry, one RPC endpoint.
pub struct WorkerNode {
    pub config: WorkerConfig,
    store: MessageStore,
    adapter: Arc<dyn BackendAdapter>,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let store = MessageStore::open(&config.message_dir)?;
        let adapter = build_adapter(&config.adapter)?;
        Ok(Self {
            config,
            store,
            adapter,
        })
    }

    fn spawner(&self) -> Result<Box<dyn Spawner>> {
        match self.config.isolation {
            IsolationMode::Process => {
                let program = match &self.config.program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe()?,
                };
                Ok(Box::new(ProcessSpawner::new(
                    program,
                    self.store.dir(),
                    &self.config.adapter,
                )?))
            }
            IsolationMode::Task => Ok(Box::new(TaskSpawner::new(
                self.store.clone(),
                self.adapter.clone(),
            ))),
        }
    }

    /// Bind the configured address and serve until `shutdown` fires or a
    /// client calls `stop_worker`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// Startup order:
    /// 1. Build the spawner for the configured isolation mode
    /// 2. Spawn the service loop, which owns the job registry
    /// 3. Run the HTTP server until shutdown
    /// 4. Wait for the service loop to kill any running jobs
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let addr: SocketAddr = listener.local_addr()?;
        let spawner = self.spawner()?;
        let registry = JobRegistry::new(self.store.clone(), spawner, self.config.busy_policy);

        tracing::info!(
            addr = %addr,
            adapter = self.adapter.name(),
            isolation = ?self.config.isolation,
            busy_policy = ?self.config.busy_policy,
            message_dir = %self.store.dir().display(),
            "Starting translation worker"
        );

        let (tx, rx) = mpsc::channel(SERVICE_QUEUE_DEPTH);
        let service = WorkerService::new(registry, self.adapter.clone(), shutdown.clone());
        let service_handle = tokio::spawn(service.run(rx));

        let served = rpc::serve(listener, tx, shutdown.clone()).await;
        // The server may have failed on its own; make sure the loop exits too.
        shutdown.cancel();
        if let Err(e) = service_handle.await {
            tracing::error!(error = %e, "Service loop panicked");
        }
        served?;

        tracing::info!(addr = %addr, "Translation worker stopped");
        Ok(())
    }
}
