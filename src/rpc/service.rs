use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::adapter::BackendAdapter;
use crate::message;
use crate::rpc::protocol::{WorkerCall, WorkerReply, FETCH_ERROR, FETCH_NOT_READY};
use crate::scheduler::{JobOutput, JobRegistry};

/// A call forwarded from the HTTP layer to the service loop.
#[derive(Debug)]
pub struct ServiceRequest {
    pub call: WorkerCall,
    pub reply_tx: oneshot::Sender<WorkerReply>,
}

/// The worker's RPC surface over its job registry.
///
/// One task owns the service and drains calls in arrival order, so no
/// two calls ever observe the registry mid-update.
pub struct WorkerService {
    registry: JobRegistry,
    adapter: Arc<dyn BackendAdapter>,
    shutdown: CancellationToken,
}

impl WorkerService {
    pub fn new(
        registry: JobRegistry,
        adapter: Arc<dyn BackendAdapter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            adapter,
            shutdown,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Answer one call. Never fails: errors surface as sentinel values.
    pub fn handle(&mut self, call: WorkerCall) -> WorkerReply {
        match call {
            WorkerCall::IsAlive => WorkerReply::Bool(true),
            WorkerCall::IsBusy => WorkerReply::Bool(self.registry.is_busy()),
            WorkerCall::IsReady(id) => WorkerReply::Bool(self.registry.is_ready(&id)),
            WorkerCall::IsValid(id) => WorkerReply::Bool(self.registry.is_valid(&id)),
            WorkerCall::StartTranslation(armored) => {
                WorkerReply::Bool(self.registry.submit_armored(&armored))
            }
            WorkerCall::FetchTranslation(id) => WorkerReply::Text(self.fetch(&id)),
            WorkerCall::DeleteTranslation(id) => WorkerReply::Bool(self.registry.delete(&id)),
            WorkerCall::LanguagePairs => {
                WorkerReply::Pairs(self.adapter.language_pairs().into_iter().collect())
            }
            WorkerCall::ListRequests => {
                WorkerReply::Ids(self.registry.list_ids().into_iter().collect())
            }
            WorkerCall::StopWorker => {
                self.registry.terminate_all();
                tracing::info!("Stop requested, shutting down worker");
                self.shutdown.cancel();
                WorkerReply::Null
            }
        }
    }

    fn fetch(&mut self, request_id: &str) -> String {
        match self.registry.fetch(request_id) {
            Ok(JobOutput::Ready(bytes)) => message::armor(&bytes),
            Ok(JobOutput::NotReady) => FETCH_NOT_READY.to_string(),
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Fetch failed");
                FETCH_ERROR.to_string()
            }
        }
    }

    /// Drain calls until the shutdown token fires or every sender is gone.
    /// Running jobs are killed on the way out.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ServiceRequest>) {
        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(ServiceRequest { call, reply_tx }) = request else {
                        break;
                    };
                    let method = call.method();
                    let reply = self.handle(call);
                    tracing::debug!(method, "Handled call");
                    if reply_tx.send(reply).is_err() {
                        tracing::debug!(method, "Caller went away before the reply");
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        let killed = self.registry.terminate_all();
        tracing::info!(killed, jobs = self.registry.len(), "Worker service stopped");
    }
}
