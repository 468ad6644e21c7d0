use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::adapter::BackendAdapter;
use crate::config::AdapterConfig;
use crate::error::{MtError, Result};
use crate::message::{MessageStore, TranslationJobMessage};

/// Handle to one job's isolated execution.
pub trait Execution: Send + fmt::Debug {
    /// Non-blocking completion check. Success and failure are not told apart.
    fn is_finished(&mut self) -> bool;

    /// Hard-stop the execution. No shutdown hook runs inside it.
    fn terminate(&mut self) -> Result<()>;

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Starts isolated executions of the adapter for a request id.
pub trait Spawner: Send + Sync {
    fn spawn(&self, request_id: &str) -> Result<Box<dyn Execution>>;
}

/// Runs each job in a child process: the worker binary re-executed as
/// `run-job`.
///
/// The child reads the persisted message, runs the adapter and rewrites the
/// message. Its stderr is inherited so its log lines land next to the
/// worker's.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    message_dir: PathBuf,
    adapter_spec: String,
}

impl ProcessSpawner {
    pub fn new(
        program: impl Into<PathBuf>,
        message_dir: impl Into<PathBuf>,
        adapter: &AdapterConfig,
    ) -> Result<Self> {
        Ok(Self {
            program: program.into(),
            message_dir: message_dir.into(),
            adapter_spec: adapter.to_spec()?,
        })
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, request_id: &str) -> Result<Box<dyn Execution>> {
        let child = Command::new(&self.program)
            .arg("run-job")
            .arg("--message-dir")
            .arg(&self.message_dir)
            .arg("--request-id")
            .arg(request_id)
            .arg("--adapter-spec")
            .arg(&self.adapter_spec)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MtError::Spawn(format!("{}: {}", self.program.display(), e))
            })?;

        let pid = child.id();
        tracing::info!(request_id, pid = ?pid, "Spawned job process");

        Ok(Box::new(ProcessExecution {
            request_id: request_id.to_string(),
            pid,
            child: Some(child),
        }))
    }
}

#[derive(Debug)]
pub struct ProcessExecution {
    request_id: String,
    pid: Option<u32>,
    /// `None` once the child has been reaped or handed to the reaper.
    child: Option<Child>,
}

impl Execution for ProcessExecution {
    fn is_finished(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(
                    request_id = %self.request_id,
                    exit_code = ?status.code(),
                    "Job process exited"
                );
                self.child = None;
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    error = %e,
                    "Failed to poll job process, treating it as finished"
                );
                self.child = None;
                true
            }
        }
    }

    fn terminate(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            self.child = Some(child);
            return Err(e.into());
        }
        tracing::info!(request_id = %self.request_id, pid = ?self.pid, "Killed job process");

        // Reap in the background so the killed child never lingers as a zombie.
        let request_id = self.request_id.clone();
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                tracing::warn!(request_id = %request_id, error = %e, "Failed to reap job process");
            }
        });
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Runs each job on a supervised tokio task inside the worker process.
///
/// A panicking adapter only takes down its own task. Termination aborts the
/// task at its next await point. The result is written under a cancel flag,
/// so once `terminate` returns the task can no longer write the blob.
pub struct TaskSpawner {
    store: MessageStore,
    adapter: Arc<dyn BackendAdapter>,
}

impl TaskSpawner {
    pub fn new(store: MessageStore, adapter: Arc<dyn BackendAdapter>) -> Self {
        Self { store, adapter }
    }
}

impl Spawner for TaskSpawner {
    fn spawn(&self, request_id: &str) -> Result<Box<dyn Execution>> {
        let store = self.store.clone();
        let adapter = self.adapter.clone();
        let id = request_id.to_string();

        let cancelled = Arc::new(Mutex::new(false));
        let flag = cancelled.clone();

        let handle = tokio::spawn(async move {
            match adapter.complete(&store, &id).await {
                Ok(message) => store_unless_cancelled(&flag, &store, &message, adapter.name()),
                Err(e) => tracing::error!(request_id = %id, error = %e, "Job task failed"),
            }
        });

        Ok(Box::new(TaskExecution {
            request_id: request_id.to_string(),
            handle,
            cancelled,
        }))
    }
}

fn store_unless_cancelled(
    cancelled: &Mutex<bool>,
    store: &MessageStore,
    message: &TranslationJobMessage,
    adapter: &str,
) {
    let request_id = message.request_id.as_str();
    let Ok(cancelled) = cancelled.lock() else {
        tracing::error!(request_id, "Cancel flag poisoned, dropping result");
        return;
    };
    if *cancelled {
        tracing::debug!(request_id, "Job task terminated, dropping result");
        return;
    }
    match store.write(message) {
        Ok(()) => tracing::info!(request_id, adapter, "Translation stored"),
        Err(e) => tracing::error!(request_id, error = %e, "Job task failed"),
    }
}

#[derive(Debug)]
pub struct TaskExecution {
    request_id: String,
    handle: JoinHandle<()>,
    cancelled: Arc<Mutex<bool>>,
}

impl Execution for TaskExecution {
    fn is_finished(&mut self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for a write already in progress, then aborts the task.
    fn terminate(&mut self) -> Result<()> {
        let mut cancelled = self
            .cancelled
            .lock()
            .map_err(|_| MtError::Internal("cancel flag poisoned".to_string()))?;
        *cancelled = true;
        drop(cancelled);

        self.handle.abort();
        tracing::info!(request_id = %self.request_id, "Aborted job task");
        Ok(())
    }
}
