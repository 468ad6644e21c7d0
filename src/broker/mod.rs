//! The broker side of the job protocol.
//!
//! [`WorkerProxy`] wraps one worker's RPC surface; [`Broker`] tracks the
//! requests it has handed out, keeps its own copy of every message and
//! pulls results home once workers report them ready.

pub mod proxy;

pub use proxy::{Fetched, WorkerProxy};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapter::LanguagePair;
use crate::config::BrokerConfig;
use crate::error::{MtError, Result};
use crate::message::{MessageStore, TranslationJobMessage};

/// What the broker remembers about a request it dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub worker: String,
    pub source_language: String,
    pub target_language: String,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ready: bool,
    pub deleted: bool,
}

/// A worker's advertised state, queried live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerCapabilities {
    pub alive: bool,
    pub busy: bool,
    pub language_pairs: Vec<LanguagePair>,
}

pub struct Broker {
    store: MessageStore,
    workers: HashMap<String, WorkerProxy>,
    requests: HashMap<String, RequestRecord>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let store = MessageStore::open(&config.message_dir)?;
        let mut workers = HashMap::new();
        for descriptor in &config.workers {
            let proxy = WorkerProxy::new(
                descriptor.name.clone(),
                &descriptor.base_url(),
                config.rpc_timeout,
            )?;
            workers.insert(descriptor.name.clone(), proxy);
        }

        tracing::info!(
            message_dir = %config.message_dir.display(),
            workers = ?workers.keys().collect::<Vec<_>>(),
            "Broker ready"
        );
        Ok(Self {
            store,
            workers,
            requests: HashMap::new(),
        })
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn worker(&self, name: &str) -> Result<&WorkerProxy> {
        self.workers
            .get(name)
            .ok_or_else(|| MtError::UnknownWorker(name.to_string()))
    }

    /// Persist the message locally and hand it to `worker`.
    ///
    /// A refused start leaves no trace on the broker side.
    pub async fn submit(&mut self, worker: &str, message: TranslationJobMessage) -> Result<String> {
        let proxy = self.worker(worker)?;
        message.validate_languages()?;
        self.store.write(&message)?;

        let request_id = message.request_id.clone();
        if !proxy.start_translation(&message).await {
            if let Err(e) = self.store.remove(&request_id) {
                tracing::warn!(request_id = %request_id, error = %e, "Failed to remove rejected request");
            }
            return Err(MtError::StartRejected {
                worker: worker.to_string(),
                request_id,
            });
        }

        tracing::info!(request_id = %request_id, worker, "Request dispatched");
        self.requests.insert(
            request_id.clone(),
            RequestRecord {
                request_id: request_id.clone(),
                worker: worker.to_string(),
                source_language: message.source_language,
                target_language: message.target_language,
                submitted_at: Utc::now(),
                completed_at: None,
                ready: false,
                deleted: false,
            },
        );
        Ok(request_id)
    }

    /// Check whether the result is home. On the first positive answer the
    /// result is copied into the broker store and the worker-side job is
    /// released.
    pub async fn poll(&mut self, request_id: &str) -> Result<bool> {
        let record = self
            .requests
            .get(request_id)
            .ok_or_else(|| MtError::UnknownJob(request_id.to_string()))?;
        if record.ready {
            return Ok(true);
        }
        if record.deleted {
            return Ok(false);
        }

        let proxy = self.worker(&record.worker)?;
        if !proxy.is_ready(request_id).await {
            return Ok(false);
        }

        let message = match proxy.fetch_translation(request_id).await {
            Fetched::Message(message) => message,
            other => {
                tracing::warn!(request_id, fetched = ?other, "Worker reported ready but fetch failed");
                return Ok(false);
            }
        };
        self.store.write(&message)?;

        if !proxy.delete_translation(request_id).await {
            tracing::warn!(request_id, worker = %proxy.name(), "Failed to release finished job on worker");
        }

        if let Some(record) = self.requests.get_mut(request_id) {
            record.ready = true;
            record.completed_at = Some(Utc::now());
        }
        tracing::info!(request_id, "Request completed");
        Ok(true)
    }

    /// The locally stored result once polled ready.
    pub fn fetch(&self, request_id: &str) -> Fetched {
        match self.requests.get(request_id) {
            Some(record) if record.ready && !record.deleted => {}
            Some(record) if !record.deleted => return Fetched::NotReady,
            _ => return Fetched::Error,
        }

        match self.store.read(request_id) {
            Ok(message) => Fetched::Message(message),
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Stored result unreadable");
                Fetched::Error
            }
        }
    }

    /// Withdraw a request. Unfinished jobs are deleted on their worker first;
    /// if that fails the request stays cancellable and `false` is returned.
    pub async fn cancel(&mut self, request_id: &str) -> bool {
        let Some(record) = self.requests.get(request_id) else {
            return false;
        };
        if record.deleted {
            return true;
        }

        if !record.ready {
            let released = match self.workers.get(&record.worker) {
                Some(proxy) => proxy.delete_translation(request_id).await,
                None => false,
            };
            if !released {
                tracing::warn!(request_id, worker = %record.worker, "Worker did not delete job");
                return false;
            }
        }

        if let Err(e) = self.store.remove(request_id) {
            tracing::warn!(request_id, error = %e, "Failed to remove stored request");
        }
        if let Some(record) = self.requests.get_mut(request_id) {
            record.deleted = true;
        }
        tracing::info!(request_id, "Request cancelled");
        true
    }

    pub async fn capabilities(&self, worker: &str) -> Result<WorkerCapabilities> {
        let proxy = self.worker(worker)?;
        Ok(WorkerCapabilities {
            alive: proxy.is_alive().await,
            busy: proxy.is_busy().await,
            language_pairs: proxy.language_pairs().await,
        })
    }

    /// True when the broker's own copy is missing or does not decode.
    pub fn is_corrupted(&self, request_id: &str) -> bool {
        self.store.read(request_id).is_err()
    }

    pub fn request(&self, request_id: &str) -> Option<&RequestRecord> {
        self.requests.get(request_id)
    }

    /// Known requests, oldest first.
    pub fn requests(&self) -> Vec<&RequestRecord> {
        let mut records: Vec<_> = self.requests.values().collect();
        records.sort_by_key(|r| r.submitted_at);
        records
    }
}
