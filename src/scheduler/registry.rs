use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::config::BusyPolicy;
use crate::error::{MtError, Result};
use crate::message::{self, MessageStore, TranslationJobMessage};
use crate::scheduler::job::{Job, JobState};
use crate::worker::executor::Spawner;

/// Deleted ids remembered for idempotent deletes before the oldest is
/// forgotten.
pub const DEFAULT_TOMBSTONE_LIMIT: usize = 10_000;

/// Outcome of reading a job's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    /// Raw message bytes as persisted by the execution.
    Ready(Vec<u8>),
    NotReady,
}

/// The worker's table of jobs, keyed by request id.
///
/// Owned by the service loop, which is the only caller; nothing here locks.
/// At most one execution exists per id: a second submit of a registered id
/// is refused.
pub struct JobRegistry {
    jobs: HashMap<String, Job>,
    /// Recently deleted ids, so a repeated delete succeeds. Bounded by
    /// `tombstone_limit`; `deleted_order` holds them oldest first.
    deleted: HashSet<String>,
    deleted_order: VecDeque<String>,
    tombstone_limit: usize,
    store: MessageStore,
    spawner: Box<dyn Spawner>,
    policy: BusyPolicy,
}

impl JobRegistry {
    pub fn new(store: MessageStore, spawner: Box<dyn Spawner>, policy: BusyPolicy) -> Self {
        Self {
            jobs: HashMap::new(),
            deleted: HashSet::new(),
            deleted_order: VecDeque::new(),
            tombstone_limit: DEFAULT_TOMBSTONE_LIMIT,
            store,
            spawner,
            policy,
        }
    }

    pub fn with_tombstone_limit(mut self, limit: usize) -> Self {
        self.tombstone_limit = limit;
        self
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Decode an armored message and submit it. Every failure is logged and
    /// reported as `false`; nothing is registered in that case.
    pub fn submit_armored(&mut self, armored: &str) -> bool {
        let decoded = message::disarm(armored).and_then(|bytes| message::decode(&bytes));
        match decoded {
            Ok(message) => self.submit(message),
            Err(e) => {
                tracing::warn!(error = %e, "Rejected undecodable translation request");
                false
            }
        }
    }

    pub fn submit(&mut self, message: TranslationJobMessage) -> bool {
        let request_id = message.request_id.clone();
        match self.try_submit(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Translation request refused");
                false
            }
        }
    }

    /// Persist the message and start its execution. Returns once the
    /// execution is spawned, not when it completes.
    pub fn try_submit(&mut self, message: TranslationJobMessage) -> Result<()> {
        let request_id = message.request_id.clone();
        message::store::validate_request_id(&request_id)?;

        if self.jobs.contains_key(&request_id) {
            return Err(MtError::DuplicateJob(request_id));
        }
        let running = self.running_count();
        if !self.policy.admits(running) {
            return Err(MtError::WorkerBusy { running });
        }

        self.store.write(&message)?;

        let mut job = Job::new(request_id.clone());
        match self.spawner.spawn(&request_id) {
            Ok(execution) => job.start(execution),
            Err(e) => {
                if let Err(cleanup) = self.store.remove(&request_id) {
                    tracing::warn!(request_id = %request_id, error = %cleanup, "Failed to clean up after spawn failure");
                }
                return Err(e);
            }
        }

        tracing::info!(
            request_id = %request_id,
            source_language = %message.source_language,
            target_language = %message.target_language,
            pid = ?job.pid,
            "Job started"
        );
        if self.deleted.remove(&request_id) {
            self.deleted_order.retain(|id| id != &request_id);
        }
        self.jobs.insert(request_id, job);
        Ok(())
    }

    pub fn is_valid(&self, request_id: &str) -> bool {
        self.jobs.contains_key(request_id)
    }

    /// True once the execution has ended; false for unknown ids.
    pub fn is_ready(&mut self, request_id: &str) -> bool {
        self.jobs
            .get_mut(request_id)
            .map(|job| job.refresh() == JobState::Finished)
            .unwrap_or(false)
    }

    pub fn running_count(&mut self) -> usize {
        let mut running = 0;
        for job in self.jobs.values_mut() {
            if job.is_running() {
                running += 1;
            }
        }
        running
    }

    pub fn is_busy(&mut self) -> bool {
        let running = self.running_count();
        self.policy.is_busy(running)
    }

    pub fn fetch(&mut self, request_id: &str) -> Result<JobOutput> {
        let job = self
            .jobs
            .get_mut(request_id)
            .ok_or_else(|| MtError::UnknownJob(request_id.to_string()))?;

        if job.refresh() != JobState::Finished {
            return Ok(JobOutput::NotReady);
        }
        Ok(JobOutput::Ready(self.store.read_raw(request_id)?))
    }

    /// Kill the execution if it still runs, then drop the blob, its scratch
    /// files and the registry entry.
    ///
    /// Deleting an id twice succeeds while it is among the most recent
    /// deletions. Unknown ids yield `false`, and so does
    /// a kill that fails: the job then stays registered so the caller can
    /// retry.
    pub fn delete(&mut self, request_id: &str) -> bool {
        let Some(job) = self.jobs.get_mut(request_id) else {
            return self.deleted.contains(request_id);
        };

        if let Err(e) = job.terminate() {
            tracing::error!(request_id, error = %e, "Failed to terminate job");
            return false;
        }
        let state = job.state;
        self.jobs.remove(request_id);
        self.remember_deleted(request_id);

        if let Err(e) = self.store.remove(request_id) {
            tracing::warn!(request_id, error = %e, "Failed to remove job files");
        }
        tracing::info!(request_id, state = %state, "Job deleted");
        true
    }

    fn remember_deleted(&mut self, request_id: &str) {
        if self.tombstone_limit == 0 || !self.deleted.insert(request_id.to_string()) {
            return;
        }
        self.deleted_order.push_back(request_id.to_string());
        while self.deleted_order.len() > self.tombstone_limit {
            if let Some(oldest) = self.deleted_order.pop_front() {
                self.deleted.remove(&oldest);
            }
        }
    }

    /// Number of deleted ids still remembered.
    pub fn tombstones(&self) -> usize {
        self.deleted.len()
    }

    pub fn list_ids(&self) -> BTreeSet<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn get(&self, request_id: &str) -> Option<&Job> {
        self.jobs.get(request_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Kill every running execution. Entries and blobs stay so a restarted
    /// broker can still see what was lost.
    pub fn terminate_all(&mut self) -> usize {
        let mut terminated = 0;
        for (request_id, job) in self.jobs.iter_mut() {
            if !job.is_running() {
                continue;
            }
            match job.terminate() {
                Ok(()) => terminated += 1,
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, "Failed to terminate job")
                }
            }
        }
        if terminated > 0 {
            tracing::info!(count = terminated, "Terminated running jobs");
        }
        terminated
    }
}
