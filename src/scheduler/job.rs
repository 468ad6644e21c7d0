use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::worker::executor::Execution;

/// `Submitted -> Running -> Finished`, or `Running -> Terminated` on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Running,
    Finished,
    Terminated,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Submitted => write!(f, "submitted"),
            JobState::Running => write!(f, "running"),
            JobState::Finished => write!(f, "finished"),
            JobState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A registered translation request and its execution.
#[derive(Debug)]
pub struct Job {
    pub request_id: String,
    pub state: JobState,
    pub pid: Option<u32>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    execution: Option<Box<dyn Execution>>,
}

impl Job {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: JobState::Submitted,
            pid: None,
            submitted_at: Utc::now(),
            finished_at: None,
            execution: None,
        }
    }

    /// Hand the job its execution; the job is now `Running`.
    pub fn start(&mut self, execution: Box<dyn Execution>) {
        self.pid = execution.pid();
        self.execution = Some(execution);
        self.state = JobState::Running;
    }

    /// Poll the execution and latch `Finished` once it has ended.
    pub fn refresh(&mut self) -> JobState {
        if self.state == JobState::Running {
            let finished = self
                .execution
                .as_mut()
                .map_or(true, |execution| execution.is_finished());
            if finished {
                self.state = JobState::Finished;
                self.finished_at = Some(Utc::now());
                self.execution = None;
            }
        }
        self.state
    }

    pub fn is_running(&mut self) -> bool {
        self.refresh() == JobState::Running
    }

    /// Kill a running execution. Finished jobs are left as they are.
    pub fn terminate(&mut self) -> Result<()> {
        if self.refresh() != JobState::Running {
            return Ok(());
        }
        if let Some(execution) = self.execution.as_mut() {
            execution.terminate()?;
        }
        self.execution = None;
        self.state = JobState::Terminated;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
