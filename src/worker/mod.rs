//! Isolated execution of translation jobs.
//!
//! Each accepted job runs away from the service loop so that a slow, hung
//! or crashing backend never blocks the worker's RPC surface:
//!
//! - [`executor`]: the [`Execution`] handle and the [`Spawner`]s that create
//!   them (child process by default, supervised task on request)
//! - [`runner`]: the `run-job` entry point executed inside the child process
//!
//! # Execution Flow
//!
//! 1. The registry persists the message and calls [`Spawner::spawn`]
//! 2. The execution reads the message, runs the adapter, rewrites the message
//! 3. The registry polls [`Execution::is_finished`] on `is_ready`
//! 4. `delete_translation` calls [`Execution::terminate`] (hard kill)

pub mod executor;
pub mod runner;

pub use executor::{Execution, ProcessSpawner, Spawner, TaskSpawner};
