pub mod job;
pub mod registry;

pub use job::{Job, JobState};
pub use registry::{JobOutput, JobRegistry};
