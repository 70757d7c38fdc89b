//! Run audit: job runs own partition runs, each owning one step run. Records are created
//! at start and finalized exactly once.

pub mod job_repository;

pub use job_repository::{JobRepository, JobRun, PartitionRun, StepRun};
