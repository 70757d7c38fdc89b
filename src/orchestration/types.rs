use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BatchError;
use crate::item::{ItemProcessor, ItemReader, ItemWriter};
use crate::models::PartitionLabel;
use crate::state_machine::RunStatus;

/// Freshly constructed reader, processor and writer for one step execution
pub struct StepComponents<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub reader: Box<dyn ItemReader<I>>,
    pub processor: Arc<dyn ItemProcessor<I, O>>,
    pub writer: Arc<dyn ItemWriter<O>>,
}

impl<I, O> StepComponents<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(
        reader: impl ItemReader<I> + 'static,
        processor: impl ItemProcessor<I, O> + 'static,
        writer: impl ItemWriter<O> + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            processor: Arc::new(processor),
            writer: Arc::new(writer),
        }
    }
}

impl<I, O> fmt::Debug for StepComponents<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepComponents").finish_non_exhaustive()
    }
}

/// Why a step ended as failed
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Zero-based index of the aborted chunk; `None` when the fault was outside any chunk
    pub chunk_index: Option<usize>,
    pub error: BatchError,
}

impl StepFailure {
    pub fn at_chunk(chunk_index: usize, error: BatchError) -> Self {
        Self {
            chunk_index: Some(chunk_index),
            error,
        }
    }

    pub fn outside_chunk(error: BatchError) -> Self {
        Self {
            chunk_index: None,
            error,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk_index {
            Some(index) => write!(f, "chunk {index}: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step_name: String,
    pub partition: Option<PartitionLabel>,
    pub status: RunStatus,
    pub read_count: usize,
    pub write_count: usize,
    pub skip_count: usize,
    /// Item count of every committed chunk, in commit order
    pub chunk_sizes: Vec<usize>,
    pub failure: Option<StepFailure>,
}

impl StepReport {
    pub fn new(step_name: impl Into<String>, partition: Option<PartitionLabel>) -> Self {
        Self {
            step_name: step_name.into(),
            partition,
            status: RunStatus::Running,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            chunk_sizes: Vec::new(),
            failure: None,
        }
    }

    pub fn commit_count(&self) -> usize {
        self.chunk_sizes.len()
    }

    pub fn failed_chunk(&self) -> Option<usize> {
        self.failure.as_ref().and_then(|failure| failure.chunk_index)
    }

    pub fn record_commit(&mut self, items: usize) {
        self.chunk_sizes.push(items);
        self.write_count += items;
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
    }

    pub fn stop(&mut self) {
        self.status = RunStatus::Stopped;
    }

    pub fn fail(&mut self, failure: StepFailure) {
        self.status = RunStatus::Failed;
        self.failure = Some(failure);
    }

    /// Fold a concurrent worker's counters into this report; the failure with the lowest
    /// chunk index wins
    pub fn absorb(&mut self, other: StepReport) {
        self.read_count += other.read_count;
        self.write_count += other.write_count;
        self.skip_count += other.skip_count;
        self.chunk_sizes.extend(other.chunk_sizes);

        if let Some(failure) = other.failure {
            let replace = match &self.failure {
                None => true,
                Some(current) => failure.chunk_index < current.chunk_index,
            };
            if replace {
                self.failure = Some(failure);
            }
        }
    }
}

/// Terminal result of a job run
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_run_id: Uuid,
    pub job_name: String,
    pub status: RunStatus,
    /// One report per partition (undispatched ones as `STOPPED`), or the single step of an
    /// unpartitioned job
    pub steps: Vec<StepReport>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn total_written(&self) -> usize {
        self.steps.iter().map(|step| step.write_count).sum()
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|step| step.status == RunStatus::Failed)
    }

    pub fn step_for(&self, label: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| {
            step.partition
                .as_ref()
                .is_some_and(|partition| partition.as_str() == label)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriterError;

    #[test]
    fn test_report_counters() {
        let mut report = StepReport::new("step", None);
        report.record_commit(10);
        report.record_commit(2);
        report.complete();
        assert_eq!(report.commit_count(), 2);
        assert_eq!(report.write_count, 12);
        assert_eq!(report.failed_chunk(), None);
    }

    #[test]
    fn test_absorb_keeps_earliest_failure() {
        let mut merged = StepReport::new("step", None);
        let mut late = StepReport::new("step", None);
        late.record_commit(5);
        late.fail(StepFailure::at_chunk(4, WriterError::new("late").into()));
        let mut early = StepReport::new("step", None);
        early.fail(StepFailure::at_chunk(1, WriterError::new("early").into()));

        merged.absorb(late);
        merged.absorb(early);
        assert_eq!(merged.failed_chunk(), Some(1));
        assert_eq!(merged.write_count, 5);
        assert_eq!(
            merged.failure.unwrap().to_string(),
            "chunk 1: Writer fault: early"
        );
    }
}
