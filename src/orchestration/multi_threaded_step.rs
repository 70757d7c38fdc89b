//! Multi-threaded step: one unpartitioned step whose chunks are processed by up to
//! `throttle_limit` concurrent workers.
//!
//! Workers share a single reader behind an async mutex and fill a whole chunk while holding
//! it, so no item is handed to two workers. Writes happen outside the lock and may commit
//! out of read order. The reader must not depend on commit order: a snapshot-id reader is
//! safe, a frozen-offset reader is not (two workers would see the same uncommitted front).
//!
//! When one worker fails, the others stop after their current chunk.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::chunk_runner::{
    advance_after_commit, commit_chunk, fill_chunk, fill_with_timeout, ChunkProgress,
    ChunkSettings,
};
use super::types::{StepComponents, StepFailure, StepReport};
use crate::error::{BatchError, BatchResult};
use crate::execution::{CancellationHandle, WorkOutcome, WorkerPool};
use crate::item::{ItemProcessor, ItemReader, ItemWriter};
use crate::state_machine::{ChunkEvent, ChunkStateMachine};

struct SharedStep<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    step_name: String,
    reader: Mutex<Box<dyn ItemReader<I>>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Arc<dyn ItemWriter<O>>,
    settings: ChunkSettings,
    next_chunk: AtomicUsize,
    failed: AtomicBool,
    cancellation: CancellationHandle,
}

enum WorkerExit {
    Exhausted,
    Failed,
    Stopped,
}

pub struct MultiThreadedStep<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    shared: Arc<SharedStep<I, O>>,
    throttle_limit: usize,
}

impl<I, O> MultiThreadedStep<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(
        step_name: impl Into<String>,
        components: StepComponents<I, O>,
        settings: ChunkSettings,
        throttle_limit: usize,
        cancellation: CancellationHandle,
    ) -> Self {
        Self {
            shared: Arc::new(SharedStep {
                step_name: step_name.into(),
                reader: Mutex::new(components.reader),
                processor: components.processor,
                writer: components.writer,
                settings,
                next_chunk: AtomicUsize::new(0),
                failed: AtomicBool::new(false),
                cancellation,
            }),
            throttle_limit: throttle_limit.max(1),
        }
    }

    /// Run every worker to completion and merge their reports
    #[instrument(skip_all, fields(step = %self.shared.step_name, workers = self.throttle_limit))]
    pub async fn run(self, pool: &WorkerPool) -> StepReport {
        let units: Vec<_> = (0..self.throttle_limit)
            .map(|worker| {
                let shared = Arc::clone(&self.shared);
                (worker, async move { shared.run_worker(worker).await })
            })
            .collect();

        let cancellation = self.shared.cancellation.clone();
        let outcomes = pool.dispatch(self.throttle_limit, units, &cancellation).await;

        let mut merged = StepReport::new(self.shared.step_name.clone(), None);
        let mut stopped = false;
        let mut panic = None;

        for (worker, outcome) in outcomes {
            match outcome {
                WorkOutcome::Completed((report, exit)) => {
                    stopped |= matches!(exit, WorkerExit::Stopped);
                    merged.absorb(report);
                }
                WorkOutcome::Panicked(message) => {
                    panic.get_or_insert(format!("worker {worker} panicked: {message}"));
                }
                WorkOutcome::NotDispatched => stopped = true,
            }
        }

        if let Some(message) = panic {
            merged.fail(StepFailure::outside_chunk(BatchError::Internal(message)));
        } else if let Some(failure) = merged.failure.take() {
            merged.fail(failure);
        } else if stopped {
            merged.stop();
        } else {
            merged.complete();
        }

        debug!(
            status = %merged.status,
            commits = merged.commit_count(),
            written = merged.write_count,
            "Multi-threaded step finished"
        );
        merged
    }
}

impl<I, O> SharedStep<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    async fn run_worker(&self, worker: usize) -> (StepReport, WorkerExit) {
        let mut report = StepReport::new(self.step_name.clone(), None);
        let mut machine = ChunkStateMachine::new();

        let exit = loop {
            if self.failed.load(Ordering::Acquire) || self.cancellation.is_cancelled() {
                break WorkerExit::Stopped;
            }

            let (chunk_index, result) = self.run_chunk(&mut machine, &mut report).await;
            let result = result.and_then(|progress| match progress {
                ChunkProgress::Committed { last } => {
                    advance_after_commit(&mut machine, last).map(|()| progress)
                }
                ChunkProgress::Exhausted => Ok(progress),
            });

            match result {
                Ok(ChunkProgress::Exhausted) | Ok(ChunkProgress::Committed { last: true }) => {
                    break WorkerExit::Exhausted
                }
                Ok(ChunkProgress::Committed { last: false }) => {}
                Err(error) => {
                    self.failed.store(true, Ordering::Release);
                    if let Err(transition_error) =
                        machine.transition(&ChunkEvent::fault(error.to_string()))
                    {
                        debug!(error = %transition_error, "Fault raised outside an open chunk");
                    }
                    crate::log_chunk!(
                        warn,
                        "FAILED",
                        step: self.step_name,
                        chunk: chunk_index,
                        worker: worker,
                        error: error.to_string(),
                    );
                    report.fail(StepFailure::at_chunk(chunk_index, error));
                    break WorkerExit::Failed;
                }
            }
        };

        (report, exit)
    }

    /// One chunk cycle; the timeout starts once this worker holds the reader
    async fn run_chunk(
        &self,
        machine: &mut ChunkStateMachine,
        report: &mut StepReport,
    ) -> (usize, BatchResult<ChunkProgress>) {
        let (chunk_index, fill) = {
            let mut reader = self.reader.lock().await;
            let chunk_index = self.next_chunk.fetch_add(1, Ordering::AcqRel);
            let fill = fill_with_timeout(
                self.settings.chunk_timeout,
                chunk_index,
                fill_chunk(
                    reader.as_mut(),
                    self.processor.as_ref(),
                    self.settings.chunk_size,
                    machine,
                    report,
                ),
            )
            .await;
            (chunk_index, fill)
        };

        let progress = match fill {
            Ok(fill) => commit_chunk(self.writer.as_ref(), fill, machine, report).await,
            Err(error) => Err(error),
        };
        (chunk_index, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriterError;
    use crate::item::{ListItemReader, PassThroughProcessor};
    use crate::state_machine::RunStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct SlowWriter {
        chunks: SyncMutex<Vec<Vec<u32>>>,
        fail_containing: Option<u32>,
    }

    #[async_trait]
    impl ItemWriter<u32> for SlowWriter {
        async fn write(&self, items: &[u32]) -> Result<(), WriterError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self
                .fail_containing
                .is_some_and(|poison| items.contains(&poison))
            {
                return Err(WriterError::new("poison item"));
            }
            self.chunks.lock().push(items.to_vec());
            Ok(())
        }
    }

    fn step(writer: Arc<SlowWriter>, items: u32, throttle: usize) -> MultiThreadedStep<u32, u32> {
        let components = StepComponents {
            reader: Box::new(ListItemReader::new(0..items)),
            processor: Arc::new(PassThroughProcessor),
            writer,
        };
        MultiThreadedStep::new(
            "step",
            components,
            ChunkSettings::new(4),
            throttle,
            CancellationHandle::new(),
        )
    }

    #[tokio::test]
    async fn test_every_item_written_exactly_once() {
        let writer = Arc::new(SlowWriter::default());
        let pool = WorkerPool::new(4);
        let report = step(writer.clone(), 30, 3).run(&pool).await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.write_count, 30);
        assert_eq!(report.read_count, 30);

        let mut written: Vec<u32> = writer.chunks.lock().iter().flatten().copied().collect();
        written.sort_unstable();
        assert_eq!(written, (0..30).collect::<Vec<_>>());
        assert!(writer.chunks.lock().iter().all(|chunk| chunk.len() <= 4));
        assert!(pool.stats().max_active() <= 3);
    }

    struct SlowReader {
        next: u32,
        end: u32,
    }

    #[async_trait]
    impl ItemReader<u32> for SlowReader {
        async fn read(&mut self) -> Result<Option<u32>, crate::error::ReaderError> {
            tokio::time::sleep(Duration::from_millis(4)).await;
            if self.next == self.end {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(self.next - 1))
        }
    }

    #[tokio::test]
    async fn test_waiting_for_the_reader_does_not_count_toward_timeout() {
        // Four workers queue behind ~20ms fills, so a worker can wait well past 30ms.
        let writer = Arc::new(SlowWriter::default());
        let components = StepComponents {
            reader: Box::new(SlowReader { next: 0, end: 48 }),
            processor: Arc::new(PassThroughProcessor),
            writer: writer.clone(),
        };
        let settings = ChunkSettings::new(4).with_timeout(Duration::from_millis(30));
        let pool = WorkerPool::new(5);
        let report =
            MultiThreadedStep::new("step", components, settings, 4, CancellationHandle::new())
                .run(&pool)
                .await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.write_count, 48);
    }

    #[tokio::test]
    async fn test_failure_stops_step() {
        let writer = Arc::new(SlowWriter {
            fail_containing: Some(5),
            ..SlowWriter::default()
        });
        let pool = WorkerPool::new(3);
        let report = step(writer.clone(), 40, 2).run(&pool).await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.failed_chunk().is_some());
        let written: Vec<u32> = writer.chunks.lock().iter().flatten().copied().collect();
        assert!(!written.contains(&5));
        assert!(report.write_count < 40);
    }
}
