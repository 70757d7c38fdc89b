//! # Chunk Runner
//!
//! Drives one step through read → process → buffer → write cycles:
//!
//! 1. Pull items from the reader and process each one. Skipped items are counted and
//!    dropped; the rest are buffered until the buffer holds `chunk_size` items or the
//!    reader is exhausted.
//! 2. Hand the buffer to the writer as one atomic unit.
//! 3. Repeat until the reader is exhausted with nothing buffered.
//!
//! Chunks commit strictly in read order. A reader, writer or timeout fault aborts the
//! current chunk (nothing of it is written) and ends the step as failed; earlier chunks stay
//! committed. Faults are never retried here.
//!
//! The optional chunk timeout bounds filling only. Once a write has started it runs to its
//! own result, so a chunk whose commit reached the store is never reported as failed.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

use super::types::{StepComponents, StepFailure, StepReport};
use crate::config::StepConfig;
use crate::error::{BatchError, BatchResult};
use crate::item::{ItemProcessor, ItemReader, ItemWriter, ProcessOutcome};
use crate::models::PartitionLabel;
use crate::state_machine::{ChunkEvent, ChunkState, ChunkStateMachine};

/// Commit interval and optional per-chunk time limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub chunk_size: usize,
    pub chunk_timeout: Option<Duration>,
}

impl ChunkSettings {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }
}

impl From<&StepConfig> for ChunkSettings {
    fn from(config: &StepConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_timeout: config.chunk_timeout(),
        }
    }
}

/// Items accumulated for one chunk
pub(crate) struct ChunkFill<O> {
    pub items: Vec<O>,
    pub source_exhausted: bool,
}

/// Result of one successful chunk cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkProgress {
    /// Reader exhausted with an empty buffer; nothing was written
    Exhausted,
    /// A chunk was written; `last` when the reader reported end of stream while filling it
    Committed { last: bool },
}

/// Read and process items until the chunk is full or the reader is exhausted
pub(crate) async fn fill_chunk<I, O>(
    reader: &mut dyn ItemReader<I>,
    processor: &dyn ItemProcessor<I, O>,
    chunk_size: usize,
    machine: &mut ChunkStateMachine,
    report: &mut StepReport,
) -> BatchResult<ChunkFill<O>>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    let mut items = Vec::with_capacity(chunk_size);

    loop {
        let Some(item) = reader.read().await? else {
            machine.transition(&ChunkEvent::SourceExhausted {
                buffered: items.len(),
            })?;
            return Ok(ChunkFill {
                items,
                source_exhausted: true,
            });
        };
        report.read_count += 1;

        match processor.process(item) {
            ProcessOutcome::Item(output) => {
                items.push(output);
                if items.len() >= chunk_size {
                    machine.transition(&ChunkEvent::BufferFull)?;
                    return Ok(ChunkFill {
                        items,
                        source_exhausted: false,
                    });
                }
                machine.transition(&ChunkEvent::ItemBuffered)?;
            }
            ProcessOutcome::Skip => report.skip_count += 1,
        }
    }
}

/// Write a filled chunk and record the commit
pub(crate) async fn commit_chunk<O>(
    writer: &dyn ItemWriter<O>,
    fill: ChunkFill<O>,
    machine: &mut ChunkStateMachine,
    report: &mut StepReport,
) -> BatchResult<ChunkProgress>
where
    O: Send + Sync + 'static,
{
    if machine.current_state() == ChunkState::Done {
        return Ok(ChunkProgress::Exhausted);
    }

    writer.write(&fill.items).await?;
    machine.transition(&ChunkEvent::WriteSucceeded)?;
    report.record_commit(fill.items.len());

    Ok(ChunkProgress::Committed {
        last: fill.source_exhausted,
    })
}

/// Await the fill of a chunk, failing it with [`BatchError::ChunkTimeout`] past the limit
pub(crate) async fn fill_with_timeout<T>(
    limit: Option<Duration>,
    chunk_index: usize,
    fill: impl Future<Output = BatchResult<T>>,
) -> BatchResult<T> {
    match limit {
        None => fill.await,
        Some(limit) => tokio::time::timeout(limit, fill)
            .await
            .unwrap_or_else(|_| {
                Err(BatchError::ChunkTimeout {
                    chunk_index,
                    timeout_ms: limit.as_millis() as u64,
                })
            }),
    }
}

/// Move the state machine from a committed chunk to the next cycle
pub(crate) fn advance_after_commit(
    machine: &mut ChunkStateMachine,
    last: bool,
) -> BatchResult<()> {
    machine.transition(&ChunkEvent::NextChunk)?;
    if last {
        machine.transition(&ChunkEvent::SourceExhausted { buffered: 0 })?;
    }
    Ok(())
}

/// Sequential chunk loop for one partition (or one unpartitioned step)
pub struct ChunkRunner<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    components: StepComponents<I, O>,
    settings: ChunkSettings,
    report: StepReport,
}

impl<I, O> ChunkRunner<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(
        step_name: impl Into<String>,
        partition: Option<PartitionLabel>,
        components: StepComponents<I, O>,
        settings: ChunkSettings,
    ) -> Self {
        Self {
            components,
            settings,
            report: StepReport::new(step_name, partition),
        }
    }

    /// Run to a terminal state. Faults are reported, never returned.
    #[instrument(
        skip(self),
        fields(
            step = %self.report.step_name,
            partition = ?self.report.partition.as_ref().map(|label| label.as_str()),
            chunk_size = self.settings.chunk_size
        )
    )]
    pub async fn run(mut self) -> StepReport {
        let mut machine = ChunkStateMachine::new();

        match self.drive(&mut machine).await {
            Ok(()) => {
                self.report.complete();
                debug!(
                    commits = self.report.commit_count(),
                    written = self.report.write_count,
                    skipped = self.report.skip_count,
                    "Step completed"
                );
            }
            Err((chunk_index, error)) => {
                if let Err(transition_error) =
                    machine.transition(&ChunkEvent::fault(error.to_string()))
                {
                    debug!(error = %transition_error, "Fault raised outside an open chunk");
                }
                crate::log_chunk!(
                    warn,
                    "FAILED",
                    step: self.report.step_name,
                    chunk: chunk_index,
                    error: error.to_string(),
                    committed: self.report.commit_count(),
                );
                self.report.fail(StepFailure::at_chunk(chunk_index, error));
            }
        }

        self.report
    }

    async fn drive(&mut self, machine: &mut ChunkStateMachine) -> Result<(), (usize, BatchError)> {
        let mut chunk_index = 0;

        loop {
            let progress = self
                .run_chunk(machine, chunk_index)
                .await
                .map_err(|error| (chunk_index, error))?;

            match progress {
                ChunkProgress::Exhausted => return Ok(()),
                ChunkProgress::Committed { last } => {
                    crate::log_chunk!(
                        debug,
                        "COMMITTED",
                        step: self.report.step_name,
                        chunk: chunk_index,
                        items: self.report.chunk_sizes.last().copied().unwrap_or_default(),
                    );
                    advance_after_commit(machine, last).map_err(|error| (chunk_index, error))?;
                    if last {
                        return Ok(());
                    }
                    chunk_index += 1;
                }
            }
        }
    }

    async fn run_chunk(
        &mut self,
        machine: &mut ChunkStateMachine,
        chunk_index: usize,
    ) -> BatchResult<ChunkProgress> {
        let components = &mut self.components;
        let fill = fill_with_timeout(
            self.settings.chunk_timeout,
            chunk_index,
            fill_chunk(
                components.reader.as_mut(),
                components.processor.as_ref(),
                self.settings.chunk_size,
                machine,
                &mut self.report,
            ),
        )
        .await?;
        commit_chunk(components.writer.as_ref(), fill, machine, &mut self.report).await
    }
}
