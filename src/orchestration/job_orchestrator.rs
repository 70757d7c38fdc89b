//! # Job Orchestrator
//!
//! Composes partitioner, chunk runners, worker pool, run repository and lifecycle listeners
//! into one runnable unit.
//!
//! ## Run phases
//!
//! 1. **Startup checks**: configuration, parameter validators, factory preflight, partition
//!    creation and per-partition component construction. Any fault here is returned as
//!    `Err` before a run is recorded or any work is dispatched.
//! 2. **Launch**: the run is recorded (subject to restart prevention) and `before_job` fires.
//! 3. **Dispatch**: partitions run on the worker pool, at most `throttle_limit` at once.
//!    Each partition records its step run, fires `before_step`/`after_step`, and runs its own
//!    sequential [`ChunkRunner`]. A failed or panicking partition never cancels its siblings.
//! 4. **Finalize**: the job is `FAILED` if any step failed, `STOPPED` if cancellation left
//!    partitions undispatched, otherwise `COMPLETED`. `after_job` fires with the final run.
//!
//! Failed runs are never restarted automatically.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::chunk_runner::{ChunkRunner, ChunkSettings};
use super::multi_threaded_step::MultiThreadedStep;
use super::step_factory::{JobDefinition, StepFactory};
use super::types::{JobResult, StepComponents, StepFailure, StepReport};
use crate::config::{BatchConfig, ConfigManager, ExecutionMode};
use crate::error::{BatchError, BatchResult, StartupError};
use crate::events::ListenerRegistry;
use crate::execution::{CancellationHandle, WorkOutcome, WorkerPool};
use crate::models::{JobParameters, Partition, PartitionLabel};
use crate::repository::JobRepository;
use crate::state_machine::RunStatus;

pub struct JobOrchestrator {
    config: BatchConfig,
    pool: WorkerPool,
    repository: Arc<JobRepository>,
    listeners: Arc<ListenerRegistry>,
    cancellation: CancellationHandle,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("config", &self.config)
            .field("pool_size", &self.pool.pool_size())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// One unit of partitioned work, prepared before dispatch
struct PreparedStep<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    partition: Option<Partition>,
    components: StepComponents<I, O>,
}

impl JobOrchestrator {
    /// Orchestrator with logging listeners and a fresh run repository
    pub fn new(config: BatchConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let pool = WorkerPool::new(config.pool.pool_size);

        Ok(Self {
            config,
            pool,
            repository: Arc::new(JobRepository::new()),
            listeners: Arc::new(ListenerRegistry::with_logging()),
            cancellation: CancellationHandle::new(),
        })
    }

    pub fn from_config_manager(manager: &ConfigManager) -> Result<Self, StartupError> {
        Self::new(manager.config().clone())
    }

    /// Share a run repository (and thus restart prevention) between orchestrators
    pub fn with_repository(mut self, repository: Arc<JobRepository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_listeners(mut self, listeners: ListenerRegistry) -> Self {
        self.listeners = Arc::new(listeners);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<JobRepository> {
        &self.repository
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Handle that stops dispatching new partitions of this orchestrator's runs
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Run a job to a terminal status.
    ///
    /// Startup faults are returned as `Err`; faults during the run are reported in the
    /// [`JobResult`].
    #[instrument(skip_all, fields(job_name = %job.name, mode = ?self.config.step.mode))]
    pub async fn run<F: StepFactory>(
        &self,
        job: &JobDefinition<F>,
        parameters: JobParameters,
    ) -> BatchResult<JobResult> {
        let prepared = self.prepare(job, &parameters).await?;

        let job_run = self.repository.start_job(
            &job.name,
            &parameters,
            self.config.job.prevent_restart,
        )?;
        crate::log_job!(
            info,
            "STARTED",
            job_name: job.name,
            job_run_id: job_run.id,
            steps: prepared.len(),
        );
        self.listeners.before_job(&job_run);

        let steps = match self.config.step.mode {
            ExecutionMode::MultiThreaded => self.run_multi_threaded(job, job_run.id, prepared).await,
            ExecutionMode::Partitioned => self.run_partitioned(job, job_run.id, prepared).await,
        };

        let status = Self::aggregate_status(&steps);
        let finished = self.repository.finish_job(job_run.id, status)?;
        self.listeners.after_job(&finished);

        crate::log_job!(
            info,
            "FINISHED",
            job_name: job.name,
            job_run_id: job_run.id,
            status: status.to_string(),
            written: steps.iter().map(|step| step.write_count).sum::<usize>(),
        );

        Ok(JobResult {
            job_run_id: job_run.id,
            job_name: job.name.clone(),
            status,
            steps,
        })
    }

    /// Startup checks and component construction; nothing is recorded yet
    async fn prepare<F: StepFactory>(
        &self,
        job: &JobDefinition<F>,
        parameters: &JobParameters,
    ) -> Result<Vec<PreparedStep<F::Input, F::Output>>, StartupError> {
        self.config.validate()?;
        job.validate_parameters(parameters)?;
        job.factory.preflight().await?;

        let partitions: Vec<Option<Partition>> = match (&job.partitioner, self.config.step.mode)
        {
            (Some(partitioner), ExecutionMode::Partitioned) => {
                let partitions = partitioner.partition(self.config.pool.grid_size);
                let mut labels = HashSet::with_capacity(partitions.len());
                if let Some((duplicate, _)) =
                    partitions.iter().find(|(label, _)| !labels.insert(label))
                {
                    return Err(StartupError::InvalidConfiguration(format!(
                        "partition label {} is not unique",
                        duplicate.as_str()
                    )));
                }
                partitions
                    .into_iter()
                    .map(|(label, context)| Some(Partition::new(label, context)))
                    .collect()
            }
            (Some(_), ExecutionMode::MultiThreaded) => {
                debug!("Multi-threaded mode runs one unpartitioned step; partitioner unused");
                vec![None]
            }
            (None, _) => vec![None],
        };

        partitions
            .into_iter()
            .map(|partition| -> Result<_, StartupError> {
                let components = job.factory.create(parameters, partition.as_ref())?;
                Ok(PreparedStep {
                    partition,
                    components,
                })
            })
            .collect()
    }

    async fn run_partitioned<F: StepFactory>(
        &self,
        job: &JobDefinition<F>,
        job_run_id: Uuid,
        prepared: Vec<PreparedStep<F::Input, F::Output>>,
    ) -> Vec<StepReport> {
        let settings = ChunkSettings::from(&self.config.step);
        let throttle_limit = self.config.pool.throttle_limit;

        let units: Vec<_> = prepared
            .into_iter()
            .map(|step| {
                let label = step.partition.as_ref().map(|p| p.label.clone());
                let unit = Self::partition_unit(
                    Arc::clone(&self.repository),
                    Arc::clone(&self.listeners),
                    job_run_id,
                    job.step_name.clone(),
                    step,
                    settings,
                );
                (label, unit)
            })
            .collect();

        let outcomes = self
            .pool
            .dispatch(throttle_limit, units, &self.cancellation)
            .await;

        let mut reports = Vec::with_capacity(outcomes.len());
        for (label, outcome) in outcomes {
            match outcome {
                WorkOutcome::Completed(report) => reports.push(report),
                WorkOutcome::Panicked(message) => {
                    let mut report = StepReport::new(job.step_name.clone(), label.clone());
                    report.fail(StepFailure::outside_chunk(BatchError::Internal(format!(
                        "partition worker panicked: {message}"
                    ))));
                    reports.push(report);
                }
                WorkOutcome::NotDispatched => {
                    let mut report = StepReport::new(job.step_name.clone(), label.clone());
                    report.stop();
                    reports.push(report);
                    crate::log_partition!(
                        info,
                        "NOT_DISPATCHED",
                        partition: label.as_ref().map_or("<single step>", |l| l.as_str()),
                        job_run_id: job_run_id,
                    );
                }
            }
        }

        // Panicked workers never reported their step run.
        match self
            .repository
            .abandon_running_steps(job_run_id, "partition worker panicked")
        {
            Ok(abandoned) => abandoned
                .iter()
                .for_each(|step_run| self.listeners.after_step(step_run)),
            Err(error) => error!(error = %error, "Could not close abandoned step runs"),
        }

        reports
    }

    /// Execution of one partition, owned and `'static` so it can run on the pool
    async fn partition_unit<I, O>(
        repository: Arc<JobRepository>,
        listeners: Arc<ListenerRegistry>,
        job_run_id: Uuid,
        step_name: String,
        step: PreparedStep<I, O>,
        settings: ChunkSettings,
    ) -> StepReport
    where
        I: Send + 'static,
        O: Send + Sync + 'static,
    {
        let label: Option<PartitionLabel> = step.partition.as_ref().map(|p| p.label.clone());

        let started = match &step.partition {
            Some(partition) => repository.start_partition(
                job_run_id,
                &step_name,
                partition.label.clone(),
                partition.context.clone(),
            ),
            None => repository.start_step(job_run_id, &step_name),
        };
        let step_run = match started {
            Ok(step_run) => step_run,
            Err(error) => {
                let mut report = StepReport::new(step_name, label);
                report.fail(StepFailure::outside_chunk(error));
                return report;
            }
        };

        if let Some(partition) = &label {
            crate::log_partition!(info, "STARTED", partition: partition, step_run_id: step_run.id,);
        }
        listeners.before_step(&step_run);

        let report = ChunkRunner::new(step_name, label, step.components, settings)
            .run()
            .await;

        match repository.finish_step(job_run_id, step_run.id, &report) {
            Ok(finished) => listeners.after_step(&finished),
            Err(error) => error!(error = %error, "Could not finalize step run"),
        }
        report
    }

    async fn run_multi_threaded<F: StepFactory>(
        &self,
        job: &JobDefinition<F>,
        job_run_id: Uuid,
        prepared: Vec<PreparedStep<F::Input, F::Output>>,
    ) -> Vec<StepReport> {
        let mut reports = Vec::with_capacity(prepared.len());

        for step in prepared {
            let step_run = match self.repository.start_step(job_run_id, &job.step_name) {
                Ok(step_run) => step_run,
                Err(error) => {
                    let mut report = StepReport::new(job.step_name.clone(), None);
                    report.fail(StepFailure::outside_chunk(error));
                    reports.push(report);
                    continue;
                }
            };
            self.listeners.before_step(&step_run);

            let report = MultiThreadedStep::new(
                job.step_name.clone(),
                step.components,
                ChunkSettings::from(&self.config.step),
                self.config.pool.throttle_limit,
                self.cancellation.clone(),
            )
            .run(&self.pool)
            .await;

            match self.repository.finish_step(job_run_id, step_run.id, &report) {
                Ok(finished) => self.listeners.after_step(&finished),
                Err(error) => error!(error = %error, "Could not finalize step run"),
            }
            reports.push(report);
        }

        reports
    }

    fn aggregate_status(steps: &[StepReport]) -> RunStatus {
        if steps.iter().any(|step| step.status == RunStatus::Failed) {
            RunStatus::Failed
        } else if steps.iter().any(|step| step.status == RunStatus::Stopped) {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        }
    }
}
