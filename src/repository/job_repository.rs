use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BatchError, BatchResult, StartupError};
use crate::models::{ExecutionContext, JobParameters, PartitionLabel};
use crate::orchestration::StepReport;
use crate::state_machine::RunStatus;

/// Audit record of one step execution (a partition's worker, or the single unpartitioned step)
#[derive(Debug, Clone, PartialEq)]
pub struct StepRun {
    pub id: Uuid,
    pub job_run_id: Uuid,
    pub step_name: String,
    pub partition: Option<PartitionLabel>,
    pub status: RunStatus,
    pub read_count: usize,
    pub write_count: usize,
    pub skip_count: usize,
    pub commit_count: usize,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepRun {
    fn new(job_run_id: Uuid, step_name: &str, partition: Option<PartitionLabel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_run_id,
            step_name: step_name.to_string(),
            partition,
            status: RunStatus::Running,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            commit_count: 0,
            failure: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn finalize(&mut self, report: &StepReport) -> BatchResult<()> {
        if self.status.is_terminal() {
            return Err(BatchError::StateTransition(format!(
                "step run {} is already finalized as {}",
                self.id, self.status
            )));
        }

        self.status = report.status;
        self.read_count = report.read_count;
        self.write_count = report.write_count;
        self.skip_count = report.skip_count;
        self.commit_count = report.commit_count();
        self.failure = report.failure.as_ref().map(|failure| failure.to_string());
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}

/// A partition dispatched to a worker, with the context it was given
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRun {
    pub label: PartitionLabel,
    pub context: ExecutionContext,
    pub step: StepRun,
}

/// Audit record of one job launch
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub instance_key: String,
    pub parameters: JobParameters,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Empty for an unpartitioned job
    pub partitions: Vec<PartitionRun>,
    /// Set for an unpartitioned job
    pub step: Option<StepRun>,
}

impl JobRun {
    pub fn step_runs(&self) -> impl Iterator<Item = &StepRun> {
        self.partitions
            .iter()
            .map(|partition| &partition.step)
            .chain(self.step.iter())
    }

    fn step_run_mut(&mut self, step_run_id: Uuid) -> Option<&mut StepRun> {
        self.partitions
            .iter_mut()
            .map(|partition| &mut partition.step)
            .chain(self.step.iter_mut())
            .find(|step| step.id == step_run_id)
    }
}

/// In-process, append-only store of job, partition and step runs.
///
/// Jobs are indexed by instance (job name plus identifying parameters) so a relaunch of the
/// same instance can be refused.
#[derive(Debug, Default)]
pub struct JobRepository {
    jobs: DashMap<Uuid, JobRun>,
    instances: DashMap<String, Uuid>,
}

impl JobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn instance_index_key(job_name: &str, parameters: &JobParameters) -> String {
        format!("{job_name}|{}", parameters.instance_key())
    }

    /// Create a running job run, enforcing restart rules for the job instance
    pub fn start_job(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        prevent_restart: bool,
    ) -> Result<JobRun, StartupError> {
        let instance_key = parameters.instance_key();

        match self
            .instances
            .entry(Self::instance_index_key(job_name, parameters))
        {
            Entry::Occupied(mut existing) => {
                if prevent_restart {
                    return Err(StartupError::RestartPrevented {
                        job_name: job_name.to_string(),
                        instance_key,
                    });
                }

                let last_status = self
                    .jobs
                    .get(existing.get())
                    .map(|run| run.status)
                    .unwrap_or(RunStatus::Failed);
                if matches!(last_status, RunStatus::Running | RunStatus::Completed) {
                    return Err(StartupError::InstanceNotRestartable {
                        job_name: job_name.to_string(),
                        instance_key,
                        status: last_status.to_string(),
                    });
                }

                let run = self.insert_run(job_name, parameters, instance_key);
                debug!(job_run_id = %run.id, "Relaunching job instance");
                existing.insert(run.id);
                Ok(run)
            }
            Entry::Vacant(slot) => {
                let run = self.insert_run(job_name, parameters, instance_key);
                slot.insert(run.id);
                Ok(run)
            }
        }
    }

    fn insert_run(&self, job_name: &str, parameters: &JobParameters, instance_key: String) -> JobRun {
        let run = JobRun {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            instance_key,
            parameters: parameters.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            partitions: Vec::new(),
            step: None,
        };
        self.jobs.insert(run.id, run.clone());
        run
    }

    /// Record a partition as dispatched and open its step run
    pub fn start_partition(
        &self,
        job_run_id: Uuid,
        step_name: &str,
        label: PartitionLabel,
        context: ExecutionContext,
    ) -> BatchResult<StepRun> {
        let mut job = self.running_job_mut(job_run_id)?;
        let step = StepRun::new(job_run_id, step_name, Some(label.clone()));
        job.partitions.push(PartitionRun {
            label,
            context,
            step: step.clone(),
        });
        Ok(step)
    }

    /// Open the step run of an unpartitioned job
    pub fn start_step(&self, job_run_id: Uuid, step_name: &str) -> BatchResult<StepRun> {
        let mut job = self.running_job_mut(job_run_id)?;
        if job.step.is_some() {
            return Err(BatchError::StateTransition(format!(
                "job run {job_run_id} already has a step run"
            )));
        }
        let step = StepRun::new(job_run_id, step_name, None);
        job.step = Some(step.clone());
        Ok(step)
    }

    /// Finalize a step run from its report; a step run is finalized exactly once
    pub fn finish_step(
        &self,
        job_run_id: Uuid,
        step_run_id: Uuid,
        report: &StepReport,
    ) -> BatchResult<StepRun> {
        let mut job = self.job_mut(job_run_id)?;
        let step = job.step_run_mut(step_run_id).ok_or_else(|| {
            BatchError::Internal(format!(
                "step run {step_run_id} not found in job run {job_run_id}"
            ))
        })?;
        step.finalize(report)?;
        Ok(step.clone())
    }

    /// Fail every still-running step run of a job, returning the step runs it closed
    pub fn abandon_running_steps(
        &self,
        job_run_id: Uuid,
        reason: &str,
    ) -> BatchResult<Vec<StepRun>> {
        let mut guard = self.job_mut(job_run_id)?;
        let job: &mut JobRun = &mut guard;
        let partition_steps = job.partitions.iter_mut().map(|partition| &mut partition.step);
        let abandoned: Vec<StepRun> = partition_steps
            .chain(job.step.as_mut())
            .filter(|step| !step.status.is_terminal())
            .map(|step| {
                step.status = RunStatus::Failed;
                step.failure = Some(reason.to_string());
                step.ended_at = Some(Utc::now());
                step.clone()
            })
            .collect();

        if !abandoned.is_empty() {
            warn!(
                job_run_id = %job_run_id,
                abandoned = abandoned.len(),
                reason,
                "Closed step runs without a report"
            );
        }
        Ok(abandoned)
    }

    /// Finalize a job run; a job run is finalized exactly once
    pub fn finish_job(&self, job_run_id: Uuid, status: RunStatus) -> BatchResult<JobRun> {
        if !status.is_terminal() {
            return Err(BatchError::StateTransition(format!(
                "cannot finalize job run {job_run_id} as {status}"
            )));
        }

        let mut job = self.running_job_mut(job_run_id)?;
        job.status = status;
        job.ended_at = Some(Utc::now());
        Ok(job.clone())
    }

    pub fn get_job_run(&self, job_run_id: Uuid) -> Option<JobRun> {
        self.jobs.get(&job_run_id).map(|run| run.clone())
    }

    /// Most recent run of the job instance identified by `parameters`
    pub fn last_run(&self, job_name: &str, parameters: &JobParameters) -> Option<JobRun> {
        let id = *self
            .instances
            .get(&Self::instance_index_key(job_name, parameters))?;
        self.get_job_run(id)
    }

    pub fn job_run_count(&self) -> usize {
        self.jobs.len()
    }

    fn job_mut(
        &self,
        job_run_id: Uuid,
    ) -> BatchResult<dashmap::mapref::one::RefMut<'_, Uuid, JobRun>> {
        self.jobs
            .get_mut(&job_run_id)
            .ok_or_else(|| BatchError::Internal(format!("job run {job_run_id} not found")))
    }

    fn running_job_mut(
        &self,
        job_run_id: Uuid,
    ) -> BatchResult<dashmap::mapref::one::RefMut<'_, Uuid, JobRun>> {
        let job = self.job_mut(job_run_id)?;
        if job.status.is_terminal() {
            return Err(BatchError::StateTransition(format!(
                "job run {job_run_id} is already finalized as {}",
                job.status
            )));
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::{StepFailure, StepReport};
    use chrono::TimeZone;

    fn params() -> JobParameters {
        JobParameters::new().add_date(
            "nowDate",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_restart_prevented_for_same_instance() {
        let repository = JobRepository::new();
        let run = repository.start_job("inactiveUserJob", &params(), true).unwrap();
        repository.finish_job(run.id, RunStatus::Failed).unwrap();

        let error = repository
            .start_job("inactiveUserJob", &params(), true)
            .unwrap_err();
        assert!(matches!(error, StartupError::RestartPrevented { .. }));

        // Different identifying parameters form a new instance
        let other = params().add_long("inactiveAfterMonths", 6);
        assert!(repository.start_job("inactiveUserJob", &other, true).is_ok());
        assert_eq!(repository.job_run_count(), 2);
    }

    #[test]
    fn test_restart_allowed_only_after_unsuccessful_run() {
        let repository = JobRepository::new();
        let first = repository.start_job("job", &params(), false).unwrap();

        let error = repository.start_job("job", &params(), false).unwrap_err();
        assert!(matches!(error, StartupError::InstanceNotRestartable { .. }));

        repository.finish_job(first.id, RunStatus::Failed).unwrap();
        let second = repository.start_job("job", &params(), false).unwrap();
        assert_eq!(repository.last_run("job", &params()).unwrap().id, second.id);

        repository.finish_job(second.id, RunStatus::Completed).unwrap();
        assert!(repository.start_job("job", &params(), false).is_err());
    }

    #[test]
    fn test_runs_finalize_exactly_once() {
        let repository = JobRepository::new();
        let run = repository.start_job("job", &params(), true).unwrap();
        let step = repository
            .start_partition(
                run.id,
                "step",
                PartitionLabel::new("InactiveUserTask0"),
                ExecutionContext::builder().put_string("grade", "VIP").build(),
            )
            .unwrap();

        let mut report = StepReport::new("step", Some(PartitionLabel::new("InactiveUserTask0")));
        report.read_count = 12;
        report.record_commit(10);
        report.record_commit(2);
        report.complete();

        let finished = repository.finish_step(run.id, step.id, &report).unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.commit_count, 2);
        assert_eq!(finished.write_count, 12);
        assert!(repository.finish_step(run.id, step.id, &report).is_err());

        repository.finish_job(run.id, RunStatus::Completed).unwrap();
        assert!(matches!(
            repository.finish_job(run.id, RunStatus::Failed),
            Err(BatchError::StateTransition(_))
        ));
        assert!(repository.start_step(run.id, "late").is_err());
    }

    #[test]
    fn test_abandon_running_steps() {
        let repository = JobRepository::new();
        let run = repository.start_job("job", &params(), true).unwrap();
        let label = PartitionLabel::new("p0");
        let done = repository
            .start_partition(run.id, "step", label.clone(), ExecutionContext::default())
            .unwrap();
        repository
            .start_partition(run.id, "step", PartitionLabel::new("p1"), ExecutionContext::default())
            .unwrap();

        let mut report = StepReport::new("step", Some(label));
        report.fail(StepFailure::at_chunk(0, BatchError::Internal("x".to_string())));
        repository.finish_step(run.id, done.id, &report).unwrap();

        let abandoned = repository.abandon_running_steps(run.id, "worker panicked").unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].partition, Some(PartitionLabel::new("p1")));
        assert_eq!(abandoned[0].failure.as_deref(), Some("worker panicked"));
        assert!(repository.abandon_running_steps(run.id, "again").unwrap().is_empty());
        let job = repository.get_job_run(run.id).unwrap();
        assert!(job.step_runs().all(|step| step.status == RunStatus::Failed));
    }
}
