//! # Inactive User Job
//!
//! Marks active users whose last update is older than a cutoff as inactive.
//!
//! - cutoff = `nowDate` − `inactiveAfterMonths` (job parameter, falls back to configuration)
//! - one partition per [`Grade`], labelled `InactiveUserTask{i}` with context `{grade: …}`
//! - each partition pages through `status = ACTIVE AND updated_date < cutoff AND grade = …`
//!   and writes `INACTIVE` back in chunks
//! - with `retry.enabled`, each chunk write is retried with backoff before the step fails

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::config::{BatchConfig, StepConfig};
use crate::constants::{context, names, parameters};
use crate::error::StartupError;
use crate::item::{
    ItemProcessor, PagingItemReader, ProcessOutcome, RetryPolicy, RetryingWriter, StoreItemWriter,
};
use crate::models::{Grade, JobParameters, Partition, RequiredParametersValidator, User, UserQuery};
use crate::orchestration::{JobDefinition, StepComponents, StepFactory, ValuePartitioner};
use crate::store::{BatchSink, PagedSource};

/// Staleness cutoff: `now` minus `months` calendar months
pub fn cutoff_date(now: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, StartupError> {
    now.checked_sub_months(Months::new(months))
        .ok_or_else(|| StartupError::InvalidParameter {
            name: parameters::NOW_DATE.to_string(),
            reason: format!("{now} minus {months} months is out of range"),
        })
}

/// Flips stale active users to inactive, stamping `now` as the update time.
///
/// Users that no longer qualify (already inactive, or updated on or after the cutoff) are
/// skipped. That happens when a snapshot-id reader fetches a record someone else changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactiveUserProcessor {
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl InactiveUserProcessor {
    pub fn new(cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self { cutoff, now }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }
}

impl ItemProcessor<User, User> for InactiveUserProcessor {
    fn process(&self, user: User) -> ProcessOutcome<User> {
        if !user.is_active() || user.updated_date >= self.cutoff {
            return ProcessOutcome::Skip;
        }
        ProcessOutcome::Item(user.set_inactive(self.now))
    }
}

/// Builds a fresh paging reader, processor and store writer per partition
pub struct InactiveUserStepFactory<S> {
    store: Arc<S>,
    step: StepConfig,
    inactive_after_months: u32,
    /// Set when `retry.enabled`; the store writer is then wrapped in a [`RetryingWriter`]
    retry: Option<RetryPolicy>,
}

impl<S> std::fmt::Debug for InactiveUserStepFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InactiveUserStepFactory")
            .field("step", &self.step)
            .field("inactive_after_months", &self.inactive_after_months)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<S> InactiveUserStepFactory<S>
where
    S: PagedSource<Record = User, Query = UserQuery> + BatchSink<Record = User> + 'static,
{
    pub fn new(store: Arc<S>, config: &BatchConfig) -> Self {
        Self {
            store,
            step: config.step.clone(),
            inactive_after_months: config.inactive_user.inactive_after_months,
            retry: config
                .retry
                .enabled
                .then(|| RetryPolicy::from(&config.retry)),
        }
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    fn months(&self, params: &JobParameters) -> Result<u32, StartupError> {
        match params.get_long(parameters::INACTIVE_AFTER_MONTHS)? {
            None => Ok(self.inactive_after_months),
            Some(months) => u32::try_from(months)
                .ok()
                .filter(|months| *months > 0)
                .ok_or_else(|| StartupError::InvalidParameter {
                    name: parameters::INACTIVE_AFTER_MONTHS.to_string(),
                    reason: format!("expected a positive month count, got {months}"),
                }),
        }
    }

    fn query_for(
        cutoff: DateTime<Utc>,
        partition: Option<&Partition>,
    ) -> Result<UserQuery, StartupError> {
        let query = UserQuery::stale_active(cutoff);
        let Some(partition) = partition else {
            return Ok(query);
        };

        let grade = partition
            .require_str(context::GRADE)?
            .parse::<Grade>()
            .map_err(|reason| StartupError::InvalidParameter {
                name: context::GRADE.to_string(),
                reason,
            })?;
        Ok(query.with_grade(grade))
    }
}

#[async_trait]
impl<S> StepFactory for InactiveUserStepFactory<S>
where
    S: PagedSource<Record = User, Query = UserQuery> + BatchSink<Record = User> + 'static,
{
    type Input = User;
    type Output = User;

    async fn preflight(&self) -> Result<(), StartupError> {
        self.store
            .fetch_page(&UserQuery::stale_active(Utc::now()), 0, 1)
            .await
            .map(|_| ())
            .map_err(|error| StartupError::StoreUnavailable(error.to_string()))
    }

    fn create(
        &self,
        params: &JobParameters,
        partition: Option<&Partition>,
    ) -> Result<StepComponents<User, User>, StartupError> {
        let now = params.require_date(parameters::NOW_DATE)?;
        let cutoff = cutoff_date(now, self.months(params)?)?;
        let query = Self::query_for(cutoff, partition)?;

        debug!(
            partition = partition.map_or("<single step>", |p| p.label.as_str()),
            cutoff = %cutoff,
            grade = ?query.grade,
            strategy = ?self.step.read_strategy,
            "Creating inactive-user step components"
        );

        let reader = PagingItemReader::new(
            Arc::clone(&self.store),
            query,
            self.step.effective_page_size(),
            self.step.read_strategy,
        );
        let processor = InactiveUserProcessor::new(cutoff, now);
        let writer = StoreItemWriter::new(Arc::clone(&self.store));

        Ok(match &self.retry {
            Some(policy) => StepComponents::new(
                reader,
                processor,
                RetryingWriter::new(writer, policy.clone()),
            ),
            None => StepComponents::new(reader, processor, writer),
        })
    }
}

/// The partitioned inactive-user job over `store`
pub fn inactive_user_job<S>(
    store: Arc<S>,
    config: &BatchConfig,
) -> JobDefinition<InactiveUserStepFactory<S>>
where
    S: PagedSource<Record = User, Query = UserQuery> + BatchSink<Record = User> + 'static,
{
    JobDefinition::new(
        names::INACTIVE_USER_JOB,
        names::INACTIVE_USER_STEP,
        InactiveUserStepFactory::new(store, config),
    )
    .with_partitioner(ValuePartitioner::new(
        context::GRADE,
        names::PARTITION_LABEL_PREFIX,
        Grade::ALL.map(|grade| grade.as_str()),
    ))
    .with_validator(RequiredParametersValidator::new([parameters::NOW_DATE]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionContext, PartitionLabel, UserStatus};
    use crate::store::InMemoryUserStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_cutoff_uses_calendar_months() {
        let cutoff = cutoff_date(now(), 12).unwrap();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2023, 3, 31, 9, 0, 0).unwrap());

        // End-of-month clamps instead of overflowing into the next month.
        let cutoff = cutoff_date(now(), 1).unwrap();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_processor_flips_only_stale_active_users() {
        let cutoff = cutoff_date(now(), 12).unwrap();
        let processor = InactiveUserProcessor::new(cutoff, now());
        let stale = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();

        let user = User::new(1, "a@example.com", Grade::Vip, stale);
        let processed = processor.process(user).into_item().unwrap();
        assert_eq!(processed.status, UserStatus::Inactive);
        assert_eq!(processed.updated_date, now());

        let recent = User::new(2, "b@example.com", Grade::Vip, cutoff);
        assert!(processor.process(recent).is_skip());

        let inactive = User::new(3, "c@example.com", Grade::Gold, stale).set_inactive(stale);
        assert!(processor.process(inactive).is_skip());
    }

    #[test]
    fn test_factory_requires_now_date() {
        let config = BatchConfig::default();
        let factory = InactiveUserStepFactory::new(Arc::new(InMemoryUserStore::new()), &config);

        let error = factory.create(&JobParameters::new(), None).unwrap_err();
        assert_eq!(
            error,
            StartupError::MissingParameter {
                name: "nowDate".to_string()
            }
        );
    }

    #[test]
    fn test_factory_rejects_bad_overrides() {
        let config = BatchConfig::default();
        let factory = InactiveUserStepFactory::new(Arc::new(InMemoryUserStore::new()), &config);

        let params = JobParameters::new()
            .add_date("nowDate", now())
            .add_long("inactiveAfterMonths", -3);
        assert!(matches!(
            factory.create(&params, None),
            Err(StartupError::InvalidParameter { .. })
        ));

        let partition = Partition::new(
            PartitionLabel::new("InactiveUserTask9"),
            ExecutionContext::builder().put_string("grade", "BRONZE").build(),
        );
        let params = JobParameters::new().add_date("nowDate", now());
        assert!(matches!(
            factory.create(&params, Some(&partition)),
            Err(StartupError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_partition_restricts_query_to_grade() {
        let cutoff = cutoff_date(now(), 12).unwrap();
        let partition = Partition::new(
            PartitionLabel::new("InactiveUserTask1"),
            ExecutionContext::builder().put_string("grade", "GOLD").build(),
        );

        let query =
            InactiveUserStepFactory::<InMemoryUserStore>::query_for(cutoff, Some(&partition))
                .unwrap();
        assert_eq!(query.grade, Some(Grade::Gold));
        assert_eq!(query.updated_before, cutoff);

        let unpartitioned =
            InactiveUserStepFactory::<InMemoryUserStore>::query_for(cutoff, None).unwrap();
        assert_eq!(unpartitioned.grade, None);
    }

    #[test]
    fn test_job_definition_wiring() {
        let job = inactive_user_job(Arc::new(InMemoryUserStore::new()), &BatchConfig::default());
        assert_eq!(job.name, "inactiveUserJob");
        assert_eq!(job.step_name, "inactiveUserStep");
        assert!(job.is_partitioned());
        assert!(job.validate_parameters(&JobParameters::new()).is_err());
        assert!(job
            .validate_parameters(&JobParameters::new().add_date("nowDate", now()))
            .is_ok());
    }

    #[test]
    fn test_retry_wrapper_is_opt_in() {
        let store = Arc::new(InMemoryUserStore::new());
        let mut config = BatchConfig::default();
        assert!(InactiveUserStepFactory::new(Arc::clone(&store), &config)
            .retry_policy()
            .is_none());

        config.retry.enabled = true;
        config.retry.max_attempts = 5;
        let factory = InactiveUserStepFactory::new(store, &config);
        assert_eq!(factory.retry_policy().map(|policy| policy.max_attempts), Some(5));
    }
}
