use async_trait::async_trait;
use std::sync::Arc;

use super::partitioner::Partitioner;
use super::types::StepComponents;
use crate::error::StartupError;
use crate::models::{JobParameters, JobParametersValidator, Partition};

/// Builds the reader, processor and writer of a step.
///
/// `create` is called once per partition (or once for an unpartitioned step) before any
/// work is dispatched, so every execution gets its own reader cursor. An error from
/// `preflight` or `create` aborts the job before it starts.
#[async_trait]
pub trait StepFactory: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + Sync + 'static;

    /// Verify external collaborators (e.g. the record store) are reachable
    async fn preflight(&self) -> Result<(), StartupError> {
        Ok(())
    }

    fn create(
        &self,
        parameters: &JobParameters,
        partition: Option<&Partition>,
    ) -> Result<StepComponents<Self::Input, Self::Output>, StartupError>;
}

/// A runnable job: its names, the step factory, and the optional partitioner.
///
/// Scheduling tunables (chunk size, throttle, mode) come from the orchestrator's
/// configuration.
pub struct JobDefinition<F: StepFactory> {
    pub name: String,
    pub step_name: String,
    pub factory: Arc<F>,
    pub partitioner: Option<Arc<dyn Partitioner>>,
    pub validators: Vec<Arc<dyn JobParametersValidator>>,
}

impl<F: StepFactory> JobDefinition<F> {
    pub fn new(name: impl Into<String>, step_name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            step_name: step_name.into(),
            factory: Arc::new(factory),
            partitioner: None,
            validators: Vec::new(),
        }
    }

    pub fn with_partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Some(Arc::new(partitioner));
        self
    }

    pub fn with_validator(mut self, validator: impl JobParametersValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioner.is_some()
    }

    pub fn validate_parameters(&self, parameters: &JobParameters) -> Result<(), StartupError> {
        self.validators
            .iter()
            .try_for_each(|validator| validator.validate(parameters))
    }
}

impl<F: StepFactory> std::fmt::Debug for JobDefinition<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("step_name", &self.step_name)
            .field("partitioned", &self.is_partitioned())
            .field("validators", &self.validators.len())
            .finish()
    }
}
