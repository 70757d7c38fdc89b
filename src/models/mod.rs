//! Data model: the records the inactive-user job processes, and the parameter bags that
//! scope a job run and each of its partitions.

pub mod execution_context;
pub mod job_parameters;
pub mod user;

pub use execution_context::{ExecutionContext, ExecutionContextBuilder, Partition, PartitionLabel};
pub use job_parameters::{
    JobParameter, JobParameters, JobParametersValidator, RequiredParametersValidator,
};
pub use user::{Grade, User, UserQuery, UserStatus};
