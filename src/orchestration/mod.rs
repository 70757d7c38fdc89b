//! # Orchestration Engine
//!
//! Chunk-oriented step execution and the job-level coordination around it.
//!
//! ## Core Components
//!
//! - **ChunkRunner**: sequential read → process → write loop of one step execution
//! - **MultiThreadedStep**: one unpartitioned step whose chunks run on concurrent workers
//! - **Partitioner**: splits the workload into disjoint, labelled execution contexts
//! - **StepFactory** / **JobDefinition**: how a job builds fresh components per partition
//! - **JobOrchestrator**: startup checks, dispatch on the worker pool, run audit and
//!   lifecycle hooks

pub mod chunk_runner;
pub mod job_orchestrator;
pub mod multi_threaded_step;
pub mod partitioner;
pub mod step_factory;
pub mod types;

pub use chunk_runner::{ChunkRunner, ChunkSettings};
pub use job_orchestrator::JobOrchestrator;
pub use multi_threaded_step::MultiThreadedStep;
pub use partitioner::{Partitioner, ValuePartitioner};
pub use step_factory::{JobDefinition, StepFactory};
pub use types::{JobResult, StepComponents, StepFailure, StepReport};
