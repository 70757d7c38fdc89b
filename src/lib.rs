#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batch Core
//!
//! Partitioned, chunk-oriented batch execution engine.
//!
//! ## Overview
//!
//! A job splits its workload into disjoint partitions, runs each partition's
//! read → process → write loop in fixed-size committed chunks, and executes partitions
//! concurrently up to a throttle limit. The paging reader keeps a gap-free cursor over a
//! record set that shrinks as chunks commit.
//!
//! ## Key Features
//!
//! - **Chunk atomicity**: a chunk is written as one unit; a failed chunk leaves no partial writes
//! - **Stable paging**: frozen-offset or snapshot-id-range cursors, never a drifting offset
//! - **Bounded concurrency**: shared worker pool plus a per-step throttle
//! - **Fault isolation**: a failing or panicking partition never cancels its siblings
//! - **Run audit**: job, partition and step runs finalized exactly once, restart prevention
//!
//! ## Module Organization
//!
//! - [`item`] - Reader, processor and writer contracts and stock implementations
//! - [`store`] - Record store contracts, in-memory store, PostgreSQL store
//! - [`orchestration`] - Chunk runner, partitioner, multi-threaded step, job orchestrator
//! - [`execution`] - Worker pool and cancellation
//! - [`repository`] - Job, partition and step run audit
//! - [`events`] - Lifecycle listeners
//! - [`state_machine`] - Run statuses and the chunk loop state machine
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`jobs`] - The inactive-user job
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batch_core::config::BatchConfig;
//! use batch_core::jobs::inactive_user_job;
//! use batch_core::models::JobParameters;
//! use batch_core::orchestration::JobOrchestrator;
//! use batch_core::store::InMemoryUserStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BatchConfig::default();
//! let store = Arc::new(InMemoryUserStore::new());
//!
//! let orchestrator = JobOrchestrator::new(config.clone())?;
//! let job = inactive_user_job(store, &config);
//! let result = orchestrator
//!     .run(&job, JobParameters::new().add_date("nowDate", chrono::Utc::now()))
//!     .await?;
//!
//! println!("{} finished as {}", result.job_name, result.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod item;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod repository;
pub mod state_machine;
pub mod store;

pub use config::{BatchConfig, ConfigManager, ExecutionMode, ReadStrategy};
pub use error::{BatchError, BatchResult, ListenerError, ReaderError, StartupError, WriterError};
pub use models::{Grade, JobParameters, User, UserQuery, UserStatus};
pub use orchestration::{JobDefinition, JobOrchestrator, JobResult, StepReport};
pub use state_machine::RunStatus;
