//! # Item Contracts
//!
//! The three capabilities a chunk-oriented step is assembled from:
//!
//! - [`ItemReader`]: pulls the next item or reports end of stream
//! - [`ItemProcessor`]: pure transformation into an output item or [`ProcessOutcome::Skip`]
//! - [`ItemWriter`]: flushes a complete chunk atomically
//!
//! Plus the stock implementations the inactive-user job is built from.

pub mod processor;
pub mod reader;
pub mod retry;
pub mod writer;

pub use processor::{ItemProcessor, PassThroughProcessor, ProcessOutcome};
pub use reader::{ItemReader, ListItemReader, PagingItemReader, ReaderCursor};
pub use retry::{RetryPolicy, RetryingWriter};
pub use writer::{ItemWriter, StoreItemWriter};
