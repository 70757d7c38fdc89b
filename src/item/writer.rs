use async_trait::async_trait;
use std::sync::Arc;

use crate::error::WriterError;
use crate::store::BatchSink;

/// Flushes one chunk.
///
/// `write` must be atomic: every item becomes durable or none does. A writer may be
/// dropped mid-call when a chunk times out, so implementations must not leave partial
/// state behind on cancellation either.
#[async_trait]
pub trait ItemWriter<T: Send + Sync + 'static>: Send + Sync {
    async fn write(&self, items: &[T]) -> Result<(), WriterError>;
}

/// Writer delegating each chunk to a store's batch write
#[derive(Debug)]
pub struct StoreItemWriter<S> {
    sink: Arc<S>,
}

impl<S> Clone for StoreItemWriter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S: BatchSink> StoreItemWriter<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> ItemWriter<<S as BatchSink>::Record> for StoreItemWriter<S>
where
    S: BatchSink + 'static,
{
    async fn write(&self, items: &[<S as BatchSink>::Record]) -> Result<(), WriterError> {
        if items.is_empty() {
            return Ok(());
        }
        self.sink.write_batch(items).await?;
        Ok(())
    }
}
