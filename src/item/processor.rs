/// Result of processing one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome<O> {
    /// Add the transformed item to the pending chunk
    Item(O),
    /// Exclude the item from the chunk without failing it
    Skip,
}

impl<O> ProcessOutcome<O> {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    pub fn into_item(self) -> Option<O> {
        match self {
            Self::Item(item) => Some(item),
            Self::Skip => None,
        }
    }
}

/// Pure item transformation.
///
/// Implementations perform no I/O and keep no mutable state between calls; one instance is
/// shared by every worker of a step.
pub trait ItemProcessor<I, O>: Send + Sync {
    fn process(&self, item: I) -> ProcessOutcome<O>;
}

/// Hands every item through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughProcessor;

impl<T> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: T) -> ProcessOutcome<T> {
        ProcessOutcome::Item(item)
    }
}
