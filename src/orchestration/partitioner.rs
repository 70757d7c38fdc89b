use std::collections::BTreeSet;
use tracing::debug;

use crate::models::{ExecutionContext, Partition, PartitionLabel};

/// Splits a job's workload into disjoint partitions.
///
/// Implementations must be deterministic and produce unique labels, and no two contexts
/// may select overlapping records. `grid_size` is a hint; the partition count follows the
/// domain's classification values. Partitions are dispatched in the returned order.
pub trait Partitioner: Send + Sync {
    fn partition(&self, grid_size: usize) -> Vec<(PartitionLabel, ExecutionContext)>;
}

/// One partition per distinct value of a classification key.
///
/// Labels are `{prefix}{index}` in value order; each context holds `{key: value}`.
#[derive(Debug, Clone)]
pub struct ValuePartitioner {
    key: String,
    label_prefix: String,
    values: Vec<String>,
}

impl ValuePartitioner {
    /// Duplicate values are dropped, keeping first occurrence order
    pub fn new<I, V>(key: impl Into<String>, label_prefix: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let values = values
            .into_iter()
            .map(Into::into)
            .filter(|value: &String| seen.insert(value.clone()))
            .collect();

        Self {
            key: key.into(),
            label_prefix: label_prefix.into(),
            values,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Partitions in dispatch order
    pub fn partitions(&self) -> Vec<Partition> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                Partition::new(
                    PartitionLabel::new(format!("{}{index}", self.label_prefix)),
                    ExecutionContext::builder()
                        .put_string(self.key.clone(), value.clone())
                        .build(),
                )
            })
            .collect()
    }
}

impl Partitioner for ValuePartitioner {
    fn partition(&self, grid_size: usize) -> Vec<(PartitionLabel, ExecutionContext)> {
        if grid_size != self.values.len() {
            debug!(
                grid_size,
                partitions = self.values.len(),
                key = %self.key,
                "Grid size is advisory; partitioning by classification values"
            );
        }

        self.partitions()
            .into_iter()
            .map(|partition| (partition.label, partition.context))
            .collect()
    }
}
