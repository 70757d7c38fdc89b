//! Shared names and default tunables.

/// Job parameter keys
pub mod parameters {
    /// Reference timestamp used to compute the staleness cutoff
    pub const NOW_DATE: &str = "nowDate";
    /// Optional override of the configured inactivity threshold
    pub const INACTIVE_AFTER_MONTHS: &str = "inactiveAfterMonths";
}

/// Execution context keys
pub mod context {
    /// Classification value a partition is restricted to
    pub const GRADE: &str = "grade";
}

/// Job and step names used by the inactive-user job
pub mod names {
    pub const INACTIVE_USER_JOB: &str = "inactiveUserJob";
    pub const INACTIVE_USER_STEP: &str = "inactiveUserStep";
    pub const PARTITIONER_STEP: &str = "partitionerStep";
    pub const PARTITION_LABEL_PREFIX: &str = "InactiveUserTask";
}

/// Default tunables
pub mod defaults {
    pub const CHUNK_SIZE: usize = 15;
    pub const THROTTLE_LIMIT: usize = 2;
    pub const POOL_SIZE: usize = 4;
    pub const GRID_SIZE: usize = 5;
    pub const INACTIVE_AFTER_MONTHS: u32 = 12;
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 100;
    pub const RETRY_MAX_DELAY_MS: u64 = 5_000;
    pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const DATABASE_MAX_CONNECTIONS: u32 = 10;
}
