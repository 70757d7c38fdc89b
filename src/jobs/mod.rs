//! Concrete jobs built on the engine.

pub mod inactive_user;

pub use inactive_user::{
    cutoff_date, inactive_user_job, InactiveUserProcessor, InactiveUserStepFactory,
};
