//! Job and step lifecycle hooks.

pub mod listeners;

pub use listeners::{logging_listeners, JobHook, LifecycleListener, ListenerRegistry, StepHook};
