//! Lifecycle listeners.
//!
//! Hooks are tagged callbacks held in registration order. They are advisory: a hook that
//! returns an error or panics is logged and skipped, and never changes the status of the
//! run it observes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ListenerError;
use crate::execution::worker_pool::panic_message;
use crate::repository::{JobRun, StepRun};

pub type JobHook = Arc<dyn Fn(&JobRun) -> Result<(), ListenerError> + Send + Sync>;
pub type StepHook = Arc<dyn Fn(&StepRun) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Clone)]
pub enum LifecycleListener {
    BeforeJob(JobHook),
    AfterJob(JobHook),
    BeforeStep(StepHook),
    AfterStep(StepHook),
}

impl LifecycleListener {
    pub fn before_job<F>(hook: F) -> Self
    where
        F: Fn(&JobRun) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self::BeforeJob(Arc::new(hook))
    }

    pub fn after_job<F>(hook: F) -> Self
    where
        F: Fn(&JobRun) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self::AfterJob(Arc::new(hook))
    }

    pub fn before_step<F>(hook: F) -> Self
    where
        F: Fn(&StepRun) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self::BeforeStep(Arc::new(hook))
    }

    pub fn after_step<F>(hook: F) -> Self
    where
        F: Fn(&StepRun) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self::AfterStep(Arc::new(hook))
    }

    pub fn hook_name(&self) -> &'static str {
        match self {
            Self::BeforeJob(_) => "before_job",
            Self::AfterJob(_) => "after_job",
            Self::BeforeStep(_) => "before_step",
            Self::AfterStep(_) => "after_step",
        }
    }
}

impl std::fmt::Debug for LifecycleListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LifecycleListener")
            .field(&self.hook_name())
            .finish()
    }
}

/// Ordered listener registry shared by a job's workers
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Vec<LifecycleListener>,
    faults: AtomicUsize,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the job and step logging hooks
    pub fn with_logging() -> Self {
        let mut registry = Self::new();
        for listener in logging_listeners() {
            registry.register(listener);
        }
        registry
    }

    pub fn register(&mut self, listener: LifecycleListener) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Hook invocations that failed or panicked so far
    pub fn fault_count(&self) -> usize {
        self.faults.load(Ordering::Acquire)
    }

    pub fn before_job(&self, run: &JobRun) {
        for listener in &self.listeners {
            if let LifecycleListener::BeforeJob(hook) = listener {
                self.invoke(listener.hook_name(), || hook(run));
            }
        }
    }

    pub fn after_job(&self, run: &JobRun) {
        for listener in &self.listeners {
            if let LifecycleListener::AfterJob(hook) = listener {
                self.invoke(listener.hook_name(), || hook(run));
            }
        }
    }

    pub fn before_step(&self, run: &StepRun) {
        for listener in &self.listeners {
            if let LifecycleListener::BeforeStep(hook) = listener {
                self.invoke(listener.hook_name(), || hook(run));
            }
        }
    }

    pub fn after_step(&self, run: &StepRun) {
        for listener in &self.listeners {
            if let LifecycleListener::AfterStep(hook) = listener {
                self.invoke(listener.hook_name(), || hook(run));
            }
        }
    }

    fn invoke<F>(&self, hook_name: &str, call: F)
    where
        F: FnOnce() -> Result<(), ListenerError>,
    {
        let fault = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };

        self.faults.fetch_add(1, Ordering::AcqRel);
        warn!(hook = hook_name, error = %fault, "Lifecycle listener fault ignored");
    }
}

/// Hooks that log job and step boundaries with their final status
pub fn logging_listeners() -> Vec<LifecycleListener> {
    vec![
        LifecycleListener::before_job(|run| {
            info!(job_name = %run.job_name, job_run_id = %run.id, "==> Job started");
            Ok(())
        }),
        LifecycleListener::after_job(|run| {
            info!(
                job_name = %run.job_name,
                job_run_id = %run.id,
                status = %run.status,
                "==> Job finished"
            );
            Ok(())
        }),
        LifecycleListener::before_step(|run| {
            info!(
                step_name = %run.step_name,
                partition = ?run.partition.as_ref().map(|label| label.as_str()),
                "==> Step started"
            );
            Ok(())
        }),
        LifecycleListener::after_step(|run| {
            info!(
                step_name = %run.step_name,
                partition = ?run.partition.as_ref().map(|label| label.as_str()),
                status = %run.status,
                write_count = run.write_count,
                commit_count = run.commit_count,
                "==> Step finished"
            );
            Ok(())
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobParameters;
    use crate::repository::JobRepository;
    use parking_lot::Mutex;

    fn job_run() -> JobRun {
        JobRepository::new()
            .start_job("job", &JobParameters::new(), true)
            .unwrap()
    }

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        for tag in ["first", "second"] {
            let calls = Arc::clone(&calls);
            registry.register(LifecycleListener::before_job(move |_| {
                calls.lock().push(tag);
                Ok(())
            }));
        }
        let after_calls = Arc::clone(&calls);
        registry.register(LifecycleListener::after_job(move |_| {
            after_calls.lock().push("after");
            Ok(())
        }));

        let run = job_run();
        registry.before_job(&run);
        assert_eq!(*calls.lock(), vec!["first", "second"]);
        registry.after_job(&run);
        assert_eq!(*calls.lock(), vec!["first", "second", "after"]);
    }

    #[test]
    fn test_faulty_hooks_are_contained() {
        let reached = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&reached);

        let mut registry = ListenerRegistry::new();
        registry.register(LifecycleListener::before_job(|_| {
            Err(ListenerError {
                hook: "before_job".to_string(),
                message: "metrics sink down".to_string(),
            })
        }));
        registry.register(LifecycleListener::before_job(|_| panic!("listener bug")));
        registry.register(LifecycleListener::before_job(move |_| {
            *flag.lock() = true;
            Ok(())
        }));

        registry.before_job(&job_run());
        assert!(*reached.lock());
        assert_eq!(registry.fault_count(), 2);
    }

    #[test]
    fn test_logging_listeners_cover_every_hook() {
        let registry = ListenerRegistry::with_logging();
        assert_eq!(registry.len(), 4);
        registry.before_job(&job_run());
        assert_eq!(registry.fault_count(), 0);
    }
}
