//! Executors that run dispatched work.

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs, on whatever thread it likes and in whatever order it likes.
///
/// The dispatcher never has more than one job outstanding, so an executor
/// needs no ordering guarantees of its own.
pub trait Executor: Send + Sync + 'static {
    /// Run `job`, now or later.
    ///
    /// A job that is dropped without running still releases its admission.
    fn execute(&self, job: Job);
}

/// Spawns a fresh OS thread per job.
#[derive(Debug, Clone, Default)]
pub struct ThreadExecutor {
    name: Option<String>,
}

impl ThreadExecutor {
    /// Create an executor with unnamed worker threads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the worker threads.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        let mut builder = std::thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Err(e) = builder.spawn(job) {
            tracing::error!(error = %e, "failed to spawn worker thread, job dropped");
        }
    }
}

/// Runs each job on the calling thread, which is the dispatch thread.
///
/// The dispatch loop cannot look ahead while a job runs inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

impl<E: Executor> Executor for std::sync::Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}
