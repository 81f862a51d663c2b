//! Bounded-concurrency map over independent work items.
//!
//! Work runs on a dedicated rayon thread pool of `workers` OS threads. When
//! `max_tasks_per_worker` is set, the pool is torn down and rebuilt after every
//! generation of `workers * max_tasks_per_worker` items, so no worker thread
//! outlives that many tasks on average.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{IsmError, Result};
use crate::progress::{NoOpReporter, PipelineStage, ProgressReporter};

/// Why a single task produced no result.
#[derive(Debug)]
pub enum TaskFailure {
    Error(IsmError),
    Panicked(String),
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{e}"),
            Self::Panicked(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

/// A task paired with its outcome.
#[derive(Debug)]
pub struct TaskResult<T, R> {
    pub task: T,
    pub outcome: std::result::Result<R, TaskFailure>,
}

impl<T, R> TaskResult<T, R> {
    pub fn ok(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }
}

#[derive(Clone, Debug)]
pub struct TaskPool {
    workers: usize,
    max_tasks_per_worker: Option<usize>,
}

impl TaskPool {
    pub fn new(workers: usize, max_tasks_per_worker: Option<usize>) -> Self {
        Self {
            workers: workers.max(1),
            max_tasks_per_worker: max_tasks_per_worker.filter(|n| *n > 0),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.workers, config.max_tasks_per_worker)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn generation_size(&self, total: usize) -> usize {
        match self.max_tasks_per_worker {
            Some(cap) => self.workers.saturating_mul(cap).max(1),
            None => total.max(1),
        }
    }

    /// Run `f` over every task. Results come back in input order.
    pub fn map<T, R, F>(&self, tasks: Vec<T>, f: F) -> Vec<TaskResult<T, R>>
    where
        T: Send + Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync,
    {
        self.map_reported(tasks, f, &NoOpReporter, None)
    }

    /// Like [`TaskPool::map`], advancing `reporter` as items complete.
    pub fn map_reported<T, R, F>(
        &self,
        tasks: Vec<T>,
        f: F,
        reporter: &dyn ProgressReporter,
        stage: Option<PipelineStage>,
    ) -> Vec<TaskResult<T, R>>
    where
        T: Send + Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync,
    {
        let total = tasks.len();
        if let Some(stage) = stage {
            reporter.begin_stage(stage, Some(total));
        }

        let done = AtomicUsize::new(0);
        let run_one = |task: &T| {
            let outcome = match catch_unwind(AssertUnwindSafe(|| f(task))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskFailure::Error(e)),
                Err(payload) => Err(TaskFailure::Panicked(panic_message(payload.as_ref()))),
            };
            reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
            outcome
        };

        let generation = self.generation_size(total);
        let mut results = Vec::with_capacity(total);
        let mut remaining = tasks.into_iter().peekable();

        while remaining.peek().is_some() {
            let chunk: Vec<T> = remaining.by_ref().take(generation).collect();
            let outcomes: Vec<_> = match rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
            {
                Ok(pool) => {
                    debug!(
                        workers = self.workers,
                        items = chunk.len(),
                        "Starting worker generation"
                    );
                    pool.install(|| chunk.par_iter().map(&run_one).collect())
                }
                Err(e) => {
                    warn!(error = %e, "Could not start worker pool, running inline");
                    chunk.iter().map(&run_one).collect()
                }
            };
            results.extend(
                chunk
                    .into_iter()
                    .zip(outcomes)
                    .map(|(task, outcome)| TaskResult { task, outcome }),
            );
        }

        if stage.is_some() {
            reporter.finish_stage();
        }
        results
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
