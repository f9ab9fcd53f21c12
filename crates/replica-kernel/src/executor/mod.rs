//! Execution Phase
//!
//! An [`Executor`] maps an ordered batch of planted tasks to an ordered
//! batch of outcomes. Implementations may evaluate tasks concurrently, but
//! the output is always positionally aligned with the input.
//!
//! # Fault containment
//!
//! Every task is evaluated behind [`evaluate_task`], which turns model
//! errors, panics and timeouts into a NaN value with a failed [`Info`].
//! Nothing a single task does can abort the batch.

use crate::error::{ExecutorError, TaskError};
use crate::likelihood::Likelihood;
use crate::task::Task;
use crate::timing::{ExecutorReport, TaskTiming};
use crate::types::{Info, Parameters};
use rayon::prelude::*;
use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Result of evaluating one task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// Likelihood value, NaN on failure
    pub value: f64,
    /// Diagnostics
    pub info: Info,
    /// Per-task timing
    pub timing: TaskTiming,
}

/// Scheduling model for a batch of tasks
pub trait Executor: Send + Debug {
    /// Number of workers
    fn workers(&self) -> usize;

    /// Evaluate every task and return outcomes in input order
    fn map(
        &mut self,
        tasks: &mut [Task],
        likelihood: &dyn Likelihood,
        parameters: &Parameters,
    ) -> Vec<TaskOutcome>;

    /// Statistics of the most recent `map` call
    fn report(&self) -> ExecutorReport;
}

/// Evaluate one task, containing every failure
///
/// The task is exited afterwards and its result recorded. With a `timeout`,
/// an evaluation that overruns has its value discarded.
pub fn evaluate_task(
    task: &mut Task,
    likelihood: &dyn Likelihood,
    parameters: &Parameters,
    worker: usize,
    timeout: Option<Duration>,
) -> TaskOutcome {
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| likelihood.evaluate(task, parameters)));
    let elapsed = started.elapsed();

    let result = match result {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    };
    let result = match (result, timeout) {
        (Ok(_), Some(limit)) if elapsed > limit => Err(TaskError::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
            limit_ms: limit.as_millis() as u64,
        }),
        (result, _) => result,
    };

    let timed_out = matches!(result, Err(TaskError::Timeout { .. }));
    let (value, info) = match result {
        Ok(estimate) if estimate.value.is_nan() => {
            tracing::warn!("Task {} produced NaN", task.name());
            let mut info = estimate.info;
            info.successful = false;
            (f64::NAN, info)
        }
        Ok(estimate) => (estimate.value, estimate.info),
        Err(e) => {
            if e.degrades_to_nan() {
                tracing::warn!("Task {} failed: {}", task.name(), e);
            } else {
                tracing::error!("Task {} failed outside the model: {}", task.name(), e);
            }
            task.fail();
            (f64::NAN, Info::failure(&e))
        }
    };

    task.record(value, info.clone());
    task.exit();

    TaskOutcome {
        value,
        info,
        timing: TaskTiming {
            name: task.name().to_string(),
            worker,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            timed_out,
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Evaluates tasks one after another on the caller's thread
#[derive(Debug, Default)]
pub struct SerialExecutor {
    last: ExecutorReport,
}

impl SerialExecutor {
    /// Create a serial executor
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Executor for SerialExecutor {
    fn workers(&self) -> usize {
        1
    }

    fn map(
        &mut self,
        tasks: &mut [Task],
        likelihood: &dyn Likelihood,
        parameters: &Parameters,
    ) -> Vec<TaskOutcome> {
        let started = Instant::now();
        let outcomes: Vec<TaskOutcome> = tasks
            .iter_mut()
            .map(|task| evaluate_task(task, likelihood, parameters, 0, None))
            .collect();
        let timings: Vec<TaskTiming> = outcomes.iter().map(|o| o.timing.clone()).collect();
        self.last = ExecutorReport::from_timings(1, started.elapsed(), &timings);
        outcomes
    }

    fn report(&self) -> ExecutorReport {
        self.last.clone()
    }
}

/// Evaluates tasks concurrently on a dedicated rayon pool
///
/// Outcomes are collected through an indexed parallel iterator, so their
/// order follows the input regardless of completion order.
#[derive(Debug)]
pub struct PoolExecutor {
    pool: rayon::ThreadPool,
    workers: usize,
    timeout: Option<Duration>,
    last: ExecutorReport,
}

impl PoolExecutor {
    /// Create a pool with `workers` threads (at least one)
    ///
    /// # Errors
    /// [`ExecutorError::Pool`] if the threads cannot be spawned.
    pub fn new(workers: usize) -> Result<Self, ExecutorError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("replica-worker-{i}"))
            .build()?;
        tracing::debug!("Started executor pool with {} workers", workers);
        Ok(Self {
            pool,
            workers,
            timeout: None,
            last: ExecutorReport::default(),
        })
    }

    /// Discard results of tasks that run longer than `timeout`
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-task soft timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Executor for PoolExecutor {
    fn workers(&self) -> usize {
        self.workers
    }

    fn map(
        &mut self,
        tasks: &mut [Task],
        likelihood: &dyn Likelihood,
        parameters: &Parameters,
    ) -> Vec<TaskOutcome> {
        let started = Instant::now();
        let timeout = self.timeout;
        let outcomes: Vec<TaskOutcome> = self.pool.install(|| {
            tasks
                .par_iter_mut()
                .map(|task| {
                    let worker = rayon::current_thread_index().unwrap_or(0);
                    evaluate_task(task, likelihood, parameters, worker, timeout)
                })
                .collect()
        });
        let timings: Vec<TaskTiming> = outcomes.iter().map(|o| o.timing.clone()).collect();
        self.last = ExecutorReport::from_timings(self.workers, started.elapsed(), &timings);
        tracing::debug!(
            "Executor pool evaluated {} tasks in {:.1}ms",
            self.last.tasks,
            self.last.wall_ms
        );
        outcomes
    }

    fn report(&self) -> ExecutorReport {
        self.last.clone()
    }
}

/// Serial executor for one worker, pool executor otherwise
///
/// # Errors
/// [`ExecutorError::Pool`] if the pool cannot be created.
pub fn for_workers(
    workers: usize,
    timeout: Option<Duration>,
) -> Result<Box<dyn Executor>, ExecutorError> {
    if workers <= 1 && timeout.is_none() {
        Ok(Box::new(SerialExecutor::new()))
    } else {
        Ok(Box::new(PoolExecutor::new(workers)?.with_timeout(timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn factory_picks_by_workers() {
        assert_eq!(for_workers(1, None).unwrap().workers(), 1);
        assert_eq!(for_workers(3, None).unwrap().workers(), 3);
        assert_eq!(for_workers(0, None).unwrap().workers(), 1);
    }
}
