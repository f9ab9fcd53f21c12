//! Wall-clock timing records
//!
//! [`Timing`] accumulates named spans and merges with `+=`, so an
//! executor's spans can be folded into the orchestrator's own record.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::AddAssign;
use std::time::{Duration, Instant};

/// Accumulated time of one named span
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Total elapsed milliseconds
    pub elapsed_ms: f64,
    /// Number of completed measurements
    pub count: u32,
}

/// Named span timings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    spans: BTreeMap<String, Span>,
    #[serde(skip)]
    running: HashMap<String, Instant>,
}

impl Timing {
    /// Create an empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a span
    pub fn start(&mut self, name: &str) {
        self.running.insert(name.to_string(), Instant::now());
    }

    /// Stop a running span and add its duration
    ///
    /// Returns `None` if the span was never started.
    pub fn stop(&mut self, name: &str) -> Option<Duration> {
        let started = self.running.remove(name)?;
        let elapsed = started.elapsed();
        self.add(name, elapsed);
        Some(elapsed)
    }

    /// Add an externally measured duration
    pub fn add(&mut self, name: &str, elapsed: Duration) {
        let span = self.spans.entry(name.to_string()).or_default();
        span.elapsed_ms += elapsed.as_secs_f64() * 1000.0;
        span.count += 1;
    }

    /// Total milliseconds recorded under `name`
    #[inline]
    #[must_use]
    pub fn elapsed_ms(&self, name: &str) -> Option<f64> {
        self.spans.get(name).map(|s| s.elapsed_ms)
    }

    /// All completed spans
    #[inline]
    #[must_use]
    pub fn spans(&self) -> &BTreeMap<String, Span> {
        &self.spans
    }
}

impl AddAssign<&Timing> for Timing {
    fn add_assign(&mut self, other: &Timing) {
        for (name, span) in &other.spans {
            let mine = self.spans.entry(name.clone()).or_default();
            mine.elapsed_ms += span.elapsed_ms;
            mine.count += span.count;
        }
    }
}

/// Timing of one task within a `map` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTiming {
    /// Task name
    pub name: String,
    /// Worker index that evaluated the task
    pub worker: usize,
    /// Evaluation time in milliseconds
    pub elapsed_ms: f64,
    /// Whether the task exceeded the executor's budget
    pub timed_out: bool,
}

/// Summary of the most recent `map` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorReport {
    /// Worker count
    pub workers: usize,
    /// Tasks dispatched
    pub tasks: usize,
    /// Wall-clock milliseconds of the whole call
    pub wall_ms: f64,
    /// Sum of per-task milliseconds
    pub busy_ms: f64,
    /// Tasks that exceeded the budget
    pub timed_out: usize,
}

impl ExecutorReport {
    /// Build from per-task timings and the wall-clock duration
    #[must_use]
    pub fn from_timings(workers: usize, wall: Duration, timings: &[TaskTiming]) -> Self {
        Self {
            workers,
            tasks: timings.len(),
            wall_ms: wall.as_secs_f64() * 1000.0,
            busy_ms: timings.iter().map(|t| t.elapsed_ms).sum(),
            timed_out: timings.iter().filter(|t| t.timed_out).count(),
        }
    }

    /// Fraction of available worker time spent evaluating tasks
    #[must_use]
    pub fn efficiency(&self) -> f64 {
        let capacity = self.wall_ms * self.workers as f64;
        if capacity > 0.0 {
            (self.busy_ms / capacity).min(1.0)
        } else {
            f64::NAN
        }
    }
}
