//! Timing records and the bounded in-memory result store
//!
//! The store keeps the *first* `capacity` qualifying calls: once full, new
//! results are dropped and counted, existing entries are never evicted.

use crate::error::{CronistaError, Result};
use nix::time::{clock_gettime, ClockId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Rendered arguments of one call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedArgs {
    pub args: Vec<String>,
    pub kwargs: BTreeMap<String, String>,
}

impl CapturedArgs {
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// One recorded measurement; immutable after construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingResult {
    function_name: String,
    wall_time: f64,
    cpu_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<CapturedArgs>,
    timestamp: f64,
}

impl TimingResult {
    /// Create a result stamped with the current time
    ///
    /// Negative or non-finite durations are clamped to zero.
    pub fn new(
        function_name: impl Into<String>,
        wall: Duration,
        cpu: Duration,
        args: Option<CapturedArgs>,
    ) -> Self {
        Self::with_timestamp(
            function_name,
            wall.as_secs_f64(),
            cpu.as_secs_f64(),
            args,
            crate::session::unix_timestamp(),
        )
    }

    pub fn with_timestamp(
        function_name: impl Into<String>,
        wall_time: f64,
        cpu_time: f64,
        args: Option<CapturedArgs>,
        timestamp: f64,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            wall_time: non_negative(wall_time),
            cpu_time: non_negative(cpu_time),
            args,
            timestamp,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Wall-clock seconds
    pub fn wall_time(&self) -> f64 {
        self.wall_time
    }

    /// Process CPU seconds
    pub fn cpu_time(&self) -> f64 {
        self.cpu_time
    }

    pub fn args(&self) -> Option<&CapturedArgs> {
        self.args.as_ref()
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// True if arguments were captured and at least one is present
    pub fn has_args(&self) -> bool {
        self.args.as_ref().is_some_and(|a| !a.is_empty())
    }
}

fn non_negative(secs: f64) -> f64 {
    if secs.is_finite() && secs > 0.0 {
        secs
    } else {
        0.0
    }
}

/// Insertion-ordered, capacity-bounded store of timing results
#[derive(Debug)]
pub struct ResultStore {
    results: Mutex<Vec<TimingResult>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TimingResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a result, or drop it if the store is full
    pub fn push(&self, result: TimingResult) -> Result<()> {
        let mut results = self.lock();
        if results.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(CronistaError::TrackingLimitExceeded {
                what: "result store",
                capacity: self.capacity,
            });
        }
        results.push(result);
        Ok(())
    }

    /// Copy of all results in insertion order
    pub fn snapshot(&self) -> Vec<TimingResult> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of calls dropped because the store was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.dropped.store(0, Ordering::Relaxed);
    }
}

/// Process CPU time consumed so far
pub fn process_cpu_time() -> Duration {
    match clock_gettime(ClockId::CLOCK_PROCESS_CPUTIME_ID) {
        Ok(ts) => Duration::new(ts.tv_sec().max(0) as u64, ts.tv_nsec().max(0) as u32),
        Err(e) => {
            tracing::debug!("process CPU clock unavailable: {}", e);
            Duration::ZERO
        }
    }
}

/// Brackets a call with wall-clock and CPU measurements
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    wall_start: Instant,
    cpu_start: Duration,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            cpu_start: process_cpu_time(),
            wall_start: Instant::now(),
        }
    }

    /// Elapsed (wall, cpu); both saturate at zero
    pub fn stop(&self) -> (Duration, Duration) {
        let wall = self.wall_start.elapsed();
        let cpu = process_cpu_time().saturating_sub(self.cpu_start);
        (wall, cpu)
    }
}
