//! Exit-flush controller
//!
//! An engine registers once; its flush then fires exactly once at process
//! termination. Two paths can trigger it:
//!
//! - the `atexit` handler, for engines still alive when the process exits
//! - the engine's own drop, for engines owned by `main` (which are dropped
//!   before `atexit` handlers run)
//!
//! Whichever comes first wins. Manual flushes go through [`run_guarded`] and
//! may be repeated freely.

use crate::error::Result;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, Once, PoisonError, Weak};

static ATEXIT: Once = Once::new();

static EXIT_TARGETS: LazyLock<Mutex<Vec<Weak<dyn FlushTarget>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

/// Something that can aggregate and persist its results
pub trait FlushTarget: Send + Sync {
    fn flush_now(&self) -> Result<()>;

    fn exit_flush(&self) -> &ExitFlush;
}

/// Per-engine exit-flush state
#[derive(Debug, Default)]
pub struct ExitFlush {
    registered: AtomicBool,
    exit_fired: AtomicBool,
    runs: AtomicU64,
}

impl ExitFlush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` for the exit flush; only the first call has effect
    pub fn register(&self, target: Weak<dyn FlushTarget>) -> bool {
        if self.registered.swap(true, Ordering::AcqRel) {
            return false;
        }
        install_atexit();
        let mut targets = EXIT_TARGETS.lock().unwrap_or_else(PoisonError::into_inner);
        targets.retain(|t| t.strong_count() > 0);
        targets.push(target);
        true
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn has_fired(&self) -> bool {
        self.exit_fired.load(Ordering::Acquire)
    }

    /// Number of flushes run through this controller, manual or at exit
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Run the exit flush for `target` unless it already ran
    ///
    /// Returns `None` when not registered or already fired.
    pub fn fire(&self, target: &dyn FlushTarget) -> Option<bool> {
        if !self.is_registered() || self.exit_fired.swap(true, Ordering::AcqRel) {
            return None;
        }
        tracing::debug!("running exit flush");
        Some(self.run(target))
    }

    /// Run one flush, catching and logging every failure
    pub fn run(&self, target: &dyn FlushTarget) -> bool {
        self.runs.fetch_add(1, Ordering::Relaxed);
        run_guarded(target)
    }
}

/// Flush `target`, reporting success; errors and panics are logged only
pub fn run_guarded(target: &dyn FlushTarget) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| target.flush_now())) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!("flush failed: {}", e);
            false
        }
        Err(_) => {
            tracing::warn!("flush panicked; results were not persisted");
            false
        }
    }
}

fn install_atexit() {
    ATEXIT.call_once(|| {
        // SAFETY: `run_at_exit` is a plain `extern "C" fn()` that never unwinds
        let rc = unsafe { libc::atexit(run_at_exit) };
        if rc != 0 {
            tracing::warn!("could not register exit handler; call flush() manually");
        }
    });
}

extern "C" fn run_at_exit() {
    let _ = panic::catch_unwind(|| {
        let targets: Vec<_> = EXIT_TARGETS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for target in targets {
            target.exit_flush().fire(target.as_ref());
        }
    });
}
