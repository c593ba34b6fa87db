//! Process-wide panic hook for unhandled failures
//!
//! The hook is installed at most once per process. Engines register their
//! diagnostic capture as a weak handle; on a panic every live capture builds
//! and renders a report into its own registry, then the previously
//! installed hook runs unchanged so the default message and exit status are
//! preserved.
//!
//! Panic hooks run before unwinding starts, so a panic that is later caught
//! with `catch_unwind` (or by a joined thread's owner) is reported as well.
//! Such reports carry the neutral label [`PANIC_LABEL`](crate::diagnostic::PANIC_LABEL).

use crate::diagnostic::DiagnosticCapture;
use crate::render::is_rendering;
use std::cell::Cell;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, Weak};

static INSTALLED: AtomicBool = AtomicBool::new(false);

static TARGETS: LazyLock<Mutex<Vec<Weak<DiagnosticCapture>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Registration state of the process hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Unregistered,
    Registered,
}

pub fn state() -> HookState {
    if INSTALLED.load(Ordering::Acquire) {
        HookState::Registered
    } else {
        HookState::Unregistered
    }
}

/// Install the process hook if needed and register `capture` as a target
///
/// Registering the same capture twice is a no-op. Returns true when this call
/// added the target.
pub fn register(capture: &Arc<DiagnosticCapture>) -> bool {
    install_once();

    let mut targets = TARGETS.lock().unwrap_or_else(PoisonError::into_inner);
    targets.retain(|t| t.strong_count() > 0);
    if targets
        .iter()
        .any(|t| std::ptr::eq(t.as_ptr(), Arc::as_ptr(capture)))
    {
        return false;
    }
    targets.push(Arc::downgrade(capture));
    true
}

fn install_once() {
    if INSTALLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        // Panics raised while rendering a value are caught by the renderer
        if is_rendering() {
            return;
        }
        on_panic(info);
        previous(info);
    }));
    tracing::debug!("installed failure panic hook");
}

fn live_captures() -> Vec<Arc<DiagnosticCapture>> {
    TARGETS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter_map(Weak::upgrade)
        .collect()
}

fn on_panic(info: &PanicHookInfo<'_>) {
    let reentered = IN_HOOK.try_with(|flag| flag.replace(true)).unwrap_or(true);
    if reentered {
        return;
    }
    for capture in live_captures() {
        capture.report_panic(info);
    }
    let _ = IN_HOOK.try_with(|flag| flag.set(false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ValueRenderer;
    use crate::session::SessionId;

    fn capture() -> Arc<DiagnosticCapture> {
        let diag = DiagnosticCapture::new(SessionId::from("hook"), ValueRenderer::default(), 256);
        diag.set_sink(None);
        Arc::new(diag)
    }

    #[test]
    fn test_register_is_idempotent() {
        let diag = capture();
        assert!(register(&diag));
        assert!(!register(&diag));
        assert_eq!(state(), HookState::Registered);
    }

    #[test]
    fn test_panic_is_reported_and_still_propagates() {
        let diag = capture();
        register(&diag);

        let outcome = std::thread::spawn(|| panic!("worker exploded")).join();
        assert!(outcome.is_err());

        let reports = diag.registry().reports();
        let report = reports
            .iter()
            .find(|r| r.message.contains("worker exploded"))
            .expect("panic reported");
        assert_eq!(report.error_type, "panic");
        assert_eq!(report.label, crate::diagnostic::PANIC_LABEL);
    }

    #[test]
    fn test_dropped_capture_is_not_upgraded() {
        let diag = capture();
        register(&diag);
        let weak = Arc::downgrade(&diag);
        drop(diag);
        assert!(weak.upgrade().is_none());
    }
}
