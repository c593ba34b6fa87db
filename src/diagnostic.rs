//! Failure diagnostics: reports, the bounded registry and report rendering
//!
//! [`DiagnosticCapture`] combines the stack inspector, the error classifier
//! and the value renderer into a [`FailureReport`]. Reports are written to a
//! sink (stderr by default) and kept in a [`FailureRegistry`] that evicts its
//! oldest entry once full.
//!
//! Capturing never fails and never changes the caller's control flow.

use crate::classify::{ErrorCategory, ErrorClassifier};
use crate::inspect::{
    attach_globals, FrameSnapshot, GlobalRegistry, ShadowStack, StackInspector, Traced, Variable,
};
use crate::render::{Render, ValueRenderer};
use crate::session::{unix_timestamp, SessionId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of summaries returned in [`FailureStats::recent_failures`]
pub const RECENT_FAILURES: usize = 10;

/// Type name used for panics observed by the hook
pub const PANIC_TYPE_NAME: &str = "panic";

/// Label of reports filed by the panic hook
pub const PANIC_LABEL: &str = "Panic";

/// The observed error, reduced to what diagnostics need
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub type_name: String,
    pub message: String,
    frames: Option<Vec<FrameSnapshot>>,
}

impl ErrorInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            frames: None,
        }
    }

    /// Describe any error; frames are taken at capture time
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        Self::new(short_type_name(std::any::type_name::<E>()), error.to_string())
    }

    /// Describe a panic from its payload
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self::new(PANIC_TYPE_NAME, message)
    }

    /// Use these frames instead of inspecting the stack at capture time
    pub fn with_frames(mut self, frames: Vec<FrameSnapshot>) -> Self {
        self.frames = Some(frames);
        self
    }
}

impl<E: std::error::Error> From<&E> for ErrorInfo {
    fn from(error: &E) -> Self {
        ErrorInfo::from_error(error)
    }
}

impl<E: std::error::Error> From<&Traced<E>> for ErrorInfo {
    fn from(traced: &Traced<E>) -> Self {
        ErrorInfo::from_error(traced.inner()).with_frames(traced.frames().to_vec())
    }
}

/// `core::num::error::ParseIntError` -> `ParseIntError`
pub fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).trim().to_string()
}

/// Structured diagnostic record for one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub id: String,
    pub session_id: String,
    pub label: String,
    pub error_type: String,
    pub message: String,
    pub category: ErrorCategory,
    pub explanation: String,
    /// Innermost first
    pub frames: Vec<FrameSnapshot>,
    pub extra_context: Vec<Variable>,
    pub timestamp: f64,
}

impl FailureReport {
    /// Multi-line human-readable rendering
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "═".repeat(72);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "FAILURE: {}  [id {}]", self.label, self.id);
        let _ = writeln!(out, "Session: {}", self.session_id);
        let _ = writeln!(out, "What happened: {}", self.explanation);
        let _ = writeln!(
            out,
            "Error: {}: {}  ({})",
            self.error_type, self.message, self.category
        );

        if !self.frames.is_empty() {
            let _ = writeln!(out, "Stack (innermost first):");
            for (i, frame) in self.frames.iter().enumerate() {
                match &frame.location {
                    Some(loc) => {
                        let _ = writeln!(out, "  #{i} {} at {loc}", frame.qualified_name());
                    }
                    None => {
                        let _ = writeln!(out, "  #{i} {}", frame.qualified_name());
                    }
                }
                write_variables(&mut out, "locals", &frame.locals);
                if let Some(globals) = &frame.globals {
                    write_variables(&mut out, "globals", globals);
                }
            }
        }

        if !self.extra_context.is_empty() {
            let _ = writeln!(out, "Context:");
            for var in &self.extra_context {
                let _ = writeln!(out, "  {} = {}", var.name, var.value);
            }
        }
        let _ = writeln!(out, "{rule}");
        out
    }

    pub fn summary(&self) -> FailureSummary {
        FailureSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            error_type: self.error_type.clone(),
            explanation: self.explanation.clone(),
            timestamp: self.timestamp,
        }
    }
}

fn write_variables(out: &mut String, heading: &str, vars: &[Variable]) {
    if vars.is_empty() {
        return;
    }
    let _ = writeln!(out, "       {heading}:");
    for var in vars {
        let _ = writeln!(out, "         {} = {}", var.name, var.value);
    }
}

/// Short form of a report used in statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub id: String,
    pub label: String,
    pub error_type: String,
    pub explanation: String,
    pub timestamp: f64,
}

/// Counters over captured failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureStats {
    /// Every capture since start, including evicted reports
    pub total_failures: u64,
    /// Newest last
    pub recent_failures: Vec<FailureSummary>,
}

/// Ring buffer of reports; the oldest is evicted to admit the newest
#[derive(Debug)]
pub struct FailureRegistry {
    reports: Mutex<VecDeque<Arc<FailureReport>>>,
    capacity: usize,
    total: AtomicU64,
}

impl FailureRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            reports: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<FailureReport>>> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, report: Arc<FailureReport>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut reports = self.lock();
        while reports.len() >= self.capacity {
            if let Some(evicted) = reports.pop_front() {
                tracing::warn!(
                    "failure registry full ({}), evicting report {}",
                    self.capacity,
                    evicted.id
                );
            }
        }
        reports.push_back(report);
    }

    /// All retained reports, oldest first
    pub fn reports(&self) -> Vec<Arc<FailureReport>> {
        self.lock().iter().cloned().collect()
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

    pub fn stats(&self) -> FailureStats {
        let reports = self.lock();
        let skip = reports.len().saturating_sub(RECENT_FAILURES);
        FailureStats {
            total_failures: self.total.load(Ordering::Relaxed),
            recent_failures: reports.iter().skip(skip).map(|r| r.summary()).collect(),
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Destination for rendered reports
pub type ReportSink = Box<dyn Write + Send>;

/// Builds, renders and retains failure reports
pub struct DiagnosticCapture {
    session: SessionId,
    classifier: ErrorClassifier,
    inspector: Box<dyn StackInspector>,
    globals: GlobalRegistry,
    renderer: ValueRenderer,
    registry: FailureRegistry,
    show_globals: bool,
    sink: Mutex<Option<ReportSink>>,
}

impl DiagnosticCapture {
    pub fn new(session: SessionId, renderer: ValueRenderer, registry_size: usize) -> Self {
        Self {
            session,
            classifier: ErrorClassifier::default(),
            inspector: Box::new(ShadowStack),
            globals: GlobalRegistry::new(),
            renderer,
            registry: FailureRegistry::new(registry_size),
            show_globals: true,
            sink: Mutex::new(Some(Box::new(std::io::stderr()))),
        }
    }

    pub fn with_show_globals(mut self, show: bool) -> Self {
        self.show_globals = show;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_inspector(mut self, inspector: Box<dyn StackInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Replace the report sink; `None` keeps reports silent
    pub fn set_sink(&self, sink: Option<ReportSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    pub fn globals(&self) -> &GlobalRegistry {
        &self.globals
    }

    pub fn registry(&self) -> &FailureRegistry {
        &self.registry
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn renderer(&self) -> &ValueRenderer {
        &self.renderer
    }

    /// Build a report without rendering or retaining it
    pub fn build_report(
        &self,
        label: &str,
        error: ErrorInfo,
        extra_context: &[(&str, &dyn Render)],
    ) -> FailureReport {
        let classification = self.classifier.classify(&error.type_name, &error.message);

        let mut frames = match error.frames {
            Some(frames) => frames,
            None => self.inspector.capture().collect(),
        };
        if self.show_globals {
            attach_globals(&mut frames, &self.globals, &self.renderer);
        } else {
            for frame in &mut frames {
                frame.globals = None;
            }
        }

        let extra_context = extra_context
            .iter()
            .map(|(name, value)| Variable {
                name: (*name).to_string(),
                value: self.renderer.render(*value),
            })
            .collect();

        FailureReport {
            id: report_id(),
            session_id: self.session.to_string(),
            label: label.to_string(),
            error_type: error.type_name,
            message: error.message,
            category: classification.category,
            explanation: classification.explanation,
            frames,
            extra_context,
            timestamp: unix_timestamp(),
        }
    }

    /// Build, render and retain a report for `error`
    pub fn capture_failure(
        &self,
        label: &str,
        error: impl Into<ErrorInfo>,
        extra_context: &[(&str, &dyn Render)],
    ) -> Arc<FailureReport> {
        let report = Arc::new(self.build_report(label, error.into(), extra_context));
        self.emit(&report);
        self.registry.push(Arc::clone(&report));
        report
    }

    /// Report a panic observed by the process hook
    ///
    /// Labelled [`PANIC_LABEL`]; the hook cannot tell whether the panic will
    /// later be caught.
    pub fn report_panic(&self, info: &PanicHookInfo<'_>) -> Arc<FailureReport> {
        let mut error = ErrorInfo::from_panic_payload(info.payload());
        if let Some(location) = info.location() {
            error.message = format!(
                "{} (at {}:{})",
                error.message,
                location.file(),
                location.line()
            );
        }
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");
        self.capture_failure(PANIC_LABEL, error, &[("thread", &thread_name)])
    }

    fn emit(&self, report: &FailureReport) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink
                .write_all(report.render_text().as_bytes())
                .and_then(|()| sink.flush())
            {
                tracing::debug!("could not write failure report: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for DiagnosticCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticCapture")
            .field("session", &self.session)
            .field("show_globals", &self.show_globals)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn report_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}
