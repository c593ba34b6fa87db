//! The engine: one explicit context object owning every subsystem
//!
//! ```
//! use cronista::{Config, Engine};
//!
//! let mut config = Config::default();
//! config.output_on_exit = false;
//! config.tracking.min_execution_time = 0.0;
//!
//! let engine = Engine::new(config);
//! let squares = engine.wrap("demo::square", |n: u64| n * n);
//! assert_eq!(squares(12), 144);
//! assert_eq!(engine.summary().call_count(), 1);
//! ```

use crate::aggregate::{aggregate, AggregateDocument, OverallSummary, Summary};
use crate::config::Config;
use crate::diagnostic::{DiagnosticCapture, ErrorInfo, FailureReport, FailureStats, ReportSink};
use crate::error::Result;
use crate::flush::{ExitFlush, FlushTarget};
use crate::hook;
use crate::inspect::FrameGuard;
use crate::instrument::{CallArgs, Instrumentation};
use crate::logging;
use crate::render::Render;
use crate::session::{RecordIds, SessionId};
use crate::storage::{select_backend, PersistedRecord, StorageBackend, TableClient};
use crate::timing::TimingResult;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: Config,
    table_client: Option<Box<dyn TableClient>>,
    sink: Option<Option<ReportSink>>,
    install_hook: bool,
}

impl EngineBuilder {
    /// Remote table used unless the config is local-only
    pub fn table_client(mut self, client: Box<dyn TableClient>) -> Self {
        self.table_client = Some(client);
        self
    }

    /// Where failure reports are written; `None` silences them
    pub fn report_sink(mut self, sink: Option<ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Skip installing the process panic hook
    pub fn without_panic_hook(mut self) -> Self {
        self.install_hook = false;
        self
    }

    pub fn build(self) -> Engine {
        let config = self.config.sanitized();
        if config.debug {
            logging::init_tracing(true);
        }

        let session = SessionId::generate();
        let instrumentation = Instrumentation::new(&config);
        let diagnostics = DiagnosticCapture::new(
            session.clone(),
            instrumentation.renderer().clone(),
            config.tracking.failure_registry_size,
        )
        .with_show_globals(config.tracking.exception_show_globals);
        if let Some(sink) = self.sink {
            diagnostics.set_sink(sink);
        }
        let selection = select_backend(&config, self.table_client);

        let inner = Arc::new(EngineInner {
            session,
            record_ids: RecordIds::new(),
            instrumentation,
            diagnostics: Arc::new(diagnostics),
            backend: selection.backend,
            fell_back: selection.fell_back,
            exit: ExitFlush::new(),
            hook_registered: AtomicBool::new(false),
            config,
        });
        let engine = Engine { inner };

        if engine.inner.config.enabled {
            if self.install_hook {
                engine.install_failure_hook();
            }
            if engine.inner.config.flush_on_exit() {
                let weak: Weak<EngineInner> = Arc::downgrade(&engine.inner);
                engine.inner.exit.register(weak);
            }
        }
        tracing::debug!(
            "engine started (session {}, storage {})",
            engine.inner.session,
            engine.inner.backend.name()
        );
        engine
    }
}

struct EngineInner {
    config: Config,
    session: SessionId,
    record_ids: RecordIds,
    instrumentation: Instrumentation,
    diagnostics: Arc<DiagnosticCapture>,
    backend: Box<dyn StorageBackend>,
    fell_back: bool,
    exit: ExitFlush,
    hook_registered: AtomicBool,
}

impl FlushTarget for EngineInner {
    fn flush_now(&self) -> Result<()> {
        let results = self.instrumentation.store().snapshot();
        if results.is_empty() {
            tracing::debug!("no timing data to persist");
            return Ok(());
        }
        let record = PersistedRecord::new(
            self.record_ids.next(),
            &self.session,
            aggregate(&results),
        );
        self.backend.persist(&record)?;
        tracing::info!(
            "persisted {} call(s) via {} storage",
            record.data.total_calls(),
            self.backend.name()
        );
        Ok(())
    }

    fn exit_flush(&self) -> &ExitFlush {
        &self.exit
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.exit.fire(&*self);
    }
}

/// Handle to an instrumentation engine; clones share state
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            table_client: None,
            sink: None,
            install_hook: true,
        }
    }

    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    /// Engine configured from discovered files and the environment
    pub fn from_env() -> Self {
        Self::new(Config::discover())
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    // Timing

    /// Time `f` under the qualified name `module::function`
    #[track_caller]
    pub fn time_it<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        self.inner
            .instrumentation
            .measure(name, None, Location::caller(), f)
    }

    /// Time `f`, keeping its rendered arguments
    #[track_caller]
    pub fn time_it_with<R>(&self, name: &str, args: CallArgs<'_>, f: impl FnOnce() -> R) -> R {
        self.inner.instrumentation.time_it_with(name, args, f)
    }

    /// Wrap a one-argument function so every call is timed
    ///
    /// The argument is kept when `filters.track_arguments` is set.
    #[track_caller]
    pub fn wrap<A, R, F>(&self, name: impl Into<String>, f: F) -> impl Fn(A) -> R
    where
        A: Render,
        F: Fn(A) -> R,
    {
        let engine = self.clone();
        let name = name.into();
        let location = Location::caller();
        move |arg: A| {
            let inst = &engine.inner.instrumentation;
            let captured = (inst.tracks_arguments() && inst.should_instrument(&name))
                .then(|| CallArgs::new().arg(&arg).capture(inst.renderer()));
            inst.measure(&name, captured, location, || f(arg))
        }
    }

    /// Copy of every recorded result, in call order
    pub fn results(&self) -> Vec<TimingResult> {
        self.inner.instrumentation.store().snapshot()
    }

    pub fn summary(&self) -> OverallSummary {
        self.aggregate().overall_summary
    }

    pub fn function_summary(&self, name: &str) -> Option<Summary> {
        let results = self.results();
        Summary::from_results(results.iter().filter(|r| r.function_name() == name))
    }

    pub fn aggregate(&self) -> AggregateDocument {
        aggregate(&self.results())
    }

    pub fn clear_results(&self) {
        self.inner.instrumentation.store().clear();
    }

    /// Calls dropped because the result store was full
    pub fn dropped_calls(&self) -> u64 {
        self.inner.instrumentation.store().dropped()
    }

    // Diagnostics

    /// Enter a diagnostic frame rendered with this engine's budgets
    #[track_caller]
    pub fn enter_frame(&self, module: &str, function: &str) -> FrameGuard {
        FrameGuard::enter_at(
            module,
            function,
            self.inner.diagnostics.renderer().clone(),
            Location::caller(),
        )
    }

    /// Make a module-level value visible in reports for frames of `module`
    pub fn register_global<F>(&self, module: &str, name: &str, render: F)
    where
        F: Fn(&crate::render::ValueRenderer) -> String + Send + Sync + 'static,
    {
        self.inner.diagnostics.globals().register(module, name, render);
    }

    pub fn register_static<T>(&self, module: &str, name: &str, value: &'static T)
    where
        T: Render + Sync + ?Sized,
    {
        self.inner
            .diagnostics
            .globals()
            .register_static(module, name, value);
    }

    /// Build, render and keep a report for `error`; never fails
    pub fn capture_failure(
        &self,
        label: &str,
        error: impl Into<ErrorInfo>,
        extra_context: &[(&str, &dyn Render)],
    ) -> Arc<FailureReport> {
        self.inner
            .diagnostics
            .capture_failure(label, error, extra_context)
    }

    /// Reports still held by the failure registry, oldest first
    pub fn failures(&self) -> Vec<Arc<FailureReport>> {
        self.inner.diagnostics.registry().reports()
    }

    pub fn failure_stats(&self) -> FailureStats {
        self.inner.diagnostics.registry().stats()
    }

    /// Plain-language explanation for an error type and message
    pub fn explain(&self, type_name: &str, message: &str) -> String {
        self.inner.diagnostics.classifier().explain(type_name, message)
    }

    pub fn set_report_sink(&self, sink: Option<ReportSink>) {
        self.inner.diagnostics.set_sink(sink);
    }

    /// Register with the process panic hook; idempotent per engine
    pub fn install_failure_hook(&self) -> bool {
        if self.inner.hook_registered.swap(true, Ordering::AcqRel) {
            return false;
        }
        hook::register(&self.inner.diagnostics)
    }

    pub fn failure_hook_installed(&self) -> bool {
        self.inner.hook_registered.load(Ordering::Acquire)
    }

    // Persistence

    /// Aggregate and persist now; failures are logged and reported as `false`
    pub fn flush(&self) -> bool {
        self.inner.exit.run(self.inner.as_ref())
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// True when remote storage was wanted but local is used instead
    pub fn storage_fell_back(&self) -> bool {
        self.inner.fell_back
    }

    pub fn exit_flush_registered(&self) -> bool {
        self.inner.exit.is_registered()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session", &self.inner.session)
            .field("enabled", &self.inner.config.enabled)
            .field("backend", &self.inner.backend.name())
            .field("results", &self.inner.instrumentation.store().len())
            .finish_non_exhaustive()
    }
}
