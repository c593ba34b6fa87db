//! Instrumentation wrapper: times calls and records qualifying results
//!
//! A call is recorded when instrumentation is enabled, the filter admits
//! its `module::function` name, and its wall time is at least the configured
//! threshold. The wrapped closure's return value (and any panic) passes
//! through untouched; a panicking call is not recorded.

use crate::config::Config;
use crate::error::CronistaError;
use crate::filter::{split_qualified, CallFilter};
use crate::inspect::FrameGuard;
use crate::render::{Render, ValueRenderer};
use crate::timing::{CapturedArgs, ResultStore, Stopwatch, TimingResult};
use std::panic::Location;
use std::time::Duration;

/// Arguments of one call, rendered only if they are kept
#[derive(Default)]
pub struct CallArgs<'a> {
    positional: Vec<&'a dyn Render>,
    keyword: Vec<(&'a str, &'a dyn Render)>,
}

impl<'a> CallArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Render>(mut self, value: &'a T) -> Self {
        self.positional.push(value);
        self
    }

    pub fn kwarg<T: Render>(mut self, name: &'a str, value: &'a T) -> Self {
        self.keyword.push((name, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Render every argument with `renderer`
    pub fn capture(&self, renderer: &ValueRenderer) -> CapturedArgs {
        CapturedArgs {
            args: self.positional.iter().map(|v| renderer.render(*v)).collect(),
            kwargs: self
                .keyword
                .iter()
                .map(|(k, v)| ((*k).to_string(), renderer.render(*v)))
                .collect(),
        }
    }
}

/// What happened to one measured call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Recorded,
    BelowThreshold,
    /// Store at capacity; the new result was dropped
    Dropped,
}

/// Timing half of the engine
#[derive(Debug)]
pub struct Instrumentation {
    enabled: bool,
    min_execution_time: Duration,
    track_arguments: bool,
    filter: CallFilter,
    renderer: ValueRenderer,
    store: ResultStore,
}

impl Instrumentation {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.enabled,
            min_execution_time: config.min_execution_time(),
            track_arguments: config.filters.track_arguments,
            filter: CallFilter::from_config(&config.filters),
            renderer: ValueRenderer::new(config.tracking.render.clone()),
            store: ResultStore::new(config.tracking.max_tracked_calls),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tracks_arguments(&self) -> bool {
        self.track_arguments
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn renderer(&self) -> &ValueRenderer {
        &self.renderer
    }

    /// Whether calls to `name` are timed at all
    pub fn should_instrument(&self, name: &str) -> bool {
        self.enabled && self.filter.should_track_qualified(name)
    }

    /// Time `f` as `name`
    #[track_caller]
    pub fn time_it<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        self.measure(name, None, Location::caller(), f)
    }

    /// Time `f` as `name`, keeping its arguments in the result
    ///
    /// Arguments are rendered before `f` runs, so they show the values the
    /// call started with.
    #[track_caller]
    pub fn time_it_with<R>(&self, name: &str, args: CallArgs<'_>, f: impl FnOnce() -> R) -> R {
        let captured = self
            .should_instrument(name)
            .then(|| args.capture(&self.renderer));
        self.measure(name, captured, Location::caller(), f)
    }

    pub(crate) fn measure<R>(
        &self,
        name: &str,
        captured: Option<CapturedArgs>,
        location: &Location<'_>,
        f: impl FnOnce() -> R,
    ) -> R {
        if !self.should_instrument(name) {
            return f();
        }

        let (module, function) = split_qualified(name);
        let _frame = FrameGuard::enter_at(module, function, self.renderer.clone(), location);

        let stopwatch = Stopwatch::start();
        let value = f();
        let (wall, cpu) = stopwatch.stop();

        self.record(name, wall, cpu, captured);
        value
    }

    /// Apply the threshold and capacity rules to one measurement
    pub fn record(
        &self,
        name: &str,
        wall: Duration,
        cpu: Duration,
        args: Option<CapturedArgs>,
    ) -> Outcome {
        if wall < self.min_execution_time {
            return Outcome::BelowThreshold;
        }
        match self.store.push(TimingResult::new(name, wall, cpu, args)) {
            Ok(()) => Outcome::Recorded,
            Err(CronistaError::TrackingLimitExceeded { capacity, .. }) => {
                let dropped = self.store.dropped();
                if dropped == 1 || dropped % 1000 == 0 {
                    tracing::warn!(
                        "result store full ({} calls), dropped {} call(s) so far",
                        capacity,
                        dropped
                    );
                }
                Outcome::Dropped
            }
            Err(e) => {
                tracing::warn!("could not record {}: {}", name, e);
                Outcome::Dropped
            }
        }
    }
}

/// Time a block as `module_path!()::name` on an engine
///
/// ```
/// use cronista::{timed, Config, Engine};
///
/// let mut config = Config::default();
/// config.output_on_exit = false;
/// config.tracking.min_execution_time = 0.0;
/// let engine = Engine::new(config);
///
/// let n = 10;
/// let total = timed!(engine, "sum_to", args = [n], { (1..=n).sum::<i32>() });
/// assert_eq!(total, 55);
/// assert_eq!(engine.results().len(), 1);
/// ```
#[macro_export]
macro_rules! timed {
    ($engine:expr, $name:literal, args = [$($arg:expr),* $(,)?], $body:block) => {
        $engine.time_it_with(
            concat!(module_path!(), "::", $name),
            $crate::instrument::CallArgs::new()$(.arg(&$arg))*,
            || $body,
        )
    };
    ($engine:expr, $name:literal, $body:block) => {
        $engine.time_it(concat!(module_path!(), "::", $name), || $body)
    };
}

/// Enter a diagnostic frame for the current function, binding locals
///
/// ```
/// let retries = 3;
/// let frame = cronista::frame!("connect", retries);
/// frame.local("host", "db.internal");
/// ```
#[macro_export]
macro_rules! frame {
    ($name:literal) => {
        $crate::inspect::FrameGuard::enter(module_path!(), $name)
    };
    ($name:literal, $($local:ident),+ $(,)?) => {{
        let guard = $crate::inspect::FrameGuard::enter(module_path!(), $name);
        $( guard.local(stringify!($local), &$local); )+
        guard
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::{ShadowStack, StackInspector};

    fn config(min: f64, cap: usize) -> Config {
        let mut config = Config::default();
        config.tracking.min_execution_time = min;
        config.tracking.max_tracked_calls = cap;
        config
    }

    #[test]
    fn test_returns_value_and_records() {
        let inst = Instrumentation::new(&config(0.0, 10));
        let value = inst.time_it("app::add", || 2 + 2);
        assert_eq!(value, 4);
        let results = inst.store().snapshot();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].function_name(), "app::add");
        assert!(results[0].wall_time() >= 0.0);
        assert!(!results[0].has_args());
    }

    #[test]
    fn test_threshold_boundary() {
        let inst = Instrumentation::new(&config(0.5, 10));
        let min = Duration::from_millis(500);
        assert_eq!(inst.record("f", min, Duration::ZERO, None), Outcome::Recorded);
        assert_eq!(
            inst.record("f", min - Duration::from_nanos(1), Duration::ZERO, None),
            Outcome::BelowThreshold
        );
        assert_eq!(inst.store().len(), 1);
    }

    #[test]
    fn test_fast_call_below_threshold_not_recorded() {
        let inst = Instrumentation::new(&config(10.0, 10));
        inst.time_it("app::quick", || ());
        assert!(inst.store().is_empty());
    }

    #[test]
    fn test_capacity_drops_newest() {
        let inst = Instrumentation::new(&config(0.0, 2));
        inst.time_it("app::first", || ());
        inst.time_it("app::second", || ());
        inst.time_it("app::third", || ());

        let names: Vec<_> = inst
            .store()
            .snapshot()
            .iter()
            .map(|r| r.function_name().to_string())
            .collect();
        assert_eq!(names, vec!["app::first", "app::second"]);
        assert_eq!(inst.store().dropped(), 1);
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let mut cfg = config(0.0, 10);
        cfg.enabled = false;
        let inst = Instrumentation::new(&cfg);
        assert_eq!(inst.time_it("app::f", || "same"), "same");
        assert!(inst.store().is_empty());
    }

    #[test]
    fn test_function_filter() {
        let mut cfg = config(0.0, 10);
        cfg.filters.include_functions = vec!["^calc_".to_string()];
        let inst = Instrumentation::new(&cfg);
        inst.time_it("app::calc_x", || ());
        inst.time_it("app::other_y", || ());

        let results = inst.store().snapshot();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].function_name(), "app::calc_x");
    }

    #[test]
    fn test_arguments_rendered() {
        let inst = Instrumentation::new(&config(0.0, 10));
        let n = 50_000u64;
        let label = "fast";
        inst.time_it_with("app::cpu_task", CallArgs::new().arg(&n).kwarg("mode", &label), || {
            (0..n).sum::<u64>()
        });

        let results = inst.store().snapshot();
        let args = results[0].args().unwrap();
        assert_eq!(args.args, vec!["50000"]);
        assert_eq!(args.kwargs["mode"], "\"fast\"");
    }

    #[test]
    fn test_wrapped_call_is_a_frame() {
        let inst = Instrumentation::new(&config(0.0, 10));
        let frames: Vec<_> = inst.time_it("app::outer", || ShadowStack.capture().collect());
        assert_eq!(frames[0].function, "outer");
        assert_eq!(frames[0].module, "app");
        assert_eq!(crate::inspect::active_depth(), 0);
    }

    #[test]
    fn test_panic_passes_through_unrecorded() {
        let inst = Instrumentation::new(&config(0.0, 10));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            inst.time_it("app::boom", || -> () { panic!("boom") })
        }));
        assert!(result.is_err());
        assert!(inst.store().is_empty());
        assert_eq!(crate::inspect::active_depth(), 0);
    }

    #[test]
    fn test_frame_macro_binds_locals() {
        let attempts = 2;
        let frame = crate::frame!("retrying", attempts);
        frame.local("host", "db");
        let snapshot: Vec<_> = ShadowStack.capture().collect();
        assert_eq!(snapshot[0].local("attempts"), Some("2"));
        assert_eq!(snapshot[0].local("host"), Some("\"db\""));
        drop(frame);
    }
}
