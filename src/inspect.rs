//! Stack inspection for failure diagnostics
//!
//! Rust offers no reflective access to a frame's local variables, so the
//! inspector works from a per-thread *shadow stack*: instrumented functions
//! enter a [`FrameGuard`] and bind the locals they want reported. Values are
//! rendered when bound, so a snapshot shows each local as of its last binding.
//!
//! When a thread has no instrumented frames, [`ShadowStack`] falls back to the
//! native call stack via the `backtrace` crate (names and locations only).
//!
//! Module-level variables ("globals") are registered once in a
//! [`GlobalRegistry`] and rendered at capture time for every frame whose
//! module matches.
//!
//! Names starting with [`RESERVED_PREFIX`] never appear in a snapshot.

use crate::render::{Render, ValueRenderer};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::{PoisonError, RwLock};

/// Variables whose name starts with this prefix are internal
pub const RESERVED_PREFIX: &str = "__";

/// Maximum native frames walked by the fallback inspector
const MAX_NATIVE_FRAMES: usize = 64;

/// Symbol prefixes hidden from native captures (runtime and our own plumbing)
const NATIVE_SKIP_PREFIXES: [&str; 6] = [
    "backtrace::",
    "std::",
    "core::",
    "alloc::",
    "cronista::inspect::",
    "__rust",
];

pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// One named, rendered value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

/// File and line of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Point-in-time view of one stack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub function: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Locals in binding order
    pub locals: Vec<Variable>,
    /// Module-level variables, present only when enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globals: Option<Vec<Variable>>,
}

impl FrameSnapshot {
    pub fn local(&self, name: &str) -> Option<&str> {
        self.locals
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.as_str())
    }

    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.function.clone()
        } else {
            format!("{}::{}", self.module, self.function)
        }
    }
}

/// Frames captured at one instant, innermost first
///
/// Consumed by iteration; once drained it yields nothing further.
#[derive(Debug)]
pub struct FrameCapture {
    frames: std::vec::IntoIter<FrameSnapshot>,
}

impl FrameCapture {
    fn new(frames: Vec<FrameSnapshot>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for FrameCapture {
    type Item = FrameSnapshot;

    fn next(&mut self) -> Option<FrameSnapshot> {
        self.frames.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.frames.size_hint()
    }
}

impl ExactSizeIterator for FrameCapture {}

/// Source of frame snapshots for the diagnostic capture
pub trait StackInspector: Send + Sync {
    /// Capture the calling thread's frames, innermost first, without globals
    fn capture(&self) -> FrameCapture;
}

struct ActiveFrame {
    function: String,
    module: String,
    location: SourceLocation,
    locals: Vec<Variable>,
}

impl ActiveFrame {
    fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            function: self.function.clone(),
            module: self.module.clone(),
            location: Some(self.location.clone()),
            locals: self
                .locals
                .iter()
                .filter(|v| !is_reserved(&v.name))
                .cloned()
                .collect(),
            globals: None,
        }
    }
}

thread_local! {
    static SHADOW: RefCell<Vec<ActiveFrame>> = const { RefCell::new(Vec::new()) };
}

/// Number of instrumented frames active on this thread
pub fn active_depth() -> usize {
    SHADOW
        .try_with(|frames| frames.try_borrow().map(|f| f.len()).unwrap_or(0))
        .unwrap_or(0)
}

fn shadow_snapshot() -> Vec<FrameSnapshot> {
    SHADOW
        .try_with(|frames| match frames.try_borrow() {
            Ok(frames) => frames.iter().rev().map(ActiveFrame::snapshot).collect(),
            Err(_) => Vec::new(),
        })
        .unwrap_or_default()
}

/// Scope guard registering one frame on the shadow stack
///
/// The frame is popped when the guard drops. Guards are tied to the thread
/// that created them.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    index: usize,
    renderer: ValueRenderer,
    _not_send: PhantomData<*const ()>,
}

impl FrameGuard {
    /// Enter a frame using the default render budget
    #[track_caller]
    pub fn enter(module: &str, function: &str) -> Self {
        Self::enter_at(module, function, ValueRenderer::default(), Location::caller())
    }

    /// Enter a frame rendering locals with `renderer`
    #[track_caller]
    pub fn with_renderer(module: &str, function: &str, renderer: ValueRenderer) -> Self {
        Self::enter_at(module, function, renderer, Location::caller())
    }

    pub(crate) fn enter_at(
        module: &str,
        function: &str,
        renderer: ValueRenderer,
        location: &Location<'_>,
    ) -> Self {
        let frame = ActiveFrame {
            function: function.to_string(),
            module: module.to_string(),
            location: SourceLocation {
                file: location.file().to_string(),
                line: location.line(),
            },
            locals: Vec::new(),
        };
        let index = SHADOW
            .try_with(|frames| match frames.try_borrow_mut() {
                Ok(mut frames) => {
                    frames.push(frame);
                    frames.len() - 1
                }
                Err(_) => usize::MAX,
            })
            .unwrap_or(usize::MAX);
        Self {
            index,
            renderer,
            _not_send: PhantomData,
        }
    }

    /// Bind (or re-bind) a local variable, rendering it now
    pub fn local<T: Render + ?Sized>(&self, name: &str, value: &T) {
        if is_reserved(name) {
            return;
        }
        let rendered = self.renderer.render(value);
        let _ = SHADOW.try_with(|frames| {
            let Ok(mut frames) = frames.try_borrow_mut() else {
                return;
            };
            let Some(frame) = frames.get_mut(self.index) else {
                return;
            };
            match frame.locals.iter_mut().find(|v| v.name == name) {
                Some(existing) => existing.value = rendered,
                None => frame.locals.push(Variable {
                    name: name.to_string(),
                    value: rendered,
                }),
            }
        });
    }

    /// Update the recorded line to the caller's position
    #[track_caller]
    pub fn mark(&self) {
        let line = Location::caller().line();
        let _ = SHADOW.try_with(|frames| {
            if let Ok(mut frames) = frames.try_borrow_mut() {
                if let Some(frame) = frames.get_mut(self.index) {
                    frame.location.line = line;
                }
            }
        });
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = SHADOW.try_with(|frames| {
            if let Ok(mut frames) = frames.try_borrow_mut() {
                frames.truncate(self.index);
            }
        });
    }
}

impl fmt::Debug for FrameGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameGuard").field("index", &self.index).finish()
    }
}

/// Inspector over the shadow stack with native fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowStack;

impl StackInspector for ShadowStack {
    fn capture(&self) -> FrameCapture {
        let frames = shadow_snapshot();
        if frames.is_empty() {
            return NativeStack::default().capture();
        }
        FrameCapture::new(frames)
    }
}

/// Inspector over the native call stack (no locals)
#[derive(Debug, Clone, Copy)]
pub struct NativeStack {
    max_frames: usize,
}

impl Default for NativeStack {
    fn default() -> Self {
        Self {
            max_frames: MAX_NATIVE_FRAMES,
        }
    }
}

impl NativeStack {
    pub fn with_max_frames(max_frames: usize) -> Self {
        Self { max_frames }
    }
}

impl StackInspector for NativeStack {
    fn capture(&self) -> FrameCapture {
        let mut frames = Vec::new();
        let mut walked = 0usize;
        backtrace::trace(|frame| {
            walked += 1;
            backtrace::resolve_frame(frame, |symbol| {
                let Some(name) = symbol.name().map(|n| format!("{n:#}")) else {
                    return;
                };
                if NATIVE_SKIP_PREFIXES.iter().any(|p| name.starts_with(p)) {
                    return;
                }
                let (module, function) = match name.rsplit_once("::") {
                    Some((m, f)) => (m.to_string(), f.to_string()),
                    None => (String::new(), name.clone()),
                };
                let location = match (symbol.filename(), symbol.lineno()) {
                    (Some(file), Some(line)) => Some(SourceLocation {
                        file: file.display().to_string(),
                        line,
                    }),
                    _ => None,
                };
                frames.push(FrameSnapshot {
                    function,
                    module,
                    location,
                    locals: Vec::new(),
                    globals: None,
                });
            });
            frames.len() < self.max_frames && walked < self.max_frames * 4
        });
        FrameCapture::new(frames)
    }
}

type GlobalRenderFn = Box<dyn Fn(&ValueRenderer) -> String + Send + Sync>;

struct GlobalEntry {
    module: String,
    name: String,
    render: GlobalRenderFn,
}

/// Module-level variables visible to frames of the same module
#[derive(Default)]
pub struct GlobalRegistry {
    entries: RwLock<Vec<GlobalEntry>>,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable whose current value is produced by `render`
    ///
    /// Registering the same module/name again replaces the earlier entry.
    pub fn register<F>(&self, module: &str, name: &str, render: F)
    where
        F: Fn(&ValueRenderer) -> String + Send + Sync + 'static,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|e| !(e.module == module && e.name == name));
        entries.push(GlobalEntry {
            module: module.to_string(),
            name: name.to_string(),
            render: Box::new(render),
        });
    }

    /// Register a `'static` value rendered at capture time
    pub fn register_static<T>(&self, module: &str, name: &str, value: &'static T)
    where
        T: Render + Sync + ?Sized,
    {
        self.register(module, name, move |renderer| renderer.render(value));
    }

    /// Render the globals of `module`, in registration order
    ///
    /// A closure that panics renders as the placeholder.
    pub fn visible_in(&self, module: &str, renderer: &ValueRenderer) -> Vec<Variable> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|e| e.module == module && !is_reserved(&e.name))
            .map(|e| Variable {
                name: e.name.clone(),
                value: ValueRenderer::guard(|| (e.render)(renderer)),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for GlobalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalRegistry").field("len", &self.len()).finish()
    }
}

/// Fill in `globals` for every frame from `registry`
pub fn attach_globals(
    frames: &mut [FrameSnapshot],
    registry: &GlobalRegistry,
    renderer: &ValueRenderer,
) {
    for frame in frames {
        frame.globals = Some(registry.visible_in(&frame.module, renderer));
    }
}

/// An error carrying the frames active where it was created
///
/// Wrap an error at the point it is raised so that a report built further
/// out still shows the innermost frames:
///
/// ```
/// use cronista::inspect::{FrameGuard, Traced};
///
/// fn parse(input: &str) -> Result<i32, Traced<std::num::ParseIntError>> {
///     let frame = FrameGuard::enter(module_path!(), "parse");
///     frame.local("input", input);
///     input.parse().map_err(Traced::new)
/// }
///
/// let err = parse("x").unwrap_err();
/// assert_eq!(err.frames()[0].function, "parse");
/// ```
pub struct Traced<E> {
    error: E,
    frames: Vec<FrameSnapshot>,
}

impl<E> Traced<E> {
    /// Wrap `error`, capturing this thread's instrumented frames
    pub fn new(error: E) -> Self {
        Self {
            error,
            frames: shadow_snapshot(),
        }
    }

    pub fn frames(&self) -> &[FrameSnapshot] {
        &self.frames
    }

    pub fn inner(&self) -> &E {
        &self.error
    }

    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for Traced<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<E: fmt::Debug> fmt::Debug for Traced<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Traced")
            .field("error", &self.error)
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl<E> std::ops::Deref for Traced<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c_fails() -> Vec<FrameSnapshot> {
        let frame = FrameGuard::enter("app", "c");
        frame.local("depth", &3);
        ShadowStack.capture().collect()
    }

    fn b_calls() -> Vec<FrameSnapshot> {
        let frame = FrameGuard::enter("app", "b");
        frame.local("depth", &2);
        c_fails()
    }

    fn a_calls() -> Vec<FrameSnapshot> {
        let frame = FrameGuard::enter("app", "a");
        frame.local("depth", &1);
        frame.local("name", "outer");
        b_calls()
    }

    #[test]
    fn test_frames_innermost_first() {
        let frames = a_calls();
        let names: Vec<_> = frames.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
        assert_eq!(frames[0].local("depth"), Some("3"));
        assert_eq!(frames[2].local("name"), Some("\"outer\""));
        assert_eq!(active_depth(), 0);
    }

    #[test]
    fn test_rebinding_replaces_value() {
        let frame = FrameGuard::enter("app", "loop_body");
        frame.local("i", &1);
        frame.local("i", &2);
        let frames: Vec<_> = ShadowStack.capture().collect();
        assert_eq!(frames[0].locals.len(), 1);
        assert_eq!(frames[0].local("i"), Some("2"));
    }

    #[test]
    fn test_reserved_names_excluded() {
        let frame = FrameGuard::enter("app", "f");
        frame.local("__internal", &1);
        frame.local("visible", &2);
        let frames: Vec<_> = ShadowStack.capture().collect();
        assert!(frames[0].local("__internal").is_none());
        assert_eq!(frames[0].local("visible"), Some("2"));
    }

    #[test]
    fn test_capture_is_not_restartable() {
        let _frame = FrameGuard::enter("app", "f");
        let mut capture = ShadowStack.capture();
        assert_eq!(capture.len(), 1);
        assert!(capture.next().is_some());
        assert!(capture.next().is_none());
        assert!(capture.next().is_none());
    }

    #[test]
    fn test_guard_records_caller_location() {
        let frame = FrameGuard::enter("app", "located");
        let line = line!() - 1;
        let frames: Vec<_> = ShadowStack.capture().collect();
        let location = frames[0].location.as_ref().unwrap();
        assert_eq!(location.line, line);
        assert!(location.file.ends_with("inspect.rs"));
        frame.mark();
    }

    #[test]
    fn test_native_fallback_without_frames() {
        assert_eq!(active_depth(), 0);
        let frames: Vec<_> = ShadowStack.capture().collect();
        assert!(frames.iter().all(|f| f.locals.is_empty()));
        assert!(frames.len() <= MAX_NATIVE_FRAMES);
    }

    #[test]
    fn test_globals_scoped_by_module() {
        static CONFIG: [u32; 2] = [1, 2];
        let registry = GlobalRegistry::new();
        registry.register_static("app", "CONFIG", &CONFIG);
        registry.register("app", "__hidden", |_| "x".to_string());
        registry.register("other", "URL", |r| r.render("http://x"));

        let renderer = ValueRenderer::default();
        let app = registry.visible_in("app", &renderer);
        assert_eq!(app.len(), 1);
        assert_eq!(app[0].name, "CONFIG");
        assert_eq!(app[0].value, "array(len=2) [1, 2]");
        assert_eq!(registry.visible_in("other", &renderer)[0].value, "\"http://x\"");
        assert!(registry.visible_in("none", &renderer).is_empty());
    }

    #[test]
    fn test_panicking_global_renders_placeholder() {
        let registry = GlobalRegistry::new();
        registry.register("app", "POOL", |_| panic!("pool offline"));
        registry.register("app", "LIMIT", |r| r.render(&8));

        let vars = registry.visible_in("app", &ValueRenderer::default());
        assert_eq!(vars[0].value, crate::render::UNRENDERABLE);
        assert_eq!(vars[1].value, "8");
        assert!(!crate::render::is_rendering());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let registry = GlobalRegistry::new();
        registry.register("m", "V", |_| "1".to_string());
        registry.register("m", "V", |_| "2".to_string());
        assert_eq!(registry.len(), 1);
        let vars = registry.visible_in("m", &ValueRenderer::default());
        assert_eq!(vars[0].value, "2");
    }

    #[test]
    fn test_traced_keeps_frames_after_propagation() {
        fn inner() -> Result<(), Traced<&'static str>> {
            let frame = FrameGuard::enter("app", "inner");
            frame.local("x", &7);
            Err(Traced::new("boom"))
        }
        fn outer() -> Result<(), Traced<&'static str>> {
            let _frame = FrameGuard::enter("app", "outer");
            inner()
        }

        let err = outer().unwrap_err();
        assert_eq!(active_depth(), 0);
        let names: Vec<_> = err.frames().iter().map(|f| f.function.as_str()).collect();
        assert_eq!(names, vec!["inner", "outer"]);
        assert_eq!(err.frames()[0].local("x"), Some("7"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_frames_are_per_thread() {
        let _frame = FrameGuard::enter("app", "main_thread");
        let other = std::thread::spawn(active_depth).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(active_depth(), 1);
    }
}
