//! Bounded, panic-safe rendering of arbitrary values for diagnostics
//!
//! Every value that ends up in a failure report (frame locals, globals,
//! captured arguments, extra context) passes through [`ValueRenderer`].
//!
//! Guarantees:
//! - Primitives render directly, strings are quoted and truncated
//! - Collections render their length plus a preview of the first few elements
//! - Nesting deeper than `max_depth` is elided as `...`
//! - A value whose rendering fails, panics, exceeds the output budget or
//!   exceeds the time budget becomes [`UNRENDERABLE`]
//!
//! [`ValueRenderer::render`] never returns an error and never unwinds into
//! the caller; [`ValueRenderer::try_render`] reports the failure instead.

use crate::error::{self, CronistaError};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::{self, Debug, Write as _};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Placeholder emitted for any value that could not be rendered safely
pub const UNRENDERABLE: &str = "<unrenderable>";

thread_local! {
    static RENDERING: Cell<bool> = const { Cell::new(false) };
}

/// True while this thread is inside a guarded render
///
/// The panic hook uses this to stay silent about panics raised by a
/// user `Debug` impl that the renderer is about to contain.
pub fn is_rendering() -> bool {
    RENDERING.with(Cell::get)
}

/// Size and time limits applied to each rendered value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderBudget {
    /// Characters of a string shown before truncation
    pub max_string_chars: usize,
    /// Elements of a collection shown in the preview
    pub max_items: usize,
    /// Nesting levels rendered before eliding
    pub max_depth: usize,
    /// Hard cap on the rendered output of one value
    pub max_output_chars: usize,
    /// Wall-clock budget for one value (milliseconds)
    pub time_budget_ms: u64,
}

impl Default for RenderBudget {
    fn default() -> Self {
        Self {
            max_string_chars: 200,
            max_items: 5,
            max_depth: 3,
            max_output_chars: 1000,
            time_budget_ms: 50,
        }
    }
}

/// Output sink handed to [`Render`] implementations
///
/// Writes fail with `fmt::Error` once the output or time budget is spent,
/// which aborts the render and yields the placeholder.
pub struct RenderContext<'a> {
    budget: &'a RenderBudget,
    out: String,
    depth: usize,
    deadline: Instant,
}

impl<'a> RenderContext<'a> {
    fn new(budget: &'a RenderBudget) -> Self {
        Self {
            budget,
            out: String::new(),
            depth: 0,
            deadline: Instant::now() + Duration::from_millis(budget.time_budget_ms),
        }
    }

    /// Budget in effect for this render
    pub fn budget(&self) -> &RenderBudget {
        self.budget
    }

    /// Render a nested value one level deeper
    pub fn nested<T: Render + ?Sized>(&mut self, value: &T) -> fmt::Result {
        if self.depth >= self.budget.max_depth {
            return self.write_str("...");
        }
        self.depth += 1;
        let result = value.render_into(self);
        self.depth -= 1;
        result
    }

    /// Render `len(n) [a, b, ...]` for a sequence
    pub fn sequence<'v, T, I>(&mut self, kind: &str, len: usize, items: I) -> fmt::Result
    where
        T: Render + 'v + ?Sized,
        I: IntoIterator<Item = &'v T>,
    {
        write!(self, "{kind}(len={len}) [")?;
        let shown = self.budget.max_items;
        for (i, item) in items.into_iter().take(shown).enumerate() {
            if i > 0 {
                self.write_str(", ")?;
            }
            self.nested(item)?;
        }
        if len > shown {
            self.write_str(if shown == 0 { "..." } else { ", ..." })?;
        }
        self.write_str("]")
    }

    /// Render `len(n) {k: v, ...}` for a map
    pub fn mapping<'v, K, V, I>(&mut self, kind: &str, len: usize, entries: I) -> fmt::Result
    where
        K: Render + 'v + ?Sized,
        V: Render + 'v + ?Sized,
        I: IntoIterator<Item = (&'v K, &'v V)>,
    {
        write!(self, "{kind}(len={len}) {{")?;
        let shown = self.budget.max_items;
        for (i, (k, v)) in entries.into_iter().take(shown).enumerate() {
            if i > 0 {
                self.write_str(", ")?;
            }
            self.nested(k)?;
            self.write_str(": ")?;
            self.nested(v)?;
        }
        if len > shown {
            self.write_str(if shown == 0 { "..." } else { ", ..." })?;
        }
        self.write_str("}")
    }

    fn finish(self) -> String {
        self.out
    }
}

impl fmt::Write for RenderContext<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if Instant::now() > self.deadline {
            return Err(fmt::Error);
        }
        if self.out.len() + s.len() > self.budget.max_output_chars {
            return Err(fmt::Error);
        }
        self.out.push_str(s);
        Ok(())
    }
}

/// A value that knows how to summarize itself for a diagnostic
pub trait Render {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result;
}

/// Renders any `Debug` value through the bounded writer
///
/// Use for types without a [`Render`] impl: `frame.local("cfg", &AsDebug(&cfg))`.
pub struct AsDebug<'a, T: Debug + ?Sized>(pub &'a T);

impl<T: Debug + ?Sized> Render for AsDebug<'_, T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        write!(ctx, "{:?}", self.0)
    }
}

/// Stateless renderer configured with a [`RenderBudget`]
#[derive(Debug, Clone, Default)]
pub struct ValueRenderer {
    budget: RenderBudget,
}

impl ValueRenderer {
    pub fn new(budget: RenderBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &RenderBudget {
        &self.budget
    }

    /// Render a value, substituting [`UNRENDERABLE`] on any failure
    pub fn render<T: Render + ?Sized>(&self, value: &T) -> String {
        self.try_render(value).unwrap_or_else(placeholder)
    }

    /// Render a value, reporting why it could not be rendered
    pub fn try_render<T: Render + ?Sized>(&self, value: &T) -> error::Result<String> {
        contained(|| {
            let mut ctx = RenderContext::new(&self.budget);
            value
                .render_into(&mut ctx)
                .map(|()| ctx.finish())
                .map_err(|_| {
                    CronistaError::Rendering("output or time budget exceeded".to_string())
                })
        })
    }

    /// Run a caller-supplied rendering closure with the same containment
    ///
    /// A panic inside `produce` yields [`UNRENDERABLE`].
    pub fn guard<F>(produce: F) -> String
    where
        F: FnOnce() -> String,
    {
        contained(|| Ok(produce())).unwrap_or_else(placeholder)
    }
}

fn contained<F>(f: F) -> error::Result<String>
where
    F: FnOnce() -> error::Result<String>,
{
    let previous = RENDERING.with(|flag| flag.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    RENDERING.with(|flag| flag.set(previous));
    outcome.unwrap_or_else(|_| Err(CronistaError::Rendering("render panicked".to_string())))
}

fn placeholder(err: CronistaError) -> String {
    tracing::debug!("{}", err);
    UNRENDERABLE.to_string()
}

macro_rules! render_via_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Render for $ty {
                fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
                    write!(ctx, "{}", self)
                }
            }
        )*
    };
}

render_via_display!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool
);

impl Render for char {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        write!(ctx, "{:?}", self)
    }
}

impl Render for () {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.write_str("()")
    }
}

impl Render for str {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        let limit = ctx.budget().max_string_chars;
        let total = self.chars().count();
        ctx.write_char('"')?;
        for c in self.chars().take(limit) {
            write!(ctx, "{}", c.escape_debug())?;
        }
        ctx.write_char('"')?;
        if total > limit {
            write!(ctx, "... ({total} chars)")?;
        }
        Ok(())
    }
}

impl Render for String {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        self.as_str().render_into(ctx)
    }
}

impl<T: Render + ?Sized> Render for &T {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        (**self).render_into(ctx)
    }
}

impl<T: Render + ?Sized> Render for Box<T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        (**self).render_into(ctx)
    }
}

impl<T: Render + ?Sized> Render for Rc<T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        (**self).render_into(ctx)
    }
}

impl<T: Render + ?Sized> Render for Arc<T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        (**self).render_into(ctx)
    }
}

impl<T: Render> Render for Option<T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        match self {
            Some(inner) => {
                ctx.write_str("Some(")?;
                ctx.nested(inner)?;
                ctx.write_str(")")
            }
            None => ctx.write_str("None"),
        }
    }
}

impl<T: Render, E: Render> Render for Result<T, E> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        let (tag, inner): (&str, &dyn Render) = match self {
            Ok(v) => ("Ok(", v),
            Err(e) => ("Err(", e),
        };
        ctx.write_str(tag)?;
        ctx.nested(inner)?;
        ctx.write_str(")")
    }
}

impl<A: Render, B: Render> Render for (A, B) {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.write_str("(")?;
        ctx.nested(&self.0)?;
        ctx.write_str(", ")?;
        ctx.nested(&self.1)?;
        ctx.write_str(")")
    }
}

impl<A: Render, B: Render, C: Render> Render for (A, B, C) {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.write_str("(")?;
        ctx.nested(&self.0)?;
        ctx.write_str(", ")?;
        ctx.nested(&self.1)?;
        ctx.write_str(", ")?;
        ctx.nested(&self.2)?;
        ctx.write_str(")")
    }
}

impl<T: Render> Render for [T] {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.sequence("slice", self.len(), self.iter())
    }
}

impl<T: Render, const N: usize> Render for [T; N] {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.sequence("array", N, self.iter())
    }
}

impl<T: Render> Render for Vec<T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.sequence("Vec", self.len(), self.iter())
    }
}

impl<T: Render> Render for VecDeque<T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.sequence("VecDeque", self.len(), self.iter())
    }
}

impl<T: Render, S> Render for HashSet<T, S> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.sequence("HashSet", self.len(), self.iter())
    }
}

impl<T: Render> Render for BTreeSet<T> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.sequence("BTreeSet", self.len(), self.iter())
    }
}

impl<K: Render, V: Render, S> Render for HashMap<K, V, S> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.mapping("HashMap", self.len(), self.iter())
    }
}

impl<K: Render, V: Render> Render for BTreeMap<K, V> {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        ctx.mapping("BTreeMap", self.len(), self.iter())
    }
}

impl Render for serde_json::Value {
    fn render_into(&self, ctx: &mut RenderContext<'_>) -> fmt::Result {
        use serde_json::Value;
        match self {
            Value::String(s) => s.render_into(ctx),
            Value::Array(items) => ctx.sequence("array", items.len(), items.iter()),
            Value::Object(map) => ctx.mapping("object", map.len(), map.iter()),
            other => write!(ctx, "{other}"),
        }
    }
}
