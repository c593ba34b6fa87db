//! Cronista - opt-in call timing and failure diagnostics
//!
//! This library times selected calls (wall and CPU), aggregates the results
//! into summary documents, explains failures with a snapshot of the
//! instrumented frames, and persists summaries to a local directory or a
//! remote table when the process exits.
//!
//! Everything hangs off one explicit [`Engine`]:
//!
//! ```
//! use cronista::{frame, Config, Engine};
//!
//! let mut config = Config::default();
//! config.output_on_exit = false;
//! let engine = Engine::builder(config).report_sink(None).build();
//!
//! let parsed = engine.time_it("app::parse", || {
//!     let input = "42x";
//!     let _frame = frame!("parse", input);
//!     input.parse::<i32>()
//! });
//!
//! if let Err(e) = &parsed {
//!     let report = engine.capture_failure("parsing input", e, &[]);
//!     assert_eq!(report.error_type, "ParseIntError");
//! }
//! ```

pub mod aggregate;
pub mod classify;
pub mod cli;
pub mod config;
pub mod diagnostic;
pub mod engine;
pub mod error;
pub mod filter;
pub mod flush;
pub mod hook;
pub mod inspect;
pub mod instrument;
pub mod logging;
pub mod render;
pub mod session;
pub mod storage;
pub mod timing;

pub use aggregate::{AggregateDocument, OverallSummary, Summary};
pub use classify::{ErrorCategory, ErrorClassifier};
pub use config::Config;
pub use diagnostic::{ErrorInfo, FailureReport, FailureStats};
pub use engine::{Engine, EngineBuilder};
pub use error::{CronistaError, Result};
pub use inspect::{FrameGuard, Traced};
pub use instrument::CallArgs;
pub use render::{AsDebug, Render, ValueRenderer};
pub use timing::TimingResult;
