//! Integration tests for failure reports, classification and the panic hook

mod utils;

use cronista::classify::ErrorCategory;
use cronista::diagnostic::ErrorInfo;
use cronista::{frame, AsDebug, Engine, Traced};
use serial_test::serial;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use utils::{local_config, quiet_engine};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn engine(tmp: &TempDir) -> Engine {
    let mut config = local_config(tmp.path());
    config.output_on_exit = false;
    quiet_engine(config)
}

#[derive(Debug)]
struct Settings {
    retries: u32,
}

fn level_a() -> Result<(), Traced<std::num::ParseIntError>> {
    let user = "ada";
    let _frame = frame!("level_a", user);
    level_b()
}

fn level_b() -> Result<(), Traced<std::num::ParseIntError>> {
    let batch = vec![1, 2, 3];
    let settings = Settings { retries: 2 };
    let frame = frame!("level_b", batch);
    frame.local("settings", &AsDebug(&settings));
    level_c("12x")
}

fn level_c(raw: &str) -> Result<(), Traced<std::num::ParseIntError>> {
    let frame = frame!("level_c", raw);
    let mut lookup = HashMap::new();
    lookup.insert("k".to_string(), 1);
    frame.local("lookup", &lookup);
    raw.parse::<i32>().map(|_| ()).map_err(Traced::new)
}

#[test]
fn test_nested_frames_innermost_first() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let module = module_path!();
    engine.register_global(module, "MAX_RETRIES", |r| r.render(&5));
    engine.register_global(module, "__hidden", |r| r.render(&0));

    let err = level_a().unwrap_err();
    let report = engine.capture_failure("nested call", &err, &[]);

    let names: Vec<_> = report.frames.iter().map(|f| f.function.as_str()).collect();
    assert_eq!(names, vec!["level_c", "level_b", "level_a"]);

    assert_eq!(report.frames[0].local("raw"), Some("\"12x\""));
    assert!(report.frames[0].local("lookup").unwrap().starts_with("HashMap(len=1)"));
    assert_eq!(report.frames[1].local("batch"), Some("Vec(len=3) [1, 2, 3]"));
    assert!(report.frames[1].local("settings").unwrap().contains("retries: 2"));
    assert_eq!(report.frames[2].local("user"), Some("\"ada\""));
    assert!(report.frames[0].local("batch").is_none());

    for frame in &report.frames {
        let globals = frame.globals.as_ref().unwrap();
        assert_eq!(globals.len(), 1);
        assert_eq!(globals[0].name, "MAX_RETRIES");
        assert_eq!(globals[0].value, "5");
    }
    assert!(report.frames[0].location.as_ref().unwrap().file.ends_with("diagnostics_tests.rs"));
}

#[test]
fn test_globals_hidden_when_disabled() {
    let tmp = TempDir::new().unwrap();
    let mut config = local_config(tmp.path());
    config.output_on_exit = false;
    config.tracking.exception_show_globals = false;
    let engine = quiet_engine(config);
    engine.register_global(module_path!(), "SECRET", |r| r.render("s3cr3t"));

    let _frame = frame!("handler");
    let report = engine.capture_failure("no globals", ErrorInfo::new("ValueError", "bad"), &[]);
    assert!(report.frames[0].globals.is_none());
    assert!(!report.render_text().contains("s3cr3t"));
}

#[test]
fn test_vendor_code_and_fallback_classification() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);

    let oracle = engine.capture_failure(
        "connect",
        ErrorInfo::new(
            "DatabaseError",
            "ORA-12154: TNS:could not resolve the connect identifier specified",
        ),
        &[],
    );
    assert_eq!(oracle.category, ErrorCategory::Network);
    assert!(oracle.explanation.contains("ORA-12154"));

    let unknown = engine.capture_failure(
        "mystery",
        ErrorInfo::new("Exception", "unknown failure xyz"),
        &[],
    );
    assert_eq!(unknown.category, ErrorCategory::Unknown);
    assert!(unknown.explanation.contains("Exception"));
    assert!(unknown.explanation.contains("unknown failure xyz"));
}

#[test]
fn test_same_failure_twice_same_explanation() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let err = std::fs::read_to_string(tmp.path().join("missing.txt")).unwrap_err();

    let first = engine.capture_failure("read config", &err, &[]);
    let second = engine.capture_failure("read config", &err, &[]);
    assert_ne!(first.id, second.id);
    assert_eq!(first.explanation, second.explanation);
    assert_eq!(first.category, ErrorCategory::FileSystem);
}

#[test]
fn test_registry_bounded_and_stats() {
    let tmp = TempDir::new().unwrap();
    let mut config = local_config(tmp.path());
    config.output_on_exit = false;
    config.tracking.failure_registry_size = 3;
    let engine = quiet_engine(config);

    for i in 0..12 {
        engine.capture_failure(&format!("op {i}"), ErrorInfo::new("E", "m"), &[]);
    }

    let retained: Vec<_> = engine.failures().iter().map(|r| r.label.clone()).collect();
    assert_eq!(retained, vec!["op 9", "op 10", "op 11"]);

    let stats = engine.failure_stats();
    assert_eq!(stats.total_failures, 12);
    assert_eq!(stats.recent_failures.len(), 3);
}

#[test]
fn test_report_written_to_sink() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let sink = Captured::default();
    engine.set_report_sink(Some(Box::new(sink.clone())));

    let _frame = frame!("upload");
    engine.capture_failure(
        "Upload",
        ErrorInfo::new("HTTPError", "503 Server Error: Service Unavailable"),
        &[("attempt", &3), ("endpoint", &"/v1/data")],
    );

    let text = sink.text();
    assert!(text.contains("FAILURE: Upload"));
    assert!(text.contains("What happened:"));
    assert!(text.contains("HTTPError: 503 Server Error"));
    assert!(text.contains("upload"));
    assert!(text.contains("attempt = 3"));
    assert!(text.contains("endpoint = \"/v1/data\""));
}

#[test]
fn test_unrenderable_local_does_not_abort_capture() {
    struct Hostile;
    impl cronista::Render for Hostile {
        fn render_into(&self, _ctx: &mut cronista::render::RenderContext<'_>) -> std::fmt::Result {
            panic!("cannot render")
        }
    }

    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let frame = frame!("hostile");
    frame.local("value", &Hostile);

    let report = engine.capture_failure("hostile", ErrorInfo::new("E", "m"), &[]);
    assert_eq!(report.frames[0].local("value"), Some(cronista::render::UNRENDERABLE));
}

#[test]
#[serial]
fn test_panic_hook_reports_and_preserves_panic() {
    let tmp = TempDir::new().unwrap();
    let mut config = local_config(tmp.path());
    config.output_on_exit = false;
    let engine = Engine::builder(config).report_sink(None).build();
    assert!(engine.failure_hook_installed());
    assert!(!engine.install_failure_hook());

    let outcome = std::thread::spawn(|| {
        let depth = 7;
        let _frame = frame!("worker", depth);
        panic!("division by zero in worker");
    })
    .join();
    assert!(outcome.is_err());

    let report = engine
        .failures()
        .into_iter()
        .find(|r| r.message.contains("division by zero in worker"))
        .expect("panic was reported");
    assert_eq!(report.error_type, "panic");
    assert_eq!(report.category, ErrorCategory::Arithmetic);
    assert_eq!(report.frames[0].function, "worker");
    assert_eq!(report.frames[0].local("depth"), Some("7"));
}

struct Exploding;

impl cronista::Render for Exploding {
    fn render_into(&self, _ctx: &mut cronista::render::RenderContext<'_>) -> std::fmt::Result {
        panic!("context value exploded")
    }
}

#[test]
fn test_panicking_global_and_context_never_abort_capture() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let module = module_path!();
    engine.register_global(module, "POOL", |_| panic!("bad global"));
    engine.register_global(module, "LIMIT", |r| r.render(&4));

    let _frame = frame!("checkout");
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        engine.capture_failure(
            "checkout",
            ErrorInfo::new("ValueError", "bad cart"),
            &[("cart", &Exploding), ("items", &3)],
        )
    }));
    let report = outcome.expect("capture_failure must not unwind");

    let globals = report.frames[0].globals.as_ref().unwrap();
    assert_eq!(globals[0].name, "POOL");
    assert_eq!(globals[0].value, cronista::render::UNRENDERABLE);
    assert_eq!(globals[1].value, "4");
    assert_eq!(report.extra_context[0].value, cronista::render::UNRENDERABLE);
    assert_eq!(report.extra_context[1].value, "3");
    assert_eq!(engine.failures().len(), 1);
}

#[test]
#[serial]
fn test_panicking_global_with_hook_installed() {
    let tmp = TempDir::new().unwrap();
    let mut config = local_config(tmp.path());
    config.output_on_exit = false;
    let engine = Engine::builder(config).report_sink(None).build();
    engine.register_global(module_path!(), "POOL", |_| panic!("bad global"));

    let _frame = frame!("handler");
    let report = engine.capture_failure("with hook", ErrorInfo::new("E", "m"), &[]);
    let globals = report.frames[0].globals.as_ref().unwrap();
    assert_eq!(globals[0].value, cronista::render::UNRENDERABLE);

    // contained render panics are not filed as failures
    let labels: Vec<_> = engine.failures().iter().map(|r| r.label.clone()).collect();
    assert_eq!(labels, vec!["with hook"]);
}
