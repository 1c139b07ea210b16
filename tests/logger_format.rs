//! Record format and global level gate.
//!
//! These tests swap the process-global output hook, so they live in their
//! own integration-test binary (one process) and run serially through a
//! shared capture sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use borealis::logging::{self, Level};
use borealis::{debug, error, info, trace, warn};

/// The hooks and the level are process-global; tests take this lock so
/// they do not trample each other's sink.
static GLOBALS: Mutex<()> = Mutex::new(());

fn capture_lines(emit: impl FnOnce()) -> Vec<String> {
    let captured = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = captured.clone();
    logging::set_output(move |line| {
        sink.lock()
            .unwrap()
            .push(String::from_utf8_lossy(line).into_owned());
    });
    emit();
    let lines = captured.lock().unwrap().clone();
    // Put stdout back for whatever logs after this test.
    logging::set_output(|line| {
        use std::io::Write;
        let _ = std::io::stdout().lock().write_all(line);
    });
    lines
}

#[test]
fn info_line_has_the_documented_layout() {
    let _globals = GLOBALS.lock().unwrap();
    let lines = capture_lines(|| {
        info!("format probe {}", 42);
    });
    let line = lines
        .iter()
        .find(|l| l.contains("format probe 42"))
        .expect("captured the probe line");

    assert!(line.ends_with('\n'));

    // <tid right-padded to 6> <LEVEL 6> YYYY/MM/DD HH:MM:SS <file>:<line> >_< msg
    let tid_field = &line[0..7];
    assert!(tid_field.trim_end().chars().all(|c| c.is_ascii_digit()));
    assert_eq!(&line[7..13], "INFO  ");

    let date_field = &line[13..32];
    assert_eq!(&date_field[4..5], "/");
    assert_eq!(&date_field[7..8], "/");
    assert_eq!(&date_field[10..11], " ");
    assert_eq!(&date_field[13..14], ":");
    assert_eq!(&date_field[16..17], ":");

    let rest = &line[33..];
    assert!(
        rest.starts_with("logger_format.rs:"),
        "source location missing: {rest:?}"
    );
    assert!(rest.contains(" >_< format probe 42\n"));
}

#[test]
fn trace_and_debug_carry_a_scope_marker() {
    let _globals = GLOBALS.lock().unwrap();
    logging::set_level(Level::Trace);
    let lines = capture_lines(|| {
        trace!("scoped trace probe");
        debug!("scoped debug probe");
    });
    logging::set_level(Level::Info);

    let trace_line = lines
        .iter()
        .find(|l| l.contains("scoped trace probe"))
        .expect("trace line");
    assert!(trace_line.contains("TRACE "));
    assert!(trace_line.contains("(..) >_< "));

    let debug_line = lines
        .iter()
        .find(|l| l.contains("scoped debug probe"))
        .expect("debug line");
    assert!(debug_line.contains("DEBUG "));
}

#[test]
fn level_gate_suppresses_below_threshold() {
    let _globals = GLOBALS.lock().unwrap();
    logging::set_level(Level::Error);
    let lines = capture_lines(|| {
        trace!("gated trace");
        debug!("gated debug");
        info!("gated info");
        warn!("gated warn");
        error!("passing error");
    });
    logging::set_level(Level::Info);

    assert!(!lines.iter().any(|l| l.contains("gated trace")));
    assert!(!lines.iter().any(|l| l.contains("gated debug")));
    assert!(!lines.iter().any(|l| l.contains("gated info")));
    assert!(!lines.iter().any(|l| l.contains("gated warn")));
    assert!(
        lines.iter().any(|l| l.contains("passing error")),
        "ERROR must pass an Error-level gate"
    );
}

#[test]
fn flush_hook_is_invoked() {
    let _globals = GLOBALS.lock().unwrap();
    let flushes = Arc::new(AtomicUsize::new(0));
    let counter = flushes.clone();
    logging::set_flush(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    logging::flush();
    logging::flush();
    assert_eq!(flushes.load(Ordering::SeqCst), 2);
    logging::set_flush(|| {
        use std::io::Write;
        let _ = std::io::stdout().lock().flush();
    });
}
