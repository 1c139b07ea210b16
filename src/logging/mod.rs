//! Logging front end: levels, the per-statement record builder, and the
//! process-global sink hooks.
//!
//! Call sites go through the [`trace!`]/[`debug!`]/[`info!`]/[`warn!`]/
//! [`error!`]/[`fatal!`](crate::fatal) macros. Each macro checks the global
//! level first, so a disabled statement costs one atomic load. An enabled
//! statement builds a [`Record`] — header, then the formatted message —
//! and emits the finished line through the global output hook when the
//! record drops.
//!
//! The hooks default to stdout. Wiring an [`AsyncLogger`] in as the sink is
//! one `set_output` call; see `demos/echo_server.rs`.
//!
//! [`AsyncLogger`]: async_logger::AsyncLogger

pub mod async_logger;
pub mod buffer;
pub mod log_file;
mod macros;

use std::cell::{Cell, RefCell};
use std::fmt::{self, Write as _};
use std::io::Write as _;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;

use crate::sync::thread;
use crate::time::timestamp::{MICROS_PER_SECOND, Timestamp};
use buffer::{FixedBuffer, SMALL_BUFFER};

/// Log severities, least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// Six-column name, space-padded, the padding doubling as the field
    /// separator in the line format.
    fn padded_name(self) -> &'static str {
        match self {
            Level::Trace => "TRACE ",
            Level::Debug => "DEBUG ",
            Level::Info => "INFO  ",
            Level::Warn => "WARN  ",
            Level::Error => "ERROR ",
            Level::Fatal => "FATAL ",
        }
    }

    fn from_index(index: usize) -> Level {
        match index {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Fatal,
        }
    }
}

/// Initial level: `BOREALIS_LOG_TRACE` wins over `BOREALIS_LOG_DEBUG`,
/// fallback is `Info`.
fn init_level() -> Level {
    if std::env::var_os("BOREALIS_LOG_TRACE").is_some() {
        Level::Trace
    } else if std::env::var_os("BOREALIS_LOG_DEBUG").is_some() {
        Level::Debug
    } else {
        Level::Info
    }
}

static LEVEL: LazyLock<AtomicUsize> =
    LazyLock::new(|| AtomicUsize::new(init_level() as usize));

/// Current global log level.
pub fn level() -> Level {
    Level::from_index(LEVEL.load(Ordering::Relaxed))
}

/// Sets the global log level. Intended to be called once at startup;
/// concurrent readers observe either value.
pub fn set_level(level: Level) {
    LEVEL.store(level as usize, Ordering::Relaxed);
}

struct OutputHook(Box<dyn Fn(&[u8]) + Send + Sync>);
struct FlushHook(Box<dyn Fn() + Send + Sync>);

static OUTPUT: LazyLock<ArcSwap<OutputHook>> = LazyLock::new(|| {
    ArcSwap::from_pointee(OutputHook(Box::new(|line| {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line);
    })))
});

static FLUSH: LazyLock<ArcSwap<FlushHook>> = LazyLock::new(|| {
    ArcSwap::from_pointee(FlushHook(Box::new(|| {
        let _ = std::io::stdout().lock().flush();
    })))
});

/// Replaces the global output hook. Every finished log line is passed to
/// `output` as one newline-terminated byte slice.
pub fn set_output(output: impl Fn(&[u8]) + Send + Sync + 'static) {
    OUTPUT.store(std::sync::Arc::new(OutputHook(Box::new(output))));
}

/// Replaces the global flush hook, invoked on fatal lines and by explicit
/// [`flush`] calls.
pub fn set_flush(flush: impl Fn() + Send + Sync + 'static) {
    FLUSH.store(std::sync::Arc::new(FlushHook(Box::new(flush))));
}

/// Flushes the current sink.
pub fn flush() {
    (FLUSH.load().0)();
}

fn emit(line: &[u8]) {
    (OUTPUT.load().0)(line);
}

thread_local! {
    static LAST_SECOND: Cell<i64> = const { Cell::new(0) };
    static TIME_CACHE: RefCell<[u8; 19]> = const { RefCell::new([b' '; 19]) };
}

/// Appends `YYYY/MM/DD HH:MM:SS ` using a per-thread cache of the rendered
/// second, so sub-second bursts of log lines format the date only once.
fn append_time(buf: &mut FixedBuffer, now: Timestamp) {
    let seconds = now.micros() / MICROS_PER_SECOND;
    TIME_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if LAST_SECOND.with(|last| last.replace(seconds)) != seconds {
            let rendered = Timestamp::from_unix_seconds(seconds).format(false);
            if rendered.len() == 19 {
                cache.copy_from_slice(rendered.as_bytes());
            }
        }
        buf.append(&cache[..]);
    });
    buf.append(b" ");
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// One in-flight log statement.
///
/// Construction renders the header; the message body is written through
/// [`fmt::Write`]; dropping the record terminates the line and hands it to
/// the output hook. A fatal record flushes the sink and aborts the process.
pub struct Record {
    buf: FixedBuffer,
    level: Level,
}

impl Record {
    pub fn new(level: Level, file: &str, line: u32) -> Self {
        Self::build(level, file, line, None)
    }

    /// Like [`Record::new`] with a `<scope>(..)` marker ahead of the
    /// message, used by the trace/debug macros.
    pub fn with_scope(level: Level, file: &str, line: u32, scope: &str) -> Self {
        Self::build(level, file, line, Some(scope))
    }

    fn build(level: Level, file: &str, line: u32, scope: Option<&str>) -> Self {
        let mut buf = FixedBuffer::new(SMALL_BUFFER);
        buf.append(&thread::current_tid_string());
        buf.append(level.padded_name().as_bytes());
        append_time(&mut buf, Timestamp::now());
        let _ = write!(buf, "{}:{} ", basename(file), line);
        if let Some(scope) = scope {
            let _ = write!(buf, "{scope}(..) ");
        }
        buf.append(b">_< ");
        Self { buf, level }
    }
}

impl fmt::Write for Record {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.write_str(s)
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        // An overlong message may have filled the buffer; the terminating
        // newline always wins over the last message byte.
        if self.buf.available() == 0 {
            self.buf.truncate(self.buf.capacity() - 1);
        }
        let _ = self.buf.write_str("\n");
        emit(self.buf.as_slice());
        if self.level == Level::Fatal {
            flush();
            std::process::abort();
        }
    }
}
