//! Double-buffered asynchronous logger.
//!
//! Producers copy their line into the current buffer under a short lock and
//! return; a single drainer thread swaps out the filled buffers on a flush
//! cadence and writes them to a rolling [`LogFile`]. In the steady state
//! the same two large buffers shuttle between front and back, so the hot
//! path never allocates.
//!
//! When producers outrun the sink for long enough that more than
//! `drop_threshold` buffers pile up, the surplus is dropped and one audit
//! line records the loss. That is the only place this crate discards data,
//! and it is preferred over unbounded memory growth.

use std::io::Write as _;
use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::sync::latch::CountDownLatch;
use crate::time::timestamp::Timestamp;

use super::buffer::{FixedBuffer, LARGE_BUFFER};
use super::log_file::LogFile;

struct State {
    current: FixedBuffer,
    /// Pre-allocated spare promoted to `current` when it fills.
    next: Option<FixedBuffer>,
    filled: Vec<FixedBuffer>,
}

struct Core {
    buffer_size: usize,
    running: AtomicBool,
    latch: CountDownLatch,
    state: Mutex<State>,
    cond: Condvar,
}

impl Core {
    fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            running: AtomicBool::new(false),
            latch: CountDownLatch::new(1),
            state: Mutex::new(State {
                current: FixedBuffer::new(buffer_size),
                next: Some(FixedBuffer::new(buffer_size)),
                filled: Vec::with_capacity(16),
            }),
            cond: Condvar::new(),
        }
    }

    fn append(&self, line: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if state.current.append(line) {
            return;
        }
        // Current buffer is full: hand it to the drainer and start on the
        // spare (or, if the drainer still has it, a fresh allocation).
        let replacement = state
            .next
            .take()
            .unwrap_or_else(|| FixedBuffer::new(self.buffer_size));
        let full = mem::replace(&mut state.current, replacement);
        state.filled.push(full);
        state.current.append(line);
        self.cond.notify_one();
    }
}

/// Cloneable producer-side handle, suitable for capture by the global
/// output hook.
#[derive(Clone)]
pub struct AsyncLoggerHandle {
    core: Arc<Core>,
}

impl AsyncLoggerHandle {
    pub fn append(&self, line: &[u8]) {
        self.core.append(line);
    }
}

/// Owner of the drainer thread and its configuration.
///
/// ```no_run
/// use borealis::logging::async_logger::AsyncLogger;
///
/// let mut logger = AsyncLogger::new("/var/log/myapp", "myapp", 512 * 1024 * 1024);
/// logger.start();
/// let sink = logger.handle();
/// borealis::logging::set_output(move |line| sink.append(line));
/// ```
pub struct AsyncLogger {
    dir: PathBuf,
    basename: String,
    roll_size: u64,
    flush_interval: Duration,
    drop_threshold: usize,
    check_every_n: u32,
    core: Arc<Core>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncLogger {
    pub fn new(dir: impl Into<PathBuf>, basename: &str, roll_size: u64) -> Self {
        Self {
            dir: dir.into(),
            basename: basename.to_string(),
            roll_size,
            flush_interval: Duration::from_secs(3),
            drop_threshold: 25,
            check_every_n: LogFile::DEFAULT_CHECK_EVERY_N,
            core: Arc::new(Core::new(LARGE_BUFFER)),
            thread: None,
        }
    }

    /// How long the drainer sleeps when no buffer fills up.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Filled-buffer count past which the surplus is dropped.
    pub fn drop_threshold(mut self, threshold: usize) -> Self {
        assert!(threshold >= 2, "drop threshold must keep at least two buffers");
        self.drop_threshold = threshold;
        self
    }

    /// Exchange-buffer capacity. Only callable before [`start`](Self::start).
    pub fn buffer_size(mut self, size: usize) -> Self {
        assert!(self.thread.is_none(), "buffer_size after start");
        self.core = Arc::new(Core::new(size));
        self
    }

    /// Appends between roll checks in the backing [`LogFile`].
    pub fn check_every_n(mut self, n: u32) -> Self {
        self.check_every_n = n.max(1);
        self
    }

    pub fn handle(&self) -> AsyncLoggerHandle {
        AsyncLoggerHandle {
            core: self.core.clone(),
        }
    }

    /// Copies one newline-terminated line into the exchange buffers.
    pub fn append(&self, line: &[u8]) {
        self.core.append(line);
    }

    /// Spawns the drainer and waits until it is running.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.core.running.store(true, Ordering::Release);
        let core = self.core.clone();
        let config = DrainConfig {
            dir: self.dir.clone(),
            basename: self.basename.clone(),
            roll_size: self.roll_size,
            flush_interval: self.flush_interval,
            drop_threshold: self.drop_threshold,
            check_every_n: self.check_every_n,
        };
        let handle = std::thread::Builder::new()
            .name("async-logger".to_string())
            .spawn(move || drain(core, config))
            .expect("failed to spawn async-logger thread");
        self.thread = Some(handle);
        self.core.latch.wait();
    }

    /// Stops the drainer after a final drain of everything appended so far.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.core.running.store(false, Ordering::Release);
            self.core.cond.notify_one();
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DrainConfig {
    dir: PathBuf,
    basename: String,
    roll_size: u64,
    flush_interval: Duration,
    drop_threshold: usize,
    check_every_n: u32,
}

fn drain(core: Arc<Core>, config: DrainConfig) {
    core.latch.count_down();

    let mut output = match LogFile::new(
        config.dir,
        &config.basename,
        config.roll_size,
        config.flush_interval.as_secs() as i64,
        config.check_every_n,
    ) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("async-logger: cannot open log file: {e}");
            return;
        }
    };

    let mut spare1 = Some(FixedBuffer::new(core.buffer_size));
    let mut spare2 = Some(FixedBuffer::new(core.buffer_size));
    let mut to_write: Vec<FixedBuffer> = Vec::with_capacity(16);

    while core.running.load(Ordering::Acquire) {
        {
            let mut state = core.state.lock().unwrap();
            if state.filled.is_empty() {
                let (guard, _) = core
                    .cond
                    .wait_timeout(state, config.flush_interval)
                    .unwrap();
                state = guard;
            }
            // Swap out everything pending, keep the critical section to a
            // couple of pointer moves.
            let replacement = spare1
                .take()
                .unwrap_or_else(|| FixedBuffer::new(core.buffer_size));
            let current = mem::replace(&mut state.current, replacement);
            state.filled.push(current);
            mem::swap(&mut state.filled, &mut to_write);
            if state.next.is_none() {
                state.next = spare2.take();
            }
        }

        if to_write.len() > config.drop_threshold {
            let notice = format!(
                "Dropped log messages at {}, {} larger buffers\n",
                Timestamp::now().format(false),
                to_write.len() - 2
            );
            let _ = std::io::stderr().write_all(notice.as_bytes());
            output.append(notice.as_bytes());
            to_write.truncate(2);
        }

        for buffer in &to_write {
            output.append(buffer.as_slice());
        }

        // Recycle two buffers as the next iteration's spares, release the
        // rest.
        to_write.truncate(2);
        if spare1.is_none() {
            let mut buffer = to_write.pop().unwrap_or_else(|| FixedBuffer::new(core.buffer_size));
            buffer.reset();
            spare1 = Some(buffer);
        }
        if spare2.is_none() {
            let mut buffer = to_write.pop().unwrap_or_else(|| FixedBuffer::new(core.buffer_size));
            buffer.reset();
            spare2 = Some(buffer);
        }
        to_write.clear();
        output.flush();
    }

    // Final drain: everything appended before stop() must reach the file.
    let leftovers = {
        let mut state = core.state.lock().unwrap();
        if !state.current.is_empty() {
            let last = mem::replace(&mut state.current, FixedBuffer::new(0));
            state.filled.push(last);
        }
        mem::take(&mut state.filled)
    };
    for buffer in &leftovers {
        output.append(buffer.as_slice());
    }
    output.flush();
}
