//! Size- and day-rolled log files.
//!
//! A [`LogFile`] owns the current output file and decides, on a coarse
//! cadence, when to start a new one: whenever the bytes written since the
//! file was opened exceed the roll size, or a new day has begun. File names
//! are `<basename>.<YYYYmmdd-HHMMSS>.<hostname>.<pid>.log`.
//!
//! Rolling twice within one second would reproduce the same name, so a
//! time-triggered or manual [`roll`](LogFile::roll) inside the same second
//! is a no-op. A size-triggered roll must not be: the file would grow
//! without bound on a fast producer. That case appends a `-<n>` sequence
//! before the `.log` suffix to disambiguate.
//!
//! There is exactly one writer (the async logger's drainer thread), so no
//! locking happens here. Write failures are reported on stderr and never
//! retried; losing a line beats taking the process down with it.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Offset};

/// Seconds per roll period; periods are aligned to day boundaries.
const ROLL_PERIOD_SECONDS: i64 = 60 * 60 * 24;

/// Size of the userspace write buffer in front of the file.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

pub(crate) fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len() - 1) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    } else {
        String::from("unknownhost")
    }
}

/// Wall-clock seconds shifted by the local UTC offset, so that integer
/// division by [`ROLL_PERIOD_SECONDS`] lands on local midnights.
fn local_seconds(now: &DateTime<Local>) -> i64 {
    now.timestamp() + i64::from(now.offset().fix().local_minus_utc())
}

/// Append-only file with a byte counter.
struct AppendFile {
    writer: BufWriter<File>,
    written: u64,
}

impl AppendFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            written: 0,
        })
    }

    fn append(&mut self, data: &[u8]) {
        match self.writer.write_all(data) {
            Ok(()) => self.written += data.len() as u64,
            Err(e) => eprintln!("AppendFile::append failed: {e}"),
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            eprintln!("AppendFile::flush failed: {e}");
        }
    }

    fn written_bytes(&self) -> u64 {
        self.written
    }
}

/// Rolling log sink: one current [`AppendFile`] plus the roll bookkeeping.
pub struct LogFile {
    dir: PathBuf,
    basename: String,
    roll_size: u64,
    flush_interval: i64,
    check_every_n: u32,

    count: u32,
    start_of_period: i64,
    last_roll: i64,
    roll_seq: u32,
    last_flush: i64,
    file: AppendFile,
}

impl LogFile {
    pub const DEFAULT_CHECK_EVERY_N: u32 = 1024;

    /// Opens the first file immediately. `basename` must be a bare name;
    /// the directory is passed separately.
    pub fn new(
        dir: PathBuf,
        basename: &str,
        roll_size: u64,
        flush_interval_seconds: i64,
        check_every_n: u32,
    ) -> io::Result<Self> {
        assert!(!basename.contains('/'), "log basename must not contain '/'");
        let now = Local::now();
        let seconds = local_seconds(&now);
        let file = AppendFile::open(&Self::file_path(&dir, basename, &now, 0))?;
        Ok(Self {
            dir,
            basename: basename.to_string(),
            roll_size,
            flush_interval: flush_interval_seconds,
            check_every_n,
            count: 0,
            start_of_period: seconds / ROLL_PERIOD_SECONDS * ROLL_PERIOD_SECONDS,
            last_roll: seconds,
            roll_seq: 0,
            last_flush: seconds,
            file,
        })
    }

    fn file_path(dir: &Path, basename: &str, now: &DateTime<Local>, seq: u32) -> PathBuf {
        let stamp = now.format("%Y%m%d-%H%M%S");
        let name = if seq == 0 {
            format!(
                "{}.{}.{}.{}.log",
                basename,
                stamp,
                hostname(),
                std::process::id()
            )
        } else {
            format!(
                "{}.{}.{}.{}-{}.log",
                basename,
                stamp,
                hostname(),
                std::process::id(),
                seq
            )
        };
        dir.join(name)
    }

    pub fn append(&mut self, line: &[u8]) {
        self.file.append(line);

        if self.file.written_bytes() > self.roll_size {
            if !self.roll() {
                self.roll_same_second();
            }
        } else {
            self.count += 1;
            if self.count >= self.check_every_n {
                self.count = 0;
                let seconds = local_seconds(&Local::now());
                let period = seconds / ROLL_PERIOD_SECONDS * ROLL_PERIOD_SECONDS;
                if period != self.start_of_period {
                    self.roll();
                } else if seconds - self.last_flush > self.flush_interval {
                    self.last_flush = seconds;
                    self.file.flush();
                }
            }
        }
    }

    pub fn flush(&mut self) {
        self.file.flush();
    }

    /// Opens a new file unless one was already opened this second.
    pub fn roll(&mut self) -> bool {
        let now = Local::now();
        let seconds = local_seconds(&now);
        if seconds > self.last_roll {
            match AppendFile::open(&Self::file_path(&self.dir, &self.basename, &now, 0)) {
                Ok(file) => {
                    self.last_roll = seconds;
                    self.roll_seq = 0;
                    self.last_flush = seconds;
                    self.start_of_period = seconds / ROLL_PERIOD_SECONDS * ROLL_PERIOD_SECONDS;
                    self.file.flush();
                    self.file = file;
                    return true;
                }
                Err(e) => eprintln!("LogFile::roll failed: {e}"),
            }
        }
        false
    }

    /// Size-triggered roll landing in the same second as the previous one:
    /// the timestamp component would collide, so a sequence number keeps the
    /// new file distinct.
    fn roll_same_second(&mut self) {
        let now = Local::now();
        let seq = self.roll_seq + 1;
        match AppendFile::open(&Self::file_path(&self.dir, &self.basename, &now, seq)) {
            Ok(file) => {
                self.roll_seq = seq;
                self.file.flush();
                self.file = file;
            }
            Err(e) => eprintln!("LogFile::roll failed: {e}"),
        }
    }
}
