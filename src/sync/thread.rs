//! Cached per-thread identity.
//!
//! `gettid` is a syscall; log lines need the tid on every statement. The
//! kernel tid and its fixed-width decimal form are cached in thread-locals
//! on first use.

use std::cell::Cell;

thread_local! {
    static CACHED_TID: Cell<libc::pid_t> = const { Cell::new(0) };
    static CACHED_TID_STRING: [u8; 7] = {
        let tid = current_tid();
        let mut buf = [b' '; 7];
        format_tid(tid, &mut buf);
        buf
    };
}

fn format_tid(tid: libc::pid_t, buf: &mut [u8; 7]) {
    // Right-padded to 6 columns plus a separating space. A 7-digit tid
    // (pid_max raised above 10^6) consumes the separator column rather
    // than losing digits.
    let digits = tid.to_string();
    let n = digits.len().min(buf.len());
    buf[..n].copy_from_slice(&digits.as_bytes()[..n]);
}

/// Kernel thread id of the calling thread, cached after the first call.
pub fn current_tid() -> libc::pid_t {
    CACHED_TID.with(|cell| {
        let mut tid = cell.get();
        if tid == 0 {
            tid = unsafe { libc::gettid() };
            cell.set(tid);
        }
        tid
    })
}

/// The cached tid rendered as `"<tid>  "` padded to seven bytes, ready to be
/// copied into a log line.
pub fn current_tid_string() -> [u8; 7] {
    CACHED_TID_STRING.with(|s| *s)
}
