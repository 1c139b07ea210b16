//! Thin wrappers over the descriptor syscalls the reactor owns:
//! eventfd (cross-thread wake-up) and timerfd (timer expiry).

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub(crate) fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

pub(crate) fn eventfd() -> io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// One wake-up token. Writes are idempotent with respect to the next read:
/// eventfd accumulates, so any number of wake-ups collapse into one.
pub(crate) fn write_eventfd(fd: RawFd) -> io::Result<()> {
    let token: u64 = 1;
    let n = unsafe {
        libc::write(
            fd,
            &token as *const u64 as *const libc::c_void,
            size_of::<u64>(),
        )
    };
    if n != size_of::<u64>() as isize {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn read_eventfd(fd: RawFd) -> io::Result<u64> {
    let mut token: u64 = 0;
    let n = unsafe {
        libc::read(
            fd,
            &mut token as *mut u64 as *mut libc::c_void,
            size_of::<u64>(),
        )
    };
    if n != size_of::<u64>() as isize {
        return Err(io::Error::last_os_error());
    }
    Ok(token)
}

pub(crate) fn timerfd() -> io::Result<RawFd> {
    let fd = unsafe {
        libc::timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Arms the timerfd to fire once after `delay`. Sub-100µs delays are
/// rounded up so an already-due deadline still produces an edge.
pub(crate) fn arm_timerfd(fd: RawFd, delay: Duration) -> io::Result<()> {
    let micros = delay.as_micros().max(100) as i64;
    let spec = libc::itimerspec {
        it_interval: libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
        it_value: libc::timespec {
            tv_sec: micros / 1_000_000,
            tv_nsec: (micros % 1_000_000) * 1000,
        },
    };
    let rc = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn read_timerfd(fd: RawFd) -> u64 {
    let mut expirations: u64 = 0;
    unsafe {
        libc::read(
            fd,
            &mut expirations as *mut u64 as *mut libc::c_void,
            size_of::<u64>(),
        )
    };
    expirations
}
