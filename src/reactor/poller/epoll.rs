//! epoll(7) backend.

use std::io;
use std::os::fd::RawFd;

use crate::reactor::channel::events;
use crate::reactor::sys;

use super::Ready;

const INITIAL_EVENT_CAPACITY: usize = 16;

fn to_epoll_mask(interest: u32) -> u32 {
    let mut mask = 0;
    if interest & events::READABLE != 0 {
        mask |= (libc::EPOLLIN | libc::EPOLLPRI) as u32;
    }
    if interest & events::WRITABLE != 0 {
        mask |= libc::EPOLLOUT as u32;
    }
    mask
}

fn from_epoll_mask(mask: u32) -> u32 {
    let mut revents = events::NONE;
    if mask & libc::EPOLLIN as u32 != 0 {
        revents |= events::READABLE;
    }
    if mask & libc::EPOLLPRI as u32 != 0 {
        revents |= events::PRIORITY;
    }
    if mask & libc::EPOLLOUT as u32 != 0 {
        revents |= events::WRITABLE;
    }
    if mask & libc::EPOLLERR as u32 != 0 {
        revents |= events::ERROR;
    }
    if mask & libc::EPOLLHUP as u32 != 0 {
        revents |= events::HANGUP;
    }
    revents
}

pub(crate) struct EpollPoller {
    epoll_fd: RawFd,
    events: Vec<libc::epoll_event>,
    ready: Vec<Ready>,
}

impl EpollPoller {
    pub(crate) fn new() -> io::Result<EpollPoller> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EpollPoller {
            epoll_fd,
            events: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            ready: Vec::new(),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: to_epoll_mask(interest),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn add(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    pub(crate) fn modify(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    pub(crate) fn delete(&mut self, fd: RawFd) {
        unsafe {
            libc::epoll_ctl(
                self.epoll_fd,
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            );
        }
    }

    pub(crate) fn wait(&mut self, timeout_ms: i32) -> io::Result<&[Ready]> {
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        self.ready.clear();
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(&self.ready);
            }
            return Err(err);
        }

        let n = n as usize;
        unsafe { self.events.set_len(n) };
        for event in &self.events {
            self.ready.push((event.u64 as RawFd, from_epoll_mask(event.events)));
        }

        // A full buffer suggests more events were pending; grow for the
        // next round.
        if n == self.events.capacity() {
            self.events.reserve(n);
        }
        Ok(&self.ready)
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        sys::close(self.epoll_fd);
    }
}
