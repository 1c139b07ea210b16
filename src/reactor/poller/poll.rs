//! poll(2) backend, for environments where epoll is undesirable.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;

use crate::reactor::channel::events;

use super::Ready;

fn to_poll_mask(interest: u32) -> libc::c_short {
    let mut mask = 0;
    if interest & events::READABLE != 0 {
        mask |= libc::POLLIN | libc::POLLPRI;
    }
    if interest & events::WRITABLE != 0 {
        mask |= libc::POLLOUT;
    }
    mask
}

fn from_poll_mask(mask: libc::c_short) -> u32 {
    let mut revents = events::NONE;
    if mask & libc::POLLIN != 0 {
        revents |= events::READABLE;
    }
    if mask & libc::POLLPRI != 0 {
        revents |= events::PRIORITY;
    }
    if mask & libc::POLLOUT != 0 {
        revents |= events::WRITABLE;
    }
    if mask & libc::POLLERR != 0 {
        revents |= events::ERROR;
    }
    if mask & libc::POLLHUP != 0 {
        revents |= events::HANGUP;
    }
    if mask & libc::POLLNVAL != 0 {
        revents |= events::INVALID;
    }
    revents
}

pub(crate) struct PollPoller {
    pollfds: Vec<libc::pollfd>,
    /// fd → index into `pollfds`.
    index: HashMap<RawFd, usize>,
    ready: Vec<Ready>,
}

impl PollPoller {
    pub(crate) fn new() -> PollPoller {
        PollPoller {
            pollfds: Vec::new(),
            index: HashMap::new(),
            ready: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        debug_assert!(!self.index.contains_key(&fd));
        self.index.insert(fd, self.pollfds.len());
        self.pollfds.push(libc::pollfd {
            fd,
            events: to_poll_mask(interest),
            revents: 0,
        });
        Ok(())
    }

    pub(crate) fn modify(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        if let Some(&i) = self.index.get(&fd) {
            self.pollfds[i].events = to_poll_mask(interest);
            self.pollfds[i].revents = 0;
        }
        Ok(())
    }

    pub(crate) fn delete(&mut self, fd: RawFd) {
        if let Some(i) = self.index.remove(&fd) {
            self.pollfds.swap_remove(i);
            if i < self.pollfds.len() {
                self.index.insert(self.pollfds[i].fd, i);
            }
        }
    }

    pub(crate) fn wait(&mut self, timeout_ms: i32) -> io::Result<&[Ready]> {
        let n = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
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

        let mut remaining = n as usize;
        for pollfd in &self.pollfds {
            if remaining == 0 {
                break;
            }
            if pollfd.revents != 0 {
                remaining -= 1;
                self.ready.push((pollfd.fd, from_poll_mask(pollfd.revents)));
            }
        }
        Ok(&self.ready)
    }
}
