//! Readiness polling: descriptor→channel map plus a pluggable backend.
//!
//! The registration state machine lives here, keyed off each channel's
//! three-state marker, so both backends inherit identical semantics:
//!
//! - new or deleted channel with interest → register (ADD)
//! - registered channel with empty interest → deregister (DEL), keep in map
//! - registered channel with interest → modify (MOD)
//! - remove → DEL if registered, erase from the map
//!
//! The backend defaults to epoll; setting `BOREALIS_USE_POLL` in the
//! environment selects the poll(2) backend instead.

mod epoll;
mod poll;

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::time::timestamp::Timestamp;
use crate::{error, trace};

use super::channel::{Channel, ChannelState};

use epoll::EpollPoller;
use poll::PollPoller;

/// One readiness report: descriptor plus translated event flags.
pub(crate) type Ready = (RawFd, u32);

enum Backend {
    Epoll(EpollPoller),
    Poll(PollPoller),
}

impl Backend {
    fn add(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        match self {
            Backend::Epoll(b) => b.add(fd, interest),
            Backend::Poll(b) => b.add(fd, interest),
        }
    }

    fn modify(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        match self {
            Backend::Epoll(b) => b.modify(fd, interest),
            Backend::Poll(b) => b.modify(fd, interest),
        }
    }

    fn delete(&mut self, fd: RawFd) {
        match self {
            Backend::Epoll(b) => b.delete(fd),
            Backend::Poll(b) => b.delete(fd),
        }
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<&[Ready]> {
        match self {
            Backend::Epoll(b) => b.wait(timeout_ms),
            Backend::Poll(b) => b.wait(timeout_ms),
        }
    }
}

pub(crate) struct Poller {
    backend: Backend,
    channels: HashMap<RawFd, Rc<Channel>>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Poller> {
        let backend = if std::env::var_os("BOREALIS_USE_POLL").is_some() {
            Backend::Poll(PollPoller::new())
        } else {
            Backend::Epoll(EpollPoller::new()?)
        };
        Ok(Poller {
            backend,
            channels: HashMap::new(),
        })
    }

    /// One wait step: blocks up to `timeout_ms`, fills `active` with the
    /// channels that have pending events, and returns the receive time.
    pub(crate) fn poll(&mut self, timeout_ms: i32, active: &mut Vec<Rc<Channel>>) -> Timestamp {
        match self.backend.wait(timeout_ms) {
            Ok(ready) => {
                for &(fd, revents) in ready {
                    if let Some(channel) = self.channels.get(&fd) {
                        channel.set_revents(revents);
                        active.push(channel.clone());
                    }
                }
            }
            Err(e) => error!("Poller::poll: {e}"),
        }
        Timestamp::now()
    }

    pub(crate) fn update_channel(&mut self, channel: &Rc<Channel>) {
        let fd = channel.fd();
        trace!(
            "poller update fd {} interest {:#x}",
            fd,
            channel.interest()
        );
        match channel.state() {
            ChannelState::New | ChannelState::Deleted => {
                if channel.state() == ChannelState::New {
                    debug_assert!(!self.channels.contains_key(&fd));
                    self.channels.insert(fd, channel.clone());
                } else {
                    debug_assert!(self.channels.contains_key(&fd));
                }
                if !channel.is_none_interest() {
                    if let Err(e) = self.backend.add(fd, channel.interest()) {
                        error!("Poller: register fd {fd}: {e}");
                    } else {
                        channel.set_state(ChannelState::Added);
                    }
                }
            }
            ChannelState::Added => {
                if channel.is_none_interest() {
                    self.backend.delete(fd);
                    channel.set_state(ChannelState::Deleted);
                } else if let Err(e) = self.backend.modify(fd, channel.interest()) {
                    error!("Poller: modify fd {fd}: {e}");
                }
            }
        }
    }

    pub(crate) fn remove_channel(&mut self, channel: &Rc<Channel>) {
        let fd = channel.fd();
        trace!("poller remove fd {fd}");
        debug_assert!(channel.is_none_interest());
        if channel.state() == ChannelState::Added {
            self.backend.delete(fd);
        }
        self.channels.remove(&fd);
        channel.set_state(ChannelState::New);
    }

    pub(crate) fn has_channel(&self, channel: &Rc<Channel>) -> bool {
        self.channels
            .get(&channel.fd())
            .is_some_and(|held| Rc::ptr_eq(held, channel))
    }
}
