//! Channel: one descriptor's binding to its loop.
//!
//! A channel pairs a file descriptor (which it does not own) with an
//! interest mask and per-event callbacks, and mediates every poller update
//! for that descriptor. Channels are loop-affine: all mutation happens on
//! the owning loop's thread, which is why the mutable bits are plain
//! `Cell`s rather than locks.
//!
//! A channel can *tie* itself to a shared owner (typically the TCP
//! connection that holds it). Dispatch then upgrades the weak tie and keeps
//! the owner alive for the duration of the callbacks, so a connection
//! cannot be destroyed mid-dispatch by its own close handler.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

use crate::time::timestamp::Timestamp;
use crate::{trace, warn};

use super::event_loop::{EventLoop, LoopCore};

/// Platform-neutral readiness flags; poller backends translate these to and
/// from epoll/poll masks.
pub(crate) mod events {
    pub const NONE: u32 = 0;
    pub const READABLE: u32 = 1 << 0;
    pub const WRITABLE: u32 = 1 << 1;
    pub const PRIORITY: u32 = 1 << 2;
    pub const ERROR: u32 = 1 << 3;
    pub const HANGUP: u32 = 1 << 4;
    pub const INVALID: u32 = 1 << 5;
}

/// Registration marker maintained by the poller layer. Keeping it in the
/// channel makes re-registration idempotent across interest-mask churn.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ChannelState {
    New,
    Added,
    Deleted,
}

type ReadCallback = Rc<dyn Fn(Timestamp)>;
type EventCallback = Rc<dyn Fn()>;

pub struct Channel {
    fd: RawFd,
    owner: Weak<LoopCore>,
    interest: Cell<u32>,
    revents: Cell<u32>,
    state: Cell<ChannelState>,
    handling: Cell<bool>,
    tied: Cell<bool>,
    tie: RefCell<Option<Weak<dyn Any>>>,
    read_callback: RefCell<Option<ReadCallback>>,
    write_callback: RefCell<Option<EventCallback>>,
    close_callback: RefCell<Option<EventCallback>>,
    error_callback: RefCell<Option<EventCallback>>,
}

impl Channel {
    pub(crate) fn new(event_loop: &EventLoop, fd: RawFd) -> Rc<Channel> {
        Rc::new(Channel {
            fd,
            owner: event_loop.downgrade_core(),
            interest: Cell::new(events::NONE),
            revents: Cell::new(events::NONE),
            state: Cell::new(ChannelState::New),
            handling: Cell::new(false),
            tied: Cell::new(false),
            tie: RefCell::new(None),
            read_callback: RefCell::new(None),
            write_callback: RefCell::new(None),
            close_callback: RefCell::new(None),
            error_callback: RefCell::new(None),
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn interest(&self) -> u32 {
        self.interest.get()
    }

    pub(crate) fn is_none_interest(&self) -> bool {
        self.interest.get() == events::NONE
    }

    pub(crate) fn is_writing(&self) -> bool {
        self.interest.get() & events::WRITABLE != 0
    }

    pub(crate) fn is_reading(&self) -> bool {
        self.interest.get() & events::READABLE != 0
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.state.set(state);
    }

    pub(crate) fn set_revents(&self, revents: u32) {
        self.revents.set(revents);
    }

    pub(crate) fn set_read_callback(&self, callback: impl Fn(Timestamp) + 'static) {
        *self.read_callback.borrow_mut() = Some(Rc::new(callback));
    }

    pub(crate) fn set_write_callback(&self, callback: impl Fn() + 'static) {
        *self.write_callback.borrow_mut() = Some(Rc::new(callback));
    }

    pub(crate) fn set_close_callback(&self, callback: impl Fn() + 'static) {
        *self.close_callback.borrow_mut() = Some(Rc::new(callback));
    }

    pub(crate) fn set_error_callback(&self, callback: impl Fn() + 'static) {
        *self.error_callback.borrow_mut() = Some(Rc::new(callback));
    }

    /// Ties this channel to the shared object that owns it. Dispatch holds
    /// a strong reference to the tie for its duration.
    pub(crate) fn tie<T: 'static>(&self, owner: &Rc<T>) {
        let erased: Rc<dyn Any> = owner.clone();
        *self.tie.borrow_mut() = Some(Rc::downgrade(&erased));
        self.tied.set(true);
    }

    pub(crate) fn enable_reading(self: &Rc<Self>) {
        self.interest.set(self.interest.get() | events::READABLE);
        self.update();
    }

    pub(crate) fn disable_reading(self: &Rc<Self>) {
        self.interest.set(self.interest.get() & !events::READABLE);
        self.update();
    }

    pub(crate) fn enable_writing(self: &Rc<Self>) {
        self.interest.set(self.interest.get() | events::WRITABLE);
        self.update();
    }

    pub(crate) fn disable_writing(self: &Rc<Self>) {
        self.interest.set(self.interest.get() & !events::WRITABLE);
        self.update();
    }

    pub(crate) fn disable_all(self: &Rc<Self>) {
        self.interest.set(events::NONE);
        self.update();
    }

    fn update(self: &Rc<Self>) {
        if let Some(core) = self.owner.upgrade() {
            EventLoop::from_core(core).update_channel(self);
        }
    }

    /// Deregisters from the poller. Interest must already be cleared.
    pub(crate) fn remove(self: &Rc<Self>) {
        assert!(self.is_none_interest());
        if let Some(core) = self.owner.upgrade() {
            EventLoop::from_core(core).remove_channel(self);
        }
    }

    /// Demultiplexes the poller-supplied revents into callbacks, guarding
    /// the tied owner against destruction while they run.
    pub(crate) fn handle_event(self: &Rc<Self>, receive_time: Timestamp) {
        if self.tied.get() {
            let guard = self
                .tie
                .borrow()
                .as_ref()
                .and_then(|weak| weak.upgrade());
            if let Some(_guard) = guard {
                self.handle_event_with_guard(receive_time);
            }
            // Owner already gone: the event is stale, drop it.
        } else {
            self.handle_event_with_guard(receive_time);
        }
    }

    fn handle_event_with_guard(self: &Rc<Self>, receive_time: Timestamp) {
        self.handling.set(true);
        let revents = self.revents.get();

        if revents & events::HANGUP != 0 && revents & events::READABLE == 0 {
            trace!("fd {} hang up with no data pending", self.fd);
            self.run_callback(&self.close_callback);
        }
        if revents & events::INVALID != 0 {
            warn!("fd {} polled while invalid", self.fd);
        }
        if revents & (events::ERROR | events::INVALID) != 0 {
            self.run_callback(&self.error_callback);
        }
        if revents & (events::READABLE | events::PRIORITY) != 0 {
            let callback = self.read_callback.borrow().clone();
            if let Some(callback) = callback {
                callback(receive_time);
            }
        }
        if revents & events::WRITABLE != 0 {
            self.run_callback(&self.write_callback);
        }

        self.handling.set(false);
    }

    fn run_callback(&self, slot: &RefCell<Option<EventCallback>>) {
        // Clone out of the cell first: a callback may replace callbacks.
        let callback = slot.borrow().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}
