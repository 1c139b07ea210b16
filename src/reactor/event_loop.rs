//! The reactor loop: one per thread, the single serialization point for
//! every channel, timer and pending functor bound to that thread.
//!
//! # Two faces
//!
//! [`EventLoop`] is the in-thread face: `!Send`, cheap to clone, created on
//! the thread that will run it. [`LoopHandle`] is the cross-thread face:
//! `Send + Sync`, obtained from [`EventLoop::handle`], carrying only what
//! other threads may touch — the functor queue, the wake-up descriptor and
//! the quit flag. `run_in_loop` on a handle executes inline when already on
//! the loop thread and marshals otherwise, so callers never care where they
//! run from.
//!
//! # Loop step
//!
//! Block in the poller (timer deadlines arrive through a timerfd channel,
//! so a plain 10 s cap suffices) → dispatch every ready channel → drain the
//! pending functors. Functors are drained swap-then-iterate: user code
//! never runs under the queue lock, and anything enqueued *during* the
//! drain wakes the loop for the next step instead of being looped over
//! forever.

use std::cell::{Cell, OnceCell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::sync::thread;
use crate::time::timestamp::Timestamp;
use crate::trace;

use super::channel::Channel;
use super::context;
use super::poller::Poller;
use super::sys;
use super::timer::{self, Timer, TimerId, TimerQueue};

const POLL_TIMEOUT_MS: i32 = 10_000;

type Task = Box<dyn FnOnce() + Send>;
type LocalTask = Box<dyn FnOnce()>;

/// The `Send + Sync` part of a loop, shared with every handle.
pub(crate) struct LoopShared {
    tid: libc::pid_t,
    quit: AtomicBool,
    wakeup_fd: std::os::fd::RawFd,
    pending: Mutex<Vec<Task>>,
    calling_pending: AtomicBool,
}

impl LoopShared {
    fn is_in_loop_thread(&self) -> bool {
        thread::current_tid() == self.tid
    }

    fn wakeup(&self) {
        if let Err(e) = sys::write_eventfd(self.wakeup_fd) {
            crate::error!("EventLoop::wakeup: {e}");
        }
    }
}

impl Drop for LoopShared {
    fn drop(&mut self) {
        sys::close(self.wakeup_fd);
    }
}

/// Loop-thread-only state.
pub(crate) struct LoopCore {
    shared: Arc<LoopShared>,
    poller: RefCell<Poller>,
    timers: RefCell<TimerQueue>,
    wakeup_channel: OnceCell<Rc<Channel>>,
    timer_channel: OnceCell<Rc<Channel>>,
    local_pending: RefCell<Vec<LocalTask>>,
    looping: Cell<bool>,
    event_handling: Cell<bool>,
    iteration: Cell<u64>,
}

/// A reactor bound to the thread that created it.
#[derive(Clone)]
pub struct EventLoop {
    core: Rc<LoopCore>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Creates the loop on the calling thread and latches that thread as
    /// its owner. Panics if this thread already runs a loop, or if the
    /// kernel facilities (epoll/eventfd/timerfd) cannot be created.
    pub fn new() -> EventLoop {
        let shared = Arc::new(LoopShared {
            tid: thread::current_tid(),
            quit: AtomicBool::new(false),
            wakeup_fd: sys::eventfd().expect("eventfd failed"),
            pending: Mutex::new(Vec::new()),
            calling_pending: AtomicBool::new(false),
        });
        let core = Rc::new(LoopCore {
            shared,
            poller: RefCell::new(Poller::new().expect("poller creation failed")),
            timers: RefCell::new(TimerQueue::new().expect("timerfd failed")),
            wakeup_channel: OnceCell::new(),
            timer_channel: OnceCell::new(),
            local_pending: RefCell::new(Vec::new()),
            looping: Cell::new(false),
            event_handling: Cell::new(false),
            iteration: Cell::new(0),
        });
        context::claim_current_thread(&core);

        let event_loop = EventLoop { core };
        trace!(
            "EventLoop created on thread {}",
            thread::current_tid()
        );

        let wakeup = Channel::new(&event_loop, event_loop.core.shared.wakeup_fd);
        let weak = Rc::downgrade(&event_loop.core);
        wakeup.set_read_callback(move |_| {
            if let Some(core) = weak.upgrade() {
                let _ = sys::read_eventfd(core.shared.wakeup_fd);
            }
        });
        wakeup.enable_reading();
        let _ = event_loop.core.wakeup_channel.set(wakeup);

        let timer_fd = event_loop.core.timers.borrow().fd();
        let timer_channel = Channel::new(&event_loop, timer_fd);
        let weak = Rc::downgrade(&event_loop.core);
        timer_channel.set_read_callback(move |_| {
            if let Some(core) = weak.upgrade() {
                EventLoop::from_core(core).handle_expired_timers();
            }
        });
        timer_channel.enable_reading();
        let _ = event_loop.core.timer_channel.set(timer_channel);

        event_loop
    }

    pub(crate) fn from_core(core: Rc<LoopCore>) -> EventLoop {
        EventLoop { core }
    }

    pub(crate) fn downgrade_core(&self) -> Weak<LoopCore> {
        Rc::downgrade(&self.core)
    }

    /// The loop constructed on the calling thread, if any.
    pub fn current() -> Option<EventLoop> {
        context::current_loop()
    }

    /// Runs until [`quit`](Self::quit). Must be called from the owning
    /// thread.
    pub fn run(&self) {
        self.assert_in_loop_thread();
        assert!(!self.core.looping.get(), "EventLoop::run reentered");
        self.core.looping.set(true);
        self.core.shared.quit.store(false, Ordering::Release);
        trace!("EventLoop start looping");

        let mut active: Vec<Rc<Channel>> = Vec::new();
        while !self.core.shared.quit.load(Ordering::Acquire) {
            active.clear();
            let receive_time = self
                .core
                .poller
                .borrow_mut()
                .poll(POLL_TIMEOUT_MS, &mut active);
            self.core.iteration.set(self.core.iteration.get() + 1);

            self.core.event_handling.set(true);
            for channel in &active {
                channel.handle_event(receive_time);
            }
            self.core.event_handling.set(false);

            self.do_pending_functors();
        }

        trace!("EventLoop stop looping");
        self.core.looping.set(false);
    }

    /// Signals the loop to exit after the current step. From the loop
    /// thread this takes effect at the next iteration check; a
    /// [`LoopHandle::quit`] from elsewhere also wakes the loop.
    pub fn quit(&self) {
        self.core.shared.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.core.shared.wakeup();
        }
    }

    /// Cross-thread face of this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: self.core.shared.clone(),
        }
    }

    /// Executes `task` now: an `EventLoop` reference only exists on its
    /// owning thread.
    pub fn run_in_loop(&self, task: impl FnOnce() + 'static) {
        self.assert_in_loop_thread();
        task();
    }

    /// Defers `task` to the end of the current (or next) loop step. Unlike
    /// the handle's version, no `Send` bound: the task never changes
    /// threads.
    pub fn queue_in_loop(&self, task: impl FnOnce() + 'static) {
        self.core.local_pending.borrow_mut().push(Box::new(task));
        if self.core.shared.calling_pending.load(Ordering::Acquire) {
            self.core.shared.wakeup();
        }
    }

    pub fn run_at(&self, when: Timestamp, callback: impl FnMut() + 'static) -> TimerId {
        self.assert_in_loop_thread();
        let id = timer::next_sequence();
        self.schedule(id, when, None, Box::new(callback));
        TimerId(id)
    }

    pub fn run_after(&self, delay: Duration, callback: impl FnMut() + 'static) -> TimerId {
        self.run_at(Timestamp::now() + delay, callback)
    }

    pub fn run_every(&self, interval: Duration, callback: impl FnMut() + 'static) -> TimerId {
        self.assert_in_loop_thread();
        let id = timer::next_sequence();
        self.schedule(id, Timestamp::now() + interval, Some(interval), Box::new(callback));
        TimerId(id)
    }

    /// Cancels a timer. A stale id (already fired, non-repeating) is a
    /// no-op.
    pub fn cancel(&self, id: TimerId) {
        self.assert_in_loop_thread();
        self.core.timers.borrow_mut().cancel(id);
    }

    pub(crate) fn schedule(
        &self,
        sequence: u64,
        expiration: Timestamp,
        interval: Option<Duration>,
        callback: Box<dyn FnMut()>,
    ) {
        self.core.timers.borrow_mut().insert(Timer {
            sequence,
            expiration,
            interval,
            callback,
        });
    }

    fn handle_expired_timers(&self) {
        let now = Timestamp::now();
        // Callbacks run with no borrow on the queue so they can freely
        // schedule and cancel.
        let mut expired = self.core.timers.borrow_mut().take_expired(now);
        for timer in &mut expired {
            (timer.callback)();
        }
        self.core
            .timers
            .borrow_mut()
            .restore(expired, Timestamp::now());
    }

    fn do_pending_functors(&self) {
        self.core
            .shared
            .calling_pending
            .store(true, Ordering::Release);

        let local: Vec<LocalTask> = std::mem::take(&mut *self.core.local_pending.borrow_mut());
        let cross: Vec<Task> = std::mem::take(&mut *self.core.shared.pending.lock().unwrap());
        for task in local {
            task();
        }
        for task in cross {
            task();
        }

        self.core
            .shared
            .calling_pending
            .store(false, Ordering::Release);
    }

    pub(crate) fn update_channel(&self, channel: &Rc<Channel>) {
        self.assert_in_loop_thread();
        self.core.poller.borrow_mut().update_channel(channel);
    }

    pub(crate) fn remove_channel(&self, channel: &Rc<Channel>) {
        self.assert_in_loop_thread();
        self.core.poller.borrow_mut().remove_channel(channel);
    }

    #[allow(dead_code)]
    pub(crate) fn has_channel(&self, channel: &Rc<Channel>) -> bool {
        self.core.poller.borrow().has_channel(channel)
    }

    pub fn is_in_loop_thread(&self) -> bool {
        self.core.shared.is_in_loop_thread()
    }

    pub fn assert_in_loop_thread(&self) {
        assert!(
            self.is_in_loop_thread(),
            "EventLoop owned by thread {} touched from thread {}",
            self.core.shared.tid,
            thread::current_tid()
        );
    }

    /// Completed loop steps, mostly useful in tests.
    pub fn iteration(&self) -> u64 {
        self.core.iteration.get()
    }
}

/// Cross-thread handle to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    pub fn is_in_loop_thread(&self) -> bool {
        self.shared.is_in_loop_thread()
    }

    /// Runs `task` inline when called on the loop thread, otherwise queues
    /// it and wakes the loop. Tasks queued before a wake are drained in
    /// that wake's iteration.
    pub fn run_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            task();
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Always queues, waking the loop unless it will reach the drain on
    /// its own (same thread, outside the drain itself).
    pub fn queue_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.pending.lock().unwrap().push(Box::new(task));
        if !self.is_in_loop_thread() || self.shared.calling_pending.load(Ordering::Acquire) {
            self.shared.wakeup();
        }
    }

    pub fn quit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.shared.wakeup();
        }
    }

    pub fn run_at(&self, when: Timestamp, callback: impl FnMut() + Send + 'static) -> TimerId {
        let id = timer::next_sequence();
        self.run_in_loop(move || {
            if let Some(event_loop) = EventLoop::current() {
                event_loop.schedule(id, when, None, Box::new(callback));
            }
        });
        TimerId(id)
    }

    pub fn run_after(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.run_at(Timestamp::now() + delay, callback)
    }

    pub fn run_every(&self, interval: Duration, callback: impl FnMut() + Send + 'static) -> TimerId {
        let id = timer::next_sequence();
        self.run_in_loop(move || {
            if let Some(event_loop) = EventLoop::current() {
                event_loop.schedule(
                    id,
                    Timestamp::now() + interval,
                    Some(interval),
                    Box::new(callback),
                );
            }
        });
        TimerId(id)
    }

    /// Cancels a timer from any thread; marshalled to the owning loop.
    pub fn cancel(&self, id: TimerId) {
        self.run_in_loop(move || {
            if let Some(event_loop) = EventLoop::current() {
                event_loop.cancel(id);
            }
        });
    }
}
