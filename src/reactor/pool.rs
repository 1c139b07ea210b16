//! Pool of event-loop threads with round-robin hand-out.

use crate::debug;

use super::event_loop::{EventLoop, LoopHandle};
use super::loop_thread::{EventLoopThread, ThreadInitCallback};

/// Spawns N loops on N named threads. With N = 0 every request falls back
/// to the base loop, which keeps single-threaded servers trivial.
///
/// Lives on (and is only touched from) the base loop's thread.
pub struct EventLoopThreadPool {
    base: EventLoop,
    name: String,
    started: bool,
    num_threads: usize,
    next: usize,
    threads: Vec<EventLoopThread>,
    loops: Vec<LoopHandle>,
}

impl EventLoopThreadPool {
    pub fn new(base: &EventLoop, name: &str) -> EventLoopThreadPool {
        EventLoopThreadPool {
            base: base.clone(),
            name: name.to_string(),
            started: false,
            num_threads: 0,
            next: 0,
            threads: Vec::new(),
            loops: Vec::new(),
        }
    }

    pub fn set_thread_num(&mut self, num_threads: usize) {
        debug!("pool {} thread count set to {}", self.name, num_threads);
        self.num_threads = num_threads;
    }

    pub fn start(&mut self, init: Option<ThreadInitCallback>) {
        assert!(!self.started, "pool started twice");
        self.base.assert_in_loop_thread();
        self.started = true;

        for i in 0..self.num_threads {
            let mut thread =
                EventLoopThread::new(&format!("{}{}", self.name, i), init.clone());
            self.loops.push(thread.start_loop());
            self.threads.push(thread);
        }
        if self.num_threads == 0 {
            if let Some(init) = init {
                init(&self.base);
            }
        }
    }

    /// Next loop, round-robin; the base loop when the pool is empty.
    pub fn get_next_loop(&mut self) -> LoopHandle {
        self.base.assert_in_loop_thread();
        assert!(self.started);
        if self.loops.is_empty() {
            self.base.handle()
        } else {
            let handle = self.loops[self.next].clone();
            self.next = (self.next + 1) % self.loops.len();
            handle
        }
    }

    /// Stable assignment: the same hash always lands on the same loop.
    pub fn get_loop_for_hash(&self, hash: usize) -> LoopHandle {
        self.base.assert_in_loop_thread();
        if self.loops.is_empty() {
            self.base.handle()
        } else {
            self.loops[hash % self.loops.len()].clone()
        }
    }

    pub fn all_loops(&self) -> Vec<LoopHandle> {
        if self.loops.is_empty() {
            vec![self.base.handle()]
        } else {
            self.loops.clone()
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
