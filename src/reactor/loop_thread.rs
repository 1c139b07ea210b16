//! A thread whose whole job is running one event loop.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::sync::latch::CountDownLatch;

use super::event_loop::{EventLoop, LoopHandle};

pub type ThreadInitCallback = Arc<dyn Fn(&EventLoop) + Send + Sync>;

/// Owns the thread and the loop running on it. Dropping the owner quits
/// the loop and joins the thread.
pub struct EventLoopThread {
    name: String,
    init: Option<ThreadInitCallback>,
    thread: Option<JoinHandle<()>>,
    handle: Option<LoopHandle>,
}

impl EventLoopThread {
    pub fn new(name: &str, init: Option<ThreadInitCallback>) -> EventLoopThread {
        EventLoopThread {
            name: name.to_string(),
            init,
            thread: None,
            handle: None,
        }
    }

    /// Spawns the thread, waits until its loop exists, and returns the
    /// loop's handle.
    pub fn start_loop(&mut self) -> LoopHandle {
        assert!(self.thread.is_none(), "loop thread started twice");

        let slot: Arc<Mutex<Option<LoopHandle>>> = Arc::new(Mutex::new(None));
        let latch = Arc::new(CountDownLatch::new(1));
        let init = self.init.take();

        let thread_slot = slot.clone();
        let thread_latch = latch.clone();
        let thread = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let event_loop = EventLoop::new();
                if let Some(init) = init {
                    init(&event_loop);
                }
                *thread_slot.lock().unwrap() = Some(event_loop.handle());
                thread_latch.count_down();
                event_loop.run();
            })
            .expect("failed to spawn event loop thread");

        latch.wait();
        let handle = slot.lock().unwrap().take().expect("loop handle published");
        self.thread = Some(thread);
        self.handle = Some(handle.clone());
        handle
    }

    pub fn handle(&self) -> Option<LoopHandle> {
        self.handle.clone()
    }
}

impl Drop for EventLoopThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.quit();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
