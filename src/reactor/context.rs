//! Thread-local handle to the loop running on the current thread.
//!
//! Installed when an [`EventLoop`] is constructed and used by components
//! that need "my loop" without threading a handle through every API —
//! notably cross-thread tasks that resolve connection ids after being
//! marshalled onto the right thread.
//!
//! The slot holds a weak reference so a dropped loop does not linger and a
//! thread can host another loop afterwards (never two at once).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::event_loop::{EventLoop, LoopCore};

thread_local! {
    static CURRENT_LOOP: RefCell<Option<Weak<LoopCore>>> = const { RefCell::new(None) };
}

/// Claims the current thread for `core`. Panics if a live loop already owns
/// this thread: one loop per thread is the whole model.
pub(crate) fn claim_current_thread(core: &Rc<LoopCore>) {
    CURRENT_LOOP.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(
            slot.as_ref().and_then(Weak::upgrade).is_none(),
            "another EventLoop already exists on this thread"
        );
        *slot = Some(Rc::downgrade(core));
    });
}

/// The loop constructed on the calling thread, if it is still alive.
pub(crate) fn current_loop() -> Option<EventLoop> {
    CURRENT_LOOP.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(EventLoop::from_core)
    })
}
