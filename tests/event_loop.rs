//! Event loop: affinity, cross-thread posting, timers, pool round-robin.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use borealis::reactor::pool::EventLoopThreadPool;
use borealis::sync::thread::current_tid;
use borealis::{EventLoop, LoopHandle, Timestamp};

/// Spawns a loop on its own thread and hands back its handle.
fn spawn_loop() -> (LoopHandle, std::thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::spawn(move || {
        let event_loop = EventLoop::new();
        tx.send(event_loop.handle()).unwrap();
        event_loop.run();
    });
    (rx.recv().unwrap(), thread)
}

#[test]
fn run_in_loop_executes_on_owning_thread() {
    let (handle, thread) = spawn_loop();
    let caller_tid = current_tid();

    let (tx, rx) = mpsc::channel();
    handle.run_in_loop(move || {
        tx.send(current_tid()).unwrap();
    });
    let loop_tid = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(loop_tid, caller_tid, "task must run on the loop thread");

    handle.quit();
    thread.join().unwrap();
}

#[test]
fn queued_tasks_preserve_order() {
    let (handle, thread) = spawn_loop();

    let (tx, rx) = mpsc::channel();
    for i in 0..16 {
        let tx = tx.clone();
        handle.queue_in_loop(move || {
            tx.send(i).unwrap();
        });
    }
    let received: Vec<i32> = (0..16)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(received, (0..16).collect::<Vec<_>>());

    handle.quit();
    thread.join().unwrap();
}

#[test]
fn quit_from_another_thread_interrupts_the_wait() {
    let (handle, thread) = spawn_loop();
    let started = Instant::now();
    handle.quit();
    thread.join().unwrap();
    // The loop was idle in its poll; quit must not wait out the poll cap.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn timer_firing_order_over_half_a_second() {
    // One-shot at +100 ms, one-shot at +200 ms, and a 50 ms repeater
    // cancelled after its second fire.
    let event_loop = EventLoop::new();
    let (tx, rx) = mpsc::channel::<&'static str>();

    let one_shot_tx = tx.clone();
    event_loop.run_after(Duration::from_millis(100), move || {
        one_shot_tx.send("one-shot-100").unwrap();
    });
    let late_tx = tx.clone();
    event_loop.run_after(Duration::from_millis(200), move || {
        late_tx.send("one-shot-200").unwrap();
    });

    let repeat_id = Rc::new(Cell::new(None));
    let repeat_fires = Rc::new(Cell::new(0u32));
    let repeat_tx = tx.clone();
    let cancel_loop = event_loop.clone();
    let id_slot = repeat_id.clone();
    let fires = repeat_fires.clone();
    let id = event_loop.run_every(Duration::from_millis(50), move || {
        repeat_tx.send("repeat").unwrap();
        fires.set(fires.get() + 1);
        if fires.get() == 2 {
            if let Some(id) = id_slot.get() {
                cancel_loop.cancel(id);
            }
        }
    });
    repeat_id.set(Some(id));

    let quit_loop = event_loop.clone();
    event_loop.run_after(Duration::from_millis(500), move || {
        quit_loop.quit();
    });

    event_loop.run();

    let events: Vec<&str> = rx.try_iter().collect();
    let repeats = events.iter().filter(|&&e| e == "repeat").count();
    assert_eq!(repeats, 2, "repeater cancelled after second fire: {events:?}");
    assert_eq!(events.last(), Some(&"one-shot-200"), "{events:?}");
    assert_eq!(events.first(), Some(&"repeat"), "{events:?}");

    let pos_100 = events.iter().position(|&e| e == "one-shot-100").unwrap();
    let pos_200 = events.iter().position(|&e| e == "one-shot-200").unwrap();
    assert!(pos_100 > 0 && pos_100 < pos_200, "{events:?}");
}

#[test]
fn simultaneous_expirations_fire_in_allocation_order() {
    let event_loop = EventLoop::new();
    let (tx, rx) = mpsc::channel::<u32>();

    // Identical expiration: the sequence id is the tie break.
    let when = Timestamp::now() + Duration::from_millis(50);
    for i in 0..4 {
        let tx = tx.clone();
        event_loop.run_at(when, move || {
            tx.send(i).unwrap();
        });
    }
    let quit_loop = event_loop.clone();
    event_loop.run_after(Duration::from_millis(150), move || {
        quit_loop.quit();
    });
    event_loop.run();

    let fired: Vec<u32> = rx.try_iter().collect();
    assert_eq!(fired, vec![0, 1, 2, 3]);
}

#[test]
fn cancelled_timer_never_fires() {
    let event_loop = EventLoop::new();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let id = event_loop.run_after(Duration::from_millis(50), move || {
        flag.set(true);
    });
    event_loop.cancel(id);

    // Cancelling an already-cancelled or stale id is a no-op.
    event_loop.cancel(id);

    let quit_loop = event_loop.clone();
    event_loop.run_after(Duration::from_millis(150), move || {
        quit_loop.quit();
    });
    event_loop.run();

    assert!(!fired.get(), "cancelled timer must not run");
}

#[test]
fn timer_due_immediately_still_fires() {
    let event_loop = EventLoop::new();
    let (tx, rx) = mpsc::channel();

    event_loop.run_at(Timestamp::now(), move || {
        tx.send(()).unwrap();
    });
    let quit_loop = event_loop.clone();
    event_loop.run_after(Duration::from_millis(100), move || {
        quit_loop.quit();
    });
    event_loop.run();

    rx.try_recv().expect("timer at `now` must have fired");
}

#[test]
fn cross_thread_timer_runs_on_loop_thread() {
    let (handle, thread) = spawn_loop();
    let (tx, rx) = mpsc::channel();

    let timer_handle = handle.clone();
    std::thread::spawn(move || {
        timer_handle.run_after(Duration::from_millis(20), move || {
            tx.send(current_tid()).unwrap();
        });
    })
    .join()
    .unwrap();

    let fired_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(fired_on, current_tid());

    handle.quit();
    thread.join().unwrap();
}

#[test]
fn cross_thread_cancel_suppresses_the_callback() {
    let (handle, thread) = spawn_loop();
    let fired = Arc::new(Mutex::new(false));

    let flag = fired.clone();
    let id = handle.run_after(Duration::from_millis(200), move || {
        *flag.lock().unwrap() = true;
    });
    handle.cancel(id);

    std::thread::sleep(Duration::from_millis(400));
    assert!(!*fired.lock().unwrap());

    handle.quit();
    thread.join().unwrap();
}

#[test]
fn pool_hands_out_loops_round_robin() {
    let base = EventLoop::new();
    let mut pool = EventLoopThreadPool::new(&base, "pool-test");
    pool.set_thread_num(2);
    pool.start(None);

    let tid_of = |handle: &LoopHandle| {
        let (tx, rx) = mpsc::channel();
        handle.run_in_loop(move || {
            tx.send(current_tid()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    };

    let first = pool.get_next_loop();
    let second = pool.get_next_loop();
    let third = pool.get_next_loop();

    let tids = [tid_of(&first), tid_of(&second), tid_of(&third)];
    assert_ne!(tids[0], tids[1], "two pool threads expected");
    assert_eq!(tids[0], tids[2], "round robin must wrap around");
    assert_ne!(tids[0], current_tid());

    for handle in pool.all_loops() {
        handle.quit();
    }
}

#[test]
fn empty_pool_falls_back_to_base_loop() {
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::spawn(move || {
        let base = EventLoop::new();
        let mut pool = EventLoopThreadPool::new(&base, "empty-pool");
        pool.start(None);
        let handle = pool.get_next_loop();
        tx.send((handle, base.handle(), current_tid())).unwrap();
        base.run();
    });

    let (handle, base_handle, base_tid) = rx.recv().unwrap();
    let (tid_tx, tid_rx) = mpsc::channel();
    handle.run_in_loop(move || {
        tid_tx.send(current_tid()).unwrap();
    });
    assert_eq!(tid_rx.recv_timeout(Duration::from_secs(5)).unwrap(), base_tid);

    base_handle.quit();
    thread.join().unwrap();
}
