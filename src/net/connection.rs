//! One established TCP connection and its state machine.
//!
//! States: Connecting → Connected → Disconnecting → Disconnected, every
//! transition on the owning loop's thread. The connection owns its socket
//! and channel; the channel holds a weak tie back so a close callback
//! cannot destroy the connection mid-dispatch.
//!
//! # Ownership and cross-thread access
//!
//! Connections are `Rc`-shared within their loop thread and parked in a
//! thread-local registry keyed by a process-unique id. In-loop user code
//! (callbacks) works with [`TcpConnectionRef`] directly. Any other thread
//! goes through a [`ConnectionHandle`], which marshals the operation to
//! the owning loop and resolves the id there — a handle to a connection
//! that has since died resolves to nothing and the operation quietly
//! evaporates, which is exactly the weak-callback semantics wanted for
//! delayed closes.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::reactor::channel::Channel;
use crate::reactor::event_loop::{EventLoop, LoopHandle};
use crate::time::timestamp::Timestamp;
use crate::{debug, error, trace, warn};

use super::buffer::Buffer;
use super::callbacks::{
    CloseCallback, ConnectionCallback, HighWaterMarkCallback, MessageCallback, TcpConnectionRef,
    WriteCompleteCallback, default_connection_callback, default_message_callback,
};
use super::socket::Socket;
use super::sys;

const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

static CONNECTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for the next connection.
pub(crate) fn next_connection_id() -> u64 {
    CONNECTION_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    /// Connections owned by the loop running on this thread.
    static REGISTRY: RefCell<HashMap<u64, TcpConnectionRef>> = RefCell::new(HashMap::new());
}

pub(crate) fn register_connection(conn: &TcpConnectionRef) {
    REGISTRY.with(|registry| registry.borrow_mut().insert(conn.id(), conn.clone()));
}

pub(crate) fn deregister_connection(id: u64) {
    REGISTRY.with(|registry| registry.borrow_mut().remove(&id));
}

pub(crate) fn lookup_connection(id: u64) -> Option<TcpConnectionRef> {
    REGISTRY.with(|registry| registry.borrow().get(&id).cloned())
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

pub struct TcpConnection {
    event_loop: EventLoop,
    name: String,
    id: u64,
    state: Cell<State>,
    reading: Cell<bool>,
    socket: Socket,
    channel: Rc<Channel>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,

    connection_callback: RefCell<ConnectionCallback>,
    message_callback: RefCell<MessageCallback>,
    write_complete_callback: RefCell<Option<WriteCompleteCallback>>,
    high_water_mark_callback: RefCell<Option<HighWaterMarkCallback>>,
    close_callback: RefCell<Option<CloseCallback>>,
    high_water_mark: Cell<usize>,

    input: RefCell<Buffer>,
    output: RefCell<Buffer>,
    context: RefCell<Option<Box<dyn Any>>>,
}

impl TcpConnection {
    pub(crate) fn new(
        event_loop: &EventLoop,
        name: String,
        id: u64,
        socket: Socket,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> TcpConnectionRef {
        let channel = Channel::new(event_loop, socket.fd());
        socket.set_keep_alive(true);

        let conn = Rc::new(TcpConnection {
            event_loop: event_loop.clone(),
            name,
            id,
            state: Cell::new(State::Connecting),
            reading: Cell::new(false),
            socket,
            channel,
            local_addr,
            peer_addr,
            connection_callback: RefCell::new(std::sync::Arc::new(default_connection_callback)),
            message_callback: RefCell::new(std::sync::Arc::new(default_message_callback)),
            write_complete_callback: RefCell::new(None),
            high_water_mark_callback: RefCell::new(None),
            close_callback: RefCell::new(None),
            high_water_mark: Cell::new(DEFAULT_HIGH_WATER_MARK),
            input: RefCell::new(Buffer::new()),
            output: RefCell::new(Buffer::new()),
            context: RefCell::new(None),
        });
        trace!(
            "TcpConnection::new [{}] fd={}",
            conn.name,
            conn.channel.fd()
        );

        let weak = Rc::downgrade(&conn);
        conn.channel.set_read_callback(move |receive_time| {
            if let Some(conn) = weak.upgrade() {
                conn.handle_read(receive_time);
            }
        });
        let weak = Rc::downgrade(&conn);
        conn.channel.set_write_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_write();
            }
        });
        let weak = Rc::downgrade(&conn);
        conn.channel.set_close_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_close();
            }
        });
        let weak = Rc::downgrade(&conn);
        conn.channel.set_error_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_error();
            }
        });

        conn
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn connected(&self) -> bool {
        self.state.get() == State::Connected
    }

    pub fn disconnected(&self) -> bool {
        self.state.get() == State::Disconnected
    }

    pub fn loop_handle(&self) -> LoopHandle {
        self.event_loop.handle()
    }

    /// `Send`-able face of this connection for other threads.
    pub fn handle(self: &Rc<Self>) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            name: self.name.clone(),
            event_loop: self.event_loop.handle(),
        }
    }

    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        *self.connection_callback.borrow_mut() = callback;
    }

    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.message_callback.borrow_mut() = callback;
    }

    pub fn set_write_complete_callback(&self, callback: WriteCompleteCallback) {
        *self.write_complete_callback.borrow_mut() = Some(callback);
    }

    /// Installs the backpressure callback; fired once per crossing of
    /// `mark` queued output bytes.
    pub fn set_high_water_mark_callback(&self, callback: HighWaterMarkCallback, mark: usize) {
        *self.high_water_mark_callback.borrow_mut() = Some(callback);
        self.high_water_mark.set(mark);
    }

    pub(crate) fn set_close_callback(&self, callback: CloseCallback) {
        *self.close_callback.borrow_mut() = Some(callback);
    }

    pub fn set_tcp_no_delay(&self, on: bool) {
        self.socket.set_tcp_no_delay(on);
    }

    /// Stashes an arbitrary per-connection value (protocol state, session
    /// data) in the connection's context slot.
    pub fn set_context<T: 'static>(&self, value: T) {
        *self.context.borrow_mut() = Some(Box::new(value));
    }

    /// Runs `f` with the context value, if one of type `T` is present.
    pub fn with_context<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slot = self.context.borrow_mut();
        slot.as_mut()
            .and_then(|boxed| boxed.downcast_mut::<T>())
            .map(f)
    }

    /// Sends bytes on the owning loop thread. Writes directly when the
    /// output buffer is idle; whatever the kernel does not take is queued
    /// and flushed on write readiness.
    pub fn send(self: &Rc<Self>, data: &[u8]) {
        self.event_loop.assert_in_loop_thread();
        if self.state.get() == State::Connected {
            self.send_in_loop(data);
        } else {
            warn!("TcpConnection::send [{}] not connected, dropped", self.name);
        }
    }

    fn send_in_loop(self: &Rc<Self>, data: &[u8]) {
        if self.state.get() == State::Disconnected {
            warn!("[{}] disconnected, give up writing", self.name);
            return;
        }

        let mut wrote = 0usize;
        let mut fault = false;

        // Idle output: try the kernel first and skip the buffer entirely
        // for the common small-write case.
        if !self.channel.is_writing() && self.output.borrow().readable_bytes() == 0 {
            match sys::write(self.channel.fd(), data) {
                Ok(n) => {
                    wrote = n;
                    if wrote == data.len() {
                        self.queue_write_complete();
                    }
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        error!("TcpConnection::send [{}]: {e}", self.name);
                        if matches!(
                            e.raw_os_error(),
                            Some(libc::EPIPE) | Some(libc::ECONNRESET)
                        ) {
                            fault = true;
                        }
                    }
                }
            }
        }

        if !fault && wrote < data.len() {
            let remaining = data.len() - wrote;
            let old_len = self.output.borrow().readable_bytes();
            let mark = self.high_water_mark.get();
            if old_len + remaining >= mark && old_len < mark {
                if let Some(callback) = self.high_water_mark_callback.borrow().clone() {
                    let conn = self.clone();
                    let queued = old_len + remaining;
                    self.event_loop
                        .queue_in_loop(move || callback(&conn, queued));
                }
            }
            self.output.borrow_mut().append(&data[wrote..]);
            if !self.channel.is_writing() {
                self.channel.enable_writing();
            }
        }
    }

    /// Half-closes the write side once the output buffer drains.
    /// Idempotent; completes asynchronously.
    pub fn shutdown(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if self.state.get() == State::Connected {
            self.state.set(State::Disconnecting);
            if !self.channel.is_writing() {
                self.socket.shutdown_write();
            }
        }
    }

    /// Immediate teardown, skipping the output-drain wait.
    pub fn force_close(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if matches!(self.state.get(), State::Connected | State::Disconnecting) {
            self.state.set(State::Disconnecting);
            let conn = self.clone();
            self.event_loop.queue_in_loop(move || {
                if matches!(conn.state.get(), State::Connected | State::Disconnecting) {
                    conn.handle_close();
                }
            });
        }
    }

    /// [`force_close`](Self::force_close) after `delay`; a connection that
    /// died in the meantime is not resurrected.
    pub fn force_close_with_delay(self: &Rc<Self>, delay: Duration) {
        self.event_loop.assert_in_loop_thread();
        if matches!(self.state.get(), State::Connected | State::Disconnecting) {
            let weak = Rc::downgrade(self);
            self.event_loop.run_after(delay, move || {
                if let Some(conn) = weak.upgrade() {
                    conn.force_close();
                }
            });
        }
    }

    pub fn start_read(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if !self.reading.get() || !self.channel.is_reading() {
            self.channel.enable_reading();
            self.reading.set(true);
        }
    }

    pub fn stop_read(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if self.reading.get() || self.channel.is_reading() {
            self.channel.disable_reading();
            self.reading.set(false);
        }
    }

    /// Queued-but-unsent output bytes.
    pub fn output_bytes(&self) -> usize {
        self.output.borrow().readable_bytes()
    }

    /// Invoked once by the server/client after socket hand-off; completes
    /// the Connecting → Connected transition on the owning loop.
    pub(crate) fn connect_established(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        assert_eq!(self.state.get(), State::Connecting);
        self.state.set(State::Connected);
        self.channel.tie(self);
        self.channel.enable_reading();
        self.reading.set(true);

        let callback = self.connection_callback.borrow().clone();
        callback(self);
    }

    /// Final transition into Disconnected: deregisters the channel and
    /// drops the registry entry. Last step of any teardown path.
    pub(crate) fn connect_destroyed(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if self.state.get() == State::Connected {
            self.state.set(State::Disconnected);
            self.channel.disable_all();
            let callback = self.connection_callback.borrow().clone();
            callback(self);
        }
        self.channel.remove();
        deregister_connection(self.id);
    }

    fn handle_read(self: &Rc<Self>, receive_time: Timestamp) {
        self.event_loop.assert_in_loop_thread();
        let result = self.input.borrow_mut().read_fd(self.channel.fd());
        match result {
            Ok(0) => self.handle_close(),
            Ok(_) => {
                let callback = self.message_callback.borrow().clone();
                let mut input = self.input.borrow_mut();
                callback(self, &mut input, receive_time);
            }
            Err(e) => {
                if !matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) {
                    error!("TcpConnection::handle_read [{}]: {e}", self.name);
                    self.handle_error();
                }
            }
        }
    }

    fn handle_write(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if !self.channel.is_writing() {
            trace!("[{}] is down, no more writing", self.name);
            return;
        }

        let drained = {
            let mut output = self.output.borrow_mut();
            match sys::write(self.channel.fd(), output.peek()) {
                Ok(n) => {
                    output.retrieve(n);
                    output.readable_bytes() == 0
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        error!("TcpConnection::handle_write [{}]: {e}", self.name);
                    }
                    false
                }
            }
        };

        if drained {
            self.channel.disable_writing();
            self.queue_write_complete();
            if self.state.get() == State::Disconnecting {
                self.socket.shutdown_write();
            }
        }
    }

    fn queue_write_complete(self: &Rc<Self>) {
        if let Some(callback) = self.write_complete_callback.borrow().clone() {
            let conn = self.clone();
            self.event_loop.queue_in_loop(move || callback(&conn));
        }
    }

    fn handle_close(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        trace!(
            "TcpConnection::handle_close [{}] state={:?}",
            self.name,
            self.state.get()
        );
        assert!(matches!(
            self.state.get(),
            State::Connected | State::Disconnecting
        ));
        self.state.set(State::Disconnected);
        self.channel.disable_all();

        let guard: TcpConnectionRef = self.clone();
        let callback = self.connection_callback.borrow().clone();
        callback(&guard);
        let close = self.close_callback.borrow().clone();
        if let Some(close) = close {
            close(&guard);
        }
    }

    fn handle_error(&self) {
        let err = sys::socket_error(self.channel.fd());
        error!(
            "TcpConnection::handle_error [{}] SO_ERROR = {} {}",
            self.name,
            err,
            io::Error::from_raw_os_error(err)
        );
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        debug!(
            "TcpConnection::drop [{}] fd={} state={:?}",
            self.name,
            self.channel.fd(),
            self.state.get()
        );
    }
}

/// Cross-thread handle to a connection; every operation marshals to the
/// owning loop and resolves the connection there.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    name: String,
    event_loop: LoopHandle,
}

impl ConnectionHandle {
    pub(crate) fn internal_new(id: u64, name: String, event_loop: LoopHandle) -> ConnectionHandle {
        ConnectionHandle {
            id,
            name,
            event_loop,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends a copy of `data`; a no-op if the connection is gone.
    pub fn send(&self, data: impl Into<Vec<u8>>) {
        let id = self.id;
        let data = data.into();
        self.event_loop.run_in_loop(move || {
            if let Some(conn) = lookup_connection(id) {
                conn.send(&data);
            }
        });
    }

    pub fn shutdown(&self) {
        let id = self.id;
        self.event_loop.run_in_loop(move || {
            if let Some(conn) = lookup_connection(id) {
                conn.shutdown();
            }
        });
    }

    pub fn force_close(&self) {
        let id = self.id;
        self.event_loop.run_in_loop(move || {
            if let Some(conn) = lookup_connection(id) {
                conn.force_close();
            }
        });
    }

    pub fn force_close_with_delay(&self, delay: Duration) {
        let id = self.id;
        self.event_loop.run_in_loop(move || {
            if let Some(conn) = lookup_connection(id) {
                conn.force_close_with_delay(delay);
            }
        });
    }

    /// Tears the connection down on its loop; used by server/client
    /// shutdown paths.
    pub(crate) fn destroy(&self) {
        let id = self.id;
        self.event_loop.run_in_loop(move || {
            if let Some(conn) = lookup_connection(id) {
                conn.connect_destroyed();
            }
        });
    }
}
