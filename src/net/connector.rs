//! Non-blocking connector with exponential-backoff retry.
//!
//! State machine: Disconnected → Connecting → (Connected | back to
//! Disconnected via retry). A connect attempt registers a write-interest
//! channel; on write readiness the real outcome is re-resolved through
//! `SO_ERROR`, because a non-blocking connect reports success and failure
//! the same way. Retryable failures reschedule with doubling delay,
//! 500 ms up to a 30 s cap.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

use crate::reactor::channel::Channel;
use crate::reactor::event_loop::EventLoop;
use crate::{debug, error, info, warn};

use super::socket::Socket;
use super::sys;

const INIT_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Outcome classification for a failed connect attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Transient: worth retrying with backoff (refused, unreachable,
    /// address busy).
    #[error("retryable connect error: {0}")]
    Retryable(io::Error),
    /// Permanent: retrying cannot help (permission, bad descriptor,
    /// wrong family).
    #[error("fatal connect error: {0}")]
    Fatal(io::Error),
}

pub(crate) fn classify(e: io::Error) -> ConnectError {
    match e.raw_os_error() {
        Some(
            libc::EAGAIN
            | libc::EADDRINUSE
            | libc::EADDRNOTAVAIL
            | libc::ECONNREFUSED
            | libc::ENETUNREACH,
        ) => ConnectError::Retryable(e),
        _ => ConnectError::Fatal(e),
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Disconnected,
    Connecting,
    Connected,
}

pub(crate) type NewConnectionCallback = Box<dyn FnMut(Socket)>;

pub(crate) struct Connector {
    event_loop: EventLoop,
    server_addr: SocketAddr,
    connect: Cell<bool>,
    state: Cell<State>,
    retry_delay: Cell<Duration>,
    channel: RefCell<Option<Rc<Channel>>>,
    new_connection_callback: RefCell<Option<NewConnectionCallback>>,
}

impl Connector {
    pub(crate) fn new(event_loop: &EventLoop, server_addr: SocketAddr) -> Rc<Connector> {
        Rc::new(Connector {
            event_loop: event_loop.clone(),
            server_addr,
            connect: Cell::new(false),
            state: Cell::new(State::Disconnected),
            retry_delay: Cell::new(INIT_RETRY_DELAY),
            channel: RefCell::new(None),
            new_connection_callback: RefCell::new(None),
        })
    }

    pub(crate) fn set_new_connection_callback(&self, callback: NewConnectionCallback) {
        *self.new_connection_callback.borrow_mut() = Some(callback);
    }

    pub(crate) fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub(crate) fn start(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        self.connect.set(true);
        self.start_in_loop();
    }

    fn start_in_loop(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        debug_assert_eq!(self.state.get(), State::Disconnected);
        if self.connect.get() {
            self.do_connect();
        } else {
            debug!("Connector to {}: start skipped, stopped", self.server_addr);
        }
    }

    /// Stops retrying; an in-flight attempt is abandoned.
    pub(crate) fn stop(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        self.connect.set(false);
        if self.state.get() == State::Connecting {
            self.state.set(State::Disconnected);
            let fd = self.take_channel_fd();
            self.retry(fd.map(Socket::from_fd));
        }
    }

    /// Resets backoff and reconnects; used after a lost connection.
    pub(crate) fn restart(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        self.state.set(State::Disconnected);
        self.retry_delay.set(INIT_RETRY_DELAY);
        self.connect.set(true);
        self.start_in_loop();
    }

    fn do_connect(self: &Rc<Self>) {
        let socket = match Socket::for_addr(&self.server_addr) {
            Ok(socket) => socket,
            Err(e) => {
                error!("Connector to {}: socket: {e}", self.server_addr);
                return;
            }
        };

        match sys::connect(socket.fd(), &self.server_addr) {
            Ok(()) => self.connecting(socket),
            Err(e) => match e.raw_os_error() {
                Some(libc::EINPROGRESS | libc::EINTR | libc::EISCONN) => self.connecting(socket),
                _ => match classify(e) {
                    ConnectError::Retryable(e) => {
                        debug!("Connector to {}: {e}, will retry", self.server_addr);
                        self.retry(Some(socket));
                    }
                    ConnectError::Fatal(e) => {
                        error!("Connector to {}: {e}, giving up", self.server_addr);
                    }
                },
            },
        }
    }

    /// Parks the pending socket behind a write-interest channel; outcome
    /// arrives as write readiness.
    fn connecting(self: &Rc<Self>, socket: Socket) {
        self.state.set(State::Connecting);
        // The channel only watches the descriptor; ownership is reclaimed
        // in take_channel_fd.
        let channel = Channel::new(&self.event_loop, socket.into_fd());

        let weak = Rc::downgrade(self);
        channel.set_write_callback(move || {
            if let Some(connector) = weak.upgrade() {
                connector.handle_write();
            }
        });
        let weak = Rc::downgrade(self);
        channel.set_error_callback(move || {
            if let Some(connector) = weak.upgrade() {
                connector.handle_error();
            }
        });

        channel.enable_writing();
        *self.channel.borrow_mut() = Some(channel);
    }

    /// Detaches and deregisters the attempt channel, returning the raw
    /// descriptor whose ownership it was watching.
    fn take_channel_fd(&self) -> Option<RawFd> {
        let channel = self.channel.borrow_mut().take()?;
        channel.disable_all();
        channel.remove();
        Some(channel.fd())
    }

    fn handle_write(self: &Rc<Self>) {
        if self.state.get() != State::Connecting {
            debug_assert_eq!(self.state.get(), State::Disconnected);
            return;
        }

        let Some(fd) = self.take_channel_fd() else {
            return;
        };
        let err = sys::socket_error(fd);
        if err != 0 {
            warn!(
                "Connector to {}: SO_ERROR = {} {}",
                self.server_addr,
                err,
                io::Error::from_raw_os_error(err)
            );
            self.retry(Some(Socket::from_fd(fd)));
        } else if sys::is_self_connect(fd) {
            warn!("Connector to {}: self connect", self.server_addr);
            self.retry(Some(Socket::from_fd(fd)));
        } else {
            self.state.set(State::Connected);
            if self.connect.get() {
                let mut callback = self.new_connection_callback.borrow_mut();
                if let Some(callback) = callback.as_mut() {
                    callback(Socket::from_fd(fd));
                }
            } else {
                sys::close(fd);
            }
        }
    }

    fn handle_error(self: &Rc<Self>) {
        if self.state.get() == State::Connecting {
            let Some(fd) = self.take_channel_fd() else {
                return;
            };
            let err = sys::socket_error(fd);
            error!(
                "Connector to {}: SO_ERROR = {} {}",
                self.server_addr,
                err,
                io::Error::from_raw_os_error(err)
            );
            self.retry(Some(Socket::from_fd(fd)));
        }
    }

    /// Closes the failed socket and, if still wanted, schedules the next
    /// attempt with doubled delay.
    fn retry(self: &Rc<Self>, socket: Option<Socket>) {
        drop(socket);
        self.state.set(State::Disconnected);
        if self.connect.get() {
            let delay = self.retry_delay.get();
            info!(
                "Connector: retry connecting to {} in {} ms",
                self.server_addr,
                delay.as_millis()
            );
            let weak = Rc::downgrade(self);
            self.event_loop.run_after(delay, move || {
                if let Some(connector) = weak.upgrade() {
                    if connector.state.get() == State::Disconnected {
                        connector.start_in_loop();
                    }
                }
            });
            self.retry_delay.set((delay * 2).min(MAX_RETRY_DELAY));
        } else {
            debug!("Connector to {}: stopped, not retrying", self.server_addr);
        }
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        // A pending attempt still owns its descriptor through the channel.
        if let Some(channel) = self.channel.borrow_mut().take() {
            channel.disable_all();
            channel.remove();
            sys::close(channel.fd());
        }
    }
}
