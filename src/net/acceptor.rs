//! Listening socket plus its read channel.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::reactor::channel::Channel;
use crate::reactor::event_loop::EventLoop;
use crate::{error, warn};

use super::socket::Socket;
use super::sys;

/// Callback handed each freshly accepted socket and its peer address.
pub(crate) type NewConnectionCallback = Box<dyn FnMut(Socket, SocketAddr)>;

/// Owns the listen socket; on readability accepts until the kernel runs
/// dry and hands each new socket to the server.
///
/// Descriptor exhaustion is absorbed with the idle-descriptor idiom: a
/// placeholder fd (`/dev/null`) is closed to free one slot, the surplus
/// connection is accepted and immediately closed, and the placeholder is
/// reopened — otherwise a full process would spin on a permanently
/// readable listen socket.
pub(crate) struct Acceptor {
    event_loop: EventLoop,
    socket: Socket,
    channel: Rc<Channel>,
    new_connection_callback: RefCell<Option<NewConnectionCallback>>,
    listening: Cell<bool>,
    idle_fd: Cell<RawFd>,
}

impl Acceptor {
    pub(crate) fn new(
        event_loop: &EventLoop,
        listen_addr: &SocketAddr,
        reuse_port: bool,
    ) -> io::Result<Rc<Acceptor>> {
        let socket = Socket::for_addr(listen_addr)?;
        socket.set_reuse_addr(true);
        if reuse_port {
            socket.set_reuse_port(true);
        }
        socket.bind(listen_addr)?;
        let idle_fd = sys::open_idle_fd()?;

        let channel = Channel::new(event_loop, socket.fd());
        let acceptor = Rc::new(Acceptor {
            event_loop: event_loop.clone(),
            socket,
            channel,
            new_connection_callback: RefCell::new(None),
            listening: Cell::new(false),
            idle_fd: Cell::new(idle_fd),
        });

        let weak = Rc::downgrade(&acceptor);
        acceptor.channel.set_read_callback(move |_| {
            if let Some(acceptor) = weak.upgrade() {
                acceptor.handle_read();
            }
        });
        Ok(acceptor)
    }

    pub(crate) fn set_new_connection_callback(&self, callback: NewConnectionCallback) {
        *self.new_connection_callback.borrow_mut() = Some(callback);
    }

    pub(crate) fn listening(&self) -> bool {
        self.listening.get()
    }

    pub(crate) fn listen(self: &Rc<Self>) -> io::Result<()> {
        self.event_loop.assert_in_loop_thread();
        self.socket.listen()?;
        self.listening.set(true);
        self.channel.enable_reading();
        Ok(())
    }

    fn handle_read(self: &Rc<Self>) {
        self.event_loop.assert_in_loop_thread();
        loop {
            match self.socket.accept() {
                Ok((socket, peer)) => {
                    let mut callback = self.new_connection_callback.borrow_mut();
                    if let Some(callback) = callback.as_mut() {
                        callback(socket, peer);
                    }
                    // No callback installed: the socket drops and closes.
                }
                Err(e) => {
                    match e.raw_os_error() {
                        Some(libc::EAGAIN) => {}
                        Some(libc::EMFILE) => {
                            warn!("Acceptor: out of descriptors, shedding one connection");
                            sys::close(self.idle_fd.get());
                            if let Ok((surplus, _)) = self.socket.accept() {
                                drop(surplus);
                            }
                            match sys::open_idle_fd() {
                                Ok(fd) => self.idle_fd.set(fd),
                                Err(e) => error!("Acceptor: reopening idle fd: {e}"),
                            }
                        }
                        _ => error!("Acceptor::handle_read: {e}"),
                    }
                    break;
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.channel.disable_all();
        self.channel.remove();
        sys::close(self.idle_fd.get());
    }
}
