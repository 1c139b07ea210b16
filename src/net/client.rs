//! TCP client: a connector plus at most one live connection.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use crate::reactor::event_loop::EventLoop;
use crate::{error, info};

use super::callbacks::{
    ConnectionCallback, MessageCallback, TcpConnectionRef, WriteCompleteCallback,
    default_connection_callback, default_message_callback,
};
use super::connection::{
    TcpConnection, lookup_connection, next_connection_id, register_connection,
};
use super::socket::Socket;
use super::sys;

struct ClientInner {
    event_loop: EventLoop,
    connector: Rc<super::connector::Connector>,
    name: String,
    connection_callback: RefCell<ConnectionCallback>,
    message_callback: RefCell<MessageCallback>,
    write_complete_callback: RefCell<Option<WriteCompleteCallback>>,
    retry: Cell<bool>,
    connect: Cell<bool>,
    next_conn_id: Cell<u64>,
    connection: RefCell<Option<TcpConnectionRef>>,
}

/// Client bound to the loop it was created on; connect, disconnect and
/// stop are loop-thread operations (marshal through the loop's handle from
/// elsewhere).
pub struct TcpClient {
    inner: Rc<ClientInner>,
}

impl TcpClient {
    pub fn new(event_loop: &EventLoop, server_addr: SocketAddr, name: &str) -> TcpClient {
        let inner = Rc::new(ClientInner {
            event_loop: event_loop.clone(),
            connector: super::connector::Connector::new(event_loop, server_addr),
            name: name.to_string(),
            connection_callback: RefCell::new(Arc::new(default_connection_callback)),
            message_callback: RefCell::new(Arc::new(default_message_callback)),
            write_complete_callback: RefCell::new(None),
            retry: Cell::new(false),
            connect: Cell::new(false),
            next_conn_id: Cell::new(1),
            connection: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        inner
            .connector
            .set_new_connection_callback(Box::new(move |socket| {
                if let Some(inner) = weak.upgrade() {
                    ClientInner::new_connection(&inner, socket);
                }
            }));

        TcpClient { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.inner.connector.server_addr()
    }

    /// Reconnect automatically after a lost (not refused) connection.
    pub fn enable_retry(&self) {
        self.inner.retry.set(true);
    }

    pub fn retry_enabled(&self) -> bool {
        self.inner.retry.get()
    }

    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        *self.inner.connection_callback.borrow_mut() = callback;
    }

    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.inner.message_callback.borrow_mut() = callback;
    }

    pub fn set_write_complete_callback(&self, callback: WriteCompleteCallback) {
        *self.inner.write_complete_callback.borrow_mut() = Some(callback);
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<TcpConnectionRef> {
        self.inner.connection.borrow().clone()
    }

    pub fn connect(&self) {
        info!(
            "TcpClient [{}] connecting to {}",
            self.inner.name,
            self.inner.connector.server_addr()
        );
        self.inner.connect.set(true);
        self.inner.connector.start();
    }

    /// Graceful: half-closes the current connection once its output
    /// drains; no reconnect.
    pub fn disconnect(&self) {
        self.inner.connect.set(false);
        if let Some(conn) = self.inner.connection.borrow().clone() {
            conn.shutdown();
        }
    }

    /// Abandons connecting/retrying without touching an established
    /// connection.
    pub fn stop(&self) {
        self.inner.connect.set(false);
        self.inner.connector.stop();
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.inner.connector.stop();
        if let Some(conn) = self.inner.connection.borrow_mut().take() {
            let id = conn.id();
            self.inner.event_loop.queue_in_loop(move || {
                if let Some(conn) = lookup_connection(id) {
                    conn.connect_destroyed();
                }
            });
        }
    }
}

impl ClientInner {
    fn new_connection(inner: &Rc<ClientInner>, socket: Socket) {
        inner.event_loop.assert_in_loop_thread();

        let peer = match sys::peer_addr(socket.fd()) {
            Ok(addr) => addr,
            Err(e) => {
                error!("TcpClient [{}]: getpeername: {e}", inner.name);
                return;
            }
        };
        let local = match sys::local_addr(socket.fd()) {
            Ok(addr) => addr,
            Err(e) => {
                error!("TcpClient [{}]: getsockname: {e}", inner.name);
                return;
            }
        };

        let seq = inner.next_conn_id.get();
        inner.next_conn_id.set(seq + 1);
        let conn_name = format!("{}:{}#{}", inner.name, peer, seq);
        let id = next_connection_id();

        let conn = TcpConnection::new(&inner.event_loop, conn_name, id, socket, local, peer);
        conn.set_connection_callback(inner.connection_callback.borrow().clone());
        conn.set_message_callback(inner.message_callback.borrow().clone());
        if let Some(write_complete) = inner.write_complete_callback.borrow().clone() {
            conn.set_write_complete_callback(write_complete);
        }
        let weak = Rc::downgrade(inner);
        conn.set_close_callback(Rc::new(move |conn: &TcpConnectionRef| {
            if let Some(inner) = weak.upgrade() {
                ClientInner::remove_connection(&inner, conn);
            }
        }));

        register_connection(&conn);
        *inner.connection.borrow_mut() = Some(conn.clone());
        conn.connect_established();
    }

    fn remove_connection(inner: &Rc<ClientInner>, conn: &TcpConnectionRef) {
        inner.event_loop.assert_in_loop_thread();
        *inner.connection.borrow_mut() = None;

        let id = conn.id();
        inner.event_loop.queue_in_loop(move || {
            if let Some(conn) = lookup_connection(id) {
                conn.connect_destroyed();
            }
        });

        if inner.retry.get() && inner.connect.get() {
            info!(
                "TcpClient [{}] reconnecting to {}",
                inner.name,
                inner.connector.server_addr()
            );
            inner.connector.restart();
        }
    }
}
