//! TCP server: acceptor on the base loop, a loop pool for connections, and
//! the name-indexed connection map.
//!
//! Accepted sockets are handed to the next pool loop round-robin (the base
//! loop when the pool is empty) and the connection object is built *on*
//! that loop's thread, where it stays for its whole life. The map on the
//! base loop stores cross-thread handles, and every map mutation is
//! marshalled to the base loop, so the map has one mutating thread even
//! though a mutex guards it for Rust's sake.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::reactor::event_loop::{EventLoop, LoopHandle};
use crate::reactor::loop_thread::ThreadInitCallback;
use crate::reactor::pool::EventLoopThreadPool;
use crate::{error, info};

use super::acceptor::Acceptor;
use super::callbacks::{
    ConnectionCallback, MessageCallback, TcpConnectionRef, WriteCompleteCallback,
    default_connection_callback, default_message_callback,
};
use super::connection::{
    ConnectionHandle, TcpConnection, lookup_connection, next_connection_id, register_connection,
};
use super::socket::Socket;
use super::sys;

#[derive(Clone)]
struct ServerCallbacks {
    connection: ConnectionCallback,
    message: MessageCallback,
    write_complete: Option<WriteCompleteCallback>,
}

/// The `Send + Sync` slice of server state reachable from io threads.
struct ServerCore {
    name: String,
    ip_port: String,
    base: LoopHandle,
    next_conn_id: AtomicU64,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
}

pub struct TcpServer {
    base: EventLoop,
    core: Arc<ServerCore>,
    acceptor: Rc<Acceptor>,
    pool: Rc<RefCell<EventLoopThreadPool>>,
    callbacks: Rc<RefCell<ServerCallbacks>>,
    thread_init: RefCell<Option<ThreadInitCallback>>,
    started: Cell<bool>,
}

impl TcpServer {
    /// Binds the listen address immediately; `start` begins accepting.
    pub fn new(
        base: &EventLoop,
        listen_addr: SocketAddr,
        name: &str,
        reuse_port: bool,
    ) -> io::Result<TcpServer> {
        let acceptor = Acceptor::new(base, &listen_addr, reuse_port)?;
        let core = Arc::new(ServerCore {
            name: name.to_string(),
            ip_port: listen_addr.to_string(),
            base: base.handle(),
            next_conn_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        });
        let pool = Rc::new(RefCell::new(EventLoopThreadPool::new(base, name)));
        let callbacks = Rc::new(RefCell::new(ServerCallbacks {
            connection: Arc::new(default_connection_callback),
            message: Arc::new(default_message_callback),
            write_complete: None,
        }));

        let server = TcpServer {
            base: base.clone(),
            core,
            acceptor,
            pool,
            callbacks,
            thread_init: RefCell::new(None),
            started: Cell::new(false),
        };

        let core = server.core.clone();
        let pool = server.pool.clone();
        let callbacks = server.callbacks.clone();
        server
            .acceptor
            .set_new_connection_callback(Box::new(move |socket, peer| {
                new_connection(&core, &pool, &callbacks, socket, peer);
            }));

        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn ip_port(&self) -> &str {
        &self.core.ip_port
    }

    /// Number of io loops accepting connection work; 0 keeps everything on
    /// the base loop.
    pub fn set_thread_num(&self, num_threads: usize) {
        self.pool.borrow_mut().set_thread_num(num_threads);
    }

    pub fn set_thread_init_callback(&self, callback: ThreadInitCallback) {
        *self.thread_init.borrow_mut() = Some(callback);
    }

    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        self.callbacks.borrow_mut().connection = callback;
    }

    pub fn set_message_callback(&self, callback: MessageCallback) {
        self.callbacks.borrow_mut().message = callback;
    }

    pub fn set_write_complete_callback(&self, callback: WriteCompleteCallback) {
        self.callbacks.borrow_mut().write_complete = Some(callback);
    }

    /// Spins up the pool and starts listening. Idempotent.
    pub fn start(&self) -> io::Result<()> {
        if self.started.get() {
            return Ok(());
        }
        self.started.set(true);
        self.base.assert_in_loop_thread();

        self.pool.borrow_mut().start(self.thread_init.borrow_mut().take());
        assert!(!self.acceptor.listening());
        info!(
            "TcpServer [{}] listening on {}",
            self.core.name, self.core.ip_port
        );
        self.acceptor.listen()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.base.assert_in_loop_thread();
        let handles: Vec<ConnectionHandle> = self
            .core
            .connections
            .lock()
            .unwrap()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.destroy();
        }
    }
}

/// Runs on the base loop when the acceptor produces a socket.
fn new_connection(
    core: &Arc<ServerCore>,
    pool: &Rc<RefCell<EventLoopThreadPool>>,
    callbacks: &Rc<RefCell<ServerCallbacks>>,
    socket: Socket,
    peer: SocketAddr,
) {
    let seq = core.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let conn_name = format!("{}#{}#{}", core.name, core.ip_port, seq);
    info!(
        "TcpServer [{}] new connection [{}] from {}",
        core.name, conn_name, peer
    );

    let local = match sys::local_addr(socket.fd()) {
        Ok(addr) => addr,
        Err(e) => {
            error!("TcpServer [{}]: getsockname: {e}", core.name);
            return;
        }
    };

    let id = next_connection_id();
    let io_handle = pool.borrow_mut().get_next_loop();
    core.connections.lock().unwrap().insert(
        conn_name.clone(),
        ConnectionHandle::internal_new(id, conn_name.clone(), io_handle.clone()),
    );

    let callbacks = callbacks.borrow().clone();
    let core = core.clone();
    io_handle.run_in_loop(move || {
        let Some(event_loop) = EventLoop::current() else {
            return;
        };
        let conn = TcpConnection::new(&event_loop, conn_name, id, socket, local, peer);
        conn.set_connection_callback(callbacks.connection);
        conn.set_message_callback(callbacks.message);
        if let Some(write_complete) = callbacks.write_complete {
            conn.set_write_complete_callback(write_complete);
        }
        let core_for_close = core.clone();
        conn.set_close_callback(Rc::new(move |conn: &TcpConnectionRef| {
            remove_connection(&core_for_close, conn);
        }));
        register_connection(&conn);
        conn.connect_established();
    });
}

/// Runs on the connection's io thread when it closes; map removal happens
/// on the base loop, destruction back on the io loop, avoiding ordering
/// races between the two.
fn remove_connection(core: &Arc<ServerCore>, conn: &TcpConnectionRef) {
    let name = conn.name().to_string();
    let id = conn.id();
    let io_handle = conn.loop_handle();
    let core = core.clone();
    let base = core.base.clone();
    base.run_in_loop(move || {
        info!("TcpServer [{}] remove connection [{}]", core.name, name);
        core.connections.lock().unwrap().remove(&name);
        io_handle.queue_in_loop(move || {
            if let Some(conn) = lookup_connection(id) {
                conn.connect_destroyed();
            }
        });
    });
}
