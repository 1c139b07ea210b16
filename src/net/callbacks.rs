//! User-visible callback signatures for the TCP layer.
//!
//! Connection, message and water-mark callbacks are set once on a server
//! or client and cloned into every connection it creates — possibly on
//! another loop thread — hence `Arc` + `Send + Sync`. They are only ever
//! *invoked* on the connection's own loop thread.

use std::rc::Rc;
use std::sync::Arc;

use crate::time::timestamp::Timestamp;
use crate::trace;

use super::buffer::Buffer;
use super::connection::TcpConnection;

pub type TcpConnectionRef = Rc<TcpConnection>;

/// Called on connection establishment and teardown; distinguish with
/// [`TcpConnection::connected`].
pub type ConnectionCallback = Arc<dyn Fn(&TcpConnectionRef) + Send + Sync>;

/// Called with the input buffer when bytes arrive; consume what you can,
/// leave the rest for the next read.
pub type MessageCallback = Arc<dyn Fn(&TcpConnectionRef, &mut Buffer, Timestamp) + Send + Sync>;

/// Called when the output buffer fully drains.
pub type WriteCompleteCallback = Arc<dyn Fn(&TcpConnectionRef) + Send + Sync>;

/// Called once per crossing when the output buffer exceeds the high-water
/// mark; the second argument is the queued byte count.
pub type HighWaterMarkCallback = Arc<dyn Fn(&TcpConnectionRef, usize) + Send + Sync>;

/// Internal close notification, built on the connection's own loop thread.
pub(crate) type CloseCallback = Rc<dyn Fn(&TcpConnectionRef)>;

pub fn default_connection_callback(conn: &TcpConnectionRef) {
    trace!(
        "{} -> {} is {}",
        conn.local_addr(),
        conn.peer_addr(),
        if conn.connected() { "up" } else { "down" }
    );
}

/// Discards whatever arrived, keeping an idle connection from buffering
/// forever when no message callback is installed.
pub fn default_message_callback(
    _conn: &TcpConnectionRef,
    buffer: &mut Buffer,
    _receive_time: Timestamp,
) {
    buffer.retrieve_all();
}
