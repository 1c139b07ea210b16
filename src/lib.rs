//! Reactor-per-thread TCP networking with an asynchronous logger.
//!
//! Borealis bundles three layers that networked server programs keep
//! rebuilding:
//! - a callback-driven reactor core (event loop, poller, channels, timers),
//!   one loop per thread, with all cross-thread interaction marshalled
//!   through a functor queue and an eventfd wake-up,
//! - TCP building blocks on top of it (acceptor, connector, connection,
//!   server, client) with backpressure and graceful shutdown,
//! - a double-buffered asynchronous logger draining to size- and
//!   day-rolled files.
//!
//! # Threading model
//!
//! An [`EventLoop`] is created on the thread that runs it and never leaves
//! that thread. Everything bound to a loop — channels, timers, connections —
//! is mutated only there. Other threads talk to a loop through its
//! [`LoopHandle`], which queues a closure and wakes the loop.

pub mod logging;
pub mod net;
pub mod reactor;
pub mod sync;
pub mod time;

pub use net::buffer::Buffer;
pub use net::callbacks::TcpConnectionRef;
pub use net::client::TcpClient;
pub use net::connection::{ConnectionHandle, TcpConnection};
pub use net::server::TcpServer;
pub use reactor::event_loop::{EventLoop, LoopHandle};
pub use reactor::timer::TimerId;
pub use sync::latch::CountDownLatch;
pub use time::timestamp::Timestamp;
