//! TCP building blocks on top of the reactor: byte buffer, acceptor,
//! connector, connection, server and client.

pub(crate) mod acceptor;
pub mod buffer;
pub mod callbacks;
pub mod client;
pub mod connection;
pub(crate) mod connector;
pub mod server;
pub(crate) mod socket;
pub(crate) mod sys;

pub use buffer::Buffer;
pub use callbacks::{
    ConnectionCallback, HighWaterMarkCallback, MessageCallback, TcpConnectionRef,
    WriteCompleteCallback,
};
pub use client::TcpClient;
pub use connection::{ConnectionHandle, TcpConnection};
pub use connector::ConnectError;
pub use server::TcpServer;
