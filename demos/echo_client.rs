//! Example: echo client.
//!
//! Connects to the echo server, sends one line, prints the reply, then
//! asks the server to close with `exit\n`.

use std::sync::Arc;

use borealis::net::callbacks::TcpConnectionRef;
use borealis::{Buffer, EventLoop, TcpClient, Timestamp, info};

fn main() {
    let event_loop = EventLoop::new();
    let client = TcpClient::new(
        &event_loop,
        "127.0.0.1:5836".parse().expect("server address"),
        "echo-client",
    );

    client.set_connection_callback(Arc::new(|conn: &TcpConnectionRef| {
        if conn.connected() {
            info!("connected to {}", conn.peer_addr());
            conn.send(b"hello\n");
        } else {
            info!("disconnected from {}", conn.peer_addr());
            conn.loop_handle().quit();
        }
    }));
    client.set_message_callback(Arc::new(
        |conn: &TcpConnectionRef, buffer: &mut Buffer, _receive_time: Timestamp| {
            let reply = buffer.retrieve_all_as_string();
            info!("reply: {}", reply.trim_end());
            if reply != "bye\n" {
                conn.send(b"exit\n");
            }
        },
    ));

    client.connect();
    event_loop.run();
}
