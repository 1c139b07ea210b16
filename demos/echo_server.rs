//! Example: echo server.
//!
//! Echoes every message back. `exit\n` answers `bye\n` and half-closes;
//! `quit\n` stops the whole server. Log lines go through the async logger
//! into `./logs`.

use std::sync::Arc;
use std::time::Duration;

use borealis::logging::async_logger::AsyncLogger;
use borealis::net::callbacks::TcpConnectionRef;
use borealis::{Buffer, EventLoop, TcpServer, Timestamp, info};

fn on_message(conn: &TcpConnectionRef, buffer: &mut Buffer, receive_time: Timestamp) {
    let msg = buffer.retrieve_all_as_string();
    info!(
        "{} received {} bytes at {}",
        conn.name(),
        msg.len(),
        receive_time.format(true)
    );

    if msg == "exit\n" {
        conn.send(b"bye\n");
        conn.shutdown();
        return;
    }
    if msg == "quit\n" {
        conn.loop_handle().quit();
        return;
    }
    conn.send(msg.as_bytes());
}

fn main() {
    std::fs::create_dir_all("logs").expect("create log directory");
    let mut logger = AsyncLogger::new("logs", "echo_server", 256 * 1024 * 1024)
        .flush_interval(Duration::from_secs(1));
    logger.start();
    let sink = logger.handle();
    borealis::logging::set_output(move |line| sink.append(line));

    let threads: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);

    let event_loop = EventLoop::new();
    let server = TcpServer::new(
        &event_loop,
        "127.0.0.1:5836".parse().expect("listen address"),
        "echo",
        false,
    )
    .expect("bind echo server");
    server.set_thread_num(threads);
    server.set_message_callback(Arc::new(on_message));

    server.start().expect("start echo server");
    info!("echo server on {} with {} io threads", server.ip_port(), threads);
    event_loop.run();
}
