//! End-to-end TCP scenarios: echo, shutdown-on-command, cross-thread
//! sends, backpressure.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use borealis::net::callbacks::TcpConnectionRef;
use borealis::{Buffer, EventLoop, LoopHandle, TcpClient, TcpServer, Timestamp};

/// Echo server on its own thread: echoes everything, answers `exit\n`
/// with `bye\n` plus a half-close. Returns the base loop's handle.
fn spawn_echo_server(addr: &'static str) -> (LoopHandle, std::thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::spawn(move || {
        let event_loop = EventLoop::new();
        let server = TcpServer::new(&event_loop, addr.parse().unwrap(), "echo", false).unwrap();
        server.set_message_callback(Arc::new(
            |conn: &TcpConnectionRef, buffer: &mut Buffer, receive_time: Timestamp| {
                assert!(
                    conn.loop_handle().is_in_loop_thread(),
                    "message callback off the owning loop thread"
                );
                let age = Timestamp::now() - receive_time;
                assert!(age < Duration::from_secs(1), "stale receive time: {age:?}");

                let msg = buffer.retrieve_all_as_string();
                if msg == "exit\n" {
                    conn.send(b"bye\n");
                    conn.shutdown();
                } else {
                    conn.send(msg.as_bytes());
                }
            },
        ));
        server.start().unwrap();
        tx.send(event_loop.handle()).unwrap();
        event_loop.run();
    });
    (rx.recv().unwrap(), thread)
}

fn read_exact_bytes(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn echo_one_message() {
    let (handle, thread) = spawn_echo_server("127.0.0.1:5836");

    let mut stream = TcpStream::connect("127.0.0.1:5836").unwrap();
    stream.write_all(b"hello\n").unwrap();
    assert_eq!(read_exact_bytes(&mut stream, 6), b"hello\n");

    handle.quit();
    thread.join().unwrap();
}

#[test]
fn exit_command_half_closes_after_bye() {
    let (handle, thread) = spawn_echo_server("127.0.0.1:5837");

    let mut stream = TcpStream::connect("127.0.0.1:5837").unwrap();
    stream.write_all(b"exit\n").unwrap();
    assert_eq!(read_exact_bytes(&mut stream, 4), b"bye\n");

    // After `bye\n`, the server half-closes: EOF, not an error.
    let mut rest = Vec::new();
    let n = stream.read_to_end(&mut rest).unwrap();
    assert_eq!(n, 0, "expected clean EOF, got {rest:?}");

    handle.quit();
    thread.join().unwrap();
}

#[test]
fn client_connects_sends_and_disconnects() {
    let (server_handle, server_thread) = spawn_echo_server("127.0.0.1:5838");

    let client_thread = std::thread::spawn(|| {
        let event_loop = EventLoop::new();
        let client = TcpClient::new(&event_loop, "127.0.0.1:5838".parse().unwrap(), "probe");

        client.set_connection_callback(Arc::new(|conn: &TcpConnectionRef| {
            assert!(conn.loop_handle().is_in_loop_thread());
            if conn.connected() {
                conn.send(b"ping\n");
            } else {
                conn.loop_handle().quit();
            }
        }));
        client.set_message_callback(Arc::new(
            |conn: &TcpConnectionRef, buffer: &mut Buffer, _receive_time: Timestamp| {
                assert_eq!(buffer.retrieve_all_as_string(), "ping\n");
                conn.shutdown();
            },
        ));

        client.connect();
        event_loop.run();
    });

    client_thread.join().unwrap();
    server_handle.quit();
    server_thread.join().unwrap();
}

/// Concurrent sends through `ConnectionHandle` arrive as whole messages:
/// the byte stream is a concatenation of unsplit payloads.
#[test]
fn concurrent_handle_sends_never_interleave() {
    const MESSAGE_LEN: usize = 129;
    const PER_THREAD: usize = 50;
    const WRITERS: usize = 3;

    let (conn_tx, conn_rx) = mpsc::channel();
    let (loop_tx, loop_rx) = mpsc::channel();
    let server_thread = std::thread::spawn(move || {
        let event_loop = EventLoop::new();
        let server =
            TcpServer::new(&event_loop, "127.0.0.1:5839".parse().unwrap(), "firehose", false)
                .unwrap();
        server.set_connection_callback(Arc::new(move |conn: &TcpConnectionRef| {
            if conn.connected() {
                conn_tx.send(conn.handle()).unwrap();
            }
        }));
        server.start().unwrap();
        loop_tx.send(event_loop.handle()).unwrap();
        event_loop.run();
    });
    let server_handle: LoopHandle = loop_rx.recv().unwrap();

    let mut stream = TcpStream::connect("127.0.0.1:5839").unwrap();
    let conn = conn_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let conn = conn.clone();
            std::thread::spawn(move || {
                let mut message = vec![b'a' + w as u8; MESSAGE_LEN - 1];
                message.push(b'\n');
                for _ in 0..PER_THREAD {
                    conn.send(message.clone());
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let total = WRITERS * PER_THREAD * MESSAGE_LEN;
    let data = read_exact_bytes(&mut stream, total);
    for chunk in data.chunks(MESSAGE_LEN) {
        let fill = chunk[0];
        assert!(fill >= b'a' && fill < b'a' + WRITERS as u8);
        assert!(
            chunk[..MESSAGE_LEN - 1].iter().all(|&b| b == fill),
            "payload interleaved inside one message"
        );
        assert_eq!(chunk[MESSAGE_LEN - 1], b'\n');
    }

    server_handle.quit();
    server_thread.join().unwrap();
}

/// High-water backpressure fires once per crossing; write-complete fires
/// when the output buffer fully drains.
#[test]
fn high_water_and_write_complete() {
    const PAYLOAD: usize = 4 * 1024 * 1024;
    const MARK: usize = 64 * 1024;

    let (events_tx, events_rx) = mpsc::channel::<&'static str>();
    let (loop_tx, loop_rx) = mpsc::channel();
    let hw_tx = events_tx.clone();
    let server_thread = std::thread::spawn(move || {
        let event_loop = EventLoop::new();
        let server =
            TcpServer::new(&event_loop, "127.0.0.1:5840".parse().unwrap(), "pusher", false)
                .unwrap();
        server.set_connection_callback(Arc::new(move |conn: &TcpConnectionRef| {
            if conn.connected() {
                let hw_tx = hw_tx.clone();
                conn.set_high_water_mark_callback(
                    Arc::new(move |_conn: &TcpConnectionRef, queued: usize| {
                        assert!(queued >= MARK);
                        hw_tx.send("high-water").unwrap();
                    }),
                    MARK,
                );
                conn.send(&vec![b'z'; PAYLOAD]);
            }
        }));
        let wc_tx = events_tx.clone();
        server.set_write_complete_callback(Arc::new(move |_conn: &TcpConnectionRef| {
            wc_tx.send("write-complete").unwrap();
        }));
        server.start().unwrap();
        loop_tx.send(event_loop.handle()).unwrap();
        event_loop.run();
    });
    let server_handle: LoopHandle = loop_rx.recv().unwrap();

    let mut stream = TcpStream::connect("127.0.0.1:5840").unwrap();
    // Let the server overrun the kernel buffer so the output buffer
    // actually queues past the mark.
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        "high-water"
    );

    let data = read_exact_bytes(&mut stream, PAYLOAD);
    assert!(data.iter().all(|&b| b == b'z'));
    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        "write-complete"
    );

    server_handle.quit();
    server_thread.join().unwrap();
}

/// Dropping a server with live connections tears them down without
/// crashing mid-write.
#[test]
fn server_drop_with_live_connection() {
    let (loop_tx, loop_rx) = mpsc::channel();
    let server_thread = std::thread::spawn(move || {
        let event_loop = EventLoop::new();
        let server =
            TcpServer::new(&event_loop, "127.0.0.1:5841".parse().unwrap(), "brief", false)
                .unwrap();
        server.start().unwrap();
        loop_tx.send(event_loop.handle()).unwrap();
        let quit_loop = event_loop.clone();
        event_loop.run_after(Duration::from_millis(300), move || {
            quit_loop.quit();
        });
        event_loop.run();
        drop(server);
    });
    let handle: LoopHandle = loop_rx.recv().unwrap();

    let mut stream = TcpStream::connect("127.0.0.1:5841").unwrap();
    stream.write_all(b"left hanging").unwrap();

    let _ = handle;
    server_thread.join().unwrap();

    // The torn-down connection surfaces as EOF or reset, never a hang.
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest);
}
