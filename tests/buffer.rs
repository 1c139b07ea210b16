//! Byte-buffer cursor invariants and boundary behaviors.

use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use borealis::Buffer;
use borealis::net::buffer::{CHEAP_PREPEND, INITIAL_SIZE};
use pretty_assertions::assert_eq;

fn assert_cursors(buffer: &Buffer) {
    assert!(buffer.prependable_bytes() >= CHEAP_PREPEND || buffer.readable_bytes() > 0);
    assert!(
        buffer.prependable_bytes() + buffer.readable_bytes() + buffer.writable_bytes()
            == buffer.internal_capacity()
    );
}

#[test]
fn fresh_buffer_layout() {
    let buffer = Buffer::new();
    assert_eq!(buffer.readable_bytes(), 0);
    assert_eq!(buffer.writable_bytes(), INITIAL_SIZE);
    assert_eq!(buffer.prependable_bytes(), CHEAP_PREPEND);
}

#[test]
fn append_and_retrieve() {
    let mut buffer = Buffer::new();
    let chunk = "x".repeat(200);

    buffer.append(chunk.as_bytes());
    assert_eq!(buffer.readable_bytes(), 200);
    assert_eq!(buffer.writable_bytes(), INITIAL_SIZE - 200);
    assert_cursors(&buffer);

    let front = buffer.retrieve_as_string(50);
    assert_eq!(front.len(), 50);
    assert_eq!(buffer.readable_bytes(), 150);
    assert_eq!(buffer.prependable_bytes(), CHEAP_PREPEND + 50);
    assert_cursors(&buffer);

    buffer.append(chunk.as_bytes());
    assert_eq!(buffer.readable_bytes(), 350);

    let rest = buffer.retrieve_all_as_string();
    assert_eq!(rest.len(), 350);
    // Consuming everything resets both cursors to the prepend floor.
    assert_eq!(buffer.readable_bytes(), 0);
    assert_eq!(buffer.writable_bytes(), INITIAL_SIZE);
    assert_eq!(buffer.prependable_bytes(), CHEAP_PREPEND);
}

#[test]
fn zero_length_append_is_a_no_op() {
    let mut buffer = Buffer::new();
    buffer.append(b"");
    assert_eq!(buffer.readable_bytes(), 0);
    assert_eq!(buffer.writable_bytes(), INITIAL_SIZE);
}

#[test]
fn append_exactly_fills_writable_span() {
    let mut buffer = Buffer::new();
    let exact = vec![7u8; INITIAL_SIZE];
    buffer.append(&exact);
    assert_eq!(buffer.readable_bytes(), INITIAL_SIZE);
    assert_eq!(buffer.writable_bytes(), 0);
    assert_eq!(buffer.internal_capacity(), CHEAP_PREPEND + INITIAL_SIZE);
}

#[test]
fn append_one_past_writable_span_grows() {
    let mut buffer = Buffer::new();
    let over = vec![7u8; INITIAL_SIZE + 1];
    buffer.append(&over);
    assert_eq!(buffer.readable_bytes(), INITIAL_SIZE + 1);
    assert!(buffer.internal_capacity() > CHEAP_PREPEND + INITIAL_SIZE);
    assert_cursors(&buffer);
}

#[test]
fn growth_prefers_compaction_over_resize() {
    let mut buffer = Buffer::new();
    buffer.append(&vec![1u8; 800]);
    buffer.retrieve(600);
    assert_eq!(buffer.readable_bytes(), 200);

    // 400 bytes needed, 224 writable but 600 reclaimable in front: the
    // readable span compacts down to the prepend floor instead of growing.
    let capacity_before = buffer.internal_capacity();
    buffer.append(&vec![2u8; 400]);
    assert_eq!(buffer.internal_capacity(), capacity_before);
    assert_eq!(buffer.readable_bytes(), 600);
    assert_eq!(buffer.prependable_bytes(), CHEAP_PREPEND);

    let mut expected = vec![1u8; 200];
    expected.extend_from_slice(&vec![2u8; 400]);
    assert_eq!(buffer.peek(), &expected[..]);
}

#[test]
fn network_order_integer_roundtrip() {
    let mut buffer = Buffer::new();
    buffer.append_i64(0x0102030405060708);
    buffer.append_i32(-42);
    buffer.append_i16(300);
    buffer.append_i8(-1);
    assert_eq!(buffer.readable_bytes(), 15);

    // Big-endian on the wire.
    assert_eq!(buffer.peek()[..8], [1, 2, 3, 4, 5, 6, 7, 8]);

    assert_eq!(buffer.read_i64(), 0x0102030405060708);
    assert_eq!(buffer.read_i32(), -42);
    assert_eq!(buffer.peek_i16(), 300);
    assert_eq!(buffer.read_i16(), 300);
    assert_eq!(buffer.read_i8(), -1);
    assert_eq!(buffer.readable_bytes(), 0);
}

#[test]
fn prepend_uses_reserved_space() {
    let mut buffer = Buffer::new();
    buffer.append(b"payload");
    buffer.prepend_i32(7);
    assert_eq!(buffer.prependable_bytes(), CHEAP_PREPEND - 4);
    assert_eq!(buffer.read_i32(), 7);
    assert_eq!(buffer.retrieve_all_as_string(), "payload");
}

#[test]
fn unwrite_rolls_back_written_bytes() {
    let mut buffer = Buffer::new();
    buffer.append(b"abcdef");
    buffer.unwrite(2);
    assert_eq!(buffer.retrieve_all_as_string(), "abcd");
}

#[test]
fn find_eol_and_crlf() {
    let mut buffer = Buffer::new();
    buffer.append(b"line one\r\nline two\n");
    assert_eq!(buffer.find_crlf(), Some(8));
    assert_eq!(buffer.find_eol(), Some(9));
    buffer.retrieve(10);
    assert_eq!(buffer.find_crlf(), None);
    assert_eq!(buffer.find_eol(), Some(8));
}

#[test]
fn read_fd_small_payload_lands_in_buffer() {
    let (mut writer, reader) = UnixStream::pair().expect("socketpair");
    writer.write_all(b"hello from the other side").unwrap();

    let mut buffer = Buffer::new();
    let n = buffer.read_fd(reader.as_raw_fd()).unwrap();
    assert_eq!(n, 25);
    assert_eq!(buffer.retrieve_all_as_string(), "hello from the other side");
}

#[test]
fn read_fd_large_payload_spills_into_scratch() {
    let (mut writer, reader) = UnixStream::pair().expect("socketpair");
    // More than the initial writable span, so the vectored read spills into
    // the stack scratch and gets appended.
    let payload = vec![9u8; 8 * 1024];
    let expected = payload.len();
    let handle = std::thread::spawn(move || {
        writer.write_all(&payload).unwrap();
    });

    let mut buffer = Buffer::new();
    let mut total = 0;
    while total < expected {
        total += buffer.read_fd(reader.as_raw_fd()).unwrap();
    }
    handle.join().unwrap();

    assert_eq!(total, expected);
    assert_eq!(buffer.readable_bytes(), expected);
    assert!(buffer.peek().iter().all(|&b| b == 9));
    assert_cursors(&buffer);
}
