//! Async logger durability, rolling and overflow behavior.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use borealis::logging::async_logger::AsyncLogger;
use borealis::logging::log_file::LogFile;

fn fresh_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("borealis-{}-{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Every log file in `dir` whose name starts with `basename.`, with its
/// contents.
fn collect_files(dir: &PathBuf, basename: &str) -> Vec<(String, Vec<u8>)> {
    let prefix = format!("{basename}.");
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(&prefix)
        })
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

/// Two producer threads, 100k lines of 64 bytes each; after `stop` every
/// byte is in exactly one file and no line is torn.
#[test]
fn durability_on_clean_shutdown() {
    const LINES_PER_PRODUCER: usize = 100_000;
    const LINE_LEN: usize = 64;

    let dir = fresh_dir("durable");
    let mut logger = AsyncLogger::new(&dir, "durable", 1024 * 1024)
        .flush_interval(Duration::from_secs(1));
    logger.start();

    let producers: Vec<_> = (0..2u8)
        .map(|producer| {
            let sink = logger.handle();
            std::thread::spawn(move || {
                for i in 0..LINES_PER_PRODUCER {
                    let mut line = format!("p{producer} seq {i:08} ");
                    while line.len() < LINE_LEN - 1 {
                        line.push('x');
                    }
                    line.push('\n');
                    sink.append(line.as_bytes());
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    logger.stop();

    let files = collect_files(&dir, "durable");
    assert!(files.len() >= 2, "1 MiB roll size must have rolled");

    let mut total_lines = 0usize;
    for (name, content) in &files {
        assert!(
            content.len() % LINE_LEN == 0,
            "{name} ends mid-line ({} bytes)",
            content.len()
        );
        for line in content.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            assert_eq!(line.len(), LINE_LEN - 1, "torn line in {name}");
            total_lines += 1;
        }
        assert!(
            !content
                .windows(b"Dropped log messages".len())
                .any(|w| w == b"Dropped log messages"),
            "unexpected overflow drop in {name}"
        );
    }
    assert_eq!(total_lines, 2 * LINES_PER_PRODUCER);

    let _ = fs::remove_dir_all(&dir);
}

/// Rolling by size: ~10 KiB of lines against a 4 KiB roll size makes at
/// least three files, each at most one line over the roll size.
#[test]
fn roll_on_size() {
    const ROLL_SIZE: u64 = 4 * 1024;
    const LINE_LEN: usize = 100;

    let dir = fresh_dir("roll");
    let mut file = LogFile::new(dir.clone(), "roll", ROLL_SIZE, 1, 1).unwrap();
    let line = {
        let mut line = vec![b'r'; LINE_LEN - 1];
        line.push(b'\n');
        line
    };
    for _ in 0..100 {
        file.append(&line);
    }
    file.flush();
    drop(file);

    let files = collect_files(&dir, "roll");
    assert!(files.len() >= 3, "expected >= 3 files, got {}", files.len());

    let total: usize = files.iter().map(|(_, content)| content.len()).sum();
    assert_eq!(total, 100 * LINE_LEN);
    for (name, content) in &files {
        assert!(
            content.len() as u64 <= ROLL_SIZE + LINE_LEN as u64,
            "{name} exceeded the roll size by more than one append: {}",
            content.len()
        );
    }

    let _ = fs::remove_dir_all(&dir);
}

/// A time-triggered roll within the same second is a no-op: it would
/// reproduce the same file name.
#[test]
fn roll_within_same_second_is_a_no_op() {
    let dir = fresh_dir("noroll");
    let mut file = LogFile::new(dir.clone(), "noroll", u64::MAX, 3, 1024).unwrap();

    let first = file.roll();
    let second = file.roll();
    assert!(!second, "second roll in the same second must be a no-op");
    let _ = first;

    let _ = fs::remove_dir_all(&dir);
}

/// Producers outrunning a stalled drainer: the surplus beyond the drop
/// threshold is discarded and audited with one line.
#[test]
fn overflow_drops_surplus_with_audit_line() {
    const BUFFER_SIZE: usize = 4 * 1024;
    const LINE_LEN: usize = 100;

    let dir = fresh_dir("overflow");
    let mut logger = AsyncLogger::new(&dir, "overflow", 1024 * 1024 * 1024)
        .buffer_size(BUFFER_SIZE)
        .drop_threshold(25)
        .flush_interval(Duration::from_millis(100));

    // The drainer has not started yet: this simulates a stalled sink while
    // thirty buffers' worth piles up.
    let line = {
        let mut line = vec![b'o'; LINE_LEN - 1];
        line.push(b'\n');
        line
    };
    let lines = 30 * (BUFFER_SIZE / LINE_LEN + 1);
    for _ in 0..lines {
        logger.append(&line);
    }

    logger.start();
    std::thread::sleep(Duration::from_millis(300));
    logger.stop();

    let files = collect_files(&dir, "overflow");
    assert!(!files.is_empty());
    let all: Vec<u8> = files.into_iter().flat_map(|(_, content)| content).collect();
    let notice = b"Dropped log messages at";
    assert!(
        all.windows(notice.len()).any(|w| w == notice),
        "missing overflow audit line"
    );

    // Only the two retained buffers (plus the audit line) survive.
    let survivors = all.split(|&b| b == b'\n').filter(|l| !l.is_empty()).count();
    assert!(
        survivors < lines,
        "overflow should have dropped data: {survivors} of {lines} lines"
    );

    let _ = fs::remove_dir_all(&dir);
}
