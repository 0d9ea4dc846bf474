//! Ring allocator as the process-wide allocator with trace logging on
//!
//! Runs without the libtest harness: the harness needs 16-byte aligned
//! allocations, which the ring does not serve. The logger formats every
//! record into a `String`, so each log call allocates from the ring while
//! the ring is in the middle of an operation.

use std::sync::atomic::{AtomicUsize, Ordering};

use kaal_ring_allocator::LockedRingAllocator;
use log::{LevelFilter, Log, Metadata, Record};

#[global_allocator]
static HEAP: LockedRingAllocator<{ 16 << 20 }> = LockedRingAllocator::new();

struct FormattingLogger {
    records: AtomicUsize,
}

impl Log for FormattingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = format!("[{}] {}", record.level(), record.args());
        if !line.is_empty() {
            self.records.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {}
}

static LOGGER: FormattingLogger = FormattingLogger {
    records: AtomicUsize::new(0),
};

fn main() {
    log::set_logger(&LOGGER).expect("Failed to install logger");
    log::set_max_level(LevelFilter::Trace);

    let mut bytes = vec![0u8; 10];
    bytes.extend_from_slice(&[0xAB; 100]);
    let rendered = format!("{:?}", bytes);
    assert!(rendered.starts_with("[0, 0"));
    drop(bytes);
    drop(rendered);

    let words: Vec<String> = (0..256).map(|i| i.to_string()).collect();
    assert_eq!(words[255], "255");
    drop(words);

    assert!(
        LOGGER.records.load(Ordering::Relaxed) > 0,
        "allocator operations were not logged"
    );
    println!("global allocator with trace logging: ok");
}
