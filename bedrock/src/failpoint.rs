//! Injected I/O errors for the two heap-file operations that touch disk.
//!
//! A point fails when it is armed on the current thread, or when its name
//! appears in the comma-separated `BEDROCK_FAILPOINTS` variable.

use std::cell::Cell;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failpoint {
    HeapFileRead,
    HeapFileWrite,
}

impl Failpoint {
    pub fn name(self) -> &'static str {
        match self {
            Failpoint::HeapFileRead => "heap_file.read_page",
            Failpoint::HeapFileWrite => "heap_file.write_page",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Failpoint::HeapFileRead => 0b01,
            Failpoint::HeapFileWrite => 0b10,
        }
    }
}

thread_local! {
    static ARMED: Cell<u8> = const { Cell::new(0) };
}

fn armed_by_env(point: Failpoint) -> bool {
    std::env::var("BEDROCK_FAILPOINTS")
        .is_ok_and(|names| names.split(',').any(|n| n.trim() == point.name()))
}

/// Returns an I/O error if `point` is armed.
pub fn check(point: Failpoint) -> io::Result<()> {
    let on_thread = ARMED.with(|bits| bits.get() & point.bit() != 0);
    if on_thread || armed_by_env(point) {
        return Err(io::Error::other(format!("injected failure at {}", point.name())));
    }
    Ok(())
}

/// Keeps `point` armed on this thread until dropped.
pub struct Armed(Failpoint);

pub fn arm(point: Failpoint) -> Armed {
    ARMED.with(|bits| bits.set(bits.get() | point.bit()));
    Armed(point)
}

impl Drop for Armed {
    fn drop(&mut self) {
        ARMED.with(|bits| bits.set(bits.get() & !self.0.bit()));
    }
}
