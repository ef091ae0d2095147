//! In-RAM log of the most recent `log` records

use core::fmt::{self, Write};

use heapless::String;
use log::Level;

pub const MESSAGE_CAPACITY: usize = 48;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: u32,
    pub level: Level,
    pub message: String<MESSAGE_CAPACITY>,
}

/// Keeps the last `N` entries, overwriting the oldest. Messages longer than
/// the entry are cut.
pub struct LogRing<const N: usize> {
    entries: [Option<LogEntry>; N],
    next: usize,
    written: u32,
}

impl<const N: usize> LogRing<N> {
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|_| None),
            next: 0,
            written: 0,
        }
    }

    pub fn push(&mut self, timestamp: u32, level: Level, args: &fmt::Arguments<'_>) {
        let mut message = Truncating(String::new());
        let _ = message.write_fmt(*args);
        self.entries[self.next] = Some(LogEntry {
            timestamp,
            level,
            message: message.0,
        });
        self.next = (self.next + 1) % N;
        self.written = self.written.wrapping_add(1);
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        let (newer, older) = self.entries.split_at(self.next);
        older.iter().chain(newer.iter()).flatten()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries[(self.next + N - 1) % N].as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Records pushed since start, including overwritten ones
    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.next = 0;
    }
}

impl<const N: usize> Default for LogRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

struct Truncating<const N: usize>(String<N>);

impl<const N: usize> Write for Truncating<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}
