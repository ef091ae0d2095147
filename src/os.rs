//! System time: millisecond clock abstraction shared by every task

use embedded_hal::blocking::delay::DelayMs;

/// Free-running millisecond counter, wrapping at `u32::MAX`
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Clock plus blocking delay, what the drivers and the AT engine need
pub trait Timebase: Clock + DelayMs<u32> {}

impl<T: Clock + DelayMs<u32>> Timebase for T {}

/// Milliseconds elapsed since `since`, tolerant of counter wrap
#[inline]
pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Point in time after which something is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: u32,
    span: u32,
}

impl Deadline {
    pub fn after(now: u32, span_ms: u32) -> Self {
        Self { start: now, span: span_ms }
    }

    #[inline]
    pub fn is_expired(&self, now: u32) -> bool {
        elapsed_ms(now, self.start) >= self.span
    }
}
