//! Fault counters and relay statistics

use core::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No expected response within the budget
    Timeout = 0,
    /// Ring, queue or line buffer full
    BufferOverrun = 1,
    /// `ERROR` reply or a socket error code
    ProtocolFailure = 2,
    /// Pin or UART write failure
    HardwareFault = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub code: ErrorCode,
    pub timestamp: u32,
    pub data: u32,
}

/// Shared by every task through `&Diagnostics`
#[derive(Default)]
pub struct Diagnostics {
    counts: [Cell<u16>; 4],
    last_fault: Cell<Option<Fault>>,
    bytes_up: Cell<u32>,
    bytes_down: Cell<u32>,
    commands_applied: Cell<u16>,
    commands_unknown: Cell<u16>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, code: ErrorCode, timestamp: u32, data: u32) {
        let count = &self.counts[code as usize];
        count.set(count.get().saturating_add(1));
        self.last_fault.set(Some(Fault { code, timestamp, data }));
    }

    pub fn count(&self, code: ErrorCode) -> u16 {
        self.counts[code as usize].get()
    }

    pub fn error_count(&self) -> u32 {
        self.counts.iter().map(|c| c.get() as u32).sum()
    }

    pub fn last_fault(&self) -> Option<Fault> {
        self.last_fault.get()
    }

    /// RS-485 to modem
    pub fn add_up(&self, bytes: u32) {
        self.bytes_up.set(self.bytes_up.get().wrapping_add(bytes));
    }

    /// Modem to RS-485
    pub fn add_down(&self, bytes: u32) {
        self.bytes_down.set(self.bytes_down.get().wrapping_add(bytes));
    }

    pub fn command(&self, recognised: bool) {
        let counter = if recognised { &self.commands_applied } else { &self.commands_unknown };
        counter.set(counter.get().wrapping_add(1));
    }

    pub fn bytes_up(&self) -> u32 {
        self.bytes_up.get()
    }

    pub fn bytes_down(&self) -> u32 {
        self.bytes_down.get()
    }

    pub fn commands(&self) -> (u16, u16) {
        (self.commands_applied.get(), self.commands_unknown.get())
    }

    pub fn log_summary(&self) {
        log::info!(
            "up {} down {} cmd {}/{} timeout {} overrun {} proto {} hw {}",
            self.bytes_up(),
            self.bytes_down(),
            self.commands_applied.get(),
            self.commands_unknown.get(),
            self.count(ErrorCode::Timeout),
            self.count(ErrorCode::BufferOverrun),
            self.count(ErrorCode::ProtocolFailure),
            self.count(ErrorCode::HardwareFault)
        );
    }
}
