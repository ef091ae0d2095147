//! AT command request/response engine.
//!
//! An exchange accumulates modem output into a bounded buffer until a
//! completion rule fires or its time budget runs out. The same state machine
//! backs the blocking calls used during boot and the polled reads issued by
//! the steady-state modem task.

use embedded_hal::serial;
use heapless::Vec;

use super::{GatewayError, find};
use crate::config::{AT_QUIET_PERIOD_MS, AT_RESPONSE_CAPACITY, RX_RING_CAPACITY};
use crate::hal::ring_buffer::Consumer;
use crate::os::{elapsed_ms, Deadline, Timebase};

pub const OK_TERMINATOR: &[u8] = b"OK\r\n";
pub const ERROR_TERMINATOR: &[u8] = b"ERROR\r\n";

/// How an exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Ok,
    Error,
    /// Expected text seen, then the line went quiet
    Expected,
    Timeout,
    /// The command never left the UART
    TxFailed,
}

/// When an exchange counts as complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// `OK\r\n` or `ERROR\r\n` received
    Terminator,
    /// `expected` received and no byte for the quiet period afterwards
    QuietAfter(&'static [u8]),
}

#[derive(Debug, Clone)]
pub struct AtResponse {
    termination: Termination,
    text: Vec<u8, AT_RESPONSE_CAPACITY>,
}

impl AtResponse {
    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Anything but a timeout or a failed transmit
    pub fn is_success(&self) -> bool {
        matches!(
            self.termination,
            Termination::Ok | Termination::Error | Termination::Expected
        )
    }

    pub fn is_ok(&self) -> bool {
        self.termination == Termination::Ok
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    pub fn contains(&self, needle: &str) -> bool {
        find(&self.text, needle.as_bytes()).is_some()
    }

    /// Longest valid UTF-8 prefix of the response
    pub fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.text) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.text[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

/// One in-flight command/response exchange
#[derive(Debug)]
pub struct AtExchange {
    completion: Completion,
    deadline: Deadline,
    last_rx_at: u32,
    found: bool,
    terminated: Option<Termination>,
    buffer: Vec<u8, AT_RESPONSE_CAPACITY>,
}

impl AtExchange {
    pub fn new(completion: Completion, now: u32, timeout_ms: u32) -> Self {
        Self {
            completion,
            deadline: Deadline::after(now, timeout_ms),
            last_rx_at: now,
            found: false,
            terminated: None,
            buffer: Vec::new(),
        }
    }

    /// Appends one received byte. Once the buffer is full further bytes are
    /// discarded, so a reply whose terminator does not fit can only time out.
    pub fn feed(&mut self, byte: u8, now: u32) {
        if self.terminated.is_some() || self.buffer.push(byte).is_err() {
            return;
        }
        self.last_rx_at = now;

        // Checked on every byte, so a fresh match is always a suffix
        match self.completion {
            Completion::Terminator => {
                if self.buffer.ends_with(OK_TERMINATOR) {
                    self.terminated = Some(Termination::Ok);
                } else if self.buffer.ends_with(ERROR_TERMINATOR) {
                    self.terminated = Some(Termination::Error);
                }
            }
            Completion::QuietAfter(expected) => {
                if !self.found && self.buffer.ends_with(expected) {
                    self.found = true;
                }
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_some()
    }

    fn abort(&mut self, termination: Termination) {
        self.terminated = Some(termination);
    }

    /// Some(termination) once the exchange is over
    pub fn poll(&self, now: u32) -> Option<Termination> {
        if let Some(termination) = self.terminated {
            return Some(termination);
        }
        if self.deadline.is_expired(now) {
            return Some(Termination::Timeout);
        }
        if self.found && elapsed_ms(now, self.last_rx_at) > AT_QUIET_PERIOD_MS {
            return Some(Termination::Expected);
        }
        None
    }

    pub fn into_response(self, termination: Termination) -> AtResponse {
        AtResponse { termination, text: self.buffer }
    }
}

/// Owns the modem's transmit half and the consumer end of its receive ring
pub struct AtEngine<'a, TX, T> {
    tx: TX,
    rx: Consumer<'a, RX_RING_CAPACITY>,
    timebase: T,
    active: Option<AtExchange>,
}

impl<'a, TX, T> AtEngine<'a, TX, T>
where
    TX: serial::Write<u8>,
    T: Timebase,
{
    pub fn new(tx: TX, rx: Consumer<'a, RX_RING_CAPACITY>, timebase: T) -> Self {
        Self {
            tx,
            rx,
            timebase,
            active: None,
        }
    }

    /// Sends `command` and waits for `OK\r\n`/`ERROR\r\n`
    pub fn send_command(&mut self, command: &str, timeout_ms: u32) -> AtResponse {
        self.start(command, Completion::Terminator, timeout_ms);
        self.wait()
    }

    /// Waits, without sending anything, for `expected` followed by a quiet
    /// period. Bytes already buffered are kept: they may be the start of the
    /// notification.
    pub fn wait_for_response(&mut self, expected: &'static str, timeout_ms: u32) -> AtResponse {
        self.listen(Completion::QuietAfter(expected.as_bytes()), timeout_ms);
        self.wait()
    }

    /// Begins an exchange without blocking; drive it with `poll`.
    /// Stale receive data is discarded before the command goes out.
    pub fn start(&mut self, command: &str, completion: Completion, timeout_ms: u32) {
        if self.active.is_some() {
            log::warn!("AT exchange replaced before completion");
        }
        self.rx.clear();
        let mut exchange = AtExchange::new(completion, self.timebase.now_ms(), timeout_ms);
        log::debug!("AT > {}", command.trim_end());
        if self.transmit(command.as_bytes()).is_err() {
            log::warn!("AT command not sent: {}", command.trim_end());
            exchange.abort(Termination::TxFailed);
        }
        self.active = Some(exchange);
    }

    /// Begins a receive-only exchange
    pub fn listen(&mut self, completion: Completion, timeout_ms: u32) {
        self.active = Some(AtExchange::new(completion, self.timebase.now_ms(), timeout_ms));
    }

    /// Drains received bytes into the active exchange. Returns the response
    /// once the exchange is complete; bytes after a terminator stay buffered.
    pub fn poll(&mut self) -> Option<AtResponse> {
        let exchange = self.active.as_mut()?;
        let now = self.timebase.now_ms();
        while !exchange.is_terminated() {
            match self.rx.pop() {
                Some(byte) => exchange.feed(byte, now),
                None => break,
            }
        }
        let termination = exchange.poll(now)?;
        let response = self.active.take()?.into_response(termination);
        if termination == Termination::Timeout {
            log::warn!("AT timeout after {} bytes", response.as_bytes().len());
        }
        Some(response)
    }

    /// An exchange is in flight; raw writes are refused until it completes
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    fn wait(&mut self) -> AtResponse {
        loop {
            if self.active.is_none() {
                return AtExchange::new(Completion::Terminator, 0, 0).into_response(Termination::Timeout);
            }
            if let Some(response) = self.poll() {
                return response;
            }
            self.timebase.delay_ms(1);
        }
    }

    fn transmit(&mut self, bytes: &[u8]) -> super::Result<()> {
        for &b in bytes {
            nb::block!(self.tx.write(b)).map_err(|_| GatewayError::Serial)?;
        }
        Ok(())
    }

    /// Relay path: one raw byte to the modem. Refused with `WouldBlock` while
    /// an exchange is in flight so relayed data never splits a command.
    pub fn write_raw(&mut self, byte: u8) -> nb::Result<(), GatewayError> {
        if self.active.is_some() {
            return Err(nb::Error::WouldBlock);
        }
        nb::block!(self.tx.write(byte)).map_err(|_| nb::Error::Other(GatewayError::Serial))
    }

    /// Next received byte when no exchange owns the receive stream
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.active.is_some() {
            return None;
        }
        self.rx.pop()
    }

    /// Throws away whatever the modem has sent so far
    pub fn discard_pending(&mut self) {
        self.rx.clear();
    }

    /// Bytes the receive interrupt had to drop, wrapping at 256
    pub fn rx_dropped(&self) -> u8 {
        self.rx.dropped()
    }

    pub fn now_ms(&self) -> u32 {
        self.timebase.now_ms()
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.timebase.delay_ms(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::Clock;
    use crate::testing::{modem_rig, ModemSim, SimClock};

    fn engine() -> (SimClock, ModemSim, AtEngine<'static, ModemSim, SimClock>) {
        let (clock, modem, rx) = modem_rig();
        let engine = AtEngine::new(modem.clone(), rx, clock.clone());
        (clock, modem, engine)
    }

    #[test]
    fn command_completes_on_ok() {
        let (clock, modem, mut at) = engine();
        modem.on("AT\r\n", &[(40, "AT\r\nOK\r\n")]);

        let response = at.send_command("AT\r\n", 2000);
        assert!(response.is_success());
        assert_eq!(response.termination(), Termination::Ok);
        assert!(response.contains("OK\r\n"));
        assert!(clock.now_ms() <= 50);
        assert_eq!(modem.commands(), vec!["AT\r\n".to_string()]);
    }

    #[test]
    fn error_reply_also_completes() {
        let (_clock, modem, mut at) = engine();
        modem.on("AT+QNETDEVCTL", &[(10, "\r\nERROR\r\n")]);
        let response = at.send_command("AT+QNETDEVCTL=1,1,1\r\n", 15_000);
        assert!(response.is_success());
        assert_eq!(response.termination(), Termination::Error);
    }

    #[test]
    fn silent_modem_times_out_on_budget() {
        let (clock, _modem, mut at) = engine();
        let start = clock.now_ms();
        let response = at.send_command("AT\r\n", 2000);
        let elapsed = clock.now_ms() - start;
        assert_eq!(response.termination(), Termination::Timeout);
        assert!(!response.is_success());
        assert!((1990..=2100).contains(&elapsed), "elapsed {}", elapsed);
    }

    #[test]
    fn partial_response_is_returned_on_timeout() {
        let (_clock, modem, mut at) = engine();
        modem.on("AT+COPS?", &[(5, "+COPS: 0,0,\"CHN")]);
        let response = at.send_command("AT+COPS?\r\n", 300);
        assert_eq!(response.termination(), Termination::Timeout);
        assert_eq!(response.as_str(), "+COPS: 0,0,\"CHN");
    }

    #[test]
    fn stale_bytes_are_discarded_before_sending() {
        let (clock, modem, mut at) = engine();
        modem.emit_after(1, "junk OK\r\n");
        clock.advance(5);
        modem.on("AT\r\n", &[(5, "OK\r\n")]);
        let response = at.send_command("AT\r\n", 100);
        assert_eq!(response.as_str(), "OK\r\n");
    }

    #[test]
    fn quiet_period_delays_completion() {
        let (clock, modem, mut at) = engine();
        modem.emit_after(500, "+QIOPEN: 0,0\r\n");
        let response = at.wait_for_response("+QIOPEN:", 30_000);
        assert_eq!(response.termination(), Termination::Expected);
        let after_notification = clock.now_ms() - 500;
        assert!((100..=200).contains(&after_notification), "took {}", after_notification);
        assert!(response.contains("+QIOPEN: 0,0"));
    }

    #[test]
    fn trailing_lines_extend_the_quiet_wait() {
        let (clock, modem, mut at) = engine();
        modem.emit_after(10, "+QIOPEN: 0,");
        modem.emit_after(60, "0\r\n");
        let response = at.wait_for_response("+QIOPEN:", 1000);
        assert_eq!(response.as_str(), "+QIOPEN: 0,0\r\n");
        assert!(clock.now_ms() > 160);
    }

    #[test]
    fn overflowing_response_cannot_complete() {
        let (_clock, modem, mut at) = engine();
        let filler = "x".repeat(200);
        modem.on("AT+BIG", &[(1, &filler), (20, &filler), (40, &filler), (60, "OK\r\n")]);
        let response = at.send_command("AT+BIG\r\n", 500);
        assert_eq!(response.termination(), Termination::Timeout);
        assert_eq!(response.as_bytes().len(), AT_RESPONSE_CAPACITY);
    }

    #[test]
    fn raw_writes_wait_for_exchange() {
        let (_clock, modem, mut at) = engine();
        assert!(!at.is_busy());
        at.start("AT\r\n", Completion::Terminator, 100);
        assert!(at.is_busy());
        assert_eq!(at.write_raw(b'x'), Err(nb::Error::WouldBlock));
        while at.poll().is_none() {
            at.delay_ms(1);
        }
        assert!(!at.is_busy());
        assert_eq!(at.write_raw(b'x'), Ok(()));
        assert_eq!(modem.raw(), b"AT\r\nx".to_vec());
    }
}
