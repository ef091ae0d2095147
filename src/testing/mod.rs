//! Host test kit: simulated millisecond time, a scripted modem that answers
//! commands in simulated time, and recording stand-ins for the RS-485 UART
//! and GPIO pins.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;

use crate::config::RX_RING_CAPACITY;
use crate::hal::ring_buffer::{ByteRingBuffer, Consumer, Producer};
use crate::os::Clock;

/// Splits a ring that lives for the rest of the test process
pub fn leak_ring<const N: usize>() -> (Producer<'static, N>, Consumer<'static, N>) {
    Box::leak(Box::new(ByteRingBuffer::<N>::new())).split()
}

struct Delivery {
    due: u32,
    bytes: Vec<u8>,
}

struct Rule {
    prefix: String,
    replies: Vec<(u32, Vec<u8>)>,
    remaining: Option<usize>,
}

struct SimState {
    now: u32,
    feed: Producer<'static, RX_RING_CAPACITY>,
    deliveries: Vec<Delivery>,
    rules: Vec<Rule>,
    line: Vec<u8>,
    commands: Vec<String>,
    raw: Vec<u8>,
}

impl SimState {
    fn step(&mut self) {
        self.now = self.now.wrapping_add(1);
        let now = self.now;
        let mut index = 0;
        while index < self.deliveries.len() {
            if self.deliveries[index].due <= now {
                let delivery = self.deliveries.remove(index);
                for b in delivery.bytes {
                    self.feed.push(b);
                }
            } else {
                index += 1;
            }
        }
    }

    fn command_complete(&mut self) {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        let now = self.now;
        let mut scheduled = Vec::new();
        for rule in self.rules.iter_mut() {
            if rule.remaining == Some(0) || !line.starts_with(rule.prefix.as_str()) {
                continue;
            }
            if let Some(left) = rule.remaining.as_mut() {
                *left -= 1;
            }
            for (delay, bytes) in &rule.replies {
                // A reply never lands in the same millisecond it was provoked
                scheduled.push(Delivery { due: now + (*delay).max(1), bytes: bytes.clone() });
            }
            break;
        }
        self.deliveries.extend(scheduled);
        self.commands.push(line);
    }
}

/// Shared simulated time. Every `delay_ms` advances it one millisecond at a
/// time and releases modem output that has become due.
#[derive(Clone)]
pub struct SimClock {
    state: Rc<RefCell<SimState>>,
}

impl SimClock {
    pub fn advance(&self, ms: u32) {
        for _ in 0..ms {
            self.state.borrow_mut().step();
        }
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        self.state.borrow().now
    }
}

impl DelayMs<u32> for SimClock {
    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms);
    }
}

/// Modem command UART as seen from the firmware
#[derive(Clone)]
pub struct ModemSim {
    state: Rc<RefCell<SimState>>,
}

impl ModemSim {
    /// Answers every command starting with `prefix`
    pub fn on(&self, prefix: &str, replies: &[(u32, &str)]) -> &Self {
        self.rule(prefix, replies, None)
    }

    /// Answers the next `times` commands starting with `prefix`
    pub fn on_times(&self, prefix: &str, times: usize, replies: &[(u32, &str)]) -> &Self {
        self.rule(prefix, replies, Some(times))
    }

    fn rule(&self, prefix: &str, replies: &[(u32, &str)], remaining: Option<usize>) -> &Self {
        self.state.borrow_mut().rules.push(Rule {
            prefix: prefix.to_string(),
            replies: replies.iter().map(|(d, text)| (*d, text.as_bytes().to_vec())).collect(),
            remaining,
        });
        self
    }

    /// Unsolicited output `delay` ms from now
    pub fn emit_after(&self, delay: u32, text: &str) {
        let mut state = self.state.borrow_mut();
        let due = state.now + delay.max(1);
        state.deliveries.push(Delivery { due, bytes: text.as_bytes().to_vec() });
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn raw(&self) -> Vec<u8> {
        self.state.borrow().raw.clone()
    }
}

impl serial::Write<u8> for ModemSim {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.raw.push(word);
        state.line.push(word);
        if word == b'\n' {
            state.command_complete();
        }
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

/// Clock, modem TX and the consumer end of the modem receive ring
pub fn modem_rig() -> (SimClock, ModemSim, Consumer<'static, RX_RING_CAPACITY>) {
    let (feed, rx) = leak_ring::<RX_RING_CAPACITY>();
    let state = Rc::new(RefCell::new(SimState {
        now: 0,
        feed,
        deliveries: Vec::new(),
        rules: Vec::new(),
        line: Vec::new(),
        commands: Vec::new(),
        raw: Vec::new(),
    }));
    (SimClock { state: state.clone() }, ModemSim { state }, rx)
}

/// RS-485 UART that keeps everything written to it
#[derive(Clone, Default)]
pub struct CaptureSerial {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl CaptureSerial {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }
}

impl serial::Write<u8> for CaptureSerial {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.bytes.borrow_mut().push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

/// Output pin that records every level it is driven to
#[derive(Clone, Default)]
pub struct LevelPin {
    levels: Rc<RefCell<Vec<bool>>>,
}

impl LevelPin {
    pub fn levels(&self) -> Vec<bool> {
        self.levels.borrow().clone()
    }
}

impl OutputPin for LevelPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(true);
        Ok(())
    }
}

/// `ufmt` sink collecting text
#[derive(Default)]
pub struct TextSink(pub String);

impl ufmt::uWrite for TextSink {
    type Error = Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        self.0.push_str(s);
        Ok(())
    }
}
