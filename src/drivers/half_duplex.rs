//! Half-duplex RS-485 line behind a MAX13487 transceiver.
//!
//! The transceiver has two control inputs: RE# (receiver enable, active low)
//! and SHDN# (shutdown, active low). Receive mode is RE#=low, SHDN#=high;
//! transmit mode is RE#=high, SHDN#=high. The line has one owner at a time:
//! `acquire_transmit` switches to transmit and waits the settle time before
//! returning, `release` waits for the last byte to leave and switches back.

use core::cell::{Cell, RefCell};

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;

use crate::config::{DIRECTION_SETTLE_MS, TRAILING_SETTLE_MS};
use crate::protocol::{GatewayError, Result};

/// Logical flows that may drive the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOwner {
    Boot,
    Relay,
    Interceptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Receive,
    Transmit,
}

struct Port<TX, RE, SHDN, D> {
    tx: TX,
    re: RE,
    shdn: SHDN,
    delay: D,
}

pub struct HalfDuplexLine<TX, RE, SHDN, D> {
    port: RefCell<Port<TX, RE, SHDN, D>>,
    owner: Cell<Option<LineOwner>>,
    direction: Cell<Direction>,
}

impl<TX, RE, SHDN, D> HalfDuplexLine<TX, RE, SHDN, D>
where
    TX: serial::Write<u8>,
    RE: OutputPin,
    SHDN: OutputPin,
    D: DelayMs<u32>,
{
    /// Takes the UART and control pins; the line starts in receive mode
    pub fn new(tx: TX, re: RE, shdn: SHDN, delay: D) -> Result<Self> {
        let line = Self {
            port: RefCell::new(Port { tx, re, shdn, delay }),
            owner: Cell::new(None),
            direction: Cell::new(Direction::Receive),
        };
        line.set_receive_mode()?;
        Ok(line)
    }

    pub fn direction(&self) -> Direction {
        self.direction.get()
    }

    pub fn owner(&self) -> Option<LineOwner> {
        self.owner.get()
    }

    /// Puts the line in transmit mode for `owner`. Returns after the settle
    /// delay, so the caller may send immediately. Re-acquiring by the current
    /// owner is a no-op.
    pub fn acquire_transmit(&self, owner: LineOwner) -> Result<()> {
        match self.owner.get() {
            Some(current) if current == owner => return Ok(()),
            Some(current) => {
                log::warn!("line held by {:?}, {:?} refused", current, owner);
                return Err(GatewayError::LineBusy);
            }
            None => {}
        }
        self.set_transmit_mode()?;
        self.port.borrow_mut().delay.delay_ms(DIRECTION_SETTLE_MS);
        self.owner.set(Some(owner));
        Ok(())
    }

    /// Drains the UART, waits the trailing settle delay and returns the line
    /// to receive mode. The owner keeps the line if the pins could not be
    /// switched back, so it can retry.
    pub fn release(&self, owner: LineOwner) -> Result<()> {
        if self.owner.get() != Some(owner) {
            return Err(GatewayError::LineNotAcquired);
        }
        {
            let mut port = self.port.borrow_mut();
            nb::block!(port.tx.flush()).map_err(|_| GatewayError::Serial)?;
            port.delay.delay_ms(TRAILING_SETTLE_MS);
        }
        self.set_receive_mode()?;
        self.owner.set(None);
        Ok(())
    }

    /// One byte; returns once the UART has shifted it out
    pub fn send_byte(&self, owner: LineOwner, byte: u8) -> Result<()> {
        self.check_owner(owner)?;
        let mut port = self.port.borrow_mut();
        nb::block!(port.tx.write(byte)).map_err(|_| GatewayError::Serial)?;
        nb::block!(port.tx.flush()).map_err(|_| GatewayError::Serial)
    }

    /// Streams bytes without touching the direction pins
    pub fn send_buffer(&self, owner: LineOwner, bytes: &[u8]) -> Result<()> {
        self.check_owner(owner)?;
        let mut port = self.port.borrow_mut();
        for &b in bytes {
            nb::block!(port.tx.write(b)).map_err(|_| GatewayError::Serial)?;
        }
        Ok(())
    }

    /// Full direction cycle around `text`
    pub fn send_string(&self, owner: LineOwner, text: &str) -> Result<()> {
        self.acquire_transmit(owner)?;
        let sent = self.send_buffer(owner, text.as_bytes());
        let released = self.release(owner);
        sent.and(released)
    }

    /// `ufmt` writer for an owner that already holds the line
    pub fn writer(&self, owner: LineOwner) -> LineWriter<'_, TX, RE, SHDN, D> {
        LineWriter { line: self, owner }
    }

    fn check_owner(&self, owner: LineOwner) -> Result<()> {
        if self.owner.get() == Some(owner) {
            Ok(())
        } else {
            Err(GatewayError::LineNotAcquired)
        }
    }

    fn set_receive_mode(&self) -> Result<()> {
        let mut port = self.port.borrow_mut();
        port.re.set_low().map_err(|_| GatewayError::Pin)?;
        port.shdn.set_high().map_err(|_| GatewayError::Pin)?;
        self.direction.set(Direction::Receive);
        Ok(())
    }

    fn set_transmit_mode(&self) -> Result<()> {
        let mut port = self.port.borrow_mut();
        port.re.set_high().map_err(|_| GatewayError::Pin)?;
        port.shdn.set_high().map_err(|_| GatewayError::Pin)?;
        self.direction.set(Direction::Transmit);
        Ok(())
    }
}

pub struct LineWriter<'l, TX, RE, SHDN, D> {
    line: &'l HalfDuplexLine<TX, RE, SHDN, D>,
    owner: LineOwner,
}

impl<TX, RE, SHDN, D> ufmt::uWrite for LineWriter<'_, TX, RE, SHDN, D>
where
    TX: serial::Write<u8>,
    RE: OutputPin,
    SHDN: OutputPin,
    D: DelayMs<u32>,
{
    type Error = GatewayError;

    fn write_str(&mut self, s: &str) -> Result<()> {
        self.line.send_buffer(self.owner, s.as_bytes())
    }
}
