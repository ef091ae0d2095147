//! RS-485 to cellular modem gateway.
//!
//! Bytes arriving on the RS-485 bus are forwarded to a TCP socket held open by
//! an RG200U modem; data read back from the socket goes out on the bus. Exact
//! relay commands inside the downlink switch two on-board relays.
//!
//! Everything above `hal` is written against `embedded-hal` traits and runs on
//! the host under `cargo test`. The ATmega128 board layer is behind the
//! `atmega128` feature.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "atmega128", feature(abi_avr_interrupt))]

pub mod application;
pub mod config;
pub mod diagnostics;
pub mod drivers;
pub mod hal;
pub mod logger;
pub mod os;
pub mod protocol;
pub mod rtos;

#[cfg(test)]
mod testing;
