#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]

use avr_device::atmega128a::Peripherals;
use avr_device::interrupt::{self, Mutex};
use core::cell::RefCell;
use core::ptr::addr_of_mut;
use log::{LevelFilter, Metadata, Record};
use panic_halt as _;

use gateway_firmware::application::{self, Gateway};
use gateway_firmware::config::{GatewayConfig, RX_RING_CAPACITY};
use gateway_firmware::drivers::{HalfDuplexLine, ModemSession, RelayBank};
use gateway_firmware::hal::{board, millis, timer, uart, ByteRingBuffer, Power};
use gateway_firmware::logger::LogRing;
use gateway_firmware::protocol::at::AtEngine;

const LOG_DEPTH: usize = 8;

// Filled by the RX interrupts, split once in `main`
static mut RS485_RING: ByteRingBuffer<RX_RING_CAPACITY> = ByteRingBuffer::new();
static mut MODEM_RING: ByteRingBuffer<RX_RING_CAPACITY> = ByteRingBuffer::new();

static LOG: Mutex<RefCell<Option<LogRing<LOG_DEPTH>>>> = Mutex::new(RefCell::new(None));
static LOGGER: BoardLogger = BoardLogger;

/// Keeps the latest records in RAM for inspection with a debugger
struct BoardLogger;

impl log::Log for BoardLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = millis();
        interrupt::free(|cs| {
            if let Some(ring) = LOG.borrow(cs).borrow_mut().as_mut() {
                ring.push(now, record.level(), record.args());
            }
        });
    }

    fn flush(&self) {}
}

fn init_logger() {
    interrupt::free(|cs| {
        LOG.borrow(cs).replace(Some(LogRing::new()));
    });
    // Single threaded and interrupts are still off
    unsafe {
        if log::set_logger_racy(&LOGGER).is_ok() {
            let level = if cfg!(feature = "debug") {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            };
            log::set_max_level_racy(level);
        }
    }
}

#[avr_device::entry]
fn main() -> ! {
    let Some(dp) = Peripherals::take() else {
        panic!("peripherals already taken");
    };

    init_logger();

    // Only place the rings are borrowed mutably; the halves own them from here
    let (rs485_in, rs485_out) = unsafe { (*addr_of_mut!(RS485_RING)).split() };
    let (modem_in, modem_out) = unsafe { (*addr_of_mut!(MODEM_RING)).split() };

    let clock = timer::init(dp.TC0);
    let (rs485_tx, modem_tx, mut modem_control) =
        uart::init(dp.USART0, dp.USART1, rs485_in, modem_in);
    let pins = board::Pins::take(dp.PORTC, dp.PORTE);
    let mut power = Power::new(dp.CPU);

    // Receiver enabled (RE# low), driver powered (SHDN# high) from the start
    let line = match HalfDuplexLine::new(
        rs485_tx,
        pins.rs485_re.into_output(),
        pins.rs485_shdn.into_output_high(),
        clock,
    ) {
        Ok(line) => line,
        Err(e) => panic!("rs485 line init: {:?}", e),
    };
    let relays = RelayBank::new(pins.relay_k1.into_output(), pins.relay_k2.into_output());
    let mut session = ModemSession::new(
        AtEngine::new(modem_tx, modem_out, clock),
        GatewayConfig::DEFAULT,
    );

    unsafe { interrupt::enable() };
    log::info!("gateway firmware v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = application::boot(&mut session, &line, &mut modem_control) {
        log::error!("boot output: {:?}", e);
    }

    let gateway = Gateway {
        line: &line,
        session,
        relays,
        rs485_rx: rs485_out,
    };
    application::run(gateway, &clock, || power.idle())
}
