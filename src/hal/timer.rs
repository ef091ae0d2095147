use avr_device::atmega128a::TC0;
use avr_device::interrupt::Mutex;
use core::cell::Cell;
use embedded_hal::blocking::delay::DelayMs;

use crate::config::CPU_FREQ_HZ;
use crate::os::{elapsed_ms, Clock};

// Timer0 on this part has its own prescaler table: CS0 = 0b100 is clk/64
const PRESCALER: u32 = 64;
const CS_DIV64: u8 = 0b100;
const WGM01: u8 = 1 << 3;
const OCIE0: u8 = 1 << 1;
const TICKS_PER_MS: u32 = CPU_FREQ_HZ / PRESCALER / 1000;

static MILLIS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Starts the 1 kHz system tick on Timer0 (CTC mode, compare interrupt)
pub fn init(_tc0: TC0) -> Millis {
    unsafe {
        let p = TC0::ptr();
        (*p).tccr0.write(|w| w.bits(0));
        (*p).tcnt0.write(|w| w.bits(0));
        (*p).ocr0.write(|w| w.bits((TICKS_PER_MS - 1) as u8));
        (*p).tccr0.write(|w| w.bits(WGM01 | CS_DIV64));
        (*p).timsk.modify(|r, w| w.bits(r.bits() | OCIE0));
    }
    Millis { _private: () }
}

/// Milliseconds since `init`, wrapping
pub fn millis() -> u32 {
    avr_device::interrupt::free(|cs| MILLIS.borrow(cs).get())
}

#[avr_device::interrupt(atmega128a)]
fn TIMER0_COMP() {
    avr_device::interrupt::free(|cs| {
        let counter = MILLIS.borrow(cs);
        counter.set(counter.get().wrapping_add(1));
    });
}

/// Handle to the system tick. Delays spin on the tick counter, so they need
/// interrupts enabled.
#[derive(Clone, Copy)]
pub struct Millis {
    _private: (),
}

impl Clock for Millis {
    fn now_ms(&self) -> u32 {
        millis()
    }
}

impl DelayMs<u32> for Millis {
    fn delay_ms(&mut self, ms: u32) {
        let start = millis();
        while elapsed_ms(millis(), start) < ms {}
    }
}

impl DelayMs<u16> for Millis {
    fn delay_ms(&mut self, ms: u16) {
        DelayMs::<u32>::delay_ms(self, ms as u32)
    }
}
