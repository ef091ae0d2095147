use avr_device::atmega128a::CPU;

// MCUCR: SE is bit 5, SM1..0 sit at bits 4:3 and SM2 at bit 2
const SE: u8 = 1 << 5;
const SM_MASK: u8 = 0b0001_1100;

/// Sleep control. Only idle mode is used: the UARTs and Timer0 keep running
/// and any of their interrupts wakes the core.
pub struct Power {
    _private: (),
}

impl Power {
    pub fn new(_cpu: CPU) -> Self {
        unsafe {
            (*CPU::ptr()).mcucr.modify(|r, w| w.bits(r.bits() & !SM_MASK));
        }
        Self { _private: () }
    }

    /// Sleeps until the next interrupt
    pub fn idle(&mut self) {
        unsafe {
            let p = CPU::ptr();
            (*p).mcucr.modify(|r, w| w.bits(r.bits() | SE));
            avr_device::asm::sleep();
            (*p).mcucr.modify(|r, w| w.bits(r.bits() & !SE));
        }
    }
}
