use avr_device::atmega128a::{PORTC, PORTE};
use core::convert::Infallible;
use core::marker::PhantomData;
use embedded_hal::digital::v2::{OutputPin, StatefulOutputPin};

pub struct Input;
pub struct Output;

/// Port pin `PIN` of `PORT`, typed by direction
pub struct Pin<PORT, const PIN: u8, MODE> {
    _port: PhantomData<PORT>,
    _mode: PhantomData<MODE>,
}

impl<PORT, const PIN: u8> Pin<PORT, PIN, Input> {
    /// Only `board::Pins::take` hands these out, once per pin
    const fn reset() -> Self {
        Pin {
            _port: PhantomData,
            _mode: PhantomData,
        }
    }
}

macro_rules! impl_port {
    ($PORT:ident, $pin:ident, $ddr:ident, $port:ident) => {
        impl<const P: u8> Pin<$PORT, P, Input> {
            /// Drives the pin low before switching it to output, so the
            /// attached transistor never sees a glitch high
            pub fn into_output(self) -> Pin<$PORT, P, Output> {
                unsafe {
                    (*$PORT::ptr()).$port.modify(|r, w| w.bits(r.bits() & !(1 << P)));
                    (*$PORT::ptr()).$ddr.modify(|r, w| w.bits(r.bits() | (1 << P)));
                }
                Pin {
                    _port: PhantomData,
                    _mode: PhantomData,
                }
            }

            pub fn into_output_high(self) -> Pin<$PORT, P, Output> {
                unsafe {
                    (*$PORT::ptr()).$port.modify(|r, w| w.bits(r.bits() | (1 << P)));
                    (*$PORT::ptr()).$ddr.modify(|r, w| w.bits(r.bits() | (1 << P)));
                }
                Pin {
                    _port: PhantomData,
                    _mode: PhantomData,
                }
            }
        }

        impl<const P: u8> OutputPin for Pin<$PORT, P, Output> {
            type Error = Infallible;

            #[inline]
            fn set_high(&mut self) -> Result<(), Infallible> {
                unsafe {
                    (*$PORT::ptr()).$port.modify(|r, w| w.bits(r.bits() | (1 << P)));
                }
                Ok(())
            }

            #[inline]
            fn set_low(&mut self) -> Result<(), Infallible> {
                unsafe {
                    (*$PORT::ptr()).$port.modify(|r, w| w.bits(r.bits() & !(1 << P)));
                }
                Ok(())
            }
        }

        impl<const P: u8> StatefulOutputPin for Pin<$PORT, P, Output> {
            #[inline]
            fn is_set_high(&self) -> Result<bool, Infallible> {
                Ok(unsafe { (*$PORT::ptr()).$port.read().bits() } & (1 << P) != 0)
            }

            #[inline]
            fn is_set_low(&self) -> Result<bool, Infallible> {
                self.is_set_high().map(|high| !high)
            }
        }

        impl<const P: u8> Pin<$PORT, P, Input> {
            #[inline]
            pub fn is_high(&self) -> bool {
                unsafe { (*$PORT::ptr()).$pin.read().bits() & (1 << P) != 0 }
            }
        }
    };
}

impl_port!(PORTC, pinc, ddrc, portc);
impl_port!(PORTE, pine, ddre, porte);

/// Gateway carrier board wiring
pub mod board {
    use super::*;

    /// MAX13487 receiver enable, active low
    pub type Rs485Re = Pin<PORTE, 2, Output>;
    /// MAX13487 shutdown, active low
    pub type Rs485Shdn = Pin<PORTE, 3, Output>;
    /// Relay coil drivers, high energizes
    pub type RelayK1 = Pin<PORTC, 0, Output>;
    pub type RelayK2 = Pin<PORTC, 1, Output>;

    pub struct Pins {
        pub rs485_re: Pin<PORTE, 2, Input>,
        pub rs485_shdn: Pin<PORTE, 3, Input>,
        pub relay_k1: Pin<PORTC, 0, Input>,
        pub relay_k2: Pin<PORTC, 1, Input>,
    }

    impl Pins {
        /// Consumes the port peripherals so no other code can touch the pins
        pub fn take(_portc: PORTC, _porte: PORTE) -> Self {
            Self {
                rs485_re: Pin::reset(),
                rs485_shdn: Pin::reset(),
                relay_k1: Pin::reset(),
                relay_k2: Pin::reset(),
            }
        }
    }
}
