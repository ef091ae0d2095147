//! USART0 drives the RS-485 transceiver, USART1 talks to the modem.
//!
//! Both receivers are interrupt driven: the RX interrupt moves each byte into
//! the producer end of a `ByteRingBuffer` installed by `init`. Transmit is
//! polled through `embedded_hal::serial::Write`.

#![allow(clippy::missing_safety_doc)]

use avr_device::atmega128a::{USART0, USART1};
use avr_device::interrupt::{self, Mutex};
use core::cell::RefCell;
use core::convert::Infallible;
use embedded_hal::serial;

use crate::config::{CPU_FREQ_HZ, MODEM_BAUD, RS485_BAUD, RX_RING_CAPACITY};
use crate::drivers::modem::UartControl;
use crate::hal::ring_buffer::Producer;

type RxProducer = Producer<'static, RX_RING_CAPACITY>;

static RS485_RX: Mutex<RefCell<Option<RxProducer>>> = Mutex::new(RefCell::new(None));
static MODEM_RX: Mutex<RefCell<Option<RxProducer>>> = Mutex::new(RefCell::new(None));

// UCSRnA
const TXC: u8 = 1 << 6;
const UDRE: u8 = 1 << 5;
const U2X: u8 = 1 << 1;
// UCSRnB
const RXCIE: u8 = 1 << 7;
const RXEN: u8 = 1 << 4;
const TXEN: u8 = 1 << 3;
// UCSRnC, asynchronous 8N1
const FRAME_8N1: u8 = 0b0000_0110;

/// Double-speed divisor, rounded to nearest. At 16 MHz this is 207 for
/// 9600 baud and 16 for 115200 (2.1% error, within the receiver's margin).
const fn ubrr_u2x(baud: u32) -> u16 {
    ((CPU_FREQ_HZ + 4 * baud) / (8 * baud) - 1) as u16
}

macro_rules! usart {
    ($Name:ident, $USART:ident, $RX:ident, $isr:ident, $baud:expr,
     $udr:ident, $ucsra:ident, $ucsrb:ident, $ucsrc:ident, $ubrrh:ident, $ubrrl:ident) => {
        /// Transmit half of the port
        pub struct $Name {
            // A byte went out since the last completed flush
            pending: bool,
        }

        impl $Name {
            fn init(producer: RxProducer) -> Self {
                interrupt::free(|cs| {
                    $RX.borrow(cs).replace(Some(producer));
                });
                unsafe {
                    let p = $USART::ptr();
                    let divisor = ubrr_u2x($baud);
                    (*p).$ubrrh.write(|w| w.bits((divisor >> 8) as u8));
                    (*p).$ubrrl.write(|w| w.bits(divisor as u8));
                    (*p).$ucsra.write(|w| w.bits(U2X));
                    (*p).$ucsrc.write(|w| w.bits(FRAME_8N1));
                    (*p).$ucsrb.write(|w| w.bits(RXEN | TXEN | RXCIE));
                }
                Self { pending: false }
            }
        }

        impl serial::Write<u8> for $Name {
            type Error = Infallible;

            fn write(&mut self, byte: u8) -> nb::Result<(), Infallible> {
                unsafe {
                    let p = $USART::ptr();
                    if (*p).$ucsra.read().bits() & UDRE == 0 {
                        return Err(nb::Error::WouldBlock);
                    }
                    // TXC is cleared by writing it as one
                    (*p).$ucsra.write(|w| w.bits(U2X | TXC));
                    (*p).$udr.write(|w| w.bits(byte));
                }
                self.pending = true;
                Ok(())
            }

            /// Completes once the last stop bit has left the shift register
            fn flush(&mut self) -> nb::Result<(), Infallible> {
                if !self.pending {
                    return Ok(());
                }
                let done = unsafe { (*$USART::ptr()).$ucsra.read().bits() & TXC != 0 };
                if done {
                    self.pending = false;
                    Ok(())
                } else {
                    Err(nb::Error::WouldBlock)
                }
            }
        }

        #[avr_device::interrupt(atmega128a)]
        fn $isr() {
            // Reading UDR also clears the frame and overrun flags
            let byte = unsafe { (*$USART::ptr()).$udr.read().bits() };
            interrupt::free(|cs| {
                if let Some(producer) = $RX.borrow(cs).borrow_mut().as_mut() {
                    producer.push(byte);
                }
            });
        }
    };
}

usart!(Rs485Uart, USART0, RS485_RX, USART0_RX, RS485_BAUD,
       udr0, ucsr0a, ucsr0b, ucsr0c, ubrr0h, ubrr0l);
usart!(ModemUart, USART1, MODEM_RX, USART1_RX, MODEM_BAUD,
       udr1, ucsr1a, ucsr1b, ucsr1c, ubrr1h, ubrr1l);

/// Brings up both ports. The producers feed the RX interrupts from here on.
pub fn init(
    _usart0: USART0,
    _usart1: USART1,
    rs485_rx: RxProducer,
    modem_rx: RxProducer,
) -> (Rs485Uart, ModemUart, ModemUartControl) {
    (
        Rs485Uart::init(rs485_rx),
        ModemUart::init(modem_rx),
        ModemUartControl { _private: () },
    )
}

/// Takes the modem port off the line while the module powers up
pub struct ModemUartControl {
    _private: (),
}

impl UartControl for ModemUartControl {
    fn shutdown(&mut self) {
        unsafe {
            (*USART1::ptr())
                .ucsr1b
                .modify(|r, w| w.bits(r.bits() & !(RXEN | TXEN | RXCIE)));
        }
    }

    fn restart(&mut self) {
        unsafe {
            (*USART1::ptr())
                .ucsr1b
                .modify(|r, w| w.bits(r.bits() | RXEN | TXEN | RXCIE));
        }
    }
}
