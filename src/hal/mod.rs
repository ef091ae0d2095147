pub mod ring_buffer;

#[cfg(feature = "atmega128")]
pub mod gpio;
#[cfg(feature = "atmega128")]
pub mod power;
#[cfg(feature = "atmega128")]
pub mod timer;
#[cfg(feature = "atmega128")]
pub mod uart;

pub use ring_buffer::{ByteRingBuffer, Consumer, Producer};

#[cfg(feature = "atmega128")]
pub use gpio::board;
#[cfg(feature = "atmega128")]
pub use power::Power;
#[cfg(feature = "atmega128")]
pub use timer::{millis, Millis};
#[cfg(feature = "atmega128")]
pub use uart::{ModemUart, ModemUartControl, Rs485Uart};
