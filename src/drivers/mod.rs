pub mod half_duplex;
pub mod modem;
pub mod relay;

pub use half_duplex::{HalfDuplexLine, LineOwner, LineWriter};
pub use modem::{BootReport, ModemSession, SessionState, UartControl};
pub use relay::{Relay, RelayBank};
