//! Relay outputs K1 and K2

use embedded_hal::digital::v2::OutputPin;

use crate::protocol::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    K1,
    K2,
}

pub struct RelayBank<K1, K2> {
    k1: K1,
    k2: K2,
}

impl<K1, K2> RelayBank<K1, K2>
where
    K1: OutputPin,
    K2: OutputPin,
{
    pub fn new(k1: K1, k2: K2) -> Self {
        Self { k1, k2 }
    }

    /// Drives the relay coil; `energize` maps to the pin's high level
    pub fn set(&mut self, relay: Relay, energize: bool) -> Result<()> {
        let result = match (relay, energize) {
            (Relay::K1, true) => self.k1.set_high().map_err(|_| GatewayError::Pin),
            (Relay::K1, false) => self.k1.set_low().map_err(|_| GatewayError::Pin),
            (Relay::K2, true) => self.k2.set_high().map_err(|_| GatewayError::Pin),
            (Relay::K2, false) => self.k2.set_low().map_err(|_| GatewayError::Pin),
        };
        if result.is_err() {
            log::error!("relay {:?} pin write failed", relay);
        }
        result
    }

    pub fn release(self) -> (K1, K2) {
        (self.k1, self.k2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::pin::{Mock as PinMock, State, Transaction};

    #[test]
    fn relays_are_independent() {
        let k1 = PinMock::new(&[Transaction::set(State::High), Transaction::set(State::Low)]);
        let k2 = PinMock::new(&[Transaction::set(State::High)]);
        let mut bank = RelayBank::new(k1, k2);

        bank.set(Relay::K1, true).unwrap();
        bank.set(Relay::K2, true).unwrap();
        bank.set(Relay::K1, false).unwrap();

        let (mut k1, mut k2) = bank.release();
        k1.done();
        k2.done();
    }
}
