//! In-band relay commands carried in socket payloads

use ufmt::uWrite;

use crate::config::COMMAND_CAPACITY;
use crate::drivers::relay::{Relay, RelayBank};
use embedded_hal::digital::v2::OutputPin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Relay1On,
    Relay1Off,
    Relay2On,
    Relay2Off,
}

const COMMANDS: [(&[u8], RelayCommand); 4] = [
    (b"RELAY1_ON", RelayCommand::Relay1On),
    (b"RELAY1_OFF", RelayCommand::Relay1Off),
    (b"RELAY2_ON", RelayCommand::Relay2On),
    (b"RELAY2_OFF", RelayCommand::Relay2Off),
];

impl RelayCommand {
    /// Exact, case-sensitive lookup of an already trimmed token
    pub fn parse(token: &[u8]) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, command)| *command)
    }

    pub fn relay(self) -> Relay {
        match self {
            RelayCommand::Relay1On | RelayCommand::Relay1Off => Relay::K1,
            RelayCommand::Relay2On | RelayCommand::Relay2Off => Relay::K2,
        }
    }

    pub fn energize(self) -> bool {
        matches!(self, RelayCommand::Relay1On | RelayCommand::Relay2On)
    }

    pub fn label(self) -> &'static str {
        match self {
            RelayCommand::Relay1On => "RELAY1 ON",
            RelayCommand::Relay1Off => "RELAY1 OFF",
            RelayCommand::Relay2On => "RELAY2 ON",
            RelayCommand::Relay2Off => "RELAY2 OFF",
        }
    }
}

/// Limits the payload to the command buffer, then cuts it at the first `\r`
/// and after that at the first `\n`
pub fn trim_command(payload: &[u8]) -> &[u8] {
    let mut token = &payload[..payload.len().min(COMMAND_CAPACITY - 1)];
    for terminator in [b'\r', b'\n'] {
        if let Some(end) = token.iter().position(|&b| b == terminator) {
            token = &token[..end];
        }
    }
    token
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    Applied(RelayCommand),
    /// Recognised but the relay pin could not be driven
    PinFailed(RelayCommand),
    Unknown,
}

/// Applies relay commands found in socket payloads and writes the echo line
#[derive(Debug, Default)]
pub struct CommandInterceptor {
    applied: u16,
    unknown: u16,
}

impl CommandInterceptor {
    pub const fn new() -> Self {
        Self {
            applied: 0,
            unknown: 0,
        }
    }

    pub fn process<K1, K2, W>(
        &mut self,
        payload: &[u8],
        relays: &mut RelayBank<K1, K2>,
        echo: &mut W,
    ) -> Interception
    where
        K1: OutputPin,
        K2: OutputPin,
        W: uWrite,
    {
        let token = trim_command(payload);
        match RelayCommand::parse(token) {
            Some(command) => {
                if relays.set(command.relay(), command.energize()).is_err() {
                    return Interception::PinFailed(command);
                }
                self.applied = self.applied.wrapping_add(1);
                log::info!("relay command {}", command.label());
                let _ = ufmt::uwrite!(echo, "[CMD] {}\r\n", command.label());
                Interception::Applied(command)
            }
            None => {
                self.unknown = self.unknown.wrapping_add(1);
                let text = printable(token);
                log::debug!("unknown command {}", text);
                let _ = ufmt::uwrite!(echo, "[CMD] Unknown: {}\r\n", text);
                Interception::Unknown
            }
        }
    }

    pub fn applied(&self) -> u16 {
        self.applied
    }

    pub fn unknown(&self) -> u16 {
        self.unknown
    }
}

fn printable(token: &[u8]) -> &str {
    match core::str::from_utf8(token) {
        Ok(text) => text,
        Err(e) => core::str::from_utf8(&token[..e.valid_up_to()]).unwrap_or_default(),
    }
}
