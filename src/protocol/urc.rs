//! Line scanner for unsolicited result codes on the modem stream

use heapless::Vec;

use super::parse_decimal;
use crate::config::URC_LINE_CAPACITY;

const RECV_MARKER: &[u8] = b"+QIURC: \"recv\"";
const CLOSED_MARKER: &[u8] = b"+QIURC: \"closed\",";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrcEvent {
    /// Socket data is waiting in the modem
    DataReady,
    /// The modem closed a socket
    Closed(u8),
    /// Line exceeded the buffer and was thrown away
    LineOverflow,
}

pub struct UrcDetector {
    line: Vec<u8, URC_LINE_CAPACITY>,
    overflows: u16,
}

impl UrcDetector {
    pub const fn new() -> Self {
        Self {
            line: Vec::new(),
            overflows: 0,
        }
    }

    /// Feeds one modem byte. The receive notification fires as soon as its
    /// marker is complete, without waiting for the rest of the line.
    pub fn feed(&mut self, byte: u8) -> Option<UrcEvent> {
        if self.line.push(byte).is_err() {
            self.line.clear();
            self.overflows = self.overflows.wrapping_add(1);
            log::warn!("URC line overflow, clearing");
            return Some(UrcEvent::LineOverflow);
        }

        if self.line.ends_with(RECV_MARKER) {
            self.line.clear();
            return Some(UrcEvent::DataReady);
        }

        if byte == b'\n' {
            let event = self
                .line
                .strip_prefix(CLOSED_MARKER)
                .or_else(|| {
                    let start = self.line.iter().position(|&b| b == b'+')?;
                    self.line[start..].strip_prefix(CLOSED_MARKER)
                })
                .and_then(parse_decimal)
                .and_then(|(id, _)| u8::try_from(id).ok())
                .map(UrcEvent::Closed);
            self.line.clear();
            return event;
        }
        None
    }

    pub fn reset(&mut self) {
        self.line.clear();
    }

    pub fn overflows(&self) -> u16 {
        self.overflows
    }
}

impl Default for UrcDetector {
    fn default() -> Self {
        Self::new()
    }
}
