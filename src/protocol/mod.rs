//! Modem-side protocol stack: AT exchanges, unsolicited result codes, the
//! socket read framing and the in-band relay command table.

pub mod at;
pub mod command;
pub mod qird;
pub mod urc;

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    /// UART refused a byte
    Serial,
    /// Direction or relay GPIO write failed
    Pin,
    /// Half-duplex line is held by another owner
    LineBusy,
    /// Caller tried to send without holding the line
    LineNotAcquired,
    BufferOverflow,
    Timeout,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GatewayError::Serial => "serial write failed",
            GatewayError::Pin => "gpio write failed",
            GatewayError::LineBusy => "half-duplex line busy",
            GatewayError::LineNotAcquired => "half-duplex line not acquired",
            GatewayError::BufferOverflow => "buffer overflow",
            GatewayError::Timeout => "timeout",
        };
        f.write_str(text)
    }
}

pub type Result<T> = core::result::Result<T, GatewayError>;

/// Position of the first occurrence of `needle` in `haystack`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// Leading decimal number of `bytes` after optional spaces, with the rest
pub fn parse_decimal(bytes: &[u8]) -> Option<(u32, &[u8])> {
    let start = bytes.iter().position(|&b| b != b' ')?;
    let digits = bytes[start..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let mut value: u32 = 0;
    for &b in &bytes[start..start + digits] {
        value = value.checked_mul(10)?.checked_add((b - b'0') as u32)?;
    }
    Some((value, &bytes[start + digits..]))
}

/// Parses the `<a>,<b>` pair that follows `tag` (e.g. `+CEREG: 0,1`)
pub fn parse_pair_after(haystack: &[u8], tag: &[u8]) -> Option<(u32, u32)> {
    let at = find(haystack, tag)?;
    let (first, rest) = parse_decimal(&haystack[at + tag.len()..])?;
    let rest = rest.strip_prefix(b",")?;
    let (second, _) = parse_decimal(rest)?;
    Some((first, second))
}
