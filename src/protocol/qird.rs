//! Framing of the socket read reply: `+QIRD: <len>\r\n<payload>\r\nOK\r\n`.
//!
//! The declared length is treated as a hint. When the trailer sits exactly
//! where the declared length says, the declared length wins; otherwise the
//! first trailer after the header delimits the payload; with no trailer at all
//! the payload is whatever is available up to the declared length. The
//! result is always clamped to the requested maximum.

use super::{find, parse_decimal};

const HEADER: &[u8] = b"+QIRD:";
const TRAILER: &[u8] = b"\r\nOK";
// Quectel separates payload and result with an empty line
const SPACED_TRAILER: &[u8] = b"\r\n\r\nOK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AwaitingPayload {
        declared: usize,
        start: usize,
    },
    AwaitingTrailer {
        declared: usize,
        start: usize,
        framed: usize,
        source: LengthSource,
    },
}

/// Where the payload length came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthSource {
    Declared,
    Delimiter,
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketRead<'r> {
    pub payload: &'r [u8],
    pub declared: usize,
    pub source: LengthSource,
    /// `\r\nOK` follows the framed payload
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome<'r> {
    Data(SocketRead<'r>),
    /// Modem reported `+QIRD: 0`
    NoData,
    /// No usable header
    Malformed,
}

/// Splits a read reply into its payload, at most `max_len` bytes
pub fn parse(response: &[u8], max_len: usize) -> ReadOutcome<'_> {
    let mut state = State::AwaitingHeader;
    loop {
        state = match state {
            State::AwaitingHeader => {
                let Some(at) = find(response, HEADER) else {
                    return ReadOutcome::Malformed;
                };
                let header = &response[at + HEADER.len()..];
                let Some((declared, _)) = parse_decimal(header) else {
                    return ReadOutcome::Malformed;
                };
                if declared == 0 {
                    return ReadOutcome::NoData;
                }
                let Some(eol) = header.iter().position(|&b| b == b'\n') else {
                    return ReadOutcome::Malformed;
                };
                State::AwaitingPayload {
                    declared: declared as usize,
                    start: at + HEADER.len() + eol + 1,
                }
            }
            State::AwaitingPayload { declared, start } => {
                let body = &response[start..];
                let (framed, source) =
                    if body.len() >= declared && trailer_at(body, declared) {
                        (declared, LengthSource::Declared)
                    } else if let Some(end) = find(body, TRAILER) {
                        (end, LengthSource::Delimiter)
                    } else {
                        (declared.min(body.len()), LengthSource::Available)
                    };
                State::AwaitingTrailer { declared, start, framed, source }
            }
            State::AwaitingTrailer { declared, start, framed, source } => {
                let complete = trailer_at(&response[start..], framed);
                if framed != declared {
                    log::warn!("QIRD declared {} bytes, framing gives {}", declared, framed);
                }
                let len = framed.min(max_len);
                return ReadOutcome::Data(SocketRead {
                    payload: &response[start..start + len],
                    declared,
                    source,
                    complete,
                });
            }
        };
    }
}

fn trailer_at(body: &[u8], at: usize) -> bool {
    body.get(at..)
        .map_or(false, |rest| rest.starts_with(TRAILER) || rest.starts_with(SPACED_TRAILER))
}
