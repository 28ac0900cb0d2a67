//! Telnet option handling for vty sessions.
//!
//! The daemon offers options (`WILL ECHO`, `WILL SGA`, `DO NAWS`) when a
//! session opens. The client refuses every offer and strips all command
//! sequences from the data stream, leaving plain prompt text.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    /// Waiting for the option byte of a negotiation command.
    Option(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Incremental decoder; bytes may be split across reads at any point.
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: State,
}

/// Output of one [`TelnetDecoder::feed`] call.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Data bytes with all command sequences removed.
    pub data: Vec<u8>,
    /// Refusals to send back to the peer.
    pub replies: Vec<u8>,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, input: &[u8]) -> Decoded {
        let mut out = Decoded::default();
        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, IAC) => State::Iac,
                (State::Data, b) => {
                    out.data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    out.data.push(IAC);
                    State::Data
                }
                (State::Iac, cmd @ (WILL | WONT | DO | DONT)) => State::Option(cmd),
                (State::Iac, SB) => State::Subnegotiation,
                (State::Iac, _) => State::Data,
                (State::Option(cmd), option) => {
                    match cmd {
                        WILL => out.replies.extend_from_slice(&[IAC, DONT, option]),
                        DO => out.replies.extend_from_slice(&[IAC, WONT, option]),
                        _ => {}
                    }
                    State::Data
                }
                (State::Subnegotiation, IAC) => State::SubnegotiationIac,
                (State::Subnegotiation, _) => State::Subnegotiation,
                (State::SubnegotiationIac, SE) => State::Data,
                (State::SubnegotiationIac, _) => State::Subnegotiation,
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_offers() {
        let mut decoder = TelnetDecoder::new();
        let decoded = decoder.feed(&[IAC, WILL, 1, IAC, DO, 31, b'P', b'w']);
        assert_eq!(decoded.data, b"Pw");
        assert_eq!(decoded.replies, vec![IAC, DONT, 1, IAC, WONT, 31]);
    }

    #[test]
    fn test_split_sequence() {
        let mut decoder = TelnetDecoder::new();
        let first = decoder.feed(&[b'a', IAC]);
        let second = decoder.feed(&[WILL]);
        let third = decoder.feed(&[3, b'b']);
        assert_eq!(first.data, b"a");
        assert!(second.data.is_empty() && second.replies.is_empty());
        assert_eq!(third.data, b"b");
        assert_eq!(third.replies, vec![IAC, DONT, 3]);
    }

    #[test]
    fn test_escaped_iac_and_subnegotiation() {
        let mut decoder = TelnetDecoder::new();
        let decoded = decoder.feed(&[IAC, IAC, IAC, SB, 24, 1, IAC, SE, b'x', IAC, WONT, 1]);
        assert_eq!(decoded.data, vec![IAC, b'x']);
        assert!(decoded.replies.is_empty());
    }
}
