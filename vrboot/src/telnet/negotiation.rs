//! Minimal telnet negotiation filter.
//!
//! Every option the peer offers or requests is refused:
//! - `IAC DO <opt>` / `IAC DONT <opt>`   => `IAC WONT <opt>`
//! - `IAC WILL <opt>` / `IAC WONT <opt>` => `IAC DONT <opt>`
//!
//! Subnegotiation blocks (`IAC SB ... IAC SE`) are swallowed, `IAC IAC`
//! decodes to a literal 255 and NUL / DC1 bytes are dropped. Everything
//! else passes through untouched.

use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use memchr::memchr3;

/// Interpret As Command
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

const NUL: u8 = 0;
const DC1: u8 = 17;

/// Position inside a command sequence that may span two reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    /// Saw IAC, waiting for the command byte.
    Command,
    /// Saw IAC + negotiation verb, waiting for the option byte.
    /// Holds the verb to reply with.
    Option(u8),
}

/// Stateful telnet command filter.
///
/// One filter belongs to one socket. State is kept between calls to
/// [`feed`](Self::feed), so a command split across two reads is handled
/// the same as one delivered in a single read.
#[derive(Debug)]
pub struct NegotiationFilter {
    pending: Pending,
    in_subnegotiation: bool,
}

impl NegotiationFilter {
    /// Create a filter in its initial state.
    pub fn new() -> Self {
        Self {
            pending: Pending::None,
            in_subnegotiation: false,
        }
    }

    /// Whether the filter is inside an `SB ... SE` block.
    pub fn in_subnegotiation(&self) -> bool {
        self.in_subnegotiation
    }

    /// Filter one chunk of raw socket bytes.
    ///
    /// Refusals are written to `replies` as soon as the option byte is
    /// seen. Returns the clean bytes of this chunk.
    pub fn feed<W: Write>(&mut self, raw: &[u8], replies: &mut W) -> io::Result<Bytes> {
        let mut clean = BytesMut::with_capacity(raw.len());
        let mut rest = raw;

        while !rest.is_empty() {
            if self.pending == Pending::None && !self.in_subnegotiation {
                // Copy the run of plain bytes up to the next special one
                let run = memchr3(IAC, NUL, DC1, rest).unwrap_or(rest.len());
                clean.extend_from_slice(&rest[..run]);
                rest = &rest[run..];
                if rest.is_empty() {
                    break;
                }
            }

            let byte = rest[0];
            rest = &rest[1..];

            match self.pending {
                Pending::Command => {
                    self.pending = Pending::None;
                    match byte {
                        DO | DONT => self.pending = Pending::Option(WONT),
                        WILL | WONT => self.pending = Pending::Option(DONT),
                        IAC if !self.in_subnegotiation => clean.put_u8(IAC),
                        SB => self.in_subnegotiation = true,
                        SE => self.in_subnegotiation = false,
                        _ => {}
                    }
                }
                Pending::Option(verb) => {
                    self.pending = Pending::None;
                    replies.write_all(&[IAC, verb, byte])?;
                }
                Pending::None => match byte {
                    IAC => self.pending = Pending::Command,
                    NUL | DC1 => {}
                    _ if self.in_subnegotiation => {}
                    _ => clean.put_u8(byte),
                },
            }
        }

        Ok(clean.freeze())
    }
}

impl Default for NegotiationFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_all(input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut filter = NegotiationFilter::new();
        let mut replies = Vec::new();
        let clean = filter.feed(input, &mut replies).unwrap();
        (clean.to_vec(), replies)
    }

    #[test]
    fn test_plain_data_unchanged() {
        let (clean, replies) = filter_all(b"Username: ");
        assert_eq!(clean, b"Username: ");
        assert!(replies.is_empty());
    }

    #[test]
    fn test_refuses_do_and_dont_with_wont() {
        let (clean, replies) = filter_all(&[b'a', IAC, DO, 1, IAC, DONT, 3, b'b']);
        assert_eq!(clean, b"ab");
        assert_eq!(replies, vec![IAC, WONT, 1, IAC, WONT, 3]);
    }

    #[test]
    fn test_refuses_will_and_wont_with_dont() {
        let (clean, replies) = filter_all(&[IAC, WILL, 1, b'x', IAC, WONT, 24]);
        assert_eq!(clean, b"x");
        assert_eq!(replies, vec![IAC, DONT, 1, IAC, DONT, 24]);
    }

    #[test]
    fn test_escaped_iac() {
        let (clean, replies) = filter_all(&[b'a', IAC, IAC, b'b']);
        assert_eq!(clean, vec![b'a', 255, b'b']);
        assert!(replies.is_empty());
    }

    #[test]
    fn test_subnegotiation_swallowed() {
        let (clean, _) = filter_all(&[b'a', IAC, SB, 24, b'x', b'y', IAC, SE, b'b']);
        assert_eq!(clean, b"ab");
    }

    #[test]
    fn test_null_and_dc1_dropped() {
        let (clean, _) = filter_all(&[b'a', 0, b'b', 17, b'c']);
        assert_eq!(clean, b"abc");
    }

    #[test]
    fn test_other_commands_ignored() {
        // IAC NOP, IAC GA
        let (clean, replies) = filter_all(&[b'a', IAC, 241, IAC, 249, b'b']);
        assert_eq!(clean, b"ab");
        assert!(replies.is_empty());
    }

    #[test]
    fn test_truncated_command_does_not_panic() {
        let (clean, replies) = filter_all(&[b'a', IAC, DO]);
        assert_eq!(clean, b"a");
        assert!(replies.is_empty());
    }

    #[test]
    fn test_every_split_matches_single_feed() {
        let input = [
            b'l', IAC, DO, 1, b'o', IAC, SB, 31, 0, 80, IAC, SE, b'g', IAC, IAC, 0, b'i', IAC,
            WILL, 3, b'n',
        ];
        let (expected_clean, expected_replies) = filter_all(&input);

        for split in 0..=input.len() {
            let mut filter = NegotiationFilter::new();
            let mut replies = Vec::new();
            let mut clean = filter.feed(&input[..split], &mut replies).unwrap().to_vec();
            clean.extend_from_slice(&filter.feed(&input[split..], &mut replies).unwrap());

            assert_eq!(clean, expected_clean, "split at {}", split);
            assert_eq!(replies, expected_replies, "split at {}", split);
        }
    }

    #[test]
    fn test_subnegotiation_spans_feeds() {
        let mut filter = NegotiationFilter::new();
        let mut replies = Vec::new();

        let first = filter.feed(&[b'a', IAC, SB, 24, b'x'], &mut replies).unwrap();
        assert_eq!(&first[..], b"a");
        assert!(filter.in_subnegotiation());

        let second = filter.feed(&[b'y', IAC, SE, b'b'], &mut replies).unwrap();
        assert_eq!(&second[..], b"b");
        assert!(!filter.in_subnegotiation());
        assert!(replies.is_empty());
    }

    #[test]
    fn test_option_completed_on_next_feed() {
        let mut filter = NegotiationFilter::new();
        let mut replies = Vec::new();

        let first = filter.feed(&[b'a', IAC, DO], &mut replies).unwrap();
        assert_eq!(&first[..], b"a");
        assert!(replies.is_empty());

        let second = filter.feed(&[1, b'b'], &mut replies).unwrap();
        assert_eq!(&second[..], b"b");
        assert_eq!(replies, vec![IAC, WONT, 1]);
    }
}
