//! Escape sequence stripping for device logs.
//!
//! Serial consoles emit cursor movement, screen clears and title updates
//! that make log files unreadable. A `vte` parser drops all of them except
//! SGR (`ESC [ ... m`) colour sequences, which are re-emitted verbatim.

use vte::{Params, Parser, Perform};

/// Streaming escape sequence filter.
///
/// Parser state is kept between calls, so a sequence split across two
/// chunks is still recognised.
pub struct AnsiStripper {
    parser: Parser,
    output: StrippedText,
}

impl AnsiStripper {
    /// Create a new stripper.
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            output: StrippedText::default(),
        }
    }

    /// Strip one chunk of text.
    pub fn strip(&mut self, text: &str) -> String {
        self.parser.advance(&mut self.output, text.as_bytes());
        std::mem::take(&mut self.output.text)
    }
}

impl Default for AnsiStripper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AnsiStripper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiStripper")
            .field("buffered", &self.output.text.len())
            .finish()
    }
}

#[derive(Default)]
struct StrippedText {
    text: String,
}

impl Perform for StrippedText {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        // Keep line structure, drop bells, backspaces and the like
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.text.push(char::from(byte));
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if action != 'm' || ignore || !intermediates.is_empty() {
            return;
        }

        self.text.push_str("\x1b[");
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.text.push(';');
            }
            for (j, sub) in param.iter().enumerate() {
                if j > 0 {
                    self.text.push(':');
                }
                self.text.push_str(&sub.to_string());
            }
        }
        self.text.push('m');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        let mut stripper = AnsiStripper::new();
        assert_eq!(stripper.strip("router1 con0 is now available\r\n"), "router1 con0 is now available\r\n");
    }

    #[test]
    fn test_colours_kept() {
        let mut stripper = AnsiStripper::new();
        assert_eq!(
            stripper.strip("\x1b[32mGreen text\x1b[0m"),
            "\x1b[32mGreen text\x1b[0m"
        );
    }

    #[test]
    fn test_cursor_and_clear_removed() {
        let mut stripper = AnsiStripper::new();
        assert_eq!(stripper.strip("\x1b[2J\x1b[1;1Hhello\x1b[K"), "hello");
    }

    #[test]
    fn test_osc_title_removed() {
        let mut stripper = AnsiStripper::new();
        assert_eq!(stripper.strip("\x1b]0;router\x07text"), "text");
    }

    #[test]
    fn test_sequence_split_across_chunks() {
        let mut stripper = AnsiStripper::new();
        let first = stripper.strip("abc\x1b[2");
        let second = stripper.strip("Jdef");
        assert_eq!(format!("{}{}", first, second), "abcdef");
    }
}
