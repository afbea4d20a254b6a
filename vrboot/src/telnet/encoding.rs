//! Text encoding on the wire.
//!
//! Socket reads do not respect character boundaries, so decoding is
//! stateful: an incomplete multi-byte sequence at the end of a read is
//! held back until the next read completes it.

/// Character encoding used to convert between text and socket bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 (the default).
    #[default]
    Utf8,

    /// ISO-8859-1, one byte per character.
    Latin1,
}

impl Encoding {
    /// Encode text for the socket.
    ///
    /// Latin-1 cannot represent characters above U+00FF; those become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }

    /// Create a streaming decoder for this encoding.
    pub fn decoder(&self) -> TextDecoder {
        TextDecoder {
            encoding: *self,
            pending: Vec::new(),
        }
    }
}

/// Streaming decoder from socket bytes to text.
#[derive(Debug)]
pub struct TextDecoder {
    encoding: Encoding,

    /// Bytes of an incomplete UTF-8 sequence from the previous read.
    pending: Vec<u8>,
}

impl TextDecoder {
    /// Decode the next chunk of bytes.
    ///
    /// Invalid sequences are replaced with U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        match self.encoding {
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Encoding::Utf8 => {
                self.pending.extend_from_slice(bytes);

                let mut out = String::with_capacity(self.pending.len());
                let mut consumed = 0;
                loop {
                    let input = &self.pending[consumed..];
                    match std::str::from_utf8(input) {
                        Ok(text) => {
                            out.push_str(text);
                            consumed = self.pending.len();
                            break;
                        }
                        Err(e) => {
                            let valid = e.valid_up_to();
                            out.push_str(&String::from_utf8_lossy(&input[..valid]));
                            consumed += valid;
                            match e.error_len() {
                                Some(len) => {
                                    out.push(char::REPLACEMENT_CHARACTER);
                                    consumed += len;
                                }
                                // Incomplete sequence at the end, wait for more bytes
                                None => break,
                            }
                        }
                    }
                }

                self.pending.drain(..consumed);
                out
            }
        }
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
