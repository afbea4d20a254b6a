//! Blocking pattern matching over the receive queue.
//!
//! The matcher accumulates text pulled from the queue and searches it for
//! a literal target (`read_until`) or a list of regular expressions
//! (`expect`). Whatever follows a match stays in the unconsumed buffer
//! for the next call, and on failure the whole accumulated text is kept,
//! so no byte is ever dropped or delivered twice.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{trace, warn};
use memchr::memmem;
use regex::Regex;

use crate::error::{ChannelError, Result};

/// An item on a connection's text queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Decoded text, in socket arrival order.
    Data(String),

    /// The socket was closed. Always the last item on a queue.
    EndOfStream,
}

/// Result of a successful [`StreamMatcher::expect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// Position of the matching pattern in the caller's list.
    pub index: usize,

    /// Source of the matching pattern.
    pub pattern: String,

    /// Capture groups; group 0 is the whole match.
    pub captures: Vec<Option<String>>,

    /// All text consumed, up to and including the end of the match.
    pub text: String,

    /// Byte offset of the match start within `text`.
    pub start: usize,
}

impl ExpectMatch {
    /// Get a capture group by index.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(|g| g.as_deref())
    }

    /// Get the matched text itself.
    pub fn matched(&self) -> &str {
        &self.text[self.start..]
    }
}

/// Stateful reader over the matching queue of one connection.
///
/// Not reentrant: a single caller drives a matcher at a time.
#[derive(Debug)]
pub struct StreamMatcher {
    queue: Receiver<StreamEvent>,

    /// Text dequeued but not yet returned to a caller.
    unconsumed: String,

    /// False once end-of-stream has been seen.
    readable: bool,
}

impl StreamMatcher {
    /// Create a matcher reading from the given queue.
    pub fn new(queue: Receiver<StreamEvent>) -> Self {
        Self {
            queue,
            unconsumed: String::new(),
            readable: true,
        }
    }

    /// Text received but not matched yet.
    pub fn unconsumed(&self) -> &str {
        &self.unconsumed
    }

    /// Whether the end of the stream has not been reached yet.
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Read until `target` is seen.
    ///
    /// Returns everything up to and including the first occurrence of
    /// `target`. Fails with [`ChannelError::Timeout`] if the deadline
    /// passes first, or [`ChannelError::EndOfStream`] if the peer closed
    /// the stream first. On failure the text read so far stays unconsumed.
    pub fn read_until(&mut self, target: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let finder = memmem::Finder::new(target.as_bytes());

        let mut data = std::mem::take(&mut self.unconsumed);
        let mut offset = 0;

        loop {
            if let Some(pos) = finder.find(&data.as_bytes()[offset..]) {
                let end = offset + pos + target.len();
                self.unconsumed = data.split_off(end);
                trace!("read_until matched {:?} after {} bytes", target, end);
                return Ok(data);
            }

            // A match may straddle the old data and the next chunk
            offset = data.len().saturating_sub(target.len());

            match self.next_chunk(deadline, timeout) {
                Ok(chunk) => data.push_str(&chunk),
                Err(e) => {
                    if let ChannelError::Timeout(_) = e {
                        warn!(
                            "Couldn't find a match for string {:?} before timeout expired",
                            target
                        );
                    }
                    self.unconsumed = data;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read until one of `patterns` matches.
    ///
    /// Patterns are unanchored searches over the whole accumulated text,
    /// tried in order; when several match, the first in the list wins.
    /// Timeout and end-of-stream behave as in [`read_until`](Self::read_until).
    pub fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<ExpectMatch> {
        let deadline = Instant::now() + timeout;
        let mut data = std::mem::take(&mut self.unconsumed);

        loop {
            let found = patterns.iter().enumerate().find_map(|(index, pattern)| {
                pattern.captures(&data).map(|caps| {
                    let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
                    let captures = caps
                        .iter()
                        .map(|group| group.map(|g| g.as_str().to_string()))
                        .collect::<Vec<_>>();
                    (index, start, end, captures)
                })
            });

            if let Some((index, start, end, captures)) = found {
                self.unconsumed = data.split_off(end);
                return Ok(ExpectMatch {
                    index,
                    pattern: patterns[index].as_str().to_string(),
                    captures,
                    text: data,
                    start,
                });
            }

            match self.next_chunk(deadline, timeout) {
                Ok(chunk) => data.push_str(&chunk),
                Err(e) => {
                    if let ChannelError::Timeout(_) = e {
                        let sources: Vec<&str> = patterns.iter().map(|p| p.as_str()).collect();
                        warn!(
                            "Couldn't find a match for any of {:?} before timeout expired",
                            sources
                        );
                    }
                    self.unconsumed = data;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read everything until the end of the stream.
    ///
    /// Blocks until the peer closes the connection.
    pub fn read_all(&mut self) -> String {
        let mut data = std::mem::take(&mut self.unconsumed);

        while self.readable {
            match self.queue.recv() {
                Ok(StreamEvent::Data(text)) => data.push_str(&text),
                Ok(StreamEvent::EndOfStream) | Err(_) => self.readable = false,
            }
        }

        data
    }

    /// Pull the next chunk, honouring the caller's original deadline.
    fn next_chunk(
        &mut self,
        deadline: Instant,
        timeout: Duration,
    ) -> std::result::Result<String, ChannelError> {
        if !self.readable {
            return Err(ChannelError::EndOfStream);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChannelError::Timeout(timeout));
        }

        match self.queue.recv_timeout(remaining) {
            Ok(StreamEvent::Data(text)) => Ok(text),
            Ok(StreamEvent::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                self.readable = false;
                Err(ChannelError::EndOfStream)
            }
            Err(RecvTimeoutError::Timeout) => Err(ChannelError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Sender};
    use std::thread;

    use super::*;

    fn matcher() -> (Sender<StreamEvent>, StreamMatcher) {
        let (tx, rx) = mpsc::channel();
        (tx, StreamMatcher::new(rx))
    }

    fn data(text: &str) -> StreamEvent {
        StreamEvent::Data(text.to_string())
    }

    #[test]
    fn test_read_until_single_chunk() {
        let (tx, mut m) = matcher();
        tx.send(data("login: Username: rest")).unwrap();

        let out = m.read_until("Username:", Duration::from_secs(1)).unwrap();
        assert_eq!(out, "login: Username:");
        assert_eq!(m.unconsumed(), " rest");
    }

    #[test]
    fn test_read_until_target_split_across_chunks() {
        let (tx, mut m) = matcher();
        tx.send(data("xx abc")).unwrap();
        tx.send(data("de yy")).unwrap();

        let out = m.read_until("abcde", Duration::from_secs(1)).unwrap();
        assert_eq!(out, "xx abcde");
        assert_eq!(m.unconsumed(), " yy");
    }

    #[test]
    fn test_read_until_target_split_over_many_chunks() {
        let (tx, mut m) = matcher();
        for piece in ["RP/0/", "RP0/", "CPU0:", "router1", "#"] {
            tx.send(data(piece)).unwrap();
        }

        let out = m
            .read_until("RP/0/RP0/CPU0:router1#", Duration::from_secs(1))
            .unwrap();
        assert_eq!(out, "RP/0/RP0/CPU0:router1#");
        assert_eq!(m.unconsumed(), "");
    }

    #[test]
    fn test_no_duplication_no_loss() {
        let (tx, mut m) = matcher();
        let chunks = ["Username:", "Pass", "word:xyz", "RP/0/RP0/CPU0:r1#", "tail"];
        for chunk in chunks {
            tx.send(data(chunk)).unwrap();
        }

        let timeout = Duration::from_secs(1);
        let mut seen = String::new();
        seen.push_str(&m.read_until("Username:", timeout).unwrap());
        seen.push_str(&m.read_until("Password:", timeout).unwrap());

        let prompt = Regex::new(r"RP/0/RP0/CPU0:(\S+)#").unwrap();
        seen.push_str(&m.expect(&[&prompt], timeout).unwrap().text);

        // Nothing matches, everything read so far must stay unconsumed
        assert!(m.read_until("never", Duration::from_millis(50)).is_err());
        seen.push_str(m.unconsumed());

        assert_eq!(seen, chunks.concat());
    }

    #[test]
    fn test_timeout_within_bounds() {
        let (_tx, mut m) = matcher();
        let start = Instant::now();

        let err = m.read_until("never", Duration::from_secs(1)).unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1200), "{:?}", elapsed);
        assert!(m.is_readable());
    }

    #[test]
    fn test_timeout_counts_from_call_entry() {
        let (tx, mut m) = matcher();
        let feeder = thread::spawn(move || {
            for _ in 0..10 {
                tx.send(data("noise ")).unwrap();
                thread::sleep(Duration::from_millis(50));
            }
            tx
        });

        let start = Instant::now();
        let err = m.read_until("never", Duration::from_millis(200)).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_millis(400));
        drop(feeder.join().unwrap());
    }

    #[test]
    fn test_text_kept_after_timeout() {
        let (tx, mut m) = matcher();
        tx.send(data("partial ")).unwrap();

        let err = m.read_until("done", Duration::from_millis(50)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(m.unconsumed(), "partial ");

        tx.send(data("done")).unwrap();
        let out = m.read_until("done", Duration::from_secs(1)).unwrap();
        assert_eq!(out, "partial done");
    }

    #[test]
    fn test_end_of_stream() {
        let (tx, mut m) = matcher();
        tx.send(data("abc")).unwrap();
        tx.send(StreamEvent::EndOfStream).unwrap();

        let err = m.read_until("zzz", Duration::from_secs(5)).unwrap_err();
        assert!(err.is_end_of_stream());
        assert!(!m.is_readable());

        // Buffered text can still be matched after the end of stream
        assert_eq!(m.read_until("b", Duration::from_secs(5)).unwrap(), "ab");

        // And further misses fail fast instead of blocking
        let start = Instant::now();
        assert!(m.read_until("zzz", Duration::from_secs(5)).unwrap_err().is_end_of_stream());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_dropped_sender_is_end_of_stream() {
        let (tx, mut m) = matcher();
        drop(tx);
        let err = m.expect(&[&Regex::new("x").unwrap()], Duration::from_secs(5)).unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn test_expect_returns_first_pattern_in_order() {
        let (tx, mut m) = matcher();
        tx.send(data("% User Authentication failed\nRP/0/RP0/CPU0:r1#")).unwrap();

        let prompt = Regex::new(r"RP/0/RP0/CPU0:(\S+)#").unwrap();
        let failed = Regex::new(r"% User Authentication failed").unwrap();

        let found = m.expect(&[&prompt, &failed], Duration::from_secs(1)).unwrap();
        assert_eq!(found.index, 0);
        assert_eq!(found.group(1), Some("r1"));
        assert_eq!(found.matched(), "RP/0/RP0/CPU0:r1#");
        assert_eq!(m.unconsumed(), "");
    }

    #[test]
    fn test_expect_across_chunks_with_captures() {
        let (tx, mut m) = matcher();
        tx.send(data("boot... RP/0/0/CPU0:")).unwrap();
        tx.send(data("ios# more")).unwrap();

        let prompt = Regex::new(r"RP/0/0/CPU0:([^\s#]+)#").unwrap();
        let found = m.expect(&[&prompt], Duration::from_secs(1)).unwrap();

        assert_eq!(found.pattern, prompt.as_str());
        assert_eq!(found.group(0), Some("RP/0/0/CPU0:ios#"));
        assert_eq!(found.group(1), Some("ios"));
        assert_eq!(found.text, "boot... RP/0/0/CPU0:ios#");
        assert_eq!(m.unconsumed(), " more");
    }

    #[test]
    fn test_read_all() {
        let (tx, mut m) = matcher();
        tx.send(data("one ")).unwrap();
        tx.send(data("two")).unwrap();
        tx.send(StreamEvent::EndOfStream).unwrap();

        m.read_until("one", Duration::from_secs(1)).unwrap();
        assert_eq!(m.read_all(), " two");
        assert!(!m.is_readable());
        assert_eq!(m.read_all(), "");
    }
}
