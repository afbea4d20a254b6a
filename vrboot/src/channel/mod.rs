//! Channel layer for pattern matching over the received text.
//!
//! This module turns the queue filled by a connection's receiver thread
//! into blocking `read_until` / `expect` primitives, and provides the
//! escape sequence filter used by the log consumer.

mod ansi;
mod matcher;

pub use ansi::AnsiStripper;
pub use matcher::{ExpectMatch, StreamEvent, StreamMatcher};
