//! Console automation for IOS XR serial consoles.
//!
//! [`ConsoleSession`] scripts the device CLI (login, key generation,
//! configuration, logout) on top of any [`ConsoleStream`], the blocking
//! write / read-until / expect primitives a [`TelnetConnection`] provides.

mod prompt;
mod session;

use std::time::Duration;

use regex::Regex;

use crate::channel::ExpectMatch;
use crate::error::Result;
use crate::telnet::TelnetConnection;

pub use prompt::{CliPrompt, XRV9K_PREFIX, XRV_PREFIX};
pub use session::{ConsoleSession, Credentials, SessionState, SessionTimeouts};

/// The stream primitives a console session is built on.
pub trait ConsoleStream {
    /// Queue text to be sent to the device.
    fn write(&mut self, text: &str) -> Result<()>;

    /// Block until `target` is received, returning the consumed text.
    fn read_until(&mut self, target: &str, timeout: Duration) -> Result<String>;

    /// Block until one of `patterns` matches.
    fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<ExpectMatch>;
}

impl ConsoleStream for TelnetConnection {
    fn write(&mut self, text: &str) -> Result<()> {
        TelnetConnection::write(self, text)
    }

    fn read_until(&mut self, target: &str, timeout: Duration) -> Result<String> {
        TelnetConnection::read_until(self, target, timeout)
    }

    fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<ExpectMatch> {
        TelnetConnection::expect(self, patterns, timeout)
    }
}
