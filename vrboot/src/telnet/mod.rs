//! Telnet transport layer.
//!
//! A [`TelnetConnection`] owns one TCP socket and three OS threads:
//! a receiver that strips telnet negotiation and decodes text, a sender
//! that drains the outbound queue, and a log consumer that turns the
//! received text into one log record per line.

mod config;
mod connection;
mod encoding;
pub mod negotiation;
pub(crate) mod workers;

pub use config::{LogSink, TelnetConfig};
pub use connection::{ShutdownHandle, TelnetConnection};
pub use encoding::{Encoding, TextDecoder};
pub use negotiation::NegotiationFilter;
