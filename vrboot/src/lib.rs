//! # vrboot
//!
//! Boot emulated network routers under QEMU and drive their serial
//! consoles over telnet.
//!
//! The crate is built in layers:
//!
//! - [`telnet`]: a telnet client that refuses every option, decodes the
//!   received text and logs it line by line
//! - [`channel`]: blocking `read_until` / `expect` over the received text
//! - [`console`]: an IOS XR console automaton (login, RSA key,
//!   configuration, logout)
//! - [`vm`]: the VM lifecycle and the router models
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use secrecy::SecretString;
//! use vrboot::console::{CliPrompt, ConsoleSession, Credentials, XRV9K_PREFIX};
//! use vrboot::telnet::{TelnetConfig, TelnetConnection};
//!
//! fn main() -> vrboot::Result<()> {
//!     let mut console = TelnetConnection::new(TelnetConfig::new("127.0.0.1", 5000));
//!     console.open()?;
//!     console.read_until("export@cisco.com.", Duration::from_secs(600))?;
//!
//!     let credentials = Credentials::new("admin", SecretString::from("admin".to_string()));
//!     let mut session =
//!         ConsoleSession::new(&mut console, credentials, CliPrompt::new(XRV9K_PREFIX)?);
//!
//!     session.connect()?;
//!     println!("{}", session.run_command("show version")?);
//!     session.disconnect()?;
//!
//!     console.close()?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod console;
pub mod error;
pub mod telnet;
pub mod vm;

#[cfg(test)]
mod test_log;

// Re-export main types for convenience
pub use console::{ConsoleSession, ConsoleStream, Credentials};
pub use error::{Error, Result};
pub use telnet::{TelnetConfig, TelnetConnection};
pub use vm::{VirtualRouter, VmConfig, VmVariant};
